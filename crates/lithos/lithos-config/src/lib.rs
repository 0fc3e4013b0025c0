mod config;

pub use config::{ConfigError, JournalConfig};
