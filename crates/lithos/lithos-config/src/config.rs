use lithos_io::OpenMode;
use lithos_journal::{MAX_RING_LOG2, RingConfig};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct JournalConfig {
    #[serde(default = "defaults::path")]
    pub path: String,
    #[serde(default = "defaults::ring_size_log2")]
    pub ring_size_log2: u32,
    #[serde(default = "defaults::open_mode")]
    pub open_mode: OpenMode,
    #[serde(default = "defaults::log_level")]
    pub log_level: String,
    /// How long the port worker sleeps when it finds nothing to do.
    #[serde(default = "defaults::worker_idle_us")]
    pub worker_idle_us: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read '{path}'")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config")]
    Parse(#[from] toml::de::Error),

    #[error("invalid `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

mod defaults {
    use lithos_io::OpenMode;

    pub fn path() -> String {
        "/tmp/lithos_journal".into()
    }

    pub fn ring_size_log2() -> u32 {
        20
    }

    pub fn open_mode() -> OpenMode {
        OpenMode::OpenOrCreate
    }

    pub fn log_level() -> String {
        "info".into()
    }

    pub fn worker_idle_us() -> u64 {
        200
    }
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            path: defaults::path(),
            ring_size_log2: defaults::ring_size_log2(),
            open_mode: defaults::open_mode(),
            log_level: defaults::log_level(),
            worker_idle_us: defaults::worker_idle_us(),
        }
    }
}

impl JournalConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let toml_to_str = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&toml_to_str)
    }

    pub fn from_toml_str(toml_str: &str) -> Result<Self, ConfigError> {
        let config: JournalConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.path.is_empty() {
            return Err(ConfigError::Invalid {
                field: "path",
                reason: "must not be empty".into(),
            });
        }
        self.ring()?;
        Ok(())
    }

    pub fn ring(&self) -> Result<RingConfig, ConfigError> {
        RingConfig::from_log2(self.ring_size_log2).map_err(|_| ConfigError::Invalid {
            field: "ring_size_log2",
            reason: format!("{} exceeds {MAX_RING_LOG2}", self.ring_size_log2),
        })
    }

    #[inline]
    pub fn worker_idle(&self) -> Duration {
        Duration::from_micros(self.worker_idle_us)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = JournalConfig::from_toml_str("").unwrap();
        assert_eq!(config, JournalConfig::default());
        assert_eq!(config.path, "/tmp/lithos_journal");
        assert_eq!(config.ring().unwrap().capacity(), 1 << 20);
        assert_eq!(config.worker_idle(), Duration::from_micros(200));
    }

    #[test]
    fn fields_override_defaults() {
        let config = JournalConfig::from_toml_str(
            r#"
            path = "/var/tmp/orders.journal"
            ring_size_log2 = 12
            open_mode = "create"
            log_level = "debug"
            worker_idle_us = 10
            "#,
        )
        .unwrap();
        assert_eq!(config.path, "/var/tmp/orders.journal");
        assert_eq!(config.open_mode, OpenMode::Create);
        assert_eq!(config.ring().unwrap().capacity(), 4096);
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.worker_idle_us, 10);
    }

    #[test]
    fn out_of_range_ring_is_invalid() {
        let err = JournalConfig::from_toml_str("ring_size_log2 = 31").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "ring_size_log2",
                ..
            }
        ));
        JournalConfig::from_toml_str("ring_size_log2 = 0").unwrap();
        JournalConfig::from_toml_str("ring_size_log2 = 30").unwrap();
    }

    #[test]
    fn unknown_mode_and_fields_fail_to_parse() {
        assert!(matches!(
            JournalConfig::from_toml_str(r#"open_mode = "append""#),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            JournalConfig::from_toml_str("ring_size = 4"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            JournalConfig::from_toml_str(r#"path = """#),
            Err(ConfigError::Invalid { field: "path", .. })
        ));
    }

    #[test]
    fn load_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("basalt.toml");
        std::fs::write(&file, "ring_size_log2 = 8\n").unwrap();
        assert_eq!(JournalConfig::load(&file).unwrap().ring_size_log2, 8);

        let missing = dir.path().join("missing.toml");
        assert!(matches!(
            JournalConfig::load(&missing),
            Err(ConfigError::Read { .. })
        ));
    }
}
