use crate::port::FileId;

/// Errors reported by a storage port.
///
/// The numeric identifiers returned by [`IoError::code`] are stable and may be
/// logged or exported across process boundaries.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IoError {
    #[error("an error occurred: {message}")]
    Other { message: String },

    #[error("file not found")]
    NotFound,

    #[error("file already exists")]
    AlreadyExists,

    #[error("operation not permitted")]
    NotPermitted,

    #[error("read error: {message}")]
    Read { message: String },

    #[error("work remaining")]
    Pending,

    #[error("unknown file {0}")]
    UnknownFile(FileId),
}

impl IoError {
    pub fn code(&self) -> i32 {
        match self {
            IoError::Other { .. } | IoError::UnknownFile(_) => -21000,
            IoError::NotFound => -21001,
            IoError::AlreadyExists => -21002,
            IoError::NotPermitted => -21003,
            IoError::Read { .. } => -21004,
            IoError::Pending => -21006,
        }
    }

    pub(crate) fn read(err: std::io::Error) -> Self {
        IoError::Read {
            message: err.to_string(),
        }
    }
}

impl From<std::io::Error> for IoError {
    #[cold]
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => IoError::NotFound,
            std::io::ErrorKind::AlreadyExists => IoError::AlreadyExists,
            std::io::ErrorKind::PermissionDenied => IoError::NotPermitted,
            _ => IoError::Other {
                message: err.to_string(),
            },
        }
    }
}
