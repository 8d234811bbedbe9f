use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The image is malformed or not a GameCube disk.
    #[error("invalid disk image at offset {offset:#x}: {reason}")]
    Format { offset: u64, reason: String },

    #[error("invalid name {name:?}: {reason}")]
    Name { name: String, reason: &'static str },

    #[error("'{name}' already exists in '{parent}'")]
    Conflict { parent: String, name: String },

    #[error("cannot move '{entry}' into itself or its own subdirectory '{target}'")]
    Cycle { entry: String, target: String },

    #[error("image needs {required} bytes but the limit is {limit}")]
    Capacity { required: u64, limit: u64 },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt compressed data in '{path}' at byte {offset}: {reason}")]
    Codec {
        path: String,
        offset: usize,
        reason: &'static str,
    },

    #[error("no such entry: {0}")]
    NotFound(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("is a directory: {0}")]
    IsADirectory(String),

    #[error("{0}")]
    InvalidOperation(String),

    #[error("the tree or image changed after the layout was planned")]
    StalePlan,

    #[error("commit cancelled")]
    Cancelled,

    #[error("the disk is busy with another edit or commit")]
    Busy,

    #[error("the disk session was poisoned by a panic")]
    Poisoned,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid search pattern: {0}")]
    Pattern(#[from] regex::Error),
}

impl Error {
    pub(crate) fn format<S: Into<String>>(offset: u64, reason: S) -> Error {
        Error::Format {
            offset,
            reason: reason.into(),
        }
    }

    pub(crate) fn io<S: Into<String>>(context: S, source: std::io::Error) -> Error {
        Error::Io {
            context: context.into(),
            source,
        }
    }

    /// Attach the in-disk path of the file being processed to errors that
    /// were raised without one.
    pub fn at_path(self, entry_path: &str) -> Error {
        match self {
            Error::Codec {
                path,
                offset,
                reason,
            } if path.is_empty() => Error::Codec {
                path: entry_path.to_string(),
                offset,
                reason,
            },
            Error::Io { context, source } => Error::Io {
                context: format!("{entry_path}: {context}"),
                source,
            },
            other => other,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Error {
        Error::Io {
            context: "I/O error".to_string(),
            source: error,
        }
    }
}

impl From<walkdir::Error> for Error {
    fn from(error: walkdir::Error) -> Error {
        let context = match error.path() {
            Some(path) => format!("cannot read '{}'", path.display()),
            None => "cannot walk directory".to_string(),
        };
        let source = error
            .into_io_error()
            .unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "filesystem loop"));
        Error::Io { context, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_at_path_fills_codec_path() {
        let err = Error::Codec {
            path: String::new(),
            offset: 3,
            reason: "truncated stream",
        };
        let err = err.at_path("/files/a.szs");
        assert_eq!(
            err.to_string(),
            "corrupt compressed data in '/files/a.szs' at byte 3: truncated stream"
        );
    }

    #[test]
    fn test_at_path_keeps_other_errors() {
        let err = Error::NotFound("/x".to_string()).at_path("/y");
        assert!(matches!(err, Error::NotFound(ref p) if p == "/x"));
    }
}
