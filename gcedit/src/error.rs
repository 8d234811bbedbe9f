use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    DiskError(gcfs::error::Error),
    IoError(std::io::Error),
    JsonError(serde_json::Error),
    CliInputError(String),
    /// Host paths `dump` could not create.
    ExtractError(Vec<std::path::PathBuf>),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::DiskError(err) => write!(f, "{}", err),
            Error::IoError(err) => write!(f, "IO error: {}", err),
            Error::JsonError(err) => write!(f, "JSON error: {}", err),
            Error::CliInputError(msg) => write!(f, "{}", msg),
            Error::ExtractError(paths) => write!(f, "could not extract {} paths", paths.len()),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::DiskError(err) => Some(err),
            Error::IoError(err) => Some(err),
            Error::JsonError(err) => Some(err),
            _ => None,
        }
    }
}

impl std::convert::From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Error {
        Error::IoError(error)
    }
}

impl std::convert::From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Error {
        Error::JsonError(error)
    }
}

impl std::convert::From<gcfs::error::Error> for Error {
    fn from(error: gcfs::error::Error) -> Error {
        Error::DiskError(error)
    }
}
