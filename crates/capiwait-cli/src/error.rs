//! Error types for the CLI

use std::path::PathBuf;

/// CLI Result type
pub type Result<T> = std::result::Result<T, Error>;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Wait or API failure, shown verbatim
    #[error(transparent)]
    Client(#[from] capiwait_common::Error),

    #[error("failed to read config file {}: {message}", path.display())]
    ConfigFile { path: PathBuf, message: String },

    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },
}

impl Error {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Error::InvalidArgument {
            message: message.into(),
        }
    }

    pub fn config_file(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Error::ConfigFile {
            path: path.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_are_shown_verbatim() {
        let err: Error = capiwait_common::Error::not_ready("control plane is not available yet").into();
        assert_eq!(err.to_string(), "control plane is not available yet");
    }
}
