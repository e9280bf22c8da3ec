use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection to the engine doesn't work: {0}")]
    Connection(String),

    #[error("Cluster '{0}' doesn't exist")]
    ClusterNotFound(String),

    #[error("Storage domain '{0}' doesn't exist")]
    StorageDomainNotFound(String),

    #[error("Platform error: {0}")]
    Platform(String),
}

pub type Result<T> = std::result::Result<T, BackupError>;

impl From<reqwest::Error> for BackupError {
    fn from(err: reqwest::Error) -> Self {
        Self::Platform(err.to_string())
    }
}
