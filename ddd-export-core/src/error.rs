//! Error types shared by the core pipeline and its collaborators.

use thiserror::Error;

/// Failure talking to the telematics API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// Network failure or timeout before a response was received.
    #[error("transport error: {0}")]
    Transport(String),
    /// The API answered with a structured error code.
    #[error("remote api error {code}: {message}")]
    Api { code: i64, message: String },
    /// The vehicle has no remote tachograph folder.
    #[error("remote folder not found")]
    FolderNotFound,
    /// The response could not be decoded into the expected shape.
    #[error("unexpected response: {0}")]
    Decode(String),
}

/// SMTP-level failure while delivering an archive.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MailError {
    #[error("smtp authentication failed: {0}")]
    Auth(String),
    #[error("smtp connection failed: {0}")]
    Connection(String),
    #[error("invalid recipient: {0}")]
    Recipient(String),
    /// The relay rejected the message, or it could not be assembled.
    #[error("message rejected: {0}")]
    Rejected(String),
}

#[derive(Debug, Error)]
#[error("archive error: {0}")]
pub struct ArchiveError(pub String);

impl From<zip::result::ZipError> for ArchiveError {
    fn from(e: zip::result::ZipError) -> Self {
        ArchiveError(e.to_string())
    }
}

impl From<std::io::Error> for ArchiveError {
    fn from(e: std::io::Error) -> Self {
        ArchiveError(e.to_string())
    }
}

/// Failure of the per-user automation store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store format error: {0}")]
    Format(#[from] serde_json::Error),
}

/// Reason a single vehicle's export was aborted.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("vehicle {0} is not visible to this account")]
    VehicleNotFound(i64),
    #[error("listing vehicles failed: {0}")]
    ListVehicles(#[source] RemoteError),
    #[error("listing files failed: {0}")]
    ListFiles(#[source] RemoteError),
    #[error("download of {file} failed: {source}")]
    Download {
        file: String,
        #[source]
        source: RemoteError,
    },
    #[error(transparent)]
    Archive(#[from] ArchiveError),
}
