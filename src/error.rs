use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum DicomError {
    #[error("invalid DICOM store resource path: {0}")]
    #[diagnostic(help(
        "expected projects/<project>/locations/<location>/datasets/<dataset>/dicomStores/<store>"
    ))]
    InvalidResourcePath(String),

    #[error("invalid study id: {0:?}")]
    InvalidStudyId(String),

    #[error("failed to read service account credentials at {0}")]
    CredentialsRead(PathBuf),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("request failed: {0}")]
    Network(String),

    #[error("request to {url} returned status {status}")]
    NetworkStatus { status: u16, url: String },

    #[error("failed to download DICOM instance {sop_instance_uid}: status code {status}")]
    InstanceFetchFailed { sop_instance_uid: String, status: u16 },

    #[error("malformed DICOM metadata: {0}")]
    MalformedMetadata(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("missing required parameter: {0}")]
    MissingParameter(&'static str),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("download cancelled")]
    Cancelled,

    #[error("download worker panicked")]
    WorkerPanicked,
}

impl DicomError {
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            DicomError::Network(_)
                | DicomError::NetworkStatus { .. }
                | DicomError::InstanceFetchFailed { .. }
        )
    }
}
