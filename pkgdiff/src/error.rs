use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("changelog query failed: {0}")]
    Feed(String),

    #[error("unable to get metadata: {0}")]
    Metadata(String),

    #[error("unable to determine version pair: {0}")]
    IndeterminatePair(String),

    #[error("no downloadable artifact: {0}")]
    NoArtifact(String),

    #[error("artifact exceeds size limit: {size}>={limit}")]
    SizeLimit { size: u64, limit: u64 },

    #[error("download failed: {0}")]
    Fetch(String),

    #[error("diff tool timed out")]
    DiffTimeout,

    #[error("diff tool failed: {0}")]
    DiffTool(String),

    #[error("invalid exclude pattern: {0}")]
    Pattern(#[from] glob::PatternError),
}

impl Error {
    /// Expected skips are logged at warning level and are not counted
    /// as operational errors, even though the task itself fails.
    pub fn is_expected_skip(&self) -> bool {
        matches!(self, Error::IndeterminatePair(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
