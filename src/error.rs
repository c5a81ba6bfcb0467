use thiserror::Error;

/// A filename that does not carry a recognisable issue date.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidFilename {
    #[error("invalid filename {name:?}: missing random prefix")]
    MissingRandomPrefix { name: String },

    #[error("invalid filename {name:?}: missing non-random prefix")]
    MissingNonRandomPrefix { name: String },

    #[error("invalid filename {name:?}: bad date")]
    BadDate { name: String },
}

impl InvalidFilename {
    pub fn name(&self) -> &str {
        match self {
            InvalidFilename::MissingRandomPrefix { name }
            | InvalidFilename::MissingNonRandomPrefix { name }
            | InvalidFilename::BadDate { name } => name,
        }
    }

    /// Short machine-friendly reason, used as a log field and metric label.
    pub fn reason(&self) -> &'static str {
        match self {
            InvalidFilename::MissingRandomPrefix { .. } => "missing random prefix",
            InvalidFilename::MissingNonRandomPrefix { .. } => "missing non-random prefix",
            InvalidFilename::BadDate { .. } => "bad date",
        }
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("object not found: {key}")]
    NotFound { key: String },

    #[error("object store error: {0}")]
    Backend(#[from] object_store::Error),

    #[error("body stream error: {0}")]
    Body(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

#[derive(Error, Debug)]
pub enum MirrorError {
    #[error(transparent)]
    InvalidFilename(#[from] InvalidFilename),

    #[error("upstream error: {status}")]
    Upstream { status: u16 },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("too many redirects (max {max})")]
    TooManyRedirects { max: usize },

    #[error("redirect without a usable Location header from {url}")]
    MissingLocation { url: String },

    #[error("no filename in {url}")]
    MissingFilename { url: String },

    #[error("operation cancelled")]
    Cancelled,
}

impl MirrorError {
    /// Metric label for the error class.
    pub fn kind(&self) -> &'static str {
        match self {
            MirrorError::InvalidFilename(_) => "invalid_filename",
            MirrorError::Upstream { .. } => "upstream",
            MirrorError::Http(_) => "http",
            MirrorError::Store(_) => "store",
            MirrorError::TooManyRedirects { .. } => "too_many_redirects",
            MirrorError::MissingLocation { .. } => "missing_location",
            MirrorError::MissingFilename { .. } => "missing_filename",
            MirrorError::Cancelled => "cancelled",
        }
    }
}

pub type Result<T> = std::result::Result<T, MirrorError>;
