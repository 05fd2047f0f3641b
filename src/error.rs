use thiserror::Error;

#[derive(Error, Debug)]
pub enum BeadError {
    #[error("Invalid archive: {0}")]
    InvalidArchive(String),

    #[error("Invalid bead name: {0}")]
    InvalidBeadName(String),

    #[error("Invalid workspace: {0}")]
    InvalidWorkspace(String),

    #[error("Box error: {0}")]
    Box(String),

    #[error("Box index error: {0}")]
    BoxIndex(String),

    #[error("Not found: {0}")]
    Lookup(String),

    #[error("Invalid value: {0}")]
    Value(String),

    #[error("Dependency cycle among bead clusters: {0}")]
    Cycle(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Box index error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl BeadError {
    /// Errors a directory scan may skip: a single unreadable or non-bead
    /// file must not abort enumeration of a box.
    pub fn is_skippable_during_scan(&self) -> bool {
        matches!(
            self,
            BeadError::InvalidArchive(_)
                | BeadError::InvalidBeadName(_)
                | BeadError::Io(_)
                | BeadError::Zip(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, BeadError>;
