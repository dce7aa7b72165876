use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum CuratorError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    #[error("Path error: {0}")]
    Path(String),

    #[error("Document error: {0}")]
    Document(String),

    #[error("No registered asset type for: {0}")]
    UnknownAssetType(PathBuf),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, CuratorError>;
