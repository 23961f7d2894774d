use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),

    #[error("cache poisoned: {0}")]
    Poisoned(String),
}

pub type Result<T> = std::result::Result<T, CacheError>;
