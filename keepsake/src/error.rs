use thiserror::Error;

#[derive(Error, Debug)]
pub enum KeepsakeError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Upload error: {0}")]
    Upload(String),

    #[error("Persist error: {0}")]
    Persist(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Feed error: {0}")]
    Feed(String),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),
}

impl From<validator::ValidationErrors> for KeepsakeError {
    fn from(errors: validator::ValidationErrors) -> Self {
        KeepsakeError::Validation(errors.to_string())
    }
}

pub type Result<T> = std::result::Result<T, KeepsakeError>;
