use thiserror::Error;

#[derive(Error, Debug)]
pub enum MdankiError {
    #[error("I/O error: {0}")]
    Io(Box<std::io::Error>),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("Reqwest error: {0}")]
    Reqwest(Box<reqwest::Error>),

    #[error("AnkiConnect protocol violation: {0}")]
    Protocol(String),

    #[error("AnkiConnect error: {0}")]
    Anki(String),

    #[error("Unknown note type: {0}")]
    UnknownNoteType(String),

    #[error("MdankiError: {0}")]
    Custom(String),
}

impl From<std::io::Error> for MdankiError {
    fn from(error: std::io::Error) -> Self {
        MdankiError::Io(Box::new(error))
    }
}

impl From<reqwest::Error> for MdankiError {
    fn from(error: reqwest::Error) -> Self {
        MdankiError::Reqwest(Box::new(error))
    }
}
