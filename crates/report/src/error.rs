use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("guide file is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("no guidance entry for label '{0}'")]
    MissingLabel(String),
}
