use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Invalid device '{0}': expected one of cpu, gpu")]
    InvalidDevice(String),

    #[error("Invalid task status '{0}'")]
    InvalidStatus(String),

    #[error("Invalid task parameters: {0}")]
    InvalidParameters(String),
}

pub type Result<T> = std::result::Result<T, ModelError>;
