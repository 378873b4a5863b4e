use thiserror::Error;

pub type SecretResult<T> = Result<T, SecretError>;

#[derive(Debug, Error)]
pub enum SecretError {
    #[error("vault login failed: {0}")]
    Auth(String),

    #[error("vault request failed: {0}")]
    Http(String),

    #[error("vault returned {status} for {path}")]
    Status { status: u16, path: String },

    #[error("secret {path}: no key `{key}`")]
    MissingKey { path: String, key: String },

    #[error("template error: {0}")]
    Template(String),

    #[error("invalid annotation {key}: {reason}")]
    Annotation { key: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("gave up after {attempts} attempts: {last_error}")]
    RetryBudgetExhausted { attempts: u32, last_error: String },

    #[error("decode error: {0}")]
    Decode(String),
}
