use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Field `{name}` has invalid width {bytes}, must be 1 to 4 bytes")]
    InvalidFieldWidth { name: String, bytes: u8 },

    #[error("Route fields span {bits} bits, at most 32 fit in a route")]
    RouteTooWide { bits: u32 },

    #[error("Duplicate field name: {0}")]
    DuplicateField(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Custom(String),
}

impl Error {
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
