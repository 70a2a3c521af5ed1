use thiserror::Error as ThisError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, ThisError)]
pub enum Error {
    /// Failure reported by the underlying store client, covering both
    /// connect and command errors.
    #[error("client error: {0}")]
    Client(#[from] redis::RedisError),

    /// A value could not be encoded or decoded by the configured codec.
    #[error("codec error: {0}")]
    Codec(String),

    /// The configuration source is missing or holds an unusable entry.
    #[error("configuration error: {0}")]
    Config(String),

    /// A positional list operation addressed an index outside the list.
    #[error("index out of range")]
    IndexOutOfRange,

    /// The key holds a value of a different kind than the operation expects.
    #[error("key `{key}` holds a value of the wrong kind for this operation")]
    WrongKind { key: String },
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Codec(err.to_string())
    }
}
