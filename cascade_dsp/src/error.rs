pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("operation not supported")]
    NotSupported,

    #[error("no format has been negotiated")]
    NoFormat,

    #[error("unexpected format: {0}")]
    UnexpectedFormat(String),

    #[error("out of memory")]
    NoMemory,

    #[error("invalid configuration: {0}")]
    Config(String),
}
