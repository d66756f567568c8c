use derive_more::{Display, Error};

#[derive(Debug, Display, Error)]
pub enum ConfigError {
    #[display("failed to read config file")]
    ReadFile,
    #[display("failed to parse config: {reason}")]
    Parse { reason: String },
    #[display("invalid config: {field}")]
    Validation { field: String },
}

#[derive(Debug, Display, Error)]
pub enum FetchError {
    #[display("price request to {endpoint} failed")]
    Request { endpoint: String },
    #[display("failed to parse price response from {endpoint}")]
    ResponseParse { endpoint: String },
    #[display("price response contains an invalid quote")]
    InvalidQuote,
}

#[derive(Debug, Display, Error)]
pub enum StorageError {
    #[display("database migration failed")]
    Migration,
    #[display("failed to insert data")]
    Insert,
    #[display("failed to query data")]
    Query,
    #[display("failed to decode stored thresholds")]
    Decode,
}

/// Errors surfaced to a subscriber as a chat reply.
#[derive(Debug, Display, Error, Clone, PartialEq)]
pub enum AlertError {
    #[display("invalid parameters")]
    InvalidParameters,
    #[display("price must be a finite number")]
    InvalidPrice,
    #[display("index {index} out of range")]
    IndexOutOfRange { index: i64 },
    #[display("failed to save alerts, please retry")]
    Persistence,
}

#[derive(Debug, Display, Error)]
pub enum TransportError {
    #[display("request to {method} failed")]
    Request { method: String },
    #[display("failed to parse {method} response")]
    ResponseParse { method: String },
    #[display("{method} rejected: {description}")]
    Api { method: String, description: String },
}
