//! Error types for paperless-courier.

/// Errors crossing the relay's cycle boundary. Configuration errors never
/// reach it; they are fatal at startup and stay [`ConfigError`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Configuration-related errors. All of these are fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Invalid rule \"{name}\": {reason}")]
    InvalidRule { name: String, reason: String },
}

/// Document-backend communication errors.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("Request to {endpoint} failed: {source}")]
    Request {
        endpoint: String,
        source: reqwest::Error,
    },

    #[error("Backend returned status {status} for {endpoint}")]
    Status { endpoint: String, status: u16 },

    #[error("Failed to decode response from {endpoint}: {source}")]
    Decode {
        endpoint: String,
        source: reqwest::Error,
    },

    #[error("Tag \"{name}\" does not exist on the backend")]
    UnknownTag { name: String },
}

/// SMTP delivery errors, classified by session phase.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },

    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// The server's first bytes are inconsistent with the configured
    /// connection type (plaintext greeting on a `tls` dial, or EOF where a
    /// `starttls` port actually expects implicit TLS).
    #[error("{detail} - try changing smtp.connection_type")]
    ConnectionTypeMismatch { detail: String },

    #[error("Authentication rejected: {reply}")]
    AuthRejected { reply: String },

    #[error("Unexpected reply to {command}: {reply}")]
    UnexpectedReply { command: String, reply: String },

    #[error("Recipient {address} rejected: {reply}")]
    RecipientRejected { address: String, reply: String },

    #[error("Connection closed by server")]
    ConnectionClosed,

    #[error("IO error during session: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for the relay's cycle-level operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;
