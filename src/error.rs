// MIT License - Copyright (c) 2026 Peter Wright
// Error types

/// All errors that can occur while talking to a Savant audio switch.
///
/// Lines the parser does not recognise are not errors; they are logged and
/// dropped.
#[derive(Debug, thiserror::Error)]
pub enum SavantError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection timeout: {addr}")]
    ConnectTimeout { addr: String },

    #[error("Connection to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("No matching response in time for command: {command}")]
    ResponseTimeout { command: String },

    #[error("Appliance closed the connection")]
    Disconnected,

    #[error("Session already closed")]
    SessionClosed,

    #[error("Invalid configuration: {details}")]
    InvalidConfig { details: String },
}

impl SavantError {
    /// Whether the appliance could not be reached at all (nothing was sent).
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            SavantError::ConnectTimeout { .. } | SavantError::Connect { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, SavantError>;
