use bridge_api::{BridgeError, Severity};

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("config ({context}): {detail}")]
    Config { context: &'static str, detail: String },

    #[error("{0}")]
    Bridge(#[from] BridgeError),

    #[error("inbound mqtt connection lost")]
    TransportLost,

    #[error("signal: {0}")]
    Signal(#[from] std::io::Error),
}

impl ServerError {
    pub fn config(context: &'static str, detail: impl std::fmt::Display) -> Self {
        ServerError::Config { context, detail: detail.to_string() }
    }

    pub fn severity(&self) -> Severity {
        match self {
            ServerError::Config { .. } | ServerError::Signal(_) => Severity::Startup,
            ServerError::Bridge(e) => e.severity(),
            ServerError::TransportLost => Severity::Fatal,
        }
    }
}
