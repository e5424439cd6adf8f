use crate::schema::SchemaId;

/// How far an error reaches. Lets the dispatcher and the supervisor
/// decide between dropping one message and stopping the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Process cannot start operating.
    Startup,
    /// Process must terminate with a non-zero status.
    Fatal,
    /// Only the offending message is dropped.
    Message,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Startup => f.write_str("startup"),
            Severity::Fatal => f.write_str("fatal"),
            Severity::Message => f.write_str("message"),
        }
    }
}

/// Unified error type shared by the bridge components.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("connect ({endpoint}): {detail}")]
    Connect { endpoint: String, detail: String },

    #[error("transport lost: {0}")]
    TransportLoss(String),

    #[error("schema {0} not found")]
    NotFound(SchemaId),

    #[error("schema registry: {0}")]
    Transport(String),

    #[error("partition key '{field}': {detail}")]
    KeyMissing { field: String, detail: String },

    #[error("encode: {0}")]
    Encode(String),

    #[error("send ({topic}): {detail}")]
    Send { topic: String, detail: String },
}

impl BridgeError {
    pub fn connect(endpoint: impl Into<String>, detail: impl std::fmt::Display) -> Self {
        BridgeError::Connect { endpoint: endpoint.into(), detail: detail.to_string() }
    }

    pub fn encode(detail: impl std::fmt::Display) -> Self {
        BridgeError::Encode(detail.to_string())
    }

    pub fn send(topic: impl Into<String>, detail: impl std::fmt::Display) -> Self {
        BridgeError::Send { topic: topic.into(), detail: detail.to_string() }
    }

    pub fn key_missing(field: impl Into<String>, detail: impl std::fmt::Display) -> Self {
        BridgeError::KeyMissing { field: field.into(), detail: detail.to_string() }
    }

    pub fn severity(&self) -> Severity {
        match self {
            BridgeError::Connect { .. } => Severity::Startup,
            BridgeError::TransportLoss(_) => Severity::Fatal,
            BridgeError::NotFound(_)
            | BridgeError::Transport(_)
            | BridgeError::KeyMissing { .. }
            | BridgeError::Encode(_)
            | BridgeError::Send { .. } => Severity::Message,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() != Severity::Message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_message_errors_are_not_fatal() {
        let errors = [
            BridgeError::NotFound(SchemaId::new(7)),
            BridgeError::Transport("timeout".into()),
            BridgeError::key_missing("@iot.id", "absent"),
            BridgeError::encode("bad json"),
            BridgeError::send("Observations", "queue full"),
        ];
        for e in errors {
            assert_eq!(e.severity(), Severity::Message, "{e}");
            assert!(!e.is_fatal());
        }
    }

    #[test]
    fn connect_and_loss_are_fatal() {
        assert_eq!(BridgeError::connect("tcp://x:1883", "refused").severity(), Severity::Startup);
        assert_eq!(BridgeError::TransportLoss("reset".into()).severity(), Severity::Fatal);
        assert!(BridgeError::TransportLoss("reset".into()).is_fatal());
    }

    #[test]
    fn display_includes_context() {
        let e = BridgeError::NotFound(SchemaId::new(7));
        assert_eq!(e.to_string(), "schema 7 not found");
        let e = BridgeError::send("Things", "closed");
        assert_eq!(e.to_string(), "send (Things): closed");
    }
}
