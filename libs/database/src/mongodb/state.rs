use serde::Serialize;

/// Lifecycle state of the connection manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
}

/// A single state transition, as published to subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StateChange {
    pub from: ConnectionState,
    pub to: ConnectionState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_renders_lowercase() {
        assert_eq!(ConnectionState::Reconnecting.to_string(), "reconnecting");
        assert_eq!(
            serde_json::to_value(ConnectionState::Connected).unwrap(),
            "connected"
        );
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
    }
}
