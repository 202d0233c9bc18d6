//! Wire types for the control API.

use courier_core::{ConnectionStatus, SessionSnapshot};
use serde::{Deserialize, Serialize};

/// `GET /qr` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QrResponse {
    pub status: ConnectionStatus,
    /// Pairing artifact; `null` unless scanning.
    pub qr: Option<String>,
}

impl From<SessionSnapshot> for QrResponse {
    fn from(snapshot: SessionSnapshot) -> Self {
        let qr = snapshot
            .pairing_artifact
            .filter(|_| snapshot.status == ConnectionStatus::Scanning);
        Self {
            status: snapshot.status,
            qr,
        }
    }
}

/// `GET /logs` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogsResponse {
    /// `"<RFC3339 timestamp> - <message>"`, newest first.
    pub logs: Vec<String>,
}

/// `POST /send` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendRequest {
    pub to: String,
    pub text: String,
}

/// `POST /send` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SendResponse {
    Success { success: bool },
    Error { error: String },
}

impl SendResponse {
    /// Error body with `message`.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
        }
    }
}

/// `GET /reset` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetResponse {
    pub success: bool,
    pub message: String,
}

/// `GET /health` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub whatsapp: ConnectionStatus,
}

impl HealthResponse {
    /// Liveness answer carrying the connection status.
    #[must_use]
    pub fn ok(whatsapp: ConnectionStatus) -> Self {
        Self {
            status: "ok".to_string(),
            whatsapp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qr_null_unless_scanning() {
        let json = serde_json::to_value(QrResponse::from(SessionSnapshot::default())).unwrap();
        assert_eq!(json, serde_json::json!({"status": "disconnected", "qr": null}));

        let scanning = SessionSnapshot {
            status: ConnectionStatus::Scanning,
            pairing_artifact: Some("data:image/png;base64,AAAA".to_string()),
        };
        let json = serde_json::to_value(QrResponse::from(scanning)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"status": "scanning", "qr": "data:image/png;base64,AAAA"})
        );
    }

    #[test]
    fn test_send_response_shapes() {
        assert_eq!(
            serde_json::to_string(&SendResponse::Success { success: true }).unwrap(),
            r#"{"success":true}"#
        );
        assert_eq!(
            serde_json::to_string(&SendResponse::error("Bot not initialized")).unwrap(),
            r#"{"error":"Bot not initialized"}"#
        );
    }

    #[test]
    fn test_health_shape() {
        let json = serde_json::to_value(HealthResponse::ok(ConnectionStatus::LoggedOut)).unwrap();
        assert_eq!(json, serde_json::json!({"status": "ok", "whatsapp": "logged_out"}));
    }
}
