use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Opaque per-user handle addressing the private push channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity(String);

impl Identity {
    /// Returns `None` for an empty (or blank) handle: no connection may be
    /// attempted without one.
    pub fn new(handle: impl Into<String>) -> Option<Self> {
        let handle = handle.into();
        if handle.trim().is_empty() {
            None
        } else {
            Some(Self(handle))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// STOMP destination of the user queue, always lower-cased.
    pub fn channel(&self) -> String {
        format!("/queue/notifications/{}", self.0.to_lowercase())
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScanStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    #[serde(other)]
    Unknown,
}

impl ScanStatus {
    /// No transition happens after `Completed` or `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, ScanStatus::Completed | ScanStatus::Failed)
    }
}

/// Push payload sent on the user queue whenever a scan changes state.
///
/// It does not carry the persisted notification id, so it is only used to
/// trigger a toast and a full cache refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanStatusEvent {
    pub scan_id: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub repo_url: String,
    pub status: ScanStatus,
    #[serde(default, deserialize_with = "null_as_default")]
    pub total_vulnerabilities: u32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub critical_count: u32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub high_count: u32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub message: String,
    #[serde(default)]
    pub timestamp: Option<NaiveDateTime>,
    #[serde(default)]
    pub user_id: Option<String>,
}

impl ScanStatusEvent {
    /// Last path segment of the repository URL, as shown in toasts.
    pub fn repo_name(&self) -> &str {
        self.repo_url
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or(self.repo_url.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    Success,
    Warning,
    Error,
    Info,
}

/// Notification persisted by the backend and cached client side, keyed by `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub message: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    #[serde(alias = "isRead", default)]
    pub read: bool,
    #[serde(default)]
    pub scan_id: Option<i64>,
    pub created_at: NaiveDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

/// Scan record as returned by `GET /api/scans/{id}`; the poller only needs
/// the status, the rest is handed to the caller on completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scan {
    pub id: i64,
    pub status: ScanStatus,
    #[serde(default)]
    pub repo_url: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub total_vulnerabilities: u32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub critical_count: u32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub high_count: u32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub medium_count: u32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub low_count: u32,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub completed_at: Option<NaiveDateTime>,
}

/// Jackson writes `null` for unset boxed fields; treat it like a missing one.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_rejects_blank_handles() {
        assert!(Identity::new("").is_none());
        assert!(Identity::new("   ").is_none());
        assert_eq!(Identity::new("Alice").unwrap().as_str(), "Alice");
    }

    #[test]
    fn channel_is_lower_cased() {
        let identity = Identity::new("Alice.Smith").unwrap();
        assert_eq!(identity.channel(), "/queue/notifications/alice.smith");
    }

    #[test]
    fn event_decodes_backend_payload() {
        let body = r#"{
            "scanId": 42,
            "repoUrl": "https://github.com/acme/widgets",
            "status": "COMPLETED",
            "totalVulnerabilities": 3,
            "criticalCount": 1,
            "highCount": 2,
            "message": "Scan finished",
            "timestamp": "2026-01-12T10:15:30.123",
            "userId": "alice"
        }"#;
        let event: ScanStatusEvent = serde_json::from_str(body).unwrap();
        assert_eq!(event.scan_id, 42);
        assert_eq!(event.status, ScanStatus::Completed);
        assert_eq!(event.total_vulnerabilities, 3);
        assert_eq!(event.repo_name(), "widgets");
        assert!(event.timestamp.is_some());
    }

    #[test]
    fn unknown_status_is_not_a_decode_error() {
        let event: ScanStatusEvent =
            serde_json::from_str(r#"{"scanId":1,"status":"CLONING","message":"hi"}"#).unwrap();
        assert_eq!(event.status, ScanStatus::Unknown);
        assert!(!event.status.is_terminal());
    }

    #[test]
    fn notification_accepts_is_read_alias() {
        let body = r#"{"id":7,"title":"Scan Failed","message":"boom","type":"ERROR",
                       "isRead":true,"scanId":null,"createdAt":"2026-01-12T10:15:30"}"#;
        let n: Notification = serde_json::from_str(body).unwrap();
        assert!(n.read);
        assert_eq!(n.kind, NotificationKind::Error);
        assert_eq!(n.scan_id, None);
    }

    #[test]
    fn repo_name_handles_trailing_slash() {
        let event: ScanStatusEvent = serde_json::from_str(
            r#"{"scanId":1,"repoUrl":"https://github.com/acme/api/","status":"FAILED"}"#,
        )
        .unwrap();
        assert_eq!(event.repo_name(), "api");
    }

    #[test]
    fn null_counts_decode_as_zero() {
        let event: ScanStatusEvent = serde_json::from_str(
            r#"{"scanId":5,"repoUrl":null,"status":"QUEUED","totalVulnerabilities":null,"message":null}"#,
        )
        .unwrap();
        assert_eq!(event.total_vulnerabilities, 0);
        assert_eq!(event.message, "");
    }

    #[test]
    fn terminal_statuses() {
        assert!(ScanStatus::Completed.is_terminal());
        assert!(ScanStatus::Failed.is_terminal());
        assert!(!ScanStatus::Queued.is_terminal());
        assert!(!ScanStatus::Processing.is_terminal());
    }
}
