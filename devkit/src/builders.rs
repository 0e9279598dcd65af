/*!
Payload builders: scan-status events as the backend pushes them, plus
notification and scan records and signed-looking access tokens.
*/

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use devsecwatch_live::{Notification, NotificationKind, Scan, ScanStatus};
use serde_json::{json, Value};

/// Builds the JSON body of a scan-status MESSAGE.
#[derive(Debug, Clone)]
pub struct ScanEventBuilder {
    scan_id: i64,
    repo_url: String,
    status: String,
    total: u32,
    critical: u32,
    high: u32,
    message: Option<String>,
}

impl ScanEventBuilder {
    pub fn new(scan_id: i64) -> Self {
        Self {
            scan_id,
            repo_url: "https://github.com/acme/payments-api".into(),
            status: "QUEUED".into(),
            total: 0,
            critical: 0,
            high: 0,
            message: None,
        }
    }

    pub fn repo(mut self, url: &str) -> Self {
        self.repo_url = url.to_string();
        self
    }

    /// Raw status string, so unknown values can be sent too.
    pub fn status(mut self, status: &str) -> Self {
        self.status = status.to_string();
        self
    }

    pub fn completed(self, total: u32) -> Self {
        let mut b = self.status("COMPLETED");
        b.total = total;
        b.high = total;
        b
    }

    pub fn failed(self) -> Self {
        self.status("FAILED")
    }

    pub fn critical(mut self, n: u32) -> Self {
        self.critical = n;
        self
    }

    pub fn message(mut self, text: &str) -> Self {
        self.message = Some(text.to_string());
        self
    }

    pub fn build(&self) -> Value {
        let message = self.message.clone().unwrap_or_else(|| match self.status.as_str() {
            "COMPLETED" => format!("Scan completed: {} vulnerabilities found", self.total),
            "FAILED" => "Scan failed".to_string(),
            other => format!("Scan {}", other.to_lowercase()),
        });
        json!({
            "scanId": self.scan_id,
            "repoUrl": self.repo_url,
            "status": self.status,
            "totalVulnerabilities": self.total,
            "criticalCount": self.critical,
            "highCount": self.high,
            "message": message,
            "timestamp": "2026-03-02T09:30:00.123456",
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.build().to_string().into_bytes()
    }
}

fn base_time() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 3, 2)
        .and_then(|d| d.and_hms_opt(9, 0, 0))
        .unwrap_or_default()
}

/// Notification record; higher ids are newer.
pub fn notification(id: i64, read: bool) -> Notification {
    Notification {
        id,
        title: format!("Scan #{id} finished"),
        message: format!("payments-api scan {id} complete"),
        kind: NotificationKind::Success,
        read,
        scan_id: Some(id),
        created_at: base_time() + Duration::minutes(id),
        user_id: Some("alice".into()),
    }
}

pub fn scan(id: i64, status: ScanStatus) -> Scan {
    let done = status == ScanStatus::Completed;
    Scan {
        id,
        status,
        repo_url: Some("https://github.com/acme/payments-api".into()),
        branch: Some("main".into()),
        total_vulnerabilities: if done { 6 } else { 0 },
        critical_count: if done { 1 } else { 0 },
        high_count: if done { 2 } else { 0 },
        medium_count: if done { 3 } else { 0 },
        low_count: 0,
        error_message: (status == ScanStatus::Failed).then(|| "clone failed".to_string()),
        completed_at: status.is_terminal().then(base_time),
    }
}

/// Unsigned JWT carrying `sub`, enough for local identity decoding.
pub fn access_token(sub: &str) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(json!({ "sub": sub, "exp": 4_102_444_800u64 }).to_string());
    format!("{header}.{payload}.test-signature")
}

#[cfg(test)]
mod tests {
    use super::*;
    use devsecwatch_live::credentials::identity_from_token;
    use devsecwatch_live::ScanStatusEvent;

    #[test]
    fn events_decode_as_the_client_expects() {
        let bytes = ScanEventBuilder::new(9).completed(4).critical(1).to_bytes();
        let event: ScanStatusEvent = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(event.scan_id, 9);
        assert_eq!(event.status, ScanStatus::Completed);
        assert_eq!(event.total_vulnerabilities, 4);
        assert_eq!(event.critical_count, 1);
        assert_eq!(event.repo_name(), "payments-api");
    }

    #[test]
    fn token_round_trips_through_identity() {
        assert_eq!(identity_from_token(&access_token("Alice")).unwrap().as_str(), "Alice");
    }
}
