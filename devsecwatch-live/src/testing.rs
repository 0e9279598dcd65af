//! In-crate fakes for unit tests. Integration tests use `devkit` instead.

use crate::api::ScanBackend;
use crate::error::{LiveError, Result};
use crate::models::{Notification, NotificationKind, Scan, ScanStatus};
use crate::transport::{FrameLink, PushConnector};
use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::time::Instant;
use url::Url;

pub fn notification(id: i64, read: bool) -> Notification {
    Notification {
        id,
        title: format!("notification {id}"),
        message: String::new(),
        kind: NotificationKind::Info,
        read,
        scan_id: Some(id * 10),
        created_at: NaiveDate::from_ymd_opt(2026, 1, 12)
            .and_then(|d| d.and_hms_opt(10, 0, 0))
            .expect("valid date"),
        user_id: None,
    }
}

pub fn scan(id: i64, status: ScanStatus) -> Scan {
    Scan {
        id,
        status,
        repo_url: Some("https://github.com/acme/api".into()),
        branch: Some("main".into()),
        total_vulnerabilities: 0,
        critical_count: 0,
        high_count: 0,
        medium_count: 0,
        low_count: 0,
        error_message: None,
        completed_at: None,
    }
}

#[derive(Default)]
pub struct FakeBackend {
    lists: Mutex<VecDeque<Vec<Notification>>>,
    last_list: Mutex<Vec<Notification>>,
    fail_list: Mutex<bool>,
    fail_write: Mutex<bool>,
    unread: Mutex<u64>,
    scans: Mutex<VecDeque<Option<ScanStatus>>>,
    scan_times: Mutex<Vec<Instant>>,
    calls: Mutex<Vec<String>>,
}

impl FakeBackend {
    pub fn push_list(&self, list: Vec<Notification>) {
        self.lists.lock().push_back(list);
    }

    pub fn fail_next_list(&self) {
        *self.fail_list.lock() = true;
    }

    pub fn fail_next_write(&self) {
        *self.fail_write.lock() = true;
    }

    pub fn set_unread(&self, n: u64) {
        *self.unread.lock() = n;
    }

    /// `None` scripts a failed pull.
    pub fn script_scans(&self, statuses: impl IntoIterator<Item = Option<ScanStatus>>) {
        self.scans.lock().extend(statuses);
    }

    pub fn scan_times(&self) -> Vec<Instant> {
        self.scan_times.lock().clone()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.starts_with(prefix)).count()
    }

    fn take_write_failure(&self) -> Result<()> {
        if std::mem::take(&mut *self.fail_write.lock()) {
            return Err(LiveError::Status { status: 503, endpoint: "write".into() });
        }
        Ok(())
    }
}

#[async_trait]
impl ScanBackend for FakeBackend {
    async fn list_notifications(&self, _token: &str) -> Result<Vec<Notification>> {
        self.calls.lock().push("list".into());
        if std::mem::take(&mut *self.fail_list.lock()) {
            return Err(LiveError::Status { status: 500, endpoint: "/api/notifications".into() });
        }
        let mut last = self.last_list.lock();
        if let Some(next) = self.lists.lock().pop_front() {
            *last = next;
        }
        Ok(last.clone())
    }

    async fn unread_count(&self, _token: &str) -> Result<u64> {
        self.calls.lock().push("unread_count".into());
        Ok(*self.unread.lock())
    }

    async fn mark_read(&self, _token: &str, id: i64) -> Result<()> {
        self.calls.lock().push(format!("mark_read:{id}"));
        self.take_write_failure()
    }

    async fn mark_all_read(&self, _token: &str) -> Result<()> {
        self.calls.lock().push("mark_all_read".into());
        self.take_write_failure()
    }

    async fn get_scan(&self, _token: &str, scan_id: i64) -> Result<Scan> {
        self.calls.lock().push(format!("get_scan:{scan_id}"));
        self.scan_times.lock().push(Instant::now());
        match self.scans.lock().pop_front() {
            Some(Some(status)) => Ok(scan(scan_id, status)),
            Some(None) => Err(LiveError::Transport("connection reset".into())),
            None => Ok(scan(scan_id, ScanStatus::Processing)),
        }
    }
}

/// Refuses every socket and records when it was asked.
#[derive(Default)]
pub struct RefusingConnector {
    attempts: Mutex<Vec<Instant>>,
}

impl RefusingConnector {
    pub fn attempts(&self) -> Vec<Instant> {
        self.attempts.lock().clone()
    }
}

#[async_trait]
impl PushConnector for RefusingConnector {
    async fn open(&self, _endpoint: &Url) -> Result<Box<dyn FrameLink>> {
        self.attempts.lock().push(Instant::now());
        Err(LiveError::Transport("connection refused".into()))
    }
}
