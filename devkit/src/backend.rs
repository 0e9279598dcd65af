/*!
Scripted `ScanBackend` recording every call.

Notification lists are served in the order they were queued; the last one
keeps being served once the queue is empty. Scan pulls follow a script of
statuses where `None` stands for a failed request.
*/

use async_trait::async_trait;
use devsecwatch_live::{LiveError, Notification, Result, Scan, ScanBackend, ScanStatus};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    ListNotifications,
    UnreadCount,
    MarkRead(i64),
    MarkAllRead,
    GetScan(i64),
}

#[derive(Default)]
pub struct MockBackend {
    lists: Mutex<VecDeque<Vec<Notification>>>,
    current: Mutex<Vec<Notification>>,
    unread: Mutex<Option<u64>>,
    failing_lists: Mutex<usize>,
    list_delay: Mutex<Duration>,
    failing_writes: Mutex<usize>,
    scans: Mutex<VecDeque<Option<ScanStatus>>>,
    scan_pulls: Mutex<Vec<Instant>>,
    calls: Mutex<Vec<BackendCall>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_notifications(self, list: Vec<Notification>) -> Self {
        self.queue_notifications(list);
        self
    }

    pub fn queue_notifications(&self, list: Vec<Notification>) {
        self.lists.lock().push_back(list);
    }

    /// Fixed unread-count answer; by default it is derived from the last list.
    pub fn set_unread_count(&self, n: u64) {
        *self.unread.lock() = Some(n);
    }

    pub fn fail_lists(&self, n: usize) {
        *self.failing_lists.lock() = n;
    }

    /// Every later list call takes `delay` before answering.
    pub fn delay_lists(&self, delay: Duration) {
        *self.list_delay.lock() = delay;
    }

    pub fn fail_writes(&self, n: usize) {
        *self.failing_writes.lock() = n;
    }

    pub fn script_scan(&self, statuses: impl IntoIterator<Item = Option<ScanStatus>>) {
        self.scans.lock().extend(statuses);
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.calls.lock().clone()
    }

    pub fn count(&self, pred: impl Fn(&BackendCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| pred(c)).count()
    }

    pub fn list_calls(&self) -> usize {
        self.count(|c| *c == BackendCall::ListNotifications)
    }

    /// Times at which scan pulls arrived.
    pub fn scan_pulls(&self) -> Vec<Instant> {
        self.scan_pulls.lock().clone()
    }

    fn record(&self, call: BackendCall) {
        log::debug!("[backend] {call:?}");
        self.calls.lock().push(call);
    }

    fn take_failure(counter: &Mutex<usize>) -> bool {
        let mut left = counter.lock();
        if *left > 0 {
            *left -= 1;
            true
        } else {
            false
        }
    }

    fn write(&self, endpoint: &str) -> Result<()> {
        if Self::take_failure(&self.failing_writes) {
            return Err(LiveError::Status { status: 500, endpoint: endpoint.into() });
        }
        Ok(())
    }
}

#[async_trait]
impl ScanBackend for MockBackend {
    async fn list_notifications(&self, _token: &str) -> Result<Vec<Notification>> {
        self.record(BackendCall::ListNotifications);
        let delay = *self.list_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if Self::take_failure(&self.failing_lists) {
            return Err(LiveError::Status { status: 503, endpoint: "/api/notifications".into() });
        }
        let mut current = self.current.lock();
        if let Some(next) = self.lists.lock().pop_front() {
            *current = next;
        }
        Ok(current.clone())
    }

    async fn unread_count(&self, _token: &str) -> Result<u64> {
        self.record(BackendCall::UnreadCount);
        let fixed = *self.unread.lock();
        Ok(fixed.unwrap_or_else(|| self.current.lock().iter().filter(|n| !n.read).count() as u64))
    }

    async fn mark_read(&self, _token: &str, id: i64) -> Result<()> {
        self.record(BackendCall::MarkRead(id));
        self.write(&format!("/api/notifications/{id}/read"))
    }

    async fn mark_all_read(&self, _token: &str) -> Result<()> {
        self.record(BackendCall::MarkAllRead);
        self.write("/api/notifications/read-all")
    }

    async fn get_scan(&self, _token: &str, scan_id: i64) -> Result<Scan> {
        self.record(BackendCall::GetScan(scan_id));
        self.scan_pulls.lock().push(Instant::now());
        match self.scans.lock().pop_front() {
            Some(Some(status)) => Ok(crate::builders::scan(scan_id, status)),
            Some(None) => Err(LiveError::Transport("connection reset by peer".into())),
            None => Ok(crate::builders::scan(scan_id, ScanStatus::Processing)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders::notification;

    #[tokio::test]
    async fn serves_queued_lists_then_repeats_last() {
        let backend = MockBackend::new().with_notifications(vec![notification(1, false)]);
        backend.queue_notifications(vec![notification(2, true)]);

        assert_eq!(backend.list_notifications("t").await.unwrap()[0].id, 1);
        assert_eq!(backend.list_notifications("t").await.unwrap()[0].id, 2);
        assert_eq!(backend.list_notifications("t").await.unwrap()[0].id, 2);
        assert_eq!(backend.list_calls(), 3);
        assert_eq!(backend.unread_count("t").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn scripted_failures() {
        let backend = MockBackend::new();
        backend.fail_lists(1);
        backend.fail_writes(1);
        backend.script_scan([None, Some(ScanStatus::Completed)]);

        assert!(backend.list_notifications("t").await.is_err());
        assert!(backend.list_notifications("t").await.is_ok());
        assert!(backend.mark_all_read("t").await.is_err());
        assert!(backend.mark_all_read("t").await.is_ok());
        assert!(backend.get_scan("t", 5).await.is_err());
        assert_eq!(backend.get_scan("t", 5).await.unwrap().status, ScanStatus::Completed);
        assert_eq!(backend.calls().last(), Some(&BackendCall::GetScan(5)));
    }
}
