use devsecwatch_live::{PresentationSink, Toast, ToastKind};
use parking_lot::Mutex;

/// Keeps every toast for assertions.
#[derive(Debug, Default)]
pub struct RecordingSink {
    toasts: Mutex<Vec<Toast>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn toasts(&self) -> Vec<Toast> {
        self.toasts.lock().clone()
    }

    pub fn kinds(&self) -> Vec<ToastKind> {
        self.toasts.lock().iter().map(|t| t.kind).collect()
    }

    pub fn messages(&self) -> Vec<String> {
        self.toasts.lock().iter().map(|t| t.message.clone()).collect()
    }

    pub fn count(&self, kind: ToastKind) -> usize {
        self.toasts.lock().iter().filter(|t| t.kind == kind).count()
    }

    pub fn last(&self) -> Option<Toast> {
        self.toasts.lock().last().cloned()
    }

    pub fn clear(&self) {
        self.toasts.lock().clear();
    }
}

impl PresentationSink for RecordingSink {
    fn toast(&self, toast: Toast) {
        log::debug!("[sink] {:?} {}", toast.kind, toast.message);
        self.toasts.lock().push(toast);
    }
}
