//! Transient user notices.
//!
//! At most one notice is visible. A new notice replaces the current one and
//! each notice dismisses itself after [`NOTICE_DURATION`] unless replaced or
//! dismissed first.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

pub const NOTICE_DURATION: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoticeKind {
    Error,
    Success,
    Info,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notice {
    pub id: u64,
    pub kind: NoticeKind,
    pub message: String,
}

#[derive(Clone)]
pub struct NotificationRelay {
    tx: Arc<watch::Sender<Option<Notice>>>,
    next_id: Arc<AtomicU64>,
    duration: Duration,
}

impl Default for NotificationRelay {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationRelay {
    pub fn new() -> Self {
        Self::with_duration(NOTICE_DURATION)
    }

    pub fn with_duration(duration: Duration) -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            tx: Arc::new(tx),
            next_id: Arc::new(AtomicU64::new(1)),
            duration,
        }
    }

    /// Show a notice, replacing any visible one. Never blocks.
    pub fn notify(&self, kind: NoticeKind, message: impl Into<String>) -> u64 {
        let notice = Notice {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            kind,
            message: message.into(),
        };
        let id = notice.id;
        debug!(id, ?kind, message = %notice.message, "Notice");
        self.tx.send_replace(Some(notice));

        // Without a runtime the notice just stays until replaced or dismissed
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let tx = Arc::clone(&self.tx);
            let duration = self.duration;
            handle.spawn(async move {
                tokio::time::sleep(duration).await;
                dismiss_if_current(&tx, id);
            });
        }
        id
    }

    pub fn error(&self, message: impl Into<String>) -> u64 {
        self.notify(NoticeKind::Error, message)
    }

    pub fn success(&self, message: impl Into<String>) -> u64 {
        self.notify(NoticeKind::Success, message)
    }

    pub fn info(&self, message: impl Into<String>) -> u64 {
        self.notify(NoticeKind::Info, message)
    }

    /// Dismiss notice `id` early; a newer notice is left alone
    pub fn dismiss(&self, id: u64) {
        dismiss_if_current(&self.tx, id);
    }

    pub fn current(&self) -> Option<Notice> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Notice>> {
        self.tx.subscribe()
    }
}

fn dismiss_if_current(tx: &watch::Sender<Option<Notice>>, id: u64) {
    tx.send_if_modified(|current| match current {
        Some(notice) if notice.id == id => {
            *current = None;
            true
        }
        _ => false,
    });
}
