//! Where watchdog notices go.

use std::collections::VecDeque;
use std::sync::Mutex;

use farmwatch_core::{Notice, NoticeLevel};

/// Receives operator-facing notices. Injected at construction.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notice: Notice);
}

/// Logs every notice and keeps the most recent ones for status reporting.
#[derive(Debug)]
pub struct RecentNotices {
    capacity: usize,
    notices: Mutex<VecDeque<Notice>>,
}

impl RecentNotices {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            notices: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
        }
    }

    /// Oldest first.
    pub fn snapshot(&self) -> Vec<Notice> {
        self.notices
            .lock()
            .map(|n| n.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl NotificationSink for RecentNotices {
    fn notify(&self, notice: Notice) {
        match notice.level {
            NoticeLevel::Info | NoticeLevel::Success => {
                tracing::info!(level = ?notice.level, "{}", notice.message)
            }
            NoticeLevel::Warning => tracing::warn!("{}", notice.message),
            NoticeLevel::Error => tracing::error!("{}", notice.message),
        }

        if let Ok(mut notices) = self.notices.lock() {
            if notices.len() == self.capacity {
                notices.pop_front();
            }
            notices.push_back(notice);
        }
    }
}
