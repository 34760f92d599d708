//! User-facing notification queue
//!
//! Stores only; rendering happens elsewhere. Each notification is removed by
//! its own timer task unless dismissed earlier.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::lock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Info,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub id: Uuid,
    pub level: Level,
    pub msg: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Default)]
struct Inner {
    /// Oldest first; `list()` reverses
    items: Vec<Notification>,
    timers: HashMap<Uuid, JoinHandle<()>>,
}

#[derive(Clone)]
pub struct Notifier {
    inner: Arc<Mutex<Inner>>,
    ok_timeout: Duration,
    err_timeout: Duration,
}

impl Notifier {
    pub fn new(ok_timeout: Duration, err_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            ok_timeout,
            err_timeout,
        }
    }

    pub fn ok(&self, msg: impl Into<String>) -> Uuid {
        self.push(Level::Info, msg.into(), self.ok_timeout)
    }

    pub fn err(&self, msg: impl Into<String>) -> Uuid {
        let msg = msg.into();
        log::error!("{}", msg);
        self.push(Level::Error, msg, self.err_timeout)
    }

    /// Newest first
    pub fn list(&self) -> Vec<Notification> {
        lock(&self.inner).items.iter().rev().cloned().collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dismiss(&self, id: Uuid) -> bool {
        let mut inner = lock(&self.inner);
        if let Some(timer) = inner.timers.remove(&id) {
            timer.abort();
        }
        let before = inner.items.len();
        inner.items.retain(|n| n.id != id);
        inner.items.len() != before
    }

    /// Abort every pending timer and drop all notifications
    pub fn shutdown(&self) {
        let mut inner = lock(&self.inner);
        for (_, timer) in inner.timers.drain() {
            timer.abort();
        }
        inner.items.clear();
    }

    fn push(&self, level: Level, msg: String, timeout: Duration) -> Uuid {
        let notification = Notification {
            id: Uuid::new_v4(),
            level,
            msg,
            created_at: Utc::now(),
        };
        let id = notification.id;

        let timer = tokio::runtime::Handle::try_current()
            .ok()
            .map(|rt| rt.spawn(expire(Arc::downgrade(&self.inner), id, timeout)));

        let mut inner = lock(&self.inner);
        inner.items.push(notification);
        match timer {
            Some(timer) => {
                inner.timers.insert(id, timer);
            }
            None => log::debug!("No runtime, notification {} will not auto-dismiss", id),
        }
        id
    }
}

async fn expire(inner: Weak<Mutex<Inner>>, id: Uuid, timeout: Duration) {
    tokio::time::sleep(timeout).await;
    if let Some(inner) = inner.upgrade() {
        let mut inner = lock(&inner);
        inner.timers.remove(&id);
        inner.items.retain(|n| n.id != id);
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        for (_, timer) in self.timers.drain() {
            timer.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notifier() -> Notifier {
        Notifier::new(Duration::from_millis(3000), Duration::from_millis(10000))
    }

    #[tokio::test(start_paused = true)]
    async fn test_newest_first_and_auto_dismiss() {
        let notifier = notifier();
        notifier.ok("Wallet created");
        notifier.err("Backend unreachable");

        let list = notifier.list();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].msg, "Backend unreachable");
        assert_eq!(list[0].level, Level::Error);

        tokio::time::sleep(Duration::from_millis(3100)).await;
        let list = notifier.list();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].level, Level::Error);

        tokio::time::sleep(Duration::from_millis(7000)).await;
        assert!(notifier.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dismiss_cancels_timer() {
        let notifier = notifier();
        let id = notifier.ok("hello");
        assert!(notifier.dismiss(id));
        assert!(!notifier.dismiss(id));
        assert!(lock(&notifier.inner).timers.is_empty());
    }

    #[test]
    fn test_without_runtime_items_stay() {
        let notifier = notifier();
        notifier.ok("no runtime");
        assert_eq!(notifier.len(), 1);
        notifier.shutdown();
        assert!(notifier.is_empty());
    }
}
