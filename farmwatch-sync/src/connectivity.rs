//! Online/offline flag shared between the environment and the scheduler.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cloneable handle on the current connectivity state.
///
/// Transitions only flip the flag. Going back online does not trigger a sync;
/// the next scheduled tick picks it up.
#[derive(Debug, Clone)]
pub struct Connectivity {
    online: Arc<AtomicBool>,
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Connectivity {
    pub fn new(online: bool) -> Self {
        Self {
            online: Arc::new(AtomicBool::new(online)),
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Set the flag; returns `true` if this call changed it.
    pub fn set_online(&self, online: bool) -> bool {
        let previous = self.online.swap(online, Ordering::SeqCst);
        if previous != online {
            if online {
                tracing::info!("connectivity restored, sync resumes on next tick");
            } else {
                tracing::info!("connectivity lost, sync paused");
            }
        }
        previous != online
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_state() {
        let a = Connectivity::default();
        let b = a.clone();
        assert!(b.is_online());
        assert!(a.set_online(false));
        assert!(!b.is_online());
    }

    #[test]
    fn repeated_transition_reports_no_change() {
        let c = Connectivity::new(false);
        assert!(!c.set_online(false));
        assert!(c.set_online(true));
        assert!(!c.set_online(true));
    }
}
