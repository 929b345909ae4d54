//! Observable client view

use std::time::Duration;
use tokio::sync::watch;

use crate::{ExamInfo, Phase, Reconciler, SkewTracker};

/// What a student endpoint currently shows
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientView {
    pub phase: Phase,
    pub exam: Option<ExamInfo>,
    pub remaining: Option<Duration>,
    pub broadcast_version: Option<u64>,
    /// Store clock minus local clock, in milliseconds
    pub skew_ms: i64,
    /// Most recent failed read; cleared by the next good one
    pub last_error: Option<String>,
}

impl ClientView {
    pub fn snapshot(reconciler: &Reconciler, skew: &SkewTracker, last_error: Option<String>) -> Self {
        Self {
            phase: reconciler.phase().clone(),
            exam: reconciler.exam().cloned(),
            remaining: reconciler.remaining(),
            broadcast_version: reconciler.last_version(),
            skew_ms: skew.offset().num_milliseconds(),
            last_error,
        }
    }

    /// Seconds left in the local countdown, if counting down
    pub fn countdown(&self) -> Option<u32> {
        match self.phase {
            Phase::Countdown { ticks_left } => Some(ticks_left),
            _ => None,
        }
    }
}

/// Shared view container
#[derive(Clone)]
pub struct SharedView {
    sender: watch::Sender<ClientView>,
    receiver: watch::Receiver<ClientView>,
}

impl SharedView {
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(ClientView::default());
        Self { sender, receiver }
    }

    pub fn set(&self, view: ClientView) {
        self.sender.send_if_modified(|current| {
            if *current == view {
                return false;
            }
            *current = view;
            true
        });
    }

    pub fn get(&self) -> ClientView {
        self.receiver.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ClientView> {
        self.receiver.clone()
    }
}

impl Default for SharedView {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_views_do_not_notify() {
        let shared = SharedView::new();
        let rx = shared.subscribe();

        shared.set(ClientView::default());
        assert!(!rx.has_changed().unwrap());

        shared.set(ClientView {
            phase: Phase::Countdown { ticks_left: 3 },
            ..Default::default()
        });
        assert!(rx.has_changed().unwrap());
        assert_eq!(shared.get().countdown(), Some(3));
    }
}
