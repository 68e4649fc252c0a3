use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;

/// External predicate gating dispatch, such as "network available"
///
/// `subscribe` hands out a receiver that is notified whenever the condition
/// changes; the engine keeps one for its lifetime and pauses or resumes the
/// pool on every change.
pub trait ConditionGate: Send + Sync {
    fn is_satisfied(&self) -> bool;
    fn subscribe(&self) -> watch::Receiver<bool>;

    /// Restrict the condition to unmetered links
    ///
    /// Called at start-up with the persisted preference and whenever it
    /// changes. Gates that tell link types apart publish the new value through
    /// `subscribe`; the default ignores it.
    fn set_unmetered_only(&self, _unmetered_only: bool) {}
}

/// Gate that never blocks dispatch; the default when no gate is configured
pub struct AlwaysSatisfied {
    sender: watch::Sender<bool>,
}

impl AlwaysSatisfied {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(true);
        Self { sender }
    }
}

impl Default for AlwaysSatisfied {
    fn default() -> Self {
        Self::new()
    }
}

impl ConditionGate for AlwaysSatisfied {
    fn is_satisfied(&self) -> bool {
        true
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }
}

/// Gate driven by explicit calls to [`ManualGate::set`]
///
/// Embedders bridge their own detection (connectivity callbacks, battery
/// state, ...) into it; tests use it to simulate condition changes.
pub struct ManualGate {
    sender: watch::Sender<bool>,
    unmetered_only: AtomicBool,
}

impl ManualGate {
    pub fn new(satisfied: bool) -> Self {
        let (sender, _) = watch::channel(satisfied);
        Self {
            sender,
            unmetered_only: AtomicBool::new(false),
        }
    }

    /// Last restriction requested by the engine; the caller decides what it means for `set`
    pub fn unmetered_only(&self) -> bool {
        self.unmetered_only.load(Ordering::SeqCst)
    }

    /// Update the condition; subscribers are only notified on an actual change
    pub fn set(&self, satisfied: bool) {
        self.sender.send_if_modified(|current| {
            if *current == satisfied {
                return false;
            }
            *current = satisfied;
            true
        });
    }
}

impl ConditionGate for ManualGate {
    fn is_satisfied(&self) -> bool {
        *self.sender.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }

    fn set_unmetered_only(&self, unmetered_only: bool) {
        self.unmetered_only.store(unmetered_only, Ordering::SeqCst);
    }
}
