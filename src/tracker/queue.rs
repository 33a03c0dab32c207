use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex, MutexGuard,
    },
};

use tokio::sync::Notify;

use crate::{detection::DetectorKind, sip::ConfirmedSip};

/// A confirmed sip waiting to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingSip {
    pub sip: ConfirmedSip,
    pub detector: Option<DetectorKind>,
    pub session_id: Option<String>,
}

impl From<ConfirmedSip> for PendingSip {
    fn from(sip: ConfirmedSip) -> Self {
        Self {
            sip,
            detector: None,
            session_id: None,
        }
    }
}

/// Bounded hand-off between the frame loop and the persistence worker.
///
/// `push` never blocks: when full, the oldest pending sip is dropped and handed
/// back to the caller.
pub struct SipQueue {
    items: Mutex<VecDeque<PendingSip>>,
    capacity: usize,
    notify: Notify,
    closed: AtomicBool,
}

impl SipQueue {
    pub const DEFAULT_CAPACITY: usize = 64;

    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn push(&self, item: PendingSip) -> Option<PendingSip> {
        let dropped = {
            let mut items = self.lock();
            let dropped = if items.len() >= self.capacity {
                items.pop_front()
            } else {
                None
            };
            items.push_back(item);
            dropped
        };
        self.notify.notify_one();
        dropped
    }

    /// Wait for the next sip. Returns `None` once the queue is closed and empty.
    pub async fn pop(&self) -> Option<PendingSip> {
        loop {
            let notified = self.notify.notified();
            if let Some(item) = self.lock().pop_front() {
                return Some(item);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            notified.await;
        }
    }

    /// Stop accepting waits; items already queued are still handed out.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<PendingSip>> {
        match self.items.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for SipQueue {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}
