//! Bounded handoff slots between the primary loop and the inference worker.
//!
//! Built on `crossbeam_channel::bounded`. Writers never block:
//! - `Overflow::DropNewest`: a full slot rejects the incoming item
//! - `Overflow::DropOldest`: a full slot evicts its oldest item to make room

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Overflow {
    DropNewest,
    DropOldest,
}

/// What happened to an offered item.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Offer {
    Accepted,
    /// Slot was full; the offered item was discarded.
    Dropped,
    /// Slot was full; an older pending item was discarded instead.
    Replaced,
    /// Receiver is gone.
    Closed,
}

pub struct SlotSender<T> {
    tx: Sender<T>,
    /// Kept only for `DropOldest`, to pop the pending head.
    evict: Option<Receiver<T>>,
    discarded: Arc<AtomicU64>,
}

pub struct SlotReceiver<T> {
    rx: Receiver<T>,
    discarded: Arc<AtomicU64>,
}

pub fn bounded_slot<T>(capacity: usize, overflow: Overflow) -> (SlotSender<T>, SlotReceiver<T>) {
    let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
    let discarded = Arc::new(AtomicU64::new(0));
    let evict = match overflow {
        Overflow::DropOldest => Some(rx.clone()),
        Overflow::DropNewest => None,
    };
    (
        SlotSender {
            tx,
            evict,
            discarded: Arc::clone(&discarded),
        },
        SlotReceiver { rx, discarded },
    )
}

impl<T> SlotSender<T> {
    /// Offer an item without blocking.
    pub fn offer(&self, item: T) -> Offer {
        let mut item = item;
        let mut replaced = false;
        loop {
            match self.tx.try_send(item) {
                Ok(()) => {
                    return if replaced {
                        Offer::Replaced
                    } else {
                        Offer::Accepted
                    }
                }
                Err(TrySendError::Disconnected(_)) => return Offer::Closed,
                Err(TrySendError::Full(back)) => {
                    let Some(evict) = &self.evict else {
                        self.discarded.fetch_add(1, Ordering::Relaxed);
                        return Offer::Dropped;
                    };
                    // The consumer may have drained in between; either way
                    // there is room on the next attempt.
                    if evict.try_recv().is_ok() {
                        self.discarded.fetch_add(1, Ordering::Relaxed);
                        replaced = true;
                    }
                    item = back;
                }
            }
        }
    }

    pub fn discarded(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }
}

impl<T> SlotReceiver<T> {
    /// Wait up to `timeout` for the next item. `Ok(None)` on timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<T>, SlotClosed> {
        match self.rx.recv_timeout(timeout) {
            Ok(item) => Ok(Some(item)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(SlotClosed),
        }
    }

    /// Take everything pending and keep the item with the greatest key.
    /// Older items are discarded.
    pub fn drain_latest_by<K: Ord>(&self, key: impl Fn(&T) -> K) -> Option<T> {
        let mut latest: Option<T> = None;
        for item in self.rx.try_iter() {
            match &latest {
                Some(current) if key(current) >= key(&item) => {
                    self.discarded.fetch_add(1, Ordering::Relaxed);
                }
                Some(_) => {
                    self.discarded.fetch_add(1, Ordering::Relaxed);
                    latest = Some(item);
                }
                None => latest = Some(item),
            }
        }
        latest
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn discarded(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }
}

/// Every sender has been dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotClosed;
