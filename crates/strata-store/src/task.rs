//! Asynchronous work items and the importer contract.
//!
//! Scheduling is not this crate's concern: [`WorkItem::submit`] runs the
//! work on its own thread, and anything that needs a real pool can hand in
//! an already finished item with [`WorkItem::completed`].

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{StoreError, StoreResult};

/// A wait ran out of time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("timed out after {0:?}")]
pub struct Timeout(pub Duration);

/// An object whose construction started asynchronous work that must
/// finish before the database is saved.
pub trait Importer: Send + Sync {
    fn is_done(&self) -> bool;

    /// Block until the work finishes, or until `timeout` elapses.
    fn wait_for_done(&self, timeout: Option<Duration>) -> Result<(), Timeout>;
}

enum Slot<T> {
    Pending,
    Ready(T),
    Failed(String),
    Taken,
}

struct Shared<T> {
    slot: Mutex<Slot<T>>,
    done: Condvar,
}

/// Handle to a value being produced on another thread.
pub struct WorkItem<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Send + 'static> WorkItem<T> {
    /// Run `work` on a new thread.
    pub fn submit<F>(work: F) -> StoreResult<Self>
    where
        F: FnOnce() -> T + Send + 'static,
    {
        let shared = Arc::new(Shared {
            slot: Mutex::new(Slot::Pending),
            done: Condvar::new(),
        });
        let producer = Arc::clone(&shared);
        thread::Builder::new()
            .name("strata-work".into())
            .spawn(move || {
                let outcome = panic::catch_unwind(AssertUnwindSafe(work));
                let mut slot = producer.slot.lock();
                *slot = match outcome {
                    Ok(value) => Slot::Ready(value),
                    Err(payload) => Slot::Failed(panic_message(payload.as_ref())),
                };
                producer.done.notify_all();
            })?;
        Ok(Self { shared })
    }
}

impl<T> WorkItem<T> {
    /// An item that is already done.
    pub fn completed(value: T) -> Self {
        Self {
            shared: Arc::new(Shared {
                slot: Mutex::new(Slot::Ready(value)),
                done: Condvar::new(),
            }),
        }
    }

    pub fn is_done(&self) -> bool {
        !matches!(*self.shared.slot.lock(), Slot::Pending)
    }

    pub fn wait_for_done(&self) {
        let mut slot = self.shared.slot.lock();
        while matches!(*slot, Slot::Pending) {
            self.shared.done.wait(&mut slot);
        }
    }

    pub fn wait_for_done_timeout(&self, timeout: Duration) -> Result<(), Timeout> {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            // Too far out to represent; no finite wait reaches it.
            self.wait_for_done();
            return Ok(());
        };
        let mut slot = self.shared.slot.lock();
        while matches!(*slot, Slot::Pending) {
            if self.shared.done.wait_until(&mut slot, deadline).timed_out()
                && matches!(*slot, Slot::Pending)
            {
                return Err(Timeout(timeout));
            }
        }
        Ok(())
    }

    /// Wait for the value and take it.
    pub fn get(self) -> StoreResult<T> {
        self.wait_for_done();
        let mut slot = self.shared.slot.lock();
        match std::mem::replace(&mut *slot, Slot::Taken) {
            Slot::Ready(value) => Ok(value),
            Slot::Failed(message) => Err(StoreError::WorkFailed(message)),
            Slot::Pending | Slot::Taken => {
                Err(StoreError::WorkFailed("result already taken".into()))
            }
        }
    }
}

impl<T: Send> Importer for WorkItem<T> {
    fn is_done(&self) -> bool {
        WorkItem::is_done(self)
    }

    fn wait_for_done(&self, timeout: Option<Duration>) -> Result<(), Timeout> {
        match timeout {
            Some(timeout) => self.wait_for_done_timeout(timeout),
            None => {
                WorkItem::wait_for_done(self);
                Ok(())
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "work item panicked".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn submit_and_get() {
        let item = WorkItem::submit(|| 6 * 7).unwrap();
        assert_eq!(item.get().unwrap(), 42);
    }

    #[test]
    fn completed_item_is_done() {
        let item = WorkItem::completed("ready");
        assert!(item.is_done());
        assert_eq!(item.wait_for_done_timeout(Duration::ZERO), Ok(()));
        assert_eq!(item.get().unwrap(), "ready");
    }

    #[test]
    fn wait_blocks_until_done() {
        let (release, gate) = mpsc::channel::<()>();
        let item = WorkItem::submit(move || {
            gate.recv().ok();
            "finished"
        })
        .unwrap();
        assert!(!item.is_done());
        release.send(()).unwrap();
        item.wait_for_done();
        assert!(item.is_done());
    }

    #[test]
    fn timeout_is_reported() {
        let (release, gate) = mpsc::channel::<()>();
        let item = WorkItem::submit(move || {
            gate.recv().ok();
        })
        .unwrap();
        assert_eq!(
            item.wait_for_done_timeout(Duration::from_millis(20)),
            Err(Timeout(Duration::from_millis(20)))
        );
        release.send(()).unwrap();
        assert_eq!(item.wait_for_done_timeout(Duration::from_secs(10)), Ok(()));
    }

    #[test]
    fn unbounded_timeout_waits_without_overflow() {
        assert_eq!(WorkItem::completed(1).wait_for_done_timeout(Duration::MAX), Ok(()));

        let (release, gate) = mpsc::channel::<()>();
        let item = WorkItem::submit(move || {
            gate.recv().ok();
            2
        })
        .unwrap();
        release.send(()).unwrap();
        assert_eq!(item.wait_for_done_timeout(Duration::MAX), Ok(()));
        assert_eq!(item.get().unwrap(), 2);
    }

    #[test]
    fn panic_becomes_error() {
        let item = WorkItem::<u32>::submit(|| panic!("import exploded")).unwrap();
        match item.get() {
            Err(StoreError::WorkFailed(message)) => assert_eq!(message, "import exploded"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn importer_trait_delegates() {
        let item = WorkItem::completed(());
        let importer: &dyn Importer = &item;
        assert!(importer.is_done());
        assert_eq!(importer.wait_for_done(None), Ok(()));
        assert_eq!(importer.wait_for_done(Some(Duration::from_millis(1))), Ok(()));
    }
}
