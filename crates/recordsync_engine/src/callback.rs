//! The single callback context.
//!
//! Every user-facing callback is posted here and runs on one task, one at a
//! time, in posting order. Callers therefore never see two of their
//! callbacks run concurrently. A panicking callback is logged and the queue
//! moves on to the next one.

use crate::worker::{Activity, ActivityGuard};
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

type Callback = (Box<dyn FnOnce() + Send>, ActivityGuard);

/// Serial executor for user callbacks.
#[derive(Debug)]
pub(crate) struct CallbackQueue {
    tx: Mutex<Option<mpsc::UnboundedSender<Callback>>>,
    activity: Activity,
}

impl CallbackQueue {
    /// Starts the callback task.
    pub(crate) fn spawn(
        handle: &tokio::runtime::Handle,
        activity: Activity,
    ) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<Callback>();
        let task = handle.spawn(async move {
            while let Some((callback, _guard)) = rx.recv().await {
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(callback)) {
                    error!(panic = panic_message(payload.as_ref()), "callback panicked");
                }
            }
            debug!("callback queue drained");
        });
        (
            Self {
                tx: Mutex::new(Some(tx)),
                activity,
            },
            task,
        )
    }

    /// Queues a callback. Dropped silently after [`CallbackQueue::close`].
    pub(crate) fn post(&self, callback: impl FnOnce() + Send + 'static) {
        let guard = self.activity.enter();
        if let Some(tx) = self.tx.lock().as_ref() {
            if tx.send((Box::new(callback), guard)).is_err() {
                debug!("callback dropped, queue closed");
            }
        }
    }

    /// Stops accepting callbacks; already queued ones still run.
    pub(crate) fn close(&self) {
        self.tx.lock().take();
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
