//! Top-of-graph consumer adapter.
//!
//! The root node's emissions land here: finished samples buffer in a
//! channel for pull-style consumption (`take` / `wait_next`), and an
//! optional user listener is dispatched through the task pool so user code
//! never runs on a transport thread. Instance retirements (`combined =
//! None`) reach the listener as well, which is how dispose propagates to
//! consumers within one drain cycle.

use crate::{AssemblyKey, ParentNotify, ReaderNode};
use core_combined::CombinedSample;
use core_pool::{Priority, TaskPool};
use core_transport::SampleInfo;
use crossbeam_channel::{Receiver, Sender, unbounded};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Consumer callback for assembled samples. `sample` is `None` when the
/// underlying instance was disposed or lost its writers.
pub trait AssembledListener: Send + Sync {
    fn on_sample(&self, key: AssemblyKey, sample: Option<&CombinedSample>, info: &SampleInfo);
}

type ListenerSlot = Arc<Mutex<Option<Arc<dyn AssembledListener>>>>;

/// Buffering facade over a root [`ReaderNode`].
pub struct ReaderAdapter {
    node: Arc<ReaderNode>,
    rx: Receiver<CombinedSample>,
    listener: ListenerSlot,
}

impl std::fmt::Debug for ReaderAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReaderAdapter").finish_non_exhaustive()
    }
}

impl ReaderAdapter {
    /// Wire the adapter as `node`'s parent. Listener callbacks are
    /// submitted to `pool` at `priority`.
    pub fn new(node: Arc<ReaderNode>, pool: Arc<dyn TaskPool>, priority: Priority) -> Self {
        let (tx, rx): (Sender<CombinedSample>, Receiver<CombinedSample>) = unbounded();
        let listener: ListenerSlot = Arc::new(Mutex::new(None));

        let slot = listener.clone();
        let notify: ParentNotify = Arc::new(move |key, combined, info| {
            if let Some(sample) = &combined {
                let _ = tx.send(sample.clone());
            }
            let current = slot.lock().expect("listener slot lock").clone();
            if let Some(user) = current {
                let submitted = pool.submit(
                    Box::new(move || {
                        user.on_sample(key, combined.as_ref(), &info);
                    }),
                    priority,
                );
                if let Err(error) = submitted {
                    tracing::warn!(
                        target: "assembly.reader",
                        %error,
                        "listener dispatch dropped; pool unavailable"
                    );
                }
            }
        });
        node.set_parent_notify(notify);

        ReaderAdapter { node, rx, listener }
    }

    pub fn node(&self) -> &Arc<ReaderNode> {
        &self.node
    }

    /// Register (or clear) the consumer listener.
    pub fn set_listener(&self, listener: Option<Arc<dyn AssembledListener>>) {
        *self.listener.lock().expect("listener slot lock") = listener;
    }

    /// Drain every buffered assembled sample.
    pub fn take(&self) -> Vec<CombinedSample> {
        self.rx.try_iter().collect()
    }

    /// Block up to `timeout` for the next assembled sample.
    pub fn wait_next(&self, timeout: Duration) -> Option<CombinedSample> {
        self.rx.recv_timeout(timeout).ok()
    }

    pub fn pending(&self) -> usize {
        self.rx.len()
    }
}
