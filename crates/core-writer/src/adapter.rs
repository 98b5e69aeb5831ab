//! Writer-tree event fan-in.
//!
//! One forwarding listener is installed on every transport writer the graph
//! owns; user-facing events are filtered by the consumer's status mask and
//! dispatched through the task pool, so user code never runs on a transport
//! thread. The adapter also fronts builder minting, publishing, and root
//! instance disposal.

use crate::{PublishError, TopLevelWriter};
use core_combined::CombinedBuilder;
use core_message::Record;
use core_pool::{Priority, TaskPool};
use core_transport::{SampleWriter, StatusMask, WriterListener};
use std::sync::{Arc, Mutex};

type UserSlot = Arc<Mutex<Option<(Arc<dyn WriterListener>, StatusMask)>>>;

struct ForwardingListener {
    user: UserSlot,
    pool: Arc<dyn TaskPool>,
    priority: Priority,
}

impl ForwardingListener {
    fn dispatch(
        &self,
        required: StatusMask,
        invoke: impl FnOnce(Arc<dyn WriterListener>) + Send + 'static,
    ) {
        let current = self.user.lock().expect("user listener lock").clone();
        let Some((listener, mask)) = current else {
            return;
        };
        if !mask.contains(required) {
            return;
        }
        let submitted = self
            .pool
            .submit(Box::new(move || invoke(listener)), self.priority);
        if let Err(error) = submitted {
            tracing::warn!(
                target: "assembly.writer",
                %error,
                "writer event dropped; pool unavailable"
            );
        }
    }
}

impl WriterListener for ForwardingListener {
    fn on_publication_matched(&self, topic: &str, current_count: usize) {
        let topic = topic.to_string();
        self.dispatch(StatusMask::PUBLICATION_MATCHED, move |l| {
            l.on_publication_matched(&topic, current_count);
        });
    }

    fn on_liveliness_lost(&self, topic: &str) {
        let topic = topic.to_string();
        self.dispatch(StatusMask::LIVELINESS_LOST, move |l| {
            l.on_liveliness_lost(&topic);
        });
    }

    fn on_offered_deadline_missed(&self, topic: &str) {
        let topic = topic.to_string();
        self.dispatch(StatusMask::OFFERED_DEADLINE_MISSED, move |l| {
            l.on_offered_deadline_missed(&topic);
        });
    }
}

/// User-facing facade over a writer graph.
pub struct WriterAdapter {
    top: TopLevelWriter,
    user: UserSlot,
}

impl WriterAdapter {
    pub fn new(top: TopLevelWriter, pool: Arc<dyn TaskPool>, priority: Priority) -> Self {
        let user: UserSlot = Arc::new(Mutex::new(None));
        let forwarding: Arc<dyn WriterListener> = Arc::new(ForwardingListener {
            user: user.clone(),
            pool,
            priority,
        });
        // Listen to everything; the user's mask filters at dispatch time.
        top.root().visit_writers(&mut |writer| {
            writer.set_listener(Some(forwarding.clone()), StatusMask::all());
        });
        WriterAdapter { top, user }
    }

    pub fn new_builder(&self) -> CombinedBuilder {
        self.top.new_builder()
    }

    pub fn publish(&self, builder: &mut CombinedBuilder) -> Result<(), PublishError> {
        self.top.publish(builder)
    }

    pub fn topic_name(&self) -> String {
        self.top.root().topic_name().to_string()
    }

    /// Register (or clear) the consumer listener with its event mask.
    pub fn set_listener(&self, listener: Option<Arc<dyn WriterListener>>, mask: StatusMask) {
        *self.user.lock().expect("user listener lock") = listener.map(|l| (l, mask));
    }

    /// Dispose the root instance identified by `key_sample`'s key fields,
    /// if this writer ever published it.
    pub fn dispose(&self, key_sample: &Record) -> Result<(), PublishError> {
        let writer = self.top.root().writer();
        match writer.lookup_instance(key_sample) {
            Some(handle) => Ok(writer.dispose_instance(handle)?),
            None => {
                tracing::debug!(
                    target: "assembly.writer",
                    topic = writer.topic_name(),
                    "no instance to dispose"
                );
                Ok(())
            }
        }
    }
}
