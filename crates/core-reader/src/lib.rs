//! Reader-side assembly graph.
//!
//! A [`ReaderNode`] owns one transport reader and an ordered set of
//! decorators, each implementing one UMAA multi-topic concept. The drain
//! protocol pulls everything the transport has buffered, lets every
//! decorator inspect each valid sample (and, via child linkage, every
//! assembly a child node finishes), and emits a [`CombinedSample`] upward
//! once all *required* decorators have signaled completion for a key.
//! Invalid samples (dispose / no-writers) clear the key's state and
//! propagate upward with no data so adapters can inform consumers.
//!
//! Locking protocol: all per-node state lives behind one `Mutex`. Emissions
//! are captured while the lock is held and parent notification runs strictly
//! after release. Notification only ever flows child -> parent in a tree,
//! so no cycle can re-enter a locked node.
//!
//! In-flight state is bounded: when more assemblies than
//! `max_in_flight` are pending, the oldest is evicted and counted in the
//! node metrics. An assembly that never completes therefore costs memory
//! only until its slot is recycled.

mod adapter;
mod decorators;
mod metrics;

pub use adapter::{AssembledListener, ReaderAdapter};
pub use decorators::{GenSpecReader, LargeListReader, LargeSetReader};
pub use metrics::{NodeMetrics, NodeMetricsSnapshot};

use core_combined::CombinedSample;
use core_message::{FieldError, Record};
use core_transport::{
    InstanceHandle, ReaderListener, SampleInfo, SampleReader, StatusMask, TransportError,
};
use std::collections::{HashMap, VecDeque};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use thiserror::Error;

/// Opaque per-in-flight-assembly identifier. Minted per root sample by
/// default; decorators map their own GUID-keyed state back to it.
pub type AssemblyKey = u64;

/// Pluggable key derivation for inbound samples.
pub type KeyFn = Box<dyn Fn(&Record) -> AssemblyKey + Send>;

/// Upward notification: a finished assembly (`Some`) or an instance-state
/// transition (`None`) for `key`.
pub type ParentNotify = Arc<dyn Fn(AssemblyKey, Option<CombinedSample>, SampleInfo) + Send + Sync>;

/// Decorator -> node message that `key` reached completeness for the
/// signaling decorator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssemblySignal {
    pub key: AssemblyKey,
    pub complete: bool,
}

impl AssemblySignal {
    pub fn complete(key: AssemblyKey) -> Self {
        AssemblySignal { key, complete: true }
    }
}

/// Fatal assembly-side failures. These abort the current drain; the node
/// itself stays usable.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AssemblyError {
    /// A sample or metadata object is missing a field its concept requires.
    #[error("contract violation: {0}")]
    Contract(String),
    #[error(transparent)]
    Field(#[from] FieldError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// One UMAA concept's reader-side behavior, attached to a node under a role
/// name. Implementations buffer out-of-order arrivals in their own
/// GUID-keyed maps and touch node state only through the passed-in
/// [`AssemblyTable`] for the duration of a callback.
pub trait ReaderDecorator: Send {
    /// A sample arrived on the owning node's own topic.
    fn on_reader_data(
        &mut self,
        table: &mut AssemblyTable,
        key: AssemblyKey,
        sample: &Record,
    ) -> Result<Vec<AssemblySignal>, AssemblyError>;

    /// A child node finished an assembly (set/list element, specialization).
    fn on_child_assembled(
        &mut self,
        table: &mut AssemblyTable,
        child_name: &str,
        assembled: &CombinedSample,
    ) -> Result<Vec<AssemblySignal>, AssemblyError>;
}

struct InFlight {
    combined: CombinedSample,
    complete: HashMap<String, bool>,
    info: SampleInfo,
}

/// Bounded per-node table of in-flight assemblies.
pub struct AssemblyTable {
    in_flight: HashMap<AssemblyKey, InFlight>,
    order: VecDeque<AssemblyKey>,
    capacity: usize,
    dropped: u64,
}

impl AssemblyTable {
    fn new(capacity: usize) -> Self {
        AssemblyTable {
            in_flight: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
            dropped: 0,
        }
    }

    /// The in-flight combined sample for `key`, if any.
    pub fn combined(&self, key: AssemblyKey) -> Option<&CombinedSample> {
        self.in_flight.get(&key).map(|f| &f.combined)
    }

    /// Swap in an updated combined sample for `key`. No-op for unknown keys
    /// (the assembly may have been evicted).
    pub fn replace(&mut self, key: AssemblyKey, combined: CombinedSample) {
        if let Some(entry) = self.in_flight.get_mut(&key) {
            entry.combined = combined;
        }
    }

    fn insert(&mut self, key: AssemblyKey, combined: CombinedSample, info: SampleInfo) {
        if let Some(existing) = self.in_flight.get_mut(&key) {
            existing.combined = combined;
            existing.info = info;
            return;
        }
        while self.in_flight.len() >= self.capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            if self.in_flight.remove(&oldest).is_some() {
                self.dropped += 1;
                tracing::debug!(
                    target: "assembly.reader",
                    key = oldest,
                    "evicted oldest in-flight assembly (table full)"
                );
            }
        }
        self.in_flight.insert(key, InFlight {
            combined,
            complete: HashMap::new(),
            info,
        });
        self.order.push_back(key);
    }

    fn mark(&mut self, key: AssemblyKey, role: &str, complete: bool) {
        if let Some(entry) = self.in_flight.get_mut(&key) {
            entry.complete.insert(role.to_string(), complete);
        }
    }

    fn remove(&mut self, key: AssemblyKey) -> Option<(CombinedSample, SampleInfo)> {
        self.order.retain(|k| *k != key);
        self.in_flight.remove(&key).map(|f| (f.combined, f.info))
    }

    fn take_dropped(&mut self) -> u64 {
        std::mem::take(&mut self.dropped)
    }

    pub fn len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }
}

struct DecoratorSlot {
    role: String,
    required: bool,
    decorator: Box<dyn ReaderDecorator>,
}

struct NodeInner {
    decorators: Vec<DecoratorSlot>,
    /// Children by `(role, child_name)`. The node keeps its subtree alive;
    /// routing into decorators goes through each child's parent notify.
    children: HashMap<(String, String), Arc<ReaderNode>>,
    table: AssemblyTable,
    key_fn: Option<KeyFn>,
    key_by_handle: HashMap<InstanceHandle, AssemblyKey>,
}

/// Graph node owning one transport reader plus its concept decorators.
pub struct ReaderNode {
    reader: Arc<dyn SampleReader>,
    inner: Mutex<NodeInner>,
    parent_notify: Mutex<Option<ParentNotify>>,
    key_seq: AtomicU64,
    metrics: Arc<NodeMetrics>,
}

impl ReaderNode {
    pub fn new(reader: Arc<dyn SampleReader>, max_in_flight: usize) -> Arc<Self> {
        Arc::new(ReaderNode {
            reader,
            inner: Mutex::new(NodeInner {
                decorators: Vec::new(),
                children: HashMap::new(),
                table: AssemblyTable::new(max_in_flight),
                key_fn: None,
                key_by_handle: HashMap::new(),
            }),
            parent_notify: Mutex::new(None),
            key_seq: AtomicU64::new(1),
            metrics: Arc::new(NodeMetrics::default()),
        })
    }

    pub fn topic_name(&self) -> String {
        self.reader.topic_name().to_string()
    }

    pub fn metrics(&self) -> &NodeMetrics {
        &self.metrics
    }

    /// Override synthetic key minting (e.g. to key by a session field).
    pub fn set_key_fn(&self, key_fn: KeyFn) {
        self.inner.lock().expect("reader node lock").key_fn = Some(key_fn);
    }

    /// Attach a concept decorator under `role`. Re-registering a role
    /// replaces the previous decorator.
    pub fn register_decorator(
        &self,
        role: &str,
        decorator: Box<dyn ReaderDecorator>,
        required: bool,
    ) {
        let mut inner = self.inner.lock().expect("reader node lock");
        inner.decorators.retain(|slot| {
            if slot.role == role {
                tracing::debug!(target: "assembly.reader", role, "replacing reader decorator");
                false
            } else {
                true
            }
        });
        inner.decorators.push(DecoratorSlot {
            role: role.to_string(),
            required,
            decorator,
        });
    }

    /// Route `child`'s finished assemblies into the decorator registered
    /// under `role`, identified by `child_name` (topic short name for
    /// specializations, element topic for collections). This is the only
    /// channel by which a child's completion influences a parent.
    pub fn attach_child(self: &Arc<Self>, role: &str, child_name: &str, child: &Arc<ReaderNode>) {
        self.inner
            .lock()
            .expect("reader node lock")
            .children
            .insert((role.to_string(), child_name.to_string()), child.clone());
        let weak: Weak<ReaderNode> = Arc::downgrade(self);
        let role = role.to_string();
        let child_name = child_name.to_string();
        child.set_parent_notify(Arc::new(move |_child_key, combined, info| {
            let Some(parent) = weak.upgrade() else {
                return;
            };
            match combined {
                Some(sample) => parent.child_assembled(&role, &child_name, sample),
                None => {
                    // Child instance retired; nothing to assemble from it.
                    tracing::trace!(
                        target: "assembly.reader",
                        role = %role,
                        child = %child_name,
                        state = ?info.instance_state,
                        "child instance transition ignored"
                    );
                }
            }
        }));
    }

    /// Install the upward notification target (the parent's router or a
    /// top-level adapter). Called with the node lock *released*.
    pub fn set_parent_notify(&self, notify: ParentNotify) {
        *self.parent_notify.lock().expect("parent notify lock") = Some(notify);
    }

    /// Begin listener-driven draining: the transport's data-available
    /// callback pulls samples through this node from its own threads.
    pub fn start(self: &Arc<Self>) {
        struct NodeListener {
            node: Weak<ReaderNode>,
        }
        impl ReaderListener for NodeListener {
            fn on_data_available(&self) {
                let Some(node) = self.node.upgrade() else {
                    return;
                };
                if let Err(error) = node.drain() {
                    tracing::error!(target: "assembly.reader", %error, "drain aborted");
                }
            }
        }
        self.reader.set_listener(
            Some(Arc::new(NodeListener {
                node: Arc::downgrade(self),
            })),
            StatusMask::DATA_AVAILABLE,
        );
    }

    /// Pull and process everything the transport has pending. Returns the
    /// number of records processed. Fatal errors abort the remainder of the
    /// batch but leave the node usable.
    pub fn drain(&self) -> Result<usize, AssemblyError> {
        let mut emissions: Vec<(AssemblyKey, Option<CombinedSample>, SampleInfo)> = Vec::new();
        let result = {
            let mut inner = self.inner.lock().expect("reader node lock");
            let records = self.reader.take()?;
            let count = records.len();
            let mut failure = None;
            for (sample, info) in records {
                self.metrics.incr_samples();
                match sample {
                    Some(record) if info.valid => {
                        if let Err(e) = self.process_valid(&mut inner, record, info, &mut emissions)
                        {
                            failure = Some(e);
                            break;
                        }
                    }
                    _ => self.process_invalid(&mut inner, info, &mut emissions),
                }
            }
            self.metrics.add_dropped(inner.table.take_dropped());
            match failure {
                Some(e) => Err(e),
                None => Ok(count),
            }
        };
        self.dispatch(emissions);
        result
    }

    fn process_valid(
        &self,
        inner: &mut NodeInner,
        record: Record,
        info: SampleInfo,
        emissions: &mut Vec<(AssemblyKey, Option<CombinedSample>, SampleInfo)>,
    ) -> Result<(), AssemblyError> {
        let key = match &inner.key_fn {
            Some(f) => f(&record),
            None => self.next_key(),
        };
        inner.key_by_handle.insert(info.instance_handle, key);
        inner
            .table
            .insert(key, CombinedSample::new(record.clone()), info);

        let NodeInner {
            decorators, table, ..
        } = inner;
        for slot in decorators.iter_mut() {
            let signals = run_hook(&self.metrics, &slot.role, || {
                slot.decorator.on_reader_data(table, key, &record)
            })?;
            for signal in signals {
                table.mark(signal.key, &slot.role, signal.complete);
            }
        }
        collect_ready(inner, emissions, &self.metrics);
        Ok(())
    }

    fn process_invalid(
        &self,
        inner: &mut NodeInner,
        info: SampleInfo,
        emissions: &mut Vec<(AssemblyKey, Option<CombinedSample>, SampleInfo)>,
    ) {
        let key = inner
            .key_by_handle
            .remove(&info.instance_handle)
            .unwrap_or_else(|| self.next_key());
        inner.table.remove(key);
        self.metrics.incr_disposed();
        tracing::debug!(
            target: "assembly.reader",
            topic = self.reader.topic_name(),
            key,
            state = ?info.instance_state,
            "instance retired; clearing assembly state"
        );
        emissions.push((key, None, info));
    }

    /// A child node finished an assembly; route it to the owning decorator.
    fn child_assembled(&self, role: &str, child_name: &str, assembled: CombinedSample) {
        let mut emissions = Vec::new();
        {
            let mut inner = self.inner.lock().expect("reader node lock");
            let NodeInner {
                decorators, table, ..
            } = &mut *inner;
            let Some(slot) = decorators.iter_mut().find(|s| s.role == role) else {
                tracing::warn!(
                    target: "assembly.reader",
                    role,
                    child = child_name,
                    "child assembled for unknown decorator role"
                );
                return;
            };
            let outcome = run_hook(&self.metrics, &slot.role, || {
                slot.decorator.on_child_assembled(table, child_name, &assembled)
            });
            match outcome {
                Ok(signals) => {
                    for signal in signals {
                        table.mark(signal.key, &slot.role, signal.complete);
                    }
                }
                Err(error) => {
                    tracing::error!(target: "assembly.reader", %error, "child routing aborted");
                    return;
                }
            }
            collect_ready(&mut inner, &mut emissions, &self.metrics);
        }
        self.dispatch(emissions);
    }

    fn dispatch(&self, emissions: Vec<(AssemblyKey, Option<CombinedSample>, SampleInfo)>) {
        if emissions.is_empty() {
            return;
        }
        let notify = self.parent_notify.lock().expect("parent notify lock").clone();
        let Some(notify) = notify else {
            return;
        };
        for (key, combined, info) in emissions {
            notify(key, combined, info);
        }
    }

    fn next_key(&self) -> AssemblyKey {
        self.key_seq.fetch_add(1, Ordering::Relaxed)
    }
}

/// Run one decorator hook, translating a panic into "no signals" so a
/// misbehaving hook cannot poison the pipeline for other keys.
fn run_hook<F>(
    metrics: &NodeMetrics,
    role: &str,
    hook: F,
) -> Result<Vec<AssemblySignal>, AssemblyError>
where
    F: FnOnce() -> Result<Vec<AssemblySignal>, AssemblyError>,
{
    match catch_unwind(AssertUnwindSafe(hook)) {
        Ok(result) => result,
        Err(_) => {
            metrics.incr_panics();
            tracing::warn!(target: "assembly.reader", role, "decorator hook panicked; ignoring");
            Ok(Vec::new())
        }
    }
}

/// Move every key whose required decorators are all complete out of the
/// table and into `emissions`.
fn collect_ready(
    inner: &mut NodeInner,
    emissions: &mut Vec<(AssemblyKey, Option<CombinedSample>, SampleInfo)>,
    metrics: &NodeMetrics,
) {
    let ready: Vec<AssemblyKey> = inner
        .table
        .in_flight
        .keys()
        .copied()
        .filter(|key| inner.is_ready(*key))
        .collect();
    for key in ready {
        if let Some((combined, info)) = inner.table.remove(key) {
            metrics.incr_emitted();
            emissions.push((key, Some(combined), info));
        }
    }
}

impl NodeInner {
    fn is_ready(&self, key: AssemblyKey) -> bool {
        let Some(entry) = self.table.in_flight.get(&key) else {
            return false;
        };
        self.decorators
            .iter()
            .filter(|slot| slot.required)
            .all(|slot| entry.complete.get(&slot.role).copied().unwrap_or(false))
    }
}
