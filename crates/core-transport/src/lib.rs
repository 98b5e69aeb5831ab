//! Abstract publish-subscribe transport contract.
//!
//! The assembly engine never talks to a concrete middleware; it is written
//! against the traits here. A binding supplies readers that hand out samples
//! via non-blocking [`SampleReader::take`] with per-sample [`SampleInfo`]
//! (validity, instance state, handle, source timestamp), writers with
//! instance lookup/dispose, optional content-filtered readers, and a QoS
//! profile selected purely by [`QosProfile`] label; durability and
//! reliability details stay on the binding's side of the line.
//!
//! The [`mem`] module provides an in-process loopback binding used by tests
//! and the demo executable. Its writer threads invoke reader listeners
//! synchronously, which is exactly the "transport-owned callback thread"
//! regime real bindings exhibit.

pub mod filter;
pub mod mem;

pub use filter::{FilterError, FilterExpression};

use core_guid::Timestamp;
use core_message::Record;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

bitflags::bitflags! {
    /// Listener event selection mask.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct StatusMask: u32 {
        const DATA_AVAILABLE         = 1 << 0;
        const PUBLICATION_MATCHED    = 1 << 1;
        const SUBSCRIPTION_MATCHED   = 1 << 2;
        const LIVELINESS_LOST        = 1 << 3;
        const OFFERED_DEADLINE_MISSED = 1 << 4;
    }
}

/// Lifecycle of the instance a sample belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    Alive,
    NotAliveDisposed,
    NotAliveNoWriters,
}

impl InstanceState {
    pub fn is_alive(&self) -> bool {
        matches!(self, InstanceState::Alive)
    }
}

/// Opaque per-instance identifier minted by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceHandle(pub u64);

impl InstanceHandle {
    pub const NIL: InstanceHandle = InstanceHandle(0);

    pub fn is_nil(&self) -> bool {
        *self == InstanceHandle::NIL
    }
}

impl fmt::Display for InstanceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Per-sample transport metadata.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleInfo {
    pub valid: bool,
    pub instance_state: InstanceState,
    pub instance_handle: InstanceHandle,
    pub source_timestamp: Option<Timestamp>,
}

impl SampleInfo {
    pub fn alive(handle: InstanceHandle) -> Self {
        SampleInfo {
            valid: true,
            instance_state: InstanceState::Alive,
            instance_handle: handle,
            source_timestamp: Some(Timestamp::now()),
        }
    }

    pub fn not_alive(handle: InstanceHandle, state: InstanceState) -> Self {
        SampleInfo {
            valid: false,
            instance_state: state,
            instance_handle: handle,
            source_timestamp: Some(Timestamp::now()),
        }
    }
}

/// QoS profile labels the engine selects by name only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QosProfile {
    Command,
    Config,
    Report,
}

/// Failures surfaced by a binding. The engine propagates these as-is and
/// never retries.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransportError {
    #[error("topic '{0}' has been closed")]
    TopicClosed(String),
    #[error("no instance registered for handle {0}")]
    UnknownInstance(InstanceHandle),
    #[error("invalid filter: {0}")]
    Filter(#[from] FilterError),
}

/// Reader-side event callbacks. Fired on transport-owned threads; many such
/// threads may be live at once.
pub trait ReaderListener: Send + Sync {
    fn on_data_available(&self);
}

/// Writer-side event callbacks; all default to no-ops so implementors pick
/// the events they care about.
pub trait WriterListener: Send + Sync {
    fn on_publication_matched(&self, _topic: &str, _current_count: usize) {}
    fn on_liveliness_lost(&self, _topic: &str) {}
    fn on_offered_deadline_missed(&self, _topic: &str) {}
}

/// One subscription endpoint; owned by exactly one reader node.
pub trait SampleReader: Send + Sync {
    fn topic_name(&self) -> &str;

    /// Non-blocking drain of everything received since the last call.
    /// Invalid entries (dispose / no-writers) carry no data.
    fn take(&self) -> Result<Vec<(Option<Record>, SampleInfo)>, TransportError>;

    /// Recover the key fields of the instance behind `handle`.
    fn key_value(&self, handle: InstanceHandle) -> Result<Record, TransportError>;

    fn set_listener(&self, listener: Option<Arc<dyn ReaderListener>>, mask: StatusMask);
}

/// One publication endpoint; owned by exactly one writer node.
pub trait SampleWriter: Send + Sync {
    fn topic_name(&self) -> &str;

    fn write(&self, sample: &Record) -> Result<(), TransportError>;

    /// Handle of the instance `key_sample`'s key fields identify, if the
    /// writer has published it.
    fn lookup_instance(&self, key_sample: &Record) -> Option<InstanceHandle>;

    fn dispose_instance(&self, handle: InstanceHandle) -> Result<(), TransportError>;

    fn set_listener(&self, listener: Option<Arc<dyn WriterListener>>, mask: StatusMask);
}

/// Endpoint factory. One per process in practice, constructed by the
/// application and injected wherever graphs are built.
pub trait Transport: Send + Sync {
    fn reader(
        &self,
        topic: &str,
        profile: QosProfile,
    ) -> Result<Arc<dyn SampleReader>, TransportError>;

    /// Reader whose root subscription only sees samples matching `filter`.
    fn filtered_reader(
        &self,
        topic: &str,
        filter: FilterExpression,
        profile: QosProfile,
    ) -> Result<Arc<dyn SampleReader>, TransportError>;

    fn writer(
        &self,
        topic: &str,
        profile: QosProfile,
    ) -> Result<Arc<dyn SampleWriter>, TransportError>;
}
