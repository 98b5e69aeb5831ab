//! In-process loopback transport.
//!
//! One [`MemTransport`] is a bus of named topics. Writers fan each sample
//! out to every reader of the topic (filters applied per reader), then
//! invoke the reader's listener *on the writing thread*. That is the same
//! callback-from-a-transport-thread regime a real middleware binding
//! exhibits, which is what makes this useful for exercising the engine's
//! locking protocol in tests and demos.
//!
//! Instances are keyed by the key fields registered for the topic (dotted
//! paths allowed); an unkeyed topic collapses to a single instance. Reader
//! queues are bounded by the QoS profile depth; overflow drops the oldest
//! sample.

use crate::{
    FilterExpression, InstanceHandle, InstanceState, QosProfile, ReaderListener, SampleInfo,
    SampleReader, SampleWriter, StatusMask, Transport, TransportError, WriterListener,
};
use core_guid::AttributePath;
use core_message::{Record, get_at_path};
use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::{Arc, Mutex, Weak};

const DEFAULT_DEPTH: usize = 256;

type QueuedSample = (Option<Record>, SampleInfo);

struct TopicState {
    name: String,
    key_fields: Mutex<Vec<String>>,
    readers: Mutex<Vec<Arc<MemReader>>>,
    writers: Mutex<Vec<Weak<MemWriter>>>,
    instances: Mutex<HashMap<InstanceHandle, Record>>,
}

impl TopicState {
    fn new(name: &str) -> Self {
        TopicState {
            name: name.to_string(),
            key_fields: Mutex::new(Vec::new()),
            readers: Mutex::new(Vec::new()),
            writers: Mutex::new(Vec::new()),
            instances: Mutex::new(HashMap::new()),
        }
    }

    /// Instance handle for a sample: hash of its key-field values, or the
    /// shared handle 1 when the topic is unkeyed.
    fn handle_for(&self, sample: &Record) -> InstanceHandle {
        let key_fields = self.key_fields.lock().expect("key fields lock");
        if key_fields.is_empty() {
            return InstanceHandle(1);
        }
        let mut hasher = DefaultHasher::new();
        for field in key_fields.iter() {
            let path = AttributePath::parse(field);
            match get_at_path(sample, &path) {
                Ok(value) => format!("{value:?}").hash(&mut hasher),
                Err(_) => "<missing>".hash(&mut hasher),
            }
        }
        let h = hasher.finish();
        InstanceHandle(if h == 0 { 1 } else { h })
    }

    /// Projection of a sample onto the topic's key fields, stored so
    /// `key_value` can recover keys after dispose.
    fn key_projection(&self, sample: &Record) -> Record {
        let key_fields = self.key_fields.lock().expect("key fields lock");
        let mut out = Record::new(sample.type_name());
        for field in key_fields.iter() {
            let path = AttributePath::parse(field);
            if let Ok(value) = get_at_path(sample, &path) {
                out.set(field.clone(), value.clone());
            }
        }
        out
    }

    fn deliver(&self, sample: Option<&Record>, info: SampleInfo) {
        let readers: Vec<Arc<MemReader>> =
            self.readers.lock().expect("readers lock").clone();
        for reader in readers {
            reader.push(sample.cloned(), info);
        }
    }

    fn notify_publication_matched(&self) {
        let reader_count = self.readers.lock().expect("readers lock").len();
        let writers: Vec<Weak<MemWriter>> =
            self.writers.lock().expect("writers lock").clone();
        for writer in writers.iter().filter_map(Weak::upgrade) {
            writer.fire_publication_matched(reader_count);
        }
    }
}

/// Loopback endpoint factory.
pub struct MemTransport {
    topics: Mutex<HashMap<String, Arc<TopicState>>>,
    depths: Mutex<HashMap<QosProfile, usize>>,
}

impl Default for MemTransport {
    fn default() -> Self {
        MemTransport::new()
    }
}

impl MemTransport {
    pub fn new() -> Self {
        MemTransport {
            topics: Mutex::new(HashMap::new()),
            depths: Mutex::new(HashMap::new()),
        }
    }

    /// Override the reader queue bound for one profile label.
    pub fn set_profile_depth(&self, profile: QosProfile, depth: usize) {
        self.depths
            .lock()
            .expect("depths lock")
            .insert(profile, depth.max(1));
    }

    /// Declare the key fields (dotted paths) identifying instances on a
    /// topic. Unregistered topics are unkeyed (single instance).
    pub fn register_keys(&self, topic: &str, key_fields: &[&str]) {
        let state = self.topic(topic);
        *state.key_fields.lock().expect("key fields lock") =
            key_fields.iter().map(|s| s.to_string()).collect();
    }

    fn topic(&self, name: &str) -> Arc<TopicState> {
        self.topics
            .lock()
            .expect("topics lock")
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(TopicState::new(name)))
            .clone()
    }

    fn depth_for(&self, profile: QosProfile) -> usize {
        *self
            .depths
            .lock()
            .expect("depths lock")
            .get(&profile)
            .unwrap_or(&DEFAULT_DEPTH)
    }

    fn make_reader(
        &self,
        topic: &str,
        filter: Option<FilterExpression>,
        profile: QosProfile,
    ) -> Arc<dyn SampleReader> {
        let state = self.topic(topic);
        let reader = Arc::new(MemReader {
            topic: state.clone(),
            filter,
            depth: self.depth_for(profile),
            queue: Mutex::new(VecDeque::new()),
            listener: Mutex::new(None),
        });
        state.readers.lock().expect("readers lock").push(reader.clone());
        state.notify_publication_matched();
        tracing::debug!(target: "transport.mem", topic, ?profile, "reader attached");
        reader
    }
}

impl Transport for MemTransport {
    fn reader(
        &self,
        topic: &str,
        profile: QosProfile,
    ) -> Result<Arc<dyn SampleReader>, TransportError> {
        Ok(self.make_reader(topic, None, profile))
    }

    fn filtered_reader(
        &self,
        topic: &str,
        filter: FilterExpression,
        profile: QosProfile,
    ) -> Result<Arc<dyn SampleReader>, TransportError> {
        Ok(self.make_reader(topic, Some(filter), profile))
    }

    fn writer(
        &self,
        topic: &str,
        _profile: QosProfile,
    ) -> Result<Arc<dyn SampleWriter>, TransportError> {
        let state = self.topic(topic);
        let writer = Arc::new(MemWriter {
            topic: state.clone(),
            written: Mutex::new(HashSet::new()),
            listener: Mutex::new(None),
        });
        state
            .writers
            .lock()
            .expect("writers lock")
            .push(Arc::downgrade(&writer));
        tracing::debug!(target: "transport.mem", topic, "writer attached");
        Ok(writer)
    }
}

struct MemReader {
    topic: Arc<TopicState>,
    filter: Option<FilterExpression>,
    depth: usize,
    queue: Mutex<VecDeque<QueuedSample>>,
    listener: Mutex<Option<(Arc<dyn ReaderListener>, StatusMask)>>,
}

impl MemReader {
    fn push(&self, sample: Option<Record>, info: SampleInfo) {
        // Filters apply to data; instance-state transitions always pass.
        if let (Some(filter), Some(record)) = (&self.filter, sample.as_ref())
            && !filter.matches(record)
        {
            return;
        }
        {
            let mut queue = self.queue.lock().expect("queue lock");
            queue.push_back((sample, info));
            while queue.len() > self.depth {
                queue.pop_front();
            }
        }
        let listener = self.listener.lock().expect("listener lock").clone();
        if let Some((listener, mask)) = listener
            && mask.contains(StatusMask::DATA_AVAILABLE)
        {
            listener.on_data_available();
        }
    }
}

impl SampleReader for MemReader {
    fn topic_name(&self) -> &str {
        &self.topic.name
    }

    fn take(&self) -> Result<Vec<QueuedSample>, TransportError> {
        let mut queue = self.queue.lock().expect("queue lock");
        Ok(queue.drain(..).collect())
    }

    fn key_value(&self, handle: InstanceHandle) -> Result<Record, TransportError> {
        self.topic
            .instances
            .lock()
            .expect("instances lock")
            .get(&handle)
            .cloned()
            .ok_or(TransportError::UnknownInstance(handle))
    }

    fn set_listener(&self, listener: Option<Arc<dyn ReaderListener>>, mask: StatusMask) {
        *self.listener.lock().expect("listener lock") = listener.map(|l| (l, mask));
    }
}

struct MemWriter {
    topic: Arc<TopicState>,
    written: Mutex<HashSet<InstanceHandle>>,
    listener: Mutex<Option<(Arc<dyn WriterListener>, StatusMask)>>,
}

impl MemWriter {
    fn fire_publication_matched(&self, current_count: usize) {
        let listener = self.listener.lock().expect("listener lock").clone();
        if let Some((listener, mask)) = listener
            && mask.contains(StatusMask::PUBLICATION_MATCHED)
        {
            listener.on_publication_matched(&self.topic.name, current_count);
        }
    }
}

impl SampleWriter for MemWriter {
    fn topic_name(&self) -> &str {
        &self.topic.name
    }

    fn write(&self, sample: &Record) -> Result<(), TransportError> {
        let handle = self.topic.handle_for(sample);
        self.topic
            .instances
            .lock()
            .expect("instances lock")
            .insert(handle, self.topic.key_projection(sample));
        self.written.lock().expect("written lock").insert(handle);
        tracing::trace!(
            target: "transport.mem",
            topic = %self.topic.name,
            %handle,
            sample_type = sample.type_name(),
            "write"
        );
        self.topic.deliver(Some(sample), SampleInfo::alive(handle));
        Ok(())
    }

    fn lookup_instance(&self, key_sample: &Record) -> Option<InstanceHandle> {
        let handle = self.topic.handle_for(key_sample);
        self.topic
            .instances
            .lock()
            .expect("instances lock")
            .contains_key(&handle)
            .then_some(handle)
    }

    fn dispose_instance(&self, handle: InstanceHandle) -> Result<(), TransportError> {
        if !self
            .topic
            .instances
            .lock()
            .expect("instances lock")
            .contains_key(&handle)
        {
            return Err(TransportError::UnknownInstance(handle));
        }
        tracing::debug!(target: "transport.mem", topic = %self.topic.name, %handle, "dispose");
        self.topic.deliver(
            None,
            SampleInfo::not_alive(handle, InstanceState::NotAliveDisposed),
        );
        Ok(())
    }

    fn set_listener(&self, listener: Option<Arc<dyn WriterListener>>, mask: StatusMask) {
        *self.listener.lock().expect("listener lock") = listener.map(|l| (l, mask));
        // Late listener registration still learns about existing readers.
        let count = self.topic.readers.lock().expect("readers lock").len();
        if count > 0 {
            self.fire_publication_matched(count);
        }
    }
}

impl Drop for MemWriter {
    fn drop(&mut self) {
        let written: Vec<InstanceHandle> = self
            .written
            .lock()
            .expect("written lock")
            .iter()
            .copied()
            .collect();
        for handle in written {
            self.topic.deliver(
                None,
                SampleInfo::not_alive(handle, InstanceState::NotAliveNoWriters),
            );
        }
    }
}
