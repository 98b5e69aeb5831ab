//! Concept decorators for the writer graph.
//!
//! All three share the same discipline: allocate identifiers only where a
//! field is nil (so re-publishing an unchanged builder reuses every GUID and
//! produces identical wire content), publish children before touching the
//! base, and leave update markers pointing at the *last* element written,
//! since the reader side treats that marker as the atomic new-version
//! signal.

use crate::{PublishError, WriterDecorator, WriterNode};
use core_combined::{Collection, CombinedBuilder};
use core_guid::{AttributePath, Guid, Timestamp, path_for_list_element, path_for_set_element};
use core_message::{Record, Value, record_at_path_mut};
use std::collections::HashMap;
use std::sync::Arc;

/// Read a GUID field required to exist; unset reads as nil.
fn require_guid(record: &Record, field: &str) -> Result<Guid, PublishError> {
    match record.get(field) {
        Some(Value::Guid(g)) => Ok(*g),
        Some(Value::Nil) => Ok(Guid::NIL),
        _ => Err(PublishError::Contract(format!(
            "'{}' lacks required GUID field '{field}'",
            record.type_name()
        ))),
    }
}

/// Allocate a fresh GUID into `field` when it is nil; returns the effective
/// value either way.
fn ensure_guid(record: &mut Record, field: &str) -> Result<Guid, PublishError> {
    let current = require_guid(record, field)?;
    if !current.is_nil() {
        return Ok(current);
    }
    let fresh = Guid::generate();
    record.set(field, Value::Guid(fresh));
    Ok(fresh)
}

/// Stamp `field` with the current time when present and unset; returns the
/// effective timestamp if the field carries one afterwards.
fn ensure_timestamp(record: &mut Record, field: &str) -> Option<Timestamp> {
    match record.get(field) {
        Some(Value::Timestamp(ts)) => Some(*ts),
        Some(Value::Nil) => {
            let now = Timestamp::now();
            record.set(field, Value::Timestamp(now));
            Some(now)
        }
        _ => None,
    }
}

/// Mutable access to the `<name><suffix>` metadata struct at `attr_path`.
fn metadata_mut<'a>(
    builder: &'a mut CombinedBuilder,
    attr_path: &AttributePath,
    field: &str,
) -> Result<&'a mut Record, PublishError> {
    let owner = record_at_path_mut(builder.base_mut(), attr_path)?;
    let type_name = owner.type_name().to_string();
    owner
        .get_mut(field)
        .and_then(Value::as_struct_mut)
        .ok_or_else(|| {
            PublishError::Contract(format!("'{type_name}' lacks metadata field '{field}'"))
        })
}

/// Publishes the specialization referenced at `attr_path` first, then binds
/// the generalization's `(topic, id, timestamp)` to it.
pub struct GenSpecWriter {
    attr_path: AttributePath,
    /// Specialization short type name -> child key remap (injection point
    /// for deployments whose topics differ from type names).
    topic_map: HashMap<String, String>,
    children: HashMap<String, Arc<WriterNode>>,
}

impl GenSpecWriter {
    pub fn new(attr_path: AttributePath) -> Self {
        GenSpecWriter {
            attr_path,
            topic_map: HashMap::new(),
            children: HashMap::new(),
        }
    }

    pub fn with_child(mut self, topic: &str, node: Arc<WriterNode>) -> Self {
        self.children.insert(topic.to_string(), node);
        self
    }

    pub fn with_topic_remap(mut self, from: &str, to: &str) -> Self {
        self.topic_map.insert(from.to_string(), to.to_string());
        self
    }

    fn topic_for(&self, spec: &Record) -> String {
        let short = spec.short_name();
        self.topic_map
            .get(short)
            .cloned()
            .unwrap_or_else(|| short.to_string())
    }
}

impl WriterDecorator for GenSpecWriter {
    fn publish(&self, builder: &mut CombinedBuilder) -> Result<(), PublishError> {
        if builder.overlay_at(&self.attr_path).is_none() {
            return Ok(());
        }

        // Fix the specialization's identity in place so re-publication
        // keeps it.
        let (topic, spec_id, spec_ts) = {
            let spec = builder
                .overlay_at_mut(&self.attr_path)
                .expect("overlay checked above");
            let spec_id = ensure_guid(spec, "specializationReferenceID")?;
            let spec_ts = ensure_timestamp(spec, "specializationReferenceTimestamp");
            (self.topic_for(spec), spec_id, spec_ts)
        };

        let child = self.children.get(&topic).ok_or_else(|| {
            PublishError::Configuration(format!(
                "no child writer for specialization topic '{topic}' at {}",
                self.attr_path
            ))
        })?;

        // Specialization (and anything nested beneath it) first.
        let spec = builder
            .overlay_at(&self.attr_path)
            .expect("overlay checked above")
            .clone();
        let mut child_builder = builder.spawn_child(&self.attr_path, spec);
        // The overlay itself became the child's base; drop the copy.
        child_builder.remove_overlay_at(&AttributePath::root());
        child.publish(&mut child_builder)?;

        // Then bind the generalization to what was written.
        let generalization = record_at_path_mut(builder.base_mut(), &self.attr_path)?;
        generalization.set("specializationTopic", Value::Text(topic));
        generalization.set("specializationID", Value::Guid(spec_id));
        if let Some(ts) = spec_ts {
            generalization.set("specializationTimestamp", Value::Timestamp(ts));
        }
        Ok(())
    }

    fn children(&self) -> Vec<&Arc<WriterNode>> {
        self.children.values().collect()
    }
}

/// Publishes every element of the set at `attr_path`, then updates the
/// metadata's size and update marker.
pub struct LargeSetWriter {
    set_name: String,
    attr_path: AttributePath,
    child: Arc<WriterNode>,
}

impl LargeSetWriter {
    pub fn new(set_name: impl Into<String>, attr_path: AttributePath, child: Arc<WriterNode>) -> Self {
        LargeSetWriter {
            set_name: set_name.into(),
            attr_path,
            child,
        }
    }
}

impl WriterDecorator for LargeSetWriter {
    fn publish(&self, builder: &mut CombinedBuilder) -> Result<(), PublishError> {
        if builder.collection(&self.attr_path, &self.set_name).is_none() {
            return Ok(());
        }

        let meta_field = format!("{}SetMetadata", self.set_name);
        let set_id = ensure_guid(
            metadata_mut(builder, &self.attr_path, &meta_field)?,
            "setID",
        )?;

        // Fix identities in place, then take clones for fan-out.
        let mut staged: Vec<(Guid, Option<Timestamp>, Record)> = Vec::new();
        {
            let collection = builder
                .collection_mut(&self.attr_path, &self.set_name)
                .expect("collection checked above");
            for elem in collection.iter_mut() {
                elem.set("setID", Value::Guid(set_id));
                let elem_id = ensure_guid(elem, "elementID")?;
                let elem_ts = ensure_timestamp(elem, "elementTimestamp");
                staged.push((elem_id, elem_ts, elem.clone()));
            }
        }

        {
            let meta = metadata_mut(builder, &self.attr_path, &meta_field)?;
            meta.set("size", Value::Int(staged.len() as i64));
        }

        for (elem_id, _, elem) in &staged {
            let scope = self
                .attr_path
                .join(&path_for_set_element(&self.set_name, *elem_id));
            let mut child_builder = builder.spawn_child(&scope, elem.clone());
            self.child.publish(&mut child_builder)?;
        }

        // The last write is the atomic signal that the set is at the new
        // version; an empty set leaves the marker untouched.
        if let Some((last_id, last_ts, _)) = staged.last() {
            let meta = metadata_mut(builder, &self.attr_path, &meta_field)?;
            meta.set("updateElementID", Value::Guid(*last_id));
            if let Some(ts) = last_ts {
                meta.set("updateElementTimestamp", Value::Timestamp(*ts));
            }
        }
        Ok(())
    }

    fn children(&self) -> Vec<&Arc<WriterNode>> {
        vec![&self.child]
    }
}

/// Links and publishes the list at `attr_path` in order, then updates the
/// metadata's start/update markers and size.
pub struct LargeListWriter {
    list_name: String,
    attr_path: AttributePath,
    child: Arc<WriterNode>,
}

impl LargeListWriter {
    pub fn new(
        list_name: impl Into<String>,
        attr_path: AttributePath,
        child: Arc<WriterNode>,
    ) -> Self {
        LargeListWriter {
            list_name: list_name.into(),
            attr_path,
            child,
        }
    }
}

impl WriterDecorator for LargeListWriter {
    fn publish(&self, builder: &mut CombinedBuilder) -> Result<(), PublishError> {
        let Some(collection) = builder.collection(&self.attr_path, &self.list_name) else {
            return Ok(());
        };
        if matches!(collection, Collection::Set(_)) {
            return Err(PublishError::Configuration(format!(
                "collection '{}' at {} is a set; the list writer needs explicit order",
                self.list_name, self.attr_path
            )));
        }

        let meta_field = format!("{}ListMetadata", self.list_name);
        let list_id = ensure_guid(
            metadata_mut(builder, &self.attr_path, &meta_field)?,
            "listID",
        )?;

        // First pass fixes identities, second pass chains each element to
        // its successor (last link stays unset).
        let mut identities: Vec<(Guid, Option<Timestamp>)> = Vec::new();
        {
            let collection = builder
                .collection_mut(&self.attr_path, &self.list_name)
                .expect("collection checked above");
            for elem in collection.iter_mut() {
                elem.set("listID", Value::Guid(list_id));
                let elem_id = ensure_guid(elem, "elementID")?;
                let elem_ts = ensure_timestamp(elem, "elementTimestamp");
                identities.push((elem_id, elem_ts));
            }
            for (index, elem) in collection.iter_mut().enumerate() {
                let next = identities.get(index + 1).map(|(id, _)| *id);
                elem.set(
                    "nextElementID",
                    next.map(Value::Guid).unwrap_or(Value::Nil),
                );
            }
        }

        {
            let meta = metadata_mut(builder, &self.attr_path, &meta_field)?;
            meta.set("size", Value::Int(identities.len() as i64));
        }
        if identities.is_empty() {
            return Ok(());
        }

        let staged = builder
            .collection(&self.attr_path, &self.list_name)
            .expect("collection checked above")
            .records();
        for ((elem_id, _), elem) in identities.iter().zip(staged) {
            let scope = self
                .attr_path
                .join(&path_for_list_element(&self.list_name, *elem_id));
            let mut child_builder = builder.spawn_child(&scope, elem);
            self.child.publish(&mut child_builder)?;
        }

        let (first_id, _) = identities.first().expect("non-empty");
        let (last_id, last_ts) = identities.last().expect("non-empty");
        let meta = metadata_mut(builder, &self.attr_path, &meta_field)?;
        meta.set("startingElementID", Value::Guid(*first_id));
        meta.set("updateElementID", Value::Guid(*last_id));
        if let Some(ts) = last_ts {
            meta.set("updateElementTimestamp", Value::Timestamp(*ts));
        }
        Ok(())
    }

    fn children(&self) -> Vec<&Arc<WriterNode>> {
        vec![&self.child]
    }
}
