//! Concept decorators for the reader graph.
//!
//! Each decorator buffers whichever side of its pattern arrives first
//! (generalization or specialization, metadata or element) in its own
//! GUID-keyed maps, and completes a key only when the atomic-update gate of
//! its concept is satisfied. A mismatch (wrong topic, wrong GUID, wrong
//! timestamp) is never an error: the arrival is buffered and the decorator
//! waits for the other side.
//!
//! Child assemblies are buffered whole so that, on completion, any state a
//! child node resolved beneath an element or specialization re-roots into
//! the parent's combined sample under the proper scope path.

use crate::{AssemblyError, AssemblyKey, AssemblySignal, AssemblyTable, ReaderDecorator};
use core_combined::CombinedSample;
use core_guid::{AttributePath, Guid, Timestamp, path_for_list_element, path_for_set_element};
use core_message::{Record, record_at_path};
use std::collections::{HashMap, HashSet};

/// Read a GUID field that the concept requires to *exist*. An unset value
/// reads as [`Guid::NIL`]; only a missing field violates the contract.
fn require_guid(record: &Record, field: &str) -> Result<Guid, AssemblyError> {
    match record.get(field) {
        Some(core_message::Value::Guid(g)) => Ok(*g),
        Some(core_message::Value::Nil) => Ok(Guid::NIL),
        _ => Err(AssemblyError::Contract(format!(
            "'{}' lacks required GUID field '{field}'",
            record.type_name()
        ))),
    }
}

fn require_text<'a>(record: &'a Record, field: &str) -> Result<&'a str, AssemblyError> {
    record
        .get(field)
        .and_then(core_message::Value::as_text)
        .ok_or_else(|| {
            AssemblyError::Contract(format!(
                "'{}' lacks required text field '{field}'",
                record.type_name()
            ))
        })
}

/// Optional-GUID read: absent field, unset value, and nil all mean "not
/// bound yet".
fn optional_guid(record: &Record, field: &str) -> Option<Guid> {
    record.guid(field).filter(|g| !g.is_nil())
}

/// Generalization/specialization matcher scoped to one attribute path.
pub struct GenSpecReader {
    attr_path: AttributePath,
    /// specializationID -> generalization object awaiting its counterpart.
    gen_by_spec_id: HashMap<Guid, Record>,
    /// topic -> specializationID -> buffered child assembly.
    spec_by_topic: HashMap<String, HashMap<Guid, CombinedSample>>,
    /// specializationID -> owning parent assembly key.
    parent_key_by_spec_id: HashMap<Guid, AssemblyKey>,
}

impl GenSpecReader {
    pub fn new(attr_path: AttributePath) -> Self {
        GenSpecReader {
            attr_path,
            gen_by_spec_id: HashMap::new(),
            spec_by_topic: HashMap::new(),
            parent_key_by_spec_id: HashMap::new(),
        }
    }

    fn gen_binding(generalization: &Record) -> Result<(String, Guid, Option<Timestamp>), AssemblyError> {
        let topic = require_text(generalization, "specializationTopic")?.to_string();
        let id = require_guid(generalization, "specializationID")?;
        let ts = generalization.timestamp("specializationTimestamp");
        Ok((topic, id, ts))
    }

    fn spec_binding(spec: &Record) -> Result<(Guid, Option<Timestamp>), AssemblyError> {
        let id = require_guid(spec, "specializationReferenceID")?;
        let ts = spec.timestamp("specializationReferenceTimestamp");
        Ok((id, ts))
    }

    /// Install `child` as the overlay at this decorator's path and re-root
    /// its nested state beneath it.
    fn install(
        &self,
        table: &mut AssemblyTable,
        key: AssemblyKey,
        child: &CombinedSample,
    ) -> Option<AssemblySignal> {
        let combined = table.combined(key)?.clone();
        let updated = combined
            .add_overlay_at(&self.attr_path, child.base().clone())
            .embed_assembly_at(&self.attr_path, child);
        table.replace(key, updated);
        Some(AssemblySignal::complete(key))
    }
}

impl ReaderDecorator for GenSpecReader {
    fn on_reader_data(
        &mut self,
        table: &mut AssemblyTable,
        key: AssemblyKey,
        sample: &Record,
    ) -> Result<Vec<AssemblySignal>, AssemblyError> {
        let generalization = record_at_path(sample, &self.attr_path)?;
        let (topic, spec_id, gen_ts) = Self::gen_binding(generalization)?;
        if spec_id.is_nil() {
            // Unbound generalization: nothing to match against.
            tracing::trace!(target: "assembly.reader", "generalization carries nil specializationID");
            return Ok(Vec::new());
        }

        if self.gen_by_spec_id.insert(spec_id, generalization.clone()).is_some() {
            tracing::debug!(
                target: "assembly.reader",
                spec_id = %spec_id,
                "second generalization claims the same specialization; overwriting"
            );
        }
        self.parent_key_by_spec_id.insert(spec_id, key);

        let Some(child) = self.spec_by_topic.get(&topic).and_then(|m| m.get(&spec_id)) else {
            return Ok(Vec::new());
        };
        let (_, spec_ts) = Self::spec_binding(child.base())?;
        if gen_ts.is_some() && gen_ts != spec_ts {
            return Ok(Vec::new());
        }
        let child = child.clone();
        Ok(self.install(table, key, &child).into_iter().collect())
    }

    fn on_child_assembled(
        &mut self,
        table: &mut AssemblyTable,
        child_name: &str,
        assembled: &CombinedSample,
    ) -> Result<Vec<AssemblySignal>, AssemblyError> {
        let (spec_id, spec_ts) = Self::spec_binding(assembled.base())?;
        if spec_id.is_nil() {
            tracing::trace!(target: "assembly.reader", "specialization carries nil reference id");
            return Ok(Vec::new());
        }
        self.spec_by_topic
            .entry(child_name.to_string())
            .or_default()
            .insert(spec_id, assembled.clone());

        let Some(generalization) = self.gen_by_spec_id.get(&spec_id) else {
            return Ok(Vec::new());
        };
        let (topic, gen_id, gen_ts) = Self::gen_binding(generalization)?;
        if topic != child_name || gen_id != spec_id || (gen_ts.is_some() && gen_ts != spec_ts) {
            return Ok(Vec::new());
        }
        let Some(parent_key) = self.parent_key_by_spec_id.get(&spec_id).copied() else {
            return Ok(Vec::new());
        };
        Ok(self
            .install(table, parent_key, assembled)
            .into_iter()
            .collect())
    }
}

/// Large Set assembler for the collection named `set_name`.
pub struct LargeSetReader {
    set_name: String,
    /// setID -> elementID -> buffered element assembly.
    elems_by_set: HashMap<Guid, HashMap<Guid, CombinedSample>>,
    /// setID -> latest parent sample carrying the metadata.
    meta_by_set: HashMap<Guid, Record>,
    /// setID -> owning parent assembly key.
    parent_key_by_set: HashMap<Guid, AssemblyKey>,
}

impl LargeSetReader {
    pub fn new(set_name: impl Into<String>) -> Self {
        LargeSetReader {
            set_name: set_name.into(),
            elems_by_set: HashMap::new(),
            meta_by_set: HashMap::new(),
            parent_key_by_set: HashMap::new(),
        }
    }

    fn metadata<'a>(&self, parent: &'a Record) -> Result<&'a Record, AssemblyError> {
        let field = format!("{}SetMetadata", self.set_name);
        parent.struct_field(&field).ok_or_else(|| {
            AssemblyError::Contract(format!(
                "'{}' lacks set metadata field '{field}'",
                parent.type_name()
            ))
        })
    }

    fn elem_identity(elem: &Record) -> Result<(Guid, Guid, Option<Timestamp>), AssemblyError> {
        let set_id = require_guid(elem, "setID")?;
        let elem_id = require_guid(elem, "elementID")?;
        Ok((set_id, elem_id, elem.timestamp("elementTimestamp")))
    }

    /// Publish the buffered elements onto the combined sample and signal
    /// completion.
    fn emit(
        &self,
        table: &mut AssemblyTable,
        key: AssemblyKey,
        set_id: Guid,
    ) -> Option<AssemblySignal> {
        let combined = table.combined(key)?.clone();
        let mut updated = combined;
        let mut elements = Vec::new();
        if let Some(buffer) = self.elems_by_set.get(&set_id) {
            for (elem_id, child) in buffer {
                elements.push(child.base().clone());
                let scope = path_for_set_element(&self.set_name, *elem_id);
                updated = updated.embed_assembly_at(&scope, child);
            }
        }
        updated = updated.with_collection_at(&AttributePath::root(), self.set_name.as_str(), elements);
        table.replace(key, updated);
        Some(AssemblySignal::complete(key))
    }

    /// Completion gate: update marker points at a buffered element whose
    /// timestamp (when the metadata carries one) agrees.
    fn gate_passes(&self, meta: &Record, set_id: Guid) -> Result<bool, AssemblyError> {
        let Some(update_id) = optional_guid(meta, "updateElementID") else {
            return Ok(false);
        };
        let Some(child) = self.elems_by_set.get(&set_id).and_then(|m| m.get(&update_id)) else {
            return Ok(false);
        };
        let update_ts = meta.timestamp("updateElementTimestamp");
        if update_ts.is_some() {
            let (_, _, elem_ts) = Self::elem_identity(child.base())?;
            if elem_ts != update_ts {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl ReaderDecorator for LargeSetReader {
    fn on_reader_data(
        &mut self,
        table: &mut AssemblyTable,
        key: AssemblyKey,
        sample: &Record,
    ) -> Result<Vec<AssemblySignal>, AssemblyError> {
        let meta = self.metadata(sample)?.clone();
        let set_id = require_guid(&meta, "setID")?;

        // Size zero means "no content to assemble": complete immediately,
        // even for a set whose id was never assigned.
        let size_zero = meta.get("size").and_then(core_message::Value::as_f64) == Some(0.0);
        if set_id.is_nil() {
            if size_zero {
                return Ok(self.emit(table, key, set_id).into_iter().collect());
            }
            tracing::trace!(target: "assembly.reader", set = %self.set_name, "nil setID; declining");
            return Ok(Vec::new());
        }
        self.meta_by_set.insert(set_id, sample.clone());
        self.parent_key_by_set.insert(set_id, key);

        if size_zero || self.gate_passes(&meta, set_id)? {
            return Ok(self.emit(table, key, set_id).into_iter().collect());
        }
        Ok(Vec::new())
    }

    fn on_child_assembled(
        &mut self,
        table: &mut AssemblyTable,
        _child_name: &str,
        assembled: &CombinedSample,
    ) -> Result<Vec<AssemblySignal>, AssemblyError> {
        let (set_id, elem_id, _) = Self::elem_identity(assembled.base())?;
        if set_id.is_nil() || elem_id.is_nil() {
            tracing::trace!(target: "assembly.reader", set = %self.set_name, "nil element identity; declining");
            return Ok(Vec::new());
        }
        self.elems_by_set
            .entry(set_id)
            .or_default()
            .insert(elem_id, assembled.clone());

        let Some(parent) = self.meta_by_set.get(&set_id) else {
            return Ok(Vec::new());
        };
        let meta = self.metadata(parent)?.clone();
        if !self.gate_passes(&meta, set_id)? {
            return Ok(Vec::new());
        }
        let Some(key) = self.parent_key_by_set.get(&set_id).copied() else {
            return Ok(Vec::new());
        };
        Ok(self.emit(table, key, set_id).into_iter().collect())
    }
}

/// Large List assembler for the collection named `list_name`. Emission
/// orders elements by walking `nextElementID` from `startingElementID`.
pub struct LargeListReader {
    list_name: String,
    /// listID -> elementID -> buffered element assembly.
    elems_by_list: HashMap<Guid, HashMap<Guid, CombinedSample>>,
    /// listID -> latest parent sample carrying the metadata.
    meta_by_list: HashMap<Guid, Record>,
    /// listID -> owning parent assembly key.
    parent_key_by_list: HashMap<Guid, AssemblyKey>,
    /// Lists already warned about a broken chain (one-shot per listID).
    warned_broken: HashSet<Guid>,
}

impl LargeListReader {
    pub fn new(list_name: impl Into<String>) -> Self {
        LargeListReader {
            list_name: list_name.into(),
            elems_by_list: HashMap::new(),
            meta_by_list: HashMap::new(),
            parent_key_by_list: HashMap::new(),
            warned_broken: HashSet::new(),
        }
    }

    fn metadata<'a>(&self, parent: &'a Record) -> Result<&'a Record, AssemblyError> {
        let field = format!("{}ListMetadata", self.list_name);
        parent.struct_field(&field).ok_or_else(|| {
            AssemblyError::Contract(format!(
                "'{}' lacks list metadata field '{field}'",
                parent.type_name()
            ))
        })
    }

    fn elem_identity(
        elem: &Record,
    ) -> Result<(Guid, Guid, Option<Guid>, Option<Timestamp>), AssemblyError> {
        let list_id = require_guid(elem, "listID")?;
        let elem_id = require_guid(elem, "elementID")?;
        let next = optional_guid(elem, "nextElementID");
        Ok((list_id, elem_id, next, elem.timestamp("elementTimestamp")))
    }

    /// Ordered chain from `start`, following `nextElementID`, stopping at a
    /// missing link, the chain end, or a cycle. Each reachable element
    /// appears at most once.
    fn ordered_chain(&mut self, list_id: Guid, start: Option<Guid>) -> Vec<(Guid, CombinedSample)> {
        let Some(buffer) = self.elems_by_list.get(&list_id) else {
            return Vec::new();
        };
        let Some(start) = start else {
            tracing::debug!(
                target: "assembly.reader",
                list = %self.list_name,
                "no startingElementID; emitting buffered elements unordered"
            );
            return buffer.iter().map(|(id, c)| (*id, c.clone())).collect();
        };

        let mut ordered = Vec::new();
        let mut visited: HashSet<Guid> = HashSet::new();
        let mut cursor = Some(start);
        while let Some(current) = cursor {
            if !visited.insert(current) {
                break;
            }
            let Some(child) = buffer.get(&current) else {
                if visited.len() > 1 && self.warned_broken.insert(list_id) {
                    tracing::warn!(
                        target: "assembly.reader",
                        list = %self.list_name,
                        list_id = %list_id,
                        missing = %current,
                        "list chain truncated: next element never arrived"
                    );
                }
                break;
            };
            ordered.push((current, child.clone()));
            cursor = match Self::elem_identity(child.base()) {
                Ok((_, _, next, _)) => next,
                Err(_) => None,
            };
        }
        ordered
    }

    fn emit(
        &mut self,
        table: &mut AssemblyTable,
        key: AssemblyKey,
        list_id: Guid,
        start: Option<Guid>,
    ) -> Option<AssemblySignal> {
        let combined = table.combined(key)?.clone();
        let chain = self.ordered_chain(list_id, start);
        let mut updated = combined;
        let mut elements = Vec::with_capacity(chain.len());
        for (elem_id, child) in &chain {
            elements.push(child.base().clone());
            let scope = path_for_list_element(&self.list_name, *elem_id);
            updated = updated.embed_assembly_at(&scope, child);
        }
        updated = updated.with_collection_at(&AttributePath::root(), self.list_name.as_str(), elements);
        table.replace(key, updated);
        Some(AssemblySignal::complete(key))
    }

    fn gate_passes(&self, meta: &Record, list_id: Guid) -> Result<bool, AssemblyError> {
        let Some(update_id) = optional_guid(meta, "updateElementID") else {
            return Ok(false);
        };
        let Some(child) = self
            .elems_by_list
            .get(&list_id)
            .and_then(|m| m.get(&update_id))
        else {
            return Ok(false);
        };
        let update_ts = meta.timestamp("updateElementTimestamp");
        if update_ts.is_some() {
            let (_, _, _, elem_ts) = Self::elem_identity(child.base())?;
            if elem_ts != update_ts {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl ReaderDecorator for LargeListReader {
    fn on_reader_data(
        &mut self,
        table: &mut AssemblyTable,
        key: AssemblyKey,
        sample: &Record,
    ) -> Result<Vec<AssemblySignal>, AssemblyError> {
        let meta = self.metadata(sample)?.clone();
        let list_id = require_guid(&meta, "listID")?;
        let start = optional_guid(&meta, "startingElementID");

        // Size zero means "no content to assemble": complete immediately,
        // even for a list whose id was never assigned.
        let size_zero = meta.get("size").and_then(core_message::Value::as_f64) == Some(0.0);
        if list_id.is_nil() {
            if size_zero {
                return Ok(self.emit(table, key, list_id, start).into_iter().collect());
            }
            tracing::trace!(target: "assembly.reader", list = %self.list_name, "nil listID; declining");
            return Ok(Vec::new());
        }
        self.meta_by_list.insert(list_id, sample.clone());
        self.parent_key_by_list.insert(list_id, key);

        if size_zero || self.gate_passes(&meta, list_id)? {
            return Ok(self.emit(table, key, list_id, start).into_iter().collect());
        }
        Ok(Vec::new())
    }

    fn on_child_assembled(
        &mut self,
        table: &mut AssemblyTable,
        _child_name: &str,
        assembled: &CombinedSample,
    ) -> Result<Vec<AssemblySignal>, AssemblyError> {
        let (list_id, elem_id, _, _) = Self::elem_identity(assembled.base())?;
        if list_id.is_nil() || elem_id.is_nil() {
            tracing::trace!(target: "assembly.reader", list = %self.list_name, "nil element identity; declining");
            return Ok(Vec::new());
        }
        self.elems_by_list
            .entry(list_id)
            .or_default()
            .insert(elem_id, assembled.clone());

        let Some(parent) = self.meta_by_list.get(&list_id) else {
            return Ok(Vec::new());
        };
        let meta = self.metadata(parent)?.clone();
        if !self.gate_passes(&meta, list_id)? {
            return Ok(Vec::new());
        }
        let Some(key) = self.parent_key_by_list.get(&list_id).copied() else {
            return Ok(Vec::new());
        };
        let start = optional_guid(&meta, "startingElementID");
        Ok(self.emit(table, key, list_id, start).into_iter().collect())
    }
}
