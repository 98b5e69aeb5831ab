//! Combined sample (read side), combined builder (write side), and the
//! overlay view that fuses both into one logical message.
//!
//! A [`CombinedSample`] is the immutable result of assembling one base
//! message with its resolved specializations and collections; every mutation
//! returns a new instance, so reader decorators can swap the in-flight value
//! atomically under the node lock. A [`CombinedBuilder`] is its mutable
//! write-side mirror, holding explicit [`SetCollection`]/[`ListCollection`]
//! containers that writer decorators fan out into element publications.
//!
//! Both sides key nested state by [`AttributePath`]: overlays by the path of
//! the generalization they shadow, collections by the path of the object
//! owning the metadata field, and state nested under an individual element
//! by the synthetic scope paths from `core-guid`. [`OverlayView`] resolves
//! attribute lookups across all of it with specialization-wins-over-base
//! precedence.

mod view;

pub use view::{OverlayView, ViewValue};

use core_guid::{AttributePath, Guid};
use core_message::{Record, Value};
use std::collections::HashMap;
use thiserror::Error;

/// Kind marker for write-side collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionKind {
    Set,
    List,
}

/// Builder misuse surfaced to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuilderError {
    #[error("collection '{name}' at {path} already exists as a {existing:?}, requested {requested:?}")]
    KindMismatch {
        path: String,
        name: String,
        existing: CollectionKind,
        requested: CollectionKind,
    },
    #[error("set element of type '{type_name}' has no 'elementID' field")]
    ElementWithoutId { type_name: String },
}

type CollectionsByPath = HashMap<AttributePath, HashMap<String, Vec<Record>>>;
type OverlaysByPath = HashMap<AttributePath, Record>;

/// Immutable reader-side assembly of one logical message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CombinedSample {
    base: Record,
    collections: CollectionsByPath,
    overlays: OverlaysByPath,
}

impl CombinedSample {
    pub fn new(base: Record) -> Self {
        CombinedSample {
            base,
            collections: HashMap::new(),
            overlays: HashMap::new(),
        }
    }

    pub fn base(&self) -> &Record {
        &self.base
    }

    pub fn view(&self) -> OverlayView<'_> {
        OverlayView::rooted(&self.base, &self.collections, &self.overlays)
    }

    pub fn overlay_at(&self, path: &AttributePath) -> Option<&Record> {
        self.overlays.get(path)
    }

    pub fn collection_at(&self, path: &AttributePath, name: &str) -> Option<&[Record]> {
        self.collections
            .get(path)
            .and_then(|m| m.get(name))
            .map(Vec::as_slice)
    }

    pub fn overlays(&self) -> impl Iterator<Item = (&AttributePath, &Record)> {
        self.overlays.iter()
    }

    pub fn collections(
        &self,
    ) -> impl Iterator<Item = (&AttributePath, &HashMap<String, Vec<Record>>)> {
        self.collections.iter()
    }

    /// Root-path convenience for [`CombinedSample::add_overlay_at`].
    pub fn with_overlay(self, overlay: Record) -> Self {
        self.add_overlay_at(&AttributePath::root(), overlay)
    }

    /// Register `overlay` as the specialization shadowing the object at
    /// `path`. Returns the updated copy; an existing overlay at the same
    /// path is replaced.
    pub fn add_overlay_at(mut self, path: &AttributePath, overlay: Record) -> Self {
        self.overlays.insert(path.clone(), overlay);
        self
    }

    /// Install a resolved collection at `path` under its logical name.
    pub fn with_collection_at(
        mut self,
        path: &AttributePath,
        name: impl Into<String>,
        elements: Vec<Record>,
    ) -> Self {
        self.collections
            .entry(path.clone())
            .or_default()
            .insert(name.into(), elements);
        self
    }

    /// Import a child assembly's overlays and collections, re-rooted under
    /// `scope`. The child's base is *not* installed; callers embed it as an
    /// overlay or collection element as their concept dictates.
    pub fn embed_assembly_at(mut self, scope: &AttributePath, child: &CombinedSample) -> Self {
        for (path, overlay) in &child.overlays {
            self.overlays.insert(scope.join(path), overlay.clone());
        }
        for (path, by_name) in &child.collections {
            let slot = self.collections.entry(scope.join(path)).or_default();
            for (name, elems) in by_name {
                slot.insert(name.clone(), elems.clone());
            }
        }
        self
    }
}

/// Write-side set container: elements keyed by `elementID`, re-adding a key
/// replaces the element. Iteration follows first-insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SetCollection {
    elems: Vec<(Guid, Record)>,
}

impl SetCollection {
    pub fn new() -> Self {
        SetCollection::default()
    }

    /// Insert keyed by the element's own `elementID`. A missing field is an
    /// error; a nil id gets a fresh GUID allocated immediately so keying
    /// stays unambiguous (re-publication keeps it, preserving idempotence).
    pub fn insert(&mut self, mut elem: Record) -> Result<Guid, BuilderError> {
        let id = match elem.get("elementID") {
            Some(Value::Guid(id)) if !id.is_nil() => *id,
            Some(Value::Guid(_)) | Some(Value::Nil) => {
                let id = Guid::generate();
                elem.set("elementID", Value::Guid(id));
                id
            }
            _ => {
                return Err(BuilderError::ElementWithoutId {
                    type_name: elem.type_name().to_string(),
                });
            }
        };
        self.insert_with_key(id, elem);
        Ok(id)
    }

    pub fn insert_with_key(&mut self, key: Guid, elem: Record) {
        match self.elems.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => *slot = elem,
            None => self.elems.push((key, elem)),
        }
    }

    pub fn discard(&mut self, key: Guid) {
        self.elems.retain(|(k, _)| *k != key);
    }

    pub fn contains(&self, key: Guid) -> bool {
        self.elems.iter().any(|(k, _)| *k == key)
    }

    pub fn len(&self) -> usize {
        self.elems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elems.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.elems.iter().map(|(_, e)| e)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Record> {
        self.elems.iter_mut().map(|(_, e)| e)
    }
}

/// Write-side list container with explicit order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListCollection {
    items: Vec<Record>,
}

impl ListCollection {
    pub fn new() -> Self {
        ListCollection::default()
    }

    pub fn push(&mut self, elem: Record) {
        self.items.push(elem);
    }

    pub fn insert(&mut self, index: usize, elem: Record) {
        self.items.insert(index, elem);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.items.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Record> {
        self.items.iter_mut()
    }
}

/// A write-side collection of either kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Collection {
    Set(SetCollection),
    List(ListCollection),
}

impl Collection {
    pub fn kind(&self) -> CollectionKind {
        match self {
            Collection::Set(_) => CollectionKind::Set,
            Collection::List(_) => CollectionKind::List,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Collection::Set(s) => s.len(),
            Collection::List(l) => l.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Elements in publication order (set: insertion order of keys).
    pub fn records(&self) -> Vec<Record> {
        match self {
            Collection::Set(s) => s.iter().cloned().collect(),
            Collection::List(l) => l.iter().cloned().collect(),
        }
    }

    pub fn as_set_mut(&mut self) -> Option<&mut SetCollection> {
        match self {
            Collection::Set(s) => Some(s),
            Collection::List(_) => None,
        }
    }

    pub fn as_list_mut(&mut self) -> Option<&mut ListCollection> {
        match self {
            Collection::List(l) => Some(l),
            Collection::Set(_) => None,
        }
    }

    pub fn iter_mut(&mut self) -> Box<dyn Iterator<Item = &mut Record> + '_> {
        match self {
            Collection::Set(s) => Box::new(s.iter_mut()),
            Collection::List(l) => Box::new(l.iter_mut()),
        }
    }
}

/// Mutable writer-side message under construction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CombinedBuilder {
    base: Record,
    collections: HashMap<AttributePath, HashMap<String, Collection>>,
    overlays: OverlaysByPath,
}

impl CombinedBuilder {
    pub fn new(base: Record) -> Self {
        CombinedBuilder {
            base,
            collections: HashMap::new(),
            overlays: HashMap::new(),
        }
    }

    pub fn base(&self) -> &Record {
        &self.base
    }

    pub fn base_mut(&mut self) -> &mut Record {
        &mut self.base
    }

    /// Idempotent create-or-get of the collection `name` scoped at `path`.
    /// Asking for an existing collection with the other kind is an error.
    pub fn ensure_collection(
        &mut self,
        path: &AttributePath,
        name: &str,
        kind: CollectionKind,
    ) -> Result<&mut Collection, BuilderError> {
        let by_name = self.collections.entry(path.clone()).or_default();
        let slot = by_name.entry(name.to_string()).or_insert_with(|| match kind {
            CollectionKind::Set => Collection::Set(SetCollection::new()),
            CollectionKind::List => Collection::List(ListCollection::new()),
        });
        if slot.kind() != kind {
            return Err(BuilderError::KindMismatch {
                path: path.to_string(),
                name: name.to_string(),
                existing: slot.kind(),
                requested: kind,
            });
        }
        Ok(slot)
    }

    pub fn collection(&self, path: &AttributePath, name: &str) -> Option<&Collection> {
        self.collections.get(path).and_then(|m| m.get(name))
    }

    pub fn collection_mut(&mut self, path: &AttributePath, name: &str) -> Option<&mut Collection> {
        self.collections.get_mut(path).and_then(|m| m.get_mut(name))
    }

    /// Register the specialization for the generalization located at `path`.
    pub fn use_specialization_at(&mut self, path: &AttributePath, spec: Record) {
        self.overlays.insert(path.clone(), spec);
    }

    /// Root-path convenience for [`CombinedBuilder::use_specialization_at`].
    pub fn use_specialization(&mut self, spec: Record) {
        self.use_specialization_at(&AttributePath::root(), spec);
    }

    pub fn overlay_at(&self, path: &AttributePath) -> Option<&Record> {
        self.overlays.get(path)
    }

    pub fn overlay_at_mut(&mut self, path: &AttributePath) -> Option<&mut Record> {
        self.overlays.get_mut(path)
    }

    pub fn remove_overlay_at(&mut self, path: &AttributePath) -> Option<Record> {
        self.overlays.remove(path)
    }

    pub fn overlays(&self) -> impl Iterator<Item = (&AttributePath, &Record)> {
        self.overlays.iter()
    }

    /// Child builder rooted at `base`, carrying clones of every collection
    /// and overlay registered under `scope`, re-rooted to the child's frame.
    /// Parent and child never alias; mutating one leaves the other intact.
    pub fn spawn_child(&self, scope: &AttributePath, base: Record) -> CombinedBuilder {
        let mut child = CombinedBuilder::new(base);
        for (path, by_name) in &self.collections {
            if let Some(rest) = path.strip_prefix(scope) {
                child.collections.insert(rest, by_name.clone());
            }
        }
        for (path, overlay) in &self.overlays {
            if let Some(rest) = path.strip_prefix(scope) {
                child.overlays.insert(rest, overlay.clone());
            }
        }
        child
    }

    /// Materialize the builder as a read-side sample (collections flattened
    /// to element lists). Used for inspection and for checking round-trip
    /// equivalence; publication goes through the writer graph instead.
    pub fn snapshot(&self) -> CombinedSample {
        let mut sample = CombinedSample::new(self.base.clone());
        for (path, by_name) in &self.collections {
            for (name, coll) in by_name {
                sample = sample.with_collection_at(path, name.clone(), coll.records());
            }
        }
        for (path, overlay) in &self.overlays {
            sample = sample.add_overlay_at(path, overlay.clone());
        }
        sample
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn elem(id: u8) -> Record {
        Record::new("Elem")
            .with("elementID", Value::Guid(Guid::from_octets([id; 16])))
            .with("payload", Value::Int(id as i64))
    }

    #[test]
    fn set_collection_upserts_by_element_id() {
        let mut set = SetCollection::new();
        set.insert(elem(1)).expect("keyed element");
        set.insert(elem(2)).expect("keyed element");
        let replacement = elem(1).with("payload", Value::Int(42));
        set.insert(replacement).expect("keyed element");
        assert_eq!(set.len(), 2);
        let payloads: Vec<_> = set
            .iter()
            .map(|e| e.get("payload").cloned().unwrap())
            .collect();
        assert_eq!(payloads, vec![Value::Int(42), Value::Int(2)]);
    }

    #[test]
    fn set_collection_allocates_nil_ids() {
        let mut set = SetCollection::new();
        let a = set
            .insert(Record::new("Elem").with("elementID", Value::Guid(Guid::NIL)))
            .expect("nil id allocated");
        let b = set
            .insert(Record::new("Elem").with("elementID", Value::Guid(Guid::NIL)))
            .expect("nil id allocated");
        assert_ne!(a, b, "distinct nil-id elements must not collide");
        assert_eq!(set.len(), 2);

        let err = set.insert(Record::new("Elem")).unwrap_err();
        assert!(matches!(err, BuilderError::ElementWithoutId { .. }));
    }

    #[test]
    fn ensure_collection_is_idempotent_and_kind_checked() {
        let mut b = CombinedBuilder::new(Record::new("Cmd"));
        let root = AttributePath::root();
        b.ensure_collection(&root, "waypoints", CollectionKind::List)
            .expect("create");
        b.ensure_collection(&root, "waypoints", CollectionKind::List)
            .expect("idempotent");
        let err = b
            .ensure_collection(&root, "waypoints", CollectionKind::Set)
            .unwrap_err();
        assert!(matches!(err, BuilderError::KindMismatch { .. }));
    }

    #[test]
    fn spawn_child_re_roots_and_isolates() {
        let mut parent = CombinedBuilder::new(Record::new("Cmd"));
        let scope = AttributePath::parse("objective");
        let deep = scope.child("waypoints-meta");
        parent.use_specialization_at(&deep, Record::new("Spec"));
        parent
            .ensure_collection(&scope, "waypoints", CollectionKind::List)
            .unwrap()
            .as_list_mut()
            .unwrap()
            .push(elem(1));
        // Outside the scope: must not leak into the child.
        parent
            .ensure_collection(&AttributePath::root(), "other", CollectionKind::Set)
            .unwrap();

        let mut child = parent.spawn_child(&scope, Record::new("SpecBase"));
        assert!(child.overlay_at(&AttributePath::parse("waypoints-meta")).is_some());
        assert!(child.collection(&AttributePath::root(), "waypoints").is_some());
        assert!(child.collection(&AttributePath::root(), "other").is_none());

        // Mutating the child leaves the parent untouched.
        child
            .collection_mut(&AttributePath::root(), "waypoints")
            .unwrap()
            .as_list_mut()
            .unwrap()
            .push(elem(2));
        assert_eq!(parent.collection(&scope, "waypoints").unwrap().len(), 1);
    }

    #[test]
    fn snapshot_materializes_collections() {
        let mut b = CombinedBuilder::new(Record::new("Cmd"));
        let root = AttributePath::root();
        let list = b
            .ensure_collection(&root, "waypoints", CollectionKind::List)
            .unwrap()
            .as_list_mut()
            .unwrap();
        list.push(elem(1));
        list.push(elem(2));
        b.use_specialization(Record::new("Spec").with("speed", Value::Float(3.5)));

        let snap = b.snapshot();
        let elems = snap.collection_at(&root, "waypoints").expect("materialized");
        assert_eq!(elems.len(), 2);
        assert!(snap.overlay_at(&root).is_some());
    }

    #[test]
    fn embed_assembly_re_roots_child_state() {
        let child = CombinedSample::new(Record::new("Spec")).with_collection_at(
            &AttributePath::root(),
            "waypoints",
            vec![elem(1)],
        );
        let scope = AttributePath::parse("objective");
        let parent = CombinedSample::new(Record::new("Cmd"))
            .add_overlay_at(&scope, child.base().clone())
            .embed_assembly_at(&scope, &child);
        assert_eq!(
            parent.collection_at(&scope, "waypoints").map(|e| e.len()),
            Some(1)
        );
        assert!(parent.overlay_at(&scope).is_some());
    }
}
