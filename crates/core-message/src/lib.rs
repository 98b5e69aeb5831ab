//! Dynamic message model standing in for code-generated UMAA types.
//!
//! The engine never compiles against concrete generated structs; it moves
//! [`Record`]s: named, insertion-ordered field bags produced by the type
//! generation layer. A record knows its generated type name and its fields'
//! declaration order, which is all the classifier and the assembly graphs
//! need: concept detection is by field-name set, and navigation is by
//! [`AttributePath`] segment.
//!
//! Prototypes of every generated type are registered in a [`TypeRegistry`]
//! at application startup and handed to the engine by reference. There is no
//! process-wide registry; construction is explicit.

use core_guid::{AttributePath, Guid, Timestamp};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// A single field value. `Nil` models an optional field that is present in
/// the type but currently unset.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Guid(Guid),
    Timestamp(Timestamp),
    Struct(Record),
}

impl Value {
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn as_struct(&self) -> Option<&Record> {
        match self {
            Value::Struct(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_struct_mut(&mut self) -> Option<&mut Record> {
        match self {
            Value::Struct(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_guid(&self) -> Option<Guid> {
        match self {
            Value::Guid(g) => Some(*g),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<Timestamp> {
        match self {
            Value::Timestamp(t) => Some(*t),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }
}

/// Errors raised while navigating or mutating records by path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldError {
    #[error("type '{type_name}' has no field '{field}'")]
    MissingField { type_name: String, field: String },
    #[error("segment '{segment}' of path '{path}' is not a struct")]
    NotAStruct { path: String, segment: String },
    #[error("empty path cannot address a field")]
    EmptyPath,
}

/// One message instance: generated type name plus fields in declaration
/// order. Field lookup is a linear scan; generated UMAA types are narrow,
/// and preserving declaration order matters more than O(1) access.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    type_name: String,
    fields: Vec<(String, Value)>,
}

impl Record {
    pub fn new(type_name: impl Into<String>) -> Self {
        Record {
            type_name: type_name.into(),
            fields: Vec::new(),
        }
    }

    /// Builder-style field append, used by the type-generation layer and by
    /// tests to declare prototypes.
    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.set(name, value);
        self
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Short name: everything after the last `_` of the qualified generated
    /// name (`UMAA_MM_..._RouteObjectiveType` -> `RouteObjectiveType`).
    pub fn short_name(&self) -> &str {
        self.type_name
            .rsplit_once('_')
            .map(|(_, s)| s)
            .unwrap_or(&self.type_name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.fields.iter().any(|(n, _)| n == name)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.fields
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Upsert: replaces an existing field in place or appends a new one at
    /// the end of the declaration order.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((name, value)),
        }
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(n, _)| n.as_str())
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Guid field helper: `None` when the field is absent or `Nil`. A stored
    /// nil guid is returned as-is; "unassigned" handling belongs to callers.
    pub fn guid(&self, name: &str) -> Option<Guid> {
        match self.get(name)? {
            Value::Guid(g) => Some(*g),
            _ => None,
        }
    }

    /// Timestamp field helper: `None` when absent or unset.
    pub fn timestamp(&self, name: &str) -> Option<Timestamp> {
        match self.get(name)? {
            Value::Timestamp(t) => Some(*t),
            _ => None,
        }
    }

    pub fn struct_field(&self, name: &str) -> Option<&Record> {
        self.get(name).and_then(Value::as_struct)
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({} fields)", self.type_name, self.fields.len())
    }
}

/// Walk named attributes from `root`; the empty path yields `root` itself.
pub fn get_at_path<'a>(root: &'a Record, path: &AttributePath) -> Result<&'a Value, FieldError> {
    let mut current: Option<&'a Value> = None;
    let mut record = root;
    for (i, segment) in path.segments().iter().enumerate() {
        let value = record.get(segment).ok_or_else(|| FieldError::MissingField {
            type_name: record.type_name.clone(),
            field: segment.clone(),
        })?;
        if i + 1 < path.len() {
            record = value.as_struct().ok_or_else(|| FieldError::NotAStruct {
                path: path.to_string(),
                segment: segment.clone(),
            })?;
        }
        current = Some(value);
    }
    current.ok_or(FieldError::EmptyPath)
}

/// Like [`get_at_path`] but requires the leaf to be a struct; the empty path
/// yields `root`.
pub fn record_at_path<'a>(root: &'a Record, path: &AttributePath) -> Result<&'a Record, FieldError> {
    if path.is_root() {
        return Ok(root);
    }
    match get_at_path(root, path)? {
        Value::Struct(r) => Ok(r),
        _ => Err(FieldError::NotAStruct {
            path: path.to_string(),
            segment: path.last().unwrap_or_default().to_string(),
        }),
    }
}

/// Mutable variant of [`record_at_path`].
pub fn record_at_path_mut<'a>(
    root: &'a mut Record,
    path: &AttributePath,
) -> Result<&'a mut Record, FieldError> {
    let mut record = root;
    for segment in path.segments() {
        let type_name = record.type_name.clone();
        let value = record
            .get_mut(segment)
            .ok_or_else(|| FieldError::MissingField {
                type_name,
                field: segment.clone(),
            })?;
        record = value.as_struct_mut().ok_or_else(|| FieldError::NotAStruct {
            path: path.to_string(),
            segment: segment.clone(),
        })?;
    }
    Ok(record)
}

/// Set the leaf named by `path` to `value`. The empty path is rejected: a
/// record cannot replace itself.
pub fn set_at_path(root: &mut Record, path: &AttributePath, value: Value) -> Result<(), FieldError> {
    let leaf = path.last().ok_or(FieldError::EmptyPath)?.to_string();
    let parent_path = path.parent().unwrap_or_default();
    let parent = record_at_path_mut(root, &parent_path)?;
    parent.set(leaf, value);
    Ok(())
}

/// Prototype store for generated types, keyed by qualified type name.
/// Instantiation clones the registered prototype (a default-constructed
/// instance in generated-code terms).
#[derive(Debug, Default, Clone)]
pub struct TypeRegistry {
    prototypes: BTreeMap<String, Record>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        TypeRegistry::default()
    }

    /// Register a prototype under its own type name. Re-registration
    /// replaces the previous prototype.
    pub fn register(&mut self, prototype: Record) {
        self.prototypes
            .insert(prototype.type_name().to_string(), prototype);
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.prototypes.contains_key(type_name)
    }

    pub fn instantiate(&self, type_name: &str) -> Option<Record> {
        self.prototypes.get(type_name).cloned()
    }

    pub fn prototype(&self, type_name: &str) -> Option<&Record> {
        self.prototypes.get(type_name)
    }

    /// Registered type names in lexical order (deterministic discovery).
    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.prototypes.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.prototypes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prototypes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nested() -> Record {
        Record::new("Outer")
            .with("plain", Value::Int(7))
            .with(
                "inner",
                Value::Struct(
                    Record::new("Inner")
                        .with("speed", Value::Float(3.5))
                        .with("id", Value::Guid(Guid::from_octets([9; 16]))),
                ),
            )
    }

    #[test]
    fn upsert_preserves_declaration_order() {
        let mut r = Record::new("T")
            .with("a", Value::Int(1))
            .with("b", Value::Int(2));
        r.set("a", Value::Int(10));
        r.set("c", Value::Int(3));
        let names: Vec<_> = r.field_names().collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(r.get("a"), Some(&Value::Int(10)));
    }

    #[test]
    fn short_name_strips_qualification() {
        let r = Record::new("UMAA_MM_Objective_RouteObjectiveType");
        assert_eq!(r.short_name(), "RouteObjectiveType");
        assert_eq!(Record::new("Bare").short_name(), "Bare");
    }

    #[test]
    fn path_get_walks_structs() {
        let r = nested();
        let v = get_at_path(&r, &AttributePath::parse("inner.speed")).expect("path resolves");
        assert_eq!(v.as_f64(), Some(3.5));
        let err = get_at_path(&r, &AttributePath::parse("inner.missing")).unwrap_err();
        assert!(matches!(err, FieldError::MissingField { .. }));
        let err = get_at_path(&r, &AttributePath::parse("plain.deeper")).unwrap_err();
        assert!(matches!(err, FieldError::NotAStruct { .. }));
    }

    #[test]
    fn path_set_replaces_leaf() {
        let mut r = nested();
        set_at_path(&mut r, &AttributePath::parse("inner.speed"), Value::Float(9.0))
            .expect("set resolves");
        assert_eq!(
            get_at_path(&r, &AttributePath::parse("inner.speed"))
                .unwrap()
                .as_f64(),
            Some(9.0)
        );
        let err = set_at_path(&mut r, &AttributePath::root(), Value::Nil).unwrap_err();
        assert_eq!(err, FieldError::EmptyPath);
    }

    #[test]
    fn record_at_path_root_is_identity() {
        let r = nested();
        assert_eq!(record_at_path(&r, &AttributePath::root()).unwrap(), &r);
        let inner = record_at_path(&r, &AttributePath::parse("inner")).unwrap();
        assert_eq!(inner.type_name(), "Inner");
    }

    #[test]
    fn guid_helper_passes_nil_through() {
        let r = Record::new("T")
            .with("id", Value::Guid(Guid::NIL))
            .with("unset", Value::Nil);
        assert_eq!(r.guid("id"), Some(Guid::NIL));
        assert_eq!(r.guid("unset"), None);
        assert_eq!(r.guid("absent"), None);
    }

    #[test]
    fn registry_instantiates_fresh_clones() {
        let mut reg = TypeRegistry::new();
        reg.register(nested());
        let mut a = reg.instantiate("Outer").expect("registered");
        a.set("plain", Value::Int(99));
        let b = reg.instantiate("Outer").expect("registered");
        assert_eq!(b.get("plain"), Some(&Value::Int(7)), "prototype untouched");
        let names: Vec<_> = reg.type_names().collect();
        assert_eq!(names, vec!["Outer"]);
    }
}
