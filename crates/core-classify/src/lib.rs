//! UMAA concept detection over generated message types.
//!
//! A type participates in a multi-topic pattern purely by *shape*: carrying
//! `{specializationTopic, specializationID, specializationTimestamp}` makes a
//! field a generalization binding, `{setID, updateElementID, ...}` makes it
//! large-set metadata, and so on. [`classify`] walks a prototype record
//! breadth-first and labels every nested path with the concepts whose
//! required attribute set it satisfies, keeping only the most specific when
//! one matched concept's attributes are a subset of another's.
//!
//! Specializations are discovered by naming convention rather than by any
//! type hierarchy: a specialization of `..._ObjectiveType` is any registered
//! type whose qualified name ends in `ObjectiveType` with a non-underscore
//! character in front (`UMAA_.._RouteObjectiveType` qualifies, the
//! generalization itself does not). The relationship is data, carried by the
//! generalization's binding fields; no inheritance is modeled.

use core_guid::AttributePath;
use core_message::{Record, TypeRegistry, Value};
use std::collections::{BTreeMap, VecDeque};
use thiserror::Error;

/// Closed set of UMAA multi-topic concepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Concept {
    Generalization,
    Specialization,
    LargeSetMetadata,
    LargeSetElement,
    LargeListMetadata,
    LargeListElement,
}

impl Concept {
    pub const ALL: [Concept; 6] = [
        Concept::Generalization,
        Concept::Specialization,
        Concept::LargeSetMetadata,
        Concept::LargeSetElement,
        Concept::LargeListMetadata,
        Concept::LargeListElement,
    ];

    /// Attribute names an object must possess to satisfy the concept.
    pub fn required_attrs(&self) -> &'static [&'static str] {
        match self {
            Concept::Generalization => &[
                "specializationTopic",
                "specializationID",
                "specializationTimestamp",
            ],
            Concept::Specialization => &[
                "specializationReferenceID",
                "specializationReferenceTimestamp",
            ],
            Concept::LargeSetMetadata => &["setID", "updateElementID", "updateElementTimestamp", "size"],
            Concept::LargeSetElement => &["element", "setID", "elementID", "elementTimestamp"],
            Concept::LargeListMetadata => &[
                "listID",
                "updateElementID",
                "updateElementTimestamp",
                "startingElementID",
                "size",
            ],
            Concept::LargeListElement => &[
                "element",
                "listID",
                "elementID",
                "elementTimestamp",
                "nextElementID",
            ],
        }
    }

    /// Shape test: does `record` carry every required attribute?
    pub fn matches(&self, record: &Record) -> bool {
        self.required_attrs().iter().all(|a| record.has(a))
    }
}

/// Classification result for one reachable path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldInfo {
    /// Most-specific concepts satisfied at this path (non-empty).
    pub concepts: Vec<Concept>,
    /// Generated type name of the object at this path, for later
    /// instantiation through the registry.
    pub type_name: String,
}

impl FieldInfo {
    pub fn satisfies(&self, concept: Concept) -> bool {
        self.concepts.contains(&concept)
    }
}

/// Fatal wiring problems surfaced during concept discovery.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClassifyError {
    #[error("type '{0}' is not registered")]
    UnknownType(String),
    #[error("type '{0}' does not satisfy the generalization concept")]
    NotAGeneralization(String),
    #[error("type '{0}' matches the specialization naming rule but lacks the specialization attributes")]
    NotASpecialization(String),
    #[error("specialization short name '{short}' is claimed by both '{first}' and '{second}'")]
    DuplicateSpecialization {
        short: String,
        first: String,
        second: String,
    },
    #[error("could not resolve element type '{candidate}' in the registered types")]
    UnresolvedElementType { candidate: String },
}

/// Breadth-first walk over every struct reachable from `root` through public
/// fields, labeling each path whose object satisfies at least one concept.
/// Scalars, text, and unset optionals are skipped. When two matched
/// concepts' attribute sets nest, only the more specific survives.
pub fn classify(root: &Record) -> BTreeMap<AttributePath, FieldInfo> {
    let mut out = BTreeMap::new();
    let mut queue: VecDeque<(AttributePath, &Record)> = VecDeque::new();
    queue.push_back((AttributePath::root(), root));

    while let Some((path, record)) = queue.pop_front() {
        let matched: Vec<Concept> = Concept::ALL
            .iter()
            .copied()
            .filter(|c| c.matches(record))
            .collect();
        if !matched.is_empty() {
            let winners: Vec<Concept> = matched
                .iter()
                .copied()
                .filter(|c| {
                    !matched
                        .iter()
                        .any(|other| other != c && is_attr_subset(*c, *other))
                })
                .collect();
            out.insert(
                path.clone(),
                FieldInfo {
                    concepts: winners,
                    type_name: record.type_name().to_string(),
                },
            );
        }

        for (name, value) in record.fields() {
            if let Value::Struct(child) = value {
                queue.push_back((path.child(name), child));
            }
        }
    }

    out
}

fn is_attr_subset(a: Concept, b: Concept) -> bool {
    let b_attrs = b.required_attrs();
    a.required_attrs().iter().all(|x| b_attrs.contains(x))
}

/// Discover every specialization of `generalization_type` among the
/// registered types: qualified names `UMAA_<..>{short}` where the character
/// before the preserved suffix is not an underscore. Returns short name →
/// qualified type name. Duplicate short names and rule matches that lack the
/// specialization attributes are fatal configuration errors.
pub fn specializations_of(
    generalization_type: &str,
    registry: &TypeRegistry,
) -> Result<BTreeMap<String, String>, ClassifyError> {
    let proto = registry
        .prototype(generalization_type)
        .ok_or_else(|| ClassifyError::UnknownType(generalization_type.to_string()))?;
    if !Concept::Generalization.matches(proto) {
        return Err(ClassifyError::NotAGeneralization(
            generalization_type.to_string(),
        ));
    }

    let suffix = short_name(generalization_type);
    let rule = regex::Regex::new(&format!("^UMAA_.*[^_]{}$", regex::escape(suffix)))
        .expect("naming rule regex is static");

    let mut out: BTreeMap<String, String> = BTreeMap::new();
    for name in registry.type_names() {
        if !rule.is_match(name) {
            continue;
        }
        let proto = registry.prototype(name).expect("name comes from registry");
        if !Concept::Specialization.matches(proto) {
            return Err(ClassifyError::NotASpecialization(name.to_string()));
        }
        let short = short_name(name).to_string();
        if let Some(first) = out.get(&short) {
            return Err(ClassifyError::DuplicateSpecialization {
                short,
                first: first.clone(),
                second: name.to_string(),
            });
        }
        tracing::debug!(
            target: "engine.classify",
            generalization = generalization_type,
            specialization = name,
            "discovered specialization"
        );
        out.insert(short, name.to_string());
    }
    Ok(out)
}

/// `"waypointsSetMetadata"` -> `Some("waypoints")`.
pub fn large_set_base(field_name: &str) -> Option<&str> {
    field_name.strip_suffix("SetMetadata")
}

/// `"waypointsListMetadata"` -> `Some("waypoints")`.
pub fn large_list_base(field_name: &str) -> Option<&str> {
    field_name.strip_suffix("ListMetadata")
}

/// Resolve the element type for a large set by naming rule:
/// `<ParentTypeName><CapitalizedBase>SetElement`, looked up among the
/// registered types.
pub fn resolve_set_element_type(
    parent_type: &str,
    attr_base: &str,
    registry: &TypeRegistry,
) -> Result<String, ClassifyError> {
    resolve_element_type(parent_type, attr_base, "SetElement", registry)
}

/// List counterpart of [`resolve_set_element_type`].
pub fn resolve_list_element_type(
    parent_type: &str,
    attr_base: &str,
    registry: &TypeRegistry,
) -> Result<String, ClassifyError> {
    resolve_element_type(parent_type, attr_base, "ListElement", registry)
}

fn resolve_element_type(
    parent_type: &str,
    attr_base: &str,
    suffix: &str,
    registry: &TypeRegistry,
) -> Result<String, ClassifyError> {
    let candidate = format!("{parent_type}{}{suffix}", capitalize(attr_base));
    if registry.contains(&candidate) {
        Ok(candidate)
    } else {
        Err(ClassifyError::UnresolvedElementType { candidate })
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

fn short_name(type_name: &str) -> &str {
    type_name
        .rsplit_once('_')
        .map(|(_, s)| s)
        .unwrap_or(type_name)
}

/// Topic name for a generated type: underscores become `::` scoping.
pub fn topic_from_type(type_name: &str) -> String {
    type_name.replace('_', "::")
}
