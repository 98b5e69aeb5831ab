//! Specialization-wins-over-base attribute lookup.
//!
//! Resolution order for a name `n` at the view's path `p`:
//! 1. an overlay registered at `p + [n]` -> a view scoped there;
//! 2. the overlay covering `p` itself, if it carries `n`;
//! 3. the base object's `n`;
//! 4. a collection named `n` scoped at `p`;
//! 5. lookup fails.
//!
//! Struct-valued hits from rules 2 and 3 come back as *scoped views* rather
//! than raw records so that deeper overlays (rule 1) and path-scoped
//! collections (rule 4) keep resolving beneath them; scalars come back as
//! plain values.

use core_guid::AttributePath;
use core_message::{Record, Value};
use std::collections::HashMap;

type CollectionsByPath = HashMap<AttributePath, HashMap<String, Vec<Record>>>;
type OverlaysByPath = HashMap<AttributePath, Record>;

/// Read-only projection over an assembled or in-progress message, rooted at
/// an attribute path.
#[derive(Debug, Clone)]
pub struct OverlayView<'a> {
    base: Option<&'a Record>,
    collections: &'a CollectionsByPath,
    overlays: &'a OverlaysByPath,
    path: AttributePath,
}

/// One lookup result.
#[derive(Debug, Clone)]
pub enum ViewValue<'a> {
    Value(&'a Value),
    View(OverlayView<'a>),
    Collection(&'a [Record]),
}

impl<'a> ViewValue<'a> {
    pub fn as_value(&self) -> Option<&'a Value> {
        match self {
            ViewValue::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_view(self) -> Option<OverlayView<'a>> {
        match self {
            ViewValue::View(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_collection(&self) -> Option<&'a [Record]> {
        match self {
            ViewValue::Collection(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.as_value().and_then(Value::as_f64)
    }

    pub fn as_guid(&self) -> Option<core_guid::Guid> {
        self.as_value().and_then(Value::as_guid)
    }

    pub fn as_text(&self) -> Option<&'a str> {
        self.as_value().and_then(Value::as_text)
    }
}

impl<'a> OverlayView<'a> {
    pub(crate) fn rooted(
        base: &'a Record,
        collections: &'a CollectionsByPath,
        overlays: &'a OverlaysByPath,
    ) -> Self {
        OverlayView {
            base: Some(base),
            collections,
            overlays,
            path: AttributePath::root(),
        }
    }

    /// The path this view is scoped to.
    pub fn path(&self) -> &AttributePath {
        &self.path
    }

    /// Attribute lookup with overlay precedence.
    pub fn get(&self, name: &str) -> Option<ViewValue<'a>> {
        let sub = self.path.child(name);

        // 1. Nested overlay registered for this hop.
        if self.overlays.contains_key(&sub) {
            return Some(ViewValue::View(OverlayView {
                base: self.base.and_then(|b| b.struct_field(name)),
                collections: self.collections,
                overlays: self.overlays,
                path: sub,
            }));
        }

        // 2. Overlay covering the current path wins over base.
        if let Some(overlay) = self.overlays.get(&self.path)
            && let Some(v) = overlay.get(name)
        {
            return Some(self.wrap(sub, v));
        }

        // 3. Base attribute.
        if let Some(base) = self.base
            && let Some(v) = base.get(name)
        {
            return Some(self.wrap(sub, v));
        }

        // 4. Collection scoped at the current path.
        if let Some(list) = self.collections.get(&self.path).and_then(|m| m.get(name)) {
            return Some(ViewValue::Collection(list.as_slice()));
        }

        None
    }

    /// Walk a dotted path through nested views; fails where any hop fails
    /// or a scalar is hit before the final segment.
    pub fn resolve(&self, path: &AttributePath) -> Option<ViewValue<'a>> {
        let mut segments = path.segments().iter();
        let Some(first) = segments.next() else {
            return None;
        };
        let mut current = self.get(first)?;
        for segment in segments {
            current = current.as_view()?.get(segment)?;
        }
        Some(current)
    }

    fn wrap(&self, sub: AttributePath, value: &'a Value) -> ViewValue<'a> {
        match value {
            Value::Struct(record) => ViewValue::View(OverlayView {
                base: Some(record),
                collections: self.collections,
                overlays: self.overlays,
                path: sub,
            }),
            other => ViewValue::Value(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CombinedSample;
    use core_guid::Guid;

    fn sample() -> CombinedSample {
        let base = Record::new("Cmd")
            .with("name", Value::Text("base-name".into()))
            .with("only_base", Value::Int(1))
            .with(
                "objective",
                Value::Struct(
                    Record::new("Objective")
                        .with("speed", Value::Float(1.0))
                        .with("depth", Value::Float(10.0)),
                ),
            );
        CombinedSample::new(base)
    }

    #[test]
    fn base_attributes_resolve_without_overlay() {
        let s = sample();
        let v = s.view();
        assert_eq!(v.get("name").unwrap().as_text(), Some("base-name"));
        assert!(v.get("missing").is_none());
    }

    #[test]
    fn overlay_at_current_path_shadows_base() {
        let s = sample().with_overlay(
            Record::new("Spec")
                .with("name", Value::Text("spec-name".into()))
                .with("only_spec", Value::Int(2)),
        );
        let v = s.view();
        assert_eq!(v.get("name").unwrap().as_text(), Some("spec-name"));
        // Names only the base defines still resolve.
        assert_eq!(
            v.get("only_base").unwrap().as_value(),
            Some(&Value::Int(1))
        );
        assert_eq!(v.get("only_spec").unwrap().as_value(), Some(&Value::Int(2)));
    }

    #[test]
    fn nested_overlay_scopes_a_view() {
        let path = AttributePath::parse("objective");
        let s = sample().add_overlay_at(
            &path,
            Record::new("RouteObjective").with("speed", Value::Float(3.5)),
        );
        let v = s.view();
        let objective = v.get("objective").unwrap().as_view().expect("scoped view");
        // Overlay wins on shared names.
        assert_eq!(objective.get("speed").unwrap().as_f64(), Some(3.5));
        // Base fills names the overlay lacks.
        assert_eq!(objective.get("depth").unwrap().as_f64(), Some(10.0));
    }

    #[test]
    fn collections_resolve_after_attributes() {
        let path = AttributePath::root();
        let elems = vec![Record::new("Elem").with("elementID", Value::Guid(Guid::NIL))];
        let s = sample().with_collection_at(&path, "waypoints", elems);
        let v = s.view();
        let coll = v.get("waypoints").unwrap();
        assert_eq!(coll.as_collection().map(|c| c.len()), Some(1));
    }

    #[test]
    fn collection_under_overlay_path_resolves_through_view() {
        // A specialization that itself carries a collection: the list is
        // keyed under the overlay's path and must be reachable from the
        // root view through the scoped hop.
        let path = AttributePath::parse("objective");
        let s = sample()
            .add_overlay_at(&path, Record::new("RouteObjective"))
            .with_collection_at(
                &path,
                "waypoints",
                vec![Record::new("Elem"), Record::new("Elem")],
            );
        let v = s.view();
        let objective = v.get("objective").unwrap().as_view().expect("scoped view");
        assert_eq!(
            objective.get("waypoints").unwrap().as_collection().map(<[Record]>::len),
            Some(2)
        );
        // And the dotted resolver walks the same chain.
        let via_resolve = v
            .resolve(&AttributePath::parse("objective.waypoints"))
            .unwrap();
        assert_eq!(via_resolve.as_collection().map(<[Record]>::len), Some(2));
    }

    #[test]
    fn struct_base_attribute_stays_scoped() {
        let s = sample();
        let v = s.view();
        let objective = v.get("objective").unwrap().as_view().expect("struct hop");
        assert_eq!(objective.get("speed").unwrap().as_f64(), Some(1.0));
        assert_eq!(objective.path().to_string(), "objective");
    }
}
