//! Demo stand-in for the code-generated types layer.
//!
//! A real deployment registers prototypes emitted by the UMAA type
//! generator. The demo registers a small mission-management slice by hand: a
//! command whose objective generalizes into route/loiter specializations,
//! with the route carrying a large list of waypoints.

use core_guid::Guid;
use core_message::{Record, TypeRegistry, Value};

pub const COMMAND_TYPE: &str = "UMAA_MM_ObjectiveExecutorCommandType";
pub const ROUTE_TYPE: &str = "UMAA_MM_BaseType_RouteObjectiveType";
pub const LOITER_TYPE: &str = "UMAA_MM_BaseType_LoiterObjectiveType";
pub const WAYPOINT_ELEMENT_TYPE: &str = "UMAA_MM_BaseType_RouteObjectiveTypeWaypointsListElement";

pub fn registry() -> TypeRegistry {
    let mut reg = TypeRegistry::new();

    reg.register(
        Record::new("UMAA_MM_BaseType_ObjectiveType")
            .with("specializationTopic", Value::Text(String::new()))
            .with("specializationID", Value::Guid(Guid::NIL))
            .with("specializationTimestamp", Value::Nil)
            .with("speed", Value::Float(0.0)),
    );

    reg.register(
        Record::new(COMMAND_TYPE)
            .with("sessionID", Value::Guid(Guid::NIL))
            .with("label", Value::Text(String::new()))
            .with(
                "objective",
                Value::Struct(
                    Record::new("UMAA_MM_BaseType_ObjectiveType")
                        .with("specializationTopic", Value::Text(String::new()))
                        .with("specializationID", Value::Guid(Guid::NIL))
                        .with("specializationTimestamp", Value::Nil)
                        .with("speed", Value::Float(0.0)),
                ),
            ),
    );

    reg.register(
        Record::new(ROUTE_TYPE)
            .with("specializationReferenceID", Value::Guid(Guid::NIL))
            .with("specializationReferenceTimestamp", Value::Nil)
            .with("speed", Value::Float(0.0))
            .with(
                "waypointsListMetadata",
                Value::Struct(
                    Record::new("UMAA_Common_LargeListMetadata")
                        .with("listID", Value::Guid(Guid::NIL))
                        .with("updateElementID", Value::Nil)
                        .with("updateElementTimestamp", Value::Nil)
                        .with("startingElementID", Value::Nil)
                        .with("size", Value::Int(0)),
                ),
            ),
    );

    reg.register(
        Record::new(LOITER_TYPE)
            .with("specializationReferenceID", Value::Guid(Guid::NIL))
            .with("specializationReferenceTimestamp", Value::Nil)
            .with("duration", Value::Float(0.0)),
    );

    reg.register(
        Record::new(WAYPOINT_ELEMENT_TYPE)
            .with(
                "element",
                Value::Struct(
                    Record::new("UMAA_Common_WaypointType")
                        .with("latitude", Value::Float(0.0))
                        .with("longitude", Value::Float(0.0)),
                ),
            )
            .with("listID", Value::Guid(Guid::NIL))
            .with("elementID", Value::Guid(Guid::NIL))
            .with("elementTimestamp", Value::Nil)
            .with("nextElementID", Value::Nil),
    );

    reg
}

/// Fresh waypoint element with the given coordinates.
pub fn waypoint(registry: &TypeRegistry, latitude: f64, longitude: f64) -> Record {
    let mut elem = registry
        .instantiate(WAYPOINT_ELEMENT_TYPE)
        .expect("demo registry registers the waypoint element");
    elem.set(
        "element",
        Value::Struct(
            Record::new("UMAA_Common_WaypointType")
                .with("latitude", Value::Float(latitude))
                .with("longitude", Value::Float(longitude)),
        ),
    );
    elem
}
