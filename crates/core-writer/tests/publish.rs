//! Writer graph fan-out behavior over the loopback transport.
//!
//! Loopback delivery is synchronous, so the order in which reader listeners
//! fire is exactly the order samples hit the wire.

use core_combined::CollectionKind;
use core_guid::{AttributePath, Guid};
use core_message::{Record, Value};
use core_transport::mem::MemTransport;
use core_transport::{QosProfile, ReaderListener, StatusMask, Transport};
use core_writer::{
    GenSpecWriter, LargeListWriter, LargeSetWriter, PublishError, TopLevelWriter, WriterNode,
};
use std::sync::{Arc, Mutex};

struct OrderLog {
    label: &'static str,
    log: Arc<Mutex<Vec<&'static str>>>,
}

impl ReaderListener for OrderLog {
    fn on_data_available(&self) {
        self.log.lock().expect("order log lock").push(self.label);
    }
}

fn watch(
    bus: &MemTransport,
    topic: &str,
    label: &'static str,
    log: &Arc<Mutex<Vec<&'static str>>>,
) -> Arc<dyn core_transport::SampleReader> {
    let reader = bus.reader(topic, QosProfile::Report).expect("reader");
    reader.set_listener(
        Some(Arc::new(OrderLog {
            label,
            log: log.clone(),
        })),
        StatusMask::DATA_AVAILABLE,
    );
    reader
}

fn objective_command() -> Record {
    Record::new("UMAA_MM_ObjectiveExecutorCommandType").with(
        "objective",
        Value::Struct(
            Record::new("UMAA_MM_BaseType_ObjectiveType")
                .with("specializationTopic", Value::Text(String::new()))
                .with("specializationID", Value::Guid(Guid::NIL))
                .with("specializationTimestamp", Value::Nil),
        ),
    )
}

fn route_objective(speed: f64) -> Record {
    Record::new("UMAA_MM_BaseType_RouteObjectiveType")
        .with("specializationReferenceID", Value::Guid(Guid::NIL))
        .with("specializationReferenceTimestamp", Value::Nil)
        .with("speed", Value::Float(speed))
}

fn set_command() -> Record {
    Record::new("Cmd").with(
        "waypointsSetMetadata",
        Value::Struct(
            Record::new("SetMetadata")
                .with("setID", Value::Guid(Guid::NIL))
                .with("updateElementID", Value::Nil)
                .with("updateElementTimestamp", Value::Nil)
                .with("size", Value::Int(0)),
        ),
    )
}

fn list_command() -> Record {
    Record::new("Cmd").with(
        "waypointsListMetadata",
        Value::Struct(
            Record::new("ListMetadata")
                .with("listID", Value::Guid(Guid::NIL))
                .with("updateElementID", Value::Nil)
                .with("updateElementTimestamp", Value::Nil)
                .with("startingElementID", Value::Nil)
                .with("size", Value::Int(0)),
        ),
    )
}

fn waypoint(n: i64) -> Record {
    Record::new("CmdWaypointsListElement")
        .with("element", Value::Struct(Record::new("Waypoint").with("n", Value::Int(n))))
        .with("listID", Value::Guid(Guid::NIL))
        .with("setID", Value::Guid(Guid::NIL))
        .with("elementID", Value::Guid(Guid::NIL))
        .with("elementTimestamp", Value::Nil)
        .with("nextElementID", Value::Nil)
}

#[test]
fn genspec_publishes_specialization_before_base_and_binds() {
    let bus = MemTransport::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    let spec_reader = watch(&bus, "spec", "spec", &log);
    let cmd_reader = watch(&bus, "cmd", "cmd", &log);

    let spec_node = Arc::new(WriterNode::new(
        bus.writer("spec", QosProfile::Command).unwrap(),
    ));
    let mut root = WriterNode::new(bus.writer("cmd", QosProfile::Command).unwrap());
    root.register_decorator(
        "gen_spec",
        Box::new(
            GenSpecWriter::new(AttributePath::parse("objective"))
                .with_child("RouteObjectiveType", spec_node),
        ),
    );
    let top = TopLevelWriter::new(Arc::new(root), objective_command());

    let mut builder = top.new_builder();
    builder.use_specialization_at(&AttributePath::parse("objective"), route_objective(3.5));
    top.publish(&mut builder).expect("publish");

    assert_eq!(
        *log.lock().unwrap(),
        vec!["spec", "cmd"],
        "specialization topic must be written before the base topic"
    );

    let spec_wire = spec_reader.take().unwrap();
    let spec_id = spec_wire[0]
        .0
        .as_ref()
        .unwrap()
        .guid("specializationReferenceID")
        .expect("allocated");
    assert!(!spec_id.is_nil(), "writer allocates the unassigned id");

    let cmd_wire = cmd_reader.take().unwrap();
    let objective = cmd_wire[0].0.as_ref().unwrap().struct_field("objective").unwrap();
    assert_eq!(
        objective.get("specializationTopic").unwrap().as_text(),
        Some("RouteObjectiveType")
    );
    assert_eq!(objective.guid("specializationID"), Some(spec_id));
}

#[test]
fn republish_reuses_identifiers_and_wire_content() {
    let bus = MemTransport::new();
    let spec_reader = bus.reader("spec", QosProfile::Command).unwrap();
    let cmd_reader = bus.reader("cmd", QosProfile::Command).unwrap();

    let spec_node = Arc::new(WriterNode::new(
        bus.writer("spec", QosProfile::Command).unwrap(),
    ));
    let mut root = WriterNode::new(bus.writer("cmd", QosProfile::Command).unwrap());
    root.register_decorator(
        "gen_spec",
        Box::new(
            GenSpecWriter::new(AttributePath::parse("objective"))
                .with_child("RouteObjectiveType", spec_node),
        ),
    );
    let top = TopLevelWriter::new(Arc::new(root), objective_command());

    let mut builder = top.new_builder();
    builder.use_specialization_at(&AttributePath::parse("objective"), route_objective(2.0));
    top.publish(&mut builder).expect("first publish");
    top.publish(&mut builder).expect("second publish");

    let specs = spec_reader.take().unwrap();
    assert_eq!(specs.len(), 2);
    assert_eq!(
        specs[0].0, specs[1].0,
        "unchanged builder republish must produce identical wire content"
    );
    let cmds = cmd_reader.take().unwrap();
    assert_eq!(cmds[0].0, cmds[1].0);
}

#[test]
fn set_writer_sizes_and_marks_last_element() {
    let bus = MemTransport::new();
    let elem_reader = bus.reader("cmd::waypoints", QosProfile::Report).unwrap();
    let cmd_reader = bus.reader("cmd", QosProfile::Report).unwrap();

    let elem_node = Arc::new(WriterNode::new(
        bus.writer("cmd::waypoints", QosProfile::Report).unwrap(),
    ));
    let mut root = WriterNode::new(bus.writer("cmd", QosProfile::Report).unwrap());
    root.register_decorator(
        "waypoints",
        Box::new(LargeSetWriter::new(
            "waypoints",
            AttributePath::root(),
            elem_node,
        )),
    );
    let top = TopLevelWriter::new(Arc::new(root), set_command());

    let mut builder = top.new_builder();
    let set = builder
        .ensure_collection(&AttributePath::root(), "waypoints", CollectionKind::Set)
        .unwrap()
        .as_set_mut()
        .unwrap();
    set.insert(waypoint(1)).unwrap();
    set.insert(waypoint(2)).unwrap();
    top.publish(&mut builder).expect("publish");

    let elems = elem_reader.take().unwrap();
    assert_eq!(elems.len(), 2, "one write per element");

    let cmd = cmd_reader.take().unwrap();
    let meta = cmd[0].0.as_ref().unwrap().struct_field("waypointsSetMetadata").unwrap();
    let set_id = meta.guid("setID").expect("allocated");
    assert!(!set_id.is_nil());
    assert_eq!(meta.get("size"), Some(&Value::Int(2)));

    let last_elem = elems[1].0.as_ref().unwrap();
    assert_eq!(
        meta.guid("updateElementID"),
        last_elem.guid("elementID"),
        "update marker points at the last published element"
    );
    for (elem, _) in &elems {
        assert_eq!(elem.as_ref().unwrap().guid("setID"), Some(set_id));
    }
}

#[test]
fn empty_set_writes_no_elements_and_keeps_marker() {
    let bus = MemTransport::new();
    let elem_reader = bus.reader("cmd::waypoints", QosProfile::Report).unwrap();
    let cmd_reader = bus.reader("cmd", QosProfile::Report).unwrap();

    let elem_node = Arc::new(WriterNode::new(
        bus.writer("cmd::waypoints", QosProfile::Report).unwrap(),
    ));
    let mut root = WriterNode::new(bus.writer("cmd", QosProfile::Report).unwrap());
    root.register_decorator(
        "waypoints",
        Box::new(LargeSetWriter::new(
            "waypoints",
            AttributePath::root(),
            elem_node,
        )),
    );
    let top = TopLevelWriter::new(Arc::new(root), set_command());

    let mut builder = top.new_builder();
    builder
        .ensure_collection(&AttributePath::root(), "waypoints", CollectionKind::Set)
        .unwrap();
    top.publish(&mut builder).expect("publish");

    assert!(elem_reader.take().unwrap().is_empty(), "no element writes");
    let cmd = cmd_reader.take().unwrap();
    let meta = cmd[0].0.as_ref().unwrap().struct_field("waypointsSetMetadata").unwrap();
    assert_eq!(meta.get("size"), Some(&Value::Int(0)));
    assert_eq!(
        meta.get("updateElementID"),
        Some(&Value::Nil),
        "update marker untouched for an empty set"
    );
}

#[test]
fn list_writer_chains_elements_in_order() {
    let bus = MemTransport::new();
    let elem_reader = bus.reader("cmd::waypoints", QosProfile::Report).unwrap();
    let cmd_reader = bus.reader("cmd", QosProfile::Report).unwrap();

    let elem_node = Arc::new(WriterNode::new(
        bus.writer("cmd::waypoints", QosProfile::Report).unwrap(),
    ));
    let mut root = WriterNode::new(bus.writer("cmd", QosProfile::Report).unwrap());
    root.register_decorator(
        "waypoints",
        Box::new(LargeListWriter::new(
            "waypoints",
            AttributePath::root(),
            elem_node,
        )),
    );
    let top = TopLevelWriter::new(Arc::new(root), list_command());

    let mut builder = top.new_builder();
    let list = builder
        .ensure_collection(&AttributePath::root(), "waypoints", CollectionKind::List)
        .unwrap()
        .as_list_mut()
        .unwrap();
    list.push(waypoint(1));
    list.push(waypoint(2));
    list.push(waypoint(3));
    top.publish(&mut builder).expect("publish");

    let elems = elem_reader.take().unwrap();
    assert_eq!(elems.len(), 3);
    let records: Vec<&Record> = elems.iter().map(|(s, _)| s.as_ref().unwrap()).collect();
    let ids: Vec<Guid> = records.iter().map(|r| r.guid("elementID").unwrap()).collect();

    assert_eq!(records[0].guid("nextElementID"), Some(ids[1]));
    assert_eq!(records[1].guid("nextElementID"), Some(ids[2]));
    assert_eq!(
        records[2].get("nextElementID"),
        Some(&Value::Nil),
        "last element's next link is absent"
    );

    let cmd = cmd_reader.take().unwrap();
    let meta = cmd[0].0.as_ref().unwrap().struct_field("waypointsListMetadata").unwrap();
    assert_eq!(meta.guid("startingElementID"), Some(ids[0]));
    assert_eq!(meta.guid("updateElementID"), Some(ids[2]));
    assert_eq!(meta.get("size"), Some(&Value::Int(3)));
}

#[test]
fn single_element_list_start_equals_update() {
    let bus = MemTransport::new();
    let elem_node = Arc::new(WriterNode::new(
        bus.writer("cmd::waypoints", QosProfile::Report).unwrap(),
    ));
    let cmd_reader = bus.reader("cmd", QosProfile::Report).unwrap();
    let mut root = WriterNode::new(bus.writer("cmd", QosProfile::Report).unwrap());
    root.register_decorator(
        "waypoints",
        Box::new(LargeListWriter::new(
            "waypoints",
            AttributePath::root(),
            elem_node,
        )),
    );
    let top = TopLevelWriter::new(Arc::new(root), list_command());

    let mut builder = top.new_builder();
    builder
        .ensure_collection(&AttributePath::root(), "waypoints", CollectionKind::List)
        .unwrap()
        .as_list_mut()
        .unwrap()
        .push(waypoint(1));
    top.publish(&mut builder).expect("publish");

    let cmd = cmd_reader.take().unwrap();
    let meta = cmd[0].0.as_ref().unwrap().struct_field("waypointsListMetadata").unwrap();
    let start = meta.guid("startingElementID").expect("set");
    assert_eq!(meta.guid("updateElementID"), Some(start));
}

#[test]
fn unresolvable_specialization_topic_is_fatal() {
    let bus = MemTransport::new();
    let mut root = WriterNode::new(bus.writer("cmd", QosProfile::Command).unwrap());
    // No children attached: any specialization is unroutable.
    root.register_decorator(
        "gen_spec",
        Box::new(GenSpecWriter::new(AttributePath::parse("objective"))),
    );
    let top = TopLevelWriter::new(Arc::new(root), objective_command());

    let mut builder = top.new_builder();
    builder.use_specialization_at(&AttributePath::parse("objective"), route_objective(1.0));
    let err = top.publish(&mut builder).unwrap_err();
    assert!(matches!(err, PublishError::Configuration(_)));
}

#[test]
fn builder_without_overlay_is_a_noop_for_genspec() {
    let bus = MemTransport::new();
    let cmd_reader = bus.reader("cmd", QosProfile::Command).unwrap();
    let mut root = WriterNode::new(bus.writer("cmd", QosProfile::Command).unwrap());
    root.register_decorator(
        "gen_spec",
        Box::new(GenSpecWriter::new(AttributePath::parse("objective"))),
    );
    let top = TopLevelWriter::new(Arc::new(root), objective_command());

    let mut builder = top.new_builder();
    top.publish(&mut builder).expect("publish without overlay");
    assert_eq!(cmd_reader.take().unwrap().len(), 1, "base still written");
}
