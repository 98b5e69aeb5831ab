//! Classification-driven graph construction.
//!
//! [`GraphFactory`] turns a registered root type into a ready-to-use reader
//! or writer graph: it classifies the type's prototype, registers the
//! decorator matching each discovered concept, resolves element and
//! specialization types by naming rule, wires a child node per child topic,
//! and recurses into every child type so nesting to any depth falls out of
//! the same walk. Wiring problems (unknown types, unresolvable element
//! types, invalid specialization sets) are configuration errors that abort
//! construction.
//!
//! Reader-side set/list decorators consume metadata at the top level of
//! their node's own sample; metadata nested under plain (non-concept)
//! struct fields is reported and skipped rather than silently mis-wired.
//! Nesting under specializations and elements is fully supported, since
//! those become their own nodes.

use core_classify::{
    ClassifyError, Concept, classify, large_list_base, large_set_base, resolve_list_element_type,
    resolve_set_element_type, specializations_of, topic_from_type,
};
use core_guid::AttributePath;
use core_message::{TypeRegistry, record_at_path};
use core_pool::{Priority, TaskPool};
use core_reader::{GenSpecReader, LargeListReader, LargeSetReader, ReaderAdapter, ReaderNode};
use core_transport::{FilterExpression, QosProfile, Transport, TransportError};
use core_writer::{
    GenSpecWriter, LargeListWriter, LargeSetWriter, TopLevelWriter, WriterAdapter, WriterNode,
};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GraphError {
    #[error("type '{0}' is not registered")]
    UnknownType(String),
    #[error(transparent)]
    Classify(#[from] ClassifyError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Tunables shared by every graph this factory builds.
#[derive(Debug, Clone, Copy)]
pub struct GraphOptions {
    /// Per-node bound on in-flight assemblies (oldest evicted beyond it).
    pub max_in_flight: usize,
    /// Priority at which consumer callbacks are dispatched.
    pub dispatch_priority: Priority,
}

impl Default for GraphOptions {
    fn default() -> Self {
        GraphOptions {
            max_in_flight: 1024,
            dispatch_priority: Priority::Medium,
        }
    }
}

/// Builds assembly graphs for registered types over one transport.
pub struct GraphFactory {
    transport: Arc<dyn Transport>,
    registry: Arc<TypeRegistry>,
    pool: Arc<dyn TaskPool>,
    options: GraphOptions,
}

/// One concept discovered at a path, with everything needed to wire it.
enum Wiring {
    Set {
        name: String,
        attr_path: AttributePath,
        element_type: String,
    },
    List {
        name: String,
        attr_path: AttributePath,
        element_type: String,
    },
    GenSpec {
        role: String,
        attr_path: AttributePath,
        /// short topic name -> qualified specialization type.
        specializations: Vec<(String, String)>,
    },
}

impl GraphFactory {
    pub fn new(
        transport: Arc<dyn Transport>,
        registry: Arc<TypeRegistry>,
        pool: Arc<dyn TaskPool>,
        options: GraphOptions,
    ) -> Self {
        GraphFactory {
            transport,
            registry,
            pool,
            options,
        }
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    /// Assemble inbound samples of `root_type` from all of its topics.
    pub fn reader_graph(
        &self,
        root_type: &str,
        profile: QosProfile,
    ) -> Result<ReaderAdapter, GraphError> {
        let topic = topic_from_type(root_type);
        let reader = self.transport.reader(&topic, profile)?;
        self.finish_reader_graph(root_type, profile, reader)
    }

    /// Like [`GraphFactory::reader_graph`] with the root subscription bound
    /// to a content filter. Child element/spec readers stay unfiltered.
    pub fn filtered_reader_graph(
        &self,
        root_type: &str,
        filter: FilterExpression,
        profile: QosProfile,
    ) -> Result<ReaderAdapter, GraphError> {
        let topic = topic_from_type(root_type);
        let reader = self.transport.filtered_reader(&topic, filter, profile)?;
        self.finish_reader_graph(root_type, profile, reader)
    }

    fn finish_reader_graph(
        &self,
        root_type: &str,
        profile: QosProfile,
        reader: Arc<dyn core_transport::SampleReader>,
    ) -> Result<ReaderAdapter, GraphError> {
        let node = ReaderNode::new(reader, self.options.max_in_flight);
        let mut nodes = vec![node.clone()];
        self.augment_reader_node(&node, root_type, profile, &mut nodes)?;
        let adapter = ReaderAdapter::new(
            node,
            self.pool.clone(),
            self.options.dispatch_priority,
        );
        // Listeners last: every parent hook is in place before traffic.
        for n in &nodes {
            n.start();
        }
        tracing::info!(
            target: "engine.graph",
            root = root_type,
            nodes = nodes.len(),
            "reader graph ready"
        );
        Ok(adapter)
    }

    /// Fan outbound builders of `root_type` across its topics.
    pub fn writer_graph(
        &self,
        root_type: &str,
        profile: QosProfile,
    ) -> Result<WriterAdapter, GraphError> {
        let root = self.build_writer_node(root_type, profile)?;
        let prototype = self
            .registry
            .instantiate(root_type)
            .ok_or_else(|| GraphError::UnknownType(root_type.to_string()))?;
        let top = TopLevelWriter::new(root, prototype);
        let adapter = WriterAdapter::new(top, self.pool.clone(), self.options.dispatch_priority);
        tracing::info!(target: "engine.graph", root = root_type, "writer graph ready");
        Ok(adapter)
    }

    /// Concepts of `type_name` that need graph wiring, in registration
    /// order: sets, lists, then generalizations.
    fn wirings_for(&self, type_name: &str) -> Result<Vec<Wiring>, GraphError> {
        let prototype = self
            .registry
            .prototype(type_name)
            .ok_or_else(|| GraphError::UnknownType(type_name.to_string()))?;
        let classified = classify(prototype);

        let mut sets = Vec::new();
        let mut lists = Vec::new();
        let mut gens = Vec::new();
        for (path, info) in &classified {
            if info.satisfies(Concept::LargeSetMetadata)
                && let Some(field) = path.last()
                && let Some(base) = large_set_base(field)
            {
                let parent_path = path.parent().unwrap_or_default();
                let parent_type = record_at_path(prototype, &parent_path)
                    .map(|r| r.type_name().to_string())
                    .unwrap_or_else(|_| type_name.to_string());
                sets.push(Wiring::Set {
                    name: base.to_string(),
                    attr_path: parent_path,
                    element_type: resolve_set_element_type(&parent_type, base, &self.registry)?,
                });
            }
            if info.satisfies(Concept::LargeListMetadata)
                && let Some(field) = path.last()
                && let Some(base) = large_list_base(field)
            {
                let parent_path = path.parent().unwrap_or_default();
                let parent_type = record_at_path(prototype, &parent_path)
                    .map(|r| r.type_name().to_string())
                    .unwrap_or_else(|_| type_name.to_string());
                lists.push(Wiring::List {
                    name: base.to_string(),
                    attr_path: parent_path,
                    element_type: resolve_list_element_type(&parent_type, base, &self.registry)?,
                });
            }
            if info.satisfies(Concept::Generalization) {
                let specializations = specializations_of(&info.type_name, &self.registry)?
                    .into_iter()
                    .collect();
                let role = if path.is_root() {
                    "gen_spec".to_string()
                } else {
                    format!("gen_spec:{path}")
                };
                gens.push(Wiring::GenSpec {
                    role,
                    attr_path: path.clone(),
                    specializations,
                });
            }
        }
        sets.extend(lists);
        sets.extend(gens);
        Ok(sets)
    }

    fn augment_reader_node(
        &self,
        node: &Arc<ReaderNode>,
        type_name: &str,
        profile: QosProfile,
        nodes: &mut Vec<Arc<ReaderNode>>,
    ) -> Result<(), GraphError> {
        for wiring in self.wirings_for(type_name)? {
            match wiring {
                Wiring::Set {
                    name,
                    attr_path,
                    element_type,
                } => {
                    if !attr_path.is_root() {
                        tracing::warn!(
                            target: "engine.graph",
                            set = %name,
                            path = %attr_path,
                            "set metadata nested under a plain field is not assembled"
                        );
                        continue;
                    }
                    node.register_decorator(&name, Box::new(LargeSetReader::new(&name)), true);
                    let child = self.child_reader(&element_type, profile, nodes)?;
                    node.attach_child(&name, &topic_from_type(&element_type), &child);
                }
                Wiring::List {
                    name,
                    attr_path,
                    element_type,
                } => {
                    if !attr_path.is_root() {
                        tracing::warn!(
                            target: "engine.graph",
                            list = %name,
                            path = %attr_path,
                            "list metadata nested under a plain field is not assembled"
                        );
                        continue;
                    }
                    node.register_decorator(&name, Box::new(LargeListReader::new(&name)), true);
                    let child = self.child_reader(&element_type, profile, nodes)?;
                    node.attach_child(&name, &topic_from_type(&element_type), &child);
                }
                Wiring::GenSpec {
                    role,
                    attr_path,
                    specializations,
                } => {
                    node.register_decorator(
                        &role,
                        Box::new(GenSpecReader::new(attr_path)),
                        true,
                    );
                    for (short, spec_type) in specializations {
                        let child = self.child_reader(&spec_type, profile, nodes)?;
                        node.attach_child(&role, &short, &child);
                    }
                }
            }
        }
        Ok(())
    }

    fn child_reader(
        &self,
        type_name: &str,
        profile: QosProfile,
        nodes: &mut Vec<Arc<ReaderNode>>,
    ) -> Result<Arc<ReaderNode>, GraphError> {
        let reader = self.transport.reader(&topic_from_type(type_name), profile)?;
        let child = ReaderNode::new(reader, self.options.max_in_flight);
        nodes.push(child.clone());
        self.augment_reader_node(&child, type_name, profile, nodes)?;
        Ok(child)
    }

    fn build_writer_node(
        &self,
        type_name: &str,
        profile: QosProfile,
    ) -> Result<Arc<WriterNode>, GraphError> {
        let writer = self.transport.writer(&topic_from_type(type_name), profile)?;
        let mut node = WriterNode::new(writer);
        for wiring in self.wirings_for(type_name)? {
            match wiring {
                Wiring::Set {
                    name,
                    attr_path,
                    element_type,
                } => {
                    let child = self.build_writer_node(&element_type, profile)?;
                    let role = name.clone();
                    node.register_decorator(
                        &role,
                        Box::new(LargeSetWriter::new(name, attr_path, child)),
                    );
                }
                Wiring::List {
                    name,
                    attr_path,
                    element_type,
                } => {
                    let child = self.build_writer_node(&element_type, profile)?;
                    let role = name.clone();
                    node.register_decorator(
                        &role,
                        Box::new(LargeListWriter::new(name, attr_path, child)),
                    );
                }
                Wiring::GenSpec {
                    role,
                    attr_path,
                    specializations,
                } => {
                    let mut decorator = GenSpecWriter::new(attr_path);
                    for (short, spec_type) in specializations {
                        let child = self.build_writer_node(&spec_type, profile)?;
                        decorator = decorator.with_child(&short, child);
                    }
                    node.register_decorator(&role, Box::new(decorator));
                }
            }
        }
        Ok(Arc::new(node))
    }
}
