//! Writer-side fan-out graph.
//!
//! A [`WriterNode`] owns one transport writer and an ordered list of
//! decorators. `publish` runs every decorator in registration order (each
//! fans its children out first, then mutates the builder's base so its
//! metadata or generalization binding points at what was just written) and
//! finally writes the base sample itself. Children therefore always hit
//! the wire before the base, which is what makes the base's update markers
//! an atomic "the new version is fully published" signal for readers.
//!
//! Registration order is significant when two decorators touch the same
//! base field: a decorator whose output a later one depends on must be
//! registered first.
//!
//! Decorator wiring (children, paths, topic remaps) is fixed at
//! construction; publish takes `&self` throughout, so concurrent publishes
//! on one node interleave at the transport exactly as the contract allows
//! (callers serialize when they need ordering).

mod adapter;
mod decorators;

pub use adapter::WriterAdapter;
pub use decorators::{GenSpecWriter, LargeListWriter, LargeSetWriter};

use core_combined::{BuilderError, CombinedBuilder};
use core_message::{FieldError, Record};
use core_transport::{SampleWriter, TransportError};
use std::sync::Arc;
use thiserror::Error;

/// Fatal publish-side failures. Children already written stay written; the
/// engine neither rolls back nor retries.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PublishError {
    /// Graph wiring does not support what the builder asks for.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// A sample or metadata object lacks a field its concept requires.
    #[error("contract violation: {0}")]
    Contract(String),
    #[error(transparent)]
    Field(#[from] FieldError),
    #[error(transparent)]
    Builder(#[from] BuilderError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// One UMAA concept's writer-side fan-out. Implementations publish child
/// samples through their attached child nodes and update the builder's base
/// in place; the owning node writes the base afterwards.
pub trait WriterDecorator: Send + Sync {
    fn publish(&self, builder: &mut CombinedBuilder) -> Result<(), PublishError>;

    /// Child nodes owned by this decorator, for whole-tree traversal.
    fn children(&self) -> Vec<&Arc<WriterNode>> {
        Vec::new()
    }
}

/// Graph node owning one transport writer plus its concept decorators.
pub struct WriterNode {
    writer: Arc<dyn SampleWriter>,
    decorators: Vec<(String, Box<dyn WriterDecorator>)>,
    write_base: bool,
}

impl WriterNode {
    pub fn new(writer: Arc<dyn SampleWriter>) -> Self {
        WriterNode {
            writer,
            decorators: Vec::new(),
            write_base: true,
        }
    }

    /// Pure meta-coordinator: run decorators but never write a base sample.
    pub fn set_write_base(&mut self, write_base: bool) {
        self.write_base = write_base;
    }

    /// Attach a decorator under `role`, after any registered earlier.
    pub fn register_decorator(&mut self, role: &str, decorator: Box<dyn WriterDecorator>) {
        self.decorators.push((role.to_string(), decorator));
    }

    pub fn topic_name(&self) -> &str {
        self.writer.topic_name()
    }

    pub fn writer(&self) -> &Arc<dyn SampleWriter> {
        &self.writer
    }

    /// Fan out children, bind base fields, then write the base.
    pub fn publish(&self, builder: &mut CombinedBuilder) -> Result<(), PublishError> {
        for (role, decorator) in &self.decorators {
            decorator.publish(builder).inspect_err(|error| {
                tracing::error!(
                    target: "assembly.writer",
                    topic = self.writer.topic_name(),
                    role = %role,
                    %error,
                    "decorator publish failed"
                );
            })?;
        }
        if self.write_base {
            tracing::trace!(
                target: "assembly.writer",
                topic = self.writer.topic_name(),
                base = builder.base().type_name(),
                "writing base sample"
            );
            self.writer.write(builder.base())?;
        }
        Ok(())
    }

    /// Visit every transport writer in this subtree (self first).
    pub fn visit_writers(&self, visit: &mut dyn FnMut(&Arc<dyn SampleWriter>)) {
        visit(&self.writer);
        for (_, decorator) in &self.decorators {
            for child in decorator.children() {
                child.visit_writers(visit);
            }
        }
    }
}

/// User-facing wrapper for a top-level type: mints builders from the
/// registered prototype and publishes them through the root node.
pub struct TopLevelWriter {
    root: Arc<WriterNode>,
    base_prototype: Record,
}

impl TopLevelWriter {
    pub fn new(root: Arc<WriterNode>, base_prototype: Record) -> Self {
        TopLevelWriter {
            root,
            base_prototype,
        }
    }

    pub fn new_builder(&self) -> CombinedBuilder {
        CombinedBuilder::new(self.base_prototype.clone())
    }

    pub fn publish(&self, builder: &mut CombinedBuilder) -> Result<(), PublishError> {
        self.root.publish(builder)
    }

    pub fn root(&self) -> &Arc<WriterNode> {
        &self.root
    }
}
