//! The structure/schema provider seam: an external collaborator the core
//! consumes only through an opaque handle and an optional payload-size
//! query. The schema parser itself is out of scope (see the spec's scope
//! section); this module defines the interface the factory calls through.

use std::sync::Arc;

/// An opaque, reference-counted structure descriptor. The core never
/// introspects its contents; it only stores a [`std::sync::Weak`] reference
/// on packets created via `create_from_structure`.
#[derive(Debug)]
pub struct StructureDescriptor {
    pub name: String,
}

/// Resolves structure names to descriptors. Implemented externally (e.g. by
/// a schema parser) and injected into the packet factory.
pub trait StructureProvider: Send + Sync {
    /// Resolve a structure by name, if known.
    fn resolve(&self, name: &str) -> Option<Arc<StructureDescriptor>>;

    /// The payload size implied by a structure's schema, if statically known.
    fn payload_size_of(&self, name: &str) -> Option<u32>;
}

#[cfg(test)]
pub(crate) struct TestStructureProvider;

#[cfg(test)]
impl StructureProvider for TestStructureProvider {
    fn resolve(&self, name: &str) -> Option<Arc<StructureDescriptor>> {
        Some(Arc::new(StructureDescriptor { name: name.to_string() }))
    }

    fn payload_size_of(&self, _name: &str) -> Option<u32> {
        Some(16)
    }
}
