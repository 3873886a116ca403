//! Resolution of element addresses against the loaded model set.

use crate::{
    address::ElementAddress,
    error::{Result, WeftError},
    model::{ModelElement, ModelSet, Nid},
};

/// Resolves [`ElementAddress`]es into concrete model elements by
/// consulting the set of currently loaded contributing models.
///
/// Both failure modes (the named model not being loaded, and the path
/// matching nothing inside a loaded model) surface as errors the caller
/// typically downgrades to
/// [`WeaveDiagnostic::UnresolvedAddress`](crate::diagnostic::WeaveDiagnostic).
pub struct LinkResolver<'a> {
    models: &'a ModelSet,
}

impl<'a> LinkResolver<'a> {
    pub fn new(models: &'a ModelSet) -> Self {
        LinkResolver { models }
    }

    /// Resolve an address to the element it names.
    pub fn resolve(&self, address: &ElementAddress) -> Result<ModelElement> {
        let model = self.models.get(&address.model).ok_or_else(|| {
            WeftError::UnresolvedModel {
                model: address.model.to_string(),
                path: address.path.clone(),
            }
        })?;
        model.resolve(&address.path).ok_or_else(|| {
            WeftError::NotFound(format!(
                "[LinkResolver::resolve] no element at '{}' in model {}",
                address.path, address.model
            ))
        })
    }

    /// Resolve an address that must name an instance node.
    pub fn resolve_node(&self, address: &ElementAddress) -> Result<Nid> {
        match self.resolve(address)? {
            ModelElement::Node(nid) => Ok(nid),
            other => Err(WeftError::TypeMismatch(format!(
                "[LinkResolver::resolve_node] '{address}' names {other:?}, not an instance node"
            ))),
        }
    }

    /// The concrete type name of the element an address resolves to: the
    /// node's type for instance paths, the type itself for `//Type`, and
    /// the declaring type for `//Type/feature`.
    pub fn resolve_type_name(&self, address: &ElementAddress) -> Result<String> {
        match self.resolve(address)? {
            ModelElement::Node(nid) => Ok(self.models.node(nid)?.type_name.clone()),
            ModelElement::Type(name) => Ok(name),
            ModelElement::Feature { type_name, .. } => Ok(type_name),
        }
    }
}
