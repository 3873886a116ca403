//! Concrete model layer: the externally-owned graphs a view composes.
//!
//! This module is the contract the virtualization engine requires of a
//! model loader: typed nodes with named structural features, stable
//! per-model addresses, and path resolution for
//! [`ElementAddress`](crate::address::ElementAddress) lookups. The engine itself never parses an on-disk model format;
//! a loader populates a [`ConcreteModel`] and hands it over inside a
//! [`ModelSet`].
//!
//! Concrete models are read-mostly: the only supported mutations after
//! loading are attribute/reference writes delegated from a virtual node,
//! which must remain visible through every view without re-registration.

use std::{
    collections::BTreeMap,
    fmt::{Display, Formatter},
};

use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::error::{Result, WeftError};

/// Concrete node identity, stable for the process lifetime.
///
/// A `Nid` identifies one node within one loaded contributing model. It is
/// never written into a weaving model; cross-model pointers use
/// [`ElementAddress`](crate::address::ElementAddress) instead.
#[derive(
    Clone, Copy, Debug, Default, Serialize, Deserialize, Hash, PartialEq, Eq, PartialOrd, Ord,
)]
pub struct Nid(Uuid);

impl Nid {
    pub fn new() -> Self {
        Nid(Uuid::new_v4())
    }

    pub fn nil() -> Self {
        Nid(Uuid::nil())
    }
}

impl Display for Nid {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.as_simple())
    }
}

/// A scalar attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        AttrValue::Str(s.to_string())
    }
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        AttrValue::Int(v)
    }
}

impl From<bool> for AttrValue {
    fn from(v: bool) -> Self {
        AttrValue::Bool(v)
    }
}

/// Shape of a structural feature as declared by a concrete type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FeatureKind {
    /// Scalar value.
    Attribute,
    /// Reference to other nodes in the same model.
    Reference {
        many: bool,
        containment: bool,
        /// Name of the declared inverse feature on the target type, if any.
        opposite: Option<String>,
    },
}

/// A named structural feature declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureDef {
    pub name: String,
    pub kind: FeatureKind,
}

impl FeatureDef {
    pub fn attribute(name: impl Into<String>) -> Self {
        FeatureDef {
            name: name.into(),
            kind: FeatureKind::Attribute,
        }
    }

    pub fn reference(name: impl Into<String>, many: bool, containment: bool) -> Self {
        FeatureDef {
            name: name.into(),
            kind: FeatureKind::Reference {
                many,
                containment,
                opposite: None,
            },
        }
    }

    pub fn is_reference(&self) -> bool {
        matches!(self.kind, FeatureKind::Reference { .. })
    }

    pub fn is_many(&self) -> bool {
        matches!(self.kind, FeatureKind::Reference { many: true, .. })
    }

    pub fn is_containment(&self) -> bool {
        matches!(
            self.kind,
            FeatureKind::Reference {
                containment: true,
                ..
            }
        )
    }
}

/// A concrete node type: named features plus an optional supertype whose
/// features are inherited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDef {
    pub name: String,
    pub supertype: Option<String>,
    pub features: Vec<FeatureDef>,
}

impl TypeDef {
    pub fn new(name: impl Into<String>) -> Self {
        TypeDef {
            name: name.into(),
            supertype: None,
            features: vec![],
        }
    }

    pub fn with_supertype(mut self, supertype: impl Into<String>) -> Self {
        self.supertype = Some(supertype.into());
        self
    }

    pub fn with_feature(mut self, feature: FeatureDef) -> Self {
        self.features.push(feature);
        self
    }
}

/// A typed node inside one contributing model.
///
/// `local_id` is the node's per-model address segment: unique within the
/// model, stable across loads, and the unit an instance path is built from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConcreteNode {
    pub id: Nid,
    pub local_id: String,
    pub type_name: String,
    pub attrs: BTreeMap<String, AttrValue>,
    /// Reference values by feature name. Single-valued features hold at
    /// most one entry.
    pub refs: BTreeMap<String, Vec<Nid>>,
}

/// What an element path resolves to inside a model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelElement {
    Node(Nid),
    Type(String),
    Feature { type_name: String, feature: String },
}

/// One loaded contributing model: a type registry plus an instance graph
/// with declared roots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcreteModel {
    uri: Url,
    types: BTreeMap<String, TypeDef>,
    nodes: BTreeMap<Nid, ConcreteNode>,
    roots: Vec<Nid>,
    /// Containment parent per node, maintained by reference writes.
    parents: BTreeMap<Nid, Nid>,
}

impl ConcreteModel {
    pub fn new(uri: Url) -> Self {
        ConcreteModel {
            uri,
            types: BTreeMap::new(),
            nodes: BTreeMap::new(),
            roots: vec![],
            parents: BTreeMap::new(),
        }
    }

    pub fn uri(&self) -> &Url {
        &self.uri
    }

    /// Register a type. Re-registering a name overwrites the previous
    /// definition and emits a log message.
    pub fn add_type(&mut self, type_def: TypeDef) {
        if self.types.contains_key(&type_def.name) {
            tracing::info!(
                "[ConcreteModel::add_type] Overwriting existing type: {}",
                type_def.name
            );
        }
        self.types.insert(type_def.name.clone(), type_def);
    }

    pub fn type_def(&self, name: &str) -> Option<&TypeDef> {
        self.types.get(name)
    }

    /// The type's full feature list, inherited features first, in
    /// declaration order. Errors if the type or a supertype is unknown.
    pub fn all_features(&self, type_name: &str) -> Result<Vec<FeatureDef>> {
        let mut chain = vec![];
        let mut current = Some(type_name);
        while let Some(name) = current {
            let def = self.types.get(name).ok_or_else(|| {
                WeftError::NotFound(format!(
                    "[ConcreteModel::all_features] type '{name}' is not registered in model {}",
                    self.uri
                ))
            })?;
            chain.push(def);
            current = def.supertype.as_deref();
            if chain.len() > self.types.len() {
                return Err(WeftError::Model(format!(
                    "supertype cycle while resolving features of '{type_name}'"
                )));
            }
        }
        let mut features = vec![];
        for def in chain.iter().rev() {
            features.extend(def.features.iter().cloned());
        }
        Ok(features)
    }

    /// The supertype chain of `type_name`, starting with itself.
    pub fn type_lineage(&self, type_name: &str) -> Vec<String> {
        let mut lineage = vec![];
        let mut current = Some(type_name.to_string());
        while let Some(name) = current {
            if lineage.contains(&name) {
                break;
            }
            current = self
                .types
                .get(&name)
                .and_then(|def| def.supertype.clone());
            lineage.push(name);
        }
        lineage
    }

    pub fn feature_def(&self, type_name: &str, feature: &str) -> Option<FeatureDef> {
        self.all_features(type_name)
            .ok()?
            .into_iter()
            .find(|f| f.name == feature)
    }

    /// Create and register a node of `type_name`. The `local_id` must be
    /// unique within the model.
    pub fn insert_node(
        &mut self,
        local_id: impl Into<String>,
        type_name: impl Into<String>,
    ) -> Result<Nid> {
        let local_id = local_id.into();
        let type_name = type_name.into();
        if !self.types.contains_key(&type_name) {
            return Err(WeftError::NotFound(format!(
                "[ConcreteModel::insert_node] unknown type '{type_name}' in model {}",
                self.uri
            )));
        }
        if self.nodes.values().any(|n| n.local_id == local_id) {
            return Err(WeftError::Model(format!(
                "[ConcreteModel::insert_node] duplicate local id '{local_id}' in model {}",
                self.uri
            )));
        }
        let id = Nid::new();
        self.nodes.insert(
            id,
            ConcreteNode {
                id,
                local_id,
                type_name,
                attrs: BTreeMap::new(),
                refs: BTreeMap::new(),
            },
        );
        Ok(id)
    }

    pub fn add_root(&mut self, nid: Nid) {
        if !self.roots.contains(&nid) {
            self.roots.push(nid);
        }
    }

    pub fn roots(&self) -> &[Nid] {
        &self.roots
    }

    pub fn node(&self, nid: Nid) -> Result<&ConcreteNode> {
        self.nodes.get(&nid).ok_or_else(|| {
            WeftError::NotFound(format!(
                "[ConcreteModel::node] no node {nid} in model {}",
                self.uri
            ))
        })
    }

    pub fn contains(&self, nid: Nid) -> bool {
        self.nodes.contains_key(&nid)
    }

    pub fn node_ids(&self) -> impl Iterator<Item = Nid> + '_ {
        self.nodes.keys().copied()
    }

    /// Write an attribute value. The feature must be declared by the
    /// node's type as an attribute.
    pub fn set_attr(&mut self, nid: Nid, feature: &str, value: AttrValue) -> Result<()> {
        let type_name = self.node(nid)?.type_name.clone();
        match self.feature_def(&type_name, feature) {
            Some(def) if !def.is_reference() => {
                if let Some(node) = self.nodes.get_mut(&nid) {
                    node.attrs.insert(feature.to_string(), value);
                }
                Ok(())
            }
            Some(_) => Err(WeftError::TypeMismatch(format!(
                "feature '{feature}' on type '{type_name}' is a reference, not an attribute"
            ))),
            None => Err(WeftError::UnknownFeature {
                type_name,
                feature: feature.to_string(),
            }),
        }
    }

    pub fn attr(&self, nid: Nid, feature: &str) -> Option<&AttrValue> {
        self.nodes.get(&nid)?.attrs.get(feature)
    }

    /// The declaration of a reference feature on the node's type.
    fn reference_def(&self, nid: Nid, feature: &str) -> Result<FeatureDef> {
        let type_name = self.node(nid)?.type_name.clone();
        match self.feature_def(&type_name, feature) {
            Some(def) if def.is_reference() => Ok(def),
            Some(_) => Err(WeftError::TypeMismatch(format!(
                "feature '{feature}' on type '{type_name}' is an attribute, not a reference"
            ))),
            None => Err(WeftError::UnknownFeature {
                type_name,
                feature: feature.to_string(),
            }),
        }
    }

    /// Append `target` to a many-valued reference feature. Maintains the
    /// containment parent table when the feature is a containment.
    pub fn add_ref(&mut self, nid: Nid, feature: &str, target: Nid) -> Result<()> {
        let def = self.reference_def(nid, feature)?;
        if !def.is_many() {
            return Err(WeftError::TypeMismatch(format!(
                "feature '{feature}' is single-valued; use set_ref"
            )));
        }
        if def.is_containment() {
            self.parents.insert(target, nid);
        }
        if let Some(node) = self.nodes.get_mut(&nid) {
            let values = node.refs.entry(feature.to_string()).or_default();
            if !values.contains(&target) {
                values.push(target);
            }
        }
        Ok(())
    }

    /// Set a single-valued reference feature, replacing any previous value.
    pub fn set_ref(&mut self, nid: Nid, feature: &str, target: Nid) -> Result<()> {
        let def = self.reference_def(nid, feature)?;
        if def.is_many() {
            return Err(WeftError::TypeMismatch(format!(
                "feature '{feature}' is many-valued; use add_ref"
            )));
        }
        if def.is_containment() {
            self.parents.insert(target, nid);
        }
        if let Some(node) = self.nodes.get_mut(&nid) {
            node.refs.insert(feature.to_string(), vec![target]);
        }
        Ok(())
    }

    pub fn refs(&self, nid: Nid, feature: &str) -> &[Nid] {
        self.nodes
            .get(&nid)
            .and_then(|node| node.refs.get(feature))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// The node's containment parent, or `None` at a model root.
    pub fn container_of(&self, nid: Nid) -> Option<Nid> {
        self.parents.get(&nid).copied()
    }

    /// Resolve a structural path to a model element.
    ///
    /// `//Type` and `//Type/feature` address metamodel elements; `/a/b`
    /// walks local ids from a root through containment children.
    pub fn resolve(&self, path: &str) -> Option<ModelElement> {
        if let Some(meta) = path.strip_prefix("//") {
            let mut parts = meta.split('/').filter(|s| !s.is_empty());
            let type_name = parts.next()?;
            let type_def = self.types.get(type_name)?;
            return match parts.next() {
                None => Some(ModelElement::Type(type_def.name.clone())),
                Some(feature) => {
                    self.feature_def(type_name, feature)?;
                    Some(ModelElement::Feature {
                        type_name: type_def.name.clone(),
                        feature: feature.to_string(),
                    })
                }
            };
        }

        let mut segments = path.split('/').filter(|s| !s.is_empty());
        let first = segments.next()?;
        let mut current = self
            .roots
            .iter()
            .copied()
            .find(|nid| self.nodes.get(nid).is_some_and(|n| n.local_id == first))?;
        for segment in segments {
            current = self
                .containment_children(current)
                .into_iter()
                .find(|nid| self.nodes.get(nid).is_some_and(|n| n.local_id == segment))?;
        }
        Some(ModelElement::Node(current))
    }

    /// Directly contained children of `nid`, in feature then value order.
    pub fn containment_children(&self, nid: Nid) -> Vec<Nid> {
        let Some(node) = self.nodes.get(&nid) else {
            return vec![];
        };
        let Ok(features) = self.all_features(&node.type_name) else {
            return vec![];
        };
        let mut children = vec![];
        for def in features.iter().filter(|f| f.is_containment()) {
            children.extend(self.refs(nid, &def.name).iter().copied());
        }
        children
    }
}

/// The fixed, ordered set of contributing models a view is scoped to.
///
/// Models are fully loaded before insertion; the set indexes every node id
/// at insert time so the engine can find a node's owning model without a
/// scan.
#[derive(Debug, Clone, Default)]
pub struct ModelSet {
    models: Vec<ConcreteModel>,
    by_uri: BTreeMap<String, usize>,
    by_node: BTreeMap<Nid, usize>,
}

impl ModelSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, model: ConcreteModel) {
        if let Some(&index) = self.by_uri.get(model.uri().as_str()) {
            tracing::info!(
                "[ModelSet::insert] Replacing already-loaded model: {}",
                model.uri()
            );
            let stale: Vec<Nid> = self.models[index].node_ids().collect();
            for nid in stale {
                self.by_node.remove(&nid);
            }
            for nid in model.node_ids() {
                self.by_node.insert(nid, index);
            }
            self.models[index] = model;
            return;
        }
        let index = self.models.len();
        self.by_uri.insert(model.uri().to_string(), index);
        for nid in model.node_ids() {
            self.by_node.insert(nid, index);
        }
        self.models.push(model);
    }

    pub fn get(&self, uri: &Url) -> Option<&ConcreteModel> {
        self.by_uri.get(uri.as_str()).map(|i| &self.models[*i])
    }

    pub fn get_mut(&mut self, uri: &Url) -> Option<&mut ConcreteModel> {
        let index = *self.by_uri.get(uri.as_str())?;
        self.models.get_mut(index)
    }

    pub fn model_of(&self, nid: Nid) -> Option<&ConcreteModel> {
        self.by_node.get(&nid).map(|i| &self.models[*i])
    }

    pub fn model_of_mut(&mut self, nid: Nid) -> Option<&mut ConcreteModel> {
        let index = *self.by_node.get(&nid)?;
        self.models.get_mut(index)
    }

    pub fn node(&self, nid: Nid) -> Result<&ConcreteNode> {
        self.model_of(nid)
            .ok_or_else(|| {
                WeftError::NotFound(format!("[ModelSet::node] node {nid} is in no loaded model"))
            })?
            .node(nid)
    }

    /// The first loaded model defining `type_name`, with its definition.
    pub fn type_def(&self, type_name: &str) -> Option<(&ConcreteModel, &TypeDef)> {
        self.models
            .iter()
            .find_map(|m| m.type_def(type_name).map(|def| (m, def)))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConcreteModel> {
        self.models.iter()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hr_model() -> (ConcreteModel, Nid, Nid) {
        let uri = Url::parse("http://example.org/hr").unwrap();
        let mut model = ConcreteModel::new(uri);
        model.add_type(
            TypeDef::new("Person")
                .with_feature(FeatureDef::attribute("name"))
                .with_feature(FeatureDef::reference("contacts", true, true)),
        );
        model.add_type(
            TypeDef::new("Employee")
                .with_supertype("Person")
                .with_feature(FeatureDef::attribute("salary")),
        );
        let alice = model.insert_node("a1", "Person").unwrap();
        model.add_root(alice);
        model
            .set_attr(alice, "name", AttrValue::from("Alice"))
            .unwrap();
        let bob = model.insert_node("b1", "Employee").unwrap();
        model.add_ref(alice, "contacts", bob).unwrap();
        (model, alice, bob)
    }

    #[test]
    fn test_inherited_features_in_order() {
        let (model, _, _) = hr_model();
        let features: Vec<String> = model
            .all_features("Employee")
            .unwrap()
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(features, vec!["name", "contacts", "salary"]);
    }

    #[test]
    fn test_type_lineage() {
        let (model, _, _) = hr_model();
        assert_eq!(model.type_lineage("Employee"), vec!["Employee", "Person"]);
        assert_eq!(model.type_lineage("Person"), vec!["Person"]);
    }

    #[test]
    fn test_resolve_paths() {
        let (model, alice, bob) = hr_model();
        assert_eq!(model.resolve("/a1"), Some(ModelElement::Node(alice)));
        assert_eq!(model.resolve("/a1/b1"), Some(ModelElement::Node(bob)));
        assert_eq!(
            model.resolve("//Person"),
            Some(ModelElement::Type("Person".to_string()))
        );
        assert_eq!(
            model.resolve("//Employee/salary"),
            Some(ModelElement::Feature {
                type_name: "Employee".to_string(),
                feature: "salary".to_string()
            })
        );
        // Inherited feature resolvable through the subtype
        assert_eq!(
            model.resolve("//Employee/name"),
            Some(ModelElement::Feature {
                type_name: "Employee".to_string(),
                feature: "name".to_string()
            })
        );
        assert_eq!(model.resolve("/nope"), None);
        assert_eq!(model.resolve("//Robot"), None);
    }

    #[test]
    fn test_containment_parent() {
        let (model, alice, bob) = hr_model();
        assert_eq!(model.container_of(bob), Some(alice));
        assert_eq!(model.container_of(alice), None);
        assert_eq!(model.containment_children(alice), vec![bob]);
    }

    #[test]
    fn test_attribute_type_checks() {
        let (mut model, alice, _) = hr_model();
        assert!(matches!(
            model.set_attr(alice, "contacts", AttrValue::from("x")),
            Err(WeftError::TypeMismatch(_))
        ));
        assert!(matches!(
            model.set_attr(alice, "nope", AttrValue::from("x")),
            Err(WeftError::UnknownFeature { .. })
        ));
    }

    #[test]
    fn test_reference_type_checks() {
        let (mut model, alice, bob) = hr_model();
        assert!(matches!(
            model.add_ref(alice, "name", bob),
            Err(WeftError::TypeMismatch(_))
        ));
        assert!(matches!(
            model.set_ref(alice, "nope", bob),
            Err(WeftError::UnknownFeature { .. })
        ));
        // Multiplicity is checked after the reference lookup.
        assert!(matches!(
            model.set_ref(alice, "contacts", bob),
            Err(WeftError::TypeMismatch(_))
        ));
        assert!(model.add_ref(alice, "contacts", bob).is_ok());
    }

    #[test]
    fn test_duplicate_local_id_rejected() {
        let (mut model, _, _) = hr_model();
        assert!(model.insert_node("a1", "Person").is_err());
    }

    #[test]
    fn test_model_set_lookup() {
        let (model, alice, _) = hr_model();
        let uri = model.uri().clone();
        let mut set = ModelSet::new();
        set.insert(model);
        assert!(set.get(&uri).is_some());
        assert_eq!(set.model_of(alice).unwrap().uri(), &uri);
        assert_eq!(set.node(alice).unwrap().local_id, "a1");
        assert!(set.node(Nid::new()).is_err());
    }

    #[test]
    fn test_reinsert_replaces_model_and_node_index() {
        let (model, alice, _) = hr_model();
        let uri = model.uri().clone();
        let mut set = ModelSet::new();
        set.insert(model);

        let mut replacement = ConcreteModel::new(uri.clone());
        replacement.add_type(TypeDef::new("Person").with_feature(FeatureDef::attribute("name")));
        let carol = replacement.insert_node("c1", "Person").unwrap();
        set.insert(replacement);

        assert_eq!(set.len(), 1);
        // The superseded model's nodes no longer resolve.
        assert!(set.node(alice).is_err());
        assert!(set.model_of(alice).is_none());
        assert_eq!(set.node(carol).unwrap().local_id, "c1");
        assert_eq!(set.get(&uri).unwrap().node_ids().count(), 1);
    }
}
