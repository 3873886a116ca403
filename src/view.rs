//! The virtualization engine: identity-stable virtual nodes over concrete
//! models, driven by a per-view schema.
//!
//! A [`Virtualizer`] is created per view, scoped to a fixed [`ModelSet`]
//! and one [`WeavingModel`]. It owns every virtual node in an arena and
//! hands out copyable [`VId`] handles; the arena is the single source of
//! truth for node identity, so back-references and structural equality
//! work without shared ownership of the nodes themselves. The cache never
//! evicts while the view is alive, and no virtual node outlives its
//! virtualizer.
//!
//! All evaluation is synchronous and on-demand on the caller's thread.
//! Operations that may materialize cache entries take `&mut self`; callers
//! needing concurrent access serialize externally (one virtualizer per
//! thread, or a lock around the view).

use std::{
    collections::BTreeMap,
    fmt::{Display, Formatter},
    sync::Arc,
};

use url::Url;

use crate::{
    diagnostic::WeaveDiagnostic,
    error::{Result, WeftError},
    model::{AttrValue, ModelSet, Nid},
    schema::{FeatureOrigin, SchemaRegistry, VirtualFeature, VirtualSchema},
    weave::WeavingModel,
};

/// Handle to a virtual node, valid for the lifetime of the virtualizer
/// that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VId(u32);

impl Display for VId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// A feature value as seen through the view.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Scalar attribute value.
    Attr(AttrValue),
    /// Single-valued reference.
    Node(VId),
    /// Absent single-valued feature.
    Null,
    /// Many-valued reference; resolve through the relation operations on
    /// [`Virtualizer`].
    Relation(Relation),
}

/// Handle to a many-valued relation.
///
/// `Concrete` is a lazy pass-through over the underlying model's list:
/// nothing is copied, each element is virtualized on access, and hidden
/// elements are projected out. `Virtual` indexes a virtual-only list in
/// the owning node's side table.
#[derive(Debug, Clone, PartialEq)]
pub enum Relation {
    Concrete { node: VId, feature: String },
    Virtual { node: VId, feature: String },
}

/// Side-table value for a virtual-only feature.
#[derive(Debug, Clone)]
enum VirtualValue {
    Single(Option<VId>),
    Many(Vec<VId>),
}

/// The proxy record for one concrete node within one view.
///
/// Concrete-schema features are never cached here: every read and write
/// re-delegates to the concrete node by name, so the virtual layer cannot
/// go stale relative to concrete mutation. The side table holds only
/// features introduced by weaving.
struct VirtualNode {
    concrete: Nid,
    schema: Arc<VirtualSchema>,
    virtual_values: BTreeMap<String, VirtualValue>,
}

/// The identity cache and factory for a single view.
pub struct Virtualizer {
    models: ModelSet,
    weaving: WeavingModel,
    registry: SchemaRegistry,
    nodes: Vec<VirtualNode>,
    by_concrete: BTreeMap<Nid, VId>,
    /// Link values waiting for first virtualization of their source node.
    pending_links: BTreeMap<Nid, Vec<(String, Nid)>>,
    diagnostics: Vec<WeaveDiagnostic>,
}

impl Virtualizer {
    /// Build a view over a fixed set of loaded models and one weaving
    /// model. Structural weaving problems surface in [`Self::diagnostics`]
    /// rather than failing construction.
    pub fn new(models: ModelSet, weaving: WeavingModel) -> Self {
        let mut registry = SchemaRegistry::new(&models, &weaving);
        let diagnostics = registry.take_diagnostics();
        let pending_links = registry.take_link_values();
        tracing::debug!(
            "[Virtualizer::new] view '{}' over {} models, {} entries, {} diagnostics",
            weaving.name,
            models.len(),
            weaving.entries.len(),
            diagnostics.len()
        );
        Virtualizer {
            models,
            weaving,
            registry,
            nodes: vec![],
            by_concrete: BTreeMap::new(),
            pending_links,
            diagnostics,
        }
    }

    /// The unique virtual node wrapping `nid`, built and cached on first
    /// call. This is the sole construction path for virtual nodes; it is
    /// safe to call reentrantly from relation and children traversal.
    ///
    /// Errors with `NotFound` for nodes in no loaded model and for nodes
    /// hidden by a filter.
    pub fn get_virtual(&mut self, nid: Nid) -> Result<VId> {
        if let Some(vid) = self.by_concrete.get(&nid) {
            return Ok(*vid);
        }
        if self.registry.is_hidden_node(nid) {
            return Err(WeftError::NotFound(format!(
                "[Virtualizer::get_virtual] node {nid} is hidden by a filter in this view"
            )));
        }
        let type_name = self.models.node(nid)?.type_name.clone();
        if self.registry.is_hidden_type(&type_name) {
            return Err(WeftError::NotFound(format!(
                "[Virtualizer::get_virtual] type '{type_name}' is hidden by a filter in this view"
            )));
        }
        let schema = self.registry.schema_for(&self.models, &type_name)?;
        let vid = VId(self.nodes.len() as u32);
        self.nodes.push(VirtualNode {
            concrete: nid,
            schema,
            virtual_values: BTreeMap::new(),
        });
        self.by_concrete.insert(nid, vid);
        tracing::debug!("[Virtualizer::get_virtual] {vid} wraps {nid} ({type_name})");

        // Attach link values resolved at construction. Applied through the
        // inverse-aware paths so a declared opposite fills in on the
        // target as well.
        if let Some(seeds) = self.pending_links.remove(&nid) {
            for (relation, target_nid) in seeds {
                let target = match self.get_virtual(target_nid) {
                    Ok(target) => target,
                    Err(err) => {
                        self.diagnostics.push(WeaveDiagnostic::warning(format!(
                            "link value on '{relation}' dropped: {err}"
                        )));
                        continue;
                    }
                };
                let Some(feature) = self.nodes[vid.0 as usize].schema.feature(&relation).cloned()
                else {
                    // Conflict-stripped feature: value contributes nothing.
                    continue;
                };
                if feature.many {
                    self.virtual_add(vid, &feature, target, true);
                } else {
                    self.virtual_set_single(vid, &feature, target, true);
                }
            }
        }
        Ok(vid)
    }

    /// Virtualize the top-level nodes of a loaded model, preserving the
    /// model's declared order. Hidden elements are skipped.
    pub fn roots_of(&mut self, uri: &Url) -> Result<Vec<VId>> {
        let roots: Vec<Nid> = self
            .models
            .get(uri)
            .ok_or_else(|| WeftError::UnresolvedModel {
                model: uri.to_string(),
                path: "/".to_string(),
            })?
            .roots()
            .to_vec();
        let visible: Vec<Nid> = roots
            .into_iter()
            .filter(|nid| self.is_visible(*nid))
            .collect();
        visible
            .into_iter()
            .map(|nid| self.get_virtual(nid))
            .collect()
    }

    /// Read a feature by name.
    ///
    /// Concrete-schema features delegate to the concrete node on every
    /// call; virtual-only features come from the side table, with
    /// many-valued relations lazily initialized to an empty inverse-wired
    /// list on first read.
    pub fn get(&mut self, vid: VId, feature: &str) -> Result<Value> {
        let (nid, schema) = {
            let node = self.vnode(vid)?;
            (node.concrete, node.schema.clone())
        };
        let vf = schema.feature(feature).ok_or_else(|| WeftError::UnknownFeature {
            type_name: schema.type_name.clone(),
            feature: feature.to_string(),
        })?;

        match vf.origin {
            FeatureOrigin::Concrete => {
                if !vf.is_reference {
                    return Ok(match self.models.node(nid)?.attrs.get(feature) {
                        Some(value) => Value::Attr(value.clone()),
                        None => Value::Null,
                    });
                }
                if vf.many {
                    return Ok(Value::Relation(Relation::Concrete {
                        node: vid,
                        feature: feature.to_string(),
                    }));
                }
                let target = self
                    .models
                    .model_of(nid)
                    .map(|model| model.refs(nid, feature))
                    .and_then(|refs| refs.iter().copied().find(|t| self.is_visible(*t)));
                match target {
                    Some(target) => Ok(Value::Node(self.get_virtual(target)?)),
                    None => Ok(Value::Null),
                }
            }
            FeatureOrigin::Virtual => {
                let current = match self.vnode(vid)?.virtual_values.get(feature) {
                    Some(VirtualValue::Single(Some(target))) => Some(Value::Node(*target)),
                    Some(VirtualValue::Single(None)) => Some(Value::Null),
                    Some(VirtualValue::Many(_)) => Some(Value::Relation(Relation::Virtual {
                        node: vid,
                        feature: feature.to_string(),
                    })),
                    None => None,
                };
                if let Some(value) = current {
                    return Ok(value);
                }
                if vf.many {
                    self.vnode_mut(vid)?
                        .virtual_values
                        .insert(feature.to_string(), VirtualValue::Many(vec![]));
                    Ok(Value::Relation(Relation::Virtual {
                        node: vid,
                        feature: feature.to_string(),
                    }))
                } else {
                    Ok(Value::Null)
                }
            }
        }
    }

    /// Write a feature by name.
    ///
    /// Concrete-schema features delegate the write to the underlying
    /// model. Virtual single-valued references with a declared inverse
    /// propagate the inverse update one hop, never recursively.
    pub fn set(&mut self, vid: VId, feature: &str, value: Value) -> Result<()> {
        let (nid, schema) = {
            let node = self.vnode(vid)?;
            (node.concrete, node.schema.clone())
        };
        let vf = schema
            .feature(feature)
            .ok_or_else(|| WeftError::UnknownFeature {
                type_name: schema.type_name.clone(),
                feature: feature.to_string(),
            })?
            .clone();

        match (vf.origin, vf.is_reference, vf.many) {
            (FeatureOrigin::Concrete, false, _) => match value {
                Value::Attr(attr) => {
                    let model = self.models.model_of_mut(nid).ok_or_else(|| {
                        WeftError::NotFound(format!("node {nid} is in no loaded model"))
                    })?;
                    model.set_attr(nid, feature, attr)
                }
                _ => Err(WeftError::TypeMismatch(format!(
                    "feature '{feature}' expects an attribute value"
                ))),
            },
            (FeatureOrigin::Concrete, true, false) => match value {
                Value::Node(target) => {
                    let target_nid = self.vnode(target)?.concrete;
                    let model = self.models.model_of_mut(nid).ok_or_else(|| {
                        WeftError::NotFound(format!("node {nid} is in no loaded model"))
                    })?;
                    model.set_ref(nid, feature, target_nid)
                }
                _ => Err(WeftError::TypeMismatch(format!(
                    "feature '{feature}' expects a node value"
                ))),
            },
            (FeatureOrigin::Concrete, true, true) => Err(WeftError::UnsupportedOperation(format!(
                "feature '{feature}' is a pass-through relation; it is read-only through the view"
            ))),
            (FeatureOrigin::Virtual, _, false) => match value {
                Value::Node(target) => {
                    self.vnode(target)?;
                    self.virtual_set_single(vid, &vf, target, true);
                    Ok(())
                }
                _ => Err(WeftError::TypeMismatch(format!(
                    "feature '{feature}' expects a node value"
                ))),
            },
            (FeatureOrigin::Virtual, _, true) => Err(WeftError::UnsupportedOperation(format!(
                "feature '{feature}' is many-valued; use relation_add/relation_remove"
            ))),
        }
    }

    /// Clearing a feature value is unsupported: no removal semantics are
    /// defined for either concrete or virtual features.
    pub fn unset(&mut self, vid: VId, feature: &str) -> Result<()> {
        let schema = self.vnode(vid)?.schema.clone();
        if !schema.contains(feature) {
            return Err(WeftError::UnknownFeature {
                type_name: schema.type_name.clone(),
                feature: feature.to_string(),
            });
        }
        Err(WeftError::UnsupportedOperation(format!(
            "unset of feature '{feature}': no removal semantics are defined for view features"
        )))
    }

    /// The node's contained children: containment features in schema
    /// order, values in relation order. Recomputed fresh on every call.
    pub fn children(&mut self, vid: VId) -> Result<Vec<VId>> {
        let (nid, schema) = {
            let node = self.vnode(vid)?;
            (node.concrete, node.schema.clone())
        };
        let mut children = vec![];
        // Containment is declared only by concrete types; woven relations
        // never contain their targets.
        for vf in schema
            .features()
            .iter()
            .filter(|f| f.is_reference && f.containment)
        {
            for target in self.visible_refs(nid, &vf.name) {
                children.push(self.get_virtual(target)?);
            }
        }
        Ok(children)
    }

    /// The node's structural parent in the view, or `None` at a model
    /// root (or when the parent is hidden).
    pub fn container(&mut self, vid: VId) -> Result<Option<VId>> {
        let nid = self.vnode(vid)?.concrete;
        let parent = self
            .models
            .model_of(nid)
            .and_then(|model| model.container_of(nid));
        match parent {
            Some(parent) if self.is_visible(parent) => Ok(Some(self.get_virtual(parent)?)),
            Some(parent) => {
                tracing::debug!(
                    "[Virtualizer::container] parent {parent} of {nid} is hidden in this view"
                );
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Number of elements a relation projects, hidden elements excluded.
    pub fn relation_len(&self, relation: &Relation) -> Result<usize> {
        match relation {
            Relation::Concrete { node, feature } => {
                let nid = self.vnode(*node)?.concrete;
                Ok(self.visible_refs(nid, feature).len())
            }
            Relation::Virtual { node, feature } => {
                match self.vnode(*node)?.virtual_values.get(feature) {
                    Some(VirtualValue::Many(list)) => Ok(list.len()),
                    Some(VirtualValue::Single(_)) => Err(WeftError::TypeMismatch(format!(
                        "feature '{feature}' is single-valued"
                    ))),
                    None => Ok(0),
                }
            }
        }
    }

    /// The element at `index`, virtualized on access. Two reads of the
    /// same index return the same handle.
    pub fn relation_at(&mut self, relation: &Relation, index: usize) -> Result<VId> {
        match relation {
            Relation::Concrete { node, feature } => {
                let nid = self.vnode(*node)?.concrete;
                let target = self
                    .visible_refs(nid, feature)
                    .get(index)
                    .copied()
                    .ok_or_else(|| {
                        WeftError::NotFound(format!(
                            "index {index} out of bounds for relation '{feature}'"
                        ))
                    })?;
                self.get_virtual(target)
            }
            Relation::Virtual { node, feature } => {
                match self.vnode(*node)?.virtual_values.get(feature) {
                    Some(VirtualValue::Many(list)) => list.get(index).copied().ok_or_else(|| {
                        WeftError::NotFound(format!(
                            "index {index} out of bounds for relation '{feature}'"
                        ))
                    }),
                    _ => Err(WeftError::NotFound(format!(
                        "index {index} out of bounds for relation '{feature}'"
                    ))),
                }
            }
        }
    }

    /// All elements of a relation, in relation order.
    pub fn relation_items(&mut self, relation: &Relation) -> Result<Vec<VId>> {
        match relation {
            Relation::Concrete { node, feature } => {
                let nid = self.vnode(*node)?.concrete;
                self.visible_refs(nid, feature)
                    .into_iter()
                    .map(|target| self.get_virtual(target))
                    .collect()
            }
            Relation::Virtual { node, feature } => {
                match self.vnode(*node)?.virtual_values.get(feature) {
                    Some(VirtualValue::Many(list)) => Ok(list.clone()),
                    _ => Ok(vec![]),
                }
            }
        }
    }

    /// Append to a virtual-only relation, keeping a declared inverse in
    /// sync. Membership is exactly-once; re-adding a present element is a
    /// no-op. Pass-through relations are read-only.
    pub fn relation_add(&mut self, relation: &Relation, value: VId) -> Result<()> {
        match relation {
            Relation::Concrete { feature, .. } => Err(WeftError::UnsupportedOperation(format!(
                "relation '{feature}' is a pass-through over the contributing model; mutate the model directly"
            ))),
            Relation::Virtual { node, feature } => {
                let vf = self.relation_feature(*node, feature)?;
                self.vnode(value)?;
                self.virtual_add(*node, &vf, value, true);
                Ok(())
            }
        }
    }

    /// Remove from a virtual-only relation, with symmetric inverse
    /// cleanup. Returns whether the element was present.
    pub fn relation_remove(&mut self, relation: &Relation, value: VId) -> Result<bool> {
        match relation {
            Relation::Concrete { feature, .. } => Err(WeftError::UnsupportedOperation(format!(
                "relation '{feature}' is a pass-through over the contributing model; mutate the model directly"
            ))),
            Relation::Virtual { node, feature } => {
                let vf = self.relation_feature(*node, feature)?;
                Ok(self.virtual_remove(*node, &vf, value, true))
            }
        }
    }

    /// Diagnostics collected during construction and lazy attachment.
    pub fn diagnostics(&self) -> &[WeaveDiagnostic] {
        &self.diagnostics
    }

    /// The schema for a concrete type under this view's weaving model.
    pub fn schema_for(&mut self, type_name: &str) -> Result<Arc<VirtualSchema>> {
        self.registry.schema_for(&self.models, type_name)
    }

    /// The concrete node a handle wraps.
    pub fn concrete_of(&self, vid: VId) -> Result<Nid> {
        Ok(self.vnode(vid)?.concrete)
    }

    pub fn models(&self) -> &ModelSet {
        &self.models
    }

    /// Mutable access to the contributing models, for writes coordinated
    /// at the concrete-model layer.
    pub fn models_mut(&mut self) -> &mut ModelSet {
        &mut self.models
    }

    pub fn weaving(&self) -> &WeavingModel {
        &self.weaving
    }

    /// Number of virtual nodes materialized so far.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    // ---- internals ----

    fn vnode(&self, vid: VId) -> Result<&VirtualNode> {
        self.nodes.get(vid.0 as usize).ok_or_else(|| {
            WeftError::NotFound(format!("[Virtualizer] stale handle {vid} for this view"))
        })
    }

    fn vnode_mut(&mut self, vid: VId) -> Result<&mut VirtualNode> {
        self.nodes.get_mut(vid.0 as usize).ok_or_else(|| {
            WeftError::NotFound(format!("[Virtualizer] stale handle {vid} for this view"))
        })
    }

    fn relation_feature(&self, vid: VId, feature: &str) -> Result<VirtualFeature> {
        let schema = self.vnode(vid)?.schema.clone();
        let vf = schema
            .feature(feature)
            .ok_or_else(|| WeftError::UnknownFeature {
                type_name: schema.type_name.clone(),
                feature: feature.to_string(),
            })?;
        if !vf.many {
            return Err(WeftError::TypeMismatch(format!(
                "feature '{feature}' is single-valued"
            )));
        }
        Ok(vf.clone())
    }

    fn is_visible(&self, nid: Nid) -> bool {
        if self.registry.is_hidden_node(nid) {
            return false;
        }
        self.models
            .node(nid)
            .map(|node| !self.registry.is_hidden_type(&node.type_name))
            .unwrap_or(false)
    }

    fn visible_refs(&self, nid: Nid, feature: &str) -> Vec<Nid> {
        self.models
            .model_of(nid)
            .map(|model| model.refs(nid, feature))
            .map(|refs| {
                refs.iter()
                    .copied()
                    .filter(|t| self.is_visible(*t))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Store a single-valued virtual reference; with `sync`, propagate to
    /// the declared inverse on the target without re-triggering this
    /// feature's own update.
    fn virtual_set_single(&mut self, vid: VId, vf: &VirtualFeature, target: VId, sync: bool) {
        if let Ok(node) = self.vnode_mut(vid) {
            node.virtual_values
                .insert(vf.name.clone(), VirtualValue::Single(Some(target)));
        }
        if sync {
            self.sync_inverse_add(vid, vf, target);
        }
    }

    /// Append to a many-valued virtual reference; with `sync`, propagate
    /// one hop to the declared inverse.
    fn virtual_add(&mut self, vid: VId, vf: &VirtualFeature, target: VId, sync: bool) {
        let added = self.push_without_inverse(vid, &vf.name, target);
        if added && sync {
            self.sync_inverse_add(vid, vf, target);
        }
    }

    /// Remove from a many-valued virtual reference; with `sync`, remove
    /// the back-reference symmetrically.
    fn virtual_remove(&mut self, vid: VId, vf: &VirtualFeature, target: VId, sync: bool) -> bool {
        let removed = match self
            .vnode_mut(vid)
            .ok()
            .and_then(|node| node.virtual_values.get_mut(&vf.name))
        {
            Some(VirtualValue::Many(list)) => {
                let before = list.len();
                list.retain(|v| *v != target);
                before != list.len()
            }
            _ => false,
        };
        if removed && sync {
            self.sync_inverse_remove(vid, vf, target);
        }
        removed
    }

    /// One-directional inverse propagation: updates the opposite feature
    /// on `target` through paths that never re-enter the forward update.
    fn sync_inverse_add(&mut self, vid: VId, vf: &VirtualFeature, target: VId) {
        let Some(opposite_name) = &vf.opposite else {
            return;
        };
        let Ok(target_schema) = self.vnode(target).map(|n| n.schema.clone()) else {
            return;
        };
        match target_schema.feature(opposite_name) {
            Some(opposite) if opposite.origin == FeatureOrigin::Virtual => {
                if opposite.many {
                    self.push_without_inverse(target, opposite_name, vid);
                } else if let Ok(node) = self.vnode_mut(target) {
                    node.virtual_values
                        .insert(opposite_name.clone(), VirtualValue::Single(Some(vid)));
                }
            }
            Some(_) => {
                // Concrete opposites are owned by the contributing model;
                // the view does not write them implicitly.
                tracing::debug!(
                    "[Virtualizer::sync_inverse_add] opposite '{opposite_name}' of '{}' is concrete, not synchronized",
                    vf.name
                );
            }
            None => {
                tracing::debug!(
                    "[Virtualizer::sync_inverse_add] opposite '{opposite_name}' of '{}' absent from schema '{}'",
                    vf.name,
                    target_schema.type_name
                );
            }
        }
    }

    fn sync_inverse_remove(&mut self, vid: VId, vf: &VirtualFeature, target: VId) {
        let Some(opposite_name) = &vf.opposite else {
            return;
        };
        let Ok(target_schema) = self.vnode(target).map(|n| n.schema.clone()) else {
            return;
        };
        match target_schema.feature(opposite_name) {
            Some(opposite) if opposite.origin == FeatureOrigin::Virtual => {
                let Ok(node) = self.vnode_mut(target) else {
                    return;
                };
                match node.virtual_values.get_mut(opposite_name) {
                    Some(VirtualValue::Many(list)) => list.retain(|v| *v != vid),
                    Some(VirtualValue::Single(current)) if *current == Some(vid) => {
                        node.virtual_values
                            .insert(opposite_name.clone(), VirtualValue::Single(None));
                    }
                    _ => {}
                }
            }
            _ => {}
        }
    }

    /// Append without touching the opposite side. Used both by the
    /// forward update and by inverse propagation, which is what breaks
    /// the mutual recursion.
    fn push_without_inverse(&mut self, vid: VId, feature: &str, value: VId) -> bool {
        let Ok(node) = self.vnode_mut(vid) else {
            return false;
        };
        let entry = node
            .virtual_values
            .entry(feature.to_string())
            .or_insert_with(|| VirtualValue::Many(vec![]));
        match entry {
            VirtualValue::Many(list) => {
                if list.contains(&value) {
                    false
                } else {
                    list.push(value);
                    true
                }
            }
            VirtualValue::Single(_) => false,
        }
    }
}
