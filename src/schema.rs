//! Per-view virtual schemas: the dynamically computed feature set a
//! virtual node of a given concrete type exposes.
//!
//! A schema starts from the concrete type's full feature list (inherited
//! features included), removes everything hidden by Filter entries, and
//! appends one virtual feature per Link entry whose source resolves to the
//! type. Features are addressed **by name throughout**: positional ids
//! cannot survive per-view feature addition/removal, name lookup can.
//!
//! The registry classifies every feature once (concrete vs. virtual-only,
//! single vs. many, inverse or not) so that each later access is a table
//! lookup and a fixed dispatch, not repeated reflection against the
//! weaving model.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use serde::{Deserialize, Serialize};

use crate::{
    diagnostic::WeaveDiagnostic,
    error::{Result, WeftError},
    model::{FeatureDef, FeatureKind, ModelElement, ModelSet, Nid},
    resolver::LinkResolver,
    weave::{Link, MatchMode, WeavingModel},
};

/// Whether a feature delegates to the concrete node or lives purely in
/// the virtual layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureOrigin {
    Concrete,
    Virtual,
}

/// The once-computed classification of one exposed feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VirtualFeature {
    pub name: String,
    pub origin: FeatureOrigin,
    pub is_reference: bool,
    pub many: bool,
    pub containment: bool,
    /// Name of the inverse feature on the related node's type, if declared.
    pub opposite: Option<String>,
}

impl VirtualFeature {
    pub fn from_concrete(def: &FeatureDef) -> Self {
        match &def.kind {
            FeatureKind::Attribute => VirtualFeature {
                name: def.name.clone(),
                origin: FeatureOrigin::Concrete,
                is_reference: false,
                many: false,
                containment: false,
                opposite: None,
            },
            FeatureKind::Reference {
                many,
                containment,
                opposite,
            } => VirtualFeature {
                name: def.name.clone(),
                origin: FeatureOrigin::Concrete,
                is_reference: true,
                many: *many,
                containment: *containment,
                opposite: opposite.clone(),
            },
        }
    }
}

/// The ordered feature set a concrete type exposes within one view.
///
/// Shared (via `Arc`) by every virtual node of the type in that view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VirtualSchema {
    pub type_name: String,
    features: Vec<VirtualFeature>,
}

impl VirtualSchema {
    pub fn features(&self) -> &[VirtualFeature] {
        &self.features
    }

    /// Name-keyed feature lookup.
    pub fn feature(&self, name: &str) -> Option<&VirtualFeature> {
        self.features.iter().find(|f| f.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.feature(name).is_some()
    }
}

/// Outcome of checking a would-be virtual feature against earlier
/// additions on the same type.
enum Addition {
    Same,
    Conflict,
    Absent,
}

/// Computes and caches [`VirtualSchema`]s for one view.
///
/// Construction resolves every weaving entry once, building name-keyed
/// filter/link indices and collecting diagnostics for dangling or
/// conflicting entries. `schema_for` then assembles a schema per concrete
/// type on first request; the cache is write-once per type and lives as
/// long as the owning view.
pub struct SchemaRegistry {
    hidden_types: BTreeSet<String>,
    hidden_features: BTreeMap<String, BTreeSet<String>>,
    hidden_nodes: BTreeSet<Nid>,
    /// Virtual features to append, per type, in weaving-model order.
    additions: BTreeMap<String, Vec<VirtualFeature>>,
    /// Resolved link endpoint values: source node → (relation, target).
    link_values: BTreeMap<Nid, Vec<(String, Nid)>>,
    cache: BTreeMap<String, Arc<VirtualSchema>>,
    diagnostics: Vec<WeaveDiagnostic>,
}

impl SchemaRegistry {
    pub fn new(models: &ModelSet, weaving: &WeavingModel) -> Self {
        let mut registry = SchemaRegistry {
            hidden_types: BTreeSet::new(),
            hidden_features: BTreeMap::new(),
            hidden_nodes: BTreeSet::new(),
            additions: BTreeMap::new(),
            link_values: BTreeMap::new(),
            cache: BTreeMap::new(),
            diagnostics: vec![],
        };
        let resolver = LinkResolver::new(models);

        for filter in weaving.filters() {
            match resolver.resolve(&filter.target) {
                Ok(ModelElement::Node(nid)) => match filter.match_mode {
                    MatchMode::Element => {
                        registry.hidden_nodes.insert(nid);
                    }
                    MatchMode::Type => match models.node(nid) {
                        Ok(node) => {
                            registry.hidden_types.insert(node.type_name.clone());
                        }
                        Err(_) => {
                            registry
                                .diagnostics
                                .push(WeaveDiagnostic::unresolved(&filter.name, filter.target.clone()));
                        }
                    },
                },
                Ok(ModelElement::Type(name)) => {
                    registry.hidden_types.insert(name);
                }
                Ok(ModelElement::Feature { type_name, feature }) => {
                    registry
                        .hidden_features
                        .entry(type_name)
                        .or_default()
                        .insert(feature);
                }
                Err(_) => {
                    tracing::debug!(
                        "[SchemaRegistry::new] dangling filter '{}' -> {}",
                        filter.name,
                        filter.target
                    );
                    registry
                        .diagnostics
                        .push(WeaveDiagnostic::unresolved(&filter.name, filter.target.clone()));
                }
            }
        }

        for link in weaving.links() {
            registry.attach_link(models, &resolver, link);
        }

        registry
    }

    /// Resolve one Link entry and register its virtual feature(s).
    ///
    /// Both endpoints must resolve or the entry is recorded as dangling
    /// and contributes nothing. First-declared entry wins on conflicts.
    fn attach_link(&mut self, models: &ModelSet, resolver: &LinkResolver<'_>, link: &Link) {
        let source = match resolver.resolve(&link.source) {
            Ok(element) => element,
            Err(_) => {
                self.diagnostics
                    .push(WeaveDiagnostic::unresolved(&link.name, link.source.clone()));
                return;
            }
        };
        let target = match resolver.resolve(&link.target) {
            Ok(element) => element,
            Err(_) => {
                self.diagnostics
                    .push(WeaveDiagnostic::unresolved(&link.name, link.target.clone()));
                return;
            }
        };

        let source_type = match element_type_name(models, &source) {
            Some(name) => name,
            None => {
                self.diagnostics
                    .push(WeaveDiagnostic::unresolved(&link.name, link.source.clone()));
                return;
            }
        };
        let target_type = match element_type_name(models, &target) {
            Some(name) => name,
            None => {
                self.diagnostics
                    .push(WeaveDiagnostic::unresolved(&link.name, link.target.clone()));
                return;
            }
        };

        // A virtual feature may not shadow a concrete one.
        if let Some((model, _)) = models.type_def(&source_type) {
            if let Ok(features) = model.all_features(&source_type) {
                if features.iter().any(|f| f.name == link.relation_name) {
                    self.diagnostics.push(WeaveDiagnostic::conflict(
                        &source_type,
                        &link.relation_name,
                        format!(
                            "link '{}' would shadow a concrete feature of '{source_type}'",
                            link.name
                        ),
                    ));
                    return;
                }
            }
        }

        let mut opposite = link.opposite.clone();
        let forward = VirtualFeature {
            name: link.relation_name.clone(),
            origin: FeatureOrigin::Virtual,
            is_reference: true,
            many: link.many,
            containment: false,
            opposite: opposite.as_ref().map(|o| o.name.clone()),
        };

        match self.classify_addition(&source_type, &forward) {
            Addition::Same => {
                // Same shape declared twice: merge silently, value still
                // recorded below.
            }
            Addition::Conflict => {
                self.diagnostics.push(WeaveDiagnostic::conflict(
                    &source_type,
                    &link.relation_name,
                    format!(
                        "link '{}' disagrees with an earlier entry on multiplicity or inverse; first entry wins",
                        link.name
                    ),
                ));
                return;
            }
            Addition::Absent => {
                if let Some(opp) = &opposite {
                    let inverse = VirtualFeature {
                        name: opp.name.clone(),
                        origin: FeatureOrigin::Virtual,
                        is_reference: true,
                        many: opp.many,
                        containment: false,
                        opposite: Some(link.relation_name.clone()),
                    };
                    match self.classify_addition(&target_type, &inverse) {
                        Addition::Same => {}
                        Addition::Conflict => {
                            self.diagnostics.push(WeaveDiagnostic::conflict(
                                &target_type,
                                &opp.name,
                                format!(
                                    "inverse of link '{}' disagrees with an earlier entry; link kept without inverse",
                                    link.name
                                ),
                            ));
                            opposite = None;
                        }
                        Addition::Absent => {
                            self.additions
                                .entry(target_type.clone())
                                .or_default()
                                .push(inverse);
                        }
                    }
                }
                let forward = VirtualFeature {
                    opposite: opposite.as_ref().map(|o| o.name.clone()),
                    ..forward
                };
                self.additions
                    .entry(source_type.clone())
                    .or_default()
                    .push(forward);
            }
        }

        // Instance endpoints attach a value at first virtualization of the
        // source node.
        if let (ModelElement::Node(source_nid), ModelElement::Node(target_nid)) = (source, target) {
            self.link_values
                .entry(source_nid)
                .or_default()
                .push((link.relation_name.clone(), target_nid));
        }
    }

    /// Compare a would-be virtual feature against any earlier addition of
    /// the same name on the same type.
    fn classify_addition(&self, type_name: &str, candidate: &VirtualFeature) -> Addition {
        match self
            .additions
            .get(type_name)
            .and_then(|list| list.iter().find(|f| f.name == candidate.name))
        {
            Some(existing) if existing == candidate => Addition::Same,
            Some(_) => Addition::Conflict,
            None => Addition::Absent,
        }
    }

    /// The cached schema for a concrete type, computing it on first
    /// request.
    pub fn schema_for(&mut self, models: &ModelSet, type_name: &str) -> Result<Arc<VirtualSchema>> {
        if let Some(schema) = self.cache.get(type_name) {
            return Ok(schema.clone());
        }

        let (model, _) = models.type_def(type_name).ok_or_else(|| {
            WeftError::NotFound(format!(
                "[SchemaRegistry::schema_for] type '{type_name}' is defined by no loaded model"
            ))
        })?;
        let lineage = model.type_lineage(type_name);

        let hidden: BTreeSet<&String> = lineage
            .iter()
            .filter_map(|ancestor| self.hidden_features.get(ancestor))
            .flatten()
            .collect();

        let mut features: Vec<VirtualFeature> = model
            .all_features(type_name)?
            .iter()
            .filter(|def| !hidden.contains(&def.name))
            .map(VirtualFeature::from_concrete)
            .collect();

        // Ancestors first, so a subtype sees inherited virtual features
        // before its own, matching concrete feature order.
        for ancestor in lineage.iter().rev() {
            for addition in self.additions.get(ancestor).into_iter().flatten() {
                if features.iter().any(|f| f.name == addition.name) {
                    tracing::debug!(
                        "[SchemaRegistry::schema_for] skipping duplicate feature '{}' on '{type_name}'",
                        addition.name
                    );
                    continue;
                }
                features.push(addition.clone());
            }
        }

        tracing::debug!(
            "[SchemaRegistry::schema_for] computed schema for '{type_name}': {} features",
            features.len()
        );
        let schema = Arc::new(VirtualSchema {
            type_name: type_name.to_string(),
            features,
        });
        self.cache.insert(type_name.to_string(), schema.clone());
        Ok(schema)
    }

    pub fn is_hidden_node(&self, nid: Nid) -> bool {
        self.hidden_nodes.contains(&nid)
    }

    pub fn is_hidden_type(&self, type_name: &str) -> bool {
        self.hidden_types.contains(type_name)
    }

    /// Drain the diagnostics collected during construction.
    pub fn take_diagnostics(&mut self) -> Vec<WeaveDiagnostic> {
        std::mem::take(&mut self.diagnostics)
    }

    /// Drain the resolved per-node link values for the virtualizer to
    /// materialize at first virtualization.
    pub fn take_link_values(&mut self) -> BTreeMap<Nid, Vec<(String, Nid)>> {
        std::mem::take(&mut self.link_values)
    }
}

fn element_type_name(models: &ModelSet, element: &ModelElement) -> Option<String> {
    match element {
        ModelElement::Node(nid) => models.node(*nid).ok().map(|n| n.type_name.clone()),
        ModelElement::Type(name) => Some(name.clone()),
        // A feature is not a valid link endpoint.
        ModelElement::Feature { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        model::{AttrValue, ConcreteModel, FeatureDef, TypeDef},
        weave::{Filter, Link, Opposite, WeavingEntry, WeavingModel},
    };
    use url::Url;

    fn two_models() -> ModelSet {
        let mut a = ConcreteModel::new(Url::parse("http://example.org/a").unwrap());
        a.add_type(
            TypeDef::new("Person")
                .with_feature(FeatureDef::attribute("name"))
                .with_feature(FeatureDef::reference("friends", true, false)),
        );
        let a1 = a.insert_node("a1", "Person").unwrap();
        a.add_root(a1);
        a.set_attr(a1, "name", AttrValue::from("Alice")).unwrap();

        let mut b = ConcreteModel::new(Url::parse("http://example.org/b").unwrap());
        b.add_type(
            TypeDef::new("Employee")
                .with_feature(FeatureDef::attribute("name"))
                .with_feature(FeatureDef::attribute("salary")),
        );
        let b1 = b.insert_node("b1", "Employee").unwrap();
        b.add_root(b1);

        let mut set = ModelSet::new();
        set.insert(a);
        set.insert(b);
        set
    }

    fn link_entry(name: &str, relation: &str, many: bool, opposite: Option<Opposite>) -> WeavingEntry {
        WeavingEntry::Link(Link {
            name: name.to_string(),
            source: "http://example.org/a#/a1".parse().unwrap(),
            target: "http://example.org/b#/b1".parse().unwrap(),
            relation_name: relation.to_string(),
            many,
            opposite,
            payload: None,
        })
    }

    #[test]
    fn test_filtered_feature_excluded() {
        let models = two_models();
        let mut weaving = WeavingModel::new("w");
        weaving.push(WeavingEntry::Filter(Filter {
            name: "hide-salary".to_string(),
            target: "http://example.org/b#//Employee/salary".parse().unwrap(),
            match_mode: MatchMode::Type,
        }));

        let mut registry = SchemaRegistry::new(&models, &weaving);
        let schema = registry.schema_for(&models, "Employee").unwrap();
        assert!(schema.contains("name"));
        assert!(!schema.contains("salary"));
    }

    #[test]
    fn test_link_adds_virtual_feature() {
        let models = two_models();
        let mut weaving = WeavingModel::new("w");
        weaving.push(link_entry(
            "employment",
            "employedAs",
            false,
            Some(Opposite {
                name: "employeeOf".to_string(),
                many: true,
            }),
        ));

        let mut registry = SchemaRegistry::new(&models, &weaving);
        let person = registry.schema_for(&models, "Person").unwrap();
        let feature = person.feature("employedAs").unwrap();
        assert_eq!(feature.origin, FeatureOrigin::Virtual);
        assert!(!feature.many);
        assert_eq!(feature.opposite.as_deref(), Some("employeeOf"));

        let employee = registry.schema_for(&models, "Employee").unwrap();
        let inverse = employee.feature("employeeOf").unwrap();
        assert!(inverse.many);
        assert_eq!(inverse.opposite.as_deref(), Some("employedAs"));

        assert!(registry.take_diagnostics().is_empty());
        assert_eq!(registry.take_link_values().len(), 1);
    }

    #[test]
    fn test_schema_cached_and_shared() {
        let models = two_models();
        let weaving = WeavingModel::new("w");
        let mut registry = SchemaRegistry::new(&models, &weaving);
        let first = registry.schema_for(&models, "Person").unwrap();
        let second = registry.schema_for(&models, "Person").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_conflicting_multiplicity_first_wins() {
        let models = two_models();
        let mut weaving = WeavingModel::new("w");
        weaving.push(link_entry("first", "employedAs", false, None));
        weaving.push(link_entry("second", "employedAs", true, None));

        let mut registry = SchemaRegistry::new(&models, &weaving);
        let diagnostics = registry.take_diagnostics();
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].is_conflict());

        let schema = registry.schema_for(&models, "Person").unwrap();
        assert!(!schema.feature("employedAs").unwrap().many);

        // The losing entry contributes no value either.
        let values = registry.take_link_values();
        assert_eq!(values.values().next().unwrap().len(), 1);
    }

    #[test]
    fn test_link_shadowing_concrete_feature_rejected() {
        let models = two_models();
        let mut weaving = WeavingModel::new("w");
        weaving.push(link_entry("bad", "friends", true, None));

        let mut registry = SchemaRegistry::new(&models, &weaving);
        let diagnostics = registry.take_diagnostics();
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].is_conflict());
        let schema = registry.schema_for(&models, "Person").unwrap();
        assert_eq!(schema.feature("friends").unwrap().origin, FeatureOrigin::Concrete);
    }

    #[test]
    fn test_dangling_entry_skipped() {
        let models = two_models();
        let mut weaving = WeavingModel::new("w");
        weaving.push(WeavingEntry::Link(Link {
            name: "dangling".to_string(),
            source: "http://example.org/a#/a1".parse().unwrap(),
            target: "http://example.org/missing#/x".parse().unwrap(),
            relation_name: "ghost".to_string(),
            many: false,
            opposite: None,
            payload: None,
        }));

        let mut registry = SchemaRegistry::new(&models, &weaving);
        let diagnostics = registry.take_diagnostics();
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].is_unresolved());

        let schema = registry.schema_for(&models, "Person").unwrap();
        assert!(!schema.contains("ghost"));
    }

    #[test]
    fn test_type_filter_hides_type() {
        let models = two_models();
        let mut weaving = WeavingModel::new("w");
        weaving.push(WeavingEntry::Filter(Filter {
            name: "hide-employees".to_string(),
            target: "http://example.org/b#//Employee".parse().unwrap(),
            match_mode: MatchMode::Type,
        }));
        let registry = SchemaRegistry::new(&models, &weaving);
        assert!(registry.is_hidden_type("Employee"));
        assert!(!registry.is_hidden_type("Person"));
    }
}
