//! Weaving models: the declarative description of how a view differs from
//! the plain union of its contributing models.
//!
//! A [`WeavingModel`] is an ordered list of [`WeavingEntry`] values
//! produced externally (by hand, by deserializing a `.weave` file, or by a
//! query-language evaluator behind the [`WeavingModelProducer`] trait).
//! The engine treats it as immutable input: entries are resolved once at
//! view construction and never change for the view's lifetime.

use std::{collections::HashMap, sync::Arc, time::Duration};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use toml::value::Table as TomlTable;

use crate::{
    address::ElementAddress,
    error::Result,
    model::ModelSet,
};

/// How a [`Filter`]'s target address is interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// Hide the addressed type (or feature of a type) from every schema.
    /// When the address names an instance node, its type is hidden.
    #[default]
    Type,
    /// Hide only the addressed instance node from the view.
    Element,
}

/// Marks elements as hidden/removed from the view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub name: String,
    pub target: ElementAddress,
    #[serde(default)]
    pub match_mode: MatchMode,
}

/// The inverse end of a [`Link`]'s virtual relation, created on the
/// target's type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opposite {
    pub name: String,
    #[serde(default = "default_true")]
    pub many: bool,
}

fn default_true() -> bool {
    true
}

/// Declares that, in the view, the source element's virtual node exposes a
/// relation named `relation_name` pointing at the target element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub name: String,
    pub source: ElementAddress,
    pub target: ElementAddress,
    pub relation_name: String,
    #[serde(default)]
    pub many: bool,
    /// Declared inverse, registered on the target's type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opposite: Option<Opposite>,
    /// Producer metadata carried through serialization, opaque to the
    /// engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<TomlTable>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeavingEntry {
    Filter(Filter),
    Link(Link),
}

impl WeavingEntry {
    pub fn name(&self) -> &str {
        match self {
            WeavingEntry::Filter(f) => &f.name,
            WeavingEntry::Link(l) => &l.name,
        }
    }
}

/// An ordered, immutable-once-loaded collection of weaving entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeavingModel {
    pub name: String,
    #[serde(default)]
    pub entries: Vec<WeavingEntry>,
}

impl WeavingModel {
    pub fn new(name: impl Into<String>) -> Self {
        WeavingModel {
            name: name.into(),
            entries: vec![],
        }
    }

    pub fn push(&mut self, entry: WeavingEntry) {
        self.entries.push(entry);
    }

    pub fn filters(&self) -> impl Iterator<Item = &Filter> {
        self.entries.iter().filter_map(|e| match e {
            WeavingEntry::Filter(f) => Some(f),
            WeavingEntry::Link(_) => None,
        })
    }

    pub fn links(&self) -> impl Iterator<Item = &Link> {
        self.entries.iter().filter_map(|e| match e {
            WeavingEntry::Link(l) => Some(l),
            WeavingEntry::Filter(_) => None,
        })
    }

    /// Deserialize from the TOML weaving format.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Serialize to the TOML weaving format.
    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string(self)?)
    }
}

/// Produces a [`WeavingModel`] from a weaving-specification text.
///
/// Implementors may evaluate declarative queries against the contributing
/// models and materialize the matches as element-address entries; that
/// evaluation is entirely the producer's business. The engine only
/// consumes the resulting entry list.
pub trait WeavingModelProducer: Send + Sync {
    fn produce(&self, text: &str, models: &ModelSet) -> Result<WeavingModel>;
}

/// Built-in producer for the plain TOML entry-list format.
#[derive(Debug, Default, Clone, Copy)]
pub struct TomlWeaving;

impl WeavingModelProducer for TomlWeaving {
    fn produce(&self, text: &str, _models: &ModelSet) -> Result<WeavingModel> {
        WeavingModel::from_toml_str(text)
    }
}

/// Explicit file-extension → producer registry.
///
/// Passed into the system at construction time rather than living in a
/// process-wide static, so two views can disagree about what `.weave`
/// means without stepping on each other.
pub struct ProducerMap(Arc<RwLock<HashMap<String, Arc<dyn WeavingModelProducer>>>>);

impl Clone for ProducerMap {
    fn clone(&self) -> Self {
        ProducerMap(self.0.clone())
    }
}

impl Default for ProducerMap {
    fn default() -> Self {
        Self::create()
    }
}

impl ProducerMap {
    /// Create a registry with the built-in TOML producer registered for
    /// `weave` and `toml`.
    pub fn create() -> Self {
        let map = ProducerMap(Arc::new(RwLock::new(HashMap::new())));
        map.register("weave", Arc::new(TomlWeaving));
        map.register("toml", Arc::new(TomlWeaving));
        map
    }

    /// Register a producer for a file extension (without the dot).
    ///
    /// If the extension is already claimed, the producer is overwritten
    /// and a log message emitted.
    pub fn register(&self, extension: &str, producer: Arc<dyn WeavingModelProducer>) {
        while self.0.is_locked() {
            tracing::info!("[ProducerMap::register] Waiting for write access to producer map");
            std::thread::sleep(Duration::from_millis(100));
        }

        let mut writer = self.0.write();
        if writer.contains_key(extension) {
            tracing::info!(
                "[ProducerMap::register] Overwriting producer for extension: {}",
                extension
            );
        }
        writer.insert(extension.to_string(), producer);
    }

    pub fn get(&self, extension: &str) -> Option<Arc<dyn WeavingModelProducer>> {
        while self.0.is_locked_exclusive() {
            tracing::info!("[ProducerMap::get] Waiting for read access to producer map");
            std::thread::sleep(Duration::from_millis(100));
        }

        let reader = self.0.read();
        reader.get(extension).cloned()
    }

    pub fn list_extensions(&self) -> Vec<String> {
        let reader = self.0.read();
        let mut extensions: Vec<String> = reader.keys().cloned().collect();
        extensions.sort();
        extensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_weaving() -> WeavingModel {
        let mut weaving = WeavingModel::new("sample");
        weaving.push(WeavingEntry::Filter(Filter {
            name: "hide-salary".to_string(),
            target: "http://example.org/b#//Employee/salary".parse().unwrap(),
            match_mode: MatchMode::Type,
        }));
        weaving.push(WeavingEntry::Link(Link {
            name: "employment".to_string(),
            source: "http://example.org/a#/a1".parse().unwrap(),
            target: "http://example.org/b#/b1".parse().unwrap(),
            relation_name: "employedAs".to_string(),
            many: false,
            opposite: Some(Opposite {
                name: "employeeOf".to_string(),
                many: true,
            }),
            payload: None,
        }));
        weaving
    }

    #[test]
    fn test_entry_iterators() {
        let weaving = sample_weaving();
        assert_eq!(weaving.filters().count(), 1);
        assert_eq!(weaving.links().count(), 1);
        assert_eq!(weaving.entries[1].name(), "employment");
    }

    #[test]
    fn test_toml_round_trip() {
        let weaving = sample_weaving();
        let text = weaving.to_toml_string().unwrap();
        let back = WeavingModel::from_toml_str(&text).unwrap();
        assert_eq!(weaving, back);
    }

    #[test]
    fn test_toml_defaults() {
        let text = r#"
name = "minimal"

[[entries]]
[entries.filter]
name = "f"
target = "http://example.org/a#//Person"
"#;
        let weaving = WeavingModel::from_toml_str(text).unwrap();
        let filter = weaving.filters().next().unwrap();
        assert_eq!(filter.match_mode, MatchMode::Type);
    }

    #[test]
    fn test_producer_map() {
        let producers = ProducerMap::create();
        assert!(producers.get("weave").is_some());
        assert!(producers.get("ecl").is_none());

        producers.register("ecl", Arc::new(TomlWeaving));
        assert!(producers.get("ecl").is_some());
        assert_eq!(producers.list_extensions(), vec!["ecl", "toml", "weave"]);
    }

    #[test]
    fn test_producer_parses_text() {
        let weaving = sample_weaving();
        let text = weaving.to_toml_string().unwrap();
        let produced = TomlWeaving.produce(&text, &ModelSet::new()).unwrap();
        assert_eq!(produced, weaving);
    }
}
