//! Element addresses: model-scoped locations of concrete elements.
//!
//! An [`ElementAddress`] is the only kind of cross-model pointer a weaving
//! model may contain. It pairs the URI of a contributing model with a
//! structural path inside that model, so it stays valid regardless of load
//! order and never embeds a process-local identity.

use std::{
    fmt::{Display, Formatter},
    str::FromStr,
};

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use url::Url;

use crate::error::WeftError;

/// A location descriptor naming one element inside one contributing model.
///
/// The string form is `model#path`, URI-fragment style:
///
/// - `http://example.org/hr#/a1/b2`: an instance node, addressed by the
///   local ids of its containment chain starting at a model root;
/// - `http://example.org/hr#//Person`: a type;
/// - `http://example.org/hr#//Person/name`: a feature of a type.
///
/// Paths starting with `//` address metamodel elements (types and their
/// features); a single leading `/` addresses instance nodes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ElementAddress {
    pub model: Url,
    pub path: String,
}

impl ElementAddress {
    pub fn new(model: Url, path: impl Into<String>) -> Self {
        ElementAddress {
            model,
            path: path.into(),
        }
    }

    /// True if the path addresses a type or a feature rather than an
    /// instance node.
    pub fn is_meta_path(&self) -> bool {
        self.path.starts_with("//")
    }

    /// Path segments with empty components removed.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.path.split('/').filter(|s| !s.is_empty())
    }
}

impl Display for ElementAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.model, self.path)
    }
}

impl FromStr for ElementAddress {
    type Err = WeftError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (model, path) = s.split_once('#').ok_or_else(|| {
            WeftError::Serialization(format!(
                "[ElementAddress] '{s}' has no '#' separator between model URI and element path"
            ))
        })?;
        if path.is_empty() {
            return Err(WeftError::Serialization(format!(
                "[ElementAddress] '{s}' has an empty element path"
            )));
        }
        let model = Url::parse(model)?;
        Ok(ElementAddress {
            model,
            path: path.to_string(),
        })
    }
}

// Serialized as the `model#path` string so weaving models stay readable
// and diffable on disk.
impl Serialize for ElementAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ElementAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_instance_address() {
        let addr: ElementAddress = "http://example.org/hr#/a1/b2".parse().unwrap();
        assert_eq!(addr.model.as_str(), "http://example.org/hr");
        assert_eq!(addr.path, "/a1/b2");
        assert!(!addr.is_meta_path());
        assert_eq!(addr.segments().collect::<Vec<_>>(), vec!["a1", "b2"]);
    }

    #[test]
    fn test_parse_meta_address() {
        let addr: ElementAddress = "http://example.org/hr#//Person/name".parse().unwrap();
        assert!(addr.is_meta_path());
        assert_eq!(addr.segments().collect::<Vec<_>>(), vec!["Person", "name"]);
    }

    #[test]
    fn test_display_round_trip() {
        let addr: ElementAddress = "http://example.org/hr#//Person".parse().unwrap();
        let reparsed: ElementAddress = addr.to_string().parse().unwrap();
        assert_eq!(addr, reparsed);
    }

    #[test]
    fn test_parse_errors() {
        assert!("http://example.org/hr".parse::<ElementAddress>().is_err());
        assert!("http://example.org/hr#".parse::<ElementAddress>().is_err());
        assert!("not a url#/a1".parse::<ElementAddress>().is_err());
    }

    #[test]
    fn test_serde_as_string() {
        #[derive(Serialize, Deserialize)]
        struct Holder {
            target: ElementAddress,
        }

        let addr: ElementAddress = "http://example.org/hr#/a1".parse().unwrap();
        let text = toml::to_string(&Holder {
            target: addr.clone(),
        })
        .unwrap();
        assert!(text.contains("http://example.org/hr#/a1"));

        let back: Holder = toml::from_str(&text).unwrap();
        assert_eq!(back.target, addr);
    }
}
