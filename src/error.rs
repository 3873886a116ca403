use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::ParseError as UrlParseError;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, WeftError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
pub enum WeftError {
    #[error("Custom error: {0}")]
    Custom(String),
    #[error("Model error: {0}")]
    Model(String),
    #[error("Item Not Found: {0}")]
    NotFound(String),
    #[error("(De)Serialization error: {0}")]
    Serialization(String),
    #[error("Type mismatch: {0}")]
    TypeMismatch(String),
    #[error("Unknown feature '{feature}' on type '{type_name}'")]
    UnknownFeature { type_name: String, feature: String },
    #[error("Unresolved model reference '{model}' for element path '{path}'. The contributing model is not loaded in this view's ModelSet.")]
    UnresolvedModel { model: String, path: String },
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),
}

impl From<toml::de::Error> for WeftError {
    fn from(src: toml::de::Error) -> WeftError {
        WeftError::Serialization(format!("Toml deserialization error: {src}"))
    }
}

impl From<toml::ser::Error> for WeftError {
    fn from(src: toml::ser::Error) -> WeftError {
        WeftError::Serialization(format!("Toml serialization error: {src}"))
    }
}

impl From<uuid::Error> for WeftError {
    fn from(src: uuid::Error) -> WeftError {
        WeftError::Serialization(format!("UUID conversion failed: {src}"))
    }
}

impl From<UrlParseError> for WeftError {
    fn from(src: UrlParseError) -> WeftError {
        WeftError::Serialization(format!("Invalid URL: {src}"))
    }
}

impl From<fmt::Error> for WeftError {
    fn from(x: fmt::Error) -> Self {
        WeftError::Custom(format!("{x}"))
    }
}
