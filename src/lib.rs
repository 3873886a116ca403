//! # weft-core
//!
//! A Rust library for weaving independently-owned, read-only graph models
//! into coherent read/write views without copying or mutating the
//! originals.
//!
//! The name comes from weaving: contributing models are the warp, the
//! weaving model supplies the weft that ties them into one fabric.
//!
//! ## Overview
//!
//! weft-core materializes a **view** on demand over a fixed set of loaded
//! contributing models. A declarative [`WeavingModel`](weave::WeavingModel)
//! states which elements are hidden (Filter entries) and which elements
//! across different models appear linked or merged (Link entries). The
//! engine keeps the view lazily computed and identity-stable: every
//! concrete node has exactly one virtual wrapper per view, concrete reads
//! and writes delegate straight through so the view never goes stale, and
//! virtual-only relations keep their declared inverses synchronized.
//!
//! ### Key Features
//!
//! - **Identity-stable wrapping**: one memoized virtual node per concrete
//!   node per view, however the node is reached
//! - **Dynamic per-view schemas**: a concrete type's exposed features are
//!   recomputed per view, by name, never by position
//! - **Lazy relation projection**: many-valued concrete relations are
//!   wrapped, not copied; elements virtualize on access
//! - **Inverse synchronization**: virtual-only back-references update
//!   symmetrically without mutual recursion
//! - **Error tolerance**: dangling or conflicting weaving entries degrade
//!   the view gracefully and surface as diagnostics
//!
//! ## Architecture
//!
//! - **[`model`]**: the concrete model layer a loader populates
//!   (`ConcreteModel`, `ModelSet`, `Nid`)
//! - **[`address`]**: `ElementAddress`, the model-scoped pointers weaving
//!   entries use
//! - **[`weave`]**: weaving model data, the TOML persistence format, and
//!   the producer registry
//! - **[`schema`]**: per-view virtual schema computation and caching
//! - **[`resolver`]**: element-address resolution over loaded models
//! - **[`view`]**: the `Virtualizer` engine and its node/relation handles
//! - **[`diagnostic`]**: collected, non-fatal weaving diagnostics
//!
//! ## Quick Start
//!
//! Link a node from one model to a node in another, then read the woven
//! relation through the view:
//!
//! ```rust
//! use url::Url;
//! use weft_core::{
//!     model::{AttrValue, ConcreteModel, FeatureDef, ModelSet, TypeDef},
//!     view::{Value, Virtualizer},
//!     weave::{Link, WeavingEntry, WeavingModel},
//! };
//!
//! fn main() -> Result<(), weft_core::WeftError> {
//!     let mut hr = ConcreteModel::new(Url::parse("http://example.org/hr")?);
//!     hr.add_type(TypeDef::new("Person").with_feature(FeatureDef::attribute("name")));
//!     let alice = hr.insert_node("a1", "Person")?;
//!     hr.add_root(alice);
//!     hr.set_attr(alice, "name", AttrValue::from("Alice"))?;
//!
//!     let mut payroll = ConcreteModel::new(Url::parse("http://example.org/payroll")?);
//!     payroll.add_type(TypeDef::new("Employee").with_feature(FeatureDef::attribute("grade")));
//!     let e1 = payroll.insert_node("e1", "Employee")?;
//!     payroll.add_root(e1);
//!
//!     let mut models = ModelSet::new();
//!     models.insert(hr);
//!     models.insert(payroll);
//!
//!     let mut weaving = WeavingModel::new("employment");
//!     weaving.push(WeavingEntry::Link(Link {
//!         name: "employment".into(),
//!         source: "http://example.org/hr#/a1".parse()?,
//!         target: "http://example.org/payroll#/e1".parse()?,
//!         relation_name: "employedAs".into(),
//!         many: false,
//!         opposite: None,
//!         payload: None,
//!     }));
//!
//!     let mut view = Virtualizer::new(models, weaving);
//!     let v_alice = view.get_virtual(alice)?;
//!     let v_e1 = view.get_virtual(e1)?;
//!
//!     // The woven relation exists only in the view...
//!     assert_eq!(view.get(v_alice, "employedAs")?, Value::Node(v_e1));
//!     // ...while concrete features pass through unchanged.
//!     assert_eq!(view.get(v_alice, "name")?, Value::Attr(AttrValue::from("Alice")));
//!     Ok(())
//! }
//! ```
//!
//! ## Core Concepts
//!
//! ### Views are scoped
//!
//! A [`Virtualizer`](view::Virtualizer) is created per view over a fixed
//! `ModelSet` plus one weaving model. Virtual nodes and schemas live
//! exactly as long as their virtualizer; dropping it releases the whole
//! cache.
//!
//! ### Diagnostics, not failures
//!
//! A weaving entry whose address resolves to nothing, or that conflicts
//! with an earlier entry, is recorded and skipped. The worst failure
//! mode is an incomplete view, never an aborted construction. Programming
//! misuse (unknown feature names, unset) fails the individual call.
//!
//! ### Single-threaded by design
//!
//! Every operation runs to completion on the caller's thread; a
//! virtualizer is not designed for concurrent mutation. The one shared
//! structure, [`ProducerMap`](weave::ProducerMap), is thread-safe because
//! it is configuration, not view state.

pub mod address;
pub mod diagnostic;
pub mod error;
pub mod model;
pub mod resolver;
pub mod schema;
pub mod view;
pub mod weave;

pub use error::*;
