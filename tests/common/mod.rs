//! Shared test utilities for integration tests.
//!
//! Import from integration test files as:
//! ```ignore
//! mod common;
//! ```

use url::Url;
use weft_core::{
    model::{AttrValue, ConcreteModel, FeatureDef, ModelSet, Nid, TypeDef},
    weave::{Link, Opposite, WeavingEntry},
};

pub const HR_URI: &str = "http://example.org/hr";
pub const PAYROLL_URI: &str = "http://example.org/payroll";

/// Contributing model A: a `Person` node `a1` named Alice.
#[allow(dead_code)]
pub fn hr_model() -> (ConcreteModel, Nid) {
    let mut model = ConcreteModel::new(Url::parse(HR_URI).unwrap());
    model.add_type(
        TypeDef::new("Person")
            .with_feature(FeatureDef::attribute("name"))
            .with_feature(FeatureDef::reference("reports", true, true)),
    );
    let a1 = model.insert_node("a1", "Person").unwrap();
    model.add_root(a1);
    model.set_attr(a1, "name", AttrValue::from("Alice")).unwrap();
    (model, a1)
}

/// Contributing model B: an `Employee` node `b1`, also named Alice, with
/// a salary.
#[allow(dead_code)]
pub fn payroll_model() -> (ConcreteModel, Nid) {
    let mut model = ConcreteModel::new(Url::parse(PAYROLL_URI).unwrap());
    model.add_type(
        TypeDef::new("Employee")
            .with_feature(FeatureDef::attribute("name"))
            .with_feature(FeatureDef::attribute("salary")),
    );
    let b1 = model.insert_node("b1", "Employee").unwrap();
    model.add_root(b1);
    model.set_attr(b1, "name", AttrValue::from("Alice")).unwrap();
    model.set_attr(b1, "salary", AttrValue::Int(52_000)).unwrap();
    (model, b1)
}

/// Both models loaded into one set, with the ids of `a1` and `b1`.
#[allow(dead_code)]
pub fn loaded_models() -> (ModelSet, Nid, Nid) {
    let (hr, a1) = hr_model();
    let (payroll, b1) = payroll_model();
    let mut set = ModelSet::new();
    set.insert(hr);
    set.insert(payroll);
    (set, a1, b1)
}

/// The `employedAs` link from `(hr, /a1)` to `(payroll, /b1)`, with an
/// optional `employeeOf` inverse.
#[allow(dead_code)]
pub fn employment_link(with_opposite: bool) -> WeavingEntry {
    WeavingEntry::Link(Link {
        name: "employment".to_string(),
        source: format!("{HR_URI}#/a1").parse().unwrap(),
        target: format!("{PAYROLL_URI}#/b1").parse().unwrap(),
        relation_name: "employedAs".to_string(),
        many: false,
        opposite: with_opposite.then(|| Opposite {
            name: "employeeOf".to_string(),
            many: true,
        }),
        payload: None,
    })
}
