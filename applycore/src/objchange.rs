//! Rules for how a resource instance object may change.
//!
//! These functions encode the contract between the engine and providers:
//! what a provider is told to plan against ([`proposed_new`]), what a valid
//! plan looks like ([`assert_plan_valid`]), and what a result must look like
//! given what was planned ([`assert_object_compatible`]).

use crate::errors::ObjectChangeError;
use crate::schema::Schema;
use crate::value::{AttrPath, Value};
use std::collections::BTreeSet;

/// Computes the value a provider should plan against.
///
/// Configuration wins wherever it sets an attribute. Computed attributes left
/// unset in configuration keep their prior value, or become unknown when
/// there is no prior object.
pub fn proposed_new(schema: &Schema, prior: &Value, config: &Value) -> Value {
    let Value::Object(_) = config else {
        return config.clone();
    };
    Value::Object(
        schema
            .attributes
            .iter()
            .map(|(name, attr)| {
                let config_val = config.attr(name);
                let value = if attr.computed && config_val.is_null() {
                    if prior.is_null() {
                        Value::Unknown
                    } else {
                        prior.attr(name).clone()
                    }
                } else {
                    config_val.clone()
                };
                (name.clone(), value)
            })
            .collect(),
    )
}

/// Checks a provider's planned value against the configuration and prior
/// state it was planned from. Returns every problem found.
pub fn assert_plan_valid(schema: &Schema, prior: &Value, config: &Value, planned: &Value) -> Vec<ObjectChangeError> {
    let root = AttrPath::root();
    let mut errs = Vec::new();

    match (config.is_null(), planned.is_null()) {
        (false, true) => {
            errs.push(change_error(&root, "planned for absence but config wants existence"));
            return errs;
        }
        (true, false) => {
            errs.push(change_error(&root, "planned for existence but config wants absence"));
            return errs;
        }
        (true, true) => return errs,
        (false, false) => {}
    }
    if !planned.is_known() {
        errs.push(change_error(&root, "planned value is entirely unknown"));
        return errs;
    }
    if let Err(e) = schema.conform(planned) {
        errs.push(change_error(&root, &e.to_string()));
        return errs;
    }

    for (name, attr) in &schema.attributes {
        let path = root.attr(name);
        let config_val = config.attr(name);
        let planned_val = planned.attr(name);
        let prior_val = prior.attr(name);

        if !attr.computed || !config_val.is_null() {
            if planned_val != config_val {
                errs.push(change_error(
                    &path,
                    &format!("planned value {planned_val} does not match config value {config_val}"),
                ));
            }
            continue;
        }

        if !prior.is_null() && planned_val.is_known() && planned_val != prior_val {
            errs.push(change_error(
                &path,
                &format!("planned value {planned_val} does not match prior value {prior_val}"),
            ));
        }
    }
    errs
}

/// Checks that `actual` is consistent with `planned`: every known part of
/// the planned value must be present, unchanged, in the actual value.
///
/// Unknown parts of `planned` accept anything.
pub fn assert_object_compatible(schema: &Schema, planned: &Value, actual: &Value) -> Vec<ObjectChangeError> {
    let mut errs = Vec::new();
    if let Err(e) = schema.conform(actual) {
        errs.push(change_error(&AttrPath::root(), &e.to_string()));
        return errs;
    }
    compare(planned, actual, &AttrPath::root(), &mut errs);
    errs
}

fn compare(planned: &Value, actual: &Value, path: &AttrPath, errs: &mut Vec<ObjectChangeError>) {
    match (planned, actual) {
        (Value::Unknown, _) => {}
        (_, Value::Unknown) => errs.push(change_error(path, &format!("was {planned}, but now unknown"))),
        (Value::Null, Value::Null) => {}
        (Value::Null, _) => errs.push(change_error(path, &format!("was absent, but now present as {actual}"))),
        (_, Value::Null) => errs.push(change_error(path, &format!("was {planned}, but now absent"))),
        (Value::List(p), Value::List(a)) => {
            if p.len() == a.len() {
                for (idx, (p, a)) in p.iter().zip(a).enumerate() {
                    compare(p, a, &path.index(idx), errs);
                }
            } else {
                errs.push(change_error(
                    path,
                    &format!("length changed from {} to {}", p.len(), a.len()),
                ));
            }
        }
        (Value::Object(p), Value::Object(a)) => {
            let keys: BTreeSet<&String> = p.keys().chain(a.keys()).collect();
            for key in keys {
                compare(planned.attr(key), actual.attr(key), &path.attr(key), errs);
            }
        }
        _ if planned != actual => errs.push(change_error(path, &format!("was {planned}, but now {actual}"))),
        _ => {}
    }
}

fn change_error(path: &AttrPath, message: &str) -> ObjectChangeError {
    ObjectChangeError {
        path: path.to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{AttrType, Attribute};

    fn schema() -> Schema {
        Schema::new(0)
            .with_attribute("id", Attribute::computed(AttrType::String))
            .with_attribute("ami", Attribute::required(AttrType::String))
            .with_attribute("size", Attribute::optional_computed(AttrType::String))
    }

    #[test]
    fn proposed_new_without_prior_marks_unset_computed_attributes_unknown() {
        let config = Value::object([("ami", Value::string("ami-1")), ("size", Value::Null), ("id", Value::Null)]);
        let proposed = proposed_new(&schema(), &Value::Null, &config);
        assert_eq!(proposed.attr("ami"), &Value::string("ami-1"));
        assert_eq!(proposed.attr("id"), &Value::Unknown);
        assert_eq!(proposed.attr("size"), &Value::Unknown);
    }

    #[test]
    fn proposed_new_keeps_prior_computed_values() {
        let prior = Value::object([
            ("id", Value::string("i-1")),
            ("ami", Value::string("ami-1")),
            ("size", Value::string("small")),
        ]);
        let config = Value::object([("ami", Value::string("ami-2")), ("size", Value::Null), ("id", Value::Null)]);
        let proposed = proposed_new(&schema(), &prior, &config);
        assert_eq!(proposed.attr("id"), &Value::string("i-1"));
        assert_eq!(proposed.attr("ami"), &Value::string("ami-2"));
        assert_eq!(proposed.attr("size"), &Value::string("small"));
    }

    #[test]
    fn proposed_new_for_destroy_is_null() {
        let prior = Value::object([("id", Value::string("i-1"))]);
        assert_eq!(proposed_new(&schema(), &prior, &Value::Null), Value::Null);
    }

    #[test]
    fn plan_must_follow_configuration_for_non_computed_attributes() {
        let config = Value::object([("ami", Value::string("ami-1"))]);
        let planned = Value::object([("ami", Value::string("ami-other")), ("id", Value::Unknown)]);
        let errs = assert_plan_valid(&schema(), &Value::Null, &config, &planned);
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0].path, ".ami");
    }

    #[test]
    fn plan_may_choose_computed_values_on_create() {
        let config = Value::object([("ami", Value::string("ami-1"))]);
        let planned = Value::object([
            ("ami", Value::string("ami-1")),
            ("id", Value::Unknown),
            ("size", Value::string("default")),
        ]);
        assert!(assert_plan_valid(&schema(), &Value::Null, &config, &planned).is_empty());
    }

    #[test]
    fn plan_for_destroy_must_be_null() {
        let prior = Value::object([("ami", Value::string("ami-1"))]);
        let errs = assert_plan_valid(&schema(), &prior, &Value::Null, &prior);
        assert_eq!(errs.len(), 1);
        assert!(errs[0].message.contains("config wants absence"));
        assert!(assert_plan_valid(&schema(), &prior, &Value::Null, &Value::Null).is_empty());
    }

    #[test]
    fn compatible_accepts_anything_for_unknown_planned_parts() {
        let planned = Value::object([("ami", Value::string("ami-1")), ("id", Value::Unknown)]);
        let actual = Value::object([("ami", Value::string("ami-1")), ("id", Value::string("i-9"))]);
        assert!(assert_object_compatible(&schema(), &planned, &actual).is_empty());
    }

    #[test]
    fn compatible_flags_changed_known_values_and_presence() {
        let planned = Value::object([("ami", Value::string("ami-1")), ("size", Value::Null)]);
        let actual = Value::object([("ami", Value::string("ami-2")), ("size", Value::string("large"))]);
        let errs = assert_object_compatible(&schema(), &planned, &actual);
        let paths: Vec<_> = errs.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec![".ami", ".size"]);
        assert!(errs[1].message.contains("was absent"));
    }

    #[test]
    fn compatible_flags_unknown_results() {
        let planned = Value::object([("ami", Value::string("ami-1"))]);
        let actual = Value::object([("ami", Value::Unknown)]);
        let errs = assert_object_compatible(&schema(), &planned, &actual);
        assert_eq!(errs.len(), 1);
        assert!(errs[0].message.contains("now unknown"));
    }
}
