//! Common test data.
//!
//! Everything here revolves around one provider, `example.com/test/test`,
//! which offers a single schema under three names: `test_thing` (managed),
//! `test_data` (data source) and `test_secret` (ephemeral).

use super::mocks::{MockPlugins, MockProvider};
use super::oracle::StaticOracle;
use crate::addrs::{DeposedKey, ProviderAddr, ProviderInstanceAddr, ResourceInstanceAddr, ResourceMode};
use crate::apply::ExecOperations;
use crate::diagnostics::{Diagnostic, DiagnosticKind};
use crate::oracle::DesiredResourceInstance;
use crate::providers::ProviderClient;
use crate::schema::{AttrType, Attribute, Schema};
use crate::state::{ObjectStatus, ResourceInstanceObject, State, SyncState};
use crate::value::Value;
use std::sync::Arc;

/// The managed resource type.
pub const THING_TYPE: &str = "test_thing";
/// The data source type.
pub const DATA_TYPE: &str = "test_data";
/// The ephemeral resource type.
pub const SECRET_TYPE: &str = "test_secret";

/// `example.com/test/test`
pub fn provider_addr() -> ProviderAddr {
    ProviderAddr::new("example.com", "test", "test")
}

/// The default instance of [`provider_addr`] in the root module.
pub fn provider_instance() -> ProviderInstanceAddr {
    ProviderInstanceAddr::root(provider_addr())
}

fn addr(mode: ResourceMode, type_name: &str, name: &str) -> ResourceInstanceAddr {
    ResourceInstanceAddr::new(mode, type_name, name).expect("fixture names are valid")
}

/// `test_thing.<name>`
pub fn managed_addr(name: &str) -> ResourceInstanceAddr {
    addr(ResourceMode::Managed, THING_TYPE, name)
}

/// `data.test_data.<name>`
pub fn data_addr(name: &str) -> ResourceInstanceAddr {
    addr(ResourceMode::Data, DATA_TYPE, name)
}

/// `ephemeral.test_secret.<name>`
pub fn ephemeral_addr(name: &str) -> ResourceInstanceAddr {
    addr(ResourceMode::Ephemeral, SECRET_TYPE, name)
}

/// Version 1: a computed string `id` and an optional string `name`.
pub fn thing_schema() -> Schema {
    Schema::new(1)
        .with_attribute("id", Attribute::computed(AttrType::String))
        .with_attribute("name", Attribute::optional(AttrType::String))
}

/// The value of a thing.
pub fn thing_value(id: &str, name: &str) -> Value {
    Value::object([("id", Value::string(id)), ("name", Value::string(name))])
}

/// A ready `test_thing` object.
pub fn thing_object(id: &str, name: &str) -> ResourceInstanceObject {
    ResourceInstanceObject {
        value: thing_value(id, name),
        private: Vec::new(),
        status: ObjectStatus::Ready,
        provider_instance_addr: provider_instance(),
        resource_type: THING_TYPE.to_string(),
        schema_version: 1,
        dependencies: Vec::new(),
        create_before_destroy: false,
    }
}

/// The desired instance at `addr`, configured with `name` only.
pub fn desired(addr: &ResourceInstanceAddr, name: &str) -> DesiredResourceInstance {
    DesiredResourceInstance {
        addr: addr.clone(),
        config_val: Value::object([("name", Value::string(name))]),
        resource_type: addr.resource_type.clone(),
        provider: provider_addr(),
        provider_instance: provider_instance(),
        dependencies: Vec::new(),
        create_before_destroy: false,
    }
}

/// A plugin library where the test provider is `provider`.
pub fn plugins(provider: Arc<MockProvider>) -> MockPlugins {
    MockPlugins::new()
        .with_schema(provider_addr(), ResourceMode::Managed, THING_TYPE, thing_schema())
        .with_schema(provider_addr(), ResourceMode::Data, DATA_TYPE, thing_schema())
        .with_schema(provider_addr(), ResourceMode::Ephemeral, SECRET_TYPE, thing_schema())
        .with_provider(provider_addr(), provider)
}

/// An open client for the default provider instance.
pub fn client(provider: Arc<MockProvider>) -> ProviderClient {
    ProviderClient {
        instance_addr: provider_instance(),
        ops: provider,
    }
}

/// A dispatcher over `prior`, with a working state copied from it.
pub fn operations(prior: State, provider: Arc<MockProvider>, oracle: StaticOracle) -> ExecOperations {
    let plugins = plugins(provider);
    let prior_state = Arc::new(SyncState::from_state(&prior, &plugins));
    let working_state = Arc::new(prior_state.deep_copy());
    ExecOperations::builder()
        .prior_state(prior_state)
        .working_state(working_state)
        .plugins(Arc::new(plugins))
        .oracle(Arc::new(oracle))
        .build()
        .expect("every component is set")
}

/// A snapshot holding the given objects, encoded against [`thing_schema`].
pub fn state_with(objects: &[(ResourceInstanceAddr, DeposedKey, ResourceInstanceObject)]) -> State {
    let schema = thing_schema();
    let mut state = State::new();
    for (addr, key, object) in objects {
        let src = object.encode(addr, *key, &schema).expect("fixture objects conform");
        state.set_object(addr.clone(), *key, src);
    }
    state
}

/// A snapshot whose only object was stored under a schema version the
/// provider no longer uses.
pub fn state_with_undecodable(addr: &ResourceInstanceAddr) -> State {
    let mut state = state_with(&[(addr.clone(), DeposedKey::NOT_DEPOSED, thing_object("i-old", "old"))]);
    if let Some(instance) = state.resources.get_mut(addr) {
        if let Some(src) = instance.current.as_mut() {
            src.schema_version = 0;
        }
    }
    state
}

/// Replaces every unknown in `value` with the string `"generated"`, the way
/// a provider settles computed attributes.
pub fn fill_unknowns(value: &Value) -> Value {
    match value {
        Value::Unknown => Value::string("generated"),
        Value::List(items) => Value::List(items.iter().map(fill_unknowns).collect()),
        Value::Object(attrs) => Value::Object(
            attrs
                .iter()
                .map(|(name, attr)| (name.clone(), fill_unknowns(attr)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// An error a provider might report.
pub fn provider_error(message: &str) -> Diagnostic {
    Diagnostic::error(DiagnosticKind::General, "Provider error", message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undecodable_state_keeps_its_object() {
        let state = state_with_undecodable(&managed_addr("a"));
        let src = state.object(&managed_addr("a"), DeposedKey::NOT_DEPOSED).unwrap();
        assert_eq!(src.schema_version, 0);
    }

    #[test]
    fn unknowns_are_filled_everywhere() {
        let value = Value::object([
            ("id", Value::Unknown),
            ("tags", Value::List(vec![Value::Unknown, Value::string("kept")])),
        ]);
        let filled = fill_unknowns(&value);
        assert!(filled.is_wholly_known());
        assert_eq!(filled.attr("id"), &Value::string("generated"));
    }
}
