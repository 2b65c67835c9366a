//! Execution graphs for common plans.
//!
//! Every scenario uses the single provider instance from
//! `applycore::testing::fixtures` and closes it once all its users are done.

use applycore::addrs::{DeposedKey, ResourceInstanceAddr};
use applycore::apply::Plan;
use applycore::errors::{BuildError, GraphEncodeError};
use applycore::exec::ExecObject;
use applycore::execgraph::{AnyResultRef, Builder, CloseBlockerKey, Graph, ResultRef};
use applycore::providers::ProviderClient;
use applycore::state::State;
use applycore::testing::fixtures;
use applycore::value::Value;

/// Pairs a prior state with a graph in its wire format.
pub fn plan(prior: State, graph: &Graph) -> Result<Plan, GraphEncodeError> {
    Ok(Plan::new(prior, graph.marshal()?))
}

/// What every planned `test_thing` looks like: `id` left to the provider.
pub fn planned_thing(name: &str) -> Value {
    Value::object([("id", Value::Unknown), ("name", Value::string(name))])
}

struct Scenario {
    builder: Builder,
    client: ResultRef<ProviderClient>,
    close: CloseBlockerKey,
}

impl Scenario {
    fn new() -> Self {
        let builder = Builder::new();
        let (client, close) = builder.provider_instance(fixtures::provider_instance(), AnyResultRef::Nil);
        Self { builder, client, close }
    }

    /// Plans and applies `addr` against the value planned for it, once
    /// `wait_for` is done.
    fn create(
        &self,
        addr: &ResourceInstanceAddr,
        planned: Value,
        wait_for: AnyResultRef,
    ) -> Result<ResultRef<ExecObject>, BuildError> {
        let b = &self.builder;
        let addr_ref = b.resource_instance_addr(addr.clone());
        let desired = b.resource_instance_desired(addr_ref, wait_for);
        let planned = b.constant_value(planned);
        let plan = b.managed_final_plan(desired, ResultRef::nil(), planned, self.client);
        let applied = b.managed_apply(plan, ResultRef::nil(), self.client);
        b.add_close_blocker(self.close, applied)?;
        b.set_resource_instance_final_state_result(addr.clone(), applied)?;
        Ok(applied)
    }

    fn finish(self) -> Graph {
        self.builder.finish()
    }
}

/// Creates every instance in `addrs` independently, each planned as
/// configured with its own resource name.
pub fn create_all(addrs: &[ResourceInstanceAddr]) -> Result<Graph, BuildError> {
    let scenario = Scenario::new();
    for addr in addrs {
        scenario.create(addr, planned_thing(&addr.name), AnyResultRef::Nil)?;
    }
    Ok(scenario.finish())
}

/// Like [`create_all`], but nothing about the new objects was known during
/// planning, as when their configuration refers to other instances.
pub fn create_all_deferred(addrs: &[ResourceInstanceAddr]) -> Result<Graph, BuildError> {
    let scenario = Scenario::new();
    for addr in addrs {
        scenario.create(addr, Value::Unknown, AnyResultRef::Nil)?;
    }
    Ok(scenario.finish())
}

/// Creates every instance in `addrs` in order, each one waiting for the
/// previous one to be applied. Planned values are unknown.
pub fn create_chain(addrs: &[ResourceInstanceAddr]) -> Result<Graph, BuildError> {
    let scenario = Scenario::new();
    let mut previous = AnyResultRef::Nil;
    for addr in addrs {
        previous = scenario.create(addr, Value::Unknown, previous)?.raw();
    }
    Ok(scenario.finish())
}

/// Replaces the current object at `addr` by deposing it and creating a new
/// one configured with `name`. The deposed object is the fallback if the
/// create produces nothing. Destroying the deposed object is left to a
/// later graph.
pub fn replace(addr: &ResourceInstanceAddr, name: &str) -> Result<Graph, BuildError> {
    let scenario = Scenario::new();
    let b = &scenario.builder;
    let addr_ref = b.resource_instance_addr(addr.clone());
    let prior = b.resource_instance_prior(addr_ref);
    let deposed = b.managed_depose(prior);
    let desired = b.resource_instance_desired(addr_ref, deposed);
    let planned = b.constant_value(planned_thing(name));
    let plan = b.managed_final_plan(desired, ResultRef::nil(), planned, scenario.client);
    let applied = b.managed_apply(plan, deposed, scenario.client);
    b.add_close_blocker(scenario.close, applied)?;
    b.set_resource_instance_final_state_result(addr.clone(), applied)?;
    Ok(scenario.finish())
}

/// Destroys the current object at `addr`.
pub fn destroy(addr: &ResourceInstanceAddr) -> Result<Graph, BuildError> {
    let scenario = Scenario::new();
    let b = &scenario.builder;
    let prior = b.resource_instance_prior(b.resource_instance_addr(addr.clone()));
    let planned = b.constant_value(Value::Null);
    let plan = b.managed_final_plan(ResultRef::nil(), prior, planned, scenario.client);
    let applied = b.managed_apply(plan, ResultRef::nil(), scenario.client);
    b.add_close_blocker(scenario.close, applied)?;
    b.set_resource_instance_final_state_result(addr.clone(), applied)?;
    Ok(scenario.finish())
}

/// Destroys the object deposed under `key` at `addr`.
pub fn destroy_deposed(addr: &ResourceInstanceAddr, key: DeposedKey) -> Result<Graph, BuildError> {
    let scenario = Scenario::new();
    let b = &scenario.builder;
    let deposed = b.managed_already_deposed(b.resource_instance_addr(addr.clone()), b.deposed_key(key));
    let planned = b.constant_value(Value::Null);
    let plan = b.managed_final_plan(ResultRef::nil(), deposed, planned, scenario.client);
    let applied = b.managed_apply(plan, ResultRef::nil(), scenario.client);
    b.add_close_blocker(scenario.close, applied)?;
    Ok(scenario.finish())
}

/// Moves the current object at `from` to `to` without calling the
/// provider for the object itself.
pub fn rename(from: &ResourceInstanceAddr, to: &ResourceInstanceAddr) -> Result<Graph, BuildError> {
    let b = Builder::new();
    let prior = b.resource_instance_prior(b.resource_instance_addr(from.clone()));
    let moved = b.managed_change_addr(prior, b.resource_instance_addr(to.clone()));
    b.set_resource_instance_final_state_result(to.clone(), moved)?;
    Ok(b.finish())
}

/// Reads the data source at `addr`, whose configuration was unknown during
/// planning.
pub fn read(addr: &ResourceInstanceAddr) -> Result<Graph, BuildError> {
    let scenario = Scenario::new();
    let b = &scenario.builder;
    let desired = b.resource_instance_desired(b.resource_instance_addr(addr.clone()), AnyResultRef::Nil);
    let planned = b.constant_value(Value::Unknown);
    let result = b.data_read(desired, planned, scenario.client);
    b.add_close_blocker(scenario.close, result)?;
    b.set_resource_instance_final_state_result(addr.clone(), result)?;
    Ok(scenario.finish())
}

/// Opens the ephemeral resource at `secret`, creates `consumer` once it is
/// open, and closes the ephemeral resource after the consumer is applied.
pub fn ephemeral_for(secret: &ResourceInstanceAddr, consumer: &ResourceInstanceAddr) -> Result<Graph, BuildError> {
    let scenario = Scenario::new();
    let b = &scenario.builder;
    let desired = b.resource_instance_desired(b.resource_instance_addr(secret.clone()), AnyResultRef::Nil);
    let open = b.ephemeral_open(desired, scenario.client);
    let object = b.ephemeral_state(open);
    let applied = scenario.create(consumer, planned_thing(&consumer.name), object.raw())?;
    let closed = b.ephemeral_close(object, scenario.client, applied);
    b.add_close_blocker(scenario.close, closed)?;
    b.set_resource_instance_final_state_result(secret.clone(), object)?;
    Ok(scenario.finish())
}

/// Closes the ephemeral resource at `addr` as found in prior state, without
/// ever opening it.
pub fn close_unopened(addr: &ResourceInstanceAddr) -> Result<Graph, BuildError> {
    let scenario = Scenario::new();
    let b = &scenario.builder;
    let prior = b.resource_instance_prior(b.resource_instance_addr(addr.clone()));
    let closed = b.ephemeral_close(prior, scenario.client, AnyResultRef::Nil);
    b.add_close_blocker(scenario.close, closed)?;
    Ok(scenario.finish())
}
