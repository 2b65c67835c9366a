//! Incremental construction of execution graphs.

use super::{AnyResultRef, Graph, OpCode, OperationDesc, ResultRef, Waiter};
use crate::addrs::{DeposedKey, ProviderInstanceAddr, ResourceInstanceAddr};
use crate::errors::BuildError;
use crate::exec::{ExecObject, FinalPlan, OpenEphemeral, ProviderInstanceConfig};
use crate::oracle::DesiredResourceInstance;
use crate::providers::ProviderClient;
use crate::value::Value;
use parking_lot::Mutex;
use std::collections::HashMap;

/// Identifies the close operation of a provider instance added by
/// [`Builder::provider_instance`], so that users of the provider can be
/// registered as blockers of its close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CloseBlockerKey(usize);

#[derive(Debug)]
struct PendingClose {
    client: AnyResultRef,
    blockers: Vec<AnyResultRef>,
}

#[derive(Debug, Default)]
struct BuilderState {
    graph: Graph,
    resource_inst_addr_refs: HashMap<ResourceInstanceAddr, usize>,
    provider_inst_addr_refs: HashMap<ProviderInstanceAddr, usize>,
    deposed_key_refs: HashMap<DeposedKey, usize>,
    pending_closes: Vec<PendingClose>,
}

impl BuilderState {
    fn operation(&mut self, opcode: OpCode, operands: Vec<AnyResultRef>) -> AnyResultRef {
        self.graph.ops.push(OperationDesc { opcode, operands });
        AnyResultRef::Operation(self.graph.ops.len() - 1)
    }

    fn waiter(&mut self, deps: Vec<AnyResultRef>) -> AnyResultRef {
        self.graph.waiters.push(deps);
        AnyResultRef::Waiter(self.graph.waiters.len() - 1)
    }

    fn ensure_waiter(&mut self, r: AnyResultRef) -> AnyResultRef {
        match r {
            AnyResultRef::Waiter(_) => r,
            AnyResultRef::Nil => self.waiter(Vec::new()),
            other => self.waiter(vec![other]),
        }
    }
}

/// Builds an execution graph.
///
/// All methods take `&self` and may be called from several threads at
/// once. Addresses and deposed keys are stored once no matter how often
/// they are requested; constant values are not deduplicated.
#[derive(Debug, Default)]
pub struct Builder {
    state: Mutex<BuilderState>,
}

impl Builder {
    /// An empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a constant value.
    pub fn constant_value(&self, value: Value) -> ResultRef<Value> {
        let mut state = self.state.lock();
        state.graph.constant_vals.push(value);
        ResultRef::new(AnyResultRef::Value(state.graph.constant_vals.len() - 1))
    }

    /// Adds a resource instance address, reusing an earlier one if equal.
    pub fn resource_instance_addr(&self, addr: ResourceInstanceAddr) -> ResultRef<ResourceInstanceAddr> {
        let mut state = self.state.lock();
        let state = &mut *state;
        let idx = *state.resource_inst_addr_refs.entry(addr).or_insert_with_key(|addr| {
            state.graph.resource_inst_addrs.push(addr.clone());
            state.graph.resource_inst_addrs.len() - 1
        });
        ResultRef::new(AnyResultRef::ResourceInstAddr(idx))
    }

    /// Adds a provider instance address, reusing an earlier one if equal.
    pub fn provider_instance_addr(&self, addr: ProviderInstanceAddr) -> ResultRef<ProviderInstanceAddr> {
        let mut state = self.state.lock();
        let state = &mut *state;
        let idx = *state.provider_inst_addr_refs.entry(addr).or_insert_with_key(|addr| {
            state.graph.provider_inst_addrs.push(addr.clone());
            state.graph.provider_inst_addrs.len() - 1
        });
        ResultRef::new(AnyResultRef::ProviderInstAddr(idx))
    }

    /// Adds a deposed key, reusing an earlier one if equal.
    pub fn deposed_key(&self, key: DeposedKey) -> ResultRef<DeposedKey> {
        let mut state = self.state.lock();
        let state = &mut *state;
        let idx = *state.deposed_key_refs.entry(key).or_insert_with(|| {
            state.graph.deposed_keys.push(key);
            state.graph.deposed_keys.len() - 1
        });
        ResultRef::new(AnyResultRef::DeposedKey(idx))
    }

    /// Adds a waiter that completes once everything in `deps` has.
    pub fn waiter(&self, deps: &[AnyResultRef]) -> ResultRef<Waiter> {
        ResultRef::new(self.state.lock().waiter(deps.to_vec()))
    }

    fn op<T>(&self, opcode: OpCode, operands: Vec<AnyResultRef>) -> ResultRef<T> {
        ResultRef::new(self.state.lock().operation(opcode, operands))
    }

    fn op_waiting<T>(&self, opcode: OpCode, mut operands: Vec<AnyResultRef>, wait_for: AnyResultRef) -> ResultRef<T> {
        let mut state = self.state.lock();
        let waiter = state.ensure_waiter(wait_for);
        operands.push(waiter);
        ResultRef::new(state.operation(opcode, operands))
    }

    /// Resolves a provider instance's configuration once `wait_for` has
    /// completed.
    pub fn provider_instance_config(
        &self,
        addr: ResultRef<ProviderInstanceAddr>,
        wait_for: impl Into<AnyResultRef>,
    ) -> ResultRef<ProviderInstanceConfig> {
        self.op_waiting(OpCode::ProviderInstanceConfig, vec![addr.raw()], wait_for.into())
    }

    /// Starts a provider instance.
    pub fn provider_instance_open(&self, config: ResultRef<ProviderInstanceConfig>) -> ResultRef<ProviderClient> {
        self.op(OpCode::ProviderInstanceOpen, vec![config.raw()])
    }

    /// Closes a provider instance once `wait_for` has completed.
    pub fn provider_instance_close(
        &self,
        client: ResultRef<ProviderClient>,
        wait_for: impl Into<AnyResultRef>,
    ) -> ResultRef<()> {
        self.op_waiting(OpCode::ProviderInstanceClose, vec![client.raw()], wait_for.into())
    }

    /// Adds the configure, open and close operations for one provider
    /// instance.
    ///
    /// The close operation is only added by [`Builder::finish`], waiting on
    /// every blocker registered with [`Builder::add_close_blocker`] under
    /// the returned key.
    pub fn provider_instance(
        &self,
        addr: ProviderInstanceAddr,
        wait_for: impl Into<AnyResultRef>,
    ) -> (ResultRef<ProviderClient>, CloseBlockerKey) {
        let addr = self.provider_instance_addr(addr);
        let config = self.provider_instance_config(addr, wait_for);
        let client = self.provider_instance_open(config);
        let mut state = self.state.lock();
        state.pending_closes.push(PendingClose {
            client: client.raw(),
            blockers: Vec::new(),
        });
        (client, CloseBlockerKey(state.pending_closes.len() - 1))
    }

    /// Delays the close registered under `key` until `blocker` completes.
    pub fn add_close_blocker(&self, key: CloseBlockerKey, blocker: impl Into<AnyResultRef>) -> Result<(), BuildError> {
        let mut state = self.state.lock();
        let pending = state
            .pending_closes
            .get_mut(key.0)
            .ok_or(BuildError::UnknownCloseBlocker(key.0))?;
        pending.blockers.push(blocker.into());
        Ok(())
    }

    /// Asks the evaluator for a resource instance's desired configuration
    /// once `wait_for` has completed.
    pub fn resource_instance_desired(
        &self,
        addr: ResultRef<ResourceInstanceAddr>,
        wait_for: impl Into<AnyResultRef>,
    ) -> ResultRef<DesiredResourceInstance> {
        self.op_waiting(OpCode::ResourceInstanceDesired, vec![addr.raw()], wait_for.into())
    }

    /// Reads a resource instance's current object from prior state.
    pub fn resource_instance_prior(&self, addr: ResultRef<ResourceInstanceAddr>) -> ResultRef<ExecObject> {
        self.op(OpCode::ResourceInstancePrior, vec![addr.raw()])
    }

    /// Re-derives the plan for a managed object at apply time.
    pub fn managed_final_plan(
        &self,
        desired: ResultRef<DesiredResourceInstance>,
        prior: ResultRef<ExecObject>,
        planned_val: ResultRef<Value>,
        client: ResultRef<ProviderClient>,
    ) -> ResultRef<FinalPlan> {
        self.op(
            OpCode::ManagedFinalPlan,
            vec![desired.raw(), prior.raw(), planned_val.raw(), client.raw()],
        )
    }

    /// Applies a final plan, restoring `fallback` if the provider produces
    /// nothing.
    pub fn managed_apply(
        &self,
        plan: ResultRef<FinalPlan>,
        fallback: ResultRef<ExecObject>,
        client: ResultRef<ProviderClient>,
    ) -> ResultRef<ExecObject> {
        self.op(OpCode::ManagedApply, vec![plan.raw(), fallback.raw(), client.raw()])
    }

    /// Deposes a current object.
    pub fn managed_depose(&self, current: ResultRef<ExecObject>) -> ResultRef<ExecObject> {
        self.op(OpCode::ManagedDepose, vec![current.raw()])
    }

    /// Reads a deposed object from prior state.
    pub fn managed_already_deposed(
        &self,
        addr: ResultRef<ResourceInstanceAddr>,
        key: ResultRef<DeposedKey>,
    ) -> ResultRef<ExecObject> {
        self.op(OpCode::ManagedAlreadyDeposed, vec![addr.raw(), key.raw()])
    }

    /// Moves a current object to a new address.
    pub fn managed_change_addr(
        &self,
        current: ResultRef<ExecObject>,
        new_addr: ResultRef<ResourceInstanceAddr>,
    ) -> ResultRef<ExecObject> {
        self.op(OpCode::ManagedChangeAddr, vec![current.raw(), new_addr.raw()])
    }

    /// Reads a data source.
    pub fn data_read(
        &self,
        desired: ResultRef<DesiredResourceInstance>,
        planned_val: ResultRef<Value>,
        client: ResultRef<ProviderClient>,
    ) -> ResultRef<ExecObject> {
        self.op(OpCode::DataRead, vec![desired.raw(), planned_val.raw(), client.raw()])
    }

    /// Opens an ephemeral resource.
    pub fn ephemeral_open(
        &self,
        desired: ResultRef<DesiredResourceInstance>,
        client: ResultRef<ProviderClient>,
    ) -> ResultRef<OpenEphemeral> {
        self.op(OpCode::EphemeralOpen, vec![desired.raw(), client.raw()])
    }

    /// Exposes an open ephemeral resource as an object.
    pub fn ephemeral_state(&self, open: ResultRef<OpenEphemeral>) -> ResultRef<ExecObject> {
        self.op(OpCode::EphemeralState, vec![open.raw()])
    }

    /// Closes an ephemeral resource once `wait_for` has completed.
    pub fn ephemeral_close(
        &self,
        object: ResultRef<ExecObject>,
        client: ResultRef<ProviderClient>,
        wait_for: impl Into<AnyResultRef>,
    ) -> ResultRef<()> {
        self.op_waiting(OpCode::EphemeralClose, vec![object.raw(), client.raw()], wait_for.into())
    }

    /// Records which result holds the final state of `addr`.
    pub fn set_resource_instance_final_state_result(
        &self,
        addr: ResourceInstanceAddr,
        result: ResultRef<ExecObject>,
    ) -> Result<(), BuildError> {
        let mut state = self.state.lock();
        if state.graph.resource_instance_results.contains_key(&addr) {
            return Err(BuildError::DuplicateFinalState(addr));
        }
        state.graph.resource_instance_results.insert(addr, result.raw());
        Ok(())
    }

    /// The result registered as the final state of `addr`.
    pub fn resource_instance_final_state_result(
        &self,
        addr: &ResourceInstanceAddr,
    ) -> Result<ResultRef<ExecObject>, BuildError> {
        self.state
            .lock()
            .graph
            .resource_instance_results
            .get(addr)
            .map(|r| ResultRef::new(*r))
            .ok_or_else(|| BuildError::MissingFinalState(addr.clone()))
    }

    /// Adds the pending provider close operations and returns the graph.
    pub fn finish(self) -> Graph {
        let mut state = self.state.into_inner();
        for pending in std::mem::take(&mut state.pending_closes) {
            let waiter = state.waiter(pending.blockers);
            state.operation(OpCode::ProviderInstanceClose, vec![pending.client, waiter]);
        }
        state.graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addrs::{ProviderAddr, ResourceMode};

    fn addr(name: &str) -> ResourceInstanceAddr {
        ResourceInstanceAddr::new(ResourceMode::Managed, "test_thing", name).unwrap()
    }

    fn provider() -> ProviderInstanceAddr {
        ProviderInstanceAddr::root(ProviderAddr::new("example.com", "test", "test"))
    }

    #[test]
    fn addresses_are_deduplicated_but_constants_are_not() {
        let builder = Builder::new();
        assert_eq!(builder.resource_instance_addr(addr("a")), builder.resource_instance_addr(addr("a")));
        assert_ne!(builder.resource_instance_addr(addr("a")), builder.resource_instance_addr(addr("b")));
        assert_eq!(builder.provider_instance_addr(provider()), builder.provider_instance_addr(provider()));
        assert_eq!(builder.deposed_key(DeposedKey::new(1)), builder.deposed_key(DeposedKey::new(1)));
        assert_ne!(builder.constant_value(Value::Null), builder.constant_value(Value::Null));
    }

    #[test]
    fn provider_close_waits_for_every_blocker() {
        let builder = Builder::new();
        let (client, key) = builder.provider_instance(provider(), AnyResultRef::Nil);
        let a = builder.resource_instance_addr(addr("a"));
        let b = builder.resource_instance_addr(addr("b"));
        let prior_a = builder.resource_instance_prior(a);
        let prior_b = builder.resource_instance_prior(b);
        builder.add_close_blocker(key, prior_a).unwrap();
        builder.add_close_blocker(key, prior_b).unwrap();
        let graph = builder.finish();

        let close = graph.ops.last().unwrap();
        assert_eq!(close.opcode, OpCode::ProviderInstanceClose);
        assert_eq!(close.operands[0], client.raw());
        let AnyResultRef::Waiter(waiter) = close.operands[1] else {
            panic!("close should wait on a waiter");
        };
        assert_eq!(graph.waiters[waiter], vec![prior_a.raw(), prior_b.raw()]);
        assert!(graph.ops.iter().all(|op| graph.check_operation(op).is_ok()));
    }

    #[test]
    fn close_blockers_from_elsewhere_are_rejected() {
        let builder = Builder::new();
        assert_eq!(
            builder.add_close_blocker(CloseBlockerKey(3), AnyResultRef::Nil),
            Err(BuildError::UnknownCloseBlocker(3))
        );
    }

    #[test]
    fn non_waiter_dependencies_are_wrapped_in_waiters() {
        let builder = Builder::new();
        let p = builder.provider_instance_addr(provider());
        let a = builder.resource_instance_addr(addr("a"));
        let prior = builder.resource_instance_prior(a);
        let config = builder.provider_instance_config(p, prior);
        let graph = builder.finish();

        let AnyResultRef::Operation(idx) = config.raw() else {
            panic!("expected an operation");
        };
        let AnyResultRef::Waiter(waiter) = graph.ops[idx].operands[1] else {
            panic!("expected a waiter operand");
        };
        assert_eq!(graph.waiters[waiter], vec![prior.raw()]);
    }

    #[test]
    fn final_state_results_are_registered_once() {
        let builder = Builder::new();
        let a = builder.resource_instance_addr(addr("a"));
        let prior = builder.resource_instance_prior(a);

        assert_eq!(
            builder.resource_instance_final_state_result(&addr("a")),
            Err(BuildError::MissingFinalState(addr("a")))
        );
        builder.set_resource_instance_final_state_result(addr("a"), prior).unwrap();
        assert_eq!(builder.resource_instance_final_state_result(&addr("a")), Ok(prior));
        assert_eq!(
            builder.set_resource_instance_final_state_result(addr("a"), prior),
            Err(BuildError::DuplicateFinalState(addr("a")))
        );
    }
}
