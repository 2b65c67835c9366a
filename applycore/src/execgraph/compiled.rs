//! Concurrent execution of a compiled graph.
//!
//! Every operation runs as its own task. A task first waits for the results
//! of its operands through promises, then calls the dispatcher and publishes
//! its own result. Unconnected operations therefore run concurrently, and
//! nothing waits longer than its dependency edges require.

use super::{AnyResultRef, Graph, OpCode, ResultKind};
use crate::addrs::{DeposedKey, ProviderInstanceAddr, ResourceInstanceAddr};
use crate::cancel::CancelSignal;
use crate::diagnostics::{Diagnostic, DiagnosticKind, Diagnostics};
use crate::exec::{DispatcherSlot, ExecObject, FinalPlan, OpenEphemeral, Operations, ProviderInstanceConfig};
use crate::oracle::DesiredResourceInstance;
use crate::promise::{self, Promise, Resolver};
use crate::providers::ProviderClient;
use crate::tracker::{GraphRequestTracker, RequestInfo};
use crate::value::Value;
use futures::future::join_all;
use std::fmt;
use std::sync::Arc;
use tracing::{info, trace};

/// How an operation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Ok,
    Failed,
    Cancelled,
}

impl Outcome {
    const fn combine(self, other: Self) -> Self {
        match (self, other) {
            (Self::Failed, _) | (_, Self::Failed) => Self::Failed,
            (Self::Cancelled, _) | (_, Self::Cancelled) => Self::Cancelled,
            (Self::Ok, Self::Ok) => Self::Ok,
        }
    }
}

#[derive(Debug, Clone)]
enum NodeValue {
    Unit,
    ProviderConfig(Option<Arc<ProviderInstanceConfig>>),
    ProviderClient(Option<Arc<ProviderClient>>),
    Desired(Option<Arc<DesiredResourceInstance>>),
    Object(Option<Arc<ExecObject>>),
    FinalPlan(Option<Arc<FinalPlan>>),
    OpenEphemeral(Option<Arc<OpenEphemeral>>),
}

impl NodeValue {
    const fn empty(kind: ResultKind) -> Self {
        match kind {
            ResultKind::Unit => Self::Unit,
            ResultKind::ProviderConfig => Self::ProviderConfig(None),
            ResultKind::ProviderClient => Self::ProviderClient(None),
            ResultKind::Desired => Self::Desired(None),
            ResultKind::Object => Self::Object(None),
            ResultKind::FinalPlan => Self::FinalPlan(None),
            ResultKind::OpenEphemeral => Self::OpenEphemeral(None),
        }
    }
}

#[derive(Debug, Clone)]
struct NodeResult {
    value: NodeValue,
    outcome: Outcome,
}

/// An operand after waiting for it.
#[derive(Debug)]
enum Resolved {
    Nil,
    Constant(usize),
    ResourceInstAddr(usize),
    ProviderInstAddr(usize),
    DeposedKey(usize),
    Waited,
    Node(NodeValue),
}

/// A graph ready to run.
pub struct CompiledGraph {
    graph: Arc<Graph>,
    resolvers: Vec<Resolver<NodeResult>>,
    promises: Arc<[Promise<NodeResult>]>,
    dispatcher: DispatcherSlot,
    tracker: Arc<GraphRequestTracker>,
}

impl fmt::Debug for CompiledGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledGraph")
            .field("steps", &self.resolvers.len())
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

impl CompiledGraph {
    pub(super) fn new(graph: Arc<Graph>, dispatcher: DispatcherSlot) -> Self {
        let (resolvers, promises): (Vec<_>, Vec<_>) = (0..graph.ops.len()).map(|_| promise::request()).unzip();
        Self {
            graph,
            resolvers,
            promises: promises.into(),
            dispatcher,
            tracker: Arc::new(GraphRequestTracker::new()),
        }
    }

    /// Number of operations that will run.
    pub fn step_count(&self) -> usize {
        self.resolvers.len()
    }

    /// The tracker recording every wait between operations.
    pub fn request_tracker(&self) -> Arc<GraphRequestTracker> {
        Arc::clone(&self.tracker)
    }

    /// A handle for reading final resource instance values, usable before
    /// and during execution.
    pub fn resource_values(&self) -> ResourceValues {
        ResourceValues {
            graph: Arc::clone(&self.graph),
            promises: Arc::clone(&self.promises),
            tracker: Arc::clone(&self.tracker),
        }
    }

    /// Runs every operation and returns every diagnostic they produced.
    ///
    /// Problems in one operation only stop the operations depending on it;
    /// independent parts of the graph still complete. Once `cancel` is
    /// raised, operations that have not started yet are skipped with a
    /// cancellation diagnostic, except close operations, which always run.
    pub async fn execute(self, cancel: CancelSignal) -> Diagnostics {
        let runtime = Arc::new(Runtime {
            graph: Arc::clone(&self.graph),
            promises: self.promises,
            dispatcher: self.dispatcher,
            tracker: self.tracker,
            cancel,
        });
        let handles: Vec<_> = self
            .resolvers
            .into_iter()
            .enumerate()
            .map(|(idx, resolver)| {
                let runtime = Arc::clone(&runtime);
                tokio::spawn(async move { runtime.run_step(idx, resolver).await })
            })
            .collect();

        let mut diags = Diagnostics::new();
        for (idx, joined) in join_all(handles).await.into_iter().enumerate() {
            match joined {
                Ok(step_diags) => diags.append(step_diags),
                Err(err) => diags.push(Diagnostic::internal(
                    "Apply-time execution error",
                    format!("The task running {} failed: {err}.", self.graph.operation_debug_summary(idx)),
                )),
            }
        }
        info!(
            steps = self.graph.ops.len(),
            diagnostics = diags.len(),
            errors = diags.has_errors(),
            "execution graph finished"
        );
        diags
    }
}

/// Promise-driven access to the final values of resource instances.
#[derive(Clone)]
pub struct ResourceValues {
    graph: Arc<Graph>,
    promises: Arc<[Promise<NodeResult>]>,
    tracker: Arc<GraphRequestTracker>,
}

impl fmt::Debug for ResourceValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceValues")
            .field("resource_instances", &self.graph.resource_instance_results.len())
            .finish_non_exhaustive()
    }
}

impl ResourceValues {
    /// Waits for the final value of `addr`.
    ///
    /// Unknown if the graph does not produce `addr`, or if the operation
    /// producing it did not succeed; null if it succeeded with no object.
    pub async fn resource_instance_value(&self, addr: &ResourceInstanceAddr) -> Value {
        let Some(AnyResultRef::Operation(idx)) = self.graph.resource_instance_results.get(addr).copied() else {
            return Value::Unknown;
        };
        let Some(promise) = self.promises.get(idx) else {
            return Value::Unknown;
        };
        let _wait = self.tracker.track(promise.id(), || RequestInfo {
            name: format!("final state of {addr}"),
        });
        match promise.wait().await {
            Ok(NodeResult {
                outcome: Outcome::Ok,
                value: NodeValue::Object(obj),
            }) => obj.map_or(Value::Null, |obj| obj.state.value.clone()),
            _ => Value::Unknown,
        }
    }
}

struct Runtime {
    graph: Arc<Graph>,
    promises: Arc<[Promise<NodeResult>]>,
    dispatcher: DispatcherSlot,
    tracker: Arc<GraphRequestTracker>,
    cancel: CancelSignal,
}

impl Runtime {
    async fn run_step(&self, idx: usize, resolver: Resolver<NodeResult>) -> Diagnostics {
        let op = &self.graph.ops[idx];
        let opcode = op.opcode;
        trace!(step = idx, op = %opcode, "waiting for operands");

        let mut diags = Diagnostics::new();
        let mut outcome = Outcome::Ok;
        let mut args = Vec::with_capacity(op.operands.len());
        for r in &op.operands {
            match self.resolve(*r).await {
                Ok((resolved, operand_outcome)) => {
                    let waiter = matches!(r, AnyResultRef::Waiter(_));
                    if !(opcode.is_close() && waiter) {
                        outcome = outcome.combine(operand_outcome);
                    }
                    args.push(resolved);
                }
                Err(diag) => {
                    diags.push(diag);
                    outcome = Outcome::Failed;
                }
            }
        }

        if outcome == Outcome::Ok && !opcode.is_close() && self.cancel.is_cancelled() {
            outcome = Outcome::Cancelled;
        }

        let value = match outcome {
            Outcome::Ok => {
                trace!(step = idx, op = %opcode, "ready to execute");
                let (value, step_diags) = self.dispatch(idx, opcode, args).await;
                diags.append(step_diags);
                if diags.has_errors() {
                    outcome = Outcome::Failed;
                }
                value
            }
            Outcome::Cancelled => {
                diags.push(Diagnostic::error(
                    DiagnosticKind::Cancelled,
                    "Operation cancelled",
                    format!(
                        "{} did not run because the apply was cancelled.",
                        self.graph.operation_debug_summary(idx)
                    ),
                ));
                NodeValue::empty(opcode.result_kind())
            }
            // The failing dependency has already reported why.
            Outcome::Failed => NodeValue::empty(opcode.result_kind()),
        };

        resolver.resolve(NodeResult { value, outcome });
        diags
    }

    async fn resolve(&self, r: AnyResultRef) -> Result<(Resolved, Outcome), Diagnostic> {
        Ok(match r {
            AnyResultRef::Nil => (Resolved::Nil, Outcome::Ok),
            AnyResultRef::Value(idx) => (Resolved::Constant(idx), Outcome::Ok),
            AnyResultRef::ResourceInstAddr(idx) => (Resolved::ResourceInstAddr(idx), Outcome::Ok),
            AnyResultRef::ProviderInstAddr(idx) => (Resolved::ProviderInstAddr(idx), Outcome::Ok),
            AnyResultRef::DeposedKey(idx) => (Resolved::DeposedKey(idx), Outcome::Ok),
            AnyResultRef::Operation(idx) => {
                let result = self.wait_for(idx).await?;
                (Resolved::Node(result.value), result.outcome)
            }
            AnyResultRef::Waiter(idx) => {
                let mut outcome = Outcome::Ok;
                for dep in self.graph.waiter_operations(idx) {
                    outcome = outcome.combine(self.wait_for(dep).await?.outcome);
                }
                (Resolved::Waited, outcome)
            }
        })
    }

    async fn wait_for(&self, idx: usize) -> Result<NodeResult, Diagnostic> {
        let summary = || self.graph.operation_debug_summary(idx);
        let promise = self
            .promises
            .get(idx)
            .ok_or_else(|| Diagnostic::internal("Apply-time execution error", format!("No result slot for {}.", summary())))?;
        let _wait = self.tracker.track(promise.id(), || RequestInfo {
            name: format!("internal operation: {}", summary()),
        });
        promise.wait().await.map_err(|_| {
            Diagnostic::internal(
                "Apply-time execution error",
                format!("A request for {:?} was left unresolved.", summary()),
            )
        })
    }

    async fn dispatch(&self, idx: usize, opcode: OpCode, args: Vec<Resolved>) -> (NodeValue, Diagnostics) {
        let Some(ops) = self.dispatcher.get() else {
            return (
                NodeValue::empty(opcode.result_kind()),
                Diagnostics::from(Diagnostic::internal(
                    "Apply-time execution error",
                    format!(
                        "{} ran before the operation dispatcher was installed.",
                        self.graph.operation_debug_summary(idx)
                    ),
                )),
            );
        };
        let mut args = Args {
            graph: &self.graph,
            summary: self.graph.operation_debug_summary(idx),
            items: args.into_iter(),
            position: 0,
        };
        match call(ops.as_ref(), opcode, &mut args).await {
            Ok(done) => done,
            Err(diag) => (NodeValue::empty(opcode.result_kind()), Diagnostics::from(diag)),
        }
    }
}

/// Typed access to an operation's resolved operands, in order.
struct Args<'g> {
    graph: &'g Graph,
    summary: String,
    items: std::vec::IntoIter<Resolved>,
    position: usize,
}

impl<'g> Args<'g> {
    fn next(&mut self) -> (usize, Option<Resolved>) {
        let position = self.position;
        self.position += 1;
        (position, self.items.next())
    }

    fn mismatch(&self, position: usize, expected: &str) -> Diagnostic {
        Diagnostic::internal(
            "Apply-time execution error",
            format!("Operand {position} of {} is not {expected}.", self.summary),
        )
    }

    fn absent(&self, position: usize, expected: &str) -> Diagnostic {
        Diagnostic::error(
            DiagnosticKind::InvalidGraph,
            "Invalid execution graph",
            format!(
                "Operand {position} of {} produced no value, but {expected} is required here.",
                self.summary
            ),
        )
    }

    fn required<T>(&self, position: usize, expected: &str, value: Option<T>) -> Result<T, Diagnostic> {
        value.ok_or_else(|| self.absent(position, expected))
    }

    fn value(&mut self) -> Result<&'g Value, Diagnostic> {
        match self.next() {
            (position, Some(Resolved::Constant(idx))) => {
                self.graph.constant_vals.get(idx).ok_or_else(|| self.mismatch(position, "a constant"))
            }
            (position, _) => Err(self.mismatch(position, "a constant")),
        }
    }

    fn resource_addr(&mut self) -> Result<&'g ResourceInstanceAddr, Diagnostic> {
        match self.next() {
            (position, Some(Resolved::ResourceInstAddr(idx))) => self
                .graph
                .resource_inst_addrs
                .get(idx)
                .ok_or_else(|| self.mismatch(position, "a resource instance address")),
            (position, _) => Err(self.mismatch(position, "a resource instance address")),
        }
    }

    fn provider_addr(&mut self) -> Result<&'g ProviderInstanceAddr, Diagnostic> {
        match self.next() {
            (position, Some(Resolved::ProviderInstAddr(idx))) => self
                .graph
                .provider_inst_addrs
                .get(idx)
                .ok_or_else(|| self.mismatch(position, "a provider instance address")),
            (position, _) => Err(self.mismatch(position, "a provider instance address")),
        }
    }

    fn deposed_key(&mut self) -> Result<DeposedKey, Diagnostic> {
        match self.next() {
            (position, Some(Resolved::DeposedKey(idx))) => self
                .graph
                .deposed_keys
                .get(idx)
                .copied()
                .ok_or_else(|| self.mismatch(position, "a deposed key")),
            (position, _) => Err(self.mismatch(position, "a deposed key")),
        }
    }

    fn waiter(&mut self) -> Result<(), Diagnostic> {
        match self.next() {
            (_, Some(Resolved::Waited)) => Ok(()),
            (position, _) => Err(self.mismatch(position, "a waiter")),
        }
    }

    fn config(&mut self) -> Result<Arc<ProviderInstanceConfig>, Diagnostic> {
        const WHAT: &str = "a provider instance configuration";
        match self.next() {
            (position, Some(Resolved::Node(NodeValue::ProviderConfig(v)))) => self.required(position, WHAT, v),
            (position, _) => Err(self.mismatch(position, WHAT)),
        }
    }

    fn client(&mut self) -> Result<Arc<ProviderClient>, Diagnostic> {
        const WHAT: &str = "a provider client";
        match self.next() {
            (position, Some(Resolved::Node(NodeValue::ProviderClient(v)))) => self.required(position, WHAT, v),
            (position, _) => Err(self.mismatch(position, WHAT)),
        }
    }

    fn desired(&mut self) -> Result<Option<Arc<DesiredResourceInstance>>, Diagnostic> {
        match self.next() {
            (_, Some(Resolved::Node(NodeValue::Desired(v)))) => Ok(v),
            (_, Some(Resolved::Nil)) => Ok(None),
            (position, _) => Err(self.mismatch(position, "a desired resource instance")),
        }
    }

    fn required_desired(&mut self) -> Result<Arc<DesiredResourceInstance>, Diagnostic> {
        let position = self.position;
        let desired = self.desired()?;
        self.required(position, "a desired resource instance", desired)
    }

    fn object(&mut self) -> Result<Option<Arc<ExecObject>>, Diagnostic> {
        match self.next() {
            (_, Some(Resolved::Node(NodeValue::Object(v)))) => Ok(v),
            (_, Some(Resolved::Nil)) => Ok(None),
            (position, _) => Err(self.mismatch(position, "a resource instance object")),
        }
    }

    fn required_object(&mut self) -> Result<Arc<ExecObject>, Diagnostic> {
        let position = self.position;
        let object = self.object()?;
        self.required(position, "a resource instance object", object)
    }

    fn final_plan(&mut self) -> Result<Option<Arc<FinalPlan>>, Diagnostic> {
        match self.next() {
            (_, Some(Resolved::Node(NodeValue::FinalPlan(v)))) => Ok(v),
            (position, _) => Err(self.mismatch(position, "a final plan")),
        }
    }

    fn open_ephemeral(&mut self) -> Result<Arc<OpenEphemeral>, Diagnostic> {
        const WHAT: &str = "an open ephemeral resource";
        match self.next() {
            (position, Some(Resolved::Node(NodeValue::OpenEphemeral(v)))) => self.required(position, WHAT, v),
            (position, _) => Err(self.mismatch(position, WHAT)),
        }
    }
}

fn wrap<T>(v: Option<T>) -> Option<Arc<T>> {
    v.map(Arc::new)
}

async fn with_postconditions(
    ops: &dyn Operations,
    (result, mut diags): (Option<ExecObject>, Diagnostics),
) -> (NodeValue, Diagnostics) {
    if let Some(obj) = &result {
        if !diags.has_errors() {
            diags.append(ops.resource_instance_postconditions(obj).await);
        }
    }
    (NodeValue::Object(wrap(result)), diags)
}

/// Calls the dispatcher method for `opcode` with typed operands.
async fn call(ops: &dyn Operations, opcode: OpCode, args: &mut Args<'_>) -> Result<(NodeValue, Diagnostics), Diagnostic> {
    Ok(match opcode {
        OpCode::ProviderInstanceConfig => {
            let addr = args.provider_addr()?;
            args.waiter()?;
            let (config, diags) = ops.provider_instance_config(addr).await;
            (NodeValue::ProviderConfig(wrap(config)), diags)
        }
        OpCode::ProviderInstanceOpen => {
            let config = args.config()?;
            let (client, diags) = ops.provider_instance_open(&config).await;
            (NodeValue::ProviderClient(wrap(client)), diags)
        }
        OpCode::ProviderInstanceClose => {
            let client = args.client()?;
            args.waiter()?;
            (NodeValue::Unit, ops.provider_instance_close(&client).await)
        }
        OpCode::ResourceInstanceDesired => {
            let addr = args.resource_addr()?;
            args.waiter()?;
            let (desired, diags) = ops.resource_instance_desired(addr).await;
            (NodeValue::Desired(wrap(desired)), diags)
        }
        OpCode::ResourceInstancePrior => {
            let addr = args.resource_addr()?;
            let (prior, diags) = ops.resource_instance_prior(addr).await;
            (NodeValue::Object(wrap(prior)), diags)
        }
        OpCode::ManagedFinalPlan => {
            let desired = args.desired()?;
            let prior = args.object()?;
            let planned_val = args.value()?;
            let client = args.client()?;
            let (plan, diags) = ops
                .managed_final_plan(desired.as_deref(), prior.as_deref(), planned_val, &client)
                .await;
            (NodeValue::FinalPlan(wrap(plan)), diags)
        }
        OpCode::ManagedApply => {
            let plan = args.final_plan()?;
            let fallback = args.object()?;
            let client = args.client()?;
            let applied = ops.managed_apply(plan.as_deref(), fallback.as_deref(), &client).await;
            with_postconditions(ops, applied).await
        }
        OpCode::ManagedDepose => {
            let current = args.object()?;
            let (deposed, diags) = ops.managed_depose(current.as_deref()).await;
            (NodeValue::Object(wrap(deposed)), diags)
        }
        OpCode::ManagedAlreadyDeposed => {
            let addr = args.resource_addr()?;
            let key = args.deposed_key()?;
            let (deposed, diags) = ops.managed_already_deposed(addr, key).await;
            (NodeValue::Object(wrap(deposed)), diags)
        }
        OpCode::ManagedChangeAddr => {
            let current = args.object()?;
            let new_addr = args.resource_addr()?;
            let (moved, diags) = ops.managed_change_addr(current.as_deref(), new_addr).await;
            (NodeValue::Object(wrap(moved)), diags)
        }
        OpCode::DataRead => {
            let desired = args.required_desired()?;
            let planned_val = args.value()?;
            let client = args.client()?;
            let read = ops.data_read(&desired, planned_val, &client).await;
            with_postconditions(ops, read).await
        }
        OpCode::EphemeralOpen => {
            let desired = args.required_desired()?;
            let client = args.client()?;
            let (open, diags) = ops.ephemeral_open(&desired, &client).await;
            (NodeValue::OpenEphemeral(wrap(open)), diags)
        }
        OpCode::EphemeralState => {
            let open = args.open_ephemeral()?;
            let state = ops.ephemeral_state(&open).await;
            with_postconditions(ops, state).await
        }
        OpCode::EphemeralClose => {
            let object = args.required_object()?;
            let client = args.client()?;
            args.waiter()?;
            (NodeValue::Unit, ops.ephemeral_close(&object, &client).await)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addrs::{ProviderAddr, ResourceMode};
    use crate::cancel::cancel_pair;
    use crate::execgraph::{Builder, ResultRef};
    use crate::state::{ObjectStatus, ResourceInstanceObject};
    use crate::testing::MockProvider;
    use crate::tracker::RequestTracker;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::time::Duration;
    use tokio::sync::Notify;

    fn addr(name: &str) -> ResourceInstanceAddr {
        ResourceInstanceAddr::new(ResourceMode::Managed, "test_thing", name).unwrap()
    }

    fn provider_addr() -> ProviderInstanceAddr {
        ProviderInstanceAddr::root(ProviderAddr::new("example.com", "test", "test"))
    }

    fn object(addr: &ResourceInstanceAddr, id: &str) -> ExecObject {
        ExecObject {
            addr: addr.clone(),
            deposed_key: DeposedKey::NOT_DEPOSED,
            state: Arc::new(ResourceInstanceObject {
                value: Value::object([("id", Value::string(id))]),
                private: vec![],
                status: ObjectStatus::Ready,
                provider_instance_addr: provider_addr(),
                resource_type: addr.resource_type.clone(),
                schema_version: 0,
                dependencies: vec![],
                create_before_destroy: false,
            }),
        }
    }

    /// Records calls and serves priors from a fixed list. Priors named in
    /// `failing` report an error; `gate` holds `slow` priors back.
    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
        failing: Vec<String>,
        slow: Vec<String>,
        gate: Notify,
    }

    impl Recorder {
        fn record(&self, call: String) {
            self.calls.lock().push(call);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl Operations for Recorder {
        async fn provider_instance_config(
            &self,
            addr: &ProviderInstanceAddr,
        ) -> (Option<ProviderInstanceConfig>, Diagnostics) {
            self.record(format!("config {addr}"));
            let config = ProviderInstanceConfig {
                addr: addr.clone(),
                config_val: Value::Null,
            };
            (Some(config), Diagnostics::new())
        }

        async fn provider_instance_open(&self, config: &ProviderInstanceConfig) -> (Option<ProviderClient>, Diagnostics) {
            self.record("open".to_string());
            let client = ProviderClient {
                instance_addr: config.addr.clone(),
                ops: Arc::new(MockProvider::new()),
            };
            (Some(client), Diagnostics::new())
        }

        async fn provider_instance_close(&self, _client: &ProviderClient) -> Diagnostics {
            self.record("close".to_string());
            Diagnostics::new()
        }

        async fn resource_instance_desired(
            &self,
            addr: &ResourceInstanceAddr,
        ) -> (Option<DesiredResourceInstance>, Diagnostics) {
            self.record(format!("desired {addr}"));
            (None, Diagnostics::new())
        }

        async fn resource_instance_prior(&self, addr: &ResourceInstanceAddr) -> (Option<ExecObject>, Diagnostics) {
            let name = addr.name.to_string();
            if self.slow.contains(&name) {
                self.gate.notified().await;
            }
            self.record(format!("prior {addr}"));
            if self.failing.contains(&name) {
                let diag = Diagnostic::error(DiagnosticKind::InvalidState, "Cannot decode", addr.to_string());
                return (None, Diagnostics::from(diag));
            }
            (Some(object(addr, &name)), Diagnostics::new())
        }

        async fn resource_instance_postconditions(&self, result: &ExecObject) -> Diagnostics {
            self.record(format!("postconditions {}", result.addr));
            Diagnostics::new()
        }

        async fn managed_final_plan(
            &self,
            _desired: Option<&DesiredResourceInstance>,
            prior: Option<&ExecObject>,
            planned_val: &Value,
            _provider: &ProviderClient,
        ) -> (Option<FinalPlan>, Diagnostics) {
            let Some(prior) = prior else {
                return (None, Diagnostics::new());
            };
            self.record(format!("plan {}", prior.addr));
            let plan = FinalPlan {
                addr: prior.addr.clone(),
                deposed_key: prior.deposed_key,
                resource_type: prior.addr.resource_type.clone(),
                provider_instance: provider_addr(),
                prior_val: prior.state.value.clone(),
                config_val: planned_val.clone(),
                planned_val: planned_val.clone(),
                planned_private: vec![],
                prior_private: vec![],
                dependencies: vec![],
                create_before_destroy: false,
            };
            (Some(plan), Diagnostics::new())
        }

        async fn managed_apply(
            &self,
            plan: Option<&FinalPlan>,
            _fallback: Option<&ExecObject>,
            _provider: &ProviderClient,
        ) -> (Option<ExecObject>, Diagnostics) {
            let Some(plan) = plan else {
                return (None, Diagnostics::new());
            };
            self.record(format!("apply {}", plan.addr));
            let mut applied = object(&plan.addr, "applied");
            Arc::make_mut(&mut applied.state).value = plan.planned_val.clone();
            (Some(applied), Diagnostics::new())
        }

        async fn managed_depose(&self, current: Option<&ExecObject>) -> (Option<ExecObject>, Diagnostics) {
            (current.cloned(), Diagnostics::new())
        }

        async fn managed_already_deposed(
            &self,
            addr: &ResourceInstanceAddr,
            deposed_key: DeposedKey,
        ) -> (Option<ExecObject>, Diagnostics) {
            (Some(object(addr, "old").into_deposed(deposed_key)), Diagnostics::new())
        }

        async fn managed_change_addr(
            &self,
            current: Option<&ExecObject>,
            new_addr: &ResourceInstanceAddr,
        ) -> (Option<ExecObject>, Diagnostics) {
            (current.cloned().map(|obj| obj.with_new_addr(new_addr.clone())), Diagnostics::new())
        }

        async fn data_read(
            &self,
            _desired: &DesiredResourceInstance,
            _planned_val: &Value,
            _provider: &ProviderClient,
        ) -> (Option<ExecObject>, Diagnostics) {
            (None, Diagnostics::new())
        }

        async fn ephemeral_open(
            &self,
            _desired: &DesiredResourceInstance,
            _provider: &ProviderClient,
        ) -> (Option<OpenEphemeral>, Diagnostics) {
            (None, Diagnostics::new())
        }

        async fn ephemeral_state(&self, _open: &OpenEphemeral) -> (Option<ExecObject>, Diagnostics) {
            (None, Diagnostics::new())
        }

        async fn ephemeral_close(&self, _object: &ExecObject, _provider: &ProviderClient) -> Diagnostics {
            Diagnostics::new()
        }
    }

    /// prior -> plan -> apply for each name, all sharing one provider.
    fn update_graph(names: &[&str]) -> Graph {
        let builder = Builder::new();
        let (client, key) = builder.provider_instance(provider_addr(), AnyResultRef::Nil);
        for name in names {
            let a = builder.resource_instance_addr(addr(name));
            let prior = builder.resource_instance_prior(a);
            let planned = builder.constant_value(Value::object([("id", Value::string(format!("{name}-new")))]));
            let plan = builder.managed_final_plan(ResultRef::nil(), prior, planned, client);
            let applied = builder.managed_apply(plan, ResultRef::nil(), client);
            builder.add_close_blocker(key, applied).unwrap();
            builder.set_resource_instance_final_state_result(addr(name), applied).unwrap();
        }
        builder.finish()
    }

    fn install(recorder: Recorder) -> (DispatcherSlot, Arc<Recorder>) {
        let recorder = Arc::new(recorder);
        let slot = DispatcherSlot::new();
        slot.install(Arc::clone(&recorder) as Arc<dyn Operations>).unwrap();
        (slot, recorder)
    }

    #[tokio::test]
    async fn operations_run_in_dependency_order() {
        let (slot, recorder) = install(Recorder::default());
        let compiled = update_graph(&["a"]).compile(slot).unwrap();
        let values = compiled.resource_values();

        let diags = compiled.execute(CancelSignal::never()).await;
        assert!(diags.is_empty(), "{diags}");
        let calls = recorder.calls();
        let position = |call: &str| calls.iter().position(|c| c == call).unwrap();
        // The prior read does not depend on the provider, so only these
        // orderings are fixed.
        assert!(position("config provider[\"example.com/test/test\"]") < position("open"));
        assert!(position("open") < position("plan test_thing.a"));
        assert!(position("prior test_thing.a") < position("plan test_thing.a"));
        assert!(position("plan test_thing.a") < position("apply test_thing.a"));
        assert!(position("apply test_thing.a") < position("postconditions test_thing.a"));
        assert_eq!(calls.last().map(String::as_str), Some("close"));
        assert_eq!(calls.len(), 7);
        assert_eq!(
            values.resource_instance_value(&addr("a")).await,
            Value::object([("id", Value::string("a-new"))])
        );
        assert_eq!(values.resource_instance_value(&addr("zzz")).await, Value::Unknown);
    }

    #[tokio::test]
    async fn failures_only_stop_dependent_operations() {
        let recorder = Recorder {
            failing: vec!["bad".to_string()],
            ..Recorder::default()
        };
        let (slot, recorder) = install(recorder);
        let compiled = update_graph(&["bad", "good"]).compile(slot).unwrap();
        let values = compiled.resource_values();

        let diags = compiled.execute(CancelSignal::never()).await;
        assert_eq!(diags.len(), 1);
        assert_eq!(diags.iter().next().unwrap().kind, DiagnosticKind::InvalidState);

        let calls = recorder.calls();
        assert!(calls.contains(&"apply test_thing.good".to_string()));
        assert!(!calls.contains(&"plan test_thing.bad".to_string()));
        // The provider still closes, even though one of its users failed.
        assert_eq!(calls.last().map(String::as_str), Some("close"));

        assert_eq!(values.resource_instance_value(&addr("bad")).await, Value::Unknown);
        assert_eq!(
            values.resource_instance_value(&addr("good")).await,
            Value::object([("id", Value::string("good-new"))])
        );
    }

    #[tokio::test]
    async fn outstanding_waits_are_tracked() {
        let recorder = Recorder {
            slow: vec!["a".to_string()],
            ..Recorder::default()
        };
        let (slot, recorder) = install(recorder);
        let compiled = update_graph(&["a"]).compile(slot).unwrap();
        let tracker = compiled.request_tracker();
        let run = tokio::spawn(compiled.execute(CancelSignal::never()));

        let mut names = Vec::new();
        for _ in 0..100 {
            names = tracker.active_requests().into_iter().map(|(_, info)| info.name).collect();
            if names.iter().any(|n| n.starts_with("internal operation: ResourceInstancePrior")) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(
            names.contains(&"internal operation: ResourceInstancePrior(test_thing.a)".to_string()),
            "{names:?}"
        );

        recorder.gate.notify_one();
        let diags = run.await.unwrap();
        assert!(diags.is_empty(), "{diags}");
        assert!(tracker.active_requests().is_empty());
    }

    #[tokio::test]
    async fn cancellation_skips_new_operations_but_still_closes() {
        let recorder = Recorder {
            slow: vec!["a".to_string()],
            ..Recorder::default()
        };
        let (slot, recorder) = install(recorder);
        let compiled = update_graph(&["a"]).compile(slot).unwrap();
        let (handle, signal) = cancel_pair();
        let run = tokio::spawn(compiled.execute(signal));

        // Let the prior read start, then cancel while it is in flight.
        for _ in 0..100 {
            if recorder.calls().contains(&"open".to_string()) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.cancel();
        recorder.gate.notify_one();

        let diags = run.await.unwrap();
        let cancelled: Vec<_> = diags.of_kind(DiagnosticKind::Cancelled).collect();
        assert_eq!(cancelled.len(), 2, "{diags}");
        assert!(cancelled[0].detail.starts_with("ManagedFinalPlan("));
        assert!(cancelled[1].detail.starts_with("ManagedApply("));

        let calls = recorder.calls();
        // The in-flight read finished; nothing after it started, except close.
        assert!(calls.contains(&"prior test_thing.a".to_string()));
        assert!(!calls.contains(&"plan test_thing.a".to_string()));
        assert_eq!(calls.last().map(String::as_str), Some("close"));
    }

    #[tokio::test]
    async fn executing_without_a_dispatcher_is_an_internal_error() {
        let compiled = update_graph(&["a"]).compile(DispatcherSlot::new()).unwrap();
        let diags = compiled.execute(CancelSignal::never()).await;
        assert!(diags.has_errors());
        assert!(diags.iter().all(|d| d.kind == DiagnosticKind::Internal));
    }
}
