//! The apply orchestrator.
//!
//! An apply runs in two phases. [`prepare`] decodes the execution graph,
//! decodes every object of the prior state and compiles the graph against
//! an empty [`DispatcherSlot`]. Compilation never calls the dispatcher, so
//! the dispatcher can be finished afterwards: [`PreparedApply::execute`]
//! builds it from the prior state, the provider plugins and the Oracle,
//! installs it in the slot and runs the graph.
//!
//! Splitting the phases lets the Oracle be constructed with the graph's
//! [`ResourceValues`], which it needs to evaluate expressions referring to
//! resource instances the graph has not finished applying yet.

mod data;
mod ephemeral;
mod managed;
mod operations;
mod provider;

pub use operations::{ExecOperations, ExecOperationsBuilder};

use crate::cancel::CancelSignal;
use crate::config::ApplyConfig;
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::errors::ApplyError;
use crate::exec::{DispatcherSlot, Operations};
use crate::execgraph::{CompiledGraph, Graph, ResourceValues};
use crate::oracle::Oracle;
use crate::providers::Plugins;
use crate::state::{State, SyncState};
use crate::tracker::ApplyRequestTracker;
use std::fmt;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// What an apply works from: the prior state and the serialized execution
/// graph that was planned against it.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    /// The state the graph was planned against
    pub prior_state: State,
    /// The execution graph in its wire format
    pub execution_graph: Vec<u8>,
}

impl Plan {
    /// Pairs a prior state with a serialized execution graph.
    pub const fn new(prior_state: State, execution_graph: Vec<u8>) -> Self {
        Self {
            prior_state,
            execution_graph,
        }
    }
}

/// The result of an apply. Even a failed apply produces a state, which
/// records whatever was changed before the failures.
#[derive(Debug, Clone)]
pub struct ApplyOutcome {
    /// The new state snapshot
    pub state: State,
    /// Everything reported during the apply
    pub diagnostics: Diagnostics,
}

/// An apply whose graph is decoded and compiled, waiting for its Oracle.
pub struct PreparedApply {
    compiled: CompiledGraph,
    dispatcher: DispatcherSlot,
    prior_state: Arc<SyncState>,
    plugins: Arc<dyn Plugins>,
    config: ApplyConfig,
    tracker: Arc<ApplyRequestTracker>,
    serial: u64,
    lineage: Uuid,
}

impl fmt::Debug for PreparedApply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreparedApply")
            .field("compiled", &self.compiled)
            .field("prior_objects", &self.prior_state.len())
            .field("config", &self.config)
            .field("serial", &self.serial)
            .field("lineage", &self.lineage)
            .finish_non_exhaustive()
    }
}

/// Decodes and compiles a plan. Fails, before any provider is called, if
/// the graph is unusable or the prior state is in an unsupported format.
///
/// Individual prior objects that cannot be decoded do not fail preparation;
/// only the operations that need them will fail.
#[instrument(skip_all, fields(graph_bytes = plan.execution_graph.len()))]
pub fn prepare(plan: &Plan, plugins: Arc<dyn Plugins>, config: ApplyConfig) -> Result<PreparedApply, ApplyError> {
    plan.prior_state.check_format()?;
    let prior_state = Arc::new(SyncState::from_state(&plan.prior_state, plugins.as_ref()));

    let graph = Graph::unmarshal(&plan.execution_graph)?;
    info!(
        operations = graph.operation_count(),
        prior_objects = prior_state.len(),
        "decoded execution graph"
    );

    let dispatcher = DispatcherSlot::new();
    let compiled = graph.compile(dispatcher.clone()).map_err(ApplyError::Compile)?;
    info!(steps = compiled.step_count(), "compiled execution graph");

    let tracker = Arc::new(ApplyRequestTracker::new(compiled.request_tracker()));
    Ok(PreparedApply {
        compiled,
        dispatcher,
        prior_state,
        plugins,
        config,
        tracker,
        serial: plan.prior_state.serial,
        lineage: plan.prior_state.lineage,
    })
}

impl PreparedApply {
    /// Final values of resource instances, for the Oracle to wait on.
    pub fn resource_values(&self) -> ResourceValues {
        self.compiled.resource_values()
    }

    /// Every outstanding wait of this apply, including the Oracle's once
    /// execution starts.
    pub fn request_tracker(&self) -> Arc<ApplyRequestTracker> {
        Arc::clone(&self.tracker)
    }

    /// Finishes the dispatcher and runs the graph.
    #[instrument(skip_all, fields(steps = self.compiled.step_count()))]
    pub async fn execute(self, oracle: Arc<dyn Oracle>, cancel: CancelSignal) -> ApplyOutcome {
        if let Some(evaluator) = oracle.request_tracker() {
            self.tracker.attach_evaluator(evaluator);
        }

        let working_state = Arc::new(self.prior_state.deep_copy());
        let ops = match ExecOperations::builder()
            .prior_state(Arc::clone(&self.prior_state))
            .working_state(Arc::clone(&working_state))
            .plugins(Arc::clone(&self.plugins))
            .oracle(oracle)
            .parallelism(self.config.parallelism)
            .build()
        {
            Ok(ops) => Arc::new(ops),
            Err(err) => return self.abandon(&err),
        };
        if let Err(err) = self.dispatcher.install(Arc::clone(&ops) as Arc<dyn Operations>) {
            return self.abandon(&err);
        }

        let mut diagnostics = self.compiled.execute(cancel).await;
        if self.config.close_leftover_ephemerals {
            diagnostics.append(ops.close_leftover_ephemerals().await);
        }

        let state = working_state.to_state(self.serial.saturating_add(1), self.lineage);
        info!(
            diagnostics = diagnostics.len(),
            errors = diagnostics.has_errors(),
            serial = state.serial,
            "apply finished"
        );
        ApplyOutcome { state, diagnostics }
    }

    /// The outcome when execution could not even start: the prior state,
    /// unchanged.
    fn abandon(&self, err: &dyn std::error::Error) -> ApplyOutcome {
        ApplyOutcome {
            state: self.prior_state.to_state(self.serial, self.lineage),
            diagnostics: Diagnostics::from(Diagnostic::internal(
                "Failed to start apply",
                format!("The operation dispatcher could not be set up: {err}."),
            )),
        }
    }
}

/// Runs a whole apply with an Oracle that does not need the graph's
/// resource values.
///
/// Fatal problems are reported as diagnostics alongside the unchanged prior
/// state.
pub async fn apply(
    plan: &Plan,
    plugins: Arc<dyn Plugins>,
    oracle: Arc<dyn Oracle>,
    config: ApplyConfig,
    cancel: CancelSignal,
) -> ApplyOutcome {
    match prepare(plan, plugins, config) {
        Ok(prepared) => prepared.execute(oracle, cancel).await,
        Err(err) => {
            info!(error = %err, "apply aborted before execution");
            ApplyOutcome {
                state: plan.prior_state.clone(),
                diagnostics: err.into(),
            }
        }
    }
}
