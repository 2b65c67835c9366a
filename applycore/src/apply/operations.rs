//! The operation dispatcher used for real applies.

use super::ephemeral::EphemeralCloser;
use crate::addrs::{object_label, DeposedKey, ProviderAddr, ProviderInstanceAddr, ResourceInstanceAddr, ResourceMode};
use crate::config::Parallelism;
use crate::diagnostics::{Diagnostic, DiagnosticKind, Diagnostics};
use crate::errors::BuildError;
use crate::exec::{ExecObject, FinalPlan, OpenEphemeral, Operations, ProviderInstanceConfig};
use crate::oracle::{DesiredResourceInstance, Oracle};
use crate::providers::{Plugins, ProviderClient};
use crate::schema::Schema;
use crate::state::SyncState;
use crate::value::Value;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::trace;

/// Drives every side effect of an apply: provider calls and updates to the
/// working state.
///
/// The prior state is only ever read. The working state starts as a copy of
/// it and receives every change.
pub struct ExecOperations {
    pub(super) prior_state: Arc<SyncState>,
    pub(super) working_state: Arc<SyncState>,
    pub(super) plugins: Arc<dyn Plugins>,
    pub(super) oracle: Arc<dyn Oracle>,
    pub(super) ephemerals: Mutex<HashMap<ResourceInstanceAddr, EphemeralCloser>>,
    provider_calls: Semaphore,
}

impl fmt::Debug for ExecOperations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecOperations")
            .field("prior_objects", &self.prior_state.len())
            .field("working_objects", &self.working_state.len())
            .field("open_ephemerals", &self.ephemerals.lock().len())
            .field("provider_call_permits", &self.provider_calls.available_permits())
            .finish_non_exhaustive()
    }
}

impl ExecOperations {
    /// Starts building a dispatcher.
    pub fn builder() -> ExecOperationsBuilder {
        ExecOperationsBuilder::new()
    }

    /// Runs a provider call once a slot is free. At most `parallelism`
    /// calls are in flight at once.
    pub(super) async fn provider_call<F: Future>(&self, call: F) -> F::Output {
        // The semaphore is never closed, so acquiring cannot fail.
        let _permit = self.provider_calls.acquire().await.ok();
        call.await
    }

    pub(super) fn schema(
        &self,
        provider: &ProviderAddr,
        mode: ResourceMode,
        type_name: &str,
    ) -> Result<Arc<Schema>, Diagnostic> {
        self.plugins
            .resource_type_schema(provider, mode, type_name)
            .map_err(|err| Diagnostic::from_error(&err))
    }

    /// The stored object at `addr` and `deposed_key` in `store`, reporting a
    /// decode failure for that object alone.
    pub(super) fn stored_object(
        store: &SyncState,
        addr: &ResourceInstanceAddr,
        deposed_key: DeposedKey,
    ) -> (Option<ExecObject>, Diagnostics) {
        match store.get(addr, deposed_key) {
            None => (None, Diagnostics::new()),
            Some(Ok(state)) => (
                Some(ExecObject {
                    addr: addr.clone(),
                    deposed_key,
                    state,
                }),
                Diagnostics::new(),
            ),
            Some(Err(err)) => (
                None,
                Diagnostics::from(Diagnostic::error(
                    DiagnosticKind::InvalidState,
                    "Invalid resource instance object in state",
                    format!(
                        "The stored {} cannot be used: {err}.",
                        object_label(addr, deposed_key)
                    ),
                )),
            ),
        }
    }
}

#[async_trait]
impl Operations for ExecOperations {
    async fn provider_instance_config(
        &self,
        addr: &ProviderInstanceAddr,
    ) -> (Option<ProviderInstanceConfig>, Diagnostics) {
        self.configure_provider_instance(addr).await
    }

    async fn provider_instance_open(&self, config: &ProviderInstanceConfig) -> (Option<ProviderClient>, Diagnostics) {
        self.open_provider_instance(config).await
    }

    async fn provider_instance_close(&self, client: &ProviderClient) -> Diagnostics {
        self.close_provider_instance(client).await
    }

    async fn resource_instance_desired(
        &self,
        addr: &ResourceInstanceAddr,
    ) -> (Option<DesiredResourceInstance>, Diagnostics) {
        self.oracle.desired_resource_instance(addr).await
    }

    async fn resource_instance_prior(&self, addr: &ResourceInstanceAddr) -> (Option<ExecObject>, Diagnostics) {
        Self::stored_object(&self.prior_state, addr, DeposedKey::NOT_DEPOSED)
    }

    async fn resource_instance_postconditions(&self, result: &ExecObject) -> Diagnostics {
        // Condition checks belong to the evaluator, which does not run any
        // during apply yet.
        trace!(addr = %result.addr, "no postconditions to check");
        Diagnostics::new()
    }

    async fn managed_final_plan(
        &self,
        desired: Option<&DesiredResourceInstance>,
        prior: Option<&ExecObject>,
        planned_val: &Value,
        provider: &ProviderClient,
    ) -> (Option<FinalPlan>, Diagnostics) {
        self.final_plan(desired, prior, planned_val, provider).await
    }

    async fn managed_apply(
        &self,
        plan: Option<&FinalPlan>,
        fallback: Option<&ExecObject>,
        provider: &ProviderClient,
    ) -> (Option<ExecObject>, Diagnostics) {
        self.apply_change(plan, fallback, provider).await
    }

    async fn managed_depose(&self, current: Option<&ExecObject>) -> (Option<ExecObject>, Diagnostics) {
        self.depose(current)
    }

    async fn managed_already_deposed(
        &self,
        addr: &ResourceInstanceAddr,
        deposed_key: DeposedKey,
    ) -> (Option<ExecObject>, Diagnostics) {
        Self::stored_object(&self.prior_state, addr, deposed_key)
    }

    async fn managed_change_addr(
        &self,
        current: Option<&ExecObject>,
        new_addr: &ResourceInstanceAddr,
    ) -> (Option<ExecObject>, Diagnostics) {
        self.change_addr(current, new_addr)
    }

    async fn data_read(
        &self,
        desired: &DesiredResourceInstance,
        planned_val: &Value,
        provider: &ProviderClient,
    ) -> (Option<ExecObject>, Diagnostics) {
        self.read_data(desired, planned_val, provider).await
    }

    async fn ephemeral_open(
        &self,
        desired: &DesiredResourceInstance,
        provider: &ProviderClient,
    ) -> (Option<OpenEphemeral>, Diagnostics) {
        self.open_ephemeral(desired, provider).await
    }

    async fn ephemeral_state(&self, open: &OpenEphemeral) -> (Option<ExecObject>, Diagnostics) {
        (Some(Self::ephemeral_object(open)), Diagnostics::new())
    }

    async fn ephemeral_close(&self, object: &ExecObject, provider: &ProviderClient) -> Diagnostics {
        self.close_ephemeral(object, provider).await
    }
}

/// Builder for [`ExecOperations`]. Every component except parallelism is
/// required.
#[derive(Default)]
pub struct ExecOperationsBuilder {
    prior_state: Option<Arc<SyncState>>,
    working_state: Option<Arc<SyncState>>,
    plugins: Option<Arc<dyn Plugins>>,
    oracle: Option<Arc<dyn Oracle>>,
    parallelism: Parallelism,
}

impl fmt::Debug for ExecOperationsBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecOperationsBuilder")
            .field("has_prior_state", &self.prior_state.is_some())
            .field("has_working_state", &self.working_state.is_some())
            .field("has_plugins", &self.plugins.is_some())
            .field("has_oracle", &self.oracle.is_some())
            .field("parallelism", &self.parallelism)
            .finish()
    }
}

impl ExecOperationsBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the read-only prior state.
    #[must_use]
    pub fn prior_state(mut self, state: Arc<SyncState>) -> Self {
        self.prior_state = Some(state);
        self
    }

    /// Sets the working state that receives every change.
    #[must_use]
    pub fn working_state(mut self, state: Arc<SyncState>) -> Self {
        self.working_state = Some(state);
        self
    }

    /// Sets the provider plugin library.
    #[must_use]
    pub fn plugins(mut self, plugins: Arc<dyn Plugins>) -> Self {
        self.plugins = Some(plugins);
        self
    }

    /// Sets the configuration evaluator.
    #[must_use]
    pub fn oracle(mut self, oracle: Arc<dyn Oracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    /// Bounds the number of concurrent provider calls.
    #[must_use]
    pub const fn parallelism(mut self, parallelism: Parallelism) -> Self {
        self.parallelism = parallelism;
        self
    }

    /// Builds the dispatcher.
    pub fn build(self) -> Result<ExecOperations, BuildError> {
        Ok(ExecOperations {
            prior_state: self.prior_state.ok_or(BuildError::MissingComponent("a prior state"))?,
            working_state: self.working_state.ok_or(BuildError::MissingComponent("a working state"))?,
            plugins: self.plugins.ok_or(BuildError::MissingComponent("a provider plugin library"))?,
            oracle: self.oracle.ok_or(BuildError::MissingComponent("a configuration evaluator"))?,
            ephemerals: Mutex::new(HashMap::new()),
            provider_calls: Semaphore::new(self.parallelism.into_inner()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fixtures, MockProvider, StaticOracle};

    #[test]
    fn building_without_an_oracle_fails() {
        let err = ExecOperations::builder()
            .prior_state(Arc::new(SyncState::new()))
            .working_state(Arc::new(SyncState::new()))
            .plugins(Arc::new(fixtures::plugins(Arc::new(MockProvider::new()))))
            .build()
            .unwrap_err();
        assert_eq!(err, BuildError::MissingComponent("a configuration evaluator"));
    }

    #[test]
    fn parallelism_sizes_the_provider_call_pool() {
        let ops = ExecOperations::builder()
            .prior_state(Arc::new(SyncState::new()))
            .working_state(Arc::new(SyncState::new()))
            .plugins(Arc::new(fixtures::plugins(Arc::new(MockProvider::new()))))
            .oracle(Arc::new(StaticOracle::new()))
            .parallelism(Parallelism::try_new(3).unwrap())
            .build()
            .unwrap();
        assert_eq!(ops.provider_calls.available_permits(), 3);
    }

    #[tokio::test]
    async fn undecodable_objects_fail_only_their_own_lookup() {
        let ops = fixtures::operations(
            fixtures::state_with_undecodable(&fixtures::managed_addr("broken")),
            Arc::new(MockProvider::new()),
            StaticOracle::new(),
        );
        let (obj, diags) = ops.resource_instance_prior(&fixtures::managed_addr("broken")).await;
        assert!(obj.is_none());
        let diag = diags.iter().next().unwrap();
        assert_eq!(diag.kind, DiagnosticKind::InvalidState);
        assert!(diag.detail.contains("test_thing.broken"), "{}", diag.detail);

        let (obj, diags) = ops.resource_instance_prior(&fixtures::managed_addr("absent")).await;
        assert!(obj.is_none());
        assert!(diags.is_empty());
    }
}
