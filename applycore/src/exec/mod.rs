//! The operation dispatcher contract.
//!
//! An execution graph only describes *which* operations run and how their
//! results flow into one another. Everything with a side effect happens in
//! an [`Operations`] implementation, one method per kind of operation. The
//! compiled graph calls these methods concurrently, so implementations must
//! be safe to call for different resource instances at once.
//!
//! Methods never return `Result`: each returns whatever partial result it
//! has together with the [`Diagnostics`] it collected. An operation is
//! considered failed when its diagnostics contain an error.

use crate::addrs::{DeposedKey, ProviderInstanceAddr, ResourceInstanceAddr};
use crate::diagnostics::Diagnostics;
use crate::errors::BuildError;
use crate::oracle::DesiredResourceInstance;
use crate::providers::ProviderClient;
use crate::state::ResourceInstanceObject;
use crate::value::Value;
use async_trait::async_trait;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// A resource instance object together with its position in state.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecObject {
    /// The instance address
    pub addr: ResourceInstanceAddr,
    /// [`DeposedKey::NOT_DEPOSED`] for a current object
    pub deposed_key: DeposedKey,
    /// The object itself
    pub state: Arc<ResourceInstanceObject>,
}

impl ExecObject {
    /// The same object labelled as deposed under `key`.
    #[must_use]
    pub fn into_deposed(self, key: DeposedKey) -> Self {
        Self {
            deposed_key: key,
            ..self
        }
    }

    /// The same object labelled with a new address.
    #[must_use]
    pub fn with_new_addr(self, addr: ResourceInstanceAddr) -> Self {
        Self { addr, ..self }
    }
}

/// The apply-time plan for one resource instance object.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalPlan {
    /// The instance address
    pub addr: ResourceInstanceAddr,
    /// Which object of the instance this plan changes
    pub deposed_key: DeposedKey,
    /// The resource type name
    pub resource_type: String,
    /// The provider instance that will apply the change
    pub provider_instance: ProviderInstanceAddr,
    /// The prior value, or null when creating
    pub prior_val: Value,
    /// The configuration, or null when destroying
    pub config_val: Value,
    /// The value the provider expects to produce
    pub planned_val: Value,
    /// Provider-private data from planning, passed back when applying
    pub planned_private: Vec<u8>,
    /// Provider-private data saved with the prior object
    pub prior_private: Vec<u8>,
    /// Dependencies to record with the new object
    pub dependencies: Vec<ResourceInstanceAddr>,
    /// Create-before-destroy flag to record with the new object
    pub create_before_destroy: bool,
}

/// Validated configuration for one provider instance.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderInstanceConfig {
    /// The provider instance
    pub addr: ProviderInstanceAddr,
    /// Its configuration value
    pub config_val: Value,
}

/// An ephemeral resource that has been opened and not yet closed.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenEphemeral {
    /// The instance address
    pub addr: ResourceInstanceAddr,
    /// The resource type name
    pub resource_type: String,
    /// The provider instance that opened it
    pub provider_instance: ProviderInstanceAddr,
    /// The value returned by the provider
    pub value: Value,
    /// Schema version of the value
    pub schema_version: u64,
}

/// The side-effecting half of execution, one method per operation kind.
#[async_trait]
pub trait Operations: Send + Sync {
    /// Asks the evaluator for a provider instance's configuration and
    /// validates it.
    async fn provider_instance_config(
        &self,
        addr: &ProviderInstanceAddr,
    ) -> (Option<ProviderInstanceConfig>, Diagnostics);

    /// Starts and configures a provider instance.
    async fn provider_instance_open(&self, config: &ProviderInstanceConfig) -> (Option<ProviderClient>, Diagnostics);

    /// Shuts a provider instance down once nothing uses it any more.
    async fn provider_instance_close(&self, client: &ProviderClient) -> Diagnostics;

    /// The desired configuration of a resource instance. `None` if the
    /// instance is not declared going forward.
    async fn resource_instance_desired(
        &self,
        addr: &ResourceInstanceAddr,
    ) -> (Option<DesiredResourceInstance>, Diagnostics);

    /// The current object of a resource instance in the prior state.
    async fn resource_instance_prior(&self, addr: &ResourceInstanceAddr) -> (Option<ExecObject>, Diagnostics);

    /// Runs post-apply correctness checks on a result.
    async fn resource_instance_postconditions(&self, result: &ExecObject) -> Diagnostics;

    /// Re-derives the plan for one object at apply time. `None` when there
    /// is nothing to do.
    async fn managed_final_plan(
        &self,
        desired: Option<&DesiredResourceInstance>,
        prior: Option<&ExecObject>,
        planned_val: &Value,
        provider: &ProviderClient,
    ) -> (Option<FinalPlan>, Diagnostics);

    /// Applies a final plan. `fallback` is a deposed object to make current
    /// again if the provider produces nothing.
    async fn managed_apply(
        &self,
        plan: Option<&FinalPlan>,
        fallback: Option<&ExecObject>,
        provider: &ProviderClient,
    ) -> (Option<ExecObject>, Diagnostics);

    /// Deposes a current object.
    async fn managed_depose(&self, current: Option<&ExecObject>) -> (Option<ExecObject>, Diagnostics);

    /// A deposed object from the prior state.
    async fn managed_already_deposed(
        &self,
        addr: &ResourceInstanceAddr,
        deposed_key: DeposedKey,
    ) -> (Option<ExecObject>, Diagnostics);

    /// Moves a current object to a new address.
    async fn managed_change_addr(
        &self,
        current: Option<&ExecObject>,
        new_addr: &ResourceInstanceAddr,
    ) -> (Option<ExecObject>, Diagnostics);

    /// Reads a data source.
    async fn data_read(
        &self,
        desired: &DesiredResourceInstance,
        planned_val: &Value,
        provider: &ProviderClient,
    ) -> (Option<ExecObject>, Diagnostics);

    /// Opens an ephemeral resource.
    async fn ephemeral_open(
        &self,
        desired: &DesiredResourceInstance,
        provider: &ProviderClient,
    ) -> (Option<OpenEphemeral>, Diagnostics);

    /// Turns an open ephemeral resource into an object for downstream use.
    async fn ephemeral_state(&self, open: &OpenEphemeral) -> (Option<ExecObject>, Diagnostics);

    /// Closes an ephemeral resource opened earlier in this apply.
    async fn ephemeral_close(&self, object: &ExecObject, provider: &ProviderClient) -> Diagnostics;
}

/// The place a compiled graph looks for its dispatcher.
///
/// The graph is compiled against an empty slot; the dispatcher is installed
/// only afterwards, once everything it needs exists. Compilation never
/// calls the dispatcher, so the slot may stay empty until execution.
#[derive(Clone, Default)]
pub struct DispatcherSlot(Arc<OnceLock<Arc<dyn Operations>>>);

impl DispatcherSlot {
    /// An empty slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the dispatcher. Fails if one is already installed.
    pub fn install(&self, ops: Arc<dyn Operations>) -> Result<(), BuildError> {
        self.0.set(ops).map_err(|_| BuildError::DispatcherAlreadyInstalled)
    }

    /// The installed dispatcher, if any.
    pub fn get(&self) -> Option<Arc<dyn Operations>> {
        self.0.get().cloned()
    }
}

impl fmt::Debug for DispatcherSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatcherSlot")
            .field("installed", &self.0.get().is_some())
            .finish()
    }
}
