//! The provider plugin contract.
//!
//! Providers are external plugins implementing create, read, update and
//! delete for a family of resource types. The engine talks to one configured
//! instance of a provider through a [`Provider`] trait object; how that call
//! reaches the plugin process, and any timeout on it, is the implementor's
//! concern.

use crate::addrs::{ProviderAddr, ProviderInstanceAddr};
use crate::diagnostics::Diagnostics;
use crate::errors::ProviderError;
use crate::schema::SchemaSource;
use crate::value::Value;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Asks a provider to plan a change to a managed resource instance.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanResourceChangeRequest {
    /// The resource type
    pub type_name: String,
    /// The prior state, or null when creating
    pub prior_state: Value,
    /// The configuration, or null when destroying
    pub config: Value,
    /// Configuration with prior computed values merged in
    pub proposed_new_state: Value,
    /// Provider-private data saved with the prior state
    pub prior_private: Vec<u8>,
    /// Provider metadata declared by the module, usually null
    pub provider_meta: Value,
}

/// A provider's plan for a managed resource instance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlanResourceChangeResponse {
    /// The planned new state, possibly with unknown parts
    pub planned_state: Value,
    /// Provider-private data to pass back when applying
    pub planned_private: Vec<u8>,
    /// Problems reported by the provider
    pub diagnostics: Diagnostics,
    /// The provider uses the legacy SDK, whose type system shims cannot
    /// produce exactly consistent plans.
    pub legacy_type_system: bool,
}

/// Asks a provider to apply a planned change.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyResourceChangeRequest {
    /// The resource type
    pub type_name: String,
    /// The prior state, or null when creating
    pub prior_state: Value,
    /// The configuration, or null when destroying
    pub config: Value,
    /// The final planned state
    pub planned_state: Value,
    /// Provider-private data returned by planning
    pub planned_private: Vec<u8>,
    /// Provider metadata declared by the module, usually null
    pub provider_meta: Value,
}

/// The result of applying a change.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplyResourceChangeResponse {
    /// `None` when the provider produced nothing to save. `Some(Value::Null)`
    /// means the object no longer exists.
    pub new_state: Option<Value>,
    /// Provider-private data to save with the new state
    pub private: Vec<u8>,
    /// Problems reported by the provider
    pub diagnostics: Diagnostics,
    /// The provider uses the legacy SDK.
    pub legacy_type_system: bool,
}

/// Asks a provider to read a data source.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadDataSourceRequest {
    /// The data source type
    pub type_name: String,
    /// The configuration
    pub config: Value,
    /// Provider metadata declared by the module, usually null
    pub provider_meta: Value,
}

/// The result of reading a data source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadDataSourceResponse {
    /// The data read, `None` if the provider returned nothing
    pub state: Option<Value>,
    /// Problems reported by the provider
    pub diagnostics: Diagnostics,
}

/// Asks a provider to open an ephemeral resource.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenEphemeralResourceRequest {
    /// The ephemeral resource type
    pub type_name: String,
    /// The configuration
    pub config: Value,
}

/// The result of opening an ephemeral resource.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OpenEphemeralResourceResponse {
    /// The ephemeral value, `None` if the provider returned nothing
    pub result: Option<Value>,
    /// Provider-private data needed to close the resource
    pub private: Vec<u8>,
    /// Problems reported by the provider
    pub diagnostics: Diagnostics,
}

/// Asks a provider to release an ephemeral resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseEphemeralResourceRequest {
    /// The ephemeral resource type
    pub type_name: String,
    /// Provider-private data returned when opening
    pub private: Vec<u8>,
}

/// A configured provider instance.
///
/// Implementations must tolerate concurrent calls for different resource
/// instances.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Plans a change to a managed resource instance.
    async fn plan_resource_change(&self, request: PlanResourceChangeRequest) -> PlanResourceChangeResponse;

    /// Applies a planned change to a managed resource instance.
    async fn apply_resource_change(&self, request: ApplyResourceChangeRequest) -> ApplyResourceChangeResponse;

    /// Reads a data source.
    async fn read_data_source(&self, request: ReadDataSourceRequest) -> ReadDataSourceResponse;

    /// Opens an ephemeral resource.
    async fn open_ephemeral_resource(&self, request: OpenEphemeralResourceRequest) -> OpenEphemeralResourceResponse;

    /// Releases an ephemeral resource.
    async fn close_ephemeral_resource(&self, request: CloseEphemeralResourceRequest) -> Diagnostics;

    /// Shuts the provider instance down. No other call follows.
    async fn close(&self) -> Diagnostics;
}

/// An open client for one provider instance.
#[derive(Clone)]
pub struct ProviderClient {
    /// The provider instance this client talks to
    pub instance_addr: ProviderInstanceAddr,
    /// The provider operations
    pub ops: Arc<dyn Provider>,
}

impl fmt::Debug for ProviderClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderClient")
            .field("instance_addr", &self.instance_addr)
            .finish_non_exhaustive()
    }
}

/// The library of available provider plugins.
#[async_trait]
pub trait Plugins: SchemaSource {
    /// Starts a provider and configures it with `config`.
    async fn new_provider_client(&self, provider: &ProviderAddr, config: &Value) -> Result<Arc<dyn Provider>, ProviderError>;
}
