//! The configuration evaluator contract.
//!
//! The Oracle decides *what* is desired. The engine asks it for the resolved
//! configuration of resource and provider instances as execution reaches
//! them; the Oracle in turn may wait on final values of upstream resource
//! instances through [`ResourceValues`](crate::execgraph::ResourceValues).

use crate::addrs::{ProviderAddr, ProviderInstanceAddr, ResourceInstanceAddr};
use crate::diagnostics::Diagnostics;
use crate::tracker::RequestTracker;
use crate::value::Value;
use async_trait::async_trait;
use std::sync::Arc;

/// The resolved configuration intent for one resource instance. Produced and
/// owned by the Oracle; read-only to the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct DesiredResourceInstance {
    /// The instance address
    pub addr: ResourceInstanceAddr,
    /// The fully evaluated configuration
    pub config_val: Value,
    /// The resource type name
    pub resource_type: String,
    /// The provider responsible for the resource type
    pub provider: ProviderAddr,
    /// The provider instance chosen for this resource instance
    pub provider_instance: ProviderInstanceAddr,
    /// Resource instances this one depends on
    pub dependencies: Vec<ResourceInstanceAddr>,
    /// Replacements of this instance create the new object before
    /// destroying the old one.
    pub create_before_destroy: bool,
}

/// The configuration evaluator, as seen by the engine.
#[async_trait]
pub trait Oracle: Send + Sync {
    /// The desired configuration of a resource instance, or `None` if the
    /// instance is not declared going forward.
    async fn desired_resource_instance(
        &self,
        addr: &ResourceInstanceAddr,
    ) -> (Option<DesiredResourceInstance>, Diagnostics);

    /// The configuration value for a provider instance, or `None` if the
    /// evaluator does not know that provider instance.
    async fn provider_instance_config(&self, addr: &ProviderInstanceAddr) -> (Option<Value>, Diagnostics);

    /// Checks a provider configuration value before it is used.
    async fn validate_provider_config(&self, provider: &ProviderAddr, config_val: &Value) -> Diagnostics;

    /// The evaluator's own request tracker, if it has one.
    fn request_tracker(&self) -> Option<Arc<dyn RequestTracker>> {
        None
    }
}
