//! A configuration evaluator with fixed answers.

use crate::addrs::{ProviderAddr, ProviderInstanceAddr, ResourceInstanceAddr};
use crate::diagnostics::{Diagnostic, DiagnosticKind, Diagnostics};
use crate::oracle::{DesiredResourceInstance, Oracle};
use crate::tracker::RequestTracker;
use crate::value::Value;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// An [`Oracle`] answering from tables filled in by the test.
///
/// Undeclared resource instances and provider instances are reported as
/// absent, without diagnostics.
#[derive(Default)]
pub struct StaticOracle {
    desired: HashMap<ResourceInstanceAddr, DesiredResourceInstance>,
    provider_configs: HashMap<ProviderInstanceAddr, Value>,
    invalid_providers: HashMap<ProviderAddr, String>,
    tracker: Option<Arc<dyn RequestTracker>>,
}

impl fmt::Debug for StaticOracle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticOracle")
            .field("desired", &self.desired.keys().collect::<Vec<_>>())
            .field("provider_configs", &self.provider_configs)
            .field("invalid_providers", &self.invalid_providers)
            .finish_non_exhaustive()
    }
}

impl StaticOracle {
    /// An evaluator that knows nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a resource instance.
    #[must_use]
    pub fn with_desired(mut self, desired: DesiredResourceInstance) -> Self {
        self.desired.insert(desired.addr.clone(), desired);
        self
    }

    /// Declares a provider instance with its configuration.
    #[must_use]
    pub fn with_provider_config(mut self, addr: ProviderInstanceAddr, config: Value) -> Self {
        self.provider_configs.insert(addr, config);
        self
    }

    /// Makes validation of every configuration for `provider` fail with
    /// `message`.
    #[must_use]
    pub fn with_invalid_provider(mut self, provider: ProviderAddr, message: &str) -> Self {
        self.invalid_providers.insert(provider, message.to_string());
        self
    }

    /// Reports `tracker` as the evaluator's own request tracker.
    #[must_use]
    pub fn with_request_tracker(mut self, tracker: Arc<dyn RequestTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }
}

#[async_trait]
impl Oracle for StaticOracle {
    async fn desired_resource_instance(
        &self,
        addr: &ResourceInstanceAddr,
    ) -> (Option<DesiredResourceInstance>, Diagnostics) {
        (self.desired.get(addr).cloned(), Diagnostics::new())
    }

    async fn provider_instance_config(&self, addr: &ProviderInstanceAddr) -> (Option<Value>, Diagnostics) {
        (self.provider_configs.get(addr).cloned(), Diagnostics::new())
    }

    async fn validate_provider_config(&self, provider: &ProviderAddr, _config_val: &Value) -> Diagnostics {
        self.invalid_providers
            .get(provider)
            .map_or_else(Diagnostics::new, |message| {
                Diagnostics::from(Diagnostic::error(
                    DiagnosticKind::General,
                    "Invalid provider configuration",
                    format!("The configuration for provider {provider} is invalid: {message}."),
                ))
            })
    }

    fn request_tracker(&self) -> Option<Arc<dyn RequestTracker>> {
        self.tracker.clone()
    }
}
