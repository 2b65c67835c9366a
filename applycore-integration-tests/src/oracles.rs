//! An evaluator whose answers depend on the apply in progress.

use applycore::addrs::{ProviderAddr, ProviderInstanceAddr, ResourceInstanceAddr};
use applycore::diagnostics::{Diagnostic, DiagnosticKind, Diagnostics};
use applycore::execgraph::ResourceValues;
use applycore::oracle::{DesiredResourceInstance, Oracle};
use applycore::testing::{fixtures, StaticOracle};
use applycore::value::Value;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::debug;

/// Names resource instances after the `id` another instance ends up with.
///
/// Anything not linked is answered by the wrapped [`StaticOracle`]. Every
/// desired-instance request is recorded, in the order they arrive.
#[derive(Debug)]
pub struct ChainedOracle {
    inner: StaticOracle,
    values: ResourceValues,
    links: HashMap<ResourceInstanceAddr, ResourceInstanceAddr>,
    asked: Mutex<Vec<ResourceInstanceAddr>>,
}

impl ChainedOracle {
    /// Wraps `inner`, resolving links through `values`.
    pub fn new(inner: StaticOracle, values: ResourceValues) -> Self {
        Self {
            inner,
            values,
            links: HashMap::new(),
            asked: Mutex::new(Vec::new()),
        }
    }

    /// Configures `target` with the final `id` of `source`.
    #[must_use]
    pub fn link(mut self, target: ResourceInstanceAddr, source: ResourceInstanceAddr) -> Self {
        self.links.insert(target, source);
        self
    }

    /// Every instance asked about so far.
    pub fn asked(&self) -> Vec<ResourceInstanceAddr> {
        self.asked.lock().clone()
    }
}

#[async_trait]
impl Oracle for ChainedOracle {
    async fn desired_resource_instance(
        &self,
        addr: &ResourceInstanceAddr,
    ) -> (Option<DesiredResourceInstance>, Diagnostics) {
        self.asked.lock().push(addr.clone());
        let Some(source) = self.links.get(addr) else {
            return self.inner.desired_resource_instance(addr).await;
        };

        let upstream = self.values.resource_instance_value(source).await;
        debug!(addr = %addr, source = %source, "resolved upstream value");
        match upstream.attr("id") {
            Value::String(id) => {
                let mut desired = fixtures::desired(addr, id);
                desired.dependencies.push(source.clone());
                (Some(desired), Diagnostics::new())
            }
            _ => (
                None,
                Diagnostics::from(Diagnostic::error(
                    DiagnosticKind::General,
                    "Unresolvable reference",
                    format!("{addr} refers to the id of {source}, which has no known value."),
                )),
            ),
        }
    }

    async fn provider_instance_config(&self, addr: &ProviderInstanceAddr) -> (Option<Value>, Diagnostics) {
        self.inner.provider_instance_config(addr).await
    }

    async fn validate_provider_config(&self, provider: &ProviderAddr, config_val: &Value) -> Diagnostics {
        self.inner.validate_provider_config(provider, config_val).await
    }
}
