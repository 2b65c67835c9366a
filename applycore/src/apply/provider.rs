//! Provider instance lifecycle: configure, open, close.

use super::ExecOperations;
use crate::addrs::ProviderInstanceAddr;
use crate::diagnostics::{Diagnostic, DiagnosticKind, Diagnostics};
use crate::exec::ProviderInstanceConfig;
use crate::providers::ProviderClient;
use tracing::debug;

impl ExecOperations {
    pub(super) async fn configure_provider_instance(
        &self,
        addr: &ProviderInstanceAddr,
    ) -> (Option<ProviderInstanceConfig>, Diagnostics) {
        debug!(provider = %addr, "ProviderInstanceConfig");
        let (config_val, mut diags) = self.oracle.provider_instance_config(addr).await;
        if diags.has_errors() {
            return (None, diags);
        }
        let Some(config_val) = config_val else {
            diags.push(Diagnostic::error(
                DiagnosticKind::InvalidGraph,
                "Provider instance not declared",
                format!("The execution graph uses {addr}, but the configuration does not declare it."),
            ));
            return (None, diags);
        };

        diags.append(self.oracle.validate_provider_config(&addr.provider, &config_val).await);
        if diags.has_errors() {
            return (None, diags);
        }
        let config = ProviderInstanceConfig {
            addr: addr.clone(),
            config_val,
        };
        (Some(config), diags)
    }

    pub(super) async fn open_provider_instance(
        &self,
        config: &ProviderInstanceConfig,
    ) -> (Option<ProviderClient>, Diagnostics) {
        debug!(provider = %config.addr, "ProviderInstanceOpen");
        match self
            .plugins
            .new_provider_client(&config.addr.provider, &config.config_val)
            .await
        {
            Ok(ops) => {
                let client = ProviderClient {
                    instance_addr: config.addr.clone(),
                    ops,
                };
                (Some(client), Diagnostics::new())
            }
            Err(err) => (None, Diagnostics::from(Diagnostic::from_error(&err))),
        }
    }

    pub(super) async fn close_provider_instance(&self, client: &ProviderClient) -> Diagnostics {
        debug!(provider = %client.instance_addr, "ProviderInstanceClose");
        client.ops.close().await
    }
}

#[cfg(test)]
mod tests {
    use crate::diagnostics::DiagnosticKind;
    use crate::exec::Operations;
    use crate::state::State;
    use crate::testing::{fixtures, MockProvider, StaticOracle};
    use crate::value::Value;
    use std::sync::Arc;

    #[tokio::test]
    async fn undeclared_provider_instances_are_reported() {
        let ops = fixtures::operations(State::new(), Arc::new(MockProvider::new()), StaticOracle::new());
        let (config, diags) = ops.provider_instance_config(&fixtures::provider_instance()).await;
        assert!(config.is_none());
        assert_eq!(diags.iter().next().unwrap().kind, DiagnosticKind::InvalidGraph);
    }

    #[tokio::test]
    async fn invalid_provider_configuration_stops_configuration() {
        let oracle = StaticOracle::new()
            .with_provider_config(fixtures::provider_instance(), Value::object([("region", Value::string("moon"))]))
            .with_invalid_provider(fixtures::provider_addr(), "region \"moon\" does not exist");
        let ops = fixtures::operations(State::new(), Arc::new(MockProvider::new()), oracle);
        let (config, diags) = ops.provider_instance_config(&fixtures::provider_instance()).await;
        assert!(config.is_none());
        assert!(diags.has_errors());
        assert!(diags.iter().any(|d| d.detail.contains("moon")));
    }

    #[tokio::test]
    async fn opening_and_closing_reaches_the_plugin() {
        let provider = Arc::new(MockProvider::new());
        let oracle = StaticOracle::new().with_provider_config(fixtures::provider_instance(), Value::Null);
        let ops = fixtures::operations(State::new(), Arc::clone(&provider), oracle);

        let (config, diags) = ops.provider_instance_config(&fixtures::provider_instance()).await;
        assert!(diags.is_empty(), "{diags}");
        let (client, diags) = ops.provider_instance_open(&config.unwrap()).await;
        assert!(diags.is_empty(), "{diags}");
        let client = client.unwrap();
        assert_eq!(client.instance_addr, fixtures::provider_instance());

        assert!(ops.provider_instance_close(&client).await.is_empty());
        assert_eq!(provider.calls(), vec!["close".to_string()]);
    }
}
