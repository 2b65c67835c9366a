//! Data sources read at apply time.

use super::ExecOperations;
use crate::addrs::{DeposedKey, ResourceMode};
use crate::diagnostics::{Diagnostic, DiagnosticKind, Diagnostics};
use crate::exec::ExecObject;
use crate::objchange::assert_object_compatible;
use crate::oracle::DesiredResourceInstance;
use crate::providers::{ProviderClient, ReadDataSourceRequest};
use crate::state::{ObjectStatus, ResourceInstanceObject};
use crate::value::Value;
use std::sync::Arc;
use tracing::debug;

impl ExecOperations {
    /// Reads a data source whose configuration was not known during
    /// planning, and records the result in the working state.
    pub(super) async fn read_data(
        &self,
        desired: &DesiredResourceInstance,
        planned_val: &Value,
        provider: &ProviderClient,
    ) -> (Option<ExecObject>, Diagnostics) {
        let addr = &desired.addr;
        debug!(addr = %addr, provider = %provider.instance_addr, "DataRead");
        let mut diags = Diagnostics::new();

        let provider_addr = &provider.instance_addr.provider;
        let schema = match self.schema(provider_addr, ResourceMode::Data, &desired.resource_type) {
            Ok(schema) => schema,
            Err(diag) => {
                diags.push(diag);
                return (None, diags);
            }
        };

        let resp = self
            .provider_call(provider.ops.read_data_source(ReadDataSourceRequest {
                type_name: desired.resource_type.clone(),
                config: desired.config_val.clone(),
                provider_meta: Value::Null,
            }))
            .await;
        diags.append(resp.diagnostics);
        if diags.has_errors() {
            return (None, diags);
        }

        let value = match resp.state {
            Some(value) if !value.is_null() && value.is_wholly_known() => value,
            other => {
                let problem = if other.is_some_and(|v| !v.is_null()) {
                    "returned a value that is not wholly known"
                } else {
                    "returned no value"
                };
                diags.push(Diagnostic::error(
                    DiagnosticKind::ProviderBug,
                    "Provider produced invalid object",
                    format!(
                        "Provider {provider_addr} {problem} when reading {addr}.\n\n\
                         This is a bug in the provider, which should be reported in the provider's own issue tracker."
                    ),
                ));
                return (None, diags);
            }
        };
        for err in assert_object_compatible(&schema, planned_val, &value) {
            diags.push(Diagnostic::error(
                DiagnosticKind::ProviderBug,
                "Provider produced inconsistent result",
                format!(
                    "Provider {provider_addr} produced a value for {addr} that does not match what was planned: {err}.\n\n\
                     This is a bug in the provider, which should be reported in the provider's own issue tracker."
                ),
            ));
        }
        if diags.has_errors() {
            return (None, diags);
        }

        let object = Arc::new(ResourceInstanceObject {
            value,
            private: Vec::new(),
            status: ObjectStatus::Ready,
            provider_instance_addr: provider.instance_addr.clone(),
            resource_type: desired.resource_type.clone(),
            schema_version: schema.version,
            dependencies: desired.dependencies.clone(),
            create_before_destroy: false,
        });
        if let Err(err) = self
            .working_state
            .save(addr, DeposedKey::NOT_DEPOSED, Arc::clone(&object), &schema)
        {
            diags.push(Diagnostic::error(
                DiagnosticKind::InvalidState,
                "Failed to save data source result",
                format!("The result of reading {addr} could not be saved: {err}."),
            ));
        }
        let result = ExecObject {
            addr: addr.clone(),
            deposed_key: DeposedKey::NOT_DEPOSED,
            state: object,
        };
        (Some(result), diags)
    }
}

#[cfg(test)]
mod tests {
    use crate::addrs::DeposedKey;
    use crate::diagnostics::DiagnosticKind;
    use crate::exec::Operations;
    use crate::providers::ReadDataSourceResponse;
    use crate::state::State;
    use crate::testing::{fixtures, MockProvider, StaticOracle};
    use crate::value::Value;
    use std::sync::Arc;

    #[tokio::test]
    async fn reads_are_saved_to_the_working_state() {
        let provider = Arc::new(MockProvider::new().with_read(|req| ReadDataSourceResponse {
            state: Some(Value::object([
                ("name", req.config.attr("name").clone()),
                ("id", Value::string("ds-1")),
            ])),
            ..ReadDataSourceResponse::default()
        }));
        let ops = fixtures::operations(State::new(), Arc::clone(&provider), StaticOracle::new());
        let client = fixtures::client(provider);
        let desired = fixtures::desired(&fixtures::data_addr("lookup"), "wanted");

        let (obj, diags) = ops.data_read(&desired, &Value::Unknown, &client).await;
        assert!(diags.is_empty(), "{diags}");
        let obj = obj.unwrap();
        assert_eq!(obj.state.value.attr("id"), &Value::string("ds-1"));
        assert!(ops
            .working_state
            .get(&fixtures::data_addr("lookup"), DeposedKey::NOT_DEPOSED)
            .is_some());
    }

    #[tokio::test]
    async fn missing_results_are_provider_bugs() {
        let provider = Arc::new(MockProvider::new().with_read(|_| ReadDataSourceResponse::default()));
        let ops = fixtures::operations(State::new(), Arc::clone(&provider), StaticOracle::new());
        let client = fixtures::client(provider);
        let desired = fixtures::desired(&fixtures::data_addr("lookup"), "wanted");

        let (obj, diags) = ops.data_read(&desired, &Value::Unknown, &client).await;
        assert!(obj.is_none());
        assert_eq!(diags.iter().next().unwrap().kind, DiagnosticKind::ProviderBug);
        assert!(ops.working_state.is_empty());
    }
}
