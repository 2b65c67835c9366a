//! Ephemeral resources: opened for one apply, never persisted, always
//! closed.

use super::ExecOperations;
use crate::addrs::{DeposedKey, ResourceInstanceAddr, ResourceMode};
use crate::diagnostics::{Diagnostic, DiagnosticKind, Diagnostics};
use crate::exec::{ExecObject, OpenEphemeral};
use crate::oracle::DesiredResourceInstance;
use crate::providers::{CloseEphemeralResourceRequest, OpenEphemeralResourceRequest, ProviderClient};
use crate::state::{ObjectStatus, ResourceInstanceObject};
use std::collections::hash_map::Entry;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Releases one open ephemeral resource. Consumed by closing, so each
/// resource is closed at most once.
pub(super) struct EphemeralCloser {
    type_name: String,
    private: Vec<u8>,
    client: ProviderClient,
}

impl EphemeralCloser {
    async fn close(self) -> Diagnostics {
        self.client
            .ops
            .close_ephemeral_resource(CloseEphemeralResourceRequest {
                type_name: self.type_name,
                private: self.private,
            })
            .await
    }
}

impl ExecOperations {
    pub(super) async fn open_ephemeral(
        &self,
        desired: &DesiredResourceInstance,
        provider: &ProviderClient,
    ) -> (Option<OpenEphemeral>, Diagnostics) {
        let addr = &desired.addr;
        debug!(addr = %addr, provider = %provider.instance_addr, "EphemeralOpen");
        let mut diags = Diagnostics::new();

        let provider_addr = &provider.instance_addr.provider;
        let schema = match self.schema(provider_addr, ResourceMode::Ephemeral, &desired.resource_type) {
            Ok(schema) => schema,
            Err(diag) => {
                diags.push(diag);
                return (None, diags);
            }
        };

        let resp = self
            .provider_call(provider.ops.open_ephemeral_resource(OpenEphemeralResourceRequest {
                type_name: desired.resource_type.clone(),
                config: desired.config_val.clone(),
            }))
            .await;
        diags.append(resp.diagnostics);
        if diags.has_errors() {
            return (None, diags);
        }

        let closer = EphemeralCloser {
            type_name: desired.resource_type.clone(),
            private: resp.private,
            client: provider.clone(),
        };
        let Some(value) = resp.result else {
            diags.push(Diagnostic::error(
                DiagnosticKind::ProviderBug,
                "Provider produced invalid object",
                format!(
                    "Provider {provider_addr} opened {addr} without returning its value.\n\n\
                     This is a bug in the provider, which should be reported in the provider's own issue tracker."
                ),
            ));
            diags.append(closer.close().await);
            return (None, diags);
        };

        // The lock is released at the end of this statement.
        let rejected = match self.ephemerals.lock().entry(addr.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(closer);
                None
            }
            Entry::Occupied(_) => Some(closer),
        };
        if let Some(closer) = rejected {
            error!(addr = %addr, "ephemeral resource opened twice");
            diags.push(Diagnostic::internal(
                "Ephemeral resource opened twice",
                format!("{addr} was opened while an earlier instance of it was still open."),
            ));
            diags.append(closer.close().await);
            return (None, diags);
        }

        let open = OpenEphemeral {
            addr: addr.clone(),
            resource_type: desired.resource_type.clone(),
            provider_instance: provider.instance_addr.clone(),
            value,
            schema_version: schema.version,
        };
        (Some(open), diags)
    }

    /// The object view of an open ephemeral resource. It is handed to
    /// downstream operations but never saved.
    pub(super) fn ephemeral_object(open: &OpenEphemeral) -> ExecObject {
        ExecObject {
            addr: open.addr.clone(),
            deposed_key: DeposedKey::NOT_DEPOSED,
            state: Arc::new(ResourceInstanceObject {
                value: open.value.clone(),
                private: Vec::new(),
                status: ObjectStatus::Ready,
                provider_instance_addr: open.provider_instance.clone(),
                resource_type: open.resource_type.clone(),
                schema_version: open.schema_version,
                dependencies: Vec::new(),
                create_before_destroy: false,
            }),
        }
    }

    pub(super) async fn close_ephemeral(&self, object: &ExecObject, provider: &ProviderClient) -> Diagnostics {
        debug!(addr = %object.addr, provider = %provider.instance_addr, "EphemeralClose");
        let closer = self.ephemerals.lock().remove(&object.addr);
        match closer {
            Some(closer) => closer.close().await,
            None => {
                error!(addr = %object.addr, "no opener registered for ephemeral resource");
                Diagnostics::from(Diagnostic::internal(
                    "Ephemeral resource not open",
                    format!("Cannot close {}, because it was never opened.", object.addr),
                ))
            }
        }
    }

    /// Addresses of ephemeral resources that are still open.
    pub fn open_ephemerals(&self) -> Vec<ResourceInstanceAddr> {
        let mut addrs: Vec<_> = self.ephemerals.lock().keys().cloned().collect();
        addrs.sort();
        addrs
    }

    /// Closes every ephemeral resource that is still open.
    pub async fn close_leftover_ephemerals(&self) -> Diagnostics {
        let leftovers: Vec<_> = self.ephemerals.lock().drain().collect();
        let mut diags = Diagnostics::new();
        for (addr, closer) in leftovers {
            warn!(addr = %addr, "closing ephemeral resource left open at the end of the apply");
            diags.append(closer.close().await);
        }
        diags
    }
}

#[cfg(test)]
mod tests {
    use crate::addrs::DeposedKey;
    use crate::diagnostics::DiagnosticKind;
    use crate::exec::{ExecObject, Operations};
    use crate::state::State;
    use crate::testing::{fixtures, MockProvider, StaticOracle};
    use std::sync::Arc;

    #[tokio::test]
    async fn open_state_close_round_trip() {
        let provider = Arc::new(MockProvider::new());
        let ops = fixtures::operations(State::new(), Arc::clone(&provider), StaticOracle::new());
        let client = fixtures::client(Arc::clone(&provider));
        let desired = fixtures::desired(&fixtures::ephemeral_addr("token"), "ci");

        let (open, diags) = ops.ephemeral_open(&desired, &client).await;
        assert!(diags.is_empty(), "{diags}");
        let (obj, diags) = ops.ephemeral_state(&open.unwrap()).await;
        assert!(diags.is_empty());
        let obj = obj.unwrap();
        assert_eq!(ops.open_ephemerals(), vec![fixtures::ephemeral_addr("token")]);

        assert!(ops.ephemeral_close(&obj, &client).await.is_empty());
        assert!(ops.open_ephemerals().is_empty());
        // Ephemeral objects never reach the working state.
        assert!(ops.working_state.is_empty());
        assert_eq!(
            provider.calls(),
            vec!["open test_secret".to_string(), "close_ephemeral test_secret".to_string()]
        );

        // A second close finds nothing to close.
        let diags = ops.ephemeral_close(&obj, &client).await;
        assert_eq!(diags.iter().next().unwrap().kind, DiagnosticKind::Internal);
    }

    #[tokio::test]
    async fn closing_without_opening_is_a_defect() {
        let provider = Arc::new(MockProvider::new());
        let ops = fixtures::operations(State::new(), Arc::clone(&provider), StaticOracle::new());
        let client = fixtures::client(Arc::clone(&provider));
        let never_opened = ExecObject {
            addr: fixtures::ephemeral_addr("token"),
            deposed_key: DeposedKey::NOT_DEPOSED,
            state: Arc::new(fixtures::thing_object("x", "token")),
        };

        let diags = ops.ephemeral_close(&never_opened, &client).await;
        assert!(diags.has_errors());
        let diag = diags.iter().next().unwrap();
        assert_eq!(diag.kind, DiagnosticKind::Internal);
        assert!(diag.detail.contains("ephemeral.test_secret.token"), "{}", diag.detail);
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn leftovers_are_closed() {
        let provider = Arc::new(MockProvider::new());
        let ops = fixtures::operations(State::new(), Arc::clone(&provider), StaticOracle::new());
        let client = fixtures::client(Arc::clone(&provider));
        let desired = fixtures::desired(&fixtures::ephemeral_addr("token"), "ci");
        let (open, _) = ops.ephemeral_open(&desired, &client).await;
        assert!(open.is_some());

        assert!(ops.close_leftover_ephemerals().await.is_empty());
        assert!(ops.open_ephemerals().is_empty());
        assert_eq!(provider.calls().last().map(String::as_str), Some("close_ephemeral test_secret"));
    }
}
