//! Managed resource lifecycle: final plan, apply, depose, move.

use super::ExecOperations;
use crate::addrs::{object_label, DeposedKey, ResourceInstanceAddr, ResourceMode};
use crate::diagnostics::{Diagnostic, DiagnosticKind, Diagnostics};
use crate::errors::ObjectChangeError;
use crate::exec::{ExecObject, FinalPlan};
use crate::objchange::{assert_object_compatible, assert_plan_valid, proposed_new};
use crate::oracle::DesiredResourceInstance;
use crate::providers::{ApplyResourceChangeRequest, PlanResourceChangeRequest, ProviderClient};
use crate::state::{ObjectStatus, ResourceInstanceObject};
use crate::value::Value;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, error, trace, warn};

impl ExecOperations {
    pub(super) async fn final_plan(
        &self,
        desired: Option<&DesiredResourceInstance>,
        prior: Option<&ExecObject>,
        planned_val: &Value,
        provider: &ProviderClient,
    ) -> (Option<FinalPlan>, Diagnostics) {
        let mut diags = Diagnostics::new();

        // Moves are resolved during planning, so when both are present their
        // addresses agree. Deposed objects are never desired.
        let (addr, deposed_key, resource_type) = match (desired, prior) {
            (Some(desired), _) => (&desired.addr, DeposedKey::NOT_DEPOSED, desired.resource_type.as_str()),
            (None, Some(prior)) => (&prior.addr, prior.deposed_key, prior.state.resource_type.as_str()),
            (None, None) => {
                trace!("ManagedFinalPlan without desired or prior object; no change needed");
                return (None, diags);
            }
        };
        debug!(
            object = %object_label(addr, deposed_key),
            provider = %provider.instance_addr,
            "ManagedFinalPlan"
        );

        let provider_addr = &provider.instance_addr.provider;
        let schema = match self.schema(provider_addr, ResourceMode::Managed, resource_type) {
            Ok(schema) => schema,
            Err(diag) => {
                diags.push(diag);
                return (None, diags);
            }
        };

        let config_val = desired.map_or(Value::Null, |d| d.config_val.clone());
        let prior_val = prior.map_or(Value::Null, |p| p.state.value.clone());
        let prior_private = prior.map(|p| p.state.private.clone()).unwrap_or_default();
        let proposed = proposed_new(&schema, &prior_val, &config_val);

        let resp = self
            .provider_call(provider.ops.plan_resource_change(PlanResourceChangeRequest {
                type_name: resource_type.to_string(),
                prior_state: prior_val.clone(),
                config: config_val.clone(),
                proposed_new_state: proposed,
                prior_private: prior_private.clone(),
                provider_meta: Value::Null,
            }))
            .await;
        diags.append(resp.diagnostics);
        if diags.has_errors() {
            return (None, diags);
        }

        let mut errs = assert_plan_valid(&schema, &prior_val, &config_val, &resp.planned_state);
        errs.extend(assert_object_compatible(&schema, planned_val, &resp.planned_state));
        if !errs.is_empty() {
            if resp.legacy_type_system {
                warn!(
                    provider = %provider_addr,
                    object = %object_label(addr, deposed_key),
                    problems = %list_problems(&errs),
                    "provider produced an invalid plan, tolerated because it uses the legacy type system"
                );
            } else {
                diags.extend(errs.iter().map(|err| {
                    Diagnostic::error(
                        DiagnosticKind::ProviderBug,
                        "Provider produced invalid plan",
                        format!(
                            "Provider {provider_addr} planned an invalid value for {addr}{err}.\n\n\
                             This is a bug in the provider, which should be reported in the provider's own issue tracker.",
                            err = prefixed(err),
                        ),
                    )
                }));
                return (None, diags);
            }
        }

        let (dependencies, create_before_destroy) = match (desired, prior) {
            (Some(desired), _) => (desired.dependencies.clone(), desired.create_before_destroy),
            (None, Some(prior)) => (prior.state.dependencies.clone(), prior.state.create_before_destroy),
            (None, None) => (Vec::new(), false),
        };
        let plan = FinalPlan {
            addr: addr.clone(),
            deposed_key,
            resource_type: resource_type.to_string(),
            provider_instance: provider.instance_addr.clone(),
            prior_val,
            config_val,
            planned_val: resp.planned_state,
            planned_private: resp.planned_private,
            prior_private,
            dependencies,
            create_before_destroy,
        };
        (Some(plan), diags)
    }

    pub(super) async fn apply_change(
        &self,
        plan: Option<&FinalPlan>,
        fallback: Option<&ExecObject>,
        provider: &ProviderClient,
    ) -> (Option<ExecObject>, Diagnostics) {
        let mut diags = Diagnostics::new();
        let Some(plan) = plan else {
            // A missing plan means no change turned out to be needed. Graphs
            // only pass a fallback alongside a plan that creates something.
            trace!("ManagedApply skipped because no change is needed");
            return (None, diags);
        };
        let label = object_label(&plan.addr, plan.deposed_key);
        debug!(object = %label, provider = %provider.instance_addr, "ManagedApply");

        if let Some(fallback) = fallback {
            if plan.deposed_key.is_deposed() {
                diags.push(Diagnostic::internal(
                    "Invalid fallback object",
                    format!(
                        "Cannot apply changes to {label} with fallback to {}.",
                        object_label(&fallback.addr, fallback.deposed_key)
                    ),
                ));
                return (None, diags);
            }
        }

        let provider_addr = &provider.instance_addr.provider;
        let schema = match self.schema(provider_addr, ResourceMode::Managed, &plan.resource_type) {
            Ok(schema) => schema,
            Err(diag) => {
                diags.push(diag);
                return (None, diags);
            }
        };

        let resp = self
            .provider_call(provider.ops.apply_resource_change(ApplyResourceChangeRequest {
                type_name: plan.resource_type.clone(),
                prior_state: plan.prior_val.clone(),
                config: plan.config_val.clone(),
                planned_state: plan.planned_val.clone(),
                planned_private: plan.planned_private.clone(),
                provider_meta: Value::Null,
            }))
            .await;
        diags.append(resp.diagnostics);

        // A null new state only counts as a destroy when one was planned and
        // succeeded. Otherwise the stored object stays tracked.
        let new_state = resp.new_state.filter(|value| !value.is_null());
        if new_state.is_none() && plan.planned_val.is_null() && !diags.has_errors() {
            self.working_state.remove(&plan.addr, plan.deposed_key);
            debug!(object = %label, "object destroyed");
            return (None, diags);
        }
        let Some(new_state) = new_state else {
            if !diags.has_errors() {
                diags.push(Diagnostic::error(
                    DiagnosticKind::ProviderBug,
                    "Provider produced inconsistent result after apply",
                    format!(
                        "Provider {provider_addr} did not return an error when applying changes for {label}, \
                         but it also didn't return a new object to save.\n\n\
                         This is a bug in the provider, which should be reported in the provider's own issue tracker."
                    ),
                ));
            }
            if let Some(fallback) = fallback {
                self.restore_fallback(fallback, &mut diags);
            }
            let (current, more) = Self::stored_object(&self.working_state, &plan.addr, plan.deposed_key);
            diags.append(more);
            return (current, diags);
        };

        let errs = assert_object_compatible(&schema, &plan.planned_val, &new_state);
        if !errs.is_empty() {
            if resp.legacy_type_system {
                warn!(
                    provider = %provider_addr,
                    object = %label,
                    problems = %list_problems(&errs),
                    "provider produced an inconsistent result, tolerated because it uses the legacy type system"
                );
            } else {
                diags.extend(errs.iter().map(|err| {
                    Diagnostic::error(
                        DiagnosticKind::ProviderBug,
                        "Provider produced inconsistent result after apply",
                        format!(
                            "When applying changes to {label}, provider {provider_addr} produced an unexpected \
                             new value: {err}.\n\n\
                             This is a bug in the provider, which should be reported in the provider's own issue tracker."
                        ),
                    )
                }));
            }
        }

        // Errors alongside a new object mean the change was only partly made.
        let status = if diags.has_errors() {
            ObjectStatus::Tainted
        } else {
            ObjectStatus::Ready
        };
        let object = Arc::new(ResourceInstanceObject {
            value: new_state,
            private: resp.private,
            status,
            provider_instance_addr: provider.instance_addr.clone(),
            resource_type: plan.resource_type.clone(),
            schema_version: schema.version,
            dependencies: plan.dependencies.clone(),
            create_before_destroy: plan.create_before_destroy,
        });
        if let Err(err) = self
            .working_state
            .save(&plan.addr, plan.deposed_key, Arc::clone(&object), &schema)
        {
            error!(object = %label, error = %err, "failed to save new state");
            diags.push(Diagnostic::error(
                DiagnosticKind::InvalidState,
                "Failed to save new state",
                format!(
                    "The changes to {label} were applied, but the new object could not be saved: {err}. \
                     It was not persisted, so the next plan will not know about it."
                ),
            ));
        }
        let result = ExecObject {
            addr: plan.addr.clone(),
            deposed_key: plan.deposed_key,
            state: object,
        };
        (Some(result), diags)
    }

    fn restore_fallback(&self, fallback: &ExecObject, diags: &mut Diagnostics) {
        if self
            .working_state
            .maybe_restore_deposed(&fallback.addr, fallback.deposed_key)
        {
            debug!(object = %object_label(&fallback.addr, fallback.deposed_key), "restored as current object");
            return;
        }
        error!(
            object = %object_label(&fallback.addr, fallback.deposed_key),
            "failed to restore deposed object"
        );
        diags.push(Diagnostic::internal(
            "Failed to restore deposed object",
            format!(
                "Failed to restore {} as the current object after failing to create its replacement.\n\n\
                 The next plan will propose to destroy this deposed object.",
                object_label(&fallback.addr, fallback.deposed_key)
            ),
        ));
    }

    pub(super) fn depose(&self, current: Option<&ExecObject>) -> (Option<ExecObject>, Diagnostics) {
        let Some(current) = current else {
            trace!("ManagedDepose with no object (ignored)");
            return (None, Diagnostics::new());
        };
        debug!(addr = %current.addr, "ManagedDepose");
        match self.working_state.depose(&current.addr) {
            Some(key) => (Some(current.clone().into_deposed(key)), Diagnostics::new()),
            None => {
                error!(addr = %current.addr, "nothing to depose");
                let diag = Diagnostic::internal(
                    "Failed to depose object",
                    format!("Failed to depose the current object for {}.", current.addr),
                );
                (None, Diagnostics::from(diag))
            }
        }
    }

    pub(super) fn change_addr(
        &self,
        current: Option<&ExecObject>,
        new_addr: &ResourceInstanceAddr,
    ) -> (Option<ExecObject>, Diagnostics) {
        let Some(current) = current else {
            trace!("ManagedChangeAddr with no object (ignored)");
            return (None, Diagnostics::new());
        };
        debug!(from = %current.addr, to = %new_addr, "ManagedChangeAddr");
        if self.working_state.move_instance(&current.addr, new_addr) {
            return (Some(current.clone().with_new_addr(new_addr.clone())), Diagnostics::new());
        }
        error!(from = %current.addr, to = %new_addr, "nothing to move");
        let diag = Diagnostic::internal(
            "Failed to move object",
            format!("Failed to move {} to {new_addr}.", current.addr),
        );
        (None, Diagnostics::from(diag))
    }
}

/// Formats an object change error so it reads after an address.
fn prefixed(err: &ObjectChangeError) -> String {
    if err.path.starts_with('(') {
        format!(": {}", err.message)
    } else {
        format!("{}: {}", err.path, err.message)
    }
}

fn list_problems(errs: &[ObjectChangeError]) -> String {
    let mut out = String::new();
    for err in errs {
        let _ = write!(out, "\n  - {err}");
    }
    out
}

#[cfg(test)]
mod tests {
    use crate::addrs::DeposedKey;
    use crate::diagnostics::DiagnosticKind;
    use crate::exec::{ExecObject, Operations};
    use crate::providers::{ApplyResourceChangeResponse, PlanResourceChangeResponse};
    use crate::state::{ObjectStatus, State};
    use crate::testing::{fixtures, MockProvider, StaticOracle};
    use crate::value::Value;
    use std::sync::Arc;
    use tracing_test::traced_test;

    fn prior_state() -> State {
        fixtures::state_with(&[(
            fixtures::managed_addr("a"),
            DeposedKey::NOT_DEPOSED,
            fixtures::thing_object("i-1", "first"),
        )])
    }

    #[tokio::test]
    async fn final_plan_without_desired_or_prior_is_a_no_op() {
        let provider = Arc::new(MockProvider::new());
        let ops = fixtures::operations(State::new(), Arc::clone(&provider), StaticOracle::new());
        let client = fixtures::client(Arc::clone(&provider));
        let (plan, diags) = ops.managed_final_plan(None, None, &Value::Null, &client).await;
        assert!(plan.is_none());
        assert!(diags.is_empty());
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn final_plan_carries_desired_dependencies() {
        let provider = Arc::new(MockProvider::new());
        let ops = fixtures::operations(State::new(), Arc::clone(&provider), StaticOracle::new());
        let client = fixtures::client(Arc::clone(&provider));
        let mut desired = fixtures::desired(&fixtures::managed_addr("a"), "first");
        desired.dependencies = vec![fixtures::managed_addr("base")];
        desired.create_before_destroy = true;

        let planned = Value::object([("id", Value::Unknown), ("name", Value::string("first"))]);
        let (plan, diags) = ops.managed_final_plan(Some(&desired), None, &planned, &client).await;
        assert!(diags.is_empty(), "{diags}");
        let plan = plan.unwrap();
        assert_eq!(plan.dependencies, vec![fixtures::managed_addr("base")]);
        assert!(plan.create_before_destroy);
        assert_eq!(plan.planned_val, planned);
        assert_eq!(plan.prior_val, Value::Null);
    }

    #[tokio::test]
    async fn inconsistent_final_plans_are_provider_bugs() {
        let provider = Arc::new(MockProvider::new().with_plan(|_| PlanResourceChangeResponse {
            planned_state: Value::object([("id", Value::Unknown), ("name", Value::string("second"))]),
            ..PlanResourceChangeResponse::default()
        }));
        let ops = fixtures::operations(State::new(), Arc::clone(&provider), StaticOracle::new());
        let client = fixtures::client(provider);
        let desired = fixtures::desired(&fixtures::managed_addr("a"), "first");
        let planned = Value::object([("id", Value::Unknown), ("name", Value::string("first"))]);

        let (plan, diags) = ops.managed_final_plan(Some(&desired), None, &planned, &client).await;
        assert!(plan.is_none());
        assert!(diags.has_errors());
        assert!(diags.iter().all(|d| d.kind == DiagnosticKind::ProviderBug));
        assert!(diags.iter().all(|d| d.detail.contains("test_thing.a.name")), "{diags}");
    }

    #[traced_test]
    #[tokio::test]
    async fn legacy_providers_only_get_a_warning() {
        let provider = Arc::new(MockProvider::new().with_plan(|_| PlanResourceChangeResponse {
            planned_state: Value::object([("id", Value::Unknown), ("name", Value::string("second"))]),
            legacy_type_system: true,
            ..PlanResourceChangeResponse::default()
        }));
        let ops = fixtures::operations(State::new(), Arc::clone(&provider), StaticOracle::new());
        let client = fixtures::client(provider);
        let desired = fixtures::desired(&fixtures::managed_addr("a"), "first");
        let planned = Value::object([("id", Value::Unknown), ("name", Value::string("first"))]);

        let (plan, diags) = ops.managed_final_plan(Some(&desired), None, &planned, &client).await;
        assert!(plan.is_some());
        assert!(diags.is_empty(), "{diags}");
        assert!(logs_contain("tolerated because it uses the legacy type system"));
    }

    #[tokio::test]
    async fn create_installs_a_ready_object() {
        let provider = Arc::new(MockProvider::new());
        let ops = fixtures::operations(State::new(), Arc::clone(&provider), StaticOracle::new());
        let client = fixtures::client(provider);
        let desired = fixtures::desired(&fixtures::managed_addr("a"), "first");
        let planned = Value::object([("id", Value::Unknown), ("name", Value::string("first"))]);

        let (plan, _) = ops.managed_final_plan(Some(&desired), None, &planned, &client).await;
        let (obj, diags) = ops.managed_apply(plan.as_ref(), None, &client).await;
        assert!(diags.is_empty(), "{diags}");
        let obj = obj.unwrap();
        assert_eq!(obj.state.status, ObjectStatus::Ready);
        assert_eq!(obj.state.value.attr("name"), &Value::string("first"));
        assert!(obj.state.value.is_wholly_known());

        let saved = ops.working_state.get(&fixtures::managed_addr("a"), DeposedKey::NOT_DEPOSED);
        assert_eq!(saved.unwrap().unwrap(), obj.state);
    }

    #[tokio::test]
    async fn errors_alongside_a_new_object_taint_it() {
        let provider = Arc::new(MockProvider::new().with_apply(|req| ApplyResourceChangeResponse {
            new_state: Some(fixtures::fill_unknowns(&req.planned_state)),
            diagnostics: fixtures::provider_error("timed out waiting for the instance to boot").into(),
            ..ApplyResourceChangeResponse::default()
        }));
        let ops = fixtures::operations(State::new(), Arc::clone(&provider), StaticOracle::new());
        let client = fixtures::client(provider);
        let desired = fixtures::desired(&fixtures::managed_addr("a"), "first");
        let planned = Value::object([("id", Value::Unknown), ("name", Value::string("first"))]);

        let (plan, _) = ops.managed_final_plan(Some(&desired), None, &planned, &client).await;
        let (obj, diags) = ops.managed_apply(plan.as_ref(), None, &client).await;
        assert!(diags.has_errors());
        assert_eq!(obj.unwrap().state.status, ObjectStatus::Tainted);
        let saved = ops
            .working_state
            .get(&fixtures::managed_addr("a"), DeposedKey::NOT_DEPOSED)
            .unwrap()
            .unwrap();
        assert_eq!(saved.status, ObjectStatus::Tainted);
    }

    #[tokio::test]
    async fn missing_new_state_leaves_the_prior_object() {
        let provider = Arc::new(MockProvider::new().with_apply(|_| ApplyResourceChangeResponse::default()));
        let ops = fixtures::operations(prior_state(), Arc::clone(&provider), StaticOracle::new());
        let client = fixtures::client(provider);
        let addr = fixtures::managed_addr("a");
        let (prior, _) = ops.resource_instance_prior(&addr).await;
        let desired = fixtures::desired(&addr, "renamed");
        let planned = Value::object([("id", Value::string("i-1")), ("name", Value::string("renamed"))]);

        let (plan, diags) = ops.managed_final_plan(Some(&desired), prior.as_ref(), &planned, &client).await;
        assert!(diags.is_empty(), "{diags}");
        let (obj, diags) = ops.managed_apply(plan.as_ref(), None, &client).await;
        assert_eq!(diags.len(), 1);
        assert_eq!(diags.iter().next().unwrap().kind, DiagnosticKind::ProviderBug);
        assert_eq!(obj.unwrap().state, prior.unwrap().state);
    }

    #[tokio::test]
    async fn failed_create_restores_the_deposed_fallback() {
        let provider = Arc::new(MockProvider::new().with_apply(|_| ApplyResourceChangeResponse {
            diagnostics: fixtures::provider_error("quota exceeded").into(),
            ..ApplyResourceChangeResponse::default()
        }));
        let ops = fixtures::operations(prior_state(), Arc::clone(&provider), StaticOracle::new());
        let client = fixtures::client(provider);
        let addr = fixtures::managed_addr("a");
        let (prior, _) = ops.resource_instance_prior(&addr).await;
        let (deposed, diags) = ops.managed_depose(prior.as_ref()).await;
        assert!(diags.is_empty());
        let deposed = deposed.unwrap();
        assert!(deposed.deposed_key.is_deposed());

        let desired = fixtures::desired(&addr, "replacement");
        let planned = Value::object([("id", Value::Unknown), ("name", Value::string("replacement"))]);
        let (plan, _) = ops.managed_final_plan(Some(&desired), None, &planned, &client).await;
        let (obj, diags) = ops.managed_apply(plan.as_ref(), Some(&deposed), &client).await;

        // Only the provider's own error: the restore succeeded.
        assert_eq!(diags.len(), 1);
        assert_eq!(obj.unwrap().state, prior.unwrap().state);
        assert!(ops.working_state.deposed_keys(&addr).is_empty());
    }

    #[tokio::test]
    async fn destroying_removes_the_object() {
        let provider = Arc::new(MockProvider::new());
        let ops = fixtures::operations(prior_state(), Arc::clone(&provider), StaticOracle::new());
        let client = fixtures::client(provider);
        let addr = fixtures::managed_addr("a");
        let (prior, _) = ops.resource_instance_prior(&addr).await;

        let (plan, diags) = ops.managed_final_plan(None, prior.as_ref(), &Value::Null, &client).await;
        assert!(diags.is_empty(), "{diags}");
        let (obj, diags) = ops.managed_apply(plan.as_ref(), None, &client).await;
        assert!(diags.is_empty(), "{diags}");
        assert!(obj.is_none());
        assert!(ops.working_state.is_empty());
        // The prior state is never touched.
        assert_eq!(ops.prior_state.len(), 1);
    }

    #[tokio::test]
    async fn null_new_state_for_an_update_keeps_the_object() {
        let provider = Arc::new(MockProvider::new().with_apply(|_| ApplyResourceChangeResponse {
            new_state: Some(Value::Null),
            ..ApplyResourceChangeResponse::default()
        }));
        let ops = fixtures::operations(prior_state(), Arc::clone(&provider), StaticOracle::new());
        let client = fixtures::client(provider);
        let addr = fixtures::managed_addr("a");
        let (prior, _) = ops.resource_instance_prior(&addr).await;
        let desired = fixtures::desired(&addr, "renamed");
        let planned = Value::object([("id", Value::string("i-1")), ("name", Value::string("renamed"))]);

        let (plan, _) = ops.managed_final_plan(Some(&desired), prior.as_ref(), &planned, &client).await;
        let (obj, diags) = ops.managed_apply(plan.as_ref(), None, &client).await;
        assert_eq!(diags.len(), 1, "{diags}");
        assert_eq!(diags.iter().next().unwrap().kind, DiagnosticKind::ProviderBug);
        assert_eq!(obj.unwrap().state, prior.unwrap().state);
        assert!(ops.working_state.get(&addr, DeposedKey::NOT_DEPOSED).is_some());
    }

    #[tokio::test]
    async fn failed_destroy_keeps_the_object() {
        let provider = Arc::new(MockProvider::new().with_apply(|_| ApplyResourceChangeResponse {
            new_state: Some(Value::Null),
            diagnostics: fixtures::provider_error("permission denied").into(),
            ..ApplyResourceChangeResponse::default()
        }));
        let ops = fixtures::operations(prior_state(), Arc::clone(&provider), StaticOracle::new());
        let client = fixtures::client(provider);
        let addr = fixtures::managed_addr("a");
        let (prior, _) = ops.resource_instance_prior(&addr).await;

        let (plan, _) = ops.managed_final_plan(None, prior.as_ref(), &Value::Null, &client).await;
        let (obj, diags) = ops.managed_apply(plan.as_ref(), None, &client).await;
        // Only the provider's own error.
        assert_eq!(diags.len(), 1, "{diags}");
        assert!(diags.has_errors());
        assert_eq!(obj.unwrap().state, prior.unwrap().state);
        assert!(ops.working_state.get(&addr, DeposedKey::NOT_DEPOSED).is_some());
    }

    #[tokio::test]
    async fn depose_and_change_addr_ignore_missing_objects() {
        let ops = fixtures::operations(State::new(), Arc::new(MockProvider::new()), StaticOracle::new());
        let (obj, diags) = ops.managed_depose(None).await;
        assert!(obj.is_none() && diags.is_empty());
        let (obj, diags) = ops.managed_change_addr(None, &fixtures::managed_addr("b")).await;
        assert!(obj.is_none() && diags.is_empty());
    }

    #[tokio::test]
    async fn deposing_a_vanished_object_is_an_engine_bug() {
        let ops = fixtures::operations(State::new(), Arc::new(MockProvider::new()), StaticOracle::new());
        let ghost = ExecObject {
            addr: fixtures::managed_addr("ghost"),
            deposed_key: DeposedKey::NOT_DEPOSED,
            state: Arc::new(fixtures::thing_object("i-0", "ghost")),
        };
        let (obj, diags) = ops.managed_depose(Some(&ghost)).await;
        assert!(obj.is_none());
        assert_eq!(diags.iter().next().unwrap().kind, DiagnosticKind::Internal);

        let (obj, diags) = ops.managed_change_addr(Some(&ghost), &fixtures::managed_addr("b")).await;
        assert!(obj.is_none());
        assert_eq!(diags.iter().next().unwrap().kind, DiagnosticKind::Internal);
    }

    #[tokio::test]
    async fn change_addr_relabels_the_object() {
        let ops = fixtures::operations(prior_state(), Arc::new(MockProvider::new()), StaticOracle::new());
        let (prior, _) = ops.resource_instance_prior(&fixtures::managed_addr("a")).await;
        let (moved, diags) = ops.managed_change_addr(prior.as_ref(), &fixtures::managed_addr("b")).await;
        assert!(diags.is_empty());
        assert_eq!(moved.unwrap().addr, fixtures::managed_addr("b"));
        assert!(ops
            .working_state
            .get(&fixtures::managed_addr("a"), DeposedKey::NOT_DEPOSED)
            .is_none());
        assert!(ops
            .working_state
            .get(&fixtures::managed_addr("b"), DeposedKey::NOT_DEPOSED)
            .is_some());
    }
}
