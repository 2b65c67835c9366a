//! In-memory provider plugins.

use super::fixtures::fill_unknowns;
use crate::addrs::{ProviderAddr, ResourceMode};
use crate::diagnostics::Diagnostics;
use crate::errors::ProviderError;
use crate::providers::{
    ApplyResourceChangeRequest, ApplyResourceChangeResponse, CloseEphemeralResourceRequest,
    OpenEphemeralResourceRequest, OpenEphemeralResourceResponse, PlanResourceChangeRequest,
    PlanResourceChangeResponse, Plugins, Provider, ReadDataSourceRequest, ReadDataSourceResponse,
};
use crate::schema::{Schema, SchemaSource};
use crate::value::Value;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

type PlanFn = dyn Fn(&PlanResourceChangeRequest) -> PlanResourceChangeResponse + Send + Sync;
type ApplyFn = dyn Fn(&ApplyResourceChangeRequest) -> ApplyResourceChangeResponse + Send + Sync;
type ReadFn = dyn Fn(&ReadDataSourceRequest) -> ReadDataSourceResponse + Send + Sync;
type OpenFn = dyn Fn(&OpenEphemeralResourceRequest) -> OpenEphemeralResourceResponse + Send + Sync;

/// A provider whose behaviour is supplied by closures, recording every call.
///
/// Without overrides it behaves like a well-mannered provider: plans accept
/// the proposed value, applies fill unknown attributes with `"generated"`,
/// destroys return null, reads echo their configuration and opens return
/// their configuration.
///
/// Calls are recorded as `"plan <type>"`, `"apply <type>"`,
/// `"read <type>"`, `"open <type>"`, `"close_ephemeral <type>"` and
/// `"close"`.
#[derive(Default)]
pub struct MockProvider {
    plan: Option<Box<PlanFn>>,
    apply: Option<Box<ApplyFn>>,
    read: Option<Box<ReadFn>>,
    open: Option<Box<OpenFn>>,
    apply_delay: Option<Duration>,
    apply_delays: HashMap<String, Duration>,
    calls: Mutex<Vec<String>>,
    applied: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl fmt::Debug for MockProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockProvider")
            .field("calls", &*self.calls.lock())
            .field("apply_delay", &self.apply_delay)
            .finish_non_exhaustive()
    }
}

impl MockProvider {
    /// A provider with default behaviour.
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides planning.
    #[must_use]
    pub fn with_plan(
        mut self,
        plan: impl Fn(&PlanResourceChangeRequest) -> PlanResourceChangeResponse + Send + Sync + 'static,
    ) -> Self {
        self.plan = Some(Box::new(plan));
        self
    }

    /// Overrides applying.
    #[must_use]
    pub fn with_apply(
        mut self,
        apply: impl Fn(&ApplyResourceChangeRequest) -> ApplyResourceChangeResponse + Send + Sync + 'static,
    ) -> Self {
        self.apply = Some(Box::new(apply));
        self
    }

    /// Overrides data source reads.
    #[must_use]
    pub fn with_read(
        mut self,
        read: impl Fn(&ReadDataSourceRequest) -> ReadDataSourceResponse + Send + Sync + 'static,
    ) -> Self {
        self.read = Some(Box::new(read));
        self
    }

    /// Overrides opening ephemeral resources.
    #[must_use]
    pub fn with_open(
        mut self,
        open: impl Fn(&OpenEphemeralResourceRequest) -> OpenEphemeralResourceResponse + Send + Sync + 'static,
    ) -> Self {
        self.open = Some(Box::new(open));
        self
    }

    /// Makes every apply take at least `delay`.
    #[must_use]
    pub const fn with_apply_delay(mut self, delay: Duration) -> Self {
        self.apply_delay = Some(delay);
        self
    }

    /// Makes applies planning a `name` attribute of `name` take at least
    /// `delay`, in place of any delay set with [`Self::with_apply_delay`].
    #[must_use]
    pub fn with_apply_delay_for(mut self, name: &str, delay: Duration) -> Self {
        self.apply_delays.insert(name.to_string(), delay);
        self
    }

    /// The planned `name` of every finished apply, in the order they finished.
    pub fn applied(&self) -> Vec<String> {
        self.applied.lock().clone()
    }

    /// Every call so far, in the order they started.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// The most calls that were ever in flight at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn record(&self, call: String) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn plan_resource_change(&self, request: PlanResourceChangeRequest) -> PlanResourceChangeResponse {
        self.record(format!("plan {}", request.type_name));
        self.plan.as_ref().map_or_else(
            || PlanResourceChangeResponse {
                planned_state: request.proposed_new_state.clone(),
                ..PlanResourceChangeResponse::default()
            },
            |plan| plan(&request),
        )
    }

    async fn apply_resource_change(&self, request: ApplyResourceChangeRequest) -> ApplyResourceChangeResponse {
        self.record(format!("apply {}", request.type_name));
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let name = if let Value::String(name) = request.planned_state.attr("name") {
            name.clone()
        } else {
            String::new()
        };
        if let Some(delay) = self.apply_delays.get(&name).copied().or(self.apply_delay) {
            tokio::time::sleep(delay).await;
        }
        let resp = self.apply.as_ref().map_or_else(
            || ApplyResourceChangeResponse {
                new_state: Some(fill_unknowns(&request.planned_state)),
                private: request.planned_private.clone(),
                ..ApplyResourceChangeResponse::default()
            },
            |apply| apply(&request),
        );
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.applied.lock().push(name);
        resp
    }

    async fn read_data_source(&self, request: ReadDataSourceRequest) -> ReadDataSourceResponse {
        self.record(format!("read {}", request.type_name));
        self.read.as_ref().map_or_else(
            || ReadDataSourceResponse {
                state: Some(fill_unknowns(&request.config)),
                ..ReadDataSourceResponse::default()
            },
            |read| read(&request),
        )
    }

    async fn open_ephemeral_resource(&self, request: OpenEphemeralResourceRequest) -> OpenEphemeralResourceResponse {
        self.record(format!("open {}", request.type_name));
        self.open.as_ref().map_or_else(
            || OpenEphemeralResourceResponse {
                result: Some(fill_unknowns(&request.config)),
                private: request.type_name.clone().into_bytes(),
                ..OpenEphemeralResourceResponse::default()
            },
            |open| open(&request),
        )
    }

    async fn close_ephemeral_resource(&self, request: CloseEphemeralResourceRequest) -> Diagnostics {
        self.record(format!("close_ephemeral {}", request.type_name));
        Diagnostics::new()
    }

    async fn close(&self) -> Diagnostics {
        self.record("close".to_string());
        Diagnostics::new()
    }
}

/// A plugin library serving fixed schemas and pre-built providers.
///
/// Every client opened for a provider shares the same provider object, so
/// tests can inspect its recorded calls afterwards.
#[derive(Default)]
pub struct MockPlugins {
    schemas: HashMap<(ProviderAddr, ResourceMode, String), Arc<Schema>>,
    providers: HashMap<ProviderAddr, Arc<dyn Provider>>,
    opened: AtomicUsize,
}

impl fmt::Debug for MockPlugins {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockPlugins")
            .field("schemas", &self.schemas.keys().collect::<Vec<_>>())
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl MockPlugins {
    /// A library with no providers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a resource type schema.
    #[must_use]
    pub fn with_schema(mut self, provider: ProviderAddr, mode: ResourceMode, type_name: &str, schema: Schema) -> Self {
        self.schemas
            .insert((provider, mode, type_name.to_string()), Arc::new(schema));
        self
    }

    /// Installs a provider.
    #[must_use]
    pub fn with_provider(mut self, addr: ProviderAddr, provider: Arc<dyn Provider>) -> Self {
        self.providers.insert(addr, provider);
        self
    }

    /// How many provider clients have been opened.
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

impl SchemaSource for MockPlugins {
    fn resource_type_schema(
        &self,
        provider: &ProviderAddr,
        mode: ResourceMode,
        type_name: &str,
    ) -> Result<Arc<Schema>, ProviderError> {
        self.schemas
            .get(&(provider.clone(), mode, type_name.to_string()))
            .cloned()
            .ok_or_else(|| ProviderError::UnknownResourceType {
                provider: provider.clone(),
                mode,
                type_name: type_name.to_string(),
            })
    }
}

#[async_trait]
impl Plugins for MockPlugins {
    async fn new_provider_client(&self, provider: &ProviderAddr, _config: &Value) -> Result<Arc<dyn Provider>, ProviderError> {
        let ops = self
            .providers
            .get(provider)
            .cloned()
            .ok_or_else(|| ProviderError::UnknownProvider(provider.clone()))?;
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(ops)
    }
}
