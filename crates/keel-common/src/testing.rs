//! Test doubles shared by keel crates
//!
//! [`InMemoryClient`] is a stateful fake API server: it stores objects by
//! identity, keeps generation and resourceVersion bookkeeping, records every
//! call, can fail chosen operations on demand, and can run a "controller"
//! hook on every read to simulate asynchronous reconciliation.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::DynamicObject;
use kube::core::TypeMeta;
use serde_json::json;

use crate::client::{ApplyServerSideOptions, ClientFactory, KubeClient};
use crate::cluster::{ObjectIdentity, CLUSTER_KIND};
use crate::Error;

/// API version used for cluster objects built by the helpers below
pub const TEST_API_VERSION: &str = "anywhere.eks.amazonaws.com/v1alpha1";

/// Build an object with empty data
pub fn object(api_version: &str, kind: &str, namespace: &str, name: &str) -> DynamicObject {
    DynamicObject {
        types: Some(TypeMeta {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
        }),
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: (!namespace.is_empty()).then(|| namespace.to_string()),
            ..Default::default()
        },
        data: json!({}),
    }
}

/// Build a `Cluster` object with empty data
pub fn cluster_object(name: &str, namespace: &str) -> DynamicObject {
    object(TEST_API_VERSION, CLUSTER_KIND, namespace, name)
}

/// Set (or replace) a status condition
pub fn set_condition(obj: &mut DynamicObject, condition_type: &str, status: &str, message: &str) {
    let condition = json!({"type": condition_type, "status": status, "message": message});
    let conditions = &mut obj.data["status"]["conditions"];
    if !conditions.is_array() {
        *conditions = json!([]);
    }
    if let Some(list) = conditions.as_array_mut() {
        list.retain(|c| c.get("type").and_then(|t| t.as_str()) != Some(condition_type));
        list.push(condition);
    }
}

/// Set `status.failureMessage`
pub fn set_failure_message(obj: &mut DynamicObject, message: &str) {
    obj.data["status"]["failureMessage"] = json!(message);
}

/// Mark the object as reconciled at its current generation
pub fn mark_observed(obj: &mut DynamicObject) {
    let generation = obj.metadata.generation.unwrap_or_default();
    obj.data["status"]["observedGeneration"] = json!(generation);
}

/// Client operation, for call counting and failure injection
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    /// `KubeClient::get`
    Get,
    /// `KubeClient::create`
    Create,
    /// `KubeClient::update`
    Update,
    /// `KubeClient::delete`
    Delete,
    /// `KubeClient::apply_server_side`
    Apply,
}

/// One recorded client call
#[derive(Clone, Debug)]
pub struct Call {
    /// Which operation ran
    pub operation: Operation,
    /// Target object
    pub identity: ObjectIdentity,
    /// The object as sent by the caller (create, update and apply only)
    pub object: Option<DynamicObject>,
}

type Controller = Box<dyn FnMut(&mut DynamicObject) + Send>;

#[derive(Default)]
struct State {
    objects: HashMap<ObjectIdentity, DynamicObject>,
    failures: HashMap<Operation, VecDeque<String>>,
    calls: Vec<Call>,
    controller: Option<Controller>,
    next_version: u64,
}

impl State {
    fn next_version(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }

    fn take_failure(&mut self, op: Operation) -> Option<Error> {
        let message = self.failures.get_mut(&op)?.pop_front()?;
        Some(Error::internal_with_context(
            format!("{:?}", op).to_lowercase(),
            message,
        ))
    }

    fn record(&mut self, operation: Operation, identity: &ObjectIdentity, object: Option<&DynamicObject>) {
        self.calls.push(Call {
            operation,
            identity: identity.clone(),
            object: object.cloned(),
        });
    }

    fn store_new(&mut self, id: ObjectIdentity, obj: &DynamicObject) {
        let mut stored = obj.clone();
        stored.metadata.generation = Some(1);
        stored.metadata.resource_version = Some(self.next_version());
        stored.metadata.uid = Some(format!("uid-{}", id.name));
        self.objects.insert(id, stored);
    }
}

fn not_found(id: &ObjectIdentity) -> Error {
    Error::NotFound {
        kind: id.kind.clone(),
        name: id.name.clone(),
    }
}

/// In-memory [`KubeClient`] with call recording and failure injection
#[derive(Default)]
pub struct InMemoryClient {
    state: Mutex<State>,
}

impl InMemoryClient {
    /// Create an empty client
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store an object as-is, bypassing bookkeeping and call recording
    pub fn insert(&self, obj: DynamicObject) {
        let id = ObjectIdentity::from_object(&obj).unwrap_or_else(|e| panic!("invalid object: {e}"));
        self.state().objects.insert(id, obj);
    }

    /// Current stored state of an object
    pub fn object(&self, id: &ObjectIdentity) -> Option<DynamicObject> {
        self.state().objects.get(id).cloned()
    }

    /// Number of stored objects
    pub fn len(&self) -> usize {
        self.state().objects.len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fail the next `times` calls of `op` with `message`
    pub fn fail_next(&self, op: Operation, times: usize, message: &str) {
        self.state()
            .failures
            .entry(op)
            .or_default()
            .extend(std::iter::repeat(message.to_string()).take(times));
    }

    /// Run `controller` against the stored object before every successful
    /// get, simulating a controller converging it in the background.
    pub fn on_get(&self, controller: impl FnMut(&mut DynamicObject) + Send + 'static) {
        self.state().controller = Some(Box::new(controller));
    }

    /// Every recorded call, in order
    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    /// Number of recorded calls of `op`
    pub fn count(&self, op: Operation) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| c.operation == op)
            .count()
    }

    /// Number of recorded gets
    pub fn get_calls(&self) -> usize {
        self.count(Operation::Get)
    }
}

#[async_trait]
impl KubeClient for InMemoryClient {
    async fn get(&self, id: &ObjectIdentity) -> Result<DynamicObject, Error> {
        let mut state = self.state();
        state.record(Operation::Get, id, None);
        if let Some(err) = state.take_failure(Operation::Get) {
            return Err(err);
        }

        let State {
            objects, controller, ..
        } = &mut *state;
        let obj = objects.get_mut(id).ok_or_else(|| not_found(id))?;
        if let Some(controller) = controller.as_mut() {
            controller(obj);
        }
        Ok(obj.clone())
    }

    async fn create(&self, obj: &DynamicObject) -> Result<(), Error> {
        let id = ObjectIdentity::from_object(obj)?;
        let mut state = self.state();
        state.record(Operation::Create, &id, Some(obj));
        if let Some(err) = state.take_failure(Operation::Create) {
            return Err(err);
        }

        if state.objects.contains_key(&id) {
            return Err(Error::AlreadyExists {
                kind: id.kind,
                name: id.name,
            });
        }
        state.store_new(id, obj);
        Ok(())
    }

    async fn update(&self, obj: &DynamicObject) -> Result<(), Error> {
        let id = ObjectIdentity::from_object(obj)?;
        let mut state = self.state();
        state.record(Operation::Update, &id, Some(obj));
        if let Some(err) = state.take_failure(Operation::Update) {
            return Err(err);
        }

        let version = state.next_version();
        let current = state.objects.get_mut(&id).ok_or_else(|| not_found(&id))?;
        let generation = current.metadata.generation.unwrap_or_default();
        let spec_changed = current.data.get("spec") != obj.data.get("spec");

        let mut updated = obj.clone();
        updated.metadata.uid = current.metadata.uid.clone();
        updated.metadata.resource_version = Some(version);
        updated.metadata.generation = Some(if spec_changed { generation + 1 } else { generation });
        *current = updated;
        Ok(())
    }

    async fn delete(&self, id: &ObjectIdentity) -> Result<(), Error> {
        let mut state = self.state();
        state.record(Operation::Delete, id, None);
        if let Some(err) = state.take_failure(Operation::Delete) {
            return Err(err);
        }

        state.objects.remove(id).map(|_| ()).ok_or_else(|| not_found(id))
    }

    async fn apply_server_side(
        &self,
        _field_manager: &str,
        obj: &DynamicObject,
        _opts: ApplyServerSideOptions,
    ) -> Result<(), Error> {
        let id = ObjectIdentity::from_object(obj)?;
        let mut state = self.state();
        state.record(Operation::Apply, &id, Some(obj));
        if let Some(err) = state.take_failure(Operation::Apply) {
            return Err(err);
        }

        if !state.objects.contains_key(&id) {
            state.store_new(id, obj);
            return Ok(());
        }

        let version = state.next_version();
        if let Some(current) = state.objects.get_mut(&id) {
            if let Some(spec) = obj.data.get("spec") {
                if current.data.get("spec") != Some(spec) {
                    current.data["spec"] = spec.clone();
                    current.metadata.generation =
                        Some(current.metadata.generation.unwrap_or_default() + 1);
                }
            }
            if obj.metadata.annotations.is_some() {
                current.metadata.annotations = obj.metadata.annotations.clone();
            }
            if obj.metadata.labels.is_some() {
                current.metadata.labels = obj.metadata.labels.clone();
            }
            current.metadata.resource_version = Some(version);
        }
        Ok(())
    }
}

/// [`ClientFactory`] handing out pre-registered clients by kubeconfig path
#[derive(Default)]
pub struct StaticClientFactory {
    clients: Mutex<HashMap<PathBuf, Arc<dyn KubeClient>>>,
    failures: Mutex<VecDeque<String>>,
    builds: Mutex<Vec<PathBuf>>,
}

impl StaticClientFactory {
    /// Create a factory with no clients registered
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `client` for `kubeconfig`
    pub fn with_client(self, kubeconfig: impl Into<PathBuf>, client: Arc<dyn KubeClient>) -> Self {
        self.clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(kubeconfig.into(), client);
        self
    }

    /// Fail the next `times` builds with `message`
    pub fn fail_next(&self, times: usize, message: &str) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(std::iter::repeat(message.to_string()).take(times));
    }

    /// Kubeconfig paths of every build request, in order
    pub fn builds(&self) -> Vec<PathBuf> {
        self.builds
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl ClientFactory for StaticClientFactory {
    async fn build_client_from_kubeconfig(
        &self,
        kubeconfig: &Path,
    ) -> Result<Arc<dyn KubeClient>, Error> {
        self.builds
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(kubeconfig.to_path_buf());

        if let Some(message) = self
            .failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
        {
            return Err(Error::ClientBuild(message));
        }

        self.clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(kubeconfig)
            .cloned()
            .ok_or_else(|| {
                Error::ClientBuild(format!("no client for kubeconfig {}", kubeconfig.display()))
            })
    }
}
