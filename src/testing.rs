//! In-memory `ClusterClient` for tests.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use crate::cluster::ClusterClient;
use crate::error::ClientError;
use crate::render::Manifest;
use crate::resource::ResourceRef;

type Scripted = VecDeque<Result<Option<Value>, ClientError>>;

#[derive(Default)]
pub struct FakeCluster {
    objects: Mutex<BTreeMap<ResourceRef, Value>>,
    scripted_gets: Mutex<HashMap<ResourceRef, Scripted>>,
    failing_gets: Mutex<HashMap<ResourceRef, ClientError>>,
    apply_failures: Mutex<HashMap<ResourceRef, (ClientError, Option<u32>)>>,
    patch_failures: Mutex<HashMap<ResourceRef, ClientError>>,
    statuses: Mutex<HashMap<ResourceRef, Value>>,
    apply_delays: Mutex<HashMap<ResourceRef, Duration>>,
    calls: Mutex<Vec<(String, ResourceRef)>>,
}

impl FakeCluster {
    pub fn new() -> FakeCluster {
        FakeCluster::default()
    }

    pub fn set_object(&self, resource: &ResourceRef, value: Value) {
        self.objects.lock().unwrap().insert(resource.clone(), value);
    }

    pub fn object(&self, resource: &ResourceRef) -> Option<Value> {
        self.objects.lock().unwrap().get(resource).cloned()
    }

    pub fn snapshot(&self) -> BTreeMap<ResourceRef, Value> {
        self.objects.lock().unwrap().clone()
    }

    /// Responses returned by `get` in order, before falling back to stored objects.
    pub fn script_get(&self, resource: &ResourceRef, responses: Vec<Result<Option<Value>, ClientError>>) {
        self.scripted_gets
            .lock()
            .unwrap()
            .insert(resource.clone(), responses.into_iter().collect());
    }

    pub fn fail_get(&self, resource: &ResourceRef, error: ClientError) {
        self.failing_gets.lock().unwrap().insert(resource.clone(), error);
    }

    pub fn fail_apply(&self, resource: &ResourceRef, error: ClientError) {
        self.apply_failures
            .lock()
            .unwrap()
            .insert(resource.clone(), (error, None));
    }

    pub fn fail_apply_times(&self, resource: &ResourceRef, error: ClientError, times: u32) {
        self.apply_failures
            .lock()
            .unwrap()
            .insert(resource.clone(), (error, Some(times)));
    }

    pub fn fail_patch(&self, resource: &ResourceRef, error: ClientError) {
        self.patch_failures.lock().unwrap().insert(resource.clone(), error);
    }

    /// Status the "controller" writes as soon as the resource is applied.
    pub fn status_on_apply(&self, resource: &ResourceRef, status: Value) {
        self.statuses.lock().unwrap().insert(resource.clone(), status);
    }

    /// The apply call takes `delay` before the object lands.
    pub fn slow_apply(&self, resource: &ResourceRef, delay: Duration) {
        self.apply_delays.lock().unwrap().insert(resource.clone(), delay);
    }

    pub fn count(&self, verb: &str, resource: &ResourceRef) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(v, r)| v == verb && r == resource)
            .count()
    }

    pub fn calls(&self, verb: &str) -> Vec<ResourceRef> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(v, _)| v == verb)
            .map(|(_, r)| r.clone())
            .collect()
    }

    fn record(&self, verb: &str, resource: &ResourceRef) {
        self.calls
            .lock()
            .unwrap()
            .push((verb.to_string(), resource.clone()));
    }
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn apply(&self, manifest: &Manifest) -> Result<(), ClientError> {
        let resource = &manifest.resource;
        self.record("apply", resource);

        let delay = self.apply_delays.lock().unwrap().get(resource).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some((error, remaining)) = self.apply_failures.lock().unwrap().get_mut(resource) {
            match remaining {
                None => return Err(error.clone()),
                Some(n) if *n > 0 => {
                    *n -= 1;
                    return Err(error.clone());
                }
                Some(_) => {}
            }
        }

        let mut document = manifest.document.clone();
        if let Some(status) = self.statuses.lock().unwrap().get(resource) {
            document["status"] = status.clone();
        }
        self.objects
            .lock()
            .unwrap()
            .insert(resource.clone(), document);
        Ok(())
    }

    async fn get(&self, resource: &ResourceRef) -> Result<Option<Value>, ClientError> {
        self.record("get", resource);
        if let Some(error) = self.failing_gets.lock().unwrap().get(resource) {
            return Err(error.clone());
        }
        if let Some(queue) = self.scripted_gets.lock().unwrap().get_mut(resource) {
            if let Some(response) = queue.pop_front() {
                return response;
            }
        }
        Ok(self.object(resource))
    }

    async fn patch(&self, resource: &ResourceRef, patch: &Value) -> Result<(), ClientError> {
        self.record("patch", resource);
        if let Some(error) = self.patch_failures.lock().unwrap().get(resource) {
            return Err(error.clone());
        }
        let mut objects = self.objects.lock().unwrap();
        let object = objects
            .get_mut(resource)
            .ok_or_else(|| ClientError::not_found(resource.to_string()))?;
        if let (Value::Object(target), Value::Object(fields)) = (object, patch) {
            for (k, v) in fields {
                target.insert(k.clone(), v.clone());
            }
        }
        Ok(())
    }

    async fn delete(&self, resource: &ResourceRef) -> Result<(), ClientError> {
        self.record("delete", resource);
        match self.objects.lock().unwrap().remove(resource) {
            Some(_) => Ok(()),
            None => Err(ClientError::not_found(resource.to_string())),
        }
    }
}
