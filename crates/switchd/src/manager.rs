//! HTTP client for the external instance manager.
//!
//! The manager is an opaque collaborator: it actually launches and tears
//! down instances (and handles their certificates and secrets). The daemon
//! only issues create/terminate commands and learns each new instance's
//! address from the create response.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Method, Request, StatusCode};
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tracing::{debug, warn};

use switchyard_rollout::{InstanceManager, ManagerError};
use switchyard_state::InstanceId;

#[derive(serde::Serialize)]
struct CreateRequest<'a> {
    service: &'a str,
    version: &'a str,
    group: &'a str,
}

#[derive(serde::Deserialize)]
struct CreateResponse {
    id: String,
    address: String,
}

/// Talks to the instance manager over its REST interface.
pub struct HttpInstanceManager {
    base_url: String,
    client: Client<hyper_util::client::legacy::connect::HttpConnector, Full<Bytes>>,
    /// Addresses learned from create responses, keyed by instance id.
    addresses: Mutex<HashMap<InstanceId, String>>,
}

impl HttpInstanceManager {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::builder(TokioExecutor::new()).build_http(),
            addresses: Mutex::new(HashMap::new()),
        }
    }

    /// Address of an instance this manager created, if known.
    pub fn address_of(&self, instance: &str) -> Option<String> {
        self.addresses.lock().expect("address lock").get(instance).cloned()
    }
}

impl crate::controller::AddressSource for HttpInstanceManager {
    fn address_of(&self, instance: &str) -> Option<String> {
        HttpInstanceManager::address_of(self, instance)
    }
}

#[async_trait]
impl InstanceManager for HttpInstanceManager {
    async fn create(
        &self,
        service: &str,
        version: &str,
        group: &str,
    ) -> Result<InstanceId, ManagerError> {
        let body = serde_json::to_vec(&CreateRequest {
            service,
            version,
            group,
        })
        .map_err(|e| ManagerError::Unavailable(e.to_string()))?;

        let request = Request::builder()
            .method(Method::POST)
            .uri(format!("{}/instances", self.base_url))
            .header("content-type", "application/json")
            .body(Full::new(Bytes::from(body)))
            .map_err(|e| ManagerError::Unavailable(e.to_string()))?;

        let response = self
            .client
            .request(request)
            .await
            .map_err(|e| ManagerError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            warn!(%service, %version, %status, "instance create rejected");
            return Err(ManagerError::Unavailable(format!(
                "create returned {status}"
            )));
        }

        let bytes = response
            .into_body()
            .collect()
            .await
            .map_err(|e| ManagerError::Unavailable(e.to_string()))?
            .to_bytes();
        let created: CreateResponse = serde_json::from_slice(&bytes)
            .map_err(|e| ManagerError::Unavailable(e.to_string()))?;

        debug!(%service, instance = %created.id, address = %created.address, "instance created");
        self.addresses
            .lock()
            .expect("address lock")
            .insert(created.id.clone(), created.address);
        Ok(created.id)
    }

    async fn terminate(&self, service: &str, instance: &str) -> Result<(), ManagerError> {
        let request = Request::builder()
            .method(Method::DELETE)
            .uri(format!(
                "{}/services/{service}/instances/{instance}",
                self.base_url
            ))
            .body(Full::new(Bytes::new()))
            .map_err(|e| ManagerError::Unavailable(e.to_string()))?;

        let response = self
            .client
            .request(request)
            .await
            .map_err(|e| ManagerError::Unavailable(e.to_string()))?;

        match response.status() {
            status if status.is_success() => {
                self.addresses.lock().expect("address lock").remove(instance);
                debug!(%service, %instance, "instance terminated");
                Ok(())
            }
            StatusCode::NOT_FOUND => Err(ManagerError::UnknownInstance(instance.to_string())),
            status => Err(ManagerError::Unavailable(format!(
                "terminate returned {status}"
            ))),
        }
    }
}
