//! vSphere VI/JSON HTTP client with session-based authentication.
//!
//! Talks to vCenter / ESXi via `https://{host}:{port}/sdk/vim25/{release}/...`.
//! Property reads are `GET {Type}/{moId}/{property}`, method calls are
//! `POST {Type}/{moId}/{Method}` with a JSON body of named arguments.

use crate::error::{VsphereError, VsphereResult};
use crate::inventory::Inventory;
use crate::types::*;
use crate::wire;

use log::{debug, warn};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

const SESSION_HEADER: &str = "vmware-api-session-id";

/// Entry points of the inventory tree, read once per session.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServiceContent {
    root_folder: ManagedObjectRef,
    view_manager: ManagedObjectRef,
    #[serde(default)]
    session_manager: Option<ManagedObjectRef>,
}

/// VI/JSON API client.
pub struct VsphereClient {
    client: Client,
    base_url: String,
    session_id: Option<String>,
    content: Option<ServiceContent>,
    config: VsphereConfig,
}

impl VsphereClient {
    /// Build a new client from config (does NOT create a session yet).
    pub fn new(config: &VsphereConfig) -> VsphereResult<Self> {
        if config.host.trim().is_empty() {
            return Err(VsphereError::connection("No vSphere host configured"));
        }

        let client = Client::builder()
            .danger_accept_invalid_certs(config.insecure)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| VsphereError::connection(format!("Failed to build HTTP client: {e}")))?;

        let base = format!(
            "https://{}:{}/sdk/vim25/{}",
            config.host, config.port, config.api_release
        );
        let base_url = url::Url::parse(&base)
            .map_err(|e| VsphereError::connection(format!("Invalid endpoint {base}: {e}")))?
            .to_string()
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            client,
            base_url,
            session_id: None,
            content: None,
            config: config.clone(),
        })
    }

    /// Build a client and log in.
    pub async fn connect(config: &VsphereConfig) -> VsphereResult<Self> {
        let mut client = Self::new(config)?;
        client.login().await?;
        Ok(client)
    }

    /// Base URL for API calls.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Whether we have an active session.
    pub fn is_connected(&self) -> bool {
        self.session_id.is_some()
    }

    /// Current session ID (if any).
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Current config.
    pub fn config(&self) -> &VsphereConfig {
        &self.config
    }

    // ── Session management ──────────────────────────────────────────

    /// Log in through the session manager and read the service content.
    pub async fn login(&mut self) -> VsphereResult<VsphereSession> {
        let url = format!("{}/SessionManager/SessionManager/Login", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&json!({
                "userName": self.config.username,
                "password": self.config.password,
            }))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let message = wire::fault_message(&body);
            if status == StatusCode::UNAUTHORIZED || message.starts_with("InvalidLogin") {
                return Err(VsphereError::auth(format!(
                    "Login to {} as {} rejected: {message}",
                    self.config.host, self.config.username
                )));
            }
            return Err(VsphereError::api(status.as_u16(), format!("Login failed: {message}")));
        }

        let session_id = resp
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| VsphereError::auth(format!("Login response carried no {SESSION_HEADER} header")))?;
        self.open_session(session_id.clone()).await?;

        debug!("vSphere session opened on {} as {}", self.config.host, self.config.username);
        Ok(VsphereSession {
            host: self.config.host.clone(),
            username: self.config.username.clone(),
            session_id,
            connected_at: chrono::Utc::now().to_rfc3339(),
        })
    }

    /// Adopt `session_id` and load the service content through it. When the
    /// content cannot be read the session is logged out again before the
    /// error is returned.
    async fn open_session(&mut self, session_id: String) -> VsphereResult<()> {
        self.session_id = Some(session_id);
        let read = self
            .get_property::<ServiceContent>(
                &ManagedObjectRef::new("ServiceInstance", "ServiceInstance"),
                "content",
            )
            .await;
        match read {
            Ok(content) => {
                self.content = Some(content);
                Ok(())
            }
            Err(e) => {
                warn!("Reading service content from {} failed, closing session: {e}", self.config.host);
                self.logout().await;
                Err(e)
            }
        }
    }

    /// Log out. Failures are logged, never returned.
    pub async fn logout(&mut self) {
        if self.session_id.is_some() {
            let session_manager = self
                .content
                .as_ref()
                .and_then(|c| c.session_manager.clone())
                .unwrap_or_else(|| ManagedObjectRef::new("SessionManager", "SessionManager"));
            if let Err(e) = self.invoke_void(&session_manager, "Logout", &json!({})).await {
                warn!("vSphere logout from {} failed: {e}", self.config.host);
            } else {
                debug!("vSphere session on {} closed", self.config.host);
            }
        }
        self.session_id = None;
        self.content = None;
    }

    // ── HTTP helpers ────────────────────────────────────────────────

    fn require_session(&self) -> VsphereResult<&str> {
        self.session_id
            .as_deref()
            .ok_or_else(|| VsphereError::auth("Not logged in, no active session"))
    }

    fn require_content(&self) -> VsphereResult<&ServiceContent> {
        self.content
            .as_ref()
            .ok_or_else(|| VsphereError::auth("Not logged in, service content not loaded"))
    }

    fn object_url(&self, obj: &ManagedObjectRef, member: &str) -> String {
        format!("{}/{}/{}/{}", self.base_url, obj.kind, obj.value, member)
    }

    /// GET a property of a managed object.
    pub async fn get_property<T: DeserializeOwned>(
        &self,
        obj: &ManagedObjectRef,
        property: &str,
    ) -> VsphereResult<T> {
        let sid = self.require_session()?;
        let resp = self
            .client
            .get(self.object_url(obj, property))
            .header(SESSION_HEADER, sid)
            .send()
            .await?;
        let resp = Self::check_status(resp).await?;
        Self::parse_response(resp).await
    }

    /// POST a method invocation, return the parsed result.
    pub async fn invoke<T: DeserializeOwned>(
        &self,
        obj: &ManagedObjectRef,
        method: &str,
        args: &Value,
    ) -> VsphereResult<T> {
        let resp = self.invoke_raw(obj, method, args).await?;
        Self::parse_response(resp).await
    }

    /// POST a method invocation whose result is void.
    pub async fn invoke_void(
        &self,
        obj: &ManagedObjectRef,
        method: &str,
        args: &Value,
    ) -> VsphereResult<()> {
        self.invoke_raw(obj, method, args).await?;
        Ok(())
    }

    async fn invoke_raw(
        &self,
        obj: &ManagedObjectRef,
        method: &str,
        args: &Value,
    ) -> VsphereResult<Response> {
        let sid = self.require_session()?;
        let resp = self
            .client
            .post(self.object_url(obj, method))
            .header(SESSION_HEADER, sid)
            .json(args)
            .send()
            .await?;
        Self::check_status(resp).await
    }

    // ── Internal helpers ────────────────────────────────────────────

    async fn check_status(resp: Response) -> VsphereResult<Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let code = status.as_u16();
        let body = resp.text().await.unwrap_or_default();
        let message = wire::fault_message(&body);

        if message.starts_with("ManagedObjectNotFound") {
            return Err(VsphereError::object_not_found(message));
        }
        if message.starts_with("NotAuthenticated") {
            return Err(VsphereError::auth(format!("Session expired or invalid: {message}")));
        }
        match status {
            StatusCode::UNAUTHORIZED => Err(VsphereError::auth(format!("Session expired or invalid: {message}"))),
            StatusCode::NOT_FOUND => Err(VsphereError::object_not_found(message)),
            _ => Err(VsphereError::api(code, message)),
        }
    }

    async fn parse_response<T: DeserializeOwned>(resp: Response) -> VsphereResult<T> {
        let text = resp.text().await.map_err(|e| {
            VsphereError::parse(format!("Failed to read response body: {e}"))
        })?;

        if text.is_empty() {
            // Void methods and unset properties come back with no body
            return serde_json::from_str("null").map_err(|e| {
                VsphereError::parse(format!("Cannot deserialise empty response: {e}"))
            });
        }

        serde_json::from_str(&text).map_err(|e| {
            let head: String = text.chars().take(500).collect();
            VsphereError::parse(format!("JSON parse error: {e}, body: {head}"))
        })
    }
}

#[async_trait::async_trait]
impl Inventory for VsphereClient {
    async fn list(
        &self,
        kind: InventoryKind,
        root: Option<&ManagedObjectRef>,
    ) -> VsphereResult<Vec<ManagedObjectRef>> {
        let content = self.require_content()?;
        let container = root.unwrap_or(&content.root_folder);
        let view: ManagedObjectRef = self
            .invoke(
                &content.view_manager,
                "CreateContainerView",
                &json!({
                    "container": wire::moref_to_wire(container),
                    "type": [kind.as_api_str()],
                    "recursive": true,
                }),
            )
            .await?;

        let listed = self.get_property::<Option<Vec<ManagedObjectRef>>>(&view, "view").await;

        // The view must go away whether or not the read worked.
        if let Err(e) = self.invoke_void(&view, "DestroyView", &json!({})).await {
            warn!("Failed to destroy container view {view}: {e}");
        }

        let objects = listed?.unwrap_or_default();
        debug!("Listed {} {kind} object(s) under {container}", objects.len());
        Ok(objects)
    }

    async fn vm_summary(&self, vm: &ManagedObjectRef) -> VsphereResult<VmSummary> {
        let raw: Value = self.get_property(vm, "summary").await?;
        wire::decode_vm_summary(vm, raw)
    }

    async fn vm_config(&self, vm: &ManagedObjectRef) -> VsphereResult<VmConfig> {
        let raw: Value = self.get_property(vm, "config").await?;
        Ok(wire::decode_vm_config(&raw))
    }

    async fn entity_name(&self, obj: &ManagedObjectRef) -> VsphereResult<String> {
        self.get_property(obj, "name").await
    }

    async fn host_mounts(&self, host: &ManagedObjectRef) -> VsphereResult<Vec<HostMount>> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct ConfigManager {
            #[serde(default)]
            storage_system: Option<ManagedObjectRef>,
        }

        let managers: ConfigManager = self.get_property(host, "configManager").await?;
        let Some(storage) = managers.storage_system else {
            debug!("Host {host} exposes no storage system");
            return Ok(Vec::new());
        };
        let raw: Value = self.get_property(&storage, "fileSystemVolumeInfo").await?;
        Ok(wire::decode_mounts(&raw))
    }

    async fn reconfigure(
        &self,
        vm: &ManagedObjectRef,
        spec: &VmConfigSpec,
    ) -> VsphereResult<TaskRef> {
        let body = json!({ "spec": wire::encode_config_spec(spec)? });
        self.invoke(vm, "ReconfigVM_Task", &body).await
    }

    async fn power(&self, vm: &ManagedObjectRef, op: PowerOp) -> VsphereResult<TaskRef> {
        self.invoke(vm, op.method_name(), &json!({})).await
    }

    async fn task_info(&self, task: &TaskRef) -> VsphereResult<TaskInfo> {
        let raw: Value = self.get_property(task, "info").await?;
        wire::decode_task_info(task, &raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> VsphereConfig {
        VsphereConfig {
            host: "vcenter.lab.local".into(),
            username: "administrator@vsphere.local".into(),
            password: "secret".into(),
            ..Default::default()
        }
    }

    #[test]
    fn base_url_includes_release() {
        let client = VsphereClient::new(&config()).unwrap();
        assert_eq!(client.base_url(), "https://vcenter.lab.local/sdk/vim25/8.0.1.0");
        assert!(!client.is_connected());
    }

    #[test]
    fn non_default_port_is_kept() {
        let mut cfg = config();
        cfg.port = 8443;
        let client = VsphereClient::new(&cfg).unwrap();
        assert_eq!(client.base_url(), "https://vcenter.lab.local:8443/sdk/vim25/8.0.1.0");
    }

    #[test]
    fn empty_host_is_a_connection_error() {
        let cfg = VsphereConfig::default();
        assert!(matches!(VsphereClient::new(&cfg), Err(VsphereError::Connection(_))));
    }

    #[test]
    fn object_urls_follow_type_and_id() {
        let client = VsphereClient::new(&config()).unwrap();
        let vm = ManagedObjectRef::new("VirtualMachine", "vm-42");
        assert_eq!(
            client.object_url(&vm, "ReconfigVM_Task"),
            "https://vcenter.lab.local/sdk/vim25/8.0.1.0/VirtualMachine/vm-42/ReconfigVM_Task"
        );
    }

    #[tokio::test]
    async fn failed_content_read_drops_the_session() {
        let mut cfg = config();
        cfg.host = "127.0.0.1".into();
        cfg.port = 9;
        cfg.timeout_secs = 1;
        let mut client = VsphereClient::new(&cfg).unwrap();

        let err = client.open_session("52f1c0de-session".into()).await.unwrap_err();
        assert!(matches!(err, VsphereError::Connection(_) | VsphereError::Timeout(_)));
        assert!(client.session_id().is_none());
        assert!(!client.is_connected());
        assert!(client.require_content().is_err());
    }

    #[tokio::test]
    async fn calls_without_session_fail_fast() {
        let client = VsphereClient::new(&config()).unwrap();
        let err = client
            .list(InventoryKind::VirtualMachine, None)
            .await
            .unwrap_err();
        assert!(matches!(err, VsphereError::Authentication(_)));
    }
}
