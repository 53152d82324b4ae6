//! Command surface consumed by the HTTP handlers.
//!
//! Enforces lifecycle transitions per key, resolves the effective child
//! environment, and keeps the persisted configuration consistent with the
//! live registry. All operations are idempotent where that makes sense.

use std::{collections::BTreeMap, env, sync::Arc, time::Duration};

use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::{
    client::McpClient,
    error::HubError,
    process::{ProcessHandle, SpawnOptions},
    protocol::{CallToolResult, ClientInfo, Tool, METHOD_TOOLS_CHANGED},
    registry::{InstanceSnapshot, ServerInstance, ServerKey, ServerRegistry, ServerStatus},
    store::{ConfigStore, EnvUpdate, ServerSpec},
};

/// Ambient variables forwarded into children when present in the
/// supervisor's own environment. Everything else is withheld.
pub const DEFAULT_ENV_ALLOWLIST: &[&str] = &[
    "PATH", "HOME", "USER", "SHELL", "LANG", "LC_ALL", "TMPDIR", "TZ",
];

/// Tunables for the supervisor.
#[derive(Clone, Debug)]
pub struct SupervisorConfig {
    /// Deadline for each handshake step.
    pub handshake_timeout: Duration,
    /// Default deadline for tool calls.
    pub call_timeout: Duration,
    /// Grace period between closing a child's stdin and killing it.
    pub stop_grace: Duration,
    /// Ambient variables eligible for forwarding.
    pub env_allowlist: Vec<String>,
    /// Optional cap on concurrent tool calls per child (FIFO when set).
    pub max_inflight_per_child: Option<usize>,
    /// Extra start attempts after a transient spawn failure.
    pub start_retries: u32,
    /// Client identity sent during `initialize`.
    pub client_info: ClientInfo,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(30),
            call_timeout: Duration::from_secs(120),
            stop_grace: Duration::from_secs(5),
            env_allowlist: DEFAULT_ENV_ALLOWLIST
                .iter()
                .map(|key| key.to_string())
                .collect(),
            max_inflight_per_child: None,
            start_retries: 0,
            client_info: ClientInfo::default(),
        }
    }
}

/// Supervisor for all users' MCP servers.
pub struct Controller {
    registry: ServerRegistry,
    store: Arc<ConfigStore>,
    config: SupervisorConfig,
}

impl Controller {
    pub fn new(store: Arc<ConfigStore>, config: SupervisorConfig) -> Self {
        Self {
            registry: ServerRegistry::new(),
            store,
            config,
        }
    }

    pub fn store(&self) -> &Arc<ConfigStore> {
        &self.store
    }

    /// Create-or-replace a server. An existing live instance for the key is
    /// stopped first; the new spec is persisted, then started unless it is
    /// disabled.
    pub async fn add(
        &self,
        username: &str,
        name: &str,
        spec: ServerSpec,
    ) -> Result<InstanceSnapshot, HubError> {
        spec.validate()?;
        let key = ServerKey::new(username, name);
        let instance = self.registry.insert_if_absent(&key);
        let _guard = instance.lock_transition().await;
        if !self.registry.is_current(&instance) {
            return Err(conflict(name));
        }

        self.stop_locked(&instance).await;
        self.store.upsert_server(username, name, spec.clone()).await?;

        if spec.disabled {
            instance.set_stopped();
            return Ok(instance.snapshot());
        }

        self.start_locked(&instance, &spec).await?;
        Ok(instance.snapshot())
    }

    /// Starts a configured server. No-op if it is already running.
    pub async fn start(&self, username: &str, name: &str) -> Result<InstanceSnapshot, HubError> {
        if self.store.server_spec(username, name).is_none() {
            return Err(HubError::NotFound(format!("server `{name}`")));
        }
        let key = ServerKey::new(username, name);
        let instance = self.registry.insert_if_absent(&key);
        let _guard = instance.lock_transition().await;

        // Re-read under the lock: a concurrent delete may have won the race.
        if !self.registry.is_current(&instance) {
            return Err(conflict(name));
        }
        let Some(spec) = self.store.server_spec(username, name) else {
            return Err(conflict(name));
        };

        if instance.status() == ServerStatus::Running {
            return Ok(instance.snapshot());
        }

        self.start_locked(&instance, &spec).await?;
        Ok(instance.snapshot())
    }

    /// Stops a server. Idempotent: stopping anything not running succeeds.
    pub async fn stop(&self, username: &str, name: &str) -> Result<InstanceSnapshot, HubError> {
        let key = ServerKey::new(username, name);
        let instance = match self.registry.get(&key) {
            Some(instance) => instance,
            None => {
                if self.store.server_spec(username, name).is_none() {
                    return Err(HubError::NotFound(format!("server `{name}`")));
                }
                let instance = self.registry.insert_if_absent(&key);
                let _guard = instance.lock_transition().await;
                if !self.registry.is_current(&instance) {
                    return Err(HubError::NotFound(format!("server `{name}`")));
                }
                if self.store.server_spec(username, name).is_none() {
                    self.registry.remove(&key);
                    return Err(HubError::NotFound(format!("server `{name}`")));
                }
                match instance.status() {
                    // A concurrent start brought the key up while we waited
                    // for the lock; shut the child down properly.
                    ServerStatus::Running => self.stop_locked(&instance).await,
                    // Configured but never started: record the terminal
                    // state so later status reads see `stopped`.
                    ServerStatus::Pending => instance.set_stopped(),
                    _ => {}
                }
                return Ok(instance.snapshot());
            }
        };

        let _guard = instance.lock_transition().await;
        if !self.registry.is_current(&instance) {
            return Err(HubError::NotFound(format!("server `{name}`")));
        }
        self.stop_locked(&instance).await;
        Ok(instance.snapshot())
    }

    /// Stop-then-start without a window in which another start could win.
    pub async fn restart(&self, username: &str, name: &str) -> Result<InstanceSnapshot, HubError> {
        if self.store.server_spec(username, name).is_none() {
            return Err(HubError::NotFound(format!("server `{name}`")));
        }
        let key = ServerKey::new(username, name);
        let instance = self.registry.insert_if_absent(&key);
        let _guard = instance.lock_transition().await;

        if !self.registry.is_current(&instance) {
            return Err(conflict(name));
        }
        let Some(spec) = self.store.server_spec(username, name) else {
            return Err(conflict(name));
        };

        self.stop_locked(&instance).await;
        self.start_locked(&instance, &spec).await?;
        Ok(instance.snapshot())
    }

    /// Stops the server if live, removes it from the registry, and removes
    /// the persisted spec. A config write failure after registry removal
    /// leaves an orphan that the startup reconcile clears.
    pub async fn delete(&self, username: &str, name: &str) -> Result<(), HubError> {
        let key = ServerKey::new(username, name);
        let instance = self.registry.get(&key);
        let configured = self.store.server_spec(username, name).is_some();
        if instance.is_none() && !configured {
            return Err(HubError::NotFound(format!("server `{name}`")));
        }

        if let Some(instance) = instance {
            let _guard = instance.lock_transition().await;
            // A delete+add cycle may have replaced this instance while we
            // waited for the lock; removing by key would erase the new one.
            if !self.registry.is_current(&instance) {
                return Err(conflict(name));
            }
            self.stop_locked(&instance).await;
            self.registry.remove(&key);
        }

        match self.store.remove_server(username, name).await {
            Ok(_) => Ok(()),
            Err(HubError::NotFound(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Writes an env mutation through to the persisted spec. The running
    /// child is left alone; the change applies on the next start.
    pub async fn update_env(
        &self,
        username: &str,
        name: &str,
        update: EnvUpdate,
    ) -> Result<ServerSpec, HubError> {
        self.store.update_server_env(username, name, update).await
    }

    pub fn status(&self, username: &str, name: &str) -> Result<InstanceSnapshot, HubError> {
        self.registry
            .get(&ServerKey::new(username, name))
            .map(|instance| instance.snapshot())
            .ok_or_else(|| HubError::NotFound(format!("server `{name}`")))
    }

    pub fn list(&self, username: &str) -> Vec<InstanceSnapshot> {
        self.registry
            .list_by_user(username)
            .iter()
            .map(|instance| instance.snapshot())
            .collect()
    }

    pub fn list_all(&self) -> Vec<InstanceSnapshot> {
        self.registry
            .list_all()
            .iter()
            .map(|instance| instance.snapshot())
            .collect()
    }

    /// Proxies one tool invocation to a running server.
    ///
    /// Takes no instance lock: the client is snapshotted under the short
    /// shared guard and calls to the same child run concurrently,
    /// demultiplexed by request id.
    pub async fn call_tool(
        &self,
        username: &str,
        server: &str,
        tool: &str,
        arguments: Value,
        deadline: Option<Duration>,
    ) -> Result<CallToolResult, HubError> {
        let key = ServerKey::new(username, server);
        let instance = self
            .registry
            .get(&key)
            .ok_or_else(|| HubError::NotFound(format!("server `{server}`")))?;
        let (client, limiter) = instance.running_client()?;

        let _permit = match limiter {
            Some(semaphore) => Some(
                semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| HubError::ChildGone)?,
            ),
            None => None,
        };

        client
            .call_tool(tool, arguments, deadline.unwrap_or(self.config.call_timeout))
            .await
    }

    /// Startup reconciliation: start every enabled persisted spec, then
    /// drop registry entries whose spec no longer exists.
    pub async fn reconcile(&self) {
        for username in self.store.usernames() {
            for (name, spec) in self.store.server_specs(&username) {
                if spec.disabled {
                    continue;
                }
                if let Err(err) = self.start(&username, &name).await {
                    warn!(user = %username, server = %name, "reconcile could not start server: {err}");
                }
            }
        }

        for instance in self.registry.list_all() {
            let key = instance.key().clone();
            if self.store.server_spec(&key.username, &key.name).is_none() {
                warn!(%key, "removing orphaned instance with no persisted spec");
                let _guard = instance.lock_transition().await;
                self.stop_locked(&instance).await;
                self.registry.remove(&key);
            }
        }
    }

    async fn start_locked(
        &self,
        instance: &Arc<ServerInstance>,
        spec: &ServerSpec,
    ) -> Result<(), HubError> {
        let key = instance.key().clone();
        instance.begin_starting();

        let options = SpawnOptions {
            command: spec.command.clone(),
            args: spec.args.clone(),
            env: self.effective_env(&key.username, spec),
            cwd: None,
        };

        let mut attempt = 0;
        let connected = loop {
            match self.spawn_and_handshake(&key, options.clone()).await {
                Ok(connected) => break Ok(connected),
                Err(err) => {
                    let transient = matches!(err, HubError::Spawn { .. });
                    if transient && attempt < self.config.start_retries {
                        attempt += 1;
                        warn!(%key, "retrying after spawn failure: {err}");
                        continue;
                    }
                    break Err(err);
                }
            }
        };

        match connected {
            Ok((client, tools)) => {
                let client = Arc::new(client);
                let limiter = self
                    .config
                    .max_inflight_per_child
                    .map(|permits| Arc::new(Semaphore::new(permits)));
                let generation = instance.set_running(client.clone(), tools, limiter);
                spawn_exit_watcher(instance.clone(), client.clone(), generation);
                spawn_rediscovery(
                    instance.clone(),
                    client,
                    generation,
                    self.config.handshake_timeout,
                )
                .await;
                info!(%key, "server running");
                Ok(())
            }
            Err(err) => {
                instance.set_failed(err.to_string());
                warn!(%key, "start failed: {err}");
                Err(err)
            }
        }
    }

    async fn spawn_and_handshake(
        &self,
        key: &ServerKey,
        options: SpawnOptions,
    ) -> Result<(McpClient, Vec<Tool>), HubError> {
        let handle = ProcessHandle::spawn(options).await?;
        McpClient::connect(
            &key.name,
            handle,
            self.config.client_info.clone(),
            self.config.handshake_timeout,
        )
        .await
    }

    async fn stop_locked(&self, instance: &ServerInstance) {
        if instance.status() != ServerStatus::Running {
            return;
        }
        if let Some(client) = instance.begin_stopping() {
            let _ = client.shutdown(self.config.stop_grace).await;
        }
        instance.set_stopped();
        debug!(key = %instance.key(), "server stopped");
    }

    fn effective_env(&self, username: &str, spec: &ServerSpec) -> BTreeMap<String, String> {
        merge_env(
            ambient_env(&self.config.env_allowlist),
            self.store.user_env(username),
            spec.env.clone(),
        )
    }
}

fn conflict(name: &str) -> HubError {
    HubError::Conflict(format!(
        "server `{name}` changed concurrently; retry the operation"
    ))
}

/// Launch environment layering: filtered ambient ≺ user env ≺ spec env.
pub(crate) fn merge_env(
    ambient: BTreeMap<String, String>,
    user: BTreeMap<String, String>,
    spec: BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut merged = ambient;
    merged.extend(user);
    merged.extend(spec);
    merged
}

pub(crate) fn ambient_env(allowlist: &[String]) -> BTreeMap<String, String> {
    allowlist
        .iter()
        .filter_map(|key| env::var(key).ok().map(|value| (key.clone(), value)))
        .collect()
}

fn spawn_exit_watcher(instance: Arc<ServerInstance>, client: Arc<McpClient>, generation: u64) {
    tokio::spawn(async move {
        let mut exited = client.exited();
        let status = loop {
            if let Some(status) = *exited.borrow() {
                break Some(status);
            }
            if exited.changed().await.is_err() {
                break None;
            }
        };

        let reason = match status {
            Some(status) => format!("process exited unexpectedly ({status})"),
            None => "process exited unexpectedly".to_string(),
        };

        // Linearize against any in-flight transition for this key.
        let _guard = instance.lock_transition().await;
        if instance.fail_if_current(generation, reason) {
            warn!(key = %instance.key(), "server failed");
        }
    });
}

/// Listens for `notifications/tools/list_changed` and refreshes the cached
/// manifest atomically.
async fn spawn_rediscovery(
    instance: Arc<ServerInstance>,
    client: Arc<McpClient>,
    generation: u64,
    deadline: Duration,
) {
    let Some(mut notifications) = client.take_notifications().await else {
        return;
    };

    tokio::spawn(async move {
        while let Some(notification) = notifications.recv().await {
            if notification.method != METHOD_TOOLS_CHANGED {
                continue;
            }
            match client.list_tools(deadline).await {
                Ok(tools) => {
                    if !instance.replace_tools_if_current(generation, tools) {
                        break;
                    }
                }
                Err(err) => {
                    debug!(key = %instance.key(), "tool rediscovery failed: {err}");
                    break;
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn env_layers_override_in_order() {
        let merged = merge_env(
            map(&[("PATH", "/usr/bin"), ("HOME", "/root"), ("LANG", "C")]),
            map(&[("HOME", "/home/donald"), ("API_TOKEN", "user-level")]),
            map(&[("API_TOKEN", "spec-level"), ("MODE", "scientific")]),
        );

        assert_eq!(merged["PATH"], "/usr/bin");
        assert_eq!(merged["HOME"], "/home/donald");
        assert_eq!(merged["API_TOKEN"], "spec-level");
        assert_eq!(merged["MODE"], "scientific");
        assert_eq!(merged["LANG"], "C");
    }

    #[test]
    fn ambient_env_only_passes_the_allowlist() {
        env::set_var("MCP_HUB_TEST_SECRET", "do-not-forward");
        let ambient = ambient_env(&["PATH".to_string()]);
        assert!(ambient.contains_key("PATH"));
        assert!(!ambient.contains_key("MCP_HUB_TEST_SECRET"));
    }
}
