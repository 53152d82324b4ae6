//! Process-wide home of live and terminal server instances.
//!
//! One [`ServerInstance`] per `(username, server-name)` key. The registry
//! lock guards only map operations; each instance carries its own
//! transition lock so no registry lock is ever held across I/O.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex as StdMutex, PoisonError},
    time::{Duration, Instant},
};

use tokio::sync::{Mutex, MutexGuard, Semaphore};

use crate::{client::McpClient, error::HubError, protocol::Tool};

/// Identity of one server instance: unique per user, repeatable across users.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct ServerKey {
    pub username: String,
    pub name: String,
}

impl ServerKey {
    pub fn new(username: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ServerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.username, self.name)
    }
}

/// Lifecycle state of a server instance.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ServerStatus {
    #[default]
    Pending,
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

impl ServerStatus {
    /// String form exposed at the HTTP boundary.
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerStatus::Pending => "pending",
            ServerStatus::Starting => "starting",
            ServerStatus::Running => "running",
            ServerStatus::Stopping => "stopping",
            ServerStatus::Stopped => "stopped",
            ServerStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Default)]
struct InstanceShared {
    status: ServerStatus,
    pid: Option<u32>,
    started_at: Option<Instant>,
    tools: Vec<Tool>,
    last_error: Option<String>,
    client: Option<Arc<McpClient>>,
    limiter: Option<Arc<Semaphore>>,
    generation: u64,
}

/// Read-only view of an instance, safe to hand to HTTP handlers.
#[derive(Clone, Debug)]
pub struct InstanceSnapshot {
    pub key: ServerKey,
    pub status: ServerStatus,
    pub pid: Option<u32>,
    pub uptime: Option<Duration>,
    pub tools: Vec<Tool>,
    pub last_error: Option<String>,
}

/// In-memory record for one live or terminal child.
///
/// `transition` serializes start/stop/restart/delete for the key;
/// `shared` holds the snapshot fields behind a short-lived guard so status
/// reads never wait on an in-flight transition.
pub struct ServerInstance {
    key: ServerKey,
    transition: Mutex<()>,
    shared: StdMutex<InstanceShared>,
}

impl ServerInstance {
    fn new(key: ServerKey) -> Arc<Self> {
        Arc::new(Self {
            key,
            transition: Mutex::new(()),
            shared: StdMutex::new(InstanceShared::default()),
        })
    }

    pub fn key(&self) -> &ServerKey {
        &self.key
    }

    /// Acquires the transition lock. Held across spawn/handshake/shutdown.
    pub async fn lock_transition(&self) -> MutexGuard<'_, ()> {
        self.transition.lock().await
    }

    pub fn status(&self) -> ServerStatus {
        self.lock_shared().status
    }

    pub fn snapshot(&self) -> InstanceSnapshot {
        let shared = self.lock_shared();
        InstanceSnapshot {
            key: self.key.clone(),
            status: shared.status,
            pid: shared.pid,
            uptime: shared.started_at.map(|at| at.elapsed()),
            tools: shared.tools.clone(),
            last_error: shared.last_error.clone(),
        }
    }

    /// Client handle plus optional per-child limiter, if the instance is
    /// running. Taken under the short lock; callers then operate on the
    /// client without any instance lock.
    pub fn running_client(&self) -> Result<(Arc<McpClient>, Option<Arc<Semaphore>>), HubError> {
        let shared = self.lock_shared();
        match (&shared.status, &shared.client) {
            (ServerStatus::Running, Some(client)) => {
                Ok((client.clone(), shared.limiter.clone()))
            }
            _ => Err(HubError::ServerNotRunning {
                server: self.key.name.clone(),
                status: shared.status.to_string(),
            }),
        }
    }

    pub(crate) fn begin_starting(&self) {
        let mut shared = self.lock_shared();
        shared.status = ServerStatus::Starting;
        shared.pid = None;
        shared.started_at = None;
        shared.tools.clear();
        shared.last_error = None;
        shared.client = None;
        shared.limiter = None;
    }

    /// Transition into `running`. Returns the new generation, which exit
    /// watchers use to ignore stale children after a restart.
    pub(crate) fn set_running(
        &self,
        client: Arc<McpClient>,
        tools: Vec<Tool>,
        limiter: Option<Arc<Semaphore>>,
    ) -> u64 {
        let mut shared = self.lock_shared();
        shared.status = ServerStatus::Running;
        shared.pid = client.pid();
        shared.started_at = Some(Instant::now());
        shared.tools = tools;
        shared.last_error = None;
        shared.client = Some(client);
        shared.limiter = limiter;
        shared.generation += 1;
        shared.generation
    }

    pub(crate) fn begin_stopping(&self) -> Option<Arc<McpClient>> {
        let mut shared = self.lock_shared();
        shared.status = ServerStatus::Stopping;
        shared.client.take()
    }

    pub(crate) fn set_stopped(&self) {
        let mut shared = self.lock_shared();
        shared.status = ServerStatus::Stopped;
        shared.pid = None;
        shared.started_at = None;
        shared.client = None;
        shared.limiter = None;
    }

    pub(crate) fn set_failed(&self, error: String) {
        let mut shared = self.lock_shared();
        shared.status = ServerStatus::Failed;
        shared.pid = None;
        shared.started_at = None;
        shared.client = None;
        shared.limiter = None;
        shared.last_error = Some(error);
    }

    /// Marks `running → failed` if the given generation is still current.
    pub(crate) fn fail_if_current(&self, generation: u64, error: String) -> bool {
        let mut shared = self.lock_shared();
        if shared.generation != generation || shared.status != ServerStatus::Running {
            return false;
        }
        shared.status = ServerStatus::Failed;
        shared.pid = None;
        shared.started_at = None;
        shared.client = None;
        shared.limiter = None;
        shared.last_error = Some(error);
        true
    }

    /// Atomically replaces the cached tool manifest if the generation is
    /// still current (tools/list_changed rediscovery).
    pub(crate) fn replace_tools_if_current(&self, generation: u64, tools: Vec<Tool>) -> bool {
        let mut shared = self.lock_shared();
        if shared.generation != generation || shared.status != ServerStatus::Running {
            return false;
        }
        shared.tools = tools;
        true
    }

    fn lock_shared(&self) -> std::sync::MutexGuard<'_, InstanceShared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Single source of truth for live servers, keyed by [`ServerKey`].
#[derive(Default)]
pub struct ServerRegistry {
    inner: StdMutex<HashMap<ServerKey, Arc<ServerInstance>>>,
}

impl ServerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &ServerKey) -> Option<Arc<ServerInstance>> {
        self.lock_map().get(key).cloned()
    }

    /// Inserts a fresh `pending` instance unless the key is already present.
    /// Returns the instance either way; at most one exists per key.
    pub fn insert_if_absent(&self, key: &ServerKey) -> Arc<ServerInstance> {
        let mut map = self.lock_map();
        map.entry(key.clone())
            .or_insert_with(|| ServerInstance::new(key.clone()))
            .clone()
    }

    pub fn remove(&self, key: &ServerKey) -> Option<Arc<ServerInstance>> {
        self.lock_map().remove(key)
    }

    /// True while `instance` is still the registry's entry for its key.
    /// Transitions check this after taking the instance lock so an operation
    /// that lost a race with `delete` cannot resurrect a removed server.
    pub fn is_current(&self, instance: &Arc<ServerInstance>) -> bool {
        self.lock_map()
            .get(instance.key())
            .is_some_and(|current| Arc::ptr_eq(current, instance))
    }

    pub fn list_by_user(&self, username: &str) -> Vec<Arc<ServerInstance>> {
        let mut instances: Vec<_> = self
            .lock_map()
            .values()
            .filter(|instance| instance.key().username == username)
            .cloned()
            .collect();
        instances.sort_by(|a, b| a.key().name.cmp(&b.key().name));
        instances
    }

    pub fn list_all(&self) -> Vec<Arc<ServerInstance>> {
        let mut instances: Vec<_> = self.lock_map().values().cloned().collect();
        instances.sort_by(|a, b| a.key().cmp(b.key()));
        instances
    }

    fn lock_map(&self) -> std::sync::MutexGuard<'_, HashMap<ServerKey, Arc<ServerInstance>>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
