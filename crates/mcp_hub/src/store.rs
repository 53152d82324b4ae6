//! Per-user configuration store.
//!
//! One JSON document per user under a root directory. Writes are
//! last-writer-wins; reads observe the last committed write immediately
//! because the committed view lives in memory and files are only a
//! persistence mirror. The live registry, not this store, is authoritative
//! for process state.

use std::{
    collections::BTreeMap,
    path::PathBuf,
    sync::{Mutex as StdMutex, PoisonError},
};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::fs;
use tracing::warn;

use crate::error::HubError;

/// User-supplied launch specification for one MCP server.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerSpec {
    pub command: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub disabled: bool,
}

impl ServerSpec {
    /// Rejects specs the supervisor must never try to launch.
    pub fn validate(&self) -> Result<(), HubError> {
        if self.command.trim().is_empty() {
            return Err(HubError::BadRequest(
                "server command must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Access group for a user account.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UserGroup {
    #[default]
    Users,
    Admins,
}

impl UserGroup {
    pub fn is_admin(&self) -> bool {
        matches!(self, UserGroup::Admins)
    }
}

/// Persisted per-user document.
///
/// Credentials and API keys are opaque to the supervisor; the auth
/// collaborator owns their issuance and hashing.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserConfig {
    pub username: String,
    #[serde(default)]
    pub hashed_password: String,
    #[serde(default)]
    pub group: UserGroup,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub api_keys: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(default, rename = "mcpServers", skip_serializing_if = "BTreeMap::is_empty")]
    pub mcp_servers: BTreeMap<String, ServerSpec>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub preferences: serde_json::Map<String, Value>,
}

impl UserConfig {
    /// A minimal enabled account in the `users` group.
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            hashed_password: String::new(),
            group: UserGroup::default(),
            disabled: false,
            api_keys: Vec::new(),
            env: BTreeMap::new(),
            mcp_servers: BTreeMap::new(),
            preferences: serde_json::Map::new(),
        }
    }
}

/// Mutation applied to an environment map (server-level or user-level).
#[derive(Clone, Debug)]
pub enum EnvUpdate {
    Replace(BTreeMap<String, String>),
    Set { key: String, value: String },
    RemoveKey(String),
    Clear,
}

impl EnvUpdate {
    fn apply(self, env: &mut BTreeMap<String, String>) {
        match self {
            EnvUpdate::Replace(map) => *env = map,
            EnvUpdate::Set { key, value } => {
                env.insert(key, value);
            }
            EnvUpdate::RemoveKey(key) => {
                env.remove(&key);
            }
            EnvUpdate::Clear => env.clear(),
        }
    }
}

/// Opaque key/value repository of user documents, keyed by username.
pub struct ConfigStore {
    root: PathBuf,
    users: StdMutex<BTreeMap<String, UserConfig>>,
}

impl ConfigStore {
    /// Opens the store rooted at `root`, loading every `<user>.json`.
    ///
    /// Unreadable documents are skipped with a warning; a broken file must
    /// not keep the whole gateway from starting.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, HubError> {
        let root = root.into();
        fs::create_dir_all(&root)
            .await
            .map_err(|source| HubError::StoreWrite {
                username: root.display().to_string(),
                source,
            })?;

        let mut users = BTreeMap::new();
        let mut entries = fs::read_dir(&root)
            .await
            .map_err(|source| HubError::StoreRead {
                username: root.display().to_string(),
                source,
            })?;

        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            match fs::read_to_string(&path).await {
                Ok(contents) => match serde_json::from_str::<UserConfig>(&contents) {
                    Ok(config) => {
                        users.insert(config.username.clone(), config);
                    }
                    Err(err) => warn!(path = %path.display(), "skipping unreadable user document: {err}"),
                },
                Err(err) => warn!(path = %path.display(), "skipping unreadable user document: {err}"),
            }
        }

        Ok(Self {
            root,
            users: StdMutex::new(users),
        })
    }

    /// Returns the committed document for a user.
    pub fn user(&self, username: &str) -> Option<UserConfig> {
        self.lock_users().get(username).cloned()
    }

    pub fn usernames(&self) -> Vec<String> {
        self.lock_users().keys().cloned().collect()
    }

    /// Resolves an API key to its owning user.
    pub fn find_by_api_key(&self, key: &str) -> Option<UserConfig> {
        if key.is_empty() {
            return None;
        }
        self.lock_users()
            .values()
            .find(|user| user.api_keys.iter().any(|candidate| candidate == key))
            .cloned()
    }

    /// Inserts or replaces a whole user document.
    pub async fn put_user(&self, config: UserConfig) -> Result<(), HubError> {
        validate_username(&config.username)?;
        let username = config.username.clone();
        {
            let mut users = self.lock_users();
            users.insert(username.clone(), config.clone());
        }
        self.persist(&config).await?;
        Ok(())
    }

    /// Removes a user document and its file.
    pub async fn remove_user(&self, username: &str) -> Result<bool, HubError> {
        let removed = self.lock_users().remove(username).is_some();
        if removed {
            let path = self.user_path(username);
            if let Err(source) = fs::remove_file(&path).await {
                if source.kind() != std::io::ErrorKind::NotFound {
                    return Err(HubError::StoreWrite {
                        username: username.to_string(),
                        source,
                    });
                }
            }
        }
        Ok(removed)
    }

    /// Returns one persisted server spec.
    pub fn server_spec(&self, username: &str, name: &str) -> Option<ServerSpec> {
        self.lock_users()
            .get(username)
            .and_then(|user| user.mcp_servers.get(name).cloned())
    }

    /// Returns all persisted server specs for a user.
    pub fn server_specs(&self, username: &str) -> BTreeMap<String, ServerSpec> {
        self.lock_users()
            .get(username)
            .map(|user| user.mcp_servers.clone())
            .unwrap_or_default()
    }

    /// Adds or replaces a server spec in the user document.
    pub async fn upsert_server(
        &self,
        username: &str,
        name: &str,
        spec: ServerSpec,
    ) -> Result<(), HubError> {
        if name.trim().is_empty() {
            return Err(HubError::BadRequest(
                "server name must not be empty".to_string(),
            ));
        }
        spec.validate()?;
        let config = self.mutate(username, |user| {
            user.mcp_servers.insert(name.to_string(), spec);
        })?;
        self.persist(&config).await
    }

    /// Removes a server spec. Returns whether it existed.
    pub async fn remove_server(&self, username: &str, name: &str) -> Result<bool, HubError> {
        let mut removed = false;
        let config = self.mutate(username, |user| {
            removed = user.mcp_servers.remove(name).is_some();
        })?;
        if removed {
            self.persist(&config).await?;
        }
        Ok(removed)
    }

    /// Applies an env mutation to a persisted server spec and returns it.
    pub async fn update_server_env(
        &self,
        username: &str,
        name: &str,
        update: EnvUpdate,
    ) -> Result<ServerSpec, HubError> {
        let mut updated = None;
        let config = self.mutate(username, |user| {
            if let Some(spec) = user.mcp_servers.get_mut(name) {
                update.apply(&mut spec.env);
                updated = Some(spec.clone());
            }
        })?;
        let Some(spec) = updated else {
            return Err(HubError::NotFound(format!("server `{name}`")));
        };
        self.persist(&config).await?;
        Ok(spec)
    }

    /// User-level environment map (layer b of the effective environment).
    pub fn user_env(&self, username: &str) -> BTreeMap<String, String> {
        self.lock_users()
            .get(username)
            .map(|user| user.env.clone())
            .unwrap_or_default()
    }

    /// Applies an env mutation to the user-level map and returns it.
    pub async fn update_user_env(
        &self,
        username: &str,
        update: EnvUpdate,
    ) -> Result<BTreeMap<String, String>, HubError> {
        let config = self.mutate(username, |user| {
            update.apply(&mut user.env);
        })?;
        self.persist(&config).await?;
        Ok(config.env)
    }

    fn mutate(
        &self,
        username: &str,
        apply: impl FnOnce(&mut UserConfig),
    ) -> Result<UserConfig, HubError> {
        let mut users = self.lock_users();
        let Some(user) = users.get_mut(username) else {
            return Err(HubError::NotFound(format!("user `{username}`")));
        };
        apply(user);
        Ok(user.clone())
    }

    async fn persist(&self, config: &UserConfig) -> Result<(), HubError> {
        let path = self.user_path(&config.username);
        let serialized = serde_json::to_vec_pretty(config)?;
        fs::write(&path, serialized)
            .await
            .map_err(|source| HubError::StoreWrite {
                username: config.username.clone(),
                source,
            })
    }

    fn user_path(&self, username: &str) -> PathBuf {
        self.root.join(format!("{username}.json"))
    }

    fn lock_users(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, UserConfig>> {
        self.users.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Usernames double as file names, so the original's shape is enforced.
fn validate_username(username: &str) -> Result<(), HubError> {
    let valid = !username.is_empty()
        && username.len() <= 50
        && username
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(HubError::BadRequest(format!(
            "invalid username `{username}`"
        )))
    }
}
