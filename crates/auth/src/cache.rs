//! Read-optimized projection of the grant table.
//!
//! Readers take a shared lock just long enough to clone an `Arc` of the
//! current snapshot; refresh builds a complete new snapshot off-lock and
//! swaps it in under the exclusive lock. Readers therefore observe either
//! the empty pre-initialization state or one complete snapshot, never a
//! partially rebuilt one.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::Mutex;
use tracing::info;

use crate::permissions::default_grants;
use crate::store::PermissionStore;
use crate::{Action, AuthError, Module, PermissionEntry, Role};

/// role → module → granted actions
#[derive(Debug, Default)]
struct Snapshot {
    roles: HashMap<String, HashMap<Module, HashSet<Action>>>,
}

impl Snapshot {
    fn build(grants: Vec<PermissionEntry>) -> Self {
        let mut roles: HashMap<String, HashMap<Module, HashSet<Action>>> = HashMap::new();
        for grant in grants {
            roles
                .entry(grant.role.as_str().to_string())
                .or_default()
                .entry(grant.module)
                .or_default()
                .insert(grant.action);
        }
        Self { roles }
    }
}

pub struct PermissionCache {
    store: Arc<dyn PermissionStore>,
    snapshot: RwLock<Arc<Snapshot>>,
    // Serializes refreshes against each other; readers never wait on it.
    refresh_gate: Mutex<()>,
}

impl PermissionCache {
    pub fn new(store: Arc<dyn PermissionStore>) -> Self {
        Self {
            store,
            snapshot: RwLock::new(Arc::new(Snapshot::default())),
            refresh_gate: Mutex::new(()),
        }
    }

    fn current(&self) -> Arc<Snapshot> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Seed the default roles into an empty grant table, then load.
    pub async fn initialize(&self) -> Result<(), AuthError> {
        if self.store.count_grants().await? == 0 {
            let grants = default_grants();
            info!(grants = grants.len(), "seeding default role grants");
            self.store.seed_grants(grants).await?;
        }
        self.refresh().await
    }

    /// Reload the entire grant table and atomically replace the snapshot.
    pub async fn refresh(&self) -> Result<(), AuthError> {
        let _gate = self.refresh_gate.lock().await;
        let grants = self.store.load_grants().await?;
        let count = grants.len();
        let next = Arc::new(Snapshot::build(grants));

        *self
            .snapshot
            .write()
            .unwrap_or_else(PoisonError::into_inner) = next;

        info!(grants = count, "permission cache refreshed");
        Ok(())
    }

    pub fn has_permission(&self, role: &str, module: Module, action: Action) -> bool {
        self.current()
            .roles
            .get(role)
            .and_then(|modules| modules.get(&module))
            .is_some_and(|actions| actions.contains(&action))
    }

    /// Every grant held by `role`, ordered by module then action.
    pub fn role_permissions(&self, role: &str) -> Vec<PermissionEntry> {
        let snapshot = self.current();
        let Some(modules) = snapshot.roles.get(role) else {
            return Vec::new();
        };
        let role = Role::from(role);
        let mut grants: Vec<PermissionEntry> = modules
            .iter()
            .flat_map(|(module, actions)| {
                actions
                    .iter()
                    .map(|action| PermissionEntry::new(role.clone(), *module, *action))
            })
            .collect();
        grants.sort();
        grants
    }

    /// Roles present in the current snapshot, sorted.
    pub fn roles(&self) -> Vec<Role> {
        let mut roles: Vec<Role> = self.current().roles.keys().map(|r| Role::from(r.as_str())).collect();
        roles.sort();
        roles
    }

    /// Replace a role's entire grant set, then refresh.
    ///
    /// The role field of each supplied grant is overwritten with `role`.
    pub async fn set_role_permissions(
        &self,
        role: &Role,
        grants: impl IntoIterator<Item = (Module, Action)>,
    ) -> Result<(), AuthError> {
        let mut entries: Vec<PermissionEntry> = grants
            .into_iter()
            .map(|(module, action)| PermissionEntry::new(role.clone(), module, action))
            .collect();
        entries.sort();
        entries.dedup();

        self.store.replace_role_grants(role, entries).await?;
        self.refresh().await
    }
}
