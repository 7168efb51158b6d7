//! Lookup of the deployment's session components
//!
//! Application code asks for "the container registered for namespace X"
//! and "the client id manager". Several namespaces may share one
//! container; each still gets its own key space inside every entry. The
//! container registered under the empty name answers for namespaces that
//! have no container of their own.

use crate::clock::{Clock, SystemClock};
use crate::config::SessionConfig;
use crate::container::SessionDataContainer;
use crate::error::{Result, SessionError};
use crate::id::ClientIdManager;
use crate::store::memory::MemorySessionStore;
use crate::store::SessionStore;
use std::collections::HashMap;
use std::sync::Arc;

/// Name of the fallback container
pub const DEFAULT_CONTAINER: &str = "";

/// Namespace -> container bindings plus the client id manager
#[derive(Debug)]
pub struct SessionRegistry {
    id_manager: ClientIdManager,
    containers: HashMap<String, Arc<SessionDataContainer>>,
}

impl SessionRegistry {
    /// Create a registry with no containers
    pub fn new(id_manager: ClientIdManager) -> Self {
        tracing::info!(cookie = %id_manager.namespace(), "Client id manager registered");
        Self {
            id_manager,
            containers: HashMap::new(),
        }
    }

    /// Build every component described by a configuration
    ///
    /// `open_store` is called once per configured container name and must
    /// return a store not shared with any other container.
    pub fn from_config<F>(
        config: &SessionConfig,
        clock: Arc<dyn Clock>,
        mut open_store: F,
    ) -> Result<Self>
    where
        F: FnMut(&str) -> Result<Arc<dyn SessionStore>>,
    {
        config.validate()?;
        let id_manager = ClientIdManager::with_clock(config.client_id.clone(), clock.clone())?;
        let mut registry = Self::new(id_manager);

        for (name, container_config) in &config.containers {
            let store = open_store(name)?;
            let container = SessionDataContainer::with_clock(
                name.clone(),
                container_config.clone(),
                store,
                clock.clone(),
            )?;
            registry.register(name.clone(), Arc::new(container));
        }
        Ok(registry)
    }

    /// Build from a configuration with in-memory stores and the system clock
    pub fn in_memory(config: &SessionConfig) -> Result<Self> {
        Self::from_config(config, Arc::new(SystemClock), |_| {
            let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
            Ok(store)
        })
    }

    /// Bind a namespace to a container, returning the previous binding
    pub fn register(
        &mut self,
        namespace: impl Into<String>,
        container: Arc<SessionDataContainer>,
    ) -> Option<Arc<SessionDataContainer>> {
        let namespace = namespace.into();
        tracing::info!(
            namespace = %namespace,
            container = %container.name(),
            "Session data container registered"
        );
        self.containers.insert(namespace, container)
    }

    /// Remove a namespace binding
    pub fn unregister(&mut self, namespace: &str) -> Option<Arc<SessionDataContainer>> {
        self.containers.remove(namespace)
    }

    /// Container serving `namespace`, falling back to the default container
    pub fn container(&self, namespace: &str) -> Result<&Arc<SessionDataContainer>> {
        self.containers
            .get(namespace)
            .or_else(|| self.containers.get(DEFAULT_CONTAINER))
            .ok_or_else(|| SessionError::NotRegistered(namespace.to_string()))
    }

    /// The deployment's client id manager
    pub fn id_manager(&self) -> &ClientIdManager {
        &self.id_manager
    }

    /// Registered namespace names, sorted
    pub fn namespaces(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.containers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
