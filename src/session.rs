//! Per-request session facade
//!
//! A `Session` holds only the authenticated client id of one request.
//! Indexing it by namespace goes through the registry to the container
//! bound to that namespace.

use crate::container::{SessionDataContainer, SessionHandle};
use crate::error::Result;
use crate::http::CookieTransport;
use crate::id::ClientId;
use crate::registry::SessionRegistry;
use crate::transaction::Transaction;

/// Client id of one request, bound to the registered containers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    client_id: ClientId,
}

impl Session {
    /// Resolve or mint the request's client id and stage its cookie
    ///
    /// Building a second `Session` from the same request yields the same
    /// id, since the first one staged it on the response.
    pub fn new<R: CookieTransport + ?Sized>(registry: &SessionRegistry, request: &mut R) -> Self {
        Self {
            client_id: registry.id_manager().issue(request),
        }
    }

    /// Bind an id that was already authenticated
    pub fn from_client_id(client_id: ClientId) -> Self {
        Self { client_id }
    }

    /// The bound client id
    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    /// Data of `namespace` for this client, created on demand
    pub fn get<'t>(
        &self,
        registry: &SessionRegistry,
        tx: &'t mut Transaction<'_>,
        namespace: &str,
    ) -> Result<SessionHandle<'t>> {
        let container = registry.container(namespace)?;
        self.get_in(container, tx, namespace)
    }

    /// Data of `namespace` held by an explicitly chosen container
    pub fn get_in<'t>(
        &self,
        container: &SessionDataContainer,
        tx: &'t mut Transaction<'_>,
        namespace: &str,
    ) -> Result<SessionHandle<'t>> {
        container.get(tx, self.client_id.as_str(), namespace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ContainerConfig;
    use crate::data::SessionMap;
    use crate::error::SessionError;
    use crate::http::CookieExchange;
    use crate::id::ClientIdManager;
    use crate::registry::DEFAULT_CONTAINER;
    use crate::worker::WorkerCache;
    use serde_json::json;
    use std::sync::Arc;

    fn registry() -> SessionRegistry {
        let mut registry = SessionRegistry::new(ClientIdManager::generate().unwrap());
        let container =
            Arc::new(SessionDataContainer::in_memory("default", ContainerConfig::new()).unwrap());
        registry.register(DEFAULT_CONTAINER, container);
        registry
    }

    #[test]
    fn test_sessions_from_same_request_share_id() {
        let registry = registry();
        let mut request = CookieExchange::new();

        let first = Session::new(&registry, &mut request);
        let second = Session::new(&registry, &mut request);
        assert_eq!(first, second);
        assert_eq!(request.set_cookie_headers().len(), 1);
    }

    #[test]
    fn test_sessions_from_same_request_see_same_data() {
        let registry = registry();
        let mut request = CookieExchange::new();
        let first = Session::new(&registry, &mut request);
        let second = Session::new(&registry, &mut request);

        let mut worker = WorkerCache::new();
        let mut tx = worker.begin();
        first
            .get(&registry, &mut tx, "products.foo")
            .unwrap()
            .set("color", "red")
            .unwrap();
        let data = second.get(&registry, &mut tx, "products.foo").unwrap();
        assert_eq!(data.get("color").unwrap(), &json!("red"));
    }

    #[test]
    fn test_data_follows_cookie_to_next_request() {
        let registry = registry();
        let mut worker = WorkerCache::new();

        let mut request = CookieExchange::new();
        let session = Session::new(&registry, &mut request);
        let mut tx = worker.begin();
        session
            .get(&registry, &mut tx, "products.foo")
            .unwrap()
            .set("count", 1)
            .unwrap();
        tx.commit().unwrap();

        let mut next = request.replay();
        let resumed = Session::new(&registry, &mut next);
        assert_eq!(resumed.client_id(), session.client_id());

        let mut tx = worker.begin();
        let data = resumed.get(&registry, &mut tx, "products.foo").unwrap();
        assert_eq!(data.get_as::<u32>("count").unwrap(), 1);
    }

    #[test]
    fn test_namespaces_do_not_collide() {
        let registry = registry();
        let session = Session::new(&registry, &mut CookieExchange::new());
        let mut worker = WorkerCache::new();
        let mut tx = worker.begin();

        session.get(&registry, &mut tx, "a").unwrap().set("k", "v1").unwrap();
        session.get(&registry, &mut tx, "b").unwrap().set("k", "v2").unwrap();

        assert_eq!(session.get(&registry, &mut tx, "a").unwrap().get("k").unwrap(), &json!("v1"));
        assert_eq!(session.get(&registry, &mut tx, "b").unwrap().get("k").unwrap(), &json!("v2"));
    }

    #[test]
    fn test_missing_container_is_not_registered() {
        let registry = SessionRegistry::new(ClientIdManager::generate().unwrap());
        let session = Session::new(&registry, &mut CookieExchange::new());
        let mut worker = WorkerCache::new();
        let mut tx = worker.begin();

        assert!(matches!(
            session.get(&registry, &mut tx, "ns"),
            Err(SessionError::NotRegistered(_))
        ));
    }

    #[test]
    fn test_explicit_container() {
        let registry = registry();
        let other = SessionDataContainer::in_memory("other", ContainerConfig::new()).unwrap();
        let session = Session::new(&registry, &mut CookieExchange::new());
        let mut worker = WorkerCache::new();
        let mut tx = worker.begin();

        session.get_in(&other, &mut tx, "ns").unwrap().set("k", 1).unwrap();
        assert!(session.get(&registry, &mut tx, "ns").unwrap().is_empty());
        assert_eq!(session.get_in(&other, &mut tx, "ns").unwrap().get_as::<i32>("k").unwrap(), 1);
    }
}
