/// Session Store - Persisted identity and the known-identity registry
///
/// The registry only grows: logging out clears the active identity but keeps
/// every address that ever connected from this client.

pub mod store;

use anyhow::Result;
use std::sync::{Arc, RwLock};
use tokio::sync::watch;

use crate::chain::{Identity, RemoteGateway, Signer, SignerError};
pub use store::{FileStore, KeyValueStore, MemoryStore};

pub const SESSION_KEY: &str = "session.identity";
pub const KNOWN_IDENTITIES_KEY: &str = "known_identities";

/// Append-only set of identities, persisted as a JSON array
pub struct KnownIdentities {
    store: Arc<dyn KeyValueStore>,
    members: RwLock<Vec<Identity>>,
}

impl KnownIdentities {
    pub fn load(store: Arc<dyn KeyValueStore>) -> Result<Self> {
        let mut members: Vec<Identity> = Vec::new();

        if let Some(serialized) = store.get(KNOWN_IDENTITIES_KEY)? {
            let addresses: Vec<String> = serde_json::from_str(&serialized)?;
            for address in addresses {
                match Identity::parse(&address) {
                    Ok(identity) if !members.contains(&identity) => members.push(identity),
                    Ok(_) => {}
                    Err(e) => log::warn!("Skipping stored identity: {}", e),
                }
            }
        }

        Ok(Self {
            store,
            members: RwLock::new(members),
        })
    }

    /// Add an identity and persist the set; returns false if it was already known
    pub fn append(&self, identity: &Identity) -> Result<bool> {
        let mut members = match self.members.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if members.contains(identity) {
            return Ok(false);
        }

        members.push(identity.clone());
        let addresses: Vec<&str> = members.iter().map(|i| i.address()).collect();
        self.store
            .set(KNOWN_IDENTITIES_KEY, &serde_json::to_string(&addresses)?)?;

        log::info!("Registered identity {} ({} known)", identity, members.len());
        Ok(true)
    }

    pub fn snapshot(&self) -> Vec<Identity> {
        match self.members.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn contains(&self, identity: &Identity) -> bool {
        self.snapshot().contains(identity)
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Holds the authenticated identity and publishes changes to it
pub struct SessionStore {
    store: Arc<dyn KeyValueStore>,
    signer: Arc<dyn Signer>,
    gateway: Arc<dyn RemoteGateway>,
    known: Arc<KnownIdentities>,
    current: watch::Sender<Option<Identity>>,
}

impl SessionStore {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        signer: Arc<dyn Signer>,
        gateway: Arc<dyn RemoteGateway>,
        known: Arc<KnownIdentities>,
    ) -> Self {
        let (current, _) = watch::channel(None);
        Self {
            store,
            signer,
            gateway,
            known,
            current,
        }
    }

    /// Restore the persisted identity, if any
    pub fn load(&self) -> Result<Option<Identity>> {
        let identity = match self.store.get(SESSION_KEY)? {
            Some(address) => match Identity::parse(&address) {
                Ok(identity) => Some(identity),
                Err(e) => {
                    log::warn!("Discarding stored session: {}", e);
                    self.store.delete(SESSION_KEY)?;
                    None
                }
            },
            None => None,
        };

        if let Some(identity) = &identity {
            self.known.append(identity)?;
            log::info!("Restored session for {}", identity);
        }

        self.current.send_replace(identity.clone());
        Ok(identity)
    }

    /// Ask the signer to disclose an identity and make it the active session
    pub async fn connect(&self) -> Result<Identity> {
        let token = uuid::Uuid::new_v4().to_string();

        let identity = match self.signer.request_identity(&token).await {
            Ok(identity) => identity,
            Err(e) => {
                let message = e.to_string();
                if let Err(notify_err) = self.gateway.notify_identity(Err(&message)).await {
                    log::warn!("Failed to report authentication error: {}", notify_err);
                }
                if matches!(e, SignerError::UserRejected) {
                    log::info!("Connection declined in the wallet");
                }
                return Err(e.into());
            }
        };

        self.store.set(SESSION_KEY, identity.address())?;
        self.known.append(&identity)?;
        self.current.send_replace(Some(identity.clone()));

        if let Err(e) = self.gateway.notify_identity(Ok(&identity)).await {
            log::warn!("Failed to notify backend of {}: {}", identity, e);
        }

        log::info!("Connected as {}", identity);
        Ok(identity)
    }

    /// Forget the active identity; the known-identity registry is kept
    pub fn logout(&self) -> Result<()> {
        self.store.delete(SESSION_KEY)?;
        self.current.send_replace(None);
        log::info!("Logged out");
        Ok(())
    }

    pub fn current(&self) -> Option<Identity> {
        self.current.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Identity>> {
        self.current.subscribe()
    }

    pub fn known(&self) -> Arc<KnownIdentities> {
        self.known.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{identity, FakeGateway, FakeSigner};

    fn build_session(
        store: Arc<dyn KeyValueStore>,
        signer: Arc<FakeSigner>,
        gateway: Arc<FakeGateway>,
    ) -> SessionStore {
        let known = Arc::new(KnownIdentities::load(store.clone()).unwrap());
        SessionStore::new(store, signer, gateway, known)
    }

    #[tokio::test]
    async fn test_connect_persists_and_registers() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let gateway = Arc::new(FakeGateway::new());
        let signer = Arc::new(FakeSigner::new(identity(1)));
        let session = build_session(store.clone(), signer, gateway.clone());

        let mut rx = session.subscribe();
        let connected = session.connect().await.unwrap();
        assert_eq!(connected, identity(1));
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), Some(identity(1)));

        assert_eq!(store.get(SESSION_KEY).unwrap().as_deref(), Some(identity(1).address()));
        assert!(session.known().contains(&identity(1)));
        assert_eq!(gateway.notifications(), vec![Ok(identity(1))]);

        // Survives a restart
        let restarted = build_session(
            store,
            Arc::new(FakeSigner::new(identity(9))),
            Arc::new(FakeGateway::new()),
        );
        assert_eq!(restarted.load().unwrap(), Some(identity(1)));
        assert_eq!(restarted.current(), Some(identity(1)));
    }

    #[tokio::test]
    async fn test_rejected_connect_reports_error() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let gateway = Arc::new(FakeGateway::new());
        let signer = Arc::new(FakeSigner::new(identity(1)));
        signer.reject(true);
        let session = build_session(store.clone(), signer, gateway.clone());

        let err = session.connect().await.unwrap_err();
        assert!(matches!(err.downcast_ref::<SignerError>(), Some(SignerError::UserRejected)));
        assert_eq!(session.current(), None);
        assert!(session.known().is_empty());
        assert_eq!(store.get(SESSION_KEY).unwrap(), None);

        let notifications = gateway.notifications();
        assert_eq!(notifications.len(), 1);
        assert!(notifications[0].is_err());
    }

    #[tokio::test]
    async fn test_logout_keeps_registry() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let gateway = Arc::new(FakeGateway::new());
        let signer = Arc::new(FakeSigner::new(identity(2)));
        let session = build_session(store.clone(), signer, gateway);

        session.connect().await.unwrap();
        session.logout().unwrap();

        assert_eq!(session.current(), None);
        assert_eq!(store.get(SESSION_KEY).unwrap(), None);
        assert_eq!(session.load().unwrap(), None);

        let reloaded = KnownIdentities::load(store).unwrap();
        assert_eq!(reloaded.snapshot(), vec![identity(2)]);
    }

    #[test]
    fn test_registry_is_a_set_and_skips_garbage() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let raw = serde_json::to_string(&vec![identity(3).address(), "GARBAGE", identity(3).address()]).unwrap();
        store.set(KNOWN_IDENTITIES_KEY, &raw).unwrap();

        let known = KnownIdentities::load(store.clone()).unwrap();
        assert_eq!(known.snapshot(), vec![identity(3)]);

        assert!(!known.append(&identity(3)).unwrap());
        assert!(known.append(&identity(4)).unwrap());
        assert_eq!(known.len(), 2);

        let persisted: Vec<String> = serde_json::from_str(&store.get(KNOWN_IDENTITIES_KEY).unwrap().unwrap()).unwrap();
        assert_eq!(persisted, vec![identity(3).to_string(), identity(4).to_string()]);
    }

    #[test]
    fn test_invalid_stored_session_is_dropped() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        store.set(SESSION_KEY, "not-an-address").unwrap();
        let session = build_session(
            store.clone(),
            Arc::new(FakeSigner::new(identity(1))),
            Arc::new(FakeGateway::new()),
        );

        assert_eq!(session.load().unwrap(), None);
        assert_eq!(store.get(SESSION_KEY).unwrap(), None);
    }
}
