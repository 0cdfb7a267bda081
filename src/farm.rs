/// Builds the full client from configuration
use anyhow::{anyhow, Result};
use std::sync::Arc;
use std::time::Duration;

use crate::chain::{BridgeSigner, FarmClient, Identity, RemoteGateway, Signer};
use crate::config::Config;
use crate::miner::{MiningEngine, ProofMiner};
use crate::orchestrator::{FarmOrchestrator, StateSynchronizer, TransactingFlag};
use crate::session::{FileStore, KeyValueStore, KnownIdentities, SessionStore};

pub struct Farm {
    pub config: Config,
    pub gateway: Arc<dyn RemoteGateway>,
    pub session: SessionStore,
    pub sync: Arc<StateSynchronizer>,
    pub orchestrator: Arc<FarmOrchestrator>,
}

impl Farm {
    /// Production wiring: HTTP backend, signer bridge, file-backed session
    pub fn build(config: Config) -> Result<Self> {
        config.validate()?;

        let store = FileStore::open(&config.storage.path)?;
        log::debug!("Session store at {:?}", store.path());

        let gateway = Arc::new(FarmClient::new(config.client_config())?);
        let signer = Arc::new(BridgeSigner::new(
            config.signer.bridge_url.clone(),
            config.signer.api_key.clone(),
            Duration::from_secs(config.signer.timeout_secs),
        )?);
        let miner = Arc::new(MiningEngine::new(config.mining_chunk()));

        Self::assemble(config, Arc::new(store), gateway, signer, miner)
    }

    pub fn assemble(
        config: Config,
        store: Arc<dyn KeyValueStore>,
        gateway: Arc<dyn RemoteGateway>,
        signer: Arc<dyn Signer>,
        miner: Arc<dyn ProofMiner>,
    ) -> Result<Self> {
        let known = Arc::new(KnownIdentities::load(store.clone())?);
        let session = SessionStore::new(store, signer.clone(), gateway.clone(), known.clone());
        session.load()?;

        let sync = Arc::new(StateSynchronizer::new(
            config.sync_config(),
            gateway.clone(),
            known,
            session.subscribe(),
            TransactingFlag::new(),
        ));
        let orchestrator = Arc::new(FarmOrchestrator::new(
            gateway.clone(),
            signer,
            miner,
            sync.clone(),
            config.farm_settings(),
        ));

        Ok(Self {
            config,
            gateway,
            session,
            sync,
            orchestrator,
        })
    }

    /// Active identity, or an error telling the user to connect first
    pub fn identity(&self) -> Result<Identity> {
        self.session
            .current()
            .ok_or_else(|| anyhow!("Not connected. Run `kale_farmer connect` first."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::OperationKind;
    use crate::orchestrator::{OperationState, TickOutcome};
    use crate::session::MemoryStore;
    use crate::testing::{identity, FakeGateway, FakeMiner, FakeSigner};

    fn build(store: Arc<dyn KeyValueStore>) -> (Farm, Arc<FakeGateway>) {
        let gateway = Arc::new(FakeGateway::with_epoch(7));
        let farm = Farm::assemble(
            Config::default(),
            store,
            gateway.clone(),
            Arc::new(FakeSigner::new(identity(1))),
            Arc::new(FakeMiner::scoring(3, 1)),
        )
        .unwrap();
        (farm, gateway)
    }

    #[tokio::test]
    async fn test_connect_feeds_synchronizer() {
        let (farm, _) = build(Arc::new(MemoryStore::new()));
        assert!(farm.identity().is_err());
        assert_eq!(farm.sync.tick().await.unwrap(), TickOutcome::NoIdentity);

        farm.session.connect().await.unwrap();
        assert_eq!(farm.identity().unwrap(), identity(1));
        assert!(matches!(farm.sync.tick().await.unwrap(), TickOutcome::Updated { .. }));
        assert_eq!(farm.sync.window().len(), 5);
    }

    #[tokio::test]
    async fn test_restored_session_runs_full_cycle() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        {
            let (first, _) = build(store.clone());
            first.session.connect().await.unwrap();
        }

        let (farm, gateway) = build(store);
        let me = farm.identity().unwrap();
        farm.sync.refresh_now().await.unwrap();

        farm.orchestrator.enter(&me).await.unwrap();
        farm.orchestrator.submit_proof(&me).await.unwrap();
        assert!(gateway.record(&me, 7).has_submitted_proof);
        assert!(matches!(
            farm.orchestrator.manager(OperationKind::SubmitProof).state(),
            OperationState::Success { .. }
        ));
    }
}
