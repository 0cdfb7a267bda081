/// Farm Orchestrator - Ties the per-operation state machines to the synchronizer
///
/// One manager per operation kind. All of them share the synchronizer's
/// transacting flag, so polling pauses while any flow is in flight.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::chain::{Identity, OperationKind, OperationParams, RemoteGateway, Signer};
use crate::miner::ProofMiner;

pub mod proof;
pub mod state;
pub mod state_sync;
pub mod transacting;
pub mod transaction_manager;

pub use self::proof::{ProofOrchestrator, ProofOutcome, ProofRequest, DEFAULT_MINING_DURATION};
pub use self::state::{OperationError, OperationState};
pub use self::state_sync::{same_window, FieldSnapshot, StateSynchronizer, SyncConfig, TickOutcome};
pub use self::transacting::{TransactingFlag, TransactingGuard};
pub use self::transaction_manager::TransactionManager;

#[derive(Debug, Clone)]
pub struct FarmSettings {
    /// Stake sent with every entry, in stroops
    pub stake_amount: i128,
    pub mining_duration: Duration,
}

impl Default for FarmSettings {
    fn default() -> Self {
        Self {
            stake_amount: 0,
            mining_duration: DEFAULT_MINING_DURATION,
        }
    }
}

pub struct FarmOrchestrator {
    sync: Arc<StateSynchronizer>,
    enter: Arc<TransactionManager>,
    proof: ProofOrchestrator,
    claim: Arc<TransactionManager>,
    fund: Arc<TransactionManager>,
    trustline: Arc<TransactionManager>,
    settings: FarmSettings,
}

impl FarmOrchestrator {
    pub fn new(
        gateway: Arc<dyn RemoteGateway>,
        signer: Arc<dyn Signer>,
        miner: Arc<dyn ProofMiner>,
        sync: Arc<StateSynchronizer>,
        settings: FarmSettings,
    ) -> Self {
        let manager = |kind| {
            Arc::new(TransactionManager::new(
                kind,
                gateway.clone(),
                signer.clone(),
                sync.clone(),
            ))
        };

        let proof = ProofOrchestrator::new(
            manager(OperationKind::SubmitProof),
            miner,
            settings.mining_duration,
        );

        Self {
            enter: manager(OperationKind::Enter),
            claim: manager(OperationKind::Claim),
            fund: manager(OperationKind::Fund),
            trustline: manager(OperationKind::GrantTrustline),
            proof,
            sync,
            settings,
        }
    }

    pub fn sync(&self) -> &Arc<StateSynchronizer> {
        &self.sync
    }

    pub fn manager(&self, kind: OperationKind) -> &Arc<TransactionManager> {
        match kind {
            OperationKind::Enter => &self.enter,
            OperationKind::SubmitProof => self.proof.manager(),
            OperationKind::Claim => &self.claim,
            OperationKind::Fund => &self.fund,
            OperationKind::GrantTrustline => &self.trustline,
        }
    }

    fn managers(&self) -> [&Arc<TransactionManager>; 5] {
        [
            &self.enter,
            self.proof.manager(),
            &self.claim,
            &self.fund,
            &self.trustline,
        ]
    }

    pub fn states(&self) -> Vec<(OperationKind, OperationState)> {
        self.managers()
            .iter()
            .map(|manager| (manager.kind(), manager.state()))
            .collect()
    }

    pub async fn enter(&self, identity: &Identity) -> Result<Option<String>, OperationError> {
        self.enter_with(identity, self.settings.stake_amount).await
    }

    /// Enter the synchronized epoch; `None` before the first entry of all time
    pub async fn enter_with(&self, identity: &Identity, amount: i128) -> Result<Option<String>, OperationError> {
        self.enter
            .execute(OperationParams::Enter {
                identity: identity.clone(),
                amount,
                epoch_index: self.sync.epoch().map(|epoch| epoch.epoch_index),
            })
            .await
    }

    /// Mine and submit a proof for the synchronized epoch
    pub async fn submit_proof(&self, identity: &Identity) -> Result<ProofOutcome, OperationError> {
        self.proof.run_current(&self.sync, identity.clone()).await
    }

    /// Claim one past epoch. A single claim state covers every epoch.
    pub async fn claim(&self, identity: &Identity, epoch_index: u32) -> Result<Option<String>, OperationError> {
        self.claim
            .execute(OperationParams::Claim {
                identity: identity.clone(),
                epoch_index,
            })
            .await
    }

    pub async fn fund(&self, identity: &Identity) -> Result<Option<String>, OperationError> {
        self.fund
            .execute(OperationParams::Fund {
                identity: identity.clone(),
            })
            .await
    }

    pub async fn grant_trustline(&self, identity: &Identity) -> Result<Option<String>, OperationError> {
        self.trustline
            .execute(OperationParams::GrantTrustline {
                identity: identity.clone(),
            })
            .await
    }

    pub fn reset(&self, kind: OperationKind) -> Result<(), OperationError> {
        self.manager(kind).reset()
    }

    /// Reset every succeeded flow whose effect the synchronized state confirms
    pub fn reconcile(&self) -> usize {
        let owner = self.sync.owner();
        let window = self.sync.window();
        let account = self.sync.account();

        self.managers()
            .iter()
            .filter(|manager| manager.reconcile(owner.as_ref(), &window, account.as_ref()))
            .count()
    }

    /// Reconcile whenever the synchronizer publishes a new window or account status
    pub fn spawn_reconciler(self: &Arc<Self>) -> JoinHandle<()> {
        let orchestrator = self.clone();
        let mut window_rx = self.sync.subscribe_window();
        let mut account_rx = self.sync.subscribe_account();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = window_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    changed = account_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }

                let reconciled = orchestrator.reconcile();
                if reconciled > 0 {
                    log::debug!("Reconciled {} operation(s)", reconciled);
                }
            }
        })
    }
}
