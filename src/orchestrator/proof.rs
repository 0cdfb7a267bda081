/// Proof submission: mine for the configured duration, then submit the best nonce
/// unless it fails to beat the score already on the ledger.

use std::sync::Arc;
use std::time::Duration;

use super::state::{OperationError, OperationState};
use super::state_sync::StateSynchronizer;
use super::transaction_manager::TransactionManager;
use crate::chain::{EpochSnapshot, Identity, OperationKind, OperationParams};
use crate::miner::{MiningJob, MiningProgress, ProofMiner};

pub const DEFAULT_MINING_DURATION: Duration = Duration::from_millis(10_000);

#[derive(Debug, Clone)]
pub struct ProofRequest {
    pub identity: Identity,
    pub epoch: EpochSnapshot,
    /// Score already recorded for this epoch; the new run must beat it
    pub previous_best: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProofOutcome {
    Submitted {
        result_hash: Option<String>,
        nonce: u64,
        zero_count: u32,
    },
    NotImproved {
        best: u32,
        previous: u32,
    },
}

pub struct ProofOrchestrator {
    manager: Arc<TransactionManager>,
    miner: Arc<dyn ProofMiner>,
    mining_duration: Duration,
}

impl ProofOrchestrator {
    pub fn new(manager: Arc<TransactionManager>, miner: Arc<dyn ProofMiner>, mining_duration: Duration) -> Self {
        debug_assert_eq!(manager.kind(), OperationKind::SubmitProof);
        Self {
            manager,
            miner,
            mining_duration,
        }
    }

    pub fn manager(&self) -> &Arc<TransactionManager> {
        &self.manager
    }

    pub async fn run(&self, request: ProofRequest) -> Result<ProofOutcome, OperationError> {
        let guard = self.manager.begin()?;

        let job = MiningJob {
            epoch_index: request.epoch.epoch_index,
            seed: request.epoch.seed,
            identity: *request.identity.raw_bytes(),
            duration: self.mining_duration,
        };

        let manager = &self.manager;
        let mut on_progress = |progress: MiningProgress| manager.report_progress(progress);
        let result = match self.miner.mine(&job, &mut on_progress).await {
            Ok(result) => result,
            Err(e) => {
                let error = OperationError::from(e);
                self.manager.fail(&error);
                return Err(error);
            }
        };

        log::info!(
            "Mined epoch {}: best {} zeros (nonce {}, {} hashes)",
            job.epoch_index,
            result.best_zero_count,
            result.best_nonce,
            result.hash_attempts
        );

        if let Some(previous) = request.previous_best {
            if result.best_zero_count <= previous {
                drop(guard);
                log::info!(
                    "No improvement over recorded best ({} <= {})",
                    result.best_zero_count,
                    previous
                );
                self.manager.transition(OperationState::FailedToImprove {
                    best: result.best_zero_count,
                    previous,
                })?;
                return Ok(ProofOutcome::NotImproved {
                    best: result.best_zero_count,
                    previous,
                });
            }
        }

        let params = OperationParams::SubmitProof {
            identity: request.identity,
            epoch_index: job.epoch_index,
            nonce: result.best_nonce,
            zero_count: result.best_zero_count,
        };
        let result_hash = self.manager.run_flow(guard, params).await?;

        Ok(ProofOutcome::Submitted {
            result_hash,
            nonce: result.best_nonce,
            zero_count: result.best_zero_count,
        })
    }

    /// Mine against the synchronized epoch, using the own recorded score as the bar
    pub async fn run_current(
        &self,
        sync: &StateSynchronizer,
        identity: Identity,
    ) -> Result<ProofOutcome, OperationError> {
        let epoch = sync.epoch().ok_or(OperationError::NoActiveEpoch)?;
        let previous_best = sync
            .own_record(epoch.epoch_index)
            .filter(|record| record.has_submitted_proof)
            .map(|record| record.best_zero_count);

        self.run(ProofRequest {
            identity,
            epoch: *epoch,
            previous_best,
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ParticipationRecord;
    use crate::orchestrator::state_sync::SyncConfig;
    use crate::orchestrator::transacting::TransactingFlag;
    use crate::session::{KnownIdentities, MemoryStore};
    use crate::testing::{epoch, identity, FakeGateway, FakeMiner, FakeSigner};
    use tokio::sync::watch;

    struct Harness {
        gateway: Arc<FakeGateway>,
        signer: Arc<FakeSigner>,
        sync: Arc<StateSynchronizer>,
        _identity_tx: watch::Sender<Option<Identity>>,
    }

    fn harness() -> Harness {
        let gateway = Arc::new(FakeGateway::with_epoch(10));
        let signer = Arc::new(FakeSigner::new(identity(1)));
        let known = Arc::new(KnownIdentities::load(Arc::new(MemoryStore::new())).unwrap());
        let (identity_tx, identity_rx) = watch::channel(Some(identity(1)));
        let sync = Arc::new(StateSynchronizer::new(
            SyncConfig::default(),
            gateway.clone(),
            known,
            identity_rx,
            TransactingFlag::new(),
        ));
        Harness {
            gateway,
            signer,
            sync,
            _identity_tx: identity_tx,
        }
    }

    fn orchestrator(h: &Harness, miner: FakeMiner) -> ProofOrchestrator {
        let manager = Arc::new(TransactionManager::new(
            OperationKind::SubmitProof,
            h.gateway.clone(),
            h.signer.clone(),
            h.sync.clone(),
        ));
        ProofOrchestrator::new(manager, Arc::new(miner), DEFAULT_MINING_DURATION)
    }

    fn request(previous_best: Option<u32>) -> ProofRequest {
        ProofRequest {
            identity: identity(1),
            epoch: epoch(10),
            previous_best,
        }
    }

    #[tokio::test]
    async fn test_no_improvement_makes_no_network_calls() {
        let h = harness();
        let proof = orchestrator(&h, FakeMiner::scoring(2, 77));

        let outcome = proof.run(request(Some(3))).await.unwrap();
        assert_eq!(outcome, ProofOutcome::NotImproved { best: 2, previous: 3 });
        assert_eq!(
            proof.manager().state(),
            OperationState::FailedToImprove { best: 2, previous: 3 }
        );
        assert!(h.gateway.calls().is_empty());
        assert_eq!(h.signer.sign_count(), 0);
        assert!(!h.sync.transacting().is_set());
    }

    #[tokio::test]
    async fn test_equal_score_does_not_improve() {
        let h = harness();
        let proof = orchestrator(&h, FakeMiner::scoring(3, 1));
        let outcome = proof.run(request(Some(3))).await.unwrap();
        assert!(matches!(outcome, ProofOutcome::NotImproved { .. }));
    }

    #[tokio::test]
    async fn test_improvement_submits_winning_nonce() {
        let h = harness();
        let proof = orchestrator(&h, FakeMiner::scoring(5, 4242));
        let mut states = proof.manager().subscribe();

        let outcome = proof.run(request(Some(3))).await.unwrap();
        match outcome {
            ProofOutcome::Submitted { nonce, zero_count, result_hash } => {
                assert_eq!(nonce, 4242);
                assert_eq!(zero_count, 5);
                assert!(result_hash.is_some());
            }
            other => panic!("unexpected outcome {:?}", other),
        }

        assert_eq!(
            proof.manager().last_params(),
            Some(OperationParams::SubmitProof {
                identity: identity(1),
                epoch_index: 10,
                nonce: 4242,
                zero_count: 5
            })
        );
        assert_eq!(h.gateway.count("prepare:submit-proof"), 1);
        assert!(matches!(*states.borrow_and_update(), OperationState::Success { .. }));
        assert!(h.gateway.record(&identity(1), 10).has_submitted_proof);
    }

    #[tokio::test]
    async fn test_retry_after_failed_to_improve() {
        let h = harness();
        let weak = orchestrator(&h, FakeMiner::scoring(1, 1));
        weak.run(request(Some(3))).await.unwrap();

        // Same manager, stronger miner
        let strong = ProofOrchestrator::new(
            weak.manager().clone(),
            Arc::new(FakeMiner::scoring(6, 9)),
            DEFAULT_MINING_DURATION,
        );
        let outcome = strong.run(request(Some(3))).await.unwrap();
        assert!(matches!(outcome, ProofOutcome::Submitted { nonce: 9, .. }));
    }

    #[tokio::test]
    async fn test_run_current_uses_recorded_best() {
        let h = harness();
        h.gateway.set_record(
            &identity(1),
            10,
            ParticipationRecord {
                has_entered: true,
                has_submitted_proof: true,
                best_zero_count: 4,
            },
        );
        h.sync.refresh_now().await.unwrap();
        h.gateway.clear_calls();

        let miner = FakeMiner::scoring(4, 3);
        let proof = orchestrator(&h, miner);
        let outcome = proof.run_current(&h.sync, identity(1)).await.unwrap();
        assert_eq!(outcome, ProofOutcome::NotImproved { best: 4, previous: 4 });
        assert!(h.gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn test_run_current_without_epoch() {
        let h = harness();
        let proof = orchestrator(&h, FakeMiner::scoring(4, 3));
        assert!(matches!(
            proof.run_current(&h.sync, identity(1)).await,
            Err(OperationError::NoActiveEpoch)
        ));
        assert_eq!(proof.manager().state(), OperationState::Idle);
    }

    #[tokio::test]
    async fn test_mining_job_uses_epoch_and_identity() {
        let h = harness();
        let miner = Arc::new(FakeMiner::scoring(2, 0));
        let manager = Arc::new(TransactionManager::new(
            OperationKind::SubmitProof,
            h.gateway.clone(),
            h.signer.clone(),
            h.sync.clone(),
        ));
        let proof = ProofOrchestrator::new(manager, miner.clone(), Duration::from_millis(250));
        proof.run(request(None)).await.unwrap();

        let jobs = miner.jobs.lock().unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].epoch_index, 10);
        assert_eq!(&jobs[0].identity, identity(1).raw_bytes());
        assert_eq!(jobs[0].duration, Duration::from_millis(250));
    }
}
