//! In-memory fakes shared by the unit tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::chain::{
    AccountStatus, EpochSnapshot, GatewayError, Identity, OperationKind, OperationParams,
    ParticipationRecord, RemoteGateway, SignedPayload, Signer, SignerError, UnsignedPayload,
};
use crate::miner::{
    compute_hash, count_leading_zero_nibbles, MiningError, MiningJob, MiningProgress, MiningResult,
    ProofMiner,
};

pub const TEST_NETWORK: &str = "Test SDF Network ; September 2015";
pub const TEST_SEED: [u8; 32] = [0x42; 32];

pub fn identity(n: u8) -> Identity {
    Identity::from_raw([n; 32])
}

pub fn epoch(epoch_index: u32) -> EpochSnapshot {
    EpochSnapshot {
        epoch_index,
        seed: TEST_SEED,
    }
}

#[derive(Default)]
struct Ledger {
    epoch: Option<EpochSnapshot>,
    records: HashMap<(Identity, u32), ParticipationRecord>,
    accounts: HashMap<Identity, AccountStatus>,
    prepare_error: Option<String>,
    submit_error: Option<String>,
    fail_queries: bool,
    calls: Vec<String>,
    notifications: Vec<Result<Identity, String>>,
    pending: HashMap<String, OperationParams>,
    next_tx: u64,
}

/// Ledger-backed stand-in for the farm backend.
///
/// Submitting a signed payload applies the prepared operation to the ledger.
#[derive(Default)]
pub struct FakeGateway {
    ledger: Mutex<Ledger>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_epoch(epoch_index: u32) -> Self {
        let gateway = Self::new();
        gateway.set_epoch(Some(epoch(epoch_index)));
        gateway
    }

    fn ledger(&self) -> std::sync::MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap()
    }

    pub fn set_epoch(&self, epoch: Option<EpochSnapshot>) {
        self.ledger().epoch = epoch;
    }

    pub fn set_record(&self, identity: &Identity, epoch_index: u32, record: ParticipationRecord) {
        self.ledger().records.insert((identity.clone(), epoch_index), record);
    }

    pub fn record(&self, identity: &Identity, epoch_index: u32) -> ParticipationRecord {
        self.ledger()
            .records
            .get(&(identity.clone(), epoch_index))
            .copied()
            .unwrap_or_default()
    }

    pub fn set_account(&self, identity: &Identity, status: AccountStatus) {
        self.ledger().accounts.insert(identity.clone(), status);
    }

    pub fn fail_prepare(&self, message: &str) {
        self.ledger().prepare_error = Some(message.to_string());
    }

    pub fn fail_submit(&self, message: &str) {
        self.ledger().submit_error = Some(message.to_string());
    }

    pub fn clear_failures(&self) {
        let mut ledger = self.ledger();
        ledger.prepare_error = None;
        ledger.submit_error = None;
        ledger.fail_queries = false;
    }

    pub fn fail_queries(&self, fail: bool) {
        self.ledger().fail_queries = fail;
    }

    pub fn calls(&self) -> Vec<String> {
        self.ledger().calls.clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.ledger().calls.iter().filter(|c| c.starts_with(prefix)).count()
    }

    pub fn clear_calls(&self) {
        self.ledger().calls.clear();
    }

    pub fn notifications(&self) -> Vec<Result<Identity, String>> {
        self.ledger().notifications.clone()
    }

    fn query(&self, name: &str) -> Result<(), GatewayError> {
        let mut ledger = self.ledger();
        ledger.calls.push(name.to_string());
        if ledger.fail_queries {
            return Err(GatewayError::Query {
                endpoint: name.to_string(),
                status: 503,
                message: "unavailable".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteGateway for FakeGateway {
    async fn prepare(&self, params: &OperationParams) -> Result<UnsignedPayload, GatewayError> {
        let mut ledger = self.ledger();
        ledger.calls.push(format!("prepare:{}", params.kind()));
        if let Some(message) = ledger.prepare_error.clone() {
            return Err(GatewayError::Validation(message));
        }

        ledger.next_tx += 1;
        let xdr = format!("tx-{}", ledger.next_tx);
        ledger.pending.insert(xdr.clone(), params.clone());

        Ok(UnsignedPayload {
            xdr,
            network: TEST_NETWORK.to_string(),
        })
    }

    async fn submit(&self, kind: OperationKind, signed: &SignedPayload) -> Result<String, GatewayError> {
        let mut ledger = self.ledger();
        ledger.calls.push(format!("submit:{}", kind));
        if let Some(message) = ledger.submit_error.clone() {
            return Err(GatewayError::Submission(message));
        }

        let xdr = signed
            .xdr
            .strip_prefix("signed:")
            .ok_or_else(|| GatewayError::Submission("tx_bad_auth".to_string()))?;
        let params = ledger
            .pending
            .remove(xdr)
            .ok_or_else(|| GatewayError::Submission("unknown transaction".to_string()))?;

        let current = ledger.epoch;
        match params {
            OperationParams::Enter { identity, .. } => {
                let epoch_index = current.map(|e| e.epoch_index).unwrap_or(0);
                let record = ledger.records.entry((identity.clone(), epoch_index)).or_default();
                record.has_entered = true;
                if current.is_none() {
                    ledger.epoch = Some(epoch(0));
                }
            }
            OperationParams::SubmitProof {
                identity,
                epoch_index,
                nonce,
                ..
            } => {
                let seed = current.map(|e| e.seed).unwrap_or(TEST_SEED);
                let zeros = count_leading_zero_nibbles(&compute_hash(
                    epoch_index,
                    nonce,
                    &seed,
                    identity.raw_bytes(),
                ));
                let record = ledger.records.entry((identity, epoch_index)).or_default();
                record.has_submitted_proof = true;
                record.best_zero_count = record.best_zero_count.max(zeros);
            }
            OperationParams::Claim {
                identity,
                epoch_index,
            } => {
                ledger.records.remove(&(identity, epoch_index));
            }
            OperationParams::GrantTrustline { identity } => {
                ledger.accounts.entry(identity).or_default().has_trust = true;
            }
            OperationParams::Fund { .. } => {}
        }

        Ok(format!("hash-{}", xdr))
    }

    async fn fund_account(&self, identity: &Identity) -> Result<(), GatewayError> {
        let mut ledger = self.ledger();
        ledger.calls.push("fund".to_string());
        if let Some(message) = ledger.prepare_error.clone() {
            return Err(GatewayError::Validation(message));
        }
        let account = ledger.accounts.entry(identity.clone()).or_default();
        account.exists = true;
        account.balance = 10_000 * 10_000_000;
        Ok(())
    }

    async fn notify_identity(&self, outcome: Result<&Identity, &str>) -> Result<(), GatewayError> {
        let mut ledger = self.ledger();
        ledger.calls.push("pubkey".to_string());
        ledger
            .notifications
            .push(outcome.map(|i| i.clone()).map_err(|e| e.to_string()));
        Ok(())
    }

    async fn epoch_info(&self) -> Result<Option<EpochSnapshot>, GatewayError> {
        self.query("epoch_info")?;
        Ok(self.ledger().epoch)
    }

    async fn check_entered(&self, identity: &Identity) -> Result<bool, GatewayError> {
        self.query("check_entered")?;
        let epoch_index = match self.ledger().epoch {
            Some(epoch) => epoch.epoch_index,
            None => return Ok(false),
        };
        Ok(self.record(identity, epoch_index).has_entered)
    }

    async fn participation(
        &self,
        identity: &Identity,
        epoch_index: u32,
    ) -> Result<ParticipationRecord, GatewayError> {
        self.query("participation")?;
        Ok(self.record(identity, epoch_index))
    }

    async fn participants(
        &self,
        epoch_index: u32,
        identities: &[Identity],
    ) -> Result<Vec<(Identity, ParticipationRecord)>, GatewayError> {
        self.query("participants")?;
        Ok(identities
            .iter()
            .map(|identity| (identity.clone(), self.record(identity, epoch_index)))
            .filter(|(_, record)| record.has_entered)
            .collect())
    }

    async fn account_status(&self, identity: &Identity) -> Result<AccountStatus, GatewayError> {
        self.query("account_status")?;
        Ok(self
            .ledger()
            .accounts
            .get(identity)
            .copied()
            .unwrap_or_default())
    }
}

/// Wallet that approves everything unless told to reject
pub struct FakeSigner {
    identity: Identity,
    reject: AtomicBool,
    pub sign_calls: AtomicUsize,
}

impl FakeSigner {
    pub fn new(identity: Identity) -> Self {
        Self {
            identity,
            reject: AtomicBool::new(false),
            sign_calls: AtomicUsize::new(0),
        }
    }

    pub fn reject(&self, reject: bool) {
        self.reject.store(reject, Ordering::SeqCst);
    }

    pub fn sign_count(&self) -> usize {
        self.sign_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Signer for FakeSigner {
    async fn request_identity(&self, _token: &str) -> Result<Identity, SignerError> {
        if self.reject.load(Ordering::SeqCst) {
            return Err(SignerError::UserRejected);
        }
        Ok(self.identity.clone())
    }

    async fn sign(&self, payload: &UnsignedPayload) -> Result<SignedPayload, SignerError> {
        self.sign_calls.fetch_add(1, Ordering::SeqCst);
        if self.reject.load(Ordering::SeqCst) {
            return Err(SignerError::UserRejected);
        }
        if payload.network != TEST_NETWORK {
            return Err(SignerError::Signer("wrong network".to_string()));
        }
        Ok(SignedPayload {
            xdr: format!("signed:{}", payload.xdr),
            hash: None,
        })
    }
}

/// Miner that reports a fixed outcome
pub struct FakeMiner {
    result: MiningResult,
    pub jobs: Mutex<Vec<MiningJob>>,
}

impl FakeMiner {
    pub fn scoring(best_zero_count: u32, best_nonce: u64) -> Self {
        Self {
            result: MiningResult {
                best_nonce,
                best_hash: [0u8; 32],
                best_zero_count,
                hash_attempts: 1_000,
                time_taken_ms: 10_000,
            },
            jobs: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ProofMiner for FakeMiner {
    async fn mine(
        &self,
        job: &MiningJob,
        on_progress: &mut (dyn FnMut(MiningProgress) + Send),
    ) -> Result<MiningResult, MiningError> {
        self.jobs.lock().unwrap().push(job.clone());
        for percent in [50, 100] {
            on_progress(MiningProgress {
                percent,
                best_zero_count: self.result.best_zero_count,
                hash_attempts: self.result.hash_attempts,
            });
            tokio::task::yield_now().await;
        }
        Ok(self.result.clone())
    }
}
