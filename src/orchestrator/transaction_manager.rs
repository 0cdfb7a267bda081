/// Transaction Manager - Drives one operation kind through prepare, sign and submit
///
/// Each manager owns the state of exactly one kind. A flow holds the shared
/// transacting guard from the moment it leaves idle until it terminates.

use std::sync::{Arc, Mutex};
use tokio::sync::watch;

use super::state::{OperationError, OperationState};
use super::state_sync::{FieldSnapshot, StateSynchronizer};
use super::transacting::{TransactingFlag, TransactingGuard};
use crate::chain::{AccountStatus, Identity, OperationKind, OperationParams, RemoteGateway, Signer};
use crate::miner::MiningProgress;

pub struct TransactionManager {
    kind: OperationKind,
    gateway: Arc<dyn RemoteGateway>,
    signer: Arc<dyn Signer>,
    transacting: TransactingFlag,
    sync: Arc<StateSynchronizer>,
    state: watch::Sender<OperationState>,
    /// Parameters of the most recent flow, checked during reconciliation
    last_params: Mutex<Option<OperationParams>>,
}

impl TransactionManager {
    pub fn new(
        kind: OperationKind,
        gateway: Arc<dyn RemoteGateway>,
        signer: Arc<dyn Signer>,
        sync: Arc<StateSynchronizer>,
    ) -> Self {
        Self {
            kind,
            gateway,
            signer,
            transacting: sync.transacting().clone(),
            sync,
            state: watch::channel(OperationState::Idle).0,
            last_params: Mutex::new(None),
        }
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn state(&self) -> OperationState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<OperationState> {
        self.state.subscribe()
    }

    pub fn last_params(&self) -> Option<OperationParams> {
        match self.last_params.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn remember(&self, params: &OperationParams) {
        let mut last = match self.last_params.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *last = Some(params.clone());
    }

    /// Run a complete flow for `params`
    pub async fn execute(&self, params: OperationParams) -> Result<Option<String>, OperationError> {
        if params.kind() != self.kind {
            return Err(OperationError::KindMismatch {
                expected: self.kind,
                got: params.kind(),
            });
        }

        let guard = self.begin()?;
        self.run_flow(guard, params).await
    }

    /// Leave idle (or retry from a failure) and take the transacting guard
    pub(crate) fn begin(&self) -> Result<TransactingGuard, OperationError> {
        let first = if self.kind == OperationKind::SubmitProof {
            OperationState::Mining {
                percent: 0,
                best_zero_count: 0,
            }
        } else {
            OperationState::Preparing
        };

        let mut busy = None;
        self.state.send_if_modified(|state| {
            if !state.accepts_trigger() {
                busy = Some(state.name());
                return false;
            }
            if !state.is_idle() {
                log::debug!("{}: retrying from {}", self.kind, state.name());
            }
            *state = first;
            true
        });

        if let Some(state) = busy {
            log::warn!("{} triggered while {}", self.kind, state);
            return Err(OperationError::Busy {
                kind: self.kind,
                state,
            });
        }

        log::info!("{} started", self.kind);
        Ok(self.transacting.acquire())
    }

    /// Apply a transition, rejecting anything the table does not allow
    pub(crate) fn transition(&self, next: OperationState) -> Result<(), OperationError> {
        let mut rejected = None;
        self.state.send_if_modified(|state| {
            if !state.can_transition(self.kind, &next) {
                rejected = Some(state.name());
                return false;
            }
            if !matches!(next, OperationState::Mining { .. }) {
                log::debug!("{}: {} -> {}", self.kind, state.name(), next.name());
            }
            *state = next.clone();
            true
        });

        match rejected {
            Some(from) => {
                log::error!("{}: rejected transition {} -> {}", self.kind, from, next.name());
                Err(OperationError::InvalidTransition {
                    kind: self.kind,
                    from,
                    to: next.name(),
                })
            }
            None => Ok(()),
        }
    }

    pub(crate) fn report_progress(&self, progress: MiningProgress) {
        let _ = self.transition(OperationState::Mining {
            percent: progress.percent,
            best_zero_count: progress.best_zero_count,
        });
    }

    pub(crate) fn fail(&self, error: &OperationError) {
        log::warn!("{} failed: {}", self.kind, error);
        let _ = self.transition(OperationState::Error {
            message: error.to_string(),
        });
    }

    /// Prepare, sign and submit while `guard` is held, then publish the outcome
    pub(crate) async fn run_flow(
        &self,
        guard: TransactingGuard,
        params: OperationParams,
    ) -> Result<Option<String>, OperationError> {
        self.remember(&params);

        let outcome = self.drive(&params).await;
        drop(guard);

        match outcome {
            Ok(result_hash) => {
                self.transition(OperationState::Success {
                    result_hash: result_hash.clone(),
                })?;
                log::info!(
                    "{} succeeded{}",
                    self.kind,
                    result_hash.as_deref().map(|h| format!(": {}", h)).unwrap_or_default()
                );

                if let Err(e) = self.sync.refresh_now().await {
                    log::warn!("Refresh after {} failed: {}", self.kind, e);
                }
                Ok(result_hash)
            }
            Err(e) => {
                self.fail(&e);
                Err(e)
            }
        }
    }

    async fn drive(&self, params: &OperationParams) -> Result<Option<String>, OperationError> {
        if !matches!(self.state(), OperationState::Preparing) {
            self.transition(OperationState::Preparing)?;
        }

        if !self.kind.requires_signature() {
            self.gateway.fund_account(params.identity()).await?;
            return Ok(None);
        }

        let unsigned = self.gateway.prepare(params).await?;

        self.transition(OperationState::Signing)?;
        let signed = self.signer.sign(&unsigned).await?;

        self.transition(OperationState::Submitting)?;
        let result_hash = self.gateway.submit(self.kind, &signed).await?;

        Ok(Some(result_hash))
    }

    /// Back to idle from a terminal state
    pub fn reset(&self) -> Result<(), OperationError> {
        let state = self.state();
        if state.is_idle() {
            return Ok(());
        }
        if state.is_in_flight() {
            return Err(OperationError::Busy {
                kind: self.kind,
                state: state.name(),
            });
        }
        self.transition(OperationState::Idle)
    }

    /// Reset a succeeded flow once the synchronized state shows its effect
    pub fn reconcile(
        &self,
        owner: Option<&Identity>,
        window: &[FieldSnapshot],
        account: Option<&AccountStatus>,
    ) -> bool {
        if !matches!(self.state(), OperationState::Success { .. }) {
            return false;
        }
        let params = match self.last_params() {
            Some(params) => params,
            None => return false,
        };
        if owner != Some(params.identity()) {
            return false;
        }

        if !confirms(&params, window, account) {
            return false;
        }

        log::info!("{} confirmed by ledger state", self.kind);
        self.transition(OperationState::Idle).is_ok()
    }
}

fn confirms(params: &OperationParams, window: &[FieldSnapshot], account: Option<&AccountStatus>) -> bool {
    let field = |epoch_index: u32| window.iter().find(|f| f.epoch_index == epoch_index);

    match params {
        OperationParams::Enter {
            epoch_index: Some(epoch_index),
            ..
        } => field(*epoch_index).map_or(false, |f| f.own.has_entered),
        // First entry of all time: the epoch it created is the current one
        OperationParams::Enter { epoch_index: None, .. } => window
            .iter()
            .find(|f| f.is_current)
            .map_or(false, |f| f.own.has_entered),
        // An earlier proof already set the flag, so the score must have caught up too
        OperationParams::SubmitProof {
            epoch_index,
            zero_count,
            ..
        } => field(*epoch_index).map_or(false, |f| {
            f.own.has_submitted_proof && f.own.best_zero_count >= *zero_count
        }),
        OperationParams::Claim { epoch_index, .. } => {
            field(*epoch_index).map_or(true, |f| !f.own.has_entered)
        }
        OperationParams::Fund { .. } => account.map_or(false, |a| a.exists),
        OperationParams::GrantTrustline { .. } => account.map_or(false, |a| a.has_trust),
    }
}
