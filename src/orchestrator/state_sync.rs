/// State Synchronizer - Polls the backend and keeps the epoch window current
///
/// Published values only change when the data behind them changed, so a
/// receiver seeing the same `Arc` can skip re-deriving anything.

use anyhow::{anyhow, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::time::{interval, MissedTickBehavior};

use super::transacting::TransactingFlag;
use crate::chain::{AccountStatus, EpochSnapshot, GatewayError, Identity, ParticipationRecord, RemoteGateway};
use crate::session::KnownIdentities;

/// One epoch of the sliding window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSnapshot {
    pub epoch_index: u32,
    pub own: ParticipationRecord,
    /// Known identities other than the active one that entered this epoch
    pub others: Vec<(Identity, ParticipationRecord)>,
    pub is_current: bool,
    pub seed: Option<[u8; 32]>,
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub poll_interval: Duration,
    /// Number of epochs kept, the active one included
    pub window_size: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            window_size: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// An operation was in flight; nothing was queried or published
    Transacting,
    NoIdentity,
    /// No epoch exists yet
    NoEpoch { account_changed: bool },
    Updated {
        epoch_changed: bool,
        window_changed: bool,
        account_changed: bool,
    },
}

/// Structural window equality: epoch, current marker, own record and
/// others in order. Seeds are tracked through the epoch snapshot.
pub fn same_window(previous: &[FieldSnapshot], next: &[FieldSnapshot]) -> bool {
    previous.len() == next.len()
        && previous.iter().zip(next).all(|(a, b)| {
            a.epoch_index == b.epoch_index
                && a.is_current == b.is_current
                && a.own == b.own
                && a.others.len() == b.others.len()
                && a.others
                    .iter()
                    .zip(&b.others)
                    .all(|((id_a, rec_a), (id_b, rec_b))| id_a == id_b && rec_a == rec_b)
        })
}

struct Fetched {
    account: AccountStatus,
    epoch: Option<(EpochSnapshot, Vec<FieldSnapshot>)>,
}

pub struct StateSynchronizer {
    config: SyncConfig,
    gateway: Arc<dyn RemoteGateway>,
    known: Arc<KnownIdentities>,
    identity: watch::Receiver<Option<Identity>>,
    transacting: TransactingFlag,
    epoch: watch::Sender<Option<Arc<EpochSnapshot>>>,
    window: watch::Sender<Arc<Vec<FieldSnapshot>>>,
    account: watch::Sender<Option<AccountStatus>>,
    /// Serializes ticks; holds the identity the published state belongs to
    tick_lock: Mutex<Option<Identity>>,
    is_running: Arc<RwLock<bool>>,
}

impl StateSynchronizer {
    pub fn new(
        config: SyncConfig,
        gateway: Arc<dyn RemoteGateway>,
        known: Arc<KnownIdentities>,
        identity: watch::Receiver<Option<Identity>>,
        transacting: TransactingFlag,
    ) -> Self {
        Self {
            config,
            gateway,
            known,
            identity,
            transacting,
            epoch: watch::channel(None).0,
            window: watch::channel(Arc::new(Vec::new())).0,
            account: watch::channel(None).0,
            tick_lock: Mutex::new(None),
            is_running: Arc::new(RwLock::new(false)),
        }
    }

    pub fn transacting(&self) -> &TransactingFlag {
        &self.transacting
    }

    /// Identity whose records the window holds
    pub fn owner(&self) -> Option<Identity> {
        self.identity.borrow().clone()
    }

    pub fn epoch(&self) -> Option<Arc<EpochSnapshot>> {
        self.epoch.borrow().clone()
    }

    pub fn window(&self) -> Arc<Vec<FieldSnapshot>> {
        self.window.borrow().clone()
    }

    pub fn account(&self) -> Option<AccountStatus> {
        *self.account.borrow()
    }

    pub fn subscribe_epoch(&self) -> watch::Receiver<Option<Arc<EpochSnapshot>>> {
        self.epoch.subscribe()
    }

    pub fn subscribe_window(&self) -> watch::Receiver<Arc<Vec<FieldSnapshot>>> {
        self.window.subscribe()
    }

    pub fn subscribe_account(&self) -> watch::Receiver<Option<AccountStatus>> {
        self.account.subscribe()
    }

    /// Own record for an epoch inside the window
    pub fn own_record(&self, epoch_index: u32) -> Option<ParticipationRecord> {
        self.window
            .borrow()
            .iter()
            .find(|field| field.epoch_index == epoch_index)
            .map(|field| field.own)
    }

    /// Past epochs with an entry and a proof, newest first
    pub fn claimable_epochs(&self) -> Vec<u32> {
        self.window
            .borrow()
            .iter()
            .filter(|field| !field.is_current && field.own.has_entered && field.own.has_submitted_proof)
            .map(|field| field.epoch_index)
            .collect()
    }

    /// Run one tick right away, e.g. after a successful operation
    pub async fn refresh_now(&self) -> Result<TickOutcome, GatewayError> {
        log::debug!("Forced refresh");
        self.tick().await
    }

    pub async fn tick(&self) -> Result<TickOutcome, GatewayError> {
        if self.transacting.is_set() {
            log::debug!("Skipping poll, operation in flight");
            return Ok(TickOutcome::Transacting);
        }

        let mut owner = self.tick_lock.lock().await;

        let identity = match self.owner() {
            Some(identity) => identity,
            None => return Ok(TickOutcome::NoIdentity),
        };
        if owner.as_ref() != Some(&identity) {
            if owner.is_some() {
                log::info!("Identity changed to {}, clearing synchronized state", identity);
                self.window.send_replace(Arc::new(Vec::new()));
                self.account.send_replace(None);
            }
            *owner = Some(identity.clone());
        }

        let fetched = self.fetch(&identity).await?;

        // An operation may have started while the queries were out
        if self.transacting.is_set() {
            log::debug!("Discarding poll results, operation in flight");
            return Ok(TickOutcome::Transacting);
        }

        let account_changed = self.publish_account(fetched.account);
        let (epoch, window) = match fetched.epoch {
            Some(found) => found,
            None => return Ok(TickOutcome::NoEpoch { account_changed }),
        };

        let epoch_changed = self.publish_epoch(epoch);
        let window_changed = self.publish_window(window);

        Ok(TickOutcome::Updated {
            epoch_changed,
            window_changed,
            account_changed,
        })
    }

    async fn fetch(&self, identity: &Identity) -> Result<Fetched, GatewayError> {
        let account = self.gateway.account_status(identity).await?;

        let epoch = match self.gateway.epoch_info().await? {
            Some(epoch) => epoch,
            None => {
                return Ok(Fetched {
                    account,
                    epoch: None,
                })
            }
        };

        let others: Vec<Identity> = self
            .known
            .snapshot()
            .into_iter()
            .filter(|known| known != identity)
            .collect();

        let mut window = Vec::with_capacity(self.config.window_size as usize);
        for offset in 0..self.config.window_size {
            let epoch_index = match epoch.epoch_index.checked_sub(offset) {
                Some(index) => index,
                None => break,
            };

            let own = self.gateway.participation(identity, epoch_index).await?;
            let others = if others.is_empty() {
                Vec::new()
            } else {
                self.gateway.participants(epoch_index, &others).await?
            };

            let is_current = offset == 0;
            window.push(FieldSnapshot {
                epoch_index,
                own,
                others,
                is_current,
                seed: is_current.then_some(epoch.seed),
            });
        }

        Ok(Fetched {
            account,
            epoch: Some((epoch, window)),
        })
    }

    fn publish_epoch(&self, epoch: EpochSnapshot) -> bool {
        self.epoch.send_if_modified(|current| {
            if current.as_deref() == Some(&epoch) {
                return false;
            }
            log::info!("Epoch {} active", epoch.epoch_index);
            *current = Some(Arc::new(epoch));
            true
        })
    }

    fn publish_window(&self, window: Vec<FieldSnapshot>) -> bool {
        self.window.send_if_modified(|current| {
            if same_window(current.as_slice(), &window) {
                return false;
            }
            log::debug!("Window changed ({} epochs)", window.len());
            *current = Arc::new(window);
            true
        })
    }

    fn publish_account(&self, account: AccountStatus) -> bool {
        self.account.send_if_modified(|current| {
            if *current == Some(account) {
                return false;
            }
            log::debug!("Account status changed: {:?}", account);
            *current = Some(account);
            true
        })
    }

    /// Start polling in the background
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let mut running = self.is_running.write().await;
        if *running {
            return Err(anyhow!("Synchronizer already running"));
        }
        *running = true;
        drop(running);

        let sync = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(sync.config.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            while *sync.is_running.read().await {
                ticker.tick().await;
                if let Err(e) = sync.tick().await {
                    log::warn!("Poll failed, retrying next tick: {}", e);
                }
            }

            log::info!("State synchronizer stopped");
        });

        log::info!(
            "State synchronizer started (every {:?}, {} epochs)",
            self.config.poll_interval,
            self.config.window_size
        );
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        let mut running = self.is_running.write().await;
        if !*running {
            return Err(anyhow!("Synchronizer not running"));
        }
        *running = false;

        log::info!("Stopping state synchronizer");
        Ok(())
    }
}
