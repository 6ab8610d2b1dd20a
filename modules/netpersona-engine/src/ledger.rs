//! Interaction ledger: processed-candidate dedup plus the per-platform daily cap.
//!
//! The durable half lives behind [`LedgerStore`]. This module adds the
//! in-process half that makes check-and-reserve atomic:
//!
//! - an in-flight key set, so two concurrent runs on the same candidate
//!   cannot both pass the dedup check;
//! - a pending count per platform, so reservations that may still act count
//!   against the cap before they commit;
//! - a per-platform async lock serializing the count check against commits.
//!
//! A [`Reservation`] releases its key and its pending slot when dropped, so a
//! run that is cancelled or fails mid-flight leaves nothing behind.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use tracing::{debug, info};

use netpersona_common::{CandidateKey, Config, DailyBudgetState, Decision, Outcome, Platform};

use crate::error::LedgerError;
use crate::traits::LedgerStore;

pub type Clock = Arc<dyn Fn() -> NaiveDate + Send + Sync>;

/// Daily interaction caps. One default, with per-platform overrides.
#[derive(Debug, Clone)]
pub struct BudgetCaps {
    default_cap: u32,
    overrides: HashMap<Platform, u32>,
}

impl BudgetCaps {
    pub fn new(default_cap: u32) -> Self {
        Self {
            default_cap,
            overrides: HashMap::new(),
        }
    }

    pub fn with_cap(mut self, platform: Platform, cap: u32) -> Self {
        self.overrides.insert(platform, cap);
        self
    }

    pub fn cap_for(&self, platform: Platform) -> u32 {
        self.overrides
            .get(&platform)
            .copied()
            .unwrap_or(self.default_cap)
    }
}

impl From<&Config> for BudgetCaps {
    fn from(config: &Config) -> Self {
        config
            .platform_limits
            .iter()
            .fold(Self::new(config.daily_interaction_limit), |caps, (platform, cap)| {
                caps.with_cap(*platform, *cap)
            })
    }
}

/// Result of [`Ledger::check_and_reserve`].
#[derive(Debug)]
pub enum LedgerCheck {
    Proceed(Reservation),
    /// Decided before. Carries the recorded decision.
    AlreadyProcessed(Decision),
    /// Another run holds this candidate right now.
    InFlight,
    BudgetExhausted(DailyBudgetState),
}

/// Result of [`Ledger::commit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed(DailyBudgetState),
    /// The cap filled up between reservation and commit. Nothing was recorded.
    CapReached(DailyBudgetState),
}

#[derive(Default)]
struct Holds {
    in_flight: HashSet<CandidateKey>,
    pending: HashMap<Platform, u32>,
}

struct Shared {
    store: Arc<dyn LedgerStore>,
    caps: BudgetCaps,
    clock: Clock,
    holds: Mutex<Holds>,
    channels: Mutex<HashMap<Platform, Arc<tokio::sync::Mutex<()>>>>,
}

impl Shared {
    fn holds(&self) -> MutexGuard<'_, Holds> {
        self.holds.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn channel(&self, platform: Platform) -> Arc<tokio::sync::Mutex<()>> {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        channels.entry(platform).or_default().clone()
    }
}

#[derive(Clone)]
pub struct Ledger {
    shared: Arc<Shared>,
}

impl Ledger {
    pub fn new(store: Arc<dyn LedgerStore>, caps: BudgetCaps) -> Self {
        Self::with_clock(store, caps, Arc::new(|| Utc::now().date_naive()))
    }

    /// Ledger whose notion of "today" comes from `clock`.
    pub fn with_clock(store: Arc<dyn LedgerStore>, caps: BudgetCaps, clock: Clock) -> Self {
        Self {
            shared: Arc::new(Shared {
                store,
                caps,
                clock,
                holds: Mutex::new(Holds::default()),
                channels: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn today(&self) -> NaiveDate {
        (self.shared.clock)()
    }

    /// Dedup check, then cap check, then reserve a slot. Atomic with respect
    /// to other runs on the same candidate and the same platform.
    pub async fn check_and_reserve(&self, key: &CandidateKey) -> Result<LedgerCheck, LedgerError> {
        if !self.shared.holds().in_flight.insert(key.clone()) {
            debug!(candidate = %key, "Candidate already in flight");
            return Ok(LedgerCheck::InFlight);
        }
        let hold = KeyHold {
            shared: self.shared.clone(),
            key: key.clone(),
        };

        if let Some(prior) = self
            .shared
            .store
            .prior_decision(key)
            .await
            .map_err(LedgerError::Storage)?
        {
            return Ok(LedgerCheck::AlreadyProcessed(prior));
        }

        let platform = key.platform;
        let channel = self.shared.channel(platform);
        let _serialized = channel.lock().await;

        let date = self.today();
        let count = self
            .shared
            .store
            .daily_count(platform, date)
            .await
            .map_err(LedgerError::Storage)?;
        let cap = self.shared.caps.cap_for(platform);

        let reserved = {
            let mut holds = self.shared.holds();
            let pending = holds.pending.entry(platform).or_insert(0);
            let available = count + *pending < cap;
            if available {
                *pending += 1;
            }
            available
        };

        if !reserved {
            return Ok(LedgerCheck::BudgetExhausted(DailyBudgetState {
                date,
                platform,
                count,
                cap,
            }));
        }
        Ok(LedgerCheck::Proceed(Reservation { hold }))
    }

    /// Record an act decision and count it against today's cap.
    ///
    /// The store applies the cap in the same write that increments the
    /// count, so runs in other processes sharing the store cannot push it
    /// past the cap either.
    pub async fn commit(
        &self,
        reservation: Reservation,
        decision: &Decision,
    ) -> Result<CommitOutcome, LedgerError> {
        let platform = reservation.key().platform;
        let channel = self.shared.channel(platform);
        let _serialized = channel.lock().await;

        let date = self.today();
        let cap = self.shared.caps.cap_for(platform);
        let recorded = self
            .shared
            .store
            .record_act(decision, date, cap)
            .await
            .map_err(LedgerError::Storage)?;

        // Released while still serialized so the count and pending move together.
        drop(reservation);

        match recorded {
            Some(count) => Ok(CommitOutcome::Committed(DailyBudgetState {
                date,
                platform,
                count,
                cap,
            })),
            None => {
                info!(candidate = %decision.key, cap, "Cap reached before commit");
                Ok(CommitOutcome::CapReached(DailyBudgetState {
                    date,
                    platform,
                    count: cap,
                    cap,
                }))
            }
        }
    }

    /// Record a skip decision. Does not touch the count.
    pub async fn record_skip(
        &self,
        reservation: Reservation,
        decision: &Decision,
    ) -> Result<(), LedgerError> {
        self.shared
            .store
            .record_decision(decision)
            .await
            .map_err(LedgerError::Storage)?;
        drop(reservation);
        Ok(())
    }

    /// Today's committed count for a platform.
    pub async fn budget_state(&self, platform: Platform) -> Result<DailyBudgetState, LedgerError> {
        let date = self.today();
        let count = self
            .shared
            .store
            .daily_count(platform, date)
            .await
            .map_err(LedgerError::Storage)?;
        Ok(DailyBudgetState {
            date,
            platform,
            count,
            cap: self.shared.caps.cap_for(platform),
        })
    }
}

/// Holds a candidate key in the in-flight set until dropped.
struct KeyHold {
    shared: Arc<Shared>,
    key: CandidateKey,
}

impl Drop for KeyHold {
    fn drop(&mut self) {
        self.shared.holds().in_flight.remove(&self.key);
    }
}

/// Permission to run one candidate to a decision. Holds the candidate key and
/// one pending slot on its platform until consumed by [`Ledger::commit`] or
/// [`Ledger::record_skip`], or dropped.
pub struct Reservation {
    hold: KeyHold,
}

impl Reservation {
    pub fn key(&self) -> &CandidateKey {
        &self.hold.key
    }
}

impl std::fmt::Debug for Reservation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reservation").field("key", self.key()).finish()
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        let platform = self.hold.key.platform;
        let mut holds = self.hold.shared.holds();
        if let Some(pending) = holds.pending.get_mut(&platform) {
            *pending = pending.saturating_sub(1);
        }
        // `hold` drops after this and releases the key
    }
}

// ---------------------------------------------------------------------------
// MemoryLedgerStore
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryInner {
    decisions: HashMap<CandidateKey, Decision>,
    counts: HashMap<(NaiveDate, Platform), u32>,
    unavailable: bool,
}

/// In-process ledger storage. Used by `decide --ephemeral` and tests.
#[derive(Default)]
pub struct MemoryLedgerStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a count, as if earlier runs had already acted.
    pub fn with_count(self, platform: Platform, date: NaiveDate, count: u32) -> Self {
        self.lock().counts.insert((date, platform), count);
        self
    }

    /// Make every call fail, as a lost database would.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    pub fn count(&self, platform: Platform, date: NaiveDate) -> u32 {
        self.lock()
            .counts
            .get(&(date, platform))
            .copied()
            .unwrap_or(0)
    }

    pub fn decision(&self, key: &CandidateKey) -> Option<Decision> {
        self.lock().decisions.get(key).cloned()
    }

    pub fn decisions_recorded(&self) -> usize {
        self.lock().decisions.len()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn available(&self) -> Result<MutexGuard<'_, MemoryInner>> {
        let inner = self.lock();
        if inner.unavailable {
            bail!("ledger store unavailable");
        }
        Ok(inner)
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn prior_decision(&self, key: &CandidateKey) -> Result<Option<Decision>> {
        Ok(self.available()?.decisions.get(key).cloned())
    }

    async fn daily_count(&self, platform: Platform, date: NaiveDate) -> Result<u32> {
        Ok(self
            .available()?
            .counts
            .get(&(date, platform))
            .copied()
            .unwrap_or(0))
    }

    async fn record_decision(&self, decision: &Decision) -> Result<()> {
        self.available()?
            .decisions
            .entry(decision.key.clone())
            .or_insert_with(|| decision.clone());
        Ok(())
    }

    async fn record_act(&self, decision: &Decision, date: NaiveDate, cap: u32) -> Result<Option<u32>> {
        if decision.outcome != Outcome::Act {
            bail!("record_act called with a {:?} decision", decision.outcome);
        }
        let mut inner = self.available()?;
        if inner.decisions.contains_key(&decision.key) {
            bail!("Candidate {} was already recorded", decision.key);
        }
        let platform = decision.key.platform;
        let current = inner.counts.get(&(date, platform)).copied().unwrap_or(0);
        if current >= cap {
            return Ok(None);
        }
        inner.decisions.insert(decision.key.clone(), decision.clone());
        inner.counts.insert((date, platform), current + 1);
        Ok(Some(current + 1))
    }
}
