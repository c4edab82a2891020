//! Engine orchestration: slot settlement, bet placement, queries and the
//! daily recovery pass.
//!
//! Settlement per slot is a single unit of work: the simulator runs over the
//! current field, then one SQLite transaction claims the slot, persists the
//! finish lines, the updated horse states and every wager outcome. Ledger
//! credits run after the commit, tagged with the wager id so a retried
//! settlement can never double-pay.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate, NaiveDateTime};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::conditions::RaceConditions;
use crate::config::BettingConfig;
use crate::error::EngineError;
use crate::ledger::{CoinLedger, LedgerError};
use crate::odds::{compute_odds, HorseOdds};
use crate::performance::HorseState;
use crate::retry::{retry, RetryConfig};
use crate::roster;
use crate::schedule::{RaceSlot, Schedule};
use crate::settlement::{self, BetType, WagerStatus};
use crate::storage::{Repository, StoredResult, StoredWager, WagerResolution};

/// Summary of one settled slot, returned by the tick.
#[derive(Debug, Clone)]
pub struct SettledSlot {
    pub date: NaiveDate,
    pub slot_index: u8,
    pub slot_name: String,
    pub finish_order: Vec<u8>,
    pub wagers_settled: usize,
    pub wagers_won: usize,
    pub coins_paid: i64,
}

/// What `/races/current` reports.
#[derive(Debug, Clone)]
pub enum RacePhase {
    Live {
        slot: RaceSlot,
        remaining_secs: i64,
        odds: HashMap<u8, HorseOdds>,
    },
    Upcoming {
        slot: RaceSlot,
        starts_in_secs: i64,
        odds: HashMap<u8, HorseOdds>,
    },
}

/// The racing engine. All state mutation flows through here.
pub struct RaceEngine {
    repo: Mutex<Repository>,
    schedule: Schedule,
    ledger: Arc<dyn CoinLedger>,
    betting: BettingConfig,
    retry_config: RetryConfig,
    lookback_days: u32,
}

impl RaceEngine {
    /// Build the engine and seed the performance store for any horse that
    /// has no state row yet.
    pub fn new(
        repo: Repository,
        schedule: Schedule,
        ledger: Arc<dyn CoinLedger>,
        betting: BettingConfig,
        credit_retries: u32,
        lookback_days: u32,
    ) -> Result<Self> {
        let states: Vec<HorseState> = roster::all_horses()
            .iter()
            .map(HorseState::seed_from)
            .collect();
        repo.seed_roster(&states)
            .context("Failed to seed horse states")?;

        Ok(Self {
            repo: Mutex::new(repo),
            schedule,
            ledger,
            betting,
            retry_config: RetryConfig::ledger(credit_retries),
            lookback_days,
        })
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    // ==================== Settlement ====================

    /// Settle every elapsed, unsettled slot. Safe to call at any frequency;
    /// overlapping invocations fall out on the claim and exit quietly.
    pub async fn tick(&self) -> Result<Vec<SettledSlot>> {
        self.tick_at(Local::now().naive_local()).await
    }

    pub async fn tick_at(&self, now: NaiveDateTime) -> Result<Vec<SettledSlot>> {
        // Stretch the scan window back to the oldest pending wager, so an
        // outage longer than the configured lookback cannot strand a debited
        // bet on an unclaimed slot.
        let lookback = {
            let repo = self.repo.lock().await;
            match repo.oldest_pending_wager_date()? {
                Some(oldest) => {
                    let behind = (now.date() - oldest).num_days().max(0) as u32;
                    self.lookback_days.max(behind)
                }
                None => self.lookback_days,
            }
        };

        let mut settled = Vec::new();
        for slot in self.schedule.elapsed_slots(now, lookback) {
            let mut rng = StdRng::from_entropy();
            if let Some(summary) = self.settle_slot(&slot, &mut rng).await? {
                settled.push(summary);
            }
        }
        self.reconcile_payouts().await?;
        Ok(settled)
    }

    /// Retry the ledger credit for won wagers whose payout was never
    /// confirmed. Credits are idempotent by wager reference, so re-driving
    /// them cannot double-pay.
    pub async fn reconcile_payouts(&self) -> Result<u32> {
        let unpaid = {
            let repo = self.repo.lock().await;
            repo.unpaid_won_wagers()?
        };
        let mut confirmed = 0;
        for wager in unpaid {
            let resolution = WagerResolution {
                wager_id: wager.id,
                user_id: wager.user_id.clone(),
                status: WagerStatus::Won,
                payout: wager.potential_payout,
            };
            if self.pay_out(&resolution).await {
                confirmed += 1;
            }
        }
        if confirmed > 0 {
            info!("reconciled {} previously unpaid wagers", confirmed);
        }
        Ok(confirmed)
    }

    /// Settle one slot with an injected randomness source.
    pub async fn settle_slot<R: Rng>(
        &self,
        slot: &RaceSlot,
        rng: &mut R,
    ) -> Result<Option<SettledSlot>> {
        let conditions = RaceConditions::for_slot(slot.date, slot.index, slot.start.time());

        let (finish_order, resolutions) = {
            let mut repo = self.repo.lock().await;
            if repo.result_exists(slot.date, slot.index)? {
                debug!(
                    "slot {} #{} already settled, skipping",
                    slot.date, slot.index
                );
                return Ok(None);
            }

            let mut states = repo.all_states()?;
            let mut field = Vec::with_capacity(states.len());
            for state in &states {
                field.push((roster::horse(state.horse_id)?, state));
            }

            let outcome = crate::simulate::simulate(&field, &conditions, rng);
            let finish_order = outcome.finish_order();

            // Fold the outcome back into the performance store.
            for state in states.iter_mut() {
                if let Some(entry) = outcome.entries.iter().find(|e| e.horse_id == state.horse_id)
                {
                    state.apply_race_outcome(entry.position as usize, slot.date, rng);
                }
            }

            let pending = repo.pending_wagers(slot.date, slot.index)?;
            let resolutions: Vec<WagerResolution> = pending
                .iter()
                .map(|w| {
                    let won =
                        settlement::selection_wins(w.bet_type, &w.selection, &finish_order);
                    WagerResolution {
                        wager_id: w.id,
                        user_id: w.user_id.clone(),
                        status: if won { WagerStatus::Won } else { WagerStatus::Lost },
                        payout: if won { w.potential_payout } else { 0 },
                    }
                })
                .collect();

            let claimed = repo.commit_settlement(
                slot.date,
                slot.index,
                &slot.name,
                &conditions.encode(),
                &outcome.entries,
                &states,
                &resolutions,
            )?;
            if !claimed {
                debug!(
                    "slot {} #{} claimed by a concurrent tick, skipping",
                    slot.date, slot.index
                );
                return Ok(None);
            }

            (finish_order, resolutions)
        };

        let wagers_won = resolutions
            .iter()
            .filter(|r| r.status == WagerStatus::Won)
            .count();
        info!(
            "settled {} #{} ({}): order {:?}, {} wagers ({} won)",
            slot.date,
            slot.index,
            slot.name,
            finish_order,
            resolutions.len(),
            wagers_won,
        );

        let mut coins_paid = 0;
        for resolution in &resolutions {
            if resolution.status == WagerStatus::Won && resolution.payout > 0 {
                if self.pay_out(resolution).await {
                    coins_paid += resolution.payout;
                }
            }
        }

        Ok(Some(SettledSlot {
            date: slot.date,
            slot_index: slot.index,
            slot_name: slot.name.clone(),
            finish_order,
            wagers_settled: resolutions.len(),
            wagers_won,
            coins_paid,
        }))
    }

    /// Credit one winning wager with bounded retry. Returns whether the
    /// credit was confirmed; on exhaustion the wager stays `won` with no
    /// recorded payout, surfaced for manual reconciliation.
    async fn pay_out(&self, resolution: &WagerResolution) -> bool {
        let reference = format!("wager-{}", resolution.wager_id);
        let credit = retry(&self.retry_config, "ledger credit", || {
            self.ledger.credit(
                &resolution.user_id,
                resolution.payout,
                &reference,
                "race winnings",
            )
        })
        .await;

        match credit {
            Ok(()) => {
                let repo = self.repo.lock().await;
                if let Err(e) = repo.mark_paid(resolution.wager_id, resolution.payout) {
                    error!(
                        "credited wager {} but failed to record payout: {:#}",
                        resolution.wager_id, e
                    );
                }
                true
            }
            Err(e) => {
                error!(
                    "payout credit failed after retries (wager {}, user {}, {} coins), \
                     leaving for reconciliation: {}",
                    resolution.wager_id, resolution.user_id, resolution.payout, e
                );
                false
            }
        }
    }

    // ==================== Recovery ====================

    /// Daily fatigue recovery: -5 for every horse that has not raced since
    /// the prior day. Returns how many horses recovered.
    pub async fn daily_recovery(&self) -> Result<u32> {
        self.recovery_at(Local::now().date_naive()).await
    }

    pub async fn recovery_at(&self, today: NaiveDate) -> Result<u32> {
        let mut repo = self.repo.lock().await;
        // The last run date is persisted, so neither a process restart nor a
        // repeated admin call can shed fatigue twice in one day.
        if repo.last_recovery_date()? == Some(today) {
            debug!("daily recovery already ran for {}", today);
            return Ok(0);
        }
        let mut states = repo.all_states()?;
        let mut recovered = Vec::new();
        for state in &mut states {
            if state.recover_daily(today) {
                recovered.push(state.clone());
            }
        }
        if !recovered.is_empty() {
            repo.save_states(&recovered)?;
        }
        repo.set_last_recovery_date(today)?;
        info!("daily recovery applied to {} horses", recovered.len());
        Ok(recovered.len() as u32)
    }

    // ==================== Betting ====================

    /// Place a bet on a pending slot. Debits the stake, then stores the
    /// wager with a payout promise computed from the current odds.
    pub async fn place_bet(
        &self,
        user_id: &str,
        date: NaiveDate,
        slot_index: u8,
        bet_type: BetType,
        selection: &[u8],
        stake: i64,
    ) -> std::result::Result<StoredWager, EngineError> {
        self.place_bet_at(
            user_id,
            date,
            slot_index,
            bet_type,
            selection,
            stake,
            Local::now().naive_local(),
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn place_bet_at(
        &self,
        user_id: &str,
        date: NaiveDate,
        slot_index: u8,
        bet_type: BetType,
        selection: &[u8],
        stake: i64,
        now: NaiveDateTime,
    ) -> std::result::Result<StoredWager, EngineError> {
        settlement::validate_selection(bet_type, selection)?;
        if user_id.is_empty() {
            return Err(EngineError::validation("user_id is required"));
        }
        if stake <= 0 {
            return Err(EngineError::validation("stake must be positive"));
        }
        if stake > self.betting.max_stake {
            return Err(EngineError::validation(format!(
                "stake exceeds the {}-coin cap",
                self.betting.max_stake
            )));
        }

        let slot = self
            .schedule
            .slot(date, slot_index)
            .ok_or_else(|| EngineError::not_found(format!("slot {}", slot_index)))?;
        if now >= slot.start {
            return Err(EngineError::validation("betting for this race has closed"));
        }

        // Checks, odds snapshot, debit and insert all happen under one lock
        // acquisition: a concurrent duplicate waits here and fails the
        // has_wager check instead of slipping in between the check and the
        // insert with an identically-referenced (and thus swallowed) debit.
        let repo = self.repo.lock().await;
        if repo.result_exists(date, slot_index).map_err(EngineError::Internal)? {
            return Err(EngineError::validation("race already settled"));
        }
        if repo
            .has_wager(user_id, date, slot_index)
            .map_err(EngineError::Internal)?
        {
            return Err(EngineError::Conflict(format!(
                "user {} already has a wager on this race",
                user_id
            )));
        }

        let states = repo.all_states().map_err(EngineError::Internal)?;
        let book = book_for(&states, &slot)?;
        let multiplier = settlement::payout_multiplier(bet_type, selection, &book, &self.betting)?;
        let potential_payout = settlement::potential_payout(stake, multiplier);

        // Debit before storing: a wager only ever exists with its stake
        // taken.
        let stake_reference = format!("stake-{}-{}-{}", user_id, date, slot_index);
        self.ledger
            .debit(user_id, stake, &stake_reference, "race wager")
            .await
            .map_err(map_ledger_error)?;

        let encoded = settlement::encode_selection(selection);
        let inserted = repo
            .insert_wager(
                user_id,
                date,
                slot_index,
                bet_type,
                &encoded,
                stake,
                potential_payout,
            )
            .map_err(EngineError::Internal)?;

        match inserted {
            Some(id) => {
                info!(
                    "wager {}: {} bet {} on [{}] for {} (pays {})",
                    id,
                    user_id,
                    bet_type.as_str(),
                    encoded,
                    stake,
                    potential_payout
                );
                Ok(StoredWager {
                    id,
                    user_id: user_id.to_string(),
                    race_date: date,
                    slot_index,
                    bet_type,
                    selection: selection.to_vec(),
                    stake,
                    potential_payout,
                    status: WagerStatus::Pending,
                    paid_out: None,
                    created_at: now.to_string(),
                })
            }
            None => {
                // Another writer on the same database file claimed the
                // unique key after the debit: return the stake.
                drop(repo);
                let refund_reference = format!("refund-{}", stake_reference);
                if let Err(e) = self
                    .ledger
                    .credit(user_id, stake, &refund_reference, "duplicate wager refund")
                    .await
                {
                    error!(
                        "failed to refund duplicate wager stake ({} coins to {}): {}",
                        stake, user_id, e
                    );
                }
                Err(EngineError::Conflict(format!(
                    "user {} already has a wager on this race",
                    user_id
                )))
            }
        }
    }

    // ==================== Queries ====================

    /// The live race (with time remaining) or the next scheduled one, with
    /// current odds either way.
    pub async fn current_race(&self, now: NaiveDateTime) -> Result<RacePhase> {
        let repo = self.repo.lock().await;
        let states = repo.all_states()?;
        drop(repo);

        if let Some(slot) = self.schedule.live_at(now) {
            let odds = book_for(&states, &slot)?;
            let remaining_secs = (slot.end - now).num_seconds();
            return Ok(RacePhase::Live {
                slot,
                remaining_secs,
                odds,
            });
        }

        let slot = self.schedule.next_after(now);
        let odds = book_for(&states, &slot)?;
        let starts_in_secs = (slot.start - now).num_seconds();
        Ok(RacePhase::Upcoming {
            slot,
            starts_in_secs,
            odds,
        })
    }

    /// Stored results for a date, optionally narrowed to one slot.
    pub async fn results(
        &self,
        date: NaiveDate,
        slot_index: Option<u8>,
    ) -> std::result::Result<Vec<StoredResult>, EngineError> {
        let repo = self.repo.lock().await;
        match slot_index {
            Some(index) => {
                let result = repo
                    .get_result(date, index)
                    .map_err(EngineError::Internal)?
                    .ok_or_else(|| {
                        EngineError::not_found(format!("result for {} slot {}", date, index))
                    })?;
                Ok(vec![result])
            }
            None => repo.results_on(date).map_err(EngineError::Internal),
        }
    }

    /// A user's wager history, most recent first.
    pub async fn wager_history(&self, user_id: &str) -> Result<Vec<StoredWager>> {
        let repo = self.repo.lock().await;
        repo.wagers_for_user(user_id)
    }

    /// Current performance states (diagnostics and the odds CLI).
    pub async fn horse_states(&self) -> Result<Vec<HorseState>> {
        let repo = self.repo.lock().await;
        repo.all_states()
    }
}

/// Odds book for a slot from the given states.
fn book_for(
    states: &[HorseState],
    slot: &RaceSlot,
) -> std::result::Result<HashMap<u8, HorseOdds>, EngineError> {
    let conditions = RaceConditions::for_slot(slot.date, slot.index, slot.start.time());
    let mut field = Vec::with_capacity(states.len());
    for state in states {
        field.push((roster::horse(state.horse_id)?, state));
    }
    Ok(compute_odds(&field, &conditions))
}

fn map_ledger_error(e: LedgerError) -> EngineError {
    match e {
        LedgerError::InsufficientFunds { balance, required } => {
            EngineError::InsufficientFunds { balance, required }
        }
        LedgerError::Unavailable(msg) => EngineError::Ledger(msg),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScheduleConfig;
    use crate::ledger::InMemoryLedger;
    use crate::roster::Horse;
    use async_trait::async_trait;
    use chrono::NaiveTime;
    use rand_chacha::ChaCha8Rng;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()
    }

    fn before_first_slot() -> NaiveDateTime {
        date().and_time(NaiveTime::from_hms_opt(9, 0, 0).unwrap())
    }

    fn build_engine(ledger: Arc<dyn CoinLedger>) -> RaceEngine {
        let repo = Repository::in_memory().unwrap();
        let schedule = Schedule::from_config(&ScheduleConfig::default()).unwrap();
        RaceEngine::new(repo, schedule, ledger, BettingConfig::default(), 0, 2).unwrap()
    }

    /// Replay the simulation for a freshly seeded roster to learn what order
    /// the engine will produce for the same seed.
    fn expected_order(slot: &RaceSlot, seed: u64) -> Vec<u8> {
        let conditions = RaceConditions::for_slot(slot.date, slot.index, slot.start.time());
        let states: Vec<HorseState> = roster::all_horses()
            .iter()
            .map(HorseState::seed_from)
            .collect();
        let field: Vec<(&Horse, &HorseState)> = states
            .iter()
            .map(|s| (roster::horse(s.horse_id).unwrap(), s))
            .collect();
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        crate::simulate::simulate(&field, &conditions, &mut rng).finish_order()
    }

    #[tokio::test]
    async fn test_settlement_pays_winner_exactly_once() {
        let ledger = Arc::new(InMemoryLedger::new(1000));
        let engine = build_engine(ledger.clone());
        let slot = engine.schedule().slot(date(), 0).unwrap();

        let order = expected_order(&slot, 42);
        let winner = order[0];
        let tailender = *order.last().unwrap();

        let wager = engine
            .place_bet_at("alice", date(), 0, BetType::Win, &[winner], 50, before_first_slot())
            .await
            .unwrap();
        engine
            .place_bet_at("bob", date(), 0, BetType::Win, &[tailender], 50, before_first_slot())
            .await
            .unwrap();
        assert_eq!(ledger.balance("alice").await.unwrap(), 950);

        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let summary = engine.settle_slot(&slot, &mut rng).await.unwrap().unwrap();
        assert_eq!(summary.finish_order, order);
        assert_eq!(summary.wagers_settled, 2);
        assert_eq!(summary.wagers_won, 1);
        assert_eq!(summary.coins_paid, wager.potential_payout);

        assert_eq!(
            ledger.balance("alice").await.unwrap(),
            950 + wager.potential_payout
        );
        assert_eq!(ledger.balance("bob").await.unwrap(), 950);

        // Re-settling is a benign no-op: no extra coins move.
        let mut rng = ChaCha8Rng::seed_from_u64(99);
        assert!(engine.settle_slot(&slot, &mut rng).await.unwrap().is_none());
        assert_eq!(
            ledger.balance("alice").await.unwrap(),
            950 + wager.potential_payout
        );

        let history = engine.wager_history("alice").await.unwrap();
        assert_eq!(history[0].status, WagerStatus::Won);
        assert_eq!(history[0].paid_out, Some(wager.potential_payout));
    }

    #[tokio::test]
    async fn test_trifecta_wager_credited_exactly_once() {
        let ledger = Arc::new(InMemoryLedger::new(1000));
        let engine = build_engine(ledger.clone());
        let slot = engine.schedule().slot(date(), 3).unwrap();
        let order = expected_order(&slot, 7);

        // Pick the exact top three; placed before the 16:00 start.
        let placed_at = date().and_time(NaiveTime::from_hms_opt(15, 0, 0).unwrap());
        let wager = engine
            .place_bet_at("carol", date(), 3, BetType::Trifecta, &order[..3], 10, placed_at)
            .await
            .unwrap();

        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let summary = engine.settle_slot(&slot, &mut rng).await.unwrap().unwrap();
        assert_eq!(summary.wagers_won, 1);
        assert_eq!(
            ledger.balance("carol").await.unwrap(),
            990 + wager.potential_payout
        );

        // Reconciliation finds nothing outstanding and no second credit lands.
        assert_eq!(engine.reconcile_payouts().await.unwrap(), 0);
        assert_eq!(
            ledger.balance("carol").await.unwrap(),
            990 + wager.potential_payout
        );
    }

    #[tokio::test]
    async fn test_place_bet_rejections() {
        let ledger = Arc::new(InMemoryLedger::new(1000));
        let engine = build_engine(ledger.clone());
        let now = before_first_slot();

        // Window closed once the slot starts.
        let at_start = date().and_time(NaiveTime::from_hms_opt(10, 0, 0).unwrap());
        let err = engine
            .place_bet_at("alice", date(), 0, BetType::Win, &[3], 50, at_start)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        // Stake cap.
        let err = engine
            .place_bet_at("alice", date(), 0, BetType::Win, &[3], 501, now)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        // Unknown slot.
        let err = engine
            .place_bet_at("alice", date(), 9, BetType::Win, &[3], 50, now)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));

        // One wager per user per race.
        engine
            .place_bet_at("alice", date(), 0, BetType::Win, &[3], 50, now)
            .await
            .unwrap();
        let err = engine
            .place_bet_at("alice", date(), 0, BetType::Show, &[5], 20, now)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
        // The rejected duplicate did not take coins.
        assert_eq!(ledger.balance("alice").await.unwrap(), 950);
    }

    /// Ledger whose debit call takes a while to come back.
    struct SlowDebitLedger {
        inner: InMemoryLedger,
    }

    #[async_trait]
    impl CoinLedger for SlowDebitLedger {
        async fn credit(
            &self,
            user_id: &str,
            amount: i64,
            reference: &str,
            reason: &str,
        ) -> std::result::Result<(), LedgerError> {
            self.inner.credit(user_id, amount, reference, reason).await
        }

        async fn debit(
            &self,
            user_id: &str,
            amount: i64,
            reference: &str,
            reason: &str,
        ) -> std::result::Result<(), LedgerError> {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            self.inner.debit(user_id, amount, reference, reason).await
        }

        async fn balance(&self, user_id: &str) -> std::result::Result<i64, LedgerError> {
            self.inner.balance(user_id).await
        }
    }

    #[tokio::test]
    async fn test_concurrent_duplicate_bets_take_one_stake() {
        let ledger = Arc::new(SlowDebitLedger {
            inner: InMemoryLedger::new(1000),
        });
        let engine = build_engine(ledger.clone());
        let now = before_first_slot();

        // Two racing placements by the same user. Exactly one wager may
        // stand, and exactly one stake may leave the ledger; the stalled
        // debit must not let the loser slip past the duplicate check.
        let (a, b) = tokio::join!(
            engine.place_bet_at("alice", date(), 0, BetType::Win, &[3], 50, now),
            engine.place_bet_at("alice", date(), 0, BetType::Win, &[4], 50, now),
        );
        assert!(a.is_ok() != b.is_ok());
        let err = if a.is_ok() { b.unwrap_err() } else { a.unwrap_err() };
        assert!(matches!(err, EngineError::Conflict(_)));

        assert_eq!(ledger.balance("alice").await.unwrap(), 950);
        assert_eq!(engine.wager_history("alice").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_place_bet_insufficient_funds() {
        let ledger = Arc::new(InMemoryLedger::new(10));
        let engine = build_engine(ledger.clone());

        let err = engine
            .place_bet_at("poor", date(), 0, BetType::Win, &[3], 50, before_first_slot())
            .await
            .unwrap_err();
        match err {
            EngineError::InsufficientFunds { balance, required } => {
                assert_eq!(balance, 10);
                assert_eq!(required, 50);
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(ledger.balance("poor").await.unwrap(), 10);
    }

    /// Ledger that accepts stakes but never confirms a credit.
    struct CreditlessLedger;

    #[async_trait]
    impl CoinLedger for CreditlessLedger {
        async fn credit(
            &self,
            _user_id: &str,
            _amount: i64,
            _reference: &str,
            _reason: &str,
        ) -> std::result::Result<(), LedgerError> {
            Err(LedgerError::Unavailable("credit endpoint down".into()))
        }

        async fn debit(
            &self,
            _user_id: &str,
            _amount: i64,
            _reference: &str,
            _reason: &str,
        ) -> std::result::Result<(), LedgerError> {
            Ok(())
        }

        async fn balance(&self, _user_id: &str) -> std::result::Result<i64, LedgerError> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_failed_payout_left_for_reconciliation() {
        let engine = build_engine(Arc::new(CreditlessLedger));
        let slot = engine.schedule().slot(date(), 0).unwrap();
        let order = expected_order(&slot, 42);

        engine
            .place_bet_at("alice", date(), 0, BetType::Win, &[order[0]], 50, before_first_slot())
            .await
            .unwrap();

        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let summary = engine.settle_slot(&slot, &mut rng).await.unwrap().unwrap();
        assert_eq!(summary.wagers_won, 1);
        assert_eq!(summary.coins_paid, 0);

        // The wager settled as won but its credit is unconfirmed.
        let history = engine.wager_history("alice").await.unwrap();
        assert_eq!(history[0].status, WagerStatus::Won);
        assert_eq!(history[0].paid_out, None);
    }

    /// Ledger whose credit endpoint fails a set number of times, then heals.
    struct FlakyLedger {
        inner: InMemoryLedger,
        failures_left: std::sync::atomic::AtomicU32,
    }

    #[async_trait]
    impl CoinLedger for FlakyLedger {
        async fn credit(
            &self,
            user_id: &str,
            amount: i64,
            reference: &str,
            reason: &str,
        ) -> std::result::Result<(), LedgerError> {
            use std::sync::atomic::Ordering;
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(LedgerError::Unavailable("credit endpoint down".into()));
            }
            self.inner.credit(user_id, amount, reference, reason).await
        }

        async fn debit(
            &self,
            user_id: &str,
            amount: i64,
            reference: &str,
            reason: &str,
        ) -> std::result::Result<(), LedgerError> {
            self.inner.debit(user_id, amount, reference, reason).await
        }

        async fn balance(&self, user_id: &str) -> std::result::Result<i64, LedgerError> {
            self.inner.balance(user_id).await
        }
    }

    #[tokio::test]
    async fn test_reconcile_pays_out_once_ledger_heals() {
        let ledger = Arc::new(FlakyLedger {
            inner: InMemoryLedger::new(1000),
            failures_left: std::sync::atomic::AtomicU32::new(1),
        });
        let engine = build_engine(ledger.clone());
        let slot = engine.schedule().slot(date(), 0).unwrap();
        let order = expected_order(&slot, 42);

        let wager = engine
            .place_bet_at("alice", date(), 0, BetType::Win, &[order[0]], 50, before_first_slot())
            .await
            .unwrap();

        // First credit attempt fails; the wager is left won and unpaid.
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let summary = engine.settle_slot(&slot, &mut rng).await.unwrap().unwrap();
        assert_eq!(summary.coins_paid, 0);

        // The ledger has healed; reconciliation drives the credit through.
        assert_eq!(engine.reconcile_payouts().await.unwrap(), 1);
        assert_eq!(
            ledger.balance("alice").await.unwrap(),
            950 + wager.potential_payout
        );
        let history = engine.wager_history("alice").await.unwrap();
        assert_eq!(history[0].paid_out, Some(wager.potential_payout));

        // Nothing left to reconcile.
        assert_eq!(engine.reconcile_payouts().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_daily_recovery_after_racing() {
        let engine = build_engine(Arc::new(InMemoryLedger::new(1000)));
        let slot = engine.schedule().slot(date(), 0).unwrap();

        let mut rng = ChaCha8Rng::seed_from_u64(5);
        engine.settle_slot(&slot, &mut rng).await.unwrap().unwrap();

        // Same day: nobody recovers.
        assert_eq!(engine.recovery_at(date()).await.unwrap(), 0);

        // Next day: every horse raced and carries fatigue, so all recover.
        let tomorrow = date() + chrono::Days::new(1);
        assert_eq!(engine.recovery_at(tomorrow).await.unwrap(), 10);

        // Each horse gained 3..=8 fatigue from the race and shed 5.
        let total_fatigue: i32 = engine
            .horse_states()
            .await
            .unwrap()
            .iter()
            .map(|s| s.fatigue_level)
            .sum();
        assert!(total_fatigue <= 30);
    }

    #[tokio::test]
    async fn test_recovery_applies_once_per_day() {
        let engine = build_engine(Arc::new(InMemoryLedger::new(1000)));
        let slot = engine.schedule().slot(date(), 0).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        engine.settle_slot(&slot, &mut rng).await.unwrap().unwrap();

        let tomorrow = date() + chrono::Days::new(1);
        assert_eq!(engine.recovery_at(tomorrow).await.unwrap(), 10);
        let after_first: i32 = engine
            .horse_states()
            .await
            .unwrap()
            .iter()
            .map(|s| s.fatigue_level)
            .sum();

        // A second run on the same day (restarted process, repeated admin
        // call) must not shed more fatigue.
        assert_eq!(engine.recovery_at(tomorrow).await.unwrap(), 0);
        let after_second: i32 = engine
            .horse_states()
            .await
            .unwrap()
            .iter()
            .map(|s| s.fatigue_level)
            .sum();
        assert_eq!(after_second, after_first);
    }

    #[tokio::test]
    async fn test_tick_settles_wagers_beyond_the_lookback_window() {
        let ledger = Arc::new(InMemoryLedger::new(1000));
        let engine = build_engine(ledger.clone());

        // A bet placed five days ago, then the service sleeps through its
        // two-day scan window.
        let old_date = date() - chrono::Days::new(5);
        let placed_at = old_date.and_time(NaiveTime::from_hms_opt(9, 0, 0).unwrap());
        engine
            .place_bet_at("alice", old_date, 0, BetType::Win, &[3], 50, placed_at)
            .await
            .unwrap();
        assert_eq!(ledger.balance("alice").await.unwrap(), 950);

        engine.tick_at(before_first_slot()).await.unwrap();

        // The stale slot got claimed and the wager resolved anyway.
        assert_eq!(engine.results(old_date, Some(0)).await.unwrap().len(), 1);
        let history = engine.wager_history("alice").await.unwrap();
        assert_ne!(history[0].status, WagerStatus::Pending);
    }

    #[tokio::test]
    async fn test_tick_settles_all_elapsed_slots() {
        let engine = build_engine(Arc::new(InMemoryLedger::new(1000)));

        // 14:30: three of today's slots have ended, none settled yet.
        let now = date().and_time(NaiveTime::from_hms_opt(14, 30, 0).unwrap());
        // Three of today's plus six on each of the two lookback days.
        let settled = engine.tick_at(now).await.unwrap();
        assert_eq!(settled.len(), 15);
        assert!(settled.iter().any(|s| s.date == date() && s.slot_index == 2));

        // Everything is claimed now; the next tick is a no-op.
        assert!(engine.tick_at(now).await.unwrap().is_empty());

        let results = engine.results(date(), None).await.unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].entries.len(), 10);
    }

    #[tokio::test]
    async fn test_current_race_reports_live_then_upcoming() {
        let engine = build_engine(Arc::new(InMemoryLedger::new(1000)));

        let mid_race = date().and_time(NaiveTime::from_hms_opt(10, 0, 30).unwrap());
        match engine.current_race(mid_race).await.unwrap() {
            RacePhase::Live {
                slot,
                remaining_secs,
                odds,
            } => {
                assert_eq!(slot.index, 0);
                assert_eq!(remaining_secs, 30);
                assert_eq!(odds.len(), 10);
            }
            RacePhase::Upcoming { .. } => panic!("expected a live race"),
        }

        let between = date().and_time(NaiveTime::from_hms_opt(11, 0, 0).unwrap());
        match engine.current_race(between).await.unwrap() {
            RacePhase::Upcoming {
                slot,
                starts_in_secs,
                odds,
            } => {
                assert_eq!(slot.index, 1);
                assert_eq!(starts_in_secs, 3600);
                assert_eq!(odds.len(), 10);
            }
            RacePhase::Live { .. } => panic!("expected an upcoming race"),
        }
    }

    #[tokio::test]
    async fn test_bet_rejected_after_settlement() {
        let engine = build_engine(Arc::new(InMemoryLedger::new(1000)));
        let slot = engine.schedule().slot(date(), 0).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        engine.settle_slot(&slot, &mut rng).await.unwrap().unwrap();

        // Even with a clock before the start, a settled race takes no bets.
        let err = engine
            .place_bet_at("late", date(), 0, BetType::Win, &[1], 10, before_first_slot())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }
}
