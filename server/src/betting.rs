//! Betting window and settlement
//!
//! The [`BettingCoordinator`] owns the single "current race" slot. The
//! scheduler worker moves it through open, close and settle by publishing
//! race events, while any number of connection tasks call
//! [`BettingCoordinator::place_bet`] concurrently.
//!
//! All state changes happen under one mutex, and the balance debit or credit
//! is written to storage inside the same critical section as the ledger
//! change. A bet is therefore never recorded without its debit, and no bet
//! is accepted once the close for its race has been applied.

use crate::error::BetError;
use crate::race::{RaceEvent, RaceListener, RaceRef};
use crate::racer::Racer;
use crate::repository::{BetRepository, UserRepository};
use log::{debug, error, info, warn};
use shared::{BetDto, WindowDto};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bet {
    pub id: u64,
    pub race_id: u64,
    pub race_name: String,
    pub racer_id: u32,
    pub username: String,
    pub amount: u64,
    /// Set during settlement
    pub winning: bool,
}

impl Bet {
    pub fn to_dto(&self) -> BetDto {
        BetDto {
            id: self.id,
            race_id: self.race_id,
            race_name: self.race_name.clone(),
            racer_id: self.racer_id,
            username: self.username.clone(),
            amount: self.amount,
            winning: self.winning,
        }
    }
}

/// Outcome of settling one race
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettlementReport {
    pub race_id: u64,
    pub winner: Option<u32>,
    pub settled_bets: usize,
    pub winning_bets: usize,
    pub total_paid: u64,
    pub failures: usize,
}

#[derive(Debug, Default)]
struct BettingWindow {
    current: Option<RaceRef>,
    open: bool,
    ledger: Vec<Bet>,
    next_bet_id: u64,
}

pub struct BettingCoordinator {
    window: Mutex<BettingWindow>,
    users: Arc<dyn UserRepository>,
    bets: Arc<dyn BetRepository>,
    payout_multiplier: u64,
}

impl BettingCoordinator {
    pub fn new(
        users: Arc<dyn UserRepository>,
        bets: Arc<dyn BetRepository>,
        payout_multiplier: u64,
    ) -> Self {
        Self {
            window: Mutex::new(BettingWindow::default()),
            users,
            bets,
            payout_multiplier,
        }
    }

    // The window holds plain data, so a poisoned guard is still consistent.
    fn lock(&self) -> MutexGuard<'_, BettingWindow> {
        self.window
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Makes `race` the current race and starts accepting bets on it.
    pub fn open_window(&self, race: RaceRef) {
        let mut window = self.lock();
        if !window.ledger.is_empty() {
            warn!(
                "Opening window for {} with {} unsettled bet(s) from {:?}; discarding",
                race.name,
                window.ledger.len(),
                window.current.as_ref().map(|r| r.name.as_str())
            );
        }
        info!("Betting open for race {}", race.name);
        window.ledger.clear();
        window.current = Some(race);
        window.open = true;
    }

    /// Stops accepting bets, if `race_id` is still the current race.
    pub fn close_window(&self, race_id: u64) -> bool {
        let mut window = self.lock();
        match &window.current {
            Some(current) if current.id == race_id => {
                info!(
                    "Betting closed for race {} with {} bet(s)",
                    current.name,
                    window.ledger.len()
                );
                window.open = false;
                true
            }
            _ => {
                debug!("Ignoring close for stale race {}", race_id);
                false
            }
        }
    }

    /// Places a bet on the current race.
    ///
    /// When `race_name` is given it must name the current race.
    pub fn place_bet(
        &self,
        username: &str,
        racer_id: u32,
        amount: u64,
        race_name: Option<&str>,
    ) -> Result<Bet, BetError> {
        if amount == 0 {
            return Err(BetError::InvalidAmount);
        }

        let mut window = self.lock();

        let race = match (&window.current, window.open) {
            (Some(race), true) => race.clone(),
            _ => return Err(BetError::BettingClosed),
        };
        if let Some(requested) = race_name {
            if requested != race.name {
                return Err(BetError::WrongRace(requested.to_string()));
            }
        }

        let user = self
            .users
            .read_user_by_username(username)?
            .ok_or_else(|| BetError::UnknownUser(username.to_string()))?;
        if !race.racer_ids.contains(&racer_id) {
            return Err(BetError::UnknownRacer(racer_id));
        }
        if amount > user.balance {
            return Err(BetError::InsufficientBalance {
                requested: amount,
                available: user.balance,
            });
        }

        let bet = Bet {
            id: window.next_bet_id + 1,
            race_id: race.id,
            race_name: race.name.clone(),
            racer_id,
            username: user.username.clone(),
            amount,
            winning: false,
        };

        self.users
            .update_user_balance(&user.username, user.balance - amount)?;
        if let Err(e) = self.bets.create_bet(&bet) {
            if let Err(revert) = self.users.update_user_balance(&user.username, user.balance) {
                error!(
                    "Failed to restore balance of {} after bet failure: {}",
                    user.username, revert
                );
            }
            return Err(e.into());
        }

        window.next_bet_id = bet.id;
        window.ledger.push(bet.clone());
        info!(
            "{} bet {} on racer {} in {}",
            bet.username, bet.amount, bet.racer_id, bet.race_name
        );
        Ok(bet)
    }

    /// Pays out the current race. The winner is the first racer in `final_order`.
    pub fn settle(&self, race_id: u64, final_order: &[Racer]) -> Option<SettlementReport> {
        let mut window = self.lock();
        let race = match &window.current {
            Some(current) if current.id == race_id => current.clone(),
            _ => {
                warn!("Ignoring settlement for stale race {}", race_id);
                return None;
            }
        };

        let winner = final_order.first().map(|r| r.id);
        let mut report = SettlementReport {
            race_id,
            winner,
            ..SettlementReport::default()
        };

        let ledger = std::mem::take(&mut window.ledger);
        for mut bet in ledger {
            bet.winning = Some(bet.racer_id) == winner;
            report.settled_bets += 1;

            if bet.winning {
                let payout = bet.amount.saturating_mul(self.payout_multiplier);
                match self.credit(&bet.username, payout) {
                    Ok(()) => {
                        report.winning_bets += 1;
                        report.total_paid += payout;
                    }
                    Err(e) => {
                        error!("Failed to pay {} to {}: {}", payout, bet.username, e);
                        report.failures += 1;
                    }
                }
            }

            if let Err(e) = self.bets.update_bet(&bet) {
                error!("Failed to record outcome of bet {}: {}", bet.id, e);
                report.failures += 1;
            }
        }

        window.current = None;
        window.open = false;

        info!(
            "Settled race {}: winner {:?}, {} bet(s), {} winning, {} paid",
            race.name, winner, report.settled_bets, report.winning_bets, report.total_paid
        );
        Some(report)
    }

    /// Refunds every open bet of a race that failed to finish.
    pub fn abort(&self, race_id: u64) -> usize {
        let mut window = self.lock();
        match &window.current {
            Some(current) if current.id == race_id => {}
            _ => return 0,
        }

        let ledger = std::mem::take(&mut window.ledger);
        let mut refunded = 0;
        for bet in ledger {
            match self.credit(&bet.username, bet.amount) {
                Ok(()) => refunded += 1,
                Err(e) => error!("Failed to refund bet {} to {}: {}", bet.id, bet.username, e),
            }
        }

        window.current = None;
        window.open = false;
        warn!("Race {} aborted, refunded {} bet(s)", race_id, refunded);
        refunded
    }

    fn credit(&self, username: &str, amount: u64) -> Result<(), BetError> {
        let user = self
            .users
            .read_user_by_username(username)?
            .ok_or_else(|| BetError::UnknownUser(username.to_string()))?;
        self.users
            .update_user_balance(username, user.balance.saturating_add(amount))?;
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.lock().open
    }

    pub fn current_race(&self) -> Option<RaceRef> {
        self.lock().current.clone()
    }

    pub fn open_bets(&self) -> Vec<Bet> {
        self.lock().ledger.clone()
    }

    pub fn snapshot(&self) -> WindowDto {
        let window = self.lock();
        WindowDto {
            race_name: window.current.as_ref().map(|r| r.name.clone()),
            open: window.open,
            open_bets: window.ledger.len(),
        }
    }
}

impl RaceListener for BettingCoordinator {
    fn on_race_event(&self, event: &RaceEvent) {
        match event {
            RaceEvent::Scheduled(race) => self.open_window(race.clone()),
            RaceEvent::Started { race_id, .. } => {
                self.close_window(*race_id);
            }
            RaceEvent::Finished {
                race_id,
                final_order,
                ..
            } => {
                self.settle(*race_id, final_order);
            }
            RaceEvent::Aborted { race_id, .. } => {
                self.abort(*race_id);
            }
            RaceEvent::RacerFinished { .. } => {}
        }
    }
}
