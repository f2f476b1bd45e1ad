//! Send-admission orchestration across the account and fleet tiers.

use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

use crate::error::{Result, SendgateError};

use super::account::{AccountLimiter, AccountStats};
use super::global::{GlobalLimiter, GlobalStats};
use super::AccountId;

/// Admission gate for an outbound-messaging fleet.
///
/// Holds one [`AccountLimiter`] per configured sending account plus an
/// optional fleet-wide [`GlobalLimiter`]. Callers complete a two-step
/// handshake before every send (a rate token, then a concurrency slot)
/// and release the slot exactly once afterward. Every operation is
/// non-blocking: a `false` answer means "not now", never an error.
///
/// Lock ordering: any path that touches both tiers takes the global lock
/// before any account lock, never the reverse. That fixed order is the
/// sole deadlock guard between concurrent calls on different accounts.
pub struct Throttler {
    /// Per-account limiters, keyed by account id
    accounts: DashMap<AccountId, Arc<AccountLimiter>>,
    /// Optional fleet-wide limiter; absent means the global tier admits
    global: RwLock<Option<Arc<GlobalLimiter>>>,
}

impl Throttler {
    /// Create a throttler with no accounts and no global limiter.
    pub fn new() -> Self {
        Self {
            accounts: DashMap::new(),
            global: RwLock::new(None),
        }
    }

    /// Create or replace the limiter for `account_id`.
    ///
    /// Replacing resets all three windows and the concurrency gate to
    /// empty; permits still held against the old limiter are orphaned and
    /// the holder's release becomes a logged no-op. Zero limits are
    /// rejected and leave any existing limiter untouched.
    pub fn configure_account(
        &self,
        account_id: AccountId,
        per_minute: usize,
        per_hour: usize,
        per_day: usize,
        max_concurrency: usize,
    ) -> Result<()> {
        if per_minute == 0 || per_hour == 0 || per_day == 0 {
            return Err(SendgateError::InvalidConfiguration(format!(
                "account {account_id}: rate limits must be positive \
                 (per_minute={per_minute}, per_hour={per_hour}, per_day={per_day})"
            )));
        }
        if max_concurrency == 0 {
            return Err(SendgateError::InvalidConfiguration(format!(
                "account {account_id}: max_concurrency must be positive"
            )));
        }

        debug!(
            account_id,
            per_minute, per_hour, per_day, max_concurrency, "Configuring account limiter"
        );
        self.accounts.insert(
            account_id,
            Arc::new(AccountLimiter::new(
                account_id,
                per_minute,
                per_hour,
                per_day,
                max_concurrency,
            )),
        );
        Ok(())
    }

    /// Create or replace the fleet-wide limiter.
    ///
    /// Zero capacity, a zero-length window, and zero concurrency are
    /// rejected, leaving any existing global limiter untouched.
    pub fn configure_global(
        &self,
        rate_capacity: usize,
        window: Duration,
        max_concurrency: usize,
    ) -> Result<()> {
        if rate_capacity == 0 {
            return Err(SendgateError::InvalidConfiguration(
                "global rate_capacity must be positive".to_string(),
            ));
        }
        if window.is_zero() {
            return Err(SendgateError::InvalidConfiguration(
                "global window must be positive".to_string(),
            ));
        }
        if max_concurrency == 0 {
            return Err(SendgateError::InvalidConfiguration(
                "global max_concurrency must be positive".to_string(),
            ));
        }

        debug!(
            rate_capacity,
            window_secs = window.as_secs(),
            max_concurrency,
            "Configuring global limiter"
        );
        *self.global.write() = Some(Arc::new(GlobalLimiter::new(
            rate_capacity,
            window,
            max_concurrency,
        )));
        Ok(())
    }

    /// Acquire a rate token for one send attempt.
    ///
    /// Checks the global window first, then the account's three windows.
    /// The decision is atomic across both tiers: a global denial records
    /// nothing anywhere, and on admission all four timestamps commit
    /// together under the global window lock.
    pub fn try_acquire_send_token(&self, account_id: AccountId) -> bool {
        self.try_acquire_send_token_at(account_id, Instant::now())
    }

    pub(crate) fn try_acquire_send_token_at(&self, account_id: AccountId, now: Instant) -> bool {
        let Some(account) = self.account(account_id) else {
            debug!(account_id, "Send token requested for unconfigured account");
            return false;
        };

        match self.global() {
            Some(global) => {
                // Global lock first, held across the account commit.
                let mut window = global.window.lock();
                if !window.has_capacity_at(now) {
                    trace!(account_id, "Global rate window full");
                    return false;
                }
                if account.try_rate_at(now) {
                    window.record_at(now);
                    true
                } else {
                    false
                }
            }
            None => account.try_rate_at(now),
        }
    }

    /// Acquire a concurrency slot for one in-flight send.
    ///
    /// Takes the global gate first, then the account's; if the account
    /// denies, the fleet-wide permit is handed back before returning so no
    /// partial acquisition leaks.
    pub fn try_acquire_concurrency_slot(&self, account_id: AccountId) -> bool {
        let Some(account) = self.account(account_id) else {
            debug!(
                account_id,
                "Concurrency slot requested for unconfigured account"
            );
            return false;
        };

        match self.global() {
            Some(global) => {
                if !global.try_concurrency() {
                    trace!(account_id, "Global concurrency gate exhausted");
                    return false;
                }
                if account.try_concurrency() {
                    true
                } else {
                    global.release_concurrency();
                    trace!(account_id, "Account concurrency gate exhausted");
                    false
                }
            }
            None => account.try_concurrency(),
        }
    }

    /// Release a concurrency slot taken with
    /// [`try_acquire_concurrency_slot`](Self::try_acquire_concurrency_slot).
    ///
    /// Must be called exactly once per successful acquisition, whether the
    /// send itself succeeded or failed. Unmatched releases never drive a
    /// gate negative; they are logged no-ops.
    pub fn release_concurrency_slot(&self, account_id: AccountId) {
        let Some(account) = self.account(account_id) else {
            warn!(account_id, "Concurrency release for unconfigured account");
            return;
        };

        account.release_concurrency();
        if let Some(global) = self.global() {
            global.release_concurrency();
        }
    }

    /// Stats snapshot for one account, or `None` if it is not configured.
    pub fn account_stats(&self, account_id: AccountId) -> Option<AccountStats> {
        self.account(account_id).map(|account| account.stats())
    }

    /// Stats snapshot for the fleet-wide limiter, or `None` if absent.
    pub fn global_stats(&self) -> Option<GlobalStats> {
        self.global().map(|global| global.stats())
    }

    /// Remove the limiter for `account_id` entirely.
    ///
    /// A fresh limiter is created on the next `configure_account`. Permits
    /// still held against the removed limiter are orphaned.
    pub fn reset_account(&self, account_id: AccountId) {
        if self.accounts.remove(&account_id).is_some() {
            debug!(account_id, "Removed account limiter");
        }
    }

    /// Clear every account limiter and the global limiter.
    pub fn reset_all(&self) {
        self.accounts.clear();
        *self.global.write() = None;
        debug!("Cleared all limiters");
    }

    /// Remove limiters that have not admitted a send for longer than
    /// `max_idle`, returning how many were removed.
    ///
    /// A limiter that never admitted anything counts as idle. Bounds
    /// registry growth in fleets where accounts come and go; carries the
    /// same orphaned-permit caveat as [`reset_account`](Self::reset_account).
    pub fn prune_idle(&self, max_idle: Duration) -> usize {
        let delta = match chrono::Duration::from_std(max_idle) {
            Ok(delta) => delta,
            Err(_) => return 0,
        };
        let Some(cutoff) = chrono::Utc::now().checked_sub_signed(delta) else {
            return 0;
        };

        let mut removed = 0;
        self.accounts.retain(|account_id, limiter| {
            let idle = match limiter.last_activity() {
                Some(stamp) => stamp < cutoff,
                None => true,
            };
            if idle {
                debug!(account_id, "Pruning idle account limiter");
                removed += 1;
            }
            !idle
        });
        removed
    }

    /// Ids of every configured account.
    pub fn account_ids(&self) -> Vec<AccountId> {
        self.accounts.iter().map(|entry| *entry.key()).collect()
    }

    /// Number of configured accounts.
    pub fn account_count(&self) -> usize {
        self.accounts.len()
    }

    /// Clone the account's limiter out of the registry, dropping the shard
    /// guard before any limiter lock is taken.
    fn account(&self, account_id: AccountId) -> Option<Arc<AccountLimiter>> {
        self.accounts
            .get(&account_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    fn global(&self) -> Option<Arc<GlobalLimiter>> {
        self.global.read().clone()
    }
}

impl Default for Throttler {
    fn default() -> Self {
        Self::new()
    }
}
