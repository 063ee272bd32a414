//! Cooldown arbitration for viewer commands
//!
//! Two clocks: one global, one per requester. Both only move when a
//! command is accepted, so rejected requests never extend a wait.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CooldownKind {
    Global,
    Personal,
}

impl fmt::Display for CooldownKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Global => "global",
            Self::Personal => "personal",
        })
    }
}

/// Why a request was turned away, and for how long
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownRejection {
    pub kind: CooldownKind,
    pub remaining: Duration,
}

impl CooldownRejection {
    /// Remaining wait in whole seconds, rounded up
    pub fn remaining_secs(&self) -> u64 {
        ceil_secs(self.remaining)
    }
}

/// Whole seconds, rounded up, so a wait never reads as 0 while it lasts
pub fn ceil_secs(duration: Duration) -> u64 {
    duration.as_secs() + u64::from(duration.subsec_nanos() > 0)
}

/// Chat roles of a requester
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Privileges {
    pub moderator: bool,
    pub vip: bool,
    pub subscriber: bool,
}

/// Which roles skip every cooldown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BypassPolicy {
    pub moderator: bool,
    pub vip: bool,
    pub subscriber: bool,
}

impl Default for BypassPolicy {
    fn default() -> Self {
        Self {
            moderator: true,
            vip: true,
            subscriber: true,
        }
    }
}

impl BypassPolicy {
    pub fn allows(&self, who: &Privileges) -> bool {
        (self.moderator && who.moderator)
            || (self.vip && who.vip)
            || (self.subscriber && who.subscriber)
    }
}

/// Timestamps of the last accepted commands
#[derive(Debug, Default)]
pub struct CooldownState {
    last_global: Option<Instant>,
    per_user: HashMap<String, Instant>,
}

fn remaining(last: Option<Instant>, interval: Duration, now: Instant) -> Option<Duration> {
    let elapsed = now.saturating_duration_since(last?);
    (elapsed < interval).then(|| interval - elapsed)
}

impl CooldownState {
    pub fn check_global(&self, interval: Duration, now: Instant) -> Result<(), CooldownRejection> {
        match remaining(self.last_global, interval, now) {
            Some(remaining) => Err(CooldownRejection {
                kind: CooldownKind::Global,
                remaining,
            }),
            None => Ok(()),
        }
    }

    pub fn check_user(
        &self,
        requester: &str,
        interval: Duration,
        now: Instant,
    ) -> Result<(), CooldownRejection> {
        match remaining(self.per_user.get(requester).copied(), interval, now) {
            Some(remaining) => Err(CooldownRejection {
                kind: CooldownKind::Personal,
                remaining,
            }),
            None => Ok(()),
        }
    }

    pub fn record(&mut self, requester: &str, now: Instant) {
        self.last_global = Some(now);
        self.per_user.insert(requester.to_string(), now);
    }

    pub fn reset(&mut self) {
        self.last_global = None;
        self.per_user.clear();
    }
}

/// Cooldown intervals and bypass policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownPolicy {
    pub global: Duration,
    pub user: Duration,
    pub bypass: BypassPolicy,
}

pub struct CooldownManager {
    policy: RwLock<CooldownPolicy>,
    state: RwLock<CooldownState>,
}

impl CooldownManager {
    pub fn new(policy: CooldownPolicy) -> Self {
        Self {
            policy: RwLock::new(policy),
            state: RwLock::new(CooldownState::default()),
        }
    }

    pub fn set_policy(&self, policy: CooldownPolicy) {
        *self.policy.write() = policy;
    }

    /// Bypass first, then the global clock, then the requester's own
    pub fn check(&self, requester: &str, privileges: &Privileges) -> Result<(), CooldownRejection> {
        let policy = *self.policy.read();
        if policy.bypass.allows(privileges) {
            return Ok(());
        }
        let now = Instant::now();
        let state = self.state.read();
        state.check_global(policy.global, now)?;
        state.check_user(requester, policy.user, now)
    }

    pub fn record(&self, requester: &str) {
        self.state.write().record(requester, Instant::now());
    }

    pub fn reset(&self) {
        self.state.write().reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> CooldownPolicy {
        CooldownPolicy {
            global: Duration::from_secs(5),
            user: Duration::from_secs(30),
            bypass: BypassPolicy::default(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_user_cooldown_after_accept() {
        let mgr = CooldownManager::new(policy());
        let nobody = Privileges::default();

        mgr.check("u", &nobody).unwrap();
        mgr.record("u");

        tokio::time::advance(Duration::from_secs(10)).await;
        let rejection = mgr.check("u", &nobody).unwrap_err();
        assert_eq!(rejection.kind, CooldownKind::Personal);
        assert_eq!(rejection.remaining, Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_global_cooldown_applies_to_other_users() {
        let mgr = CooldownManager::new(policy());
        let nobody = Privileges::default();
        mgr.record("u");

        tokio::time::advance(Duration::from_secs(2)).await;
        let rejection = mgr.check("v", &nobody).unwrap_err();
        assert_eq!(rejection.kind, CooldownKind::Global);
        assert_eq!(rejection.remaining, Duration::from_secs(3));

        tokio::time::advance(Duration::from_secs(3)).await;
        mgr.check("v", &nobody).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_does_not_extend_wait() {
        let mgr = CooldownManager::new(policy());
        let nobody = Privileges::default();
        mgr.record("u");

        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(mgr.check("u", &nobody).is_err());
        tokio::time::advance(Duration::from_secs(1)).await;
        // Global clear, personal still running
        let rejection = mgr.check("u", &nobody).unwrap_err();
        assert_eq!(rejection.kind, CooldownKind::Personal);
        assert_eq!(rejection.remaining, Duration::from_secs(25));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bypass() {
        let mgr = CooldownManager::new(policy());
        mgr.record("u");
        let vip = Privileges {
            vip: true,
            ..Default::default()
        };
        mgr.check("u", &vip).unwrap();

        mgr.set_policy(CooldownPolicy {
            bypass: BypassPolicy {
                vip: false,
                ..BypassPolicy::default()
            },
            ..policy()
        });
        assert!(mgr.check("u", &vip).is_err());
    }

    #[test]
    fn test_zero_interval_always_passes() {
        let mut state = CooldownState::default();
        let now = Instant::now();
        state.record("u", now);
        state.check_global(Duration::ZERO, now).unwrap();
        state.check_user("u", Duration::ZERO, now).unwrap();
    }

    #[test]
    fn test_remaining_rounds_up() {
        let r = CooldownRejection {
            kind: CooldownKind::Global,
            remaining: Duration::from_millis(2100),
        };
        assert_eq!(r.remaining_secs(), 3);
        assert_eq!(r.kind.to_string(), "global");
    }

    #[test]
    fn test_ceil_secs() {
        assert_eq!(ceil_secs(Duration::ZERO), 0);
        assert_eq!(ceil_secs(Duration::from_secs(4)), 4);
        assert_eq!(ceil_secs(Duration::from_nanos(1)), 1);
        assert_eq!(ceil_secs(Duration::from_millis(4001)), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_clears_both_clocks() {
        let mgr = CooldownManager::new(policy());
        let nobody = Privileges::default();
        mgr.record("u");
        assert!(mgr.check("u", &nobody).is_err());

        mgr.reset();
        mgr.check("u", &nobody).unwrap();
        mgr.check("v", &nobody).unwrap();
    }
}
