//! Progressive lockout policy for brute-force protection
//!
//! The lockout durations increase with cumulative failed attempts:
//!
//! - 0-2 failures: No lockout (allow typos)
//! - 3-4 failures: 1 minute lockout
//! - 5-9 failures: 5 minute lockout
//! - 10+ failures: 30 minute lockout
//!
//! Thresholds are inclusive: the failure that brings the count to 3 is the
//! one that locks.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{GuardError, Result};

/// A single lockout rule: at `min_failed_count` failures or more, lock for
/// `duration`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockoutTier {
    /// Inclusive failure count at which this tier applies
    pub min_failed_count: u32,
    /// Lockout length
    #[serde(rename = "duration_secs", with = "duration_secs")]
    pub duration: Duration,
}

impl LockoutTier {
    pub const fn new(min_failed_count: u32, duration: Duration) -> Self {
        Self {
            min_failed_count,
            duration,
        }
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

/// Lockout policy for failed PIN attempts
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<LockoutTier>", into = "Vec<LockoutTier>")]
pub struct LockoutPolicy {
    /// Tiers sorted by ascending threshold
    tiers: Vec<LockoutTier>,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            tiers: vec![
                LockoutTier::new(3, Duration::from_secs(60)),
                LockoutTier::new(5, Duration::from_secs(5 * 60)),
                LockoutTier::new(10, Duration::from_secs(30 * 60)),
            ],
        }
    }
}

impl TryFrom<Vec<LockoutTier>> for LockoutPolicy {
    type Error = GuardError;

    fn try_from(tiers: Vec<LockoutTier>) -> Result<Self> {
        Self::custom(tiers)
    }
}

impl From<LockoutPolicy> for Vec<LockoutTier> {
    fn from(policy: LockoutPolicy) -> Self {
        policy.tiers
    }
}

impl LockoutPolicy {
    /// Create a custom lockout policy
    ///
    /// Thresholds must be at least 1 and strictly increasing, and durations
    /// must be non-zero and must not shrink as the threshold grows.
    pub fn custom(tiers: Vec<LockoutTier>) -> Result<Self> {
        if tiers.is_empty() {
            return Err(GuardError::InvalidPolicy("no tiers".to_string()));
        }
        if tiers[0].min_failed_count == 0 {
            return Err(GuardError::InvalidPolicy(
                "threshold 0 would lock before any failure".to_string(),
            ));
        }
        if tiers[0].duration.is_zero() {
            return Err(GuardError::InvalidPolicy(format!(
                "tier {} has no duration",
                tiers[0].min_failed_count
            )));
        }
        for pair in tiers.windows(2) {
            if pair[1].min_failed_count <= pair[0].min_failed_count {
                return Err(GuardError::InvalidPolicy(format!(
                    "threshold {} does not follow {}",
                    pair[1].min_failed_count, pair[0].min_failed_count
                )));
            }
            if pair[1].duration < pair[0].duration {
                return Err(GuardError::InvalidPolicy(format!(
                    "tier {} is shorter than tier {}",
                    pair[1].min_failed_count, pair[0].min_failed_count
                )));
            }
        }
        Ok(Self { tiers })
    }

    /// Create a strict policy (locks sooner, longer durations)
    pub fn strict() -> Self {
        Self {
            tiers: vec![
                LockoutTier::new(2, Duration::from_secs(60)),
                LockoutTier::new(4, Duration::from_secs(10 * 60)),
                LockoutTier::new(6, Duration::from_secs(60 * 60)),
            ],
        }
    }

    /// Create a lenient policy (more attempts allowed)
    pub fn lenient() -> Self {
        Self {
            tiers: vec![
                LockoutTier::new(5, Duration::from_secs(30)),
                LockoutTier::new(8, Duration::from_secs(5 * 60)),
                LockoutTier::new(12, Duration::from_secs(30 * 60)),
            ],
        }
    }

    /// Lockout length for `failed_count` failures, zero when not locked
    pub fn tier(&self, failed_count: u32) -> Duration {
        self.lockout_duration(failed_count).unwrap_or(Duration::ZERO)
    }

    /// Get the lockout duration for a given number of failed attempts
    /// Returns None if not locked out
    pub fn lockout_duration(&self, failed_count: u32) -> Option<Duration> {
        // Highest matching threshold wins
        self.tiers
            .iter()
            .rev()
            .find(|tier| failed_count >= tier.min_failed_count)
            .map(|tier| tier.duration)
    }

    /// Whether `failed_count` failures put the identity in a lockout tier
    pub fn is_locking(&self, failed_count: u32) -> bool {
        self.lockout_duration(failed_count).is_some()
    }

    /// Failure count at which the first lockout applies
    pub fn lowest_threshold(&self) -> u32 {
        self.tiers[0].min_failed_count
    }

    /// Next threshold strictly above `failed_count`, if any
    pub fn next_threshold(&self, failed_count: u32) -> Option<u32> {
        self.tiers
            .iter()
            .map(|tier| tier.min_failed_count)
            .find(|&min| min > failed_count)
    }

    /// Further failures that would reach the next tier
    pub fn attempts_before_next_tier(&self, failed_count: u32) -> Option<u32> {
        self.next_threshold(failed_count)
            .map(|next| next - failed_count)
    }

    /// Tiers in ascending threshold order
    pub fn tiers(&self) -> &[LockoutTier] {
        &self.tiers
    }
}

/// Human-readable duration, rounded up to the unit shown
pub fn describe_duration(duration: Duration) -> String {
    let secs = duration.as_secs() + u64::from(duration.subsec_nanos() > 0);
    let (value, unit) = if secs < 60 {
        (secs, "second")
    } else if secs < 3600 {
        (secs.div_ceil(60), "minute")
    } else {
        (secs.div_ceil(3600), "hour")
    };
    if value == 1 {
        format!("1 {}", unit)
    } else {
        format!("{} {}s", value, unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_default_policy() {
        let policy = LockoutPolicy::default();

        // No lockout for the first 2 failures
        assert_eq!(policy.tier(0), Duration::ZERO);
        assert_eq!(policy.tier(2), Duration::ZERO);
        assert!(policy.lockout_duration(2).is_none());

        // 1 minute for 3-4
        assert_eq!(policy.tier(3), Duration::from_secs(60));
        assert_eq!(policy.tier(4), Duration::from_secs(60));

        // 5 minutes for 5-9
        assert_eq!(policy.tier(5), Duration::from_secs(300));
        assert_eq!(policy.tier(9), Duration::from_secs(300));

        // 30 minutes for 10+
        assert_eq!(policy.tier(10), Duration::from_secs(1800));
        assert_eq!(policy.tier(u32::MAX), Duration::from_secs(1800));
    }

    #[test]
    fn test_next_tier_counting() {
        let policy = LockoutPolicy::default();

        assert_eq!(policy.lowest_threshold(), 3);
        assert_eq!(policy.attempts_before_next_tier(0), Some(3));
        assert_eq!(policy.attempts_before_next_tier(2), Some(1));
        assert_eq!(policy.attempts_before_next_tier(3), Some(2));
        assert_eq!(policy.attempts_before_next_tier(9), Some(1));
        assert_eq!(policy.attempts_before_next_tier(10), None);
    }

    #[test]
    fn test_custom_rejects_bad_tiers() {
        assert!(LockoutPolicy::custom(vec![]).is_err());
        assert!(LockoutPolicy::custom(vec![LockoutTier::new(0, Duration::from_secs(1))]).is_err());
        assert!(LockoutPolicy::custom(vec![LockoutTier::new(3, Duration::ZERO)]).is_err());
        assert!(LockoutPolicy::custom(vec![
            LockoutTier::new(3, Duration::from_secs(60)),
            LockoutTier::new(3, Duration::from_secs(120)),
        ])
        .is_err());
        assert!(LockoutPolicy::custom(vec![
            LockoutTier::new(3, Duration::from_secs(600)),
            LockoutTier::new(5, Duration::from_secs(60)),
        ])
        .is_err());
    }

    #[test]
    fn test_presets_are_valid() {
        for policy in [LockoutPolicy::strict(), LockoutPolicy::lenient()] {
            assert_eq!(LockoutPolicy::custom(policy.tiers().to_vec()).unwrap(), policy);
        }
    }

    #[test]
    fn test_serde_uses_seconds() {
        let json = serde_json::to_string(&LockoutPolicy::default()).unwrap();
        assert_eq!(
            json,
            r#"[{"min_failed_count":3,"duration_secs":60},{"min_failed_count":5,"duration_secs":300},{"min_failed_count":10,"duration_secs":1800}]"#
        );

        let parsed: LockoutPolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, LockoutPolicy::default());

        // Validation also runs on deserialize
        assert!(serde_json::from_str::<LockoutPolicy>("[]").is_err());
    }

    #[test]
    fn test_describe_duration() {
        assert_eq!(describe_duration(Duration::from_secs(1)), "1 second");
        assert_eq!(describe_duration(Duration::from_secs(45)), "45 seconds");
        assert_eq!(describe_duration(Duration::from_secs(60)), "1 minute");
        assert_eq!(describe_duration(Duration::from_secs(61)), "2 minutes");
        assert_eq!(describe_duration(Duration::from_secs(1800)), "30 minutes");
        assert_eq!(describe_duration(Duration::from_secs(7200)), "2 hours");
    }

    proptest! {
        #[test]
        fn tier_is_monotonic(a in 0u32..1000, b in 0u32..1000) {
            let policy = LockoutPolicy::default();
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(policy.tier(lo) <= policy.tier(hi));
        }

        #[test]
        fn tier_matches_table(count in 0u32..10_000) {
            let expected = match count {
                0..=2 => 0,
                3..=4 => 60,
                5..=9 => 300,
                _ => 1800,
            };
            prop_assert_eq!(LockoutPolicy::default().tier(count).as_secs(), expected);
        }
    }
}
