//! User-facing wording
//!
//! The controller only emits [`Notice`] reason codes; this module is the one
//! place that turns them into text.

use std::time::Duration;

use crate::policy::describe_duration;

/// Why the prompt is showing a message
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Notice {
    /// Wrong PIN, still below the next lockout tier
    WrongPin {
        failed_count: u32,
        /// Further failures before the next tier locks
        attempts_before_lockout: Option<u32>,
        /// Length of that next lockout
        next_lockout: Option<Duration>,
    },
    /// Wrong PIN that triggered a lockout
    LockoutStarted { failed_count: u32, duration: Duration },
    /// Submission refused because the lockout is still running
    StillLocked { remaining: Duration },
    /// Lockout ran out while the prompt was open
    LockoutExpired,
}

/// Text shown for a notice
pub fn notice_text(notice: &Notice) -> String {
    match *notice {
        Notice::WrongPin {
            attempts_before_lockout: Some(attempts),
            next_lockout: Some(lockout),
            ..
        } => format!(
            "Incorrect PIN. {} before a {} lockout.",
            attempts_phrase(attempts),
            describe_duration(lockout)
        ),
        Notice::WrongPin { .. } => "Incorrect PIN.".to_string(),
        Notice::LockoutStarted { duration, .. } => format!(
            "Too many failed attempts. Try again in {}.",
            describe_duration(duration)
        ),
        Notice::StillLocked { remaining } => format!(
            "PIN entry is locked. Try again in {}.",
            describe_minutes(remaining)
        ),
        Notice::LockoutExpired => "You can try again now.".to_string(),
    }
}

/// Countdown line for the locked prompt
pub fn countdown_text(remaining: Duration) -> String {
    let secs = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
    let mins = secs / 60;
    let secs = secs % 60;

    if mins > 0 {
        format!("Time remaining: {:02}:{:02}", mins, secs)
    } else {
        format!("Time remaining: {} seconds", secs)
    }
}

fn attempts_phrase(attempts: u32) -> String {
    if attempts == 1 {
        "1 attempt remaining".to_string()
    } else {
        format!("{} attempts remaining", attempts)
    }
}

/// Whole minutes, rounded up, never below one
fn describe_minutes(remaining: Duration) -> String {
    let secs = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
    match secs.div_ceil(60).max(1) {
        1 => "1 minute".to_string(),
        mins => format!("{} minutes", mins),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrong_pin_text() {
        let notice = Notice::WrongPin {
            failed_count: 1,
            attempts_before_lockout: Some(2),
            next_lockout: Some(Duration::from_secs(60)),
        };
        assert_eq!(
            notice_text(&notice),
            "Incorrect PIN. 2 attempts remaining before a 1 minute lockout."
        );

        let last = Notice::WrongPin {
            failed_count: 2,
            attempts_before_lockout: Some(1),
            next_lockout: Some(Duration::from_secs(60)),
        };
        assert_eq!(
            notice_text(&last),
            "Incorrect PIN. 1 attempt remaining before a 1 minute lockout."
        );

        let top_tier = Notice::WrongPin {
            failed_count: 10,
            attempts_before_lockout: None,
            next_lockout: None,
        };
        assert_eq!(notice_text(&top_tier), "Incorrect PIN.");
    }

    #[test]
    fn test_locked_text_in_minutes() {
        let notice = Notice::StillLocked {
            remaining: Duration::from_secs(45),
        };
        assert_eq!(notice_text(&notice), "PIN entry is locked. Try again in 1 minute.");

        let notice = Notice::StillLocked {
            remaining: Duration::from_secs(241),
        };
        assert_eq!(notice_text(&notice), "PIN entry is locked. Try again in 5 minutes.");
    }

    #[test]
    fn test_lockout_started_text() {
        let notice = Notice::LockoutStarted {
            failed_count: 5,
            duration: Duration::from_secs(300),
        };
        assert_eq!(
            notice_text(&notice),
            "Too many failed attempts. Try again in 5 minutes."
        );
    }

    #[test]
    fn test_countdown_text() {
        assert_eq!(countdown_text(Duration::from_secs(45)), "Time remaining: 45 seconds");
        assert_eq!(countdown_text(Duration::from_secs(299)), "Time remaining: 04:59");
        assert_eq!(countdown_text(Duration::from_millis(59_500)), "Time remaining: 01:00");
    }
}
