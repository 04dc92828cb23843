//! Session orchestration: synchronize, repair, validate, retry
//!
//! A session moves `Fixing -> Validating -> (Passed | Failed -> Fixing)`
//! and ends in `Passed` or `AttemptsExhausted`. Both retry modes share
//! the same round logic and differ only in [`RetryPolicy`].

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use sitemirror_common::{Report, RetryConfig, RetryMode, Route, ValidationResult};
use tracing::{error, info, warn};

use crate::error::ValidateResult;

/// When a failed round may be followed by another
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Stop unsuccessfully after `max_rounds` rounds
    Bounded { max_rounds: u32 },
    /// Retry until a round is clean
    Unbounded,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        match config.mode {
            RetryMode::Bounded => RetryPolicy::Bounded {
                max_rounds: config.max_rounds,
            },
            RetryMode::Unbounded => RetryPolicy::Unbounded,
        }
    }

    /// Whether another round may follow `completed` failed rounds
    pub fn allows_another(&self, completed: u32) -> bool {
        match self {
            RetryPolicy::Bounded { max_rounds } => completed < *max_rounds,
            RetryPolicy::Unbounded => true,
        }
    }
}

/// Session states, used for logging transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Fixing,
    Validating,
    Passed,
    Failed,
    AttemptsExhausted,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Fixing => "fixing",
            SessionState::Validating => "validating",
            SessionState::Passed => "passed",
            SessionState::Failed => "failed",
            SessionState::AttemptsExhausted => "attempts exhausted",
        };
        f.write_str(name)
    }
}

/// Attempt counter for one session; dropped with the session
#[derive(Debug, Default)]
pub struct RetryState {
    pub attempt: u32,
}

impl RetryState {
    /// Begin the next round and return its number
    fn next_round(&mut self) -> u32 {
        self.attempt += 1;
        self.attempt
    }
}

/// How a session ended
#[derive(Debug, Clone)]
pub enum SessionOutcome {
    Passed { rounds: u32, report: Report },
    AttemptsExhausted { rounds: u32, report: Report },
}

impl SessionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SessionOutcome::Passed { .. })
    }

    pub fn rounds(&self) -> u32 {
        match self {
            SessionOutcome::Passed { rounds, .. } | SessionOutcome::AttemptsExhausted { rounds, .. } => *rounds,
        }
    }

    /// The last round's report
    pub fn report(&self) -> &Report {
        match self {
            SessionOutcome::Passed { report, .. } | SessionOutcome::AttemptsExhausted { report, .. } => report,
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            SessionOutcome::Passed { .. } => 0,
            SessionOutcome::AttemptsExhausted { .. } => 1,
        }
    }
}

/// Result of the synchronization step of one round
#[derive(Debug, Clone, Default)]
pub struct RoundSync {
    /// Routes with a fresh snapshot, the only ones validated this round
    pub synced: Vec<Route>,
    /// One failed sync result per route that could not be synchronized
    pub failures: Vec<ValidationResult>,
}

/// The work of one round, separated from the retry logic
#[async_trait]
pub trait RoundSteps: Send {
    /// Re-synchronize every route
    async fn synchronize(&mut self, round: u32) -> ValidateResult<RoundSync>;

    /// Best-effort repair of the synchronized snapshots
    async fn repair(&mut self, round: u32, routes: &[Route]);

    /// Run every check over `routes`
    async fn validate(&mut self, round: u32, routes: &[Route]) -> ValidateResult<Vec<ValidationResult>>;
}

/// Drives rounds until the policy says stop
pub struct Orchestrator<S> {
    steps: S,
    policy: RetryPolicy,
    report_path: PathBuf,
    repair: bool,
}

impl<S: RoundSteps> Orchestrator<S> {
    pub fn new(steps: S, policy: RetryPolicy, report_path: impl Into<PathBuf>) -> Self {
        Self {
            steps,
            policy,
            report_path: report_path.into(),
            repair: true,
        }
    }

    /// Enable or disable the repair step between rounds
    pub fn with_repair(mut self, repair: bool) -> Self {
        self.repair = repair;
        self
    }

    pub fn steps(&self) -> &S {
        &self.steps
    }

    /// Run the session. Errors are fatal; content failures are not.
    pub async fn run(&mut self) -> ValidateResult<SessionOutcome> {
        let mut state = RetryState::default();

        loop {
            let round = state.next_round();

            info!("Round {}: {}", round, SessionState::Fixing);
            let sync = self.steps.synchronize(round).await?;

            if round > 1 && self.repair {
                self.steps.repair(round, &sync.synced).await;
            }

            info!("Round {}: {} {} route(s)", round, SessionState::Validating, sync.synced.len());
            let mut report = Report::new(round);
            report.extend(sync.failures);
            report.extend(self.steps.validate(round, &sync.synced).await?);
            report.persist(&self.report_path)?;

            if report.is_clean() {
                info!("Round {}: {}", round, SessionState::Passed);
                return Ok(SessionOutcome::Passed { rounds: round, report });
            }

            if !self.policy.allows_another(round) {
                error!(
                    "Round {}: {} with {} failure(s), report at {}",
                    round,
                    SessionState::AttemptsExhausted,
                    report.failure_count,
                    self.report_path.display()
                );
                return Ok(SessionOutcome::AttemptsExhausted { rounds: round, report });
            }

            warn!(
                "Round {}: {} with {} failure(s), retrying",
                round,
                SessionState::Failed,
                report.failure_count
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(RetryPolicy::Bounded { max_rounds: 3 }, 2, true ; "bounded before limit")]
    #[test_case(RetryPolicy::Bounded { max_rounds: 3 }, 3, false ; "bounded at limit")]
    #[test_case(RetryPolicy::Bounded { max_rounds: 1 }, 1, false ; "single round")]
    #[test_case(RetryPolicy::Unbounded, 1000, true ; "unbounded")]
    fn test_allows_another(policy: RetryPolicy, completed: u32, expected: bool) {
        assert_eq!(policy.allows_another(completed), expected);
    }

    #[test]
    fn test_policy_from_config() {
        let config = RetryConfig::default();
        assert_eq!(RetryPolicy::from_config(&config), RetryPolicy::Bounded { max_rounds: 3 });

        let config = RetryConfig {
            mode: RetryMode::Unbounded,
            ..RetryConfig::default()
        };
        assert_eq!(RetryPolicy::from_config(&config), RetryPolicy::Unbounded);
    }

    #[test]
    fn test_exit_codes() {
        let passed = SessionOutcome::Passed {
            rounds: 1,
            report: Report::new(1),
        };
        let exhausted = SessionOutcome::AttemptsExhausted {
            rounds: 3,
            report: Report::new(3),
        };
        assert_eq!(passed.exit_code(), 0);
        assert_eq!(exhausted.exit_code(), 1);
        assert_eq!(exhausted.rounds(), 3);
    }
}
