use thiserror::Error;

/// Lifecycle status of an SBI. String forms are the on-disk encoding used by
/// both the SQLite store and the journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SbiStatus {
    Pending,
    Picked,
    Implementing,
    Reviewing,
    /// Forced-implement state entered when review retries are exhausted. The
    /// next turn from here lands on `Done` unconditionally.
    ReviewAndWip,
    Done,
    Failed,
}

impl SbiStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            SbiStatus::Pending => "PENDING",
            SbiStatus::Picked => "PICKED",
            SbiStatus::Implementing => "IMPLEMENTING",
            SbiStatus::Reviewing => "REVIEWING",
            SbiStatus::ReviewAndWip => "REVIEW&WIP",
            SbiStatus::Done => "DONE",
            SbiStatus::Failed => "FAILED",
        }
    }

    pub fn parse(value: &str) -> anyhow::Result<Self> {
        match value {
            "PENDING" => Ok(Self::Pending),
            "PICKED" => Ok(Self::Picked),
            "IMPLEMENTING" => Ok(Self::Implementing),
            "REVIEWING" => Ok(Self::Reviewing),
            "REVIEW&WIP" => Ok(Self::ReviewAndWip),
            "DONE" => Ok(Self::Done),
            "FAILED" => Ok(Self::Failed),
            _ => Err(anyhow::anyhow!("invalid sbi status: {value}")),
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SbiStatus::Done | SbiStatus::Failed)
    }

    /// Whether the scheduler may hand this SBI to a worker.
    pub fn is_executable(self) -> bool {
        !self.is_terminal()
    }
}

/// Workflow step names as they appear in journal records and prompt lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    Pick,
    Implement,
    Review,
    ForceImplement,
    Done,
}

impl Step {
    pub const fn as_str(self) -> &'static str {
        match self {
            Step::Pick => "pick",
            Step::Implement => "implement",
            Step::Review => "review",
            Step::ForceImplement => "force_implement",
            Step::Done => "done",
        }
    }

    pub fn parse(value: &str) -> anyhow::Result<Self> {
        match value {
            "pick" => Ok(Self::Pick),
            "implement" => Ok(Self::Implement),
            "review" => Ok(Self::Review),
            "force_implement" => Ok(Self::ForceImplement),
            "done" => Ok(Self::Done),
            _ => Err(anyhow::anyhow!("invalid step: {value}")),
        }
    }

    /// Step a journal row records for a transition *into* `status`.
    ///
    /// Convention: the row names the step the SBI is entering, so a
    /// transition into REVIEWING is journaled as `review` and a transition
    /// into IMPLEMENTING as `implement`. PENDING and PICKED both map to
    /// `pick`; terminal statuses map to `done`.
    pub const fn for_status(status: SbiStatus) -> Self {
        match status {
            SbiStatus::Pending | SbiStatus::Picked => Step::Pick,
            SbiStatus::Implementing => Step::Implement,
            SbiStatus::Reviewing => Step::Review,
            SbiStatus::ReviewAndWip => Step::ForceImplement,
            SbiStatus::Done | SbiStatus::Failed => Step::Done,
        }
    }
}

/// Outcome extracted from the agent's artifact or stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Succeeded,
    NeedsChanges,
    Failed,
}

impl Decision {
    pub const fn as_str(self) -> &'static str {
        match self {
            Decision::Succeeded => "SUCCEEDED",
            Decision::NeedsChanges => "NEEDS_CHANGES",
            Decision::Failed => "FAILED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "SUCCEEDED" => Some(Self::Succeeded),
            "NEEDS_CHANGES" => Some(Self::NeedsChanges),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// The wider decision vocabulary that shows up in journal rows. Status-only
/// transitions record markers (PICKED, INITIALIZED, ...) that are not agent
/// decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalDecision {
    Picked,
    Initialized,
    Succeeded,
    NeedsChanges,
    Failed,
    ForceTerminated,
    /// No decision applies to this turn (e.g. the implement step).
    Pending,
}

impl JournalDecision {
    pub const fn as_str(self) -> &'static str {
        match self {
            JournalDecision::Picked => "PICKED",
            JournalDecision::Initialized => "INITIALIZED",
            JournalDecision::Succeeded => "SUCCEEDED",
            JournalDecision::NeedsChanges => "NEEDS_CHANGES",
            JournalDecision::Failed => "FAILED",
            JournalDecision::ForceTerminated => "FORCE_TERMINATED",
            JournalDecision::Pending => "PENDING",
        }
    }
}

impl From<Decision> for JournalDecision {
    fn from(value: Decision) -> Self {
        match value {
            Decision::Succeeded => JournalDecision::Succeeded,
            Decision::NeedsChanges => JournalDecision::NeedsChanges,
            Decision::Failed => JournalDecision::Failed,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("sbi is already terminal in status {0}")]
    Terminal(&'static str),
}

/// Result of one status-machine evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub next: SbiStatus,
    pub increment_attempt: bool,
}

/// Compute the next status from the current status, the extracted decision,
/// and the review attempt counters.
///
/// The REVIEW&WIP arm is the anti-infinite-loop safeguard: once attempts are
/// exhausted, one more forced-implement turn runs and its result is treated
/// as DONE no matter what the agent said.
pub fn next_status(
    current: SbiStatus,
    decision: Decision,
    attempt: i64,
    max_attempts: i64,
) -> Result<Transition, TransitionError> {
    let done = |next| Transition {
        next,
        increment_attempt: false,
    };
    match current {
        SbiStatus::Pending => Ok(done(SbiStatus::Picked)),
        SbiStatus::Picked => Ok(done(SbiStatus::Implementing)),
        SbiStatus::Implementing => match decision {
            Decision::Failed => Ok(done(SbiStatus::Failed)),
            Decision::Succeeded | Decision::NeedsChanges => Ok(done(SbiStatus::Reviewing)),
        },
        SbiStatus::Reviewing => match decision {
            Decision::Succeeded => Ok(done(SbiStatus::Done)),
            Decision::NeedsChanges | Decision::Failed => {
                if attempt >= max_attempts {
                    Ok(done(SbiStatus::ReviewAndWip))
                } else {
                    Ok(Transition {
                        next: SbiStatus::Implementing,
                        increment_attempt: true,
                    })
                }
            }
        },
        SbiStatus::ReviewAndWip => Ok(done(SbiStatus::Done)),
        SbiStatus::Done => Err(TransitionError::Terminal("DONE")),
        SbiStatus::Failed => Err(TransitionError::Terminal("FAILED")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn status_strings_round_trip() {
        for status in [
            SbiStatus::Pending,
            SbiStatus::Picked,
            SbiStatus::Implementing,
            SbiStatus::Reviewing,
            SbiStatus::ReviewAndWip,
            SbiStatus::Done,
            SbiStatus::Failed,
        ] {
            assert_eq!(SbiStatus::parse(status.as_str()).expect("parse"), status);
        }
        assert!(SbiStatus::parse("WORKING").is_err());
    }

    #[test]
    fn happy_path_walks_pending_to_done() {
        let t = next_status(SbiStatus::Pending, Decision::NeedsChanges, 1, 3).expect("pending");
        assert_eq!(t.next, SbiStatus::Picked);
        let t = next_status(SbiStatus::Picked, Decision::NeedsChanges, 1, 3).expect("picked");
        assert_eq!(t.next, SbiStatus::Implementing);
        let t = next_status(SbiStatus::Implementing, Decision::Succeeded, 1, 3).expect("impl");
        assert_eq!(t.next, SbiStatus::Reviewing);
        let t = next_status(SbiStatus::Reviewing, Decision::Succeeded, 1, 3).expect("review");
        assert_eq!(t.next, SbiStatus::Done);
        assert!(!t.increment_attempt);
    }

    #[test]
    fn review_retry_increments_attempt_until_exhausted() {
        let t = next_status(SbiStatus::Reviewing, Decision::NeedsChanges, 1, 3).expect("retry");
        assert_eq!(t.next, SbiStatus::Implementing);
        assert!(t.increment_attempt);

        let t = next_status(SbiStatus::Reviewing, Decision::NeedsChanges, 3, 3).expect("cap");
        assert_eq!(t.next, SbiStatus::ReviewAndWip);
        assert!(!t.increment_attempt);

        let t = next_status(SbiStatus::Reviewing, Decision::Failed, 3, 3).expect("cap-failed");
        assert_eq!(t.next, SbiStatus::ReviewAndWip);
    }

    #[test]
    fn force_implement_always_lands_on_done() {
        for decision in [Decision::Succeeded, Decision::NeedsChanges, Decision::Failed] {
            let t = next_status(SbiStatus::ReviewAndWip, decision, 4, 3).expect("forced");
            assert_eq!(t.next, SbiStatus::Done);
        }
    }

    #[test]
    fn implement_failure_is_terminal() {
        let t = next_status(SbiStatus::Implementing, Decision::Failed, 1, 3).expect("impl");
        assert_eq!(t.next, SbiStatus::Failed);
    }

    #[test]
    fn terminal_statuses_reject_further_transitions() {
        assert_eq!(
            next_status(SbiStatus::Done, Decision::Succeeded, 1, 3),
            Err(TransitionError::Terminal("DONE"))
        );
        assert_eq!(
            next_status(SbiStatus::Failed, Decision::Succeeded, 1, 3),
            Err(TransitionError::Terminal("FAILED"))
        );
    }

    #[test]
    fn steps_follow_the_entering_status() {
        assert_eq!(Step::for_status(SbiStatus::Picked), Step::Pick);
        assert_eq!(Step::for_status(SbiStatus::Implementing), Step::Implement);
        assert_eq!(Step::for_status(SbiStatus::Reviewing), Step::Review);
        assert_eq!(Step::for_status(SbiStatus::ReviewAndWip), Step::ForceImplement);
        assert_eq!(Step::for_status(SbiStatus::Done), Step::Done);
    }
}
