//! Pure transition planning for the call lifecycle state machine.
//!
//! Nothing in this module touches the store; it decides what a transition
//! *would* do so the service layer can apply it with a guarded single-row
//! update. Keeping the rules pure is what lets the webhook and reconciliation
//! paths share them without drift.

use chrono::{DateTime, Utc};

use crate::store::models::CallStatus;
use crate::store::CallTransitionWrite;

/// What a requested transition amounts to.
///
/// Callers distinguish "nothing to do" from "something went wrong" by
/// variant, never by error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The transition moves the call forward.
    Applied { from: CallStatus, to: CallStatus },
    /// The call already holds the target status.
    NoOp { status: CallStatus },
    /// The transition would move the call backward or out of a terminal
    /// status; dropped.
    Rejected {
        from: CallStatus,
        to: CallStatus,
        reason: &'static str,
    },
}

impl TransitionOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

/// Plan a transition from `current` to `target`.
///
/// `authoritative` marks the end-of-call-report and reconciliation paths,
/// which are allowed to refine one terminal status into another (e.g. a bare
/// "ended" recorded as Completed later refined to NoAnswer by the report's
/// ended reason). Ordinary status updates can never leave a terminal status.
pub fn plan_transition(current: CallStatus, target: CallStatus, authoritative: bool) -> TransitionOutcome {
    if current == target {
        return TransitionOutcome::NoOp { status: current };
    }

    if current.is_terminal() {
        if authoritative && target.is_terminal() {
            return TransitionOutcome::Applied {
                from: current,
                to: target,
            };
        }
        return TransitionOutcome::Rejected {
            from: current,
            to: target,
            reason: "call already terminal",
        };
    }

    // Cancelled short-circuits the forward path from any non-terminal status.
    if target == CallStatus::Cancelled {
        return TransitionOutcome::Applied {
            from: current,
            to: target,
        };
    }

    if target.rank() < current.rank() {
        return TransitionOutcome::Rejected {
            from: current,
            to: target,
            reason: "would move the call backward",
        };
    }

    TransitionOutcome::Applied {
        from: current,
        to: target,
    }
}

/// Map a provider status string to a local status.
///
/// `ended` is refined through the ended reason; unknown statuses map to
/// `None` and are ignored by the caller (logged, not an error).
pub fn map_provider_status(status: &str, ended_reason: Option<&str>) -> Option<CallStatus> {
    match status {
        "queued" => Some(CallStatus::Scheduled),
        "ringing" => Some(CallStatus::Ringing),
        "in-progress" => Some(CallStatus::InProgress),
        "forwarding" => Some(CallStatus::InProgress),
        "ended" => Some(refine_ended_status(ended_reason)),
        _ => None,
    }
}

/// Refine a bare "ended" into a concrete terminal status by inspecting the
/// provider's ended reason text.
pub fn refine_ended_status(ended_reason: Option<&str>) -> CallStatus {
    let Some(reason) = ended_reason else {
        return CallStatus::Completed;
    };
    let reason = reason.to_ascii_lowercase();

    if reason.contains("no-answer") || reason.contains("did-not-answer") || reason.contains("no answer") {
        CallStatus::NoAnswer
    } else if reason.contains("busy") {
        CallStatus::Busy
    } else if reason.contains("voicemail") {
        CallStatus::Voicemail
    } else if reason.contains("cancel") {
        CallStatus::Cancelled
    } else if reason.contains("error") || reason.contains("failed") || reason.contains("rejected") {
        CallStatus::Failed
    } else {
        CallStatus::Completed
    }
}

/// Build the store write for an applied transition.
///
/// Timestamps follow set-if-null semantics: entering Ringing records the
/// first ring as `started_at`; entering InProgress records `started_at` and
/// `answered_at` (covers providers that skip the ringing update); entering a
/// terminal status records `ended_at`.
pub fn transition_write(from: CallStatus, to: CallStatus, now: DateTime<Utc>) -> CallTransitionWrite {
    let set_started_at = matches!(to, CallStatus::Ringing | CallStatus::InProgress).then_some(now);
    let set_answered_at = matches!(to, CallStatus::InProgress).then_some(now);
    let set_ended_at = to.is_terminal().then_some(now);

    CallTransitionWrite {
        from,
        to,
        set_started_at,
        set_answered_at,
        set_ended_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TERMINALS: [CallStatus; 6] = [
        CallStatus::Completed,
        CallStatus::NoAnswer,
        CallStatus::Busy,
        CallStatus::Voicemail,
        CallStatus::Failed,
        CallStatus::Cancelled,
    ];

    #[test]
    fn test_forward_path_applies() {
        assert!(plan_transition(CallStatus::Queued, CallStatus::Scheduled, false).is_applied());
        assert!(plan_transition(CallStatus::Scheduled, CallStatus::Ringing, false).is_applied());
        assert!(plan_transition(CallStatus::Ringing, CallStatus::InProgress, false).is_applied());
        assert!(plan_transition(CallStatus::InProgress, CallStatus::Completed, false).is_applied());
        // Skipping intermediate states is fine; events go missing.
        assert!(plan_transition(CallStatus::Queued, CallStatus::InProgress, false).is_applied());
        assert!(plan_transition(CallStatus::Scheduled, CallStatus::NoAnswer, false).is_applied());
    }

    #[test]
    fn test_same_status_is_noop() {
        for status in [CallStatus::Queued, CallStatus::InProgress, CallStatus::Completed] {
            assert_eq!(
                plan_transition(status, status, false),
                TransitionOutcome::NoOp { status }
            );
        }
    }

    #[test]
    fn test_no_event_sequence_escapes_a_terminal_status() {
        for terminal in TERMINALS {
            for target in [
                CallStatus::Queued,
                CallStatus::Scheduled,
                CallStatus::Ringing,
                CallStatus::InProgress,
            ] {
                assert!(matches!(
                    plan_transition(terminal, target, false),
                    TransitionOutcome::Rejected { .. }
                ));
                // Not even the authoritative path may resurrect a call.
                assert!(matches!(
                    plan_transition(terminal, target, true),
                    TransitionOutcome::Rejected { .. }
                ));
            }
        }
    }

    #[test]
    fn test_backward_transitions_rejected() {
        assert!(matches!(
            plan_transition(CallStatus::InProgress, CallStatus::Ringing, false),
            TransitionOutcome::Rejected { .. }
        ));
        assert!(matches!(
            plan_transition(CallStatus::Ringing, CallStatus::Queued, false),
            TransitionOutcome::Rejected { .. }
        ));
    }

    #[test]
    fn test_terminal_refinement_requires_authoritative_source() {
        assert!(matches!(
            plan_transition(CallStatus::Completed, CallStatus::NoAnswer, false),
            TransitionOutcome::Rejected { .. }
        ));
        assert!(plan_transition(CallStatus::Completed, CallStatus::NoAnswer, true).is_applied());
    }

    #[test]
    fn test_cancel_reachable_from_any_non_terminal() {
        for status in [
            CallStatus::Queued,
            CallStatus::Scheduled,
            CallStatus::Ringing,
            CallStatus::InProgress,
        ] {
            assert!(plan_transition(status, CallStatus::Cancelled, false).is_applied());
        }
    }

    #[test]
    fn test_provider_status_mapping() {
        assert_eq!(map_provider_status("queued", None), Some(CallStatus::Scheduled));
        assert_eq!(map_provider_status("ringing", None), Some(CallStatus::Ringing));
        assert_eq!(map_provider_status("in-progress", None), Some(CallStatus::InProgress));
        assert_eq!(map_provider_status("forwarding", None), Some(CallStatus::InProgress));
        assert_eq!(map_provider_status("ended", None), Some(CallStatus::Completed));
        assert_eq!(map_provider_status("warming-up", None), None);
    }

    #[test]
    fn test_ended_refinement() {
        assert_eq!(
            refine_ended_status(Some("customer-did-not-answer")),
            CallStatus::NoAnswer
        );
        assert_eq!(refine_ended_status(Some("customer-busy")), CallStatus::Busy);
        assert_eq!(
            refine_ended_status(Some("voicemail-detected")),
            CallStatus::Voicemail
        );
        assert_eq!(
            refine_ended_status(Some("pipeline-error-openai-llm-failed")),
            CallStatus::Failed
        );
        assert_eq!(refine_ended_status(Some("assistant-ended-call")), CallStatus::Completed);
        assert_eq!(refine_ended_status(None), CallStatus::Completed);
    }

    #[test]
    fn test_timestamp_policy() {
        let now = Utc::now();

        let write = transition_write(CallStatus::Scheduled, CallStatus::Ringing, now);
        assert_eq!(write.set_started_at, Some(now));
        assert_eq!(write.set_answered_at, None);
        assert_eq!(write.set_ended_at, None);

        let write = transition_write(CallStatus::Queued, CallStatus::InProgress, now);
        assert_eq!(write.set_started_at, Some(now));
        assert_eq!(write.set_answered_at, Some(now));
        assert_eq!(write.set_ended_at, None);

        let write = transition_write(CallStatus::InProgress, CallStatus::Completed, now);
        assert_eq!(write.set_started_at, None);
        assert_eq!(write.set_ended_at, Some(now));
    }
}
