//! Condition management helpers following Kubernetes API conventions
//!
//! The VDB's `Ready` and `Progressing` conditions are derived from its phase;
//! [`sync_phase_conditions`] is called by the engine whenever the phase or the
//! failure message moves.

use crate::crd::{Condition, Phase, VirtualDatabaseStatus};

pub const CONDITION_TYPE_READY: &str = "Ready";
pub const CONDITION_TYPE_PROGRESSING: &str = "Progressing";

pub const CONDITION_STATUS_TRUE: &str = "True";
pub const CONDITION_STATUS_FALSE: &str = "False";

/// Update or add a condition to the conditions list
///
/// The transition time only moves when the status value changes.
pub fn set_condition(
    conditions: &mut Vec<Condition>,
    type_: &str,
    status: &str,
    reason: &str,
    message: &str,
    now: &str,
) {
    if let Some(existing) = conditions.iter_mut().find(|c| c.type_ == type_) {
        if existing.status != status {
            existing.last_transition_time = now.to_string();
        }
        existing.status = status.to_string();
        existing.reason = reason.to_string();
        existing.message = message.to_string();
    } else {
        conditions.push(Condition {
            type_: type_.to_string(),
            status: status.to_string(),
            last_transition_time: now.to_string(),
            reason: reason.to_string(),
            message: message.to_string(),
        });
    }
}

/// Find a condition by type
pub fn find_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

pub fn is_condition_true(conditions: &[Condition], type_: &str) -> bool {
    find_condition(conditions, type_)
        .map(|c| c.status == CONDITION_STATUS_TRUE)
        .unwrap_or(false)
}

/// Mirror the phase into `Ready` and `Progressing`
pub fn sync_phase_conditions(status: &mut VirtualDatabaseStatus, now: &str) {
    let phase = status.phase;
    let (ready, progressing, reason) = match phase {
        Phase::Running => (true, false, "Running"),
        Phase::Deleting => (false, false, "Deleting"),
        p if p.is_failure() => (false, false, p.as_str()),
        p => (false, true, p.as_str()),
    };

    let message = if status.failure.is_empty() {
        format!("Phase {phase}")
    } else {
        status.failure.clone()
    };

    set_condition(
        &mut status.conditions,
        CONDITION_TYPE_READY,
        if ready {
            CONDITION_STATUS_TRUE
        } else {
            CONDITION_STATUS_FALSE
        },
        reason,
        &message,
        now,
    );
    set_condition(
        &mut status.conditions,
        CONDITION_TYPE_PROGRESSING,
        if progressing {
            CONDITION_STATUS_TRUE
        } else {
            CONDITION_STATUS_FALSE
        },
        reason,
        &message,
        now,
    );
}
