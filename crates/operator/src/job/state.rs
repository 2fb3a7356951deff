//! Job phase transitions and the condition history kept on the job status.
//!
//! Any phase may follow any other; these helpers only keep `conditions`,
//! `startTime` and `completionTime` consistent with the phase being set.

use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use tracing::debug;

use crate::crd::{ConditionStatus, JobCondition, JobConditionType, JobPhase, JobStatus};

const RESTART_FINISHED_REASON: &str = "Job finished restarting.";

/// Canonical condition type and reason recorded when entering `phase`.
pub fn phase_condition(phase: JobPhase) -> Option<(JobConditionType, &'static str)> {
    match phase {
        JobPhase::Pending | JobPhase::Inqueue => Some((JobConditionType::Created, "Job created")),
        JobPhase::Running => Some((JobConditionType::Scheduled, "Job successfully scheduled")),
        JobPhase::Completed => Some((JobConditionType::Succeeded, "Job completed")),
        JobPhase::Failed | JobPhase::Terminated | JobPhase::Aborted => {
            Some((JobConditionType::Stopped, "Job stopped"))
        }
        JobPhase::Restarting => Some((JobConditionType::Restarting, "Job is restarting")),
        JobPhase::Aborting | JobPhase::Completing | JobPhase::Terminating => None,
    }
}

/// Moves `status` into `phase`, refreshing the matching condition and timestamps.
pub fn update_job_phase(status: &mut JobStatus, phase: JobPhase, message: &str) {
    let now = Time(Utc::now());

    if let Some((condition_type, reason)) = phase_condition(phase) {
        set_condition_at(
            status,
            new_condition_at(condition_type, reason, message, &now),
            &now,
        );
    }

    if status.phase != phase {
        debug!("Job phase {} -> {}", status.phase, phase);
    }
    status.phase = phase;

    // A restart un-terminates the job
    if status.completion_time.is_some() && has_condition(status, JobConditionType::Restarting) {
        status.completion_time = None;
    }
    if status.start_time.is_none() && has_condition(status, JobConditionType::Created) {
        status.start_time = Some(now.clone());
    }
    if status.completion_time.is_none() && has_condition(status, JobConditionType::Succeeded) {
        status.completion_time = Some(now);
    }
}

/// Creates an active condition stamped with the current time.
pub fn new_state_condition(
    condition_type: JobConditionType,
    reason: &str,
    message: &str,
) -> JobCondition {
    new_condition_at(condition_type, reason, message, &Time(Utc::now()))
}

fn new_condition_at(
    condition_type: JobConditionType,
    reason: &str,
    message: &str,
    now: &Time,
) -> JobCondition {
    JobCondition {
        condition_type,
        status: ConditionStatus::True,
        reason: reason.to_string(),
        message: message.to_string(),
        last_update_time: now.clone(),
        last_transition_time: now.clone(),
    }
}

/// True if a condition of `condition_type` exists and is active.
pub fn has_condition(status: &JobStatus, condition_type: JobConditionType) -> bool {
    status
        .conditions
        .iter()
        .any(|c| c.condition_type == condition_type && c.is_active())
}

/// First condition of `condition_type` in history order.
pub fn get_condition(status: &JobStatus, condition_type: JobConditionType) -> Option<&JobCondition> {
    status
        .conditions
        .iter()
        .find(|c| c.condition_type == condition_type)
}

/// Upserts `condition` into the history.
///
/// Nothing changes when the current entry of the same type already has the
/// same status and reason. Otherwise the old entry is replaced and the new
/// one appended at the end, keeping the old `lastTransitionTime` if the
/// status did not flip. An active `Restarting` condition removes
/// `Scheduled`, `Succeeded` and `Stopped`; any other condition turns an
/// active `Restarting` entry inactive.
pub fn set_condition(status: &mut JobStatus, condition: JobCondition) {
    set_condition_at(status, condition, &Time(Utc::now()));
}

fn set_condition_at(status: &mut JobStatus, mut condition: JobCondition, now: &Time) {
    if let Some(current) = get_condition(status, condition.condition_type) {
        if current.status == condition.status && current.reason == condition.reason {
            return;
        }
        if current.status == condition.status {
            condition.last_transition_time = current.last_transition_time.clone();
        }
    }

    let restarting = condition.condition_type == JobConditionType::Restarting && condition.is_active();

    let mut conditions: Vec<JobCondition> = std::mem::take(&mut status.conditions)
        .into_iter()
        .filter(|existing| existing.condition_type != condition.condition_type)
        .filter(|existing| {
            !(restarting
                && matches!(
                    existing.condition_type,
                    JobConditionType::Scheduled
                        | JobConditionType::Succeeded
                        | JobConditionType::Stopped
                ))
        })
        .map(|mut existing| {
            if existing.condition_type == JobConditionType::Restarting && existing.is_active() {
                existing.status = ConditionStatus::False;
                existing.reason = RESTART_FINISHED_REASON.to_string();
                existing.message.clear();
                existing.last_update_time = now.clone();
            }
            existing
        })
        .collect();

    conditions.push(condition);
    status.conditions = conditions;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(secs: i64) -> Time {
        Time(Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap())
    }

    fn condition(condition_type: JobConditionType, reason: &str, time: Time) -> JobCondition {
        JobCondition {
            condition_type,
            status: ConditionStatus::True,
            reason: reason.to_string(),
            message: String::new(),
            last_update_time: time.clone(),
            last_transition_time: time,
        }
    }

    fn types(status: &JobStatus) -> Vec<JobConditionType> {
        status.conditions.iter().map(|c| c.condition_type).collect()
    }

    #[test]
    fn test_set_condition_is_idempotent() {
        let mut status = JobStatus::default();
        set_condition(&mut status, condition(JobConditionType::Created, "Job created", at(0)));
        set_condition(&mut status, condition(JobConditionType::Created, "Job created", at(60)));

        assert_eq!(status.conditions.len(), 1);
        assert_eq!(status.conditions[0].last_transition_time, at(0));
        assert_eq!(status.conditions[0].last_update_time, at(0));
    }

    #[test]
    fn test_reason_change_keeps_transition_time() {
        let mut status = JobStatus::default();
        set_condition(&mut status, condition(JobConditionType::Scheduled, "first", at(0)));

        let mut update = condition(JobConditionType::Scheduled, "second", at(60));
        update.message = "two pods running".to_string();
        set_condition(&mut status, update);

        let current = get_condition(&status, JobConditionType::Scheduled).unwrap();
        assert_eq!(status.conditions.len(), 1);
        assert_eq!(current.reason, "second");
        assert_eq!(current.message, "two pods running");
        assert_eq!(current.last_update_time, at(60));
        assert_eq!(current.last_transition_time, at(0));
    }

    #[test]
    fn test_status_flip_moves_transition_time() {
        let mut status = JobStatus::default();
        set_condition(&mut status, condition(JobConditionType::Scheduled, "ok", at(0)));

        let mut inactive = condition(JobConditionType::Scheduled, "ok", at(30));
        inactive.status = ConditionStatus::False;
        set_condition(&mut status, inactive);

        let current = get_condition(&status, JobConditionType::Scheduled).unwrap();
        assert_eq!(current.last_transition_time, at(30));
        assert!(!has_condition(&status, JobConditionType::Scheduled));
    }

    #[test]
    fn test_updated_condition_moves_to_end() {
        let mut status = JobStatus::default();
        set_condition(&mut status, condition(JobConditionType::Created, "a", at(0)));
        set_condition(&mut status, condition(JobConditionType::Scheduled, "b", at(1)));
        set_condition(&mut status, condition(JobConditionType::Created, "c", at(2)));

        assert_eq!(
            types(&status),
            vec![JobConditionType::Scheduled, JobConditionType::Created]
        );
    }

    #[test]
    fn test_restarting_drops_terminal_conditions() {
        let mut status = JobStatus::default();
        set_condition(&mut status, condition(JobConditionType::Created, "created", at(0)));
        set_condition(&mut status, condition(JobConditionType::Scheduled, "scheduled", at(1)));
        set_condition(&mut status, condition(JobConditionType::Succeeded, "done", at(2)));
        set_condition(&mut status, condition(JobConditionType::Restarting, "restart", at(3)));

        assert_eq!(
            types(&status),
            vec![JobConditionType::Created, JobConditionType::Restarting]
        );
        assert!(!has_condition(&status, JobConditionType::Succeeded));
    }

    #[test]
    fn test_next_condition_deactivates_restarting() {
        let mut status = JobStatus::default();
        set_condition(&mut status, condition(JobConditionType::Succeeded, "done", at(0)));
        set_condition(&mut status, condition(JobConditionType::Restarting, "restart", at(1)));

        let mut scheduled = condition(JobConditionType::Scheduled, "scheduled", at(2));
        scheduled.message = "running again".to_string();
        set_condition(&mut status, scheduled);

        assert_eq!(
            types(&status),
            vec![JobConditionType::Restarting, JobConditionType::Scheduled]
        );
        let restarting = get_condition(&status, JobConditionType::Restarting).unwrap();
        assert_eq!(restarting.status, ConditionStatus::False);
        assert_eq!(restarting.reason, RESTART_FINISHED_REASON);
        assert!(restarting.message.is_empty());
        assert_eq!(restarting.last_transition_time, at(1));
        assert!(restarting.last_update_time.0 > at(1).0);
    }

    #[test]
    fn test_inactive_restarting_keeps_terminal_conditions() {
        let mut status = JobStatus::default();
        set_condition(&mut status, condition(JobConditionType::Stopped, "stopped", at(0)));

        let mut restarting = condition(JobConditionType::Restarting, "restart", at(1));
        restarting.status = ConditionStatus::False;
        set_condition(&mut status, restarting);

        assert_eq!(
            types(&status),
            vec![JobConditionType::Stopped, JobConditionType::Restarting]
        );
    }

    #[test]
    fn test_update_job_phase_maps_conditions() {
        let cases = [
            (JobPhase::Pending, Some(JobConditionType::Created)),
            (JobPhase::Inqueue, Some(JobConditionType::Created)),
            (JobPhase::Running, Some(JobConditionType::Scheduled)),
            (JobPhase::Completed, Some(JobConditionType::Succeeded)),
            (JobPhase::Failed, Some(JobConditionType::Stopped)),
            (JobPhase::Terminated, Some(JobConditionType::Stopped)),
            (JobPhase::Aborted, Some(JobConditionType::Stopped)),
            (JobPhase::Restarting, Some(JobConditionType::Restarting)),
            (JobPhase::Aborting, None),
            (JobPhase::Completing, None),
            (JobPhase::Terminating, None),
        ];

        for (phase, expected) in cases {
            let mut status = JobStatus::default();
            update_job_phase(&mut status, phase, "msg");
            assert_eq!(status.phase, phase);
            match expected {
                Some(condition_type) => {
                    assert_eq!(types(&status), vec![condition_type]);
                    assert_eq!(status.conditions[0].message, "msg");
                }
                None => assert!(status.conditions.is_empty()),
            }
        }
    }

    #[test]
    fn test_update_job_phase_timestamps() {
        let mut status = JobStatus::default();

        update_job_phase(&mut status, JobPhase::Pending, "");
        let started = status.start_time.clone();
        assert!(started.is_some());
        assert!(status.completion_time.is_none());

        update_job_phase(&mut status, JobPhase::Running, "");
        assert_eq!(status.start_time, started);

        update_job_phase(&mut status, JobPhase::Completed, "");
        assert!(status.completion_time.is_some());

        update_job_phase(&mut status, JobPhase::Restarting, "");
        assert!(status.completion_time.is_none());
        assert!(!has_condition(&status, JobConditionType::Succeeded));
        assert_eq!(status.start_time, started);
    }

    #[test]
    fn test_completion_time_not_overwritten() {
        let mut status = JobStatus::default();
        let earlier = Time(Utc::now() - Duration::hours(1));
        status.completion_time = Some(earlier.clone());

        update_job_phase(&mut status, JobPhase::Completed, "");
        assert_eq!(status.completion_time, Some(earlier));
    }

    #[test]
    fn test_unmapped_phase_only_sets_phase() {
        let mut status = JobStatus::default();
        update_job_phase(&mut status, JobPhase::Running, "");
        let before = status.conditions.clone();

        update_job_phase(&mut status, JobPhase::Terminating, "");
        assert_eq!(status.phase, JobPhase::Terminating);
        assert_eq!(status.conditions, before);
    }
}
