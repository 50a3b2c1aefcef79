//! Interview coordination between HR, the assigned tutor, and the application.

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use super::domain::{
    ApplicationId, ApplicationStatus, InterviewId, InterviewRequest, InterviewStatus, Role, User,
    UserId,
};
use super::error::{LifecycleError, Validator};
use super::quota::QuotaKeeper;
use super::repository::{LifecycleState, Stamp};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposeInterview {
    pub tutor_id: UserId,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub location: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum TutorDecision {
    Accept,
    Reject {
        comment: String,
    },
    Reschedule {
        alternative_date: NaiveDate,
        alternative_time: NaiveTime,
        #[serde(default)]
        comment: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HrInterviewDecision {
    /// Accept the tutor's alternative slot.
    Confirm,
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterviewAction {
    TutorAccept,
    TutorReject,
    TutorReschedule,
    HrConfirm,
    HrCancel,
    Cancel,
}

/// Transition table of an interview request.
pub const fn next_status(from: InterviewStatus, action: InterviewAction) -> Option<InterviewStatus> {
    use InterviewAction::*;
    use InterviewStatus::*;
    match (from, action) {
        (PendingTutor, TutorAccept) => Some(Accepted),
        (PendingTutor, TutorReject) => Some(Rejected),
        (PendingTutor, TutorReschedule) => Some(RescheduleRequested),
        (RescheduleRequested, HrConfirm) => Some(Accepted),
        (RescheduleRequested, HrCancel) => Some(Rejected),
        (PendingTutor | Accepted | RescheduleRequested, Cancel) => Some(Rejected),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterviewOutcome {
    /// Replay of a decision already in effect.
    Unchanged,
    Changed(InterviewStatus),
}

pub fn open_request_for<'s>(
    state: &'s LifecycleState,
    application: &ApplicationId,
) -> Option<&'s InterviewRequest> {
    state
        .interviews
        .values()
        .find(|request| &request.application == application && request.status.is_open())
}

/// Create a `pending_tutor` request and move the application to `interview_scheduled`.
pub fn propose(
    state: &mut LifecycleState,
    application_id: &ApplicationId,
    proposal: &ProposeInterview,
    hr: &User,
    quota: &QuotaKeeper,
    stamp: &Stamp,
) -> Result<InterviewId, LifecycleError> {
    let application = state.application(application_id)?;
    if let Some(open) = open_request_for(state, application_id) {
        return Err(LifecycleError::conflict(format!(
            "interview request {} is still {}",
            open.id,
            open.status.label()
        )));
    }
    if application.status != ApplicationStatus::Pending {
        return Err(LifecycleError::precondition(
            "interviews can only be proposed for pending applications",
            application.status.label(),
        ));
    }
    let company = application.company.clone();

    Validator::default()
        .present("location", &proposal.location)
        .require("date", proposal.date >= stamp.today, "must not be in the past")
        .finish()?;

    let tutor = state
        .users
        .get(&proposal.tutor_id)
        .ok_or_else(|| LifecycleError::not_found("tutor", &proposal.tutor_id))?;
    if tutor.role != Role::Tutor || !tutor.active {
        return Err(LifecycleError::invalid("tutor_id", "is not an active tutor"));
    }
    if tutor.company.as_ref() != Some(&company) {
        return Err(LifecycleError::invalid(
            "tutor_id",
            "tutor belongs to another company",
        ));
    }
    quota.check_tutor(state, &proposal.tutor_id, None)?;

    let id = InterviewId(state.next_id("itw"));
    state.interviews.insert(
        id.clone(),
        InterviewRequest {
            id: id.clone(),
            application: application_id.clone(),
            tutor: proposal.tutor_id.clone(),
            hr: Some(hr.id.clone()),
            proposed_date: proposal.date,
            proposed_time: proposal.time,
            location: proposal.location.trim().to_string(),
            status: InterviewStatus::PendingTutor,
            tutor_comment: None,
            alternative_date: None,
            alternative_time: None,
            created_at: stamp.now,
            updated_at: stamp.now,
        },
    );
    state.application_mut(application_id)?.status = ApplicationStatus::InterviewScheduled;
    Ok(id)
}

/// Apply the assigned tutor's answer.
pub fn decide_as_tutor(
    state: &mut LifecycleState,
    request_id: &InterviewId,
    caller: &User,
    decision: &TutorDecision,
    stamp: &Stamp,
) -> Result<InterviewOutcome, LifecycleError> {
    let request = state.interview(request_id)?;
    if request.tutor != caller.id || caller.role != Role::Tutor {
        return Err(LifecycleError::denied(format!(
            "{} is not the tutor of interview request {request_id}",
            caller.id
        )));
    }

    let (action, replay) = match decision {
        TutorDecision::Accept => (
            InterviewAction::TutorAccept,
            request.status == InterviewStatus::Accepted,
        ),
        TutorDecision::Reject { comment } => {
            Validator::default().present("comment", comment).finish()?;
            (
                InterviewAction::TutorReject,
                request.status == InterviewStatus::Rejected
                    && request.tutor_comment.as_deref() == Some(comment.trim()),
            )
        }
        TutorDecision::Reschedule {
            alternative_date,
            alternative_time,
            ..
        } => {
            Validator::default()
                .require(
                    "alternative_date",
                    *alternative_date >= stamp.today,
                    "must not be in the past",
                )
                .finish()?;
            (
                InterviewAction::TutorReschedule,
                request.status == InterviewStatus::RescheduleRequested
                    && request.alternative_date == Some(*alternative_date)
                    && request.alternative_time == Some(*alternative_time),
            )
        }
    };

    if replay {
        return Ok(InterviewOutcome::Unchanged);
    }
    let next = next_status(request.status, action).ok_or_else(|| {
        LifecycleError::precondition(
            "the tutor already answered this request",
            request.status.label(),
        )
    })?;
    let application_id = request.application.clone();

    let request = state.interview_mut(request_id)?;
    request.status = next;
    request.updated_at = stamp.now;
    match decision {
        TutorDecision::Accept => {}
        TutorDecision::Reject { comment } => {
            request.tutor_comment = Some(comment.trim().to_string());
        }
        TutorDecision::Reschedule {
            alternative_date,
            alternative_time,
            comment,
        } => {
            request.alternative_date = Some(*alternative_date);
            request.alternative_time = Some(*alternative_time);
            request.tutor_comment = comment
                .as_ref()
                .map(|comment| comment.trim().to_string())
                .filter(|comment| !comment.is_empty());
        }
    }

    if next == InterviewStatus::Rejected {
        release_application(state, &application_id)?;
    }
    Ok(InterviewOutcome::Changed(next))
}

/// Apply an HR decision. The caller's company has already been checked.
pub fn decide_as_hr(
    state: &mut LifecycleState,
    request_id: &InterviewId,
    caller: &User,
    decision: HrInterviewDecision,
    stamp: &Stamp,
) -> Result<InterviewOutcome, LifecycleError> {
    let request = state.interview(request_id)?;
    let (action, replay) = match decision {
        HrInterviewDecision::Confirm => (
            InterviewAction::HrConfirm,
            request.status == InterviewStatus::Accepted,
        ),
        HrInterviewDecision::Cancel if request.status == InterviewStatus::RescheduleRequested => {
            (InterviewAction::HrCancel, false)
        }
        HrInterviewDecision::Cancel => (
            InterviewAction::Cancel,
            request.status == InterviewStatus::Rejected,
        ),
    };

    if replay {
        return Ok(InterviewOutcome::Unchanged);
    }
    let next = next_status(request.status, action).ok_or_else(|| {
        LifecycleError::precondition(
            "no reschedule request is awaiting confirmation",
            request.status.label(),
        )
    })?;
    let application_id = request.application.clone();

    let request = state.interview_mut(request_id)?;
    if action == InterviewAction::HrConfirm {
        if let Some(date) = request.alternative_date {
            request.proposed_date = date;
        }
        if let Some(time) = request.alternative_time {
            request.proposed_time = time;
        }
    }
    request.status = next;
    request.hr = Some(caller.id.clone());
    request.updated_at = stamp.now;

    if next == InterviewStatus::Rejected {
        release_application(state, &application_id)?;
    }
    Ok(InterviewOutcome::Changed(next))
}

/// Close every open request of an application.
pub fn close_open_requests(state: &mut LifecycleState, application: &ApplicationId, stamp: &Stamp) {
    for request in state
        .interviews
        .values_mut()
        .filter(|request| &request.application == application && request.status.is_open())
    {
        request.status = InterviewStatus::Rejected;
        request.updated_at = stamp.now;
    }
}

/// Send an `interview_scheduled` application back to `pending` once no request is open.
fn release_application(
    state: &mut LifecycleState,
    application_id: &ApplicationId,
) -> Result<(), LifecycleError> {
    if open_request_for(state, application_id).is_some() {
        return Ok(());
    }
    let application = state.application_mut(application_id)?;
    if application.status == ApplicationStatus::InterviewScheduled {
        application.status = ApplicationStatus::Pending;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tutor_rows_only_apply_to_pending_requests() {
        assert_eq!(
            next_status(InterviewStatus::PendingTutor, InterviewAction::TutorAccept),
            Some(InterviewStatus::Accepted)
        );
        assert_eq!(
            next_status(InterviewStatus::Accepted, InterviewAction::TutorReject),
            None
        );
        assert_eq!(
            next_status(
                InterviewStatus::RescheduleRequested,
                InterviewAction::TutorReschedule
            ),
            None
        );
    }

    #[test]
    fn hr_rows_follow_the_reschedule_cycle() {
        assert_eq!(
            next_status(InterviewStatus::RescheduleRequested, InterviewAction::HrConfirm),
            Some(InterviewStatus::Accepted)
        );
        assert_eq!(
            next_status(InterviewStatus::PendingTutor, InterviewAction::HrConfirm),
            None
        );
        assert_eq!(
            next_status(InterviewStatus::Accepted, InterviewAction::Cancel),
            Some(InterviewStatus::Rejected)
        );
        assert_eq!(
            next_status(InterviewStatus::Rejected, InterviewAction::Cancel),
            None
        );
    }

    #[test]
    fn tutor_decisions_deserialize_from_tagged_json() {
        let decision: TutorDecision = serde_json::from_str(
            r#"{"decision":"reschedule","alternative_date":"2025-02-12","alternative_time":"14:00:00","comment":"conflict"}"#,
        )
        .expect("decision");
        assert_eq!(
            decision,
            TutorDecision::Reschedule {
                alternative_date: NaiveDate::from_ymd_opt(2025, 2, 12).expect("valid"),
                alternative_time: NaiveTime::from_hms_opt(14, 0, 0).expect("valid"),
                comment: Some("conflict".to_string()),
            }
        );
    }
}
