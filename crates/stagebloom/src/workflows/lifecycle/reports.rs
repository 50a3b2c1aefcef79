//! PFE report ledger: intern submissions, tutor reviews, HR archival.

use super::domain::{
    InternshipId, InternshipKind, InternshipStatus, PfeReport, ReportId, ReportPayload,
    ReportStatus, ReviewDecision, ReviewNote, Role, User,
};
use super::error::{LifecycleError, Validator};
use super::repository::{LifecycleState, Stamp};
use super::visibility;

/// Report touched by a ledger operation and whether anything changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerChange {
    pub report: ReportId,
    pub version: u32,
    pub changed: bool,
}

impl LedgerChange {
    fn of(report: &PfeReport, changed: bool) -> Self {
        Self {
            report: report.id.clone(),
            version: report.version,
            changed,
        }
    }
}

pub fn validate(payload: &ReportPayload, file_ref: &str) -> Result<(), LifecycleError> {
    Validator::default()
        .present("title", &payload.title)
        .present("abstract", &payload.abstract_text)
        .present("speciality", &payload.speciality)
        .require(
            "year",
            (2000..=2100).contains(&payload.year),
            "must be a plausible academic year",
        )
        .present("file_ref", file_ref)
        .finish()
}

/// File or refile the report of a PFE internship. Only its intern may call.
pub fn submit(
    state: &mut LifecycleState,
    internship_id: &InternshipId,
    caller: &User,
    payload: &ReportPayload,
    file_ref: &str,
    stamp: &Stamp,
) -> Result<LedgerChange, LifecycleError> {
    let internship = state.internship(internship_id)?;
    if caller.role != Role::Intern || internship.intern != caller.id {
        return Err(LifecycleError::denied(format!(
            "{} is not the intern of internship {internship_id}",
            caller.id
        )));
    }
    if internship.kind != InternshipKind::Pfe {
        return Err(LifecycleError::precondition(
            "reports are only filed on PFE internships",
            internship.kind.label(),
        ));
    }
    if internship.status == InternshipStatus::Cancelled {
        return Err(LifecycleError::precondition(
            "the internship was cancelled",
            internship.status.label(),
        ));
    }
    let tutor = internship.tutor.clone().ok_or_else(|| {
        LifecycleError::precondition("the internship has no tutor yet", "unassigned")
    })?;
    let company = internship.company.clone();
    let intern = internship.intern.clone();
    validate(payload, file_ref)?;

    let existing = state
        .report_for_internship(internship_id)
        .map(|report| report.id.clone());
    let Some(report_id) = existing else {
        let id = ReportId(state.next_id("rpt"));
        let report = PfeReport {
            id: id.clone(),
            internship: internship_id.clone(),
            intern,
            tutor: Some(tutor),
            company,
            payload: payload.clone(),
            file_ref: file_ref.trim().to_string(),
            status: ReportStatus::Submitted,
            version: 1,
            is_final: false,
            last_review: None,
            updated_at: stamp.now,
        };
        let change = LedgerChange::of(&report, true);
        state.reports.insert(id, report);
        return Ok(change);
    };

    let report = state.report_mut(&report_id)?;
    if report.status == ReportStatus::Submitted
        && &report.payload == payload
        && report.file_ref == file_ref.trim()
    {
        return Ok(LedgerChange::of(report, false));
    }
    if !report.status.is_editable() {
        return Err(LifecycleError::precondition(
            "the report can only be resubmitted from draft",
            report.status.label(),
        ));
    }
    report.payload = payload.clone();
    report.file_ref = file_ref.trim().to_string();
    report.tutor = Some(tutor);
    report.status = ReportStatus::Submitted;
    report.updated_at = stamp.now;
    Ok(LedgerChange::of(report, true))
}

/// Pull a submitted report back to draft before review starts.
pub fn withdraw(
    state: &mut LifecycleState,
    report_id: &ReportId,
    caller: &User,
    stamp: &Stamp,
) -> Result<LedgerChange, LifecycleError> {
    let report = state.report_mut(report_id)?;
    if caller.role != Role::Intern || report.intern != caller.id {
        return Err(LifecycleError::denied(format!(
            "{} does not own report {report_id}",
            caller.id
        )));
    }
    match report.status {
        ReportStatus::Draft => Ok(LedgerChange::of(report, false)),
        ReportStatus::Submitted => {
            report.status = ReportStatus::Draft;
            report.updated_at = stamp.now;
            Ok(LedgerChange::of(report, true))
        }
        other => Err(LifecycleError::precondition(
            "only submitted reports can be withdrawn",
            other.label(),
        )),
    }
}

pub fn start_review(
    state: &mut LifecycleState,
    report_id: &ReportId,
    caller: &User,
    stamp: &Stamp,
) -> Result<LedgerChange, LifecycleError> {
    let report = state.report_mut(report_id)?;
    require_tutor(report, caller)?;
    match report.status {
        ReportStatus::UnderReview => Ok(LedgerChange::of(report, false)),
        ReportStatus::Submitted => {
            report.status = ReportStatus::UnderReview;
            report.updated_at = stamp.now;
            Ok(LedgerChange::of(report, true))
        }
        other => Err(LifecycleError::precondition(
            "only submitted reports can be taken into review",
            other.label(),
        )),
    }
}

/// Tutor decision. Rejection sends the report back to draft under the next version.
pub fn review(
    state: &mut LifecycleState,
    report_id: &ReportId,
    caller: &User,
    decision: ReviewDecision,
    comment: Option<&str>,
    stamp: &Stamp,
) -> Result<LedgerChange, LifecycleError> {
    let comment = comment
        .map(str::trim)
        .filter(|comment| !comment.is_empty())
        .map(str::to_string);
    let report = state.report_mut(report_id)?;
    require_tutor(report, caller)?;

    if is_replay(report, decision, comment.as_deref()) {
        return Ok(LedgerChange::of(report, false));
    }
    if !report.status.awaiting_review() {
        return Err(LifecycleError::precondition(
            "the report is not awaiting review",
            report.status.label(),
        ));
    }
    if decision == ReviewDecision::Reject && comment.is_none() {
        return Err(LifecycleError::invalid(
            "comment",
            "a rejection needs a comment",
        ));
    }

    report.last_review = Some(ReviewNote {
        reviewer: caller.id.clone(),
        decision,
        comment,
        reviewed_at: stamp.now,
        version: report.version,
    });
    match decision {
        ReviewDecision::Approve => report.status = ReportStatus::Approved,
        ReviewDecision::Reject => {
            report.status = ReportStatus::Draft;
            report.version += 1;
        }
    }
    report.updated_at = stamp.now;
    Ok(LedgerChange::of(report, true))
}

fn is_replay(report: &PfeReport, decision: ReviewDecision, comment: Option<&str>) -> bool {
    let Some(note) = &report.last_review else {
        return false;
    };
    if note.decision != decision || note.comment.as_deref() != comment {
        return false;
    }
    match decision {
        ReviewDecision::Approve => {
            report.status == ReportStatus::Approved && note.version == report.version
        }
        ReviewDecision::Reject => {
            report.status == ReportStatus::Draft && note.version + 1 == report.version
        }
    }
}

/// Freeze an approved report. HR of the report's company or admin only.
pub fn archive(
    state: &mut LifecycleState,
    report_id: &ReportId,
    caller: &User,
    stamp: &Stamp,
) -> Result<LedgerChange, LifecycleError> {
    let report = state.report_mut(report_id)?;
    visibility::require_staff_of(caller, &report.company)?;
    match report.status {
        ReportStatus::Archived => Ok(LedgerChange::of(report, false)),
        ReportStatus::Approved => {
            report.status = ReportStatus::Archived;
            report.is_final = true;
            report.updated_at = stamp.now;
            Ok(LedgerChange::of(report, true))
        }
        other => Err(LifecycleError::precondition(
            "only approved reports can be archived",
            other.label(),
        )),
    }
}

fn require_tutor(report: &PfeReport, caller: &User) -> Result<(), LifecycleError> {
    if caller.role == Role::Tutor && report.tutor.as_ref() == Some(&caller.id) {
        Ok(())
    } else {
        Err(LifecycleError::denied(format!(
            "{} is not the tutor of report {}",
            caller.id, report.id
        )))
    }
}
