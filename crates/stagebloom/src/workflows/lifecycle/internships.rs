//! Internship records created at approval, plus tutor assignment and progress tracking.

use super::catalog;
use super::domain::{
    Application, Internship, InternshipId, InternshipStatus, OfferDecisionStatus,
    Role, UserId,
};
use super::error::LifecycleError;
use super::quota::QuotaKeeper;
use super::repository::LifecycleState;

/// Outcome of a tutor assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TutorAssignment {
    /// The tutor was already assigned.
    Unchanged,
    Assigned { previous: Option<UserId> },
}

/// Create the active internship of an approved application.
pub fn create_for(
    state: &mut LifecycleState,
    application: &Application,
    intern: &UserId,
) -> Result<InternshipId, LifecycleError> {
    if let Some(existing) = state.internship_for_application(&application.id) {
        return Err(LifecycleError::conflict(format!(
            "application {} already has internship {}",
            application.id, existing.id
        )));
    }

    let (title, location) = describe(state, application);
    let id = InternshipId(state.next_id("int"));
    state.internships.insert(
        id.clone(),
        Internship {
            id: id.clone(),
            application: application.id.clone(),
            intern: intern.clone(),
            tutor: None,
            company: application.company.clone(),
            kind: application.kind,
            title,
            location,
            period: application.period,
            status: InternshipStatus::Active,
            progress: 0,
        },
    );
    Ok(id)
}

/// Title and location from the accepted offer, the first selected offer, or the PFE reference.
fn describe(state: &LifecycleState, application: &Application) -> (String, String) {
    let rows: Vec<_> = state.offers_of(&application.id).collect();
    let chosen = rows
        .iter()
        .find(|row| row.status == OfferDecisionStatus::Accepted)
        .or_else(|| rows.first())
        .and_then(|row| catalog::get(state, &row.offer).ok())
        .or_else(|| {
            application
                .pfe_reference
                .as_deref()
                .and_then(|reference| catalog::get_by_reference(state, reference))
        });

    match chosen {
        Some(offer) => (offer.title.clone(), offer.location.clone()),
        None => (
            format!("{} internship", application.kind.label()),
            String::new(),
        ),
    }
}

/// Assign or replace the tutor of an active internship.
pub fn assign_tutor(
    state: &mut LifecycleState,
    internship_id: &InternshipId,
    tutor_id: &UserId,
    quota: &QuotaKeeper,
) -> Result<TutorAssignment, LifecycleError> {
    let internship = state.internship(internship_id)?;
    if internship.status != InternshipStatus::Active {
        return Err(LifecycleError::precondition(
            "tutors can only be assigned to active internships",
            internship.status.label(),
        ));
    }
    if internship.tutor.as_ref() == Some(tutor_id) {
        return Ok(TutorAssignment::Unchanged);
    }
    let company = internship.company.clone();
    let previous = internship.tutor.clone();

    let tutor = state
        .users
        .get(tutor_id)
        .ok_or_else(|| LifecycleError::not_found("tutor", tutor_id))?;
    if tutor.role != Role::Tutor || !tutor.active {
        return Err(LifecycleError::invalid("tutor_id", "is not an active tutor"));
    }
    if tutor.company.as_ref() != Some(&company) {
        return Err(LifecycleError::invalid(
            "tutor_id",
            "tutor belongs to another company",
        ));
    }
    quota.check_tutor(state, tutor_id, Some(internship_id))?;

    state.internship_mut(internship_id)?.tutor = Some(tutor_id.clone());
    for report in state
        .reports
        .values_mut()
        .filter(|report| &report.internship == internship_id)
    {
        report.tutor = Some(tutor_id.clone());
    }

    quota.refresh_tutor(state, tutor_id);
    if let Some(previous) = &previous {
        quota.refresh_tutor(state, previous);
    }
    Ok(TutorAssignment::Assigned { previous })
}

/// Set progress, clamped to 0..=100. Returns the stored value.
pub fn update_progress(
    state: &mut LifecycleState,
    internship_id: &InternshipId,
    progress: i32,
) -> Result<u8, LifecycleError> {
    let internship = state.internship_mut(internship_id)?;
    if internship.status != InternshipStatus::Active {
        return Err(LifecycleError::precondition(
            "progress can only change on active internships",
            internship.status.label(),
        ));
    }
    let clamped = progress.clamp(0, 100) as u8;
    internship.progress = clamped;
    Ok(clamped)
}

/// Move an active internship to `completed` or `cancelled`.
pub fn close(
    state: &mut LifecycleState,
    internship_id: &InternshipId,
    status: InternshipStatus,
    quota: &QuotaKeeper,
) -> Result<bool, LifecycleError> {
    if status == InternshipStatus::Active {
        return Err(LifecycleError::invalid(
            "status",
            "must be completed or cancelled",
        ));
    }
    let internship = state.internship_mut(internship_id)?;
    if internship.status == status {
        return Ok(false);
    }
    if internship.status != InternshipStatus::Active {
        return Err(LifecycleError::precondition(
            "the internship is already closed",
            internship.status.label(),
        ));
    }
    internship.status = status;
    if status == InternshipStatus::Completed {
        internship.progress = 100;
    }
    let tutor = internship.tutor.clone();
    if let Some(tutor) = tutor {
        quota.refresh_tutor(state, &tutor);
    }
    Ok(true)
}
