//! Role-based visibility. Every function here is a pure function of the caller and the state.

use super::domain::{
    Application, CompanyId, Internship, InterviewRequest, PfeReport, Role, User,
};
use super::error::LifecycleError;
use super::repository::LifecycleState;

pub fn can_see_application(state: &LifecycleState, caller: &User, application: &Application) -> bool {
    if !caller.active {
        return false;
    }
    match caller.role {
        Role::Admin => true,
        Role::Hr => caller.company.as_ref() == Some(&application.company),
        Role::Tutor => state.interviews.values().any(|request| {
            request.application == application.id && request.tutor == caller.id
        }),
        Role::Intern => false,
        Role::Candidate => {
            application.user_created.as_ref() == Some(&caller.id)
                || application.submitted_by.as_ref() == Some(&caller.id)
                || application.identity.email == caller.email
        }
    }
}

pub fn can_see_interview(state: &LifecycleState, caller: &User, request: &InterviewRequest) -> bool {
    if !caller.active {
        return false;
    }
    match caller.role {
        Role::Admin => true,
        Role::Hr => state
            .applications
            .get(&request.application)
            .is_some_and(|application| caller.company.as_ref() == Some(&application.company)),
        Role::Tutor => request.tutor == caller.id,
        Role::Intern | Role::Candidate => false,
    }
}

pub fn can_see_internship(caller: &User, internship: &Internship) -> bool {
    if !caller.active {
        return false;
    }
    match caller.role {
        Role::Admin => true,
        Role::Hr => caller.company.as_ref() == Some(&internship.company),
        Role::Tutor => internship.tutor.as_ref() == Some(&caller.id),
        Role::Intern => internship.intern == caller.id,
        Role::Candidate => false,
    }
}

/// Archived reports stay visible to their intern.
pub fn can_see_report(caller: &User, report: &PfeReport) -> bool {
    if !caller.active {
        return false;
    }
    match caller.role {
        Role::Admin => true,
        Role::Hr => caller.company.as_ref() == Some(&report.company),
        Role::Tutor => report.tutor.as_ref() == Some(&caller.id),
        Role::Intern => report.intern == caller.id,
        Role::Candidate => false,
    }
}

pub fn applications<'s>(state: &'s LifecycleState, caller: &User) -> Vec<&'s Application> {
    state
        .applications
        .values()
        .filter(|application| can_see_application(state, caller, application))
        .collect()
}

pub fn interviews<'s>(state: &'s LifecycleState, caller: &User) -> Vec<&'s InterviewRequest> {
    state
        .interviews
        .values()
        .filter(|request| can_see_interview(state, caller, request))
        .collect()
}

pub fn internships<'s>(state: &'s LifecycleState, caller: &User) -> Vec<&'s Internship> {
    state
        .internships
        .values()
        .filter(|internship| can_see_internship(caller, internship))
        .collect()
}

pub fn reports<'s>(state: &'s LifecycleState, caller: &User) -> Vec<&'s PfeReport> {
    state
        .reports
        .values()
        .filter(|report| can_see_report(caller, report))
        .collect()
}

/// HR of `company` or any admin.
pub fn require_staff_of(caller: &User, company: &CompanyId) -> Result<(), LifecycleError> {
    if !caller.active {
        return Err(LifecycleError::denied(format!("{} is inactive", caller.id)));
    }
    match caller.role {
        Role::Admin => Ok(()),
        Role::Hr if caller.company.as_ref() == Some(company) => Ok(()),
        Role::Hr => Err(LifecycleError::denied(format!(
            "hr {} does not belong to company {company}",
            caller.id
        ))),
        other => Err(LifecycleError::denied(format!(
            "role {} cannot act for company {company}",
            other.label()
        ))),
    }
}
