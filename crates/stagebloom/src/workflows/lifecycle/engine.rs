//! Transition engine: the only place lifecycle state changes.
//!
//! Each transition resolves the caller, checks its guards and mutates the state inside one
//! repository transaction, recording exactly one event in the outbox. Events reach the bus
//! only after the transaction committed.

use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use crate::config::LifecycleConfig;

use super::applications::{self, OfferDecisionOutcome};
use super::clock::Clock;
use super::directory::{self, NewAccount};
use super::domain::{
    Actor, ApplicationId, ApplicationPayload, ApplicationStatus, CompanyId, Internship,
    InternshipId, InternshipStatus, InterviewId, InterviewRequest, InterviewStatus, Notification,
    OfferDecisionStatus, OfferId, PfeReport, ReportId, Role, User, UserId,
};
use super::error::LifecycleError;
use super::events::{EventBus, EventKind, EventSubject};
use super::internships::{self, TutorAssignment};
use super::interviews::{self, HrInterviewDecision, InterviewOutcome, ProposeInterview, TutorDecision};
use super::messages::{
    ApplicationView, ApprovalReceipt, RepairReport, ReviewRequest, SubmitReportRequest,
    SubmittedApplication, TutorAvailability,
};
use super::quota::QuotaKeeper;
use super::reports::{self, LedgerChange};
use super::repository::{LifecycleRepository, LifecycleState, RepositoryError, Stamp};
use super::visibility;

pub struct TransitionEngine<R, B> {
    repository: Arc<R>,
    bus: Arc<B>,
    clock: Arc<dyn Clock>,
    quota: QuotaKeeper,
    config: LifecycleConfig,
    flush_lock: Mutex<()>,
}

impl<R, B> TransitionEngine<R, B>
where
    R: LifecycleRepository + 'static,
    B: EventBus + 'static,
{
    pub fn new(
        repository: Arc<R>,
        bus: Arc<B>,
        clock: Arc<dyn Clock>,
        config: LifecycleConfig,
    ) -> Self {
        let quota = QuotaKeeper::new(config.candidate_quota, config.tutor_capacity);
        Self {
            repository,
            bus,
            clock,
            quota,
            config,
            flush_lock: Mutex::new(()),
        }
    }

    pub fn repository(&self) -> &Arc<R> {
        &self.repository
    }

    pub fn quota(&self) -> QuotaKeeper {
        self.quota
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    fn stamp(&self, actor: Option<&UserId>) -> Stamp {
        let now = self.clock.now();
        Stamp {
            now,
            today: now.with_timezone(&self.config.utc_offset).date_naive(),
            actor: actor.cloned(),
        }
    }

    /// Run `work` in one transaction, then hand the outbox to the bus.
    fn commit<T, F>(
        &self,
        operation: &'static str,
        actor: Option<&UserId>,
        work: F,
    ) -> Result<T, LifecycleError>
    where
        F: FnOnce(&mut LifecycleState, &Stamp) -> Result<T, LifecycleError>,
    {
        let stamp = self.stamp(actor);
        let result = self.repository.transact(|state| work(state, &stamp));
        let actor = actor.map(|id| id.0.as_str()).unwrap_or("anonymous");

        match &result {
            Ok(_) => {
                debug!(operation, actor, "transition committed");
                if let Err(error) = self.flush_outbox() {
                    warn!(operation, %error, "outbox flush failed; events stay queued");
                }
            }
            Err(LifecycleError::PermissionDenied { reason }) => {
                warn!(operation, actor, %reason, "transition refused");
            }
            Err(error) => {
                info!(operation, actor, code = error.code(), %error, "transition rejected");
            }
        }
        result
    }

    /// Publish committed events in sequence order; acknowledged events leave the outbox.
    ///
    /// Stops at the first bus failure so later events never overtake an earlier one.
    pub fn flush_outbox(&self) -> Result<usize, LifecycleError> {
        let _guard = self.flush_lock.lock().map_err(|_| {
            RepositoryError::Unavailable("outbox flush lock poisoned".to_string())
        })?;

        let pending = self.repository.read(|state| state.outbox.clone())?;
        let mut delivered = None;
        let mut count = 0;
        for event in pending {
            let sequence = event.sequence;
            let name = event.kind.name();
            match self.bus.publish(event) {
                Ok(()) => {
                    info!(sequence, event = name, "event published");
                    delivered = Some(sequence);
                    count += 1;
                }
                Err(error) => {
                    warn!(sequence, event = name, %error, "event bus refused event");
                    break;
                }
            }
        }

        if let Some(last) = delivered {
            self.repository.transact(|state| {
                state.outbox.retain(|event| event.sequence > last);
                Ok::<_, LifecycleError>(())
            })?;
        }
        Ok(count)
    }

    pub fn register_candidate(
        &self,
        actor: &Actor,
        account: NewAccount,
    ) -> Result<UserId, LifecycleError> {
        self.commit("register_candidate", actor.user_id(), |state, stamp| {
            if actor.user_id().is_some() {
                let caller = active_caller(state, actor)?;
                if caller.role != Role::Admin {
                    return Err(LifecycleError::denied(format!(
                        "{} cannot register candidates",
                        caller.id
                    )));
                }
            }
            let id = directory::register_candidate(state, &account, &self.quota)?;
            state.record_event(
                stamp,
                EventKind::CandidateRegistered {
                    email: directory::normalize_email(&account.email),
                },
                EventSubject::default(),
            );
            Ok(id)
        })
    }

    /// Intake. Anonymous visitors, candidates (with their own email) and admins may submit.
    ///
    /// A submission carrying the email of a registered candidate is charged to that candidate.
    pub fn submit_application(
        &self,
        actor: &Actor,
        payload: ApplicationPayload,
    ) -> Result<SubmittedApplication, LifecycleError> {
        self.commit("submit_application", actor.user_id(), |state, stamp| {
            let mut charged = None;
            match actor {
                Actor::Anonymous => {}
                Actor::User(_) => {
                    let caller = active_caller(state, actor)?;
                    match caller.role {
                        Role::Candidate => {
                            if directory::normalize_email(&payload.identity.email) != caller.email
                            {
                                return Err(LifecycleError::invalid(
                                    "identity.email",
                                    "must match the signed-in account",
                                ));
                            }
                            charged = Some(caller.id);
                        }
                        Role::Admin => {}
                        other => {
                            return Err(LifecycleError::denied(format!(
                                "role {} cannot submit applications",
                                other.label()
                            )));
                        }
                    }
                }
            }
            if charged.is_none() {
                charged = directory::lookup_by_email(state, &payload.identity.email)
                    .filter(|user| user.role == Role::Candidate)
                    .map(|user| user.id.clone());
            }

            if let Some(candidate) = &charged {
                self.quota.check_candidate(state.user(candidate)?)?;
            }
            let application_id = applications::create(state, &payload, charged.as_ref(), stamp)?;
            if let Some(candidate) = &charged {
                self.quota.consume(state.user_mut(candidate)?);
            }

            let application = state.application(&application_id)?;
            let company = application.company.clone();
            let candidate_email = application.identity.email.clone();
            state.record_event(
                stamp,
                EventKind::ApplicationSubmitted {
                    company,
                    candidate_email,
                },
                EventSubject::application(&application_id),
            );
            Ok(SubmittedApplication {
                application_id,
                submitted_at: stamp.now,
            })
        })
    }

    pub fn propose_interview(
        &self,
        actor: &Actor,
        application_id: &ApplicationId,
        proposal: ProposeInterview,
    ) -> Result<InterviewId, LifecycleError> {
        self.commit("propose_interview", actor.user_id(), |state, stamp| {
            let caller = active_caller(state, actor)?;
            let company = state.application(application_id)?.company.clone();
            visibility::require_staff_of(&caller, &company)?;

            let id = interviews::propose(
                state,
                application_id,
                &proposal,
                &caller,
                &self.quota,
                stamp,
            )?;
            state.record_event(
                stamp,
                EventKind::InterviewProposed {
                    interview: id.clone(),
                    tutor: proposal.tutor_id.clone(),
                    company,
                    date: proposal.date,
                    time: proposal.time,
                    location: proposal.location.trim().to_string(),
                },
                EventSubject::application(application_id),
            );
            Ok(id)
        })
    }

    pub fn tutor_decision(
        &self,
        actor: &Actor,
        request_id: &InterviewId,
        decision: TutorDecision,
    ) -> Result<InterviewRequest, LifecycleError> {
        self.commit("tutor_decision", actor.user_id(), |state, stamp| {
            let caller = active_caller(state, actor)?;
            let outcome = interviews::decide_as_tutor(state, request_id, &caller, &decision, stamp)?;
            let request = state.interview(request_id)?.clone();

            if let InterviewOutcome::Changed(status) = outcome {
                let kind = match status {
                    InterviewStatus::Accepted => EventKind::InterviewAccepted {
                        interview: request.id.clone(),
                        tutor: request.tutor.clone(),
                        date: request.proposed_date,
                        time: request.proposed_time,
                        location: request.location.clone(),
                    },
                    InterviewStatus::Rejected => EventKind::InterviewRejected {
                        interview: request.id.clone(),
                        tutor: request.tutor.clone(),
                        comment: request.tutor_comment.clone(),
                    },
                    InterviewStatus::RescheduleRequested => {
                        EventKind::InterviewRescheduleRequested {
                            interview: request.id.clone(),
                            tutor: request.tutor.clone(),
                            comment: request.tutor_comment.clone(),
                            alternative_date: request
                                .alternative_date
                                .unwrap_or(request.proposed_date),
                            alternative_time: request
                                .alternative_time
                                .unwrap_or(request.proposed_time),
                        }
                    }
                    InterviewStatus::PendingTutor => {
                        return Err(LifecycleError::precondition(
                            "a tutor decision cannot reopen a request",
                            status.label(),
                        ));
                    }
                };
                state.record_event(stamp, kind, EventSubject::application(&request.application));
            }
            Ok(request)
        })
    }

    pub fn hr_interview_decision(
        &self,
        actor: &Actor,
        request_id: &InterviewId,
        decision: HrInterviewDecision,
    ) -> Result<InterviewRequest, LifecycleError> {
        self.commit("hr_interview_decision", actor.user_id(), |state, stamp| {
            let caller = active_caller(state, actor)?;
            let application_id = state.interview(request_id)?.application.clone();
            let company = state.application(&application_id)?.company.clone();
            visibility::require_staff_of(&caller, &company)?;

            let outcome = interviews::decide_as_hr(state, request_id, &caller, decision, stamp)?;
            let request = state.interview(request_id)?.clone();
            if let InterviewOutcome::Changed(status) = outcome {
                let kind = if status == InterviewStatus::Accepted {
                    EventKind::InterviewAccepted {
                        interview: request.id.clone(),
                        tutor: request.tutor.clone(),
                        date: request.proposed_date,
                        time: request.proposed_time,
                        location: request.location.clone(),
                    }
                } else {
                    EventKind::InterviewCancelled {
                        interview: request.id.clone(),
                        tutor: request.tutor.clone(),
                    }
                };
                state.record_event(stamp, kind, EventSubject::application(&application_id));
            }
            Ok(request)
        })
    }

    /// Apply the multi-offer acceptance rule to one offer of an application.
    pub fn set_offer_decision(
        &self,
        actor: &Actor,
        application_id: &ApplicationId,
        offer_id: &OfferId,
        decision: OfferDecisionStatus,
    ) -> Result<ApplicationView, LifecycleError> {
        self.commit("set_offer_decision", actor.user_id(), |state, stamp| {
            let caller = active_caller(state, actor)?;
            let application = state.application(application_id)?;
            visibility::require_staff_of(&caller, &application.company)?;

            let current = state
                .offers_of(application_id)
                .find(|row| &row.offer == offer_id)
                .map(|row| row.status);
            if current != Some(decision) && !application.status.is_open() {
                return Err(LifecycleError::precondition(
                    "offer decisions need an open application",
                    application.status.label(),
                ));
            }

            match applications::set_per_offer_status(state, application_id, offer_id, decision)? {
                OfferDecisionOutcome::Unchanged => {}
                OfferDecisionOutcome::Accepted { forced_rejections } => {
                    state.record_event(
                        stamp,
                        EventKind::OfferAccepted {
                            offer: offer_id.clone(),
                            forced_rejections,
                        },
                        EventSubject::application(application_id),
                    );
                }
                OfferDecisionOutcome::Rejected => {
                    state.record_event(
                        stamp,
                        EventKind::OfferRejected {
                            offer: offer_id.clone(),
                        },
                        EventSubject::application(application_id),
                    );
                }
                OfferDecisionOutcome::AllRejected => {
                    let reason = self.config.default_rejection_reason.clone();
                    interviews::close_open_requests(state, application_id, stamp);
                    let application = state.application_mut(application_id)?;
                    application.status = ApplicationStatus::Rejected;
                    application.rejection_reason = Some(reason.clone());
                    state.record_event(
                        stamp,
                        EventKind::ApplicationRejected {
                            reason,
                            derived: true,
                        },
                        EventSubject::application(application_id),
                    );
                }
            }
            view_of(state, application_id)
        })
    }

    pub fn approve_application(
        &self,
        actor: &Actor,
        application_id: &ApplicationId,
    ) -> Result<ApprovalReceipt, LifecycleError> {
        self.commit("approve_application", actor.user_id(), |state, stamp| {
            let caller = active_caller(state, actor)?;
            let application = state.application(application_id)?.clone();
            visibility::require_staff_of(&caller, &application.company)?;

            if !application.status.is_open() {
                return Err(LifecycleError::precondition(
                    "only pending or interview_scheduled applications can be approved",
                    application.status.label(),
                ));
            }
            if let Some(request) = state.interviews.values().find(|request| {
                request.application == *application_id
                    && request.status == InterviewStatus::RescheduleRequested
            }) {
                return Err(LifecycleError::precondition(
                    format!("interview request {} awaits a reschedule decision", request.id),
                    request.status.label(),
                ));
            }
            let awaits_offer_decision = {
                let mut rows = state.offers_of(application_id).peekable();
                rows.peek().is_some()
                    && !rows.any(|row| row.status == OfferDecisionStatus::Accepted)
            };
            if awaits_offer_decision {
                return Err(LifecycleError::precondition(
                    "accept one of the selected offers before approving",
                    application.status.label(),
                ));
            }

            let existing_intern = application
                .user_created
                .as_ref()
                .and_then(|id| state.users.get(id))
                .filter(|user| user.role == Role::Intern)
                .map(|user| user.id.clone());
            let (intern_id, credentials) = match existing_intern {
                Some(id) => (id, None),
                None => {
                    let credentials = directory::create_intern(
                        state,
                        &NewAccount {
                            email: application.identity.email.clone(),
                            full_name: application.identity.full_name(),
                        },
                        &application.company,
                        stamp.now,
                        self.config.password_length,
                    )?;
                    (credentials.user_id.clone(), Some(credentials))
                }
            };

            {
                let stored = state.application_mut(application_id)?;
                stored.user_created = Some(intern_id.clone());
                stored.status = ApplicationStatus::Approved;
            }
            let internship_id = internships::create_for(state, &application, &intern_id)?;

            state.record_event(
                stamp,
                EventKind::ApplicationApproved {
                    intern: intern_id.clone(),
                    credentials: credentials.clone(),
                },
                EventSubject::internship(application_id, &internship_id),
            );
            Ok(ApprovalReceipt {
                application_id: application_id.clone(),
                internship_id,
                intern_id,
                credentials,
            })
        })
    }

    /// Explicit rejection. Replaying the same rejection returns the stored application.
    pub fn reject_application(
        &self,
        actor: &Actor,
        application_id: &ApplicationId,
        reason: &str,
    ) -> Result<ApplicationView, LifecycleError> {
        self.commit("reject_application", actor.user_id(), |state, stamp| {
            let caller = active_caller(state, actor)?;
            let application = state.application(application_id)?;
            visibility::require_staff_of(&caller, &application.company)?;

            let reason = reason.trim();
            if reason.is_empty() {
                return Err(LifecycleError::invalid("reason", "is required"));
            }
            if application.status == ApplicationStatus::Rejected
                && application.rejection_reason.as_deref() == Some(reason)
            {
                return view_of(state, application_id);
            }
            if !application.status.is_open() {
                return Err(LifecycleError::precondition(
                    "only open applications can be rejected",
                    application.status.label(),
                ));
            }

            applications::reject_all_offers(state, application_id);
            interviews::close_open_requests(state, application_id, stamp);
            let stored = state.application_mut(application_id)?;
            stored.status = ApplicationStatus::Rejected;
            stored.rejection_reason = Some(reason.to_string());
            state.record_event(
                stamp,
                EventKind::ApplicationRejected {
                    reason: reason.to_string(),
                    derived: false,
                },
                EventSubject::application(application_id),
            );
            view_of(state, application_id)
        })
    }

    pub fn assign_tutor(
        &self,
        actor: &Actor,
        internship_id: &InternshipId,
        tutor_id: &UserId,
    ) -> Result<Internship, LifecycleError> {
        self.commit("assign_tutor", actor.user_id(), |state, stamp| {
            let caller = active_caller(state, actor)?;
            let internship = state.internship(internship_id)?;
            visibility::require_staff_of(&caller, &internship.company)?;

            let assignment = internships::assign_tutor(state, internship_id, tutor_id, &self.quota)?;
            let internship = state.internship(internship_id)?.clone();
            if let TutorAssignment::Assigned { previous } = assignment {
                state.record_event(
                    stamp,
                    EventKind::TutorAssigned {
                        tutor: tutor_id.clone(),
                        intern: internship.intern.clone(),
                        previous,
                    },
                    EventSubject::internship(&internship.application, internship_id),
                );
            }
            Ok(internship)
        })
    }

    /// Tutor of the internship, its company's HR, or an admin.
    pub fn update_progress(
        &self,
        actor: &Actor,
        internship_id: &InternshipId,
        progress: i32,
    ) -> Result<Internship, LifecycleError> {
        self.commit("update_progress", actor.user_id(), |state, stamp| {
            let caller = active_caller(state, actor)?;
            let internship = state.internship(internship_id)?;
            let is_tutor = caller.role == Role::Tutor && internship.tutor.as_ref() == Some(&caller.id);
            if !is_tutor {
                visibility::require_staff_of(&caller, &internship.company)?;
            }
            let before = internship.progress;

            let stored = internships::update_progress(state, internship_id, progress)?;
            let internship = state.internship(internship_id)?.clone();
            if stored != before {
                state.record_event(
                    stamp,
                    EventKind::ProgressUpdated { progress: stored },
                    EventSubject::internship(&internship.application, internship_id),
                );
            }
            Ok(internship)
        })
    }

    pub fn close_internship(
        &self,
        actor: &Actor,
        internship_id: &InternshipId,
        status: InternshipStatus,
    ) -> Result<Internship, LifecycleError> {
        self.commit("close_internship", actor.user_id(), |state, stamp| {
            let caller = active_caller(state, actor)?;
            let company = state.internship(internship_id)?.company.clone();
            visibility::require_staff_of(&caller, &company)?;

            let changed = internships::close(state, internship_id, status, &self.quota)?;
            let internship = state.internship(internship_id)?.clone();
            if changed {
                state.record_event(
                    stamp,
                    EventKind::InternshipClosed { status },
                    EventSubject::internship(&internship.application, internship_id),
                );
            }
            Ok(internship)
        })
    }

    pub fn submit_report(
        &self,
        actor: &Actor,
        internship_id: &InternshipId,
        request: SubmitReportRequest,
    ) -> Result<PfeReport, LifecycleError> {
        self.commit("submit_report", actor.user_id(), |state, stamp| {
            let caller = active_caller(state, actor)?;
            let change = reports::submit(
                state,
                internship_id,
                &caller,
                &request.payload,
                &request.file_ref,
                stamp,
            )?;
            record_ledger_event(state, stamp, &change, |version| {
                EventKind::ReportSubmitted { version }
            })
        })
    }

    pub fn withdraw_report(
        &self,
        actor: &Actor,
        report_id: &ReportId,
    ) -> Result<PfeReport, LifecycleError> {
        self.commit("withdraw_report", actor.user_id(), |state, stamp| {
            let caller = active_caller(state, actor)?;
            let change = reports::withdraw(state, report_id, &caller, stamp)?;
            record_ledger_event(state, stamp, &change, |version| {
                EventKind::ReportWithdrawn { version }
            })
        })
    }

    pub fn start_review(
        &self,
        actor: &Actor,
        report_id: &ReportId,
    ) -> Result<PfeReport, LifecycleError> {
        self.commit("start_review", actor.user_id(), |state, stamp| {
            let caller = active_caller(state, actor)?;
            let change = reports::start_review(state, report_id, &caller, stamp)?;
            record_ledger_event(state, stamp, &change, |version| {
                EventKind::ReportReviewStarted { version }
            })
        })
    }

    pub fn review_report(
        &self,
        actor: &Actor,
        report_id: &ReportId,
        request: ReviewRequest,
    ) -> Result<PfeReport, LifecycleError> {
        self.commit("review_report", actor.user_id(), |state, stamp| {
            let caller = active_caller(state, actor)?;
            let change = reports::review(
                state,
                report_id,
                &caller,
                request.decision,
                request.comment.as_deref(),
                stamp,
            )?;
            let comment = state
                .report(report_id)?
                .last_review
                .as_ref()
                .and_then(|note| note.comment.clone());
            let reviewed_version = state
                .report(report_id)?
                .last_review
                .as_ref()
                .map(|note| note.version)
                .unwrap_or(change.version);
            record_ledger_event(state, stamp, &change, |_| EventKind::ReportReviewed {
                decision: request.decision,
                comment,
                version: reviewed_version,
            })
        })
    }

    pub fn archive_report(
        &self,
        actor: &Actor,
        report_id: &ReportId,
    ) -> Result<PfeReport, LifecycleError> {
        self.commit("archive_report", actor.user_id(), |state, stamp| {
            let caller = active_caller(state, actor)?;
            let change = reports::archive(state, report_id, &caller, stamp)?;
            record_ledger_event(state, stamp, &change, |version| {
                EventKind::ReportArchived { version }
            })
        })
    }

    pub fn list_applications(&self, actor: &Actor) -> Result<Vec<ApplicationView>, LifecycleError> {
        self.query(actor, |state, caller| {
            visibility::applications(state, caller)
                .into_iter()
                .map(|application| ApplicationView {
                    application: application.clone(),
                    offers: state.offers_of(&application.id).cloned().collect(),
                })
                .collect()
        })
    }

    pub fn list_interviews(&self, actor: &Actor) -> Result<Vec<InterviewRequest>, LifecycleError> {
        self.query(actor, |state, caller| {
            visibility::interviews(state, caller)
                .into_iter()
                .cloned()
                .collect()
        })
    }

    pub fn list_internships(&self, actor: &Actor) -> Result<Vec<Internship>, LifecycleError> {
        self.query(actor, |state, caller| {
            visibility::internships(state, caller)
                .into_iter()
                .cloned()
                .collect()
        })
    }

    pub fn list_reports(&self, actor: &Actor) -> Result<Vec<PfeReport>, LifecycleError> {
        self.query(actor, |state, caller| {
            visibility::reports(state, caller)
                .into_iter()
                .cloned()
                .collect()
        })
    }

    /// The caller's own notifications, newest first.
    pub fn list_notifications(&self, actor: &Actor) -> Result<Vec<Notification>, LifecycleError> {
        self.query(actor, |state, caller| {
            let mut own: Vec<Notification> = state
                .notifications
                .iter()
                .filter(|notification| notification.recipient == caller.id)
                .cloned()
                .collect();
            own.sort_by(|a, b| {
                b.created_at
                    .cmp(&a.created_at)
                    .then_with(|| b.event_sequence.cmp(&a.event_sequence))
            });
            own
        })
    }

    /// Tutors of `company` that can take another internship.
    pub fn available_tutors(
        &self,
        actor: &Actor,
        company: &CompanyId,
    ) -> Result<Vec<TutorAvailability>, LifecycleError> {
        let quota = self.quota;
        self.repository.read(|state| {
            let caller = active_caller(state, actor)?;
            visibility::require_staff_of(&caller, company)?;
            let tutors = directory::available_tutors(state, company, &quota)
                .into_iter()
                .map(|(tutor, load)| TutorAvailability {
                    tutor_id: tutor.id.clone(),
                    full_name: tutor.full_name.clone(),
                    active_internships: load,
                    capacity: quota.tutor_capacity(),
                })
                .collect();
            Ok::<_, LifecycleError>(tutors)
        })?
    }

    /// Recount every tutor's cached load. Admin only.
    pub fn repair(&self, actor: &Actor) -> Result<RepairReport, LifecycleError> {
        self.commit("repair", actor.user_id(), |state, _| {
            let caller = active_caller(state, actor)?;
            if caller.role != Role::Admin {
                return Err(LifecycleError::denied(format!(
                    "{} cannot run repair",
                    caller.id
                )));
            }
            Ok(self.recount(state))
        })
    }

    /// System maintenance used by the bootstrap command; runs without a caller.
    pub(crate) fn maintain<T, F>(&self, operation: &'static str, work: F) -> Result<T, LifecycleError>
    where
        F: FnOnce(&mut LifecycleState, &QuotaKeeper) -> Result<T, LifecycleError>,
    {
        let quota = self.quota;
        self.commit(operation, None, |state, _| work(state, &quota))
    }

    pub(crate) fn recount(&self, state: &mut LifecycleState) -> RepairReport {
        let drifts = self.quota.repair(state);
        for drift in &drifts {
            warn!(
                tutor = %drift.tutor,
                cached = drift.cached,
                actual = drift.actual,
                "tutor load drifted"
            );
        }
        RepairReport { drifts }
    }

    fn query<T, F>(&self, actor: &Actor, view: F) -> Result<T, LifecycleError>
    where
        F: FnOnce(&LifecycleState, &User) -> T,
    {
        let listed = self.repository.read(|state| {
            let caller = active_caller(state, actor)?;
            Ok::<_, LifecycleError>(view(state, &caller))
        })?;
        if let Err(LifecycleError::PermissionDenied { reason }) = &listed {
            warn!(%reason, "listing refused");
        }
        listed
    }
}

/// Resolve the caller and refuse anonymous, unknown or inactive identities.
fn active_caller(state: &LifecycleState, actor: &Actor) -> Result<User, LifecycleError> {
    let id = actor
        .user_id()
        .ok_or_else(|| LifecycleError::denied("anonymous caller"))?;
    let user = state
        .users
        .get(id)
        .ok_or_else(|| LifecycleError::denied(format!("unknown user {id}")))?;
    if !user.active {
        return Err(LifecycleError::denied(format!("{id} is inactive")));
    }
    Ok(user.clone())
}

fn view_of(
    state: &LifecycleState,
    application_id: &ApplicationId,
) -> Result<ApplicationView, LifecycleError> {
    Ok(ApplicationView {
        application: state.application(application_id)?.clone(),
        offers: state.offers_of(application_id).cloned().collect(),
    })
}

fn record_ledger_event(
    state: &mut LifecycleState,
    stamp: &Stamp,
    change: &LedgerChange,
    kind: impl FnOnce(u32) -> EventKind,
) -> Result<PfeReport, LifecycleError> {
    let report = state.report(&change.report)?.clone();
    if change.changed {
        state.record_event(
            stamp,
            kind(change.version),
            EventSubject::report(&report.internship, &report.id),
        );
    }
    Ok(report)
}
