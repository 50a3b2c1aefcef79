//! Post-commit side effects: in-app notifications and candidate emails.
//!
//! Effects are best-effort. A failure is logged and kept for `retry_failed`; it never reaches
//! the caller of the transition that produced the event.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::{debug, info, warn};

use super::domain::{
    Application, ApplicationId, CompanyId, Notification, NotificationId, NotificationKind,
    ReviewDecision, Role, UserId,
};
use super::events::{BusError, EventBus, EventKind, LifecycleEvent, Secret};
use super::repository::{LifecycleRepository, LifecycleState, RepositoryError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailTemplate {
    ApplicationReceived,
    InterviewInvitation,
    InterviewConfirmed,
    OfferAccepted,
    ApplicationApproved,
    ApplicationRejected,
}

impl EmailTemplate {
    pub const fn name(self) -> &'static str {
        match self {
            EmailTemplate::ApplicationReceived => "application_received",
            EmailTemplate::InterviewInvitation => "interview_invitation",
            EmailTemplate::InterviewConfirmed => "interview_confirmed",
            EmailTemplate::OfferAccepted => "offer_accepted",
            EmailTemplate::ApplicationApproved => "application_approved",
            EmailTemplate::ApplicationRejected => "application_rejected",
        }
    }
}

/// Email handed to the mail transport. Rendering belongs to the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboundEmail {
    pub template: EmailTemplate,
    pub to: String,
    pub placeholders: BTreeMap<&'static str, String>,
    /// One-time password of a freshly issued account.
    #[serde(skip)]
    pub password: Option<Secret>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationDraft {
    pub recipient: UserId,
    pub title: String,
    pub message: String,
    pub kind: NotificationKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Notify(NotificationDraft),
    Email(OutboundEmail),
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("mail transport failed: {0}")]
    Mail(String),
    #[error("push transport failed: {0}")]
    Push(String),
    #[error(transparent)]
    Storage(#[from] RepositoryError),
    #[error("dispatcher state poisoned")]
    Poisoned,
}

pub trait Mailer: Send + Sync {
    fn send(&self, email: &OutboundEmail) -> Result<(), DispatchError>;
}

pub trait PushNotifier: Send + Sync {
    fn push(&self, notification: &Notification) -> Result<(), DispatchError>;
}

/// Work left over from a failed attempt.
#[derive(Debug, Clone)]
enum PendingWork {
    Store {
        sequence: u64,
        draft: NotificationDraft,
        at: chrono::DateTime<chrono::Utc>,
    },
    Push(Notification),
    Mail(OutboundEmail),
}

#[derive(Debug, Clone)]
struct FailedEffect {
    work: PendingWork,
    attempts: u32,
    last_error: String,
}

#[derive(Debug, Default)]
struct Progress {
    last_sequence: u64,
    failed: Vec<FailedEffect>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchSummary {
    pub sequence: u64,
    pub delivered: usize,
    pub failed: usize,
    /// The event had already been handled.
    pub duplicate: bool,
}

pub struct SideEffectDispatcher<R, M, N> {
    repository: Arc<R>,
    mailer: Arc<M>,
    notifier: Arc<N>,
    progress: Mutex<Progress>,
}

impl<R, M, N> SideEffectDispatcher<R, M, N>
where
    R: LifecycleRepository,
    M: Mailer,
    N: PushNotifier,
{
    pub fn new(repository: Arc<R>, mailer: Arc<M>, notifier: Arc<N>) -> Self {
        Self {
            repository,
            mailer,
            notifier,
            progress: Mutex::new(Progress::default()),
        }
    }

    /// Run the fan-out of one event. Redelivered events are ignored.
    pub fn dispatch(&self, event: &LifecycleEvent) -> Result<DispatchSummary, DispatchError> {
        let mut progress = self.progress.lock().map_err(|_| DispatchError::Poisoned)?;
        let mut summary = DispatchSummary {
            sequence: event.sequence,
            ..DispatchSummary::default()
        };
        if event.sequence <= progress.last_sequence {
            debug!(sequence = event.sequence, "duplicate delivery ignored");
            summary.duplicate = true;
            return Ok(summary);
        }

        let effects = self.repository.read(|state| plan_effects(state, event))?;
        for effect in effects {
            let work = match effect {
                Effect::Notify(draft) => PendingWork::Store {
                    sequence: event.sequence,
                    draft,
                    at: event.timestamp,
                },
                Effect::Email(email) => PendingWork::Mail(email),
            };
            match self.perform(work) {
                Ok(()) => summary.delivered += 1,
                Err(failed) => {
                    warn!(
                        sequence = event.sequence,
                        event = event.kind.name(),
                        error = %failed.last_error,
                        "side effect failed; queued for retry"
                    );
                    summary.failed += 1;
                    progress.failed.push(failed);
                }
            }
        }

        progress.last_sequence = event.sequence;
        info!(
            sequence = event.sequence,
            event = event.kind.name(),
            delivered = summary.delivered,
            failed = summary.failed,
            "event dispatched"
        );
        Ok(summary)
    }

    /// Attempt every queued failure once more. Returns how many went through.
    pub fn retry_failed(&self) -> Result<usize, DispatchError> {
        let mut progress = self.progress.lock().map_err(|_| DispatchError::Poisoned)?;
        let queued = std::mem::take(&mut progress.failed);
        let mut recovered = 0;
        for mut failed in queued {
            match self.perform(failed.work.clone()) {
                Ok(()) => recovered += 1,
                Err(again) => {
                    failed.attempts += 1;
                    failed.work = again.work;
                    failed.last_error = again.last_error;
                    warn!(
                        attempts = failed.attempts,
                        error = %failed.last_error,
                        "side effect retry failed"
                    );
                    progress.failed.push(failed);
                }
            }
        }
        Ok(recovered)
    }

    pub fn pending_failures(&self) -> usize {
        self.progress
            .lock()
            .map(|progress| progress.failed.len())
            .unwrap_or(0)
    }

    pub fn last_sequence(&self) -> u64 {
        self.progress
            .lock()
            .map(|progress| progress.last_sequence)
            .unwrap_or(0)
    }

    /// Execute one unit of work; on failure return what is still left to do.
    fn perform(&self, work: PendingWork) -> Result<(), FailedEffect> {
        let failed = |work: PendingWork, error: DispatchError| FailedEffect {
            work,
            attempts: 1,
            last_error: error.to_string(),
        };

        match work {
            PendingWork::Mail(email) => self.mailer.send(&email).map_err(|error| {
                failed(PendingWork::Mail(email), error)
            }),
            PendingWork::Push(notification) => {
                self.notifier.push(&notification).map_err(|error| {
                    failed(PendingWork::Push(notification), error)
                })
            }
            PendingWork::Store {
                sequence,
                draft,
                at,
            } => {
                let stored = self
                    .repository
                    .transact(|state| Ok::<_, DispatchError>(store_notification(state, sequence, &draft, at)))
                    .map_err(|error| {
                        failed(
                            PendingWork::Store {
                                sequence,
                                draft: draft.clone(),
                                at,
                            },
                            error,
                        )
                    })?;
                match stored {
                    Some(notification) => self
                        .notifier
                        .push(&notification)
                        .map_err(|error| failed(PendingWork::Push(notification.clone()), error)),
                    None => Ok(()),
                }
            }
        }
    }
}

impl<R, M, N> EventBus for SideEffectDispatcher<R, M, N>
where
    R: LifecycleRepository,
    M: Mailer,
    N: PushNotifier,
{
    fn publish(&self, event: LifecycleEvent) -> Result<(), BusError> {
        self.dispatch(&event)
            .map(|_| ())
            .map_err(|error| BusError::Unavailable(error.to_string()))
    }
}

/// Persist a notification unless this event already produced the same one.
fn store_notification(
    state: &mut LifecycleState,
    sequence: u64,
    draft: &NotificationDraft,
    at: chrono::DateTime<chrono::Utc>,
) -> Option<Notification> {
    let exists = state.notifications.iter().any(|existing| {
        existing.event_sequence == sequence
            && existing.recipient == draft.recipient
            && existing.title == draft.title
    });
    if exists {
        return None;
    }
    let notification = Notification {
        id: NotificationId(state.next_id("ntf")),
        recipient: draft.recipient.clone(),
        title: draft.title.clone(),
        message: draft.message.clone(),
        kind: draft.kind,
        read: false,
        created_at: at,
        event_sequence: sequence,
    };
    state.notifications.push(notification.clone());
    Some(notification)
}

/// Fixed fan-out of an event, in the order the effects must run.
pub fn plan_effects(state: &LifecycleState, event: &LifecycleEvent) -> Vec<Effect> {
    let mut plan = Plan::new(state, event);
    let application = plan.application().cloned();

    match &event.kind {
        EventKind::CandidateRegistered { .. }
        | EventKind::OfferRejected { .. }
        | EventKind::ProgressUpdated { .. }
        | EventKind::ReportWithdrawn { .. }
        | EventKind::ReportReviewStarted { .. } => {}
        EventKind::ApplicationSubmitted { company, .. } => {
            let Some(application) = application else {
                return plan.effects;
            };
            plan.notify_hr(
                company,
                "New application",
                format!(
                    "{} applied for a {} internship",
                    application.identity.full_name(),
                    application.kind.label()
                ),
                NotificationKind::Info,
            );
            plan.email(EmailTemplate::ApplicationReceived, &application, &[], None);
        }
        EventKind::InterviewProposed {
            tutor,
            company,
            date,
            time,
            location,
            ..
        } => {
            let Some(application) = application else {
                return plan.effects;
            };
            plan.email(
                EmailTemplate::InterviewInvitation,
                &application,
                &[
                    ("date", date.to_string()),
                    ("time", time.format("%H:%M").to_string()),
                    ("location", location.clone()),
                    ("company", plan.company_name(company)),
                ],
                None,
            );
            plan.notify(
                tutor,
                "Interview requested",
                format!(
                    "Interview with {} proposed on {date} at {} ({location})",
                    application.identity.full_name(),
                    time.format("%H:%M")
                ),
                NotificationKind::Info,
            );
        }
        EventKind::InterviewAccepted {
            date,
            time,
            location,
            ..
        } => {
            let Some(application) = application else {
                return plan.effects;
            };
            plan.notify_hr(
                &application.company,
                "Interview confirmed",
                format!(
                    "The interview with {} is confirmed for {date} at {}",
                    application.identity.full_name(),
                    time.format("%H:%M")
                ),
                NotificationKind::Success,
            );
            plan.email(
                EmailTemplate::InterviewConfirmed,
                &application,
                &[
                    ("date", date.to_string()),
                    ("time", time.format("%H:%M").to_string()),
                    ("location", location.clone()),
                ],
                None,
            );
        }
        EventKind::InterviewRejected { comment, .. } => {
            let Some(application) = application else {
                return plan.effects;
            };
            plan.notify_hr(
                &application.company,
                "Interview declined",
                with_comment(
                    format!(
                        "The tutor declined the interview with {}",
                        application.identity.full_name()
                    ),
                    comment.as_deref(),
                ),
                NotificationKind::Warning,
            );
        }
        EventKind::InterviewRescheduleRequested {
            comment,
            alternative_date,
            alternative_time,
            ..
        } => {
            let Some(application) = application else {
                return plan.effects;
            };
            plan.notify_hr(
                &application.company,
                "Reschedule requested",
                with_comment(
                    format!(
                        "The tutor proposes {alternative_date} at {} for {}",
                        alternative_time.format("%H:%M"),
                        application.identity.full_name()
                    ),
                    comment.as_deref(),
                ),
                NotificationKind::Warning,
            );
        }
        EventKind::InterviewCancelled { tutor, .. } => {
            let Some(application) = application else {
                return plan.effects;
            };
            plan.notify(
                tutor,
                "Interview cancelled",
                format!(
                    "The interview with {} was cancelled",
                    application.identity.full_name()
                ),
                NotificationKind::Info,
            );
        }
        EventKind::OfferAccepted { offer, .. } => {
            let Some(application) = application else {
                return plan.effects;
            };
            let title = state
                .offers
                .get(offer)
                .map(|offer| offer.title.clone())
                .unwrap_or_else(|| offer.to_string());
            plan.email(
                EmailTemplate::OfferAccepted,
                &application,
                &[("offer", title)],
                None,
            );
        }
        EventKind::ApplicationApproved {
            intern,
            credentials,
        } => {
            let Some(application) = application else {
                return plan.effects;
            };
            let mut placeholders = vec![("company", plan.company_name(&application.company))];
            if let Some(credentials) = credentials {
                placeholders.push(("login", credentials.email.clone()));
            }
            plan.email(
                EmailTemplate::ApplicationApproved,
                &application,
                &placeholders,
                credentials
                    .as_ref()
                    .map(|credentials| credentials.password.clone()),
            );
            plan.notify(
                intern,
                "Welcome aboard",
                format!(
                    "Your internship at {} has been created",
                    plan.company_name(&application.company)
                ),
                NotificationKind::Success,
            );
            plan.notify_hr(
                &application.company,
                "Application approved",
                format!(
                    "{} is now an intern",
                    application.identity.full_name()
                ),
                NotificationKind::Success,
            );
        }
        EventKind::ApplicationRejected { reason, .. } => {
            let Some(application) = application else {
                return plan.effects;
            };
            plan.email(
                EmailTemplate::ApplicationRejected,
                &application,
                &[("reason", reason.clone())],
                None,
            );
            plan.notify_hr(
                &application.company,
                "Application rejected",
                format!(
                    "The application of {} was rejected",
                    application.identity.full_name()
                ),
                NotificationKind::Info,
            );
        }
        EventKind::TutorAssigned { tutor, intern, .. } => {
            let intern_name = plan.user_name(intern);
            let tutor_name = plan.user_name(tutor);
            plan.notify(
                tutor,
                "New intern",
                format!("You now supervise {intern_name}"),
                NotificationKind::Info,
            );
            plan.notify(
                intern,
                "Tutor assigned",
                format!("{tutor_name} is your tutor"),
                NotificationKind::Info,
            );
        }
        EventKind::InternshipClosed { status } => {
            if let Some(internship) = plan.internship() {
                let intern = internship.intern.clone();
                let tutor = internship.tutor.clone();
                let message = format!("The internship '{}' is now {}", internship.title, status.label());
                plan.notify(&intern, "Internship closed", message.clone(), NotificationKind::Info);
                if let Some(tutor) = tutor {
                    plan.notify(&tutor, "Internship closed", message, NotificationKind::Info);
                }
            }
        }
        EventKind::ReportSubmitted { version } => {
            if let Some(report) = plan.report() {
                if let Some(tutor) = report.tutor.clone() {
                    let message = format!(
                        "'{}' (version {version}) awaits your review",
                        report.payload.title
                    );
                    plan.notify(&tutor, "Report submitted", message, NotificationKind::Info);
                }
            }
        }
        EventKind::ReportReviewed {
            decision, comment, ..
        } => {
            if let Some(report) = plan.report() {
                let intern = report.intern.clone();
                let title = report.payload.title.clone();
                match decision {
                    ReviewDecision::Approve => plan.notify(
                        &intern,
                        "Report approved",
                        format!("'{title}' was approved"),
                        NotificationKind::Success,
                    ),
                    ReviewDecision::Reject => plan.notify(
                        &intern,
                        "Report needs changes",
                        with_comment(format!("'{title}' was sent back"), comment.as_deref()),
                        NotificationKind::Warning,
                    ),
                }
            }
        }
        EventKind::ReportArchived { .. } => {
            if let Some(report) = plan.report() {
                let intern = report.intern.clone();
                let message = format!("'{}' has been archived", report.payload.title);
                plan.notify(&intern, "Report archived", message, NotificationKind::Info);
            }
        }
    }
    plan.effects
}

fn with_comment(message: String, comment: Option<&str>) -> String {
    match comment {
        Some(comment) if !comment.trim().is_empty() => format!("{message}: {comment}"),
        _ => message,
    }
}

struct Plan<'s> {
    state: &'s LifecycleState,
    event: &'s LifecycleEvent,
    effects: Vec<Effect>,
}

impl<'s> Plan<'s> {
    fn new(state: &'s LifecycleState, event: &'s LifecycleEvent) -> Self {
        Self {
            state,
            event,
            effects: Vec::new(),
        }
    }

    fn application(&self) -> Option<&'s Application> {
        let id: &ApplicationId = match &self.event.subject.application_id {
            Some(id) => id,
            None => &self.internship()?.application,
        };
        self.state.applications.get(id)
    }

    fn internship(&self) -> Option<&'s super::domain::Internship> {
        let id = self.event.subject.internship_id.as_ref()?;
        self.state.internships.get(id)
    }

    fn report(&self) -> Option<&'s super::domain::PfeReport> {
        let id = self.event.subject.report_id.as_ref()?;
        self.state.reports.get(id)
    }

    fn company_name(&self, company: &CompanyId) -> String {
        self.state
            .companies
            .get(company)
            .map(|company| company.name.clone())
            .unwrap_or_else(|| company.to_string())
    }

    fn user_name(&self, user: &UserId) -> String {
        self.state
            .users
            .get(user)
            .map(|user| user.full_name.clone())
            .unwrap_or_else(|| user.to_string())
    }

    fn notify(&mut self, recipient: &UserId, title: &str, message: String, kind: NotificationKind) {
        self.effects.push(Effect::Notify(NotificationDraft {
            recipient: recipient.clone(),
            title: title.to_string(),
            message,
            kind,
        }));
    }

    fn notify_hr(&mut self, company: &CompanyId, title: &str, message: String, kind: NotificationKind) {
        let recipients: Vec<UserId> = self
            .state
            .users
            .values()
            .filter(|user| user.role == Role::Hr && user.active)
            .filter(|user| user.company.as_ref() == Some(company))
            .map(|user| user.id.clone())
            .collect();
        for recipient in recipients {
            self.notify(&recipient, title, message.clone(), kind);
        }
    }

    fn email(
        &mut self,
        template: EmailTemplate,
        application: &Application,
        extra: &[(&'static str, String)],
        password: Option<Secret>,
    ) {
        let mut placeholders = BTreeMap::new();
        placeholders.insert("first_name", application.identity.first_name.clone());
        placeholders.insert("last_name", application.identity.last_name.clone());
        placeholders.insert("application_id", application.id.to_string());
        for (key, value) in extra {
            placeholders.insert(*key, value.clone());
        }
        self.effects.push(Effect::Email(OutboundEmail {
            template,
            to: application.identity.email.clone(),
            placeholders,
            password,
        }));
    }
}
