use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};

use super::domain::{
    Application, ApplicationId, ApplicationOffer, Company, CompanyId, Internship, InternshipId,
    InterviewId, InterviewRequest, Notification, Offer, OfferId, PfeReport, ReportId, User,
    UserId,
};
use super::error::LifecycleError;
use super::events::{EventKind, EventSubject, LifecycleEvent};

/// Complete persisted state of the lifecycle engine.
///
/// Every transition receives a mutable view of this inside a transaction; changes
/// (including outbox events) become visible only if the transaction commits.
#[derive(Debug, Clone, Default)]
pub struct LifecycleState {
    pub companies: BTreeMap<CompanyId, Company>,
    pub users: BTreeMap<UserId, User>,
    pub offers: BTreeMap<OfferId, Offer>,
    pub applications: BTreeMap<ApplicationId, Application>,
    pub application_offers: Vec<ApplicationOffer>,
    pub interviews: BTreeMap<InterviewId, InterviewRequest>,
    pub internships: BTreeMap<InternshipId, Internship>,
    pub reports: BTreeMap<ReportId, PfeReport>,
    pub notifications: Vec<Notification>,
    /// Committed events not yet handed to the bus, in sequence order.
    pub outbox: Vec<LifecycleEvent>,
    id_sequences: BTreeMap<&'static str, u64>,
    event_sequence: u64,
}

/// Timestamp and caller shared by everything a single transition writes.
#[derive(Debug, Clone)]
pub struct Stamp {
    pub now: DateTime<Utc>,
    /// Calendar day in the configured time zone.
    pub today: NaiveDate,
    pub actor: Option<UserId>,
}

impl LifecycleState {
    /// Allocate the next identifier for `prefix`, e.g. `app-000003`.
    pub fn next_id(&mut self, prefix: &'static str) -> String {
        let counter = self.id_sequences.entry(prefix).or_insert(0);
        *counter += 1;
        format!("{prefix}-{:06}", *counter)
    }

    /// Append an event to the outbox; it is published only once the transaction commits.
    pub fn record_event(&mut self, stamp: &Stamp, kind: EventKind, subject: EventSubject) -> u64 {
        self.event_sequence += 1;
        let sequence = self.event_sequence;
        self.outbox.push(LifecycleEvent {
            sequence,
            kind,
            subject,
            actor_id: stamp.actor.clone(),
            timestamp: stamp.now,
        });
        sequence
    }

    pub fn last_event_sequence(&self) -> u64 {
        self.event_sequence
    }

    pub fn user(&self, id: &UserId) -> Result<&User, LifecycleError> {
        self.users
            .get(id)
            .ok_or_else(|| LifecycleError::not_found("user", id))
    }

    pub fn user_mut(&mut self, id: &UserId) -> Result<&mut User, LifecycleError> {
        self.users
            .get_mut(id)
            .ok_or_else(|| LifecycleError::not_found("user", id))
    }

    pub fn company(&self, id: &CompanyId) -> Result<&Company, LifecycleError> {
        self.companies
            .get(id)
            .ok_or_else(|| LifecycleError::not_found("company", id))
    }

    pub fn application(&self, id: &ApplicationId) -> Result<&Application, LifecycleError> {
        self.applications
            .get(id)
            .ok_or_else(|| LifecycleError::not_found("application", id))
    }

    pub fn application_mut(
        &mut self,
        id: &ApplicationId,
    ) -> Result<&mut Application, LifecycleError> {
        self.applications
            .get_mut(id)
            .ok_or_else(|| LifecycleError::not_found("application", id))
    }

    pub fn interview(&self, id: &InterviewId) -> Result<&InterviewRequest, LifecycleError> {
        self.interviews
            .get(id)
            .ok_or_else(|| LifecycleError::not_found("interview request", id))
    }

    pub fn interview_mut(
        &mut self,
        id: &InterviewId,
    ) -> Result<&mut InterviewRequest, LifecycleError> {
        self.interviews
            .get_mut(id)
            .ok_or_else(|| LifecycleError::not_found("interview request", id))
    }

    pub fn internship(&self, id: &InternshipId) -> Result<&Internship, LifecycleError> {
        self.internships
            .get(id)
            .ok_or_else(|| LifecycleError::not_found("internship", id))
    }

    pub fn internship_mut(&mut self, id: &InternshipId) -> Result<&mut Internship, LifecycleError> {
        self.internships
            .get_mut(id)
            .ok_or_else(|| LifecycleError::not_found("internship", id))
    }

    pub fn report(&self, id: &ReportId) -> Result<&PfeReport, LifecycleError> {
        self.reports
            .get(id)
            .ok_or_else(|| LifecycleError::not_found("report", id))
    }

    pub fn report_mut(&mut self, id: &ReportId) -> Result<&mut PfeReport, LifecycleError> {
        self.reports
            .get_mut(id)
            .ok_or_else(|| LifecycleError::not_found("report", id))
    }

    pub fn offers_of<'a>(
        &'a self,
        application: &'a ApplicationId,
    ) -> impl Iterator<Item = &'a ApplicationOffer> + 'a {
        self.application_offers
            .iter()
            .filter(move |row| &row.application == application)
    }

    pub fn internship_for_application(&self, application: &ApplicationId) -> Option<&Internship> {
        self.internships
            .values()
            .find(|internship| &internship.application == application)
    }

    pub fn report_for_internship(&self, internship: &InternshipId) -> Option<&PfeReport> {
        self.reports
            .values()
            .find(|report| &report.internship == internship)
    }
}

/// Storage failure; aborts the surrounding transaction.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("commit failed: {0}")]
    CommitFailed(String),
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

/// Transactional store behind the lifecycle engine.
///
/// `transact` must be serializable: concurrent transactions behave as if run one after
/// the other, and a failed `work` (or commit) leaves no trace.
pub trait LifecycleRepository: Send + Sync {
    fn transact<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&mut LifecycleState) -> Result<T, E>,
        E: From<RepositoryError>;

    fn read<T, F>(&self, view: F) -> Result<T, RepositoryError>
    where
        F: FnOnce(&LifecycleState) -> T;
}
