use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Serialize, Serializer};

use super::domain::{
    ApplicationId, CompanyId, InternshipId, InternshipStatus, InterviewId, OfferId, ReportId,
    ReviewDecision, UserId,
};

/// Generated password. Printed as `***` by `Debug` so it never lands in logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: String) -> Self {
        Self(value)
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl Serialize for Secret {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

/// One-time credentials handed out when an account is created or promoted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssuedCredentials {
    pub user_id: UserId,
    pub email: String,
    pub password: Secret,
    /// True when an existing candidate account was promoted in place.
    pub promoted: bool,
}

/// Payload-specific part of a lifecycle event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    CandidateRegistered {
        email: String,
    },
    ApplicationSubmitted {
        company: CompanyId,
        candidate_email: String,
    },
    InterviewProposed {
        interview: InterviewId,
        tutor: UserId,
        company: CompanyId,
        date: NaiveDate,
        time: NaiveTime,
        location: String,
    },
    InterviewAccepted {
        interview: InterviewId,
        tutor: UserId,
        date: NaiveDate,
        time: NaiveTime,
        location: String,
    },
    InterviewRejected {
        interview: InterviewId,
        tutor: UserId,
        comment: Option<String>,
    },
    InterviewRescheduleRequested {
        interview: InterviewId,
        tutor: UserId,
        comment: Option<String>,
        alternative_date: NaiveDate,
        alternative_time: NaiveTime,
    },
    InterviewCancelled {
        interview: InterviewId,
        tutor: UserId,
    },
    OfferAccepted {
        offer: OfferId,
        forced_rejections: Vec<OfferId>,
    },
    OfferRejected {
        offer: OfferId,
    },
    ApplicationApproved {
        intern: UserId,
        credentials: Option<IssuedCredentials>,
    },
    ApplicationRejected {
        reason: String,
        /// Set when the rejection followed from every offer being rejected.
        derived: bool,
    },
    TutorAssigned {
        tutor: UserId,
        intern: UserId,
        previous: Option<UserId>,
    },
    ProgressUpdated {
        progress: u8,
    },
    InternshipClosed {
        status: InternshipStatus,
    },
    ReportSubmitted {
        version: u32,
    },
    ReportWithdrawn {
        version: u32,
    },
    ReportReviewStarted {
        version: u32,
    },
    ReportReviewed {
        decision: ReviewDecision,
        comment: Option<String>,
        version: u32,
    },
    ReportArchived {
        version: u32,
    },
}

impl EventKind {
    pub const fn name(&self) -> &'static str {
        match self {
            EventKind::CandidateRegistered { .. } => "CandidateRegistered",
            EventKind::ApplicationSubmitted { .. } => "ApplicationSubmitted",
            EventKind::InterviewProposed { .. } => "InterviewProposed",
            EventKind::InterviewAccepted { .. } => "InterviewAccepted",
            EventKind::InterviewRejected { .. } => "InterviewRejected",
            EventKind::InterviewRescheduleRequested { .. } => "InterviewRescheduleRequested",
            EventKind::InterviewCancelled { .. } => "InterviewCancelled",
            EventKind::OfferAccepted { .. } => "OfferAccepted",
            EventKind::OfferRejected { .. } => "OfferRejected",
            EventKind::ApplicationApproved { .. } => "ApplicationApproved",
            EventKind::ApplicationRejected { .. } => "ApplicationRejected",
            EventKind::TutorAssigned { .. } => "TutorAssigned",
            EventKind::ProgressUpdated { .. } => "ProgressUpdated",
            EventKind::InternshipClosed { .. } => "InternshipClosed",
            EventKind::ReportSubmitted { .. } => "ReportSubmitted",
            EventKind::ReportWithdrawn { .. } => "ReportWithdrawn",
            EventKind::ReportReviewStarted { .. } => "ReportReviewStarted",
            EventKind::ReportReviewed { .. } => "ReportReviewed",
            EventKind::ReportArchived { .. } => "ReportArchived",
        }
    }
}

/// Entities an event refers to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EventSubject {
    pub application_id: Option<ApplicationId>,
    pub internship_id: Option<InternshipId>,
    pub report_id: Option<ReportId>,
}

impl EventSubject {
    pub fn application(id: &ApplicationId) -> Self {
        Self {
            application_id: Some(id.clone()),
            ..Self::default()
        }
    }

    pub fn internship(application: &ApplicationId, internship: &InternshipId) -> Self {
        Self {
            application_id: Some(application.clone()),
            internship_id: Some(internship.clone()),
            report_id: None,
        }
    }

    pub fn report(internship: &InternshipId, report: &ReportId) -> Self {
        Self {
            application_id: None,
            internship_id: Some(internship.clone()),
            report_id: Some(report.clone()),
        }
    }
}

/// Post-commit signal consumed by the side-effect dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LifecycleEvent {
    /// Commit order; strictly increasing across the store.
    pub sequence: u64,
    #[serde(flatten)]
    pub kind: EventKind,
    #[serde(flatten)]
    pub subject: EventSubject,
    pub actor_id: Option<UserId>,
    pub timestamp: DateTime<Utc>,
}

/// Delivery failure on the event bus.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("event bus closed")]
    Closed,
    #[error("event bus unavailable: {0}")]
    Unavailable(String),
}

/// Outbound channel for committed events.
pub trait EventBus: Send + Sync {
    fn publish(&self, event: LifecycleEvent) -> Result<(), BusError>;
}

impl<T: EventBus + ?Sized> EventBus for Arc<T> {
    fn publish(&self, event: LifecycleEvent) -> Result<(), BusError> {
        (**self).publish(event)
    }
}
