use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

string_id!(CompanyId);
string_id!(UserId);
string_id!(OfferId);
string_id!(
    /// Identifier of an application ("demande").
    ApplicationId
);
string_id!(InterviewId);
string_id!(
    /// Identifier of an internship ("stage").
    InternshipId
);
string_id!(ReportId);
string_id!(NotificationId);

/// Who is invoking a transition. Authentication happens upstream; the engine only sees the id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Actor {
    Anonymous,
    User(UserId),
}

impl Actor {
    pub fn user_id(&self) -> Option<&UserId> {
        match self {
            Actor::Anonymous => None,
            Actor::User(id) => Some(id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Company {
    pub id: CompanyId,
    pub name: String,
    pub sector: String,
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Candidate,
    Intern,
    Tutor,
    Hr,
    Admin,
}

impl Role {
    pub const fn label(self) -> &'static str {
        match self {
            Role::Candidate => "candidate",
            Role::Intern => "intern",
            Role::Tutor => "tutor",
            Role::Hr => "hr",
            Role::Admin => "admin",
        }
    }

    /// Tutors, HR and interns always belong to a company.
    pub const fn requires_company(self) -> bool {
        matches!(self, Role::Intern | Role::Tutor | Role::Hr)
    }

    pub const fn is_staff(self) -> bool {
        matches!(self, Role::Hr | Role::Admin)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub full_name: String,
    pub role: Role,
    pub company: Option<CompanyId>,
    pub active: bool,
    /// Only meaningful for candidates.
    pub quota_remaining: Option<u32>,
    /// Cached count of active internships supervised; tutors only.
    pub assigned_intern_count: u32,
    pub credentials_issued_at: Option<DateTime<Utc>>,
}

/// Internship flavour shared by offers and applications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InternshipKind {
    Pfe,
    Other,
}

impl InternshipKind {
    pub const fn label(self) -> &'static str {
        match self {
            InternshipKind::Pfe => "pfe",
            InternshipKind::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferStatus {
    Open,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offer {
    pub id: OfferId,
    /// Unique human readable code such as `PFE-2025-014`.
    pub reference: String,
    pub title: String,
    pub company: CompanyId,
    pub kind: InternshipKind,
    pub status: OfferStatus,
    pub location: String,
}

/// Identity block captured on the application form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateIdentity {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub institute: String,
    pub speciality: String,
    pub level: String,
}

impl CandidateIdentity {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name.trim(), self.last_name.trim())
    }
}

/// Opaque file references; storage lives outside the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationDocuments {
    pub cv: String,
    pub motivation_letter: String,
    pub application_letter: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partner {
    pub identity: CandidateIdentity,
    pub documents: Option<ApplicationDocuments>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl Period {
    pub fn is_valid(&self) -> bool {
        self.start < self.end
    }
}

/// Everything a candidate sends when applying.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationPayload {
    pub identity: CandidateIdentity,
    pub kind: InternshipKind,
    pub period: Period,
    #[serde(default)]
    pub binomial: bool,
    #[serde(default)]
    pub partner: Option<Partner>,
    pub documents: ApplicationDocuments,
    #[serde(default)]
    pub offer_ids: Vec<OfferId>,
    #[serde(default)]
    pub pfe_reference: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Pending,
    InterviewScheduled,
    Approved,
    Rejected,
}

impl ApplicationStatus {
    pub const fn label(self) -> &'static str {
        match self {
            ApplicationStatus::Pending => "pending",
            ApplicationStatus::InterviewScheduled => "interview_scheduled",
            ApplicationStatus::Approved => "approved",
            ApplicationStatus::Rejected => "rejected",
        }
    }

    /// pending -> {interview_scheduled -> (pending | approved | rejected) | approved | rejected}
    pub const fn allows(self, next: ApplicationStatus) -> bool {
        use ApplicationStatus::*;
        matches!(
            (self, next),
            (Pending, InterviewScheduled)
                | (Pending, Approved)
                | (Pending, Rejected)
                | (InterviewScheduled, Pending)
                | (InterviewScheduled, Approved)
                | (InterviewScheduled, Rejected)
        )
    }

    pub const fn is_open(self) -> bool {
        matches!(
            self,
            ApplicationStatus::Pending | ApplicationStatus::InterviewScheduled
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    pub id: ApplicationId,
    pub identity: CandidateIdentity,
    pub kind: InternshipKind,
    pub period: Period,
    pub binomial: bool,
    pub partner: Option<Partner>,
    pub documents: ApplicationDocuments,
    pub pfe_reference: Option<String>,
    pub company: CompanyId,
    pub submitted_at: DateTime<Utc>,
    /// Candidate account that submitted, when the caller was signed in.
    pub submitted_by: Option<UserId>,
    pub status: ApplicationStatus,
    pub rejection_reason: Option<String>,
    pub user_created: Option<UserId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferDecisionStatus {
    Pending,
    Accepted,
    Rejected,
}

/// Join row between an application and one of its (at most three) offers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationOffer {
    pub application: ApplicationId,
    pub offer: OfferId,
    pub status: OfferDecisionStatus,
    pub company: CompanyId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterviewStatus {
    PendingTutor,
    Accepted,
    Rejected,
    RescheduleRequested,
}

impl InterviewStatus {
    pub const fn label(self) -> &'static str {
        match self {
            InterviewStatus::PendingTutor => "pending_tutor",
            InterviewStatus::Accepted => "accepted",
            InterviewStatus::Rejected => "rejected",
            InterviewStatus::RescheduleRequested => "reschedule_requested",
        }
    }

    /// Open requests block a second proposal for the same application.
    pub const fn is_open(self) -> bool {
        !matches!(self, InterviewStatus::Rejected)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterviewRequest {
    pub id: InterviewId,
    pub application: ApplicationId,
    pub tutor: UserId,
    pub hr: Option<UserId>,
    pub proposed_date: NaiveDate,
    pub proposed_time: NaiveTime,
    pub location: String,
    pub status: InterviewStatus,
    pub tutor_comment: Option<String>,
    pub alternative_date: Option<NaiveDate>,
    pub alternative_time: Option<NaiveTime>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InternshipStatus {
    Active,
    Completed,
    Cancelled,
}

impl InternshipStatus {
    pub const fn label(self) -> &'static str {
        match self {
            InternshipStatus::Active => "active",
            InternshipStatus::Completed => "completed",
            InternshipStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Internship {
    pub id: InternshipId,
    pub application: ApplicationId,
    pub intern: UserId,
    pub tutor: Option<UserId>,
    pub company: CompanyId,
    pub kind: InternshipKind,
    pub title: String,
    pub location: String,
    pub period: Period,
    pub status: InternshipStatus,
    /// Integer percentage in [0, 100].
    pub progress: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Draft,
    Submitted,
    UnderReview,
    Approved,
    Rejected,
    Archived,
}

impl ReportStatus {
    pub const fn label(self) -> &'static str {
        match self {
            ReportStatus::Draft => "draft",
            ReportStatus::Submitted => "submitted",
            ReportStatus::UnderReview => "under_review",
            ReportStatus::Approved => "approved",
            ReportStatus::Rejected => "rejected",
            ReportStatus::Archived => "archived",
        }
    }

    /// States from which the intern may (re)submit.
    pub const fn is_editable(self) -> bool {
        matches!(self, ReportStatus::Draft | ReportStatus::Rejected)
    }

    pub const fn awaiting_review(self) -> bool {
        matches!(self, ReportStatus::Submitted | ReportStatus::UnderReview)
    }
}

/// Descriptive fields of a PFE report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportPayload {
    pub title: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub speciality: String,
    pub year: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    Approve,
    Reject,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewNote {
    pub reviewer: UserId,
    pub decision: ReviewDecision,
    pub comment: Option<String>,
    pub reviewed_at: DateTime<Utc>,
    /// Version the decision was made on.
    pub version: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PfeReport {
    pub id: ReportId,
    pub internship: InternshipId,
    pub intern: UserId,
    pub tutor: Option<UserId>,
    pub company: CompanyId,
    pub payload: ReportPayload,
    pub file_ref: String,
    pub status: ReportStatus,
    pub version: u32,
    pub is_final: bool,
    pub last_review: Option<ReviewNote>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub recipient: UserId,
    pub title: String,
    pub message: String,
    pub kind: NotificationKind,
    pub read: bool,
    pub created_at: DateTime<Utc>,
    /// Sequence of the event that produced it.
    pub event_sequence: u64,
}
