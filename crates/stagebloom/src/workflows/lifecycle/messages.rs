//! Request and response bodies of the transition contract.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{
    Application, ApplicationId, ApplicationOffer, InternshipId, InternshipStatus,
    OfferDecisionStatus, ReportPayload, ReviewDecision, UserId,
};
use super::events::IssuedCredentials;
use super::interviews::HrInterviewDecision;
use super::quota::TutorDrift;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedApplication {
    pub application_id: ApplicationId,
    pub submitted_at: DateTime<Utc>,
}

/// Application together with its per-offer decisions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplicationView {
    pub application: Application,
    pub offers: Vec<ApplicationOffer>,
}

/// Returned by approval. `credentials` carries the one-time password when an account was
/// created or promoted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApprovalReceipt {
    pub application_id: ApplicationId,
    pub internship_id: InternshipId,
    pub intern_id: UserId,
    pub credentials: Option<IssuedCredentials>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TutorAvailability {
    pub tutor_id: UserId,
    pub full_name: String,
    pub active_internships: u32,
    pub capacity: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RepairReport {
    pub drifts: Vec<TutorDrift>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferDecisionRequest {
    pub decision: OfferDecisionStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HrDecisionRequest {
    pub decision: HrInterviewDecision,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectionRequest {
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignTutorRequest {
    pub tutor_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressRequest {
    pub progress: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseInternshipRequest {
    pub status: InternshipStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitReportRequest {
    pub payload: ReportPayload,
    pub file_ref: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewRequest {
    pub decision: ReviewDecision,
    #[serde(default)]
    pub comment: Option<String>,
}
