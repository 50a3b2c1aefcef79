//! Internship application lifecycle: intake, interviews, offer decisions, approval,
//! internships and PFE reports, driven by a single transactional engine.

pub mod applications;
pub mod catalog;
pub mod clock;
pub mod directory;
pub mod dispatcher;
pub mod domain;
pub mod engine;
pub mod error;
pub mod events;
pub mod internships;
pub mod interviews;
pub mod memory;
pub mod messages;
pub mod quota;
pub mod reports;
pub mod repository;
pub mod router;
pub mod visibility;

#[cfg(test)]
mod tests;

pub use clock::{Clock, FixedClock, SystemClock};
pub use directory::NewAccount;
pub use dispatcher::{
    DispatchError, DispatchSummary, EmailTemplate, Mailer, OutboundEmail, PushNotifier,
    SideEffectDispatcher,
};
pub use domain::{
    Actor, Application, ApplicationDocuments, ApplicationId, ApplicationOffer,
    ApplicationPayload, ApplicationStatus, CandidateIdentity, Company, CompanyId, Internship,
    InternshipId, InternshipKind, InternshipStatus, InterviewId, InterviewRequest,
    InterviewStatus, Notification, NotificationKind, Offer, OfferDecisionStatus, OfferId,
    OfferStatus, Partner, Period, PfeReport, ReportId, ReportPayload, ReportStatus,
    ReviewDecision, Role, User, UserId,
};
pub use engine::TransitionEngine;
pub use error::{FieldError, LifecycleError, QuotaBreach};
pub use events::{
    BusError, EventBus, EventKind, EventSubject, IssuedCredentials, LifecycleEvent, Secret,
};
pub use interviews::{HrInterviewDecision, ProposeInterview, TutorDecision};
pub use memory::InMemoryLifecycleStore;
pub use messages::{
    ApplicationView, ApprovalReceipt, RepairReport, ReviewRequest, SubmitReportRequest,
    SubmittedApplication, TutorAvailability,
};
pub use quota::{QuotaKeeper, TutorDrift};
pub use repository::{LifecycleRepository, LifecycleState, RepositoryError};
pub use router::{lifecycle_router, CALLER_HEADER};
