use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;

use super::directory::NewAccount;
use super::domain::{
    Actor, ApplicationId, ApplicationPayload, CompanyId, InternshipId, InterviewId, OfferId,
    ReportId, UserId,
};
use super::engine::TransitionEngine;
use super::error::LifecycleError;
use super::events::EventBus;
use super::interviews::{ProposeInterview, TutorDecision};
use super::messages::{
    AssignTutorRequest, CloseInternshipRequest, HrDecisionRequest, OfferDecisionRequest,
    ProgressRequest, RejectionRequest, ReviewRequest, SubmitReportRequest,
};
use super::repository::LifecycleRepository;

/// Header carrying the authenticated user id, set by the upstream auth layer.
pub const CALLER_HEADER: &str = "x-stagebloom-user";

type Engine<R, B> = Arc<TransitionEngine<R, B>>;

/// Router builder exposing every lifecycle transition and listing.
pub fn lifecycle_router<R, B>(engine: Engine<R, B>) -> Router
where
    R: LifecycleRepository + 'static,
    B: EventBus + 'static,
{
    Router::new()
        .route("/api/v1/candidates", post(register_handler::<R, B>))
        .route(
            "/api/v1/applications",
            post(submit_handler::<R, B>).get(list_applications_handler::<R, B>),
        )
        .route(
            "/api/v1/applications/:application_id/interviews",
            post(propose_interview_handler::<R, B>),
        )
        .route(
            "/api/v1/applications/:application_id/offers/:offer_id",
            post(offer_decision_handler::<R, B>),
        )
        .route(
            "/api/v1/applications/:application_id/approve",
            post(approve_handler::<R, B>),
        )
        .route(
            "/api/v1/applications/:application_id/reject",
            post(reject_handler::<R, B>),
        )
        .route("/api/v1/interviews", get(list_interviews_handler::<R, B>))
        .route(
            "/api/v1/interviews/:interview_id/tutor-decision",
            post(tutor_decision_handler::<R, B>),
        )
        .route(
            "/api/v1/interviews/:interview_id/hr-decision",
            post(hr_decision_handler::<R, B>),
        )
        .route("/api/v1/internships", get(list_internships_handler::<R, B>))
        .route(
            "/api/v1/internships/:internship_id/tutor",
            post(assign_tutor_handler::<R, B>),
        )
        .route(
            "/api/v1/internships/:internship_id/progress",
            post(progress_handler::<R, B>),
        )
        .route(
            "/api/v1/internships/:internship_id/close",
            post(close_internship_handler::<R, B>),
        )
        .route(
            "/api/v1/internships/:internship_id/report",
            post(submit_report_handler::<R, B>),
        )
        .route("/api/v1/reports", get(list_reports_handler::<R, B>))
        .route(
            "/api/v1/reports/:report_id/withdraw",
            post(withdraw_report_handler::<R, B>),
        )
        .route(
            "/api/v1/reports/:report_id/start-review",
            post(start_review_handler::<R, B>),
        )
        .route(
            "/api/v1/reports/:report_id/review",
            post(review_report_handler::<R, B>),
        )
        .route(
            "/api/v1/reports/:report_id/archive",
            post(archive_report_handler::<R, B>),
        )
        .route(
            "/api/v1/companies/:company_id/tutors",
            get(available_tutors_handler::<R, B>),
        )
        .route(
            "/api/v1/notifications",
            get(list_notifications_handler::<R, B>),
        )
        .route("/api/v1/admin/repair", post(repair_handler::<R, B>))
        .with_state(engine)
}

/// Caller identity from the request headers; missing or blank means anonymous.
pub fn caller_from(headers: &HeaderMap) -> Actor {
    headers
        .get(CALLER_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| Actor::User(UserId::from(value)))
        .unwrap_or(Actor::Anonymous)
}

fn respond<T: serde::Serialize>(status: StatusCode, result: Result<T, LifecycleError>) -> Response {
    match result {
        Ok(body) => (status, Json(body)).into_response(),
        Err(error) => error.into_response(),
    }
}

impl IntoResponse for LifecycleError {
    fn into_response(self) -> Response {
        let code = self.code();
        let (status, payload) = match &self {
            LifecycleError::Validation(fields) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                json!({ "error": code, "message": self.to_string(), "fields": fields }),
            ),
            LifecycleError::PreconditionFailed { message, current } => (
                StatusCode::CONFLICT,
                json!({ "error": code, "message": message, "current_state": current }),
            ),
            LifecycleError::PermissionDenied { .. } => (
                StatusCode::FORBIDDEN,
                json!({ "error": code, "message": self.to_string() }),
            ),
            LifecycleError::QuotaExceeded(breach) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                json!({ "error": code, "message": self.to_string(), "quota": breach }),
            ),
            LifecycleError::NotFound { entity, id } => (
                StatusCode::NOT_FOUND,
                json!({ "error": code, "message": self.to_string(), "entity": entity, "id": id }),
            ),
            LifecycleError::Conflict(message) => (
                StatusCode::CONFLICT,
                json!({ "error": code, "message": message }),
            ),
            LifecycleError::Storage(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": code, "message": "storage unavailable" }),
            ),
        };
        (status, Json(payload)).into_response()
    }
}

pub(crate) async fn register_handler<R, B>(
    State(engine): State<Engine<R, B>>,
    headers: HeaderMap,
    Json(account): Json<NewAccount>,
) -> Response
where
    R: LifecycleRepository + 'static,
    B: EventBus + 'static,
{
    let result = engine
        .register_candidate(&caller_from(&headers), account)
        .map(|user_id| json!({ "user_id": user_id }));
    respond(StatusCode::CREATED, result)
}

pub(crate) async fn submit_handler<R, B>(
    State(engine): State<Engine<R, B>>,
    headers: HeaderMap,
    Json(payload): Json<ApplicationPayload>,
) -> Response
where
    R: LifecycleRepository + 'static,
    B: EventBus + 'static,
{
    respond(
        StatusCode::CREATED,
        engine.submit_application(&caller_from(&headers), payload),
    )
}

pub(crate) async fn list_applications_handler<R, B>(
    State(engine): State<Engine<R, B>>,
    headers: HeaderMap,
) -> Response
where
    R: LifecycleRepository + 'static,
    B: EventBus + 'static,
{
    respond(
        StatusCode::OK,
        engine.list_applications(&caller_from(&headers)),
    )
}

pub(crate) async fn propose_interview_handler<R, B>(
    State(engine): State<Engine<R, B>>,
    headers: HeaderMap,
    Path(application_id): Path<String>,
    Json(proposal): Json<ProposeInterview>,
) -> Response
where
    R: LifecycleRepository + 'static,
    B: EventBus + 'static,
{
    let result = engine
        .propose_interview(
            &caller_from(&headers),
            &ApplicationId(application_id),
            proposal,
        )
        .map(|interview_id| json!({ "interview_id": interview_id }));
    respond(StatusCode::CREATED, result)
}

pub(crate) async fn offer_decision_handler<R, B>(
    State(engine): State<Engine<R, B>>,
    headers: HeaderMap,
    Path((application_id, offer_id)): Path<(String, String)>,
    Json(request): Json<OfferDecisionRequest>,
) -> Response
where
    R: LifecycleRepository + 'static,
    B: EventBus + 'static,
{
    respond(
        StatusCode::OK,
        engine.set_offer_decision(
            &caller_from(&headers),
            &ApplicationId(application_id),
            &OfferId(offer_id),
            request.decision,
        ),
    )
}

pub(crate) async fn approve_handler<R, B>(
    State(engine): State<Engine<R, B>>,
    headers: HeaderMap,
    Path(application_id): Path<String>,
) -> Response
where
    R: LifecycleRepository + 'static,
    B: EventBus + 'static,
{
    respond(
        StatusCode::OK,
        engine.approve_application(&caller_from(&headers), &ApplicationId(application_id)),
    )
}

pub(crate) async fn reject_handler<R, B>(
    State(engine): State<Engine<R, B>>,
    headers: HeaderMap,
    Path(application_id): Path<String>,
    Json(request): Json<RejectionRequest>,
) -> Response
where
    R: LifecycleRepository + 'static,
    B: EventBus + 'static,
{
    respond(
        StatusCode::OK,
        engine.reject_application(
            &caller_from(&headers),
            &ApplicationId(application_id),
            &request.reason,
        ),
    )
}

pub(crate) async fn list_interviews_handler<R, B>(
    State(engine): State<Engine<R, B>>,
    headers: HeaderMap,
) -> Response
where
    R: LifecycleRepository + 'static,
    B: EventBus + 'static,
{
    respond(StatusCode::OK, engine.list_interviews(&caller_from(&headers)))
}

pub(crate) async fn tutor_decision_handler<R, B>(
    State(engine): State<Engine<R, B>>,
    headers: HeaderMap,
    Path(interview_id): Path<String>,
    Json(decision): Json<TutorDecision>,
) -> Response
where
    R: LifecycleRepository + 'static,
    B: EventBus + 'static,
{
    respond(
        StatusCode::OK,
        engine.tutor_decision(&caller_from(&headers), &InterviewId(interview_id), decision),
    )
}

pub(crate) async fn hr_decision_handler<R, B>(
    State(engine): State<Engine<R, B>>,
    headers: HeaderMap,
    Path(interview_id): Path<String>,
    Json(request): Json<HrDecisionRequest>,
) -> Response
where
    R: LifecycleRepository + 'static,
    B: EventBus + 'static,
{
    respond(
        StatusCode::OK,
        engine.hr_interview_decision(
            &caller_from(&headers),
            &InterviewId(interview_id),
            request.decision,
        ),
    )
}

pub(crate) async fn list_internships_handler<R, B>(
    State(engine): State<Engine<R, B>>,
    headers: HeaderMap,
) -> Response
where
    R: LifecycleRepository + 'static,
    B: EventBus + 'static,
{
    respond(StatusCode::OK, engine.list_internships(&caller_from(&headers)))
}

pub(crate) async fn assign_tutor_handler<R, B>(
    State(engine): State<Engine<R, B>>,
    headers: HeaderMap,
    Path(internship_id): Path<String>,
    Json(request): Json<AssignTutorRequest>,
) -> Response
where
    R: LifecycleRepository + 'static,
    B: EventBus + 'static,
{
    respond(
        StatusCode::OK,
        engine.assign_tutor(
            &caller_from(&headers),
            &InternshipId(internship_id),
            &request.tutor_id,
        ),
    )
}

pub(crate) async fn progress_handler<R, B>(
    State(engine): State<Engine<R, B>>,
    headers: HeaderMap,
    Path(internship_id): Path<String>,
    Json(request): Json<ProgressRequest>,
) -> Response
where
    R: LifecycleRepository + 'static,
    B: EventBus + 'static,
{
    respond(
        StatusCode::OK,
        engine.update_progress(
            &caller_from(&headers),
            &InternshipId(internship_id),
            request.progress,
        ),
    )
}

pub(crate) async fn close_internship_handler<R, B>(
    State(engine): State<Engine<R, B>>,
    headers: HeaderMap,
    Path(internship_id): Path<String>,
    Json(request): Json<CloseInternshipRequest>,
) -> Response
where
    R: LifecycleRepository + 'static,
    B: EventBus + 'static,
{
    respond(
        StatusCode::OK,
        engine.close_internship(
            &caller_from(&headers),
            &InternshipId(internship_id),
            request.status,
        ),
    )
}

pub(crate) async fn submit_report_handler<R, B>(
    State(engine): State<Engine<R, B>>,
    headers: HeaderMap,
    Path(internship_id): Path<String>,
    Json(request): Json<SubmitReportRequest>,
) -> Response
where
    R: LifecycleRepository + 'static,
    B: EventBus + 'static,
{
    respond(
        StatusCode::OK,
        engine.submit_report(&caller_from(&headers), &InternshipId(internship_id), request),
    )
}

pub(crate) async fn list_reports_handler<R, B>(
    State(engine): State<Engine<R, B>>,
    headers: HeaderMap,
) -> Response
where
    R: LifecycleRepository + 'static,
    B: EventBus + 'static,
{
    respond(StatusCode::OK, engine.list_reports(&caller_from(&headers)))
}

pub(crate) async fn withdraw_report_handler<R, B>(
    State(engine): State<Engine<R, B>>,
    headers: HeaderMap,
    Path(report_id): Path<String>,
) -> Response
where
    R: LifecycleRepository + 'static,
    B: EventBus + 'static,
{
    respond(
        StatusCode::OK,
        engine.withdraw_report(&caller_from(&headers), &ReportId(report_id)),
    )
}

pub(crate) async fn start_review_handler<R, B>(
    State(engine): State<Engine<R, B>>,
    headers: HeaderMap,
    Path(report_id): Path<String>,
) -> Response
where
    R: LifecycleRepository + 'static,
    B: EventBus + 'static,
{
    respond(
        StatusCode::OK,
        engine.start_review(&caller_from(&headers), &ReportId(report_id)),
    )
}

pub(crate) async fn review_report_handler<R, B>(
    State(engine): State<Engine<R, B>>,
    headers: HeaderMap,
    Path(report_id): Path<String>,
    Json(request): Json<ReviewRequest>,
) -> Response
where
    R: LifecycleRepository + 'static,
    B: EventBus + 'static,
{
    respond(
        StatusCode::OK,
        engine.review_report(&caller_from(&headers), &ReportId(report_id), request),
    )
}

pub(crate) async fn archive_report_handler<R, B>(
    State(engine): State<Engine<R, B>>,
    headers: HeaderMap,
    Path(report_id): Path<String>,
) -> Response
where
    R: LifecycleRepository + 'static,
    B: EventBus + 'static,
{
    respond(
        StatusCode::OK,
        engine.archive_report(&caller_from(&headers), &ReportId(report_id)),
    )
}

pub(crate) async fn available_tutors_handler<R, B>(
    State(engine): State<Engine<R, B>>,
    headers: HeaderMap,
    Path(company_id): Path<String>,
) -> Response
where
    R: LifecycleRepository + 'static,
    B: EventBus + 'static,
{
    respond(
        StatusCode::OK,
        engine.available_tutors(&caller_from(&headers), &CompanyId(company_id)),
    )
}

pub(crate) async fn list_notifications_handler<R, B>(
    State(engine): State<Engine<R, B>>,
    headers: HeaderMap,
) -> Response
where
    R: LifecycleRepository + 'static,
    B: EventBus + 'static,
{
    respond(
        StatusCode::OK,
        engine.list_notifications(&caller_from(&headers)),
    )
}

pub(crate) async fn repair_handler<R, B>(
    State(engine): State<Engine<R, B>>,
    headers: HeaderMap,
) -> Response
where
    R: LifecycleRepository + 'static,
    B: EventBus + 'static,
{
    respond(StatusCode::OK, engine.repair(&caller_from(&headers)))
}
