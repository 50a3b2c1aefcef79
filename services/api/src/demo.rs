use crate::infra::CollectingBus;
use chrono::{Datelike, Duration, NaiveTime, Utc};
use clap::Args;
use stagebloom::config::AppConfig;
use stagebloom::error::AppError;
use stagebloom::workflows::bootstrap::{BootstrapPlan, BootstrapReport, Bootstrapper};
use stagebloom::workflows::lifecycle::directory::lookup_by_email;
use stagebloom::workflows::lifecycle::{
    Actor, ApplicationDocuments, ApplicationPayload, CandidateIdentity, InMemoryLifecycleStore,
    InternshipKind, LifecycleError, LifecycleEvent, LifecycleState, NewAccount,
    OfferDecisionStatus, OfferId, Period, ProposeInterview, ReportPayload, ReviewDecision,
    ReviewRequest, SubmitReportRequest, SystemClock, TransitionEngine, TutorDecision, UserId,
};
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;

type DemoEngine = TransitionEngine<InMemoryLifecycleStore, CollectingBus>;

const DEMO_SEED: &str = r#"{
  "companies": [{ "name": "Xylo Systems", "sector": "Software" }],
  "staff": [
    { "email": "admin@stagebloom.example", "full_name": "Platform Admin", "role": "admin" },
    { "email": "hr@xylo.example", "full_name": "Salma Ben Ali", "role": "hr", "company": "Xylo Systems" },
    { "email": "tutor@xylo.example", "full_name": "Karim Trabelsi", "role": "tutor", "company": "Xylo Systems" }
  ]
}"#;

const DEMO_OFFERS: &str = "reference,title,company,type,status,location
PFE-XY-01,Fleet telemetry platform,Xylo Systems,pfe,open,Tunis
PFE-XY-02,Billing engine rewrite,Xylo Systems,pfe,open,Sfax
";

const HR_EMAIL: &str = "hr@xylo.example";
const TUTOR_EMAIL: &str = "tutor@xylo.example";
const CANDIDATE_EMAIL: &str = "amira.gharbi@student.example";

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Print every published event after the walkthrough
    #[arg(long)]
    pub(crate) show_events: bool,
}

#[derive(Args, Debug, Default)]
pub(crate) struct BootstrapArgs {
    /// JSON seed with companies, staff and candidates
    #[arg(long)]
    pub(crate) seed: Option<PathBuf>,
    /// CSV offer catalogue
    #[arg(long)]
    pub(crate) offers: Option<PathBuf>,
    /// Emit the report as JSON
    #[arg(long)]
    pub(crate) json: bool,
}

fn demo_engine() -> Result<(DemoEngine, Arc<CollectingBus>), AppError> {
    let config = AppConfig::load()?;
    let bus = Arc::new(CollectingBus::default());
    let engine = TransitionEngine::new(
        Arc::new(InMemoryLifecycleStore::new()),
        bus.clone(),
        Arc::new(SystemClock),
        config.lifecycle,
    );
    Ok((engine, bus))
}

pub(crate) fn run_bootstrap(args: BootstrapArgs) -> Result<(), AppError> {
    let BootstrapArgs { seed, offers, json } = args;
    let plan = BootstrapPlan::load(seed.as_deref(), offers.as_deref())?;
    let (engine, _) = demo_engine()?;
    let report = Bootstrapper::apply(&engine, &plan)?;

    if json {
        let rendered = serde_json::to_string_pretty(&report).map_err(std::io::Error::from)?;
        println!("{rendered}");
    } else {
        render_bootstrap_report(&report);
    }
    Ok(())
}

fn render_bootstrap_report(report: &BootstrapReport) {
    println!("Reference data");
    println!(
        "- companies: {} created, {} updated",
        report.companies_created, report.companies_updated
    );
    println!(
        "- staff: {} created, {} updated",
        report.staff_created, report.staff_updated
    );
    println!(
        "- offers: {} created, {} updated",
        report.offers_created, report.offers_updated
    );
    println!(
        "- candidates: {} registered, {} already known",
        report.candidates_registered, report.candidates_existing
    );
    for drift in &report.drifts {
        println!(
            "  ! tutor {} count corrected {} -> {}",
            drift.tutor, drift.cached, drift.actual
        );
    }
}

fn user_id(state: &LifecycleState, email: &str) -> Result<UserId, LifecycleError> {
    lookup_by_email(state, email)
        .map(|user| user.id.clone())
        .ok_or_else(|| LifecycleError::not_found("user", email))
}

fn offer_id(state: &LifecycleState, reference: &str) -> Result<OfferId, LifecycleError> {
    state
        .offers
        .values()
        .find(|offer| offer.reference == reference)
        .map(|offer| offer.id.clone())
        .ok_or_else(|| LifecycleError::not_found("offer", reference))
}

fn demo_payload(offers: Vec<OfferId>) -> ApplicationPayload {
    let start = Utc::now().date_naive() + Duration::days(30);
    ApplicationPayload {
        identity: CandidateIdentity {
            first_name: "Amira".to_string(),
            last_name: "Gharbi".to_string(),
            email: CANDIDATE_EMAIL.to_string(),
            phone: "+216 98 000 000".to_string(),
            institute: "ENSI".to_string(),
            speciality: "Software engineering".to_string(),
            level: "Engineering cycle, year 3".to_string(),
        },
        kind: InternshipKind::Pfe,
        period: Period {
            start,
            end: start + Duration::days(120),
        },
        binomial: false,
        partner: None,
        documents: ApplicationDocuments {
            cv: "uploads/amira/cv.pdf".to_string(),
            motivation_letter: "uploads/amira/motivation.pdf".to_string(),
            application_letter: "uploads/amira/letter.pdf".to_string(),
        },
        offer_ids: offers,
        pfe_reference: None,
    }
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let (engine, bus) = demo_engine()?;
    let plan = BootstrapPlan::from_readers(
        Cursor::new(DEMO_SEED.as_bytes()),
        Cursor::new(DEMO_OFFERS.as_bytes()),
    )?;
    println!("StageBloom lifecycle demo");
    render_bootstrap_report(&Bootstrapper::apply(&engine, &plan)?);

    let state = engine
        .repository()
        .snapshot()
        .map_err(LifecycleError::from)?;
    let hr = Actor::User(user_id(&state, HR_EMAIL)?);
    let tutor_id = user_id(&state, TUTOR_EMAIL)?;
    let tutor = Actor::User(tutor_id.clone());
    let first = offer_id(&state, "PFE-XY-01")?;
    let second = offer_id(&state, "PFE-XY-02")?;

    println!("\nCandidate journey");
    let candidate_id = engine.register_candidate(
        &Actor::Anonymous,
        NewAccount {
            email: CANDIDATE_EMAIL.to_string(),
            full_name: "Amira Gharbi".to_string(),
        },
    )?;
    let candidate = Actor::User(candidate_id.clone());
    println!("- registered {candidate_id}");

    let submitted =
        engine.submit_application(&candidate, demo_payload(vec![first.clone(), second]))?;
    let application = submitted.application_id;
    let left = engine
        .repository()
        .snapshot()
        .map_err(LifecycleError::from)?
        .users
        .get(&candidate_id)
        .and_then(|user| user.quota_remaining)
        .unwrap_or_default();
    println!("- submitted {application} ({left} application(s) left)");

    let interview = engine.propose_interview(
        &hr,
        &application,
        ProposeInterview {
            tutor_id: tutor_id.clone(),
            date: Utc::now().date_naive() + Duration::days(7),
            time: NaiveTime::from_hms_opt(10, 0, 0).unwrap_or_default(),
            location: "Room A".to_string(),
        },
    )?;
    println!("- interview {interview} proposed to {tutor_id}");

    let request = engine.tutor_decision(&tutor, &interview, TutorDecision::Accept)?;
    println!("- tutor answered: {}", request.status.label());

    let view = engine.set_offer_decision(&hr, &application, &first, OfferDecisionStatus::Accepted)?;
    for row in &view.offers {
        println!("  offer {} -> {:?}", row.offer, row.status);
    }

    let receipt = engine.approve_application(&hr, &application)?;
    println!(
        "- approved: internship {} for intern {}{}",
        receipt.internship_id,
        receipt.intern_id,
        if receipt.credentials.is_some() {
            " (credentials issued)"
        } else {
            ""
        }
    );

    let internship = engine.assign_tutor(&hr, &receipt.internship_id, &tutor_id)?;
    println!("- tutor {tutor_id} assigned to {}", internship.id);

    let intern = Actor::User(receipt.intern_id.clone());
    let report = engine.submit_report(
        &intern,
        &receipt.internship_id,
        SubmitReportRequest {
            payload: ReportPayload {
                title: "Fleet telemetry platform".to_string(),
                abstract_text: "Streaming telemetry for a delivery fleet.".to_string(),
                keywords: vec!["telemetry".to_string(), "streaming".to_string()],
                speciality: "Software engineering".to_string(),
                year: Utc::now().date_naive().year(),
            },
            file_ref: "reports/amira/final.pdf".to_string(),
        },
    )?;
    println!("- report {} v{} submitted", report.id, report.version);

    engine.start_review(&tutor, &report.id)?;
    let reviewed = engine.review_report(
        &tutor,
        &report.id,
        ReviewRequest {
            decision: ReviewDecision::Approve,
            comment: Some("Ready for the jury.".to_string()),
        },
    )?;
    println!("- report {}", reviewed.status.label());
    let archived = engine.archive_report(&hr, &report.id)?;
    println!("- report {} (final: {})", archived.status.label(), archived.is_final);

    let events = bus.events();
    println!("\n{} events published", events.len());
    if args.show_events {
        for event in &events {
            render_event(event);
        }
    }
    Ok(())
}

fn render_event(event: &LifecycleEvent) {
    let actor = event
        .actor_id
        .as_ref()
        .map(|id| id.0.as_str())
        .unwrap_or("anonymous");
    println!(
        "  #{:<3} {:<28} by {}",
        event.sequence,
        event.kind.name(),
        actor
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_walkthrough_reaches_an_archived_report() {
        run_demo(DemoArgs { show_events: true }).expect("demo runs");
    }

    #[test]
    fn bootstrap_without_files_is_a_no_op() {
        run_bootstrap(BootstrapArgs::default()).expect("empty bootstrap");
    }

    #[test]
    fn bundled_reference_data_is_consistent() {
        let plan = BootstrapPlan::from_readers(
            Cursor::new(DEMO_SEED.as_bytes()),
            Cursor::new(DEMO_OFFERS.as_bytes()),
        )
        .expect("bundled data parses");
        assert_eq!(plan.seed().staff.len(), 3);
        assert_eq!(plan.offer_count(), 2);
    }
}
