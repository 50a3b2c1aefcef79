//! End-to-end behaviour of the internship lifecycle through the public engine facade.
//!
//! Scenarios drive the engine with the side-effect dispatcher attached as its bus, so emails
//! and notifications are observed exactly as a deployment would produce them. The property
//! suite replays random operation sequences and checks the state invariants after each step.

mod common {
    use std::sync::{Arc, Mutex};

    use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};

    use stagebloom::config::LifecycleConfig;
    use stagebloom::workflows::lifecycle::{
        Actor, ApplicationDocuments, ApplicationPayload, BusError, CandidateIdentity, Company,
        CompanyId, DispatchError, EventBus, FixedClock, InMemoryLifecycleStore, InternshipKind,
        LifecycleEvent, LifecycleState, Mailer, NewAccount, Notification, Offer, OfferId,
        OfferStatus, OutboundEmail, Period, ProposeInterview, PushNotifier, Role,
        SideEffectDispatcher, TransitionEngine, User, UserId,
    };

    pub(super) const COMPANY_X: &str = "cmp-x";
    pub(super) const COMPANY_Y: &str = "cmp-y";

    pub(super) fn actor(id: &str) -> Actor {
        Actor::User(UserId::from(id))
    }

    pub(super) fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    pub(super) fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).expect("valid time")
    }

    fn staff(id: &str, role: Role, company: Option<&str>) -> User {
        User {
            id: UserId::from(id),
            email: format!("{id}@example.org"),
            full_name: format!("Staff {id}"),
            role,
            company: company.map(CompanyId::from),
            active: true,
            quota_remaining: None,
            assigned_intern_count: 0,
            credentials_issued_at: None,
        }
    }

    fn offer(id: &str, reference: &str, company: &str, status: OfferStatus) -> Offer {
        Offer {
            id: OfferId::from(id),
            reference: reference.to_string(),
            title: format!("Offer {reference}"),
            company: CompanyId::from(company),
            kind: InternshipKind::Pfe,
            status,
            location: "Tunis".to_string(),
        }
    }

    pub(super) fn seeded_state() -> LifecycleState {
        let mut state = LifecycleState::default();
        for (id, name) in [(COMPANY_X, "Xylo Systems"), (COMPANY_Y, "Yaml Labs")] {
            state.companies.insert(
                CompanyId::from(id),
                Company {
                    id: CompanyId::from(id),
                    name: name.to_string(),
                    sector: "Software".to_string(),
                    active: true,
                },
            );
        }
        for user in [
            staff("admin", Role::Admin, None),
            staff("hr-x", Role::Hr, Some(COMPANY_X)),
            staff("hr-y", Role::Hr, Some(COMPANY_Y)),
            staff("tutor-1", Role::Tutor, Some(COMPANY_X)),
            staff("tutor-2", Role::Tutor, Some(COMPANY_X)),
            staff("tutor-y", Role::Tutor, Some(COMPANY_Y)),
        ] {
            state.users.insert(user.id.clone(), user);
        }
        for offer in [
            offer("o1", "PFE-X-01", COMPANY_X, OfferStatus::Open),
            offer("o2", "PFE-X-02", COMPANY_X, OfferStatus::Open),
            offer("o3", "PFE-X-03", COMPANY_X, OfferStatus::Open),
            offer("o4", "PFE-Y-01", COMPANY_Y, OfferStatus::Open),
            offer("o5", "PFE-X-OLD", COMPANY_X, OfferStatus::Closed),
        ] {
            state.offers.insert(offer.id.clone(), offer);
        }
        state
    }

    pub(super) fn payload(email: &str, offers: &[&str]) -> ApplicationPayload {
        ApplicationPayload {
            identity: CandidateIdentity {
                first_name: "Amira".to_string(),
                last_name: "Gharbi".to_string(),
                email: email.to_string(),
                phone: "+216 98 000 000".to_string(),
                institute: "ENSI".to_string(),
                speciality: "Software engineering".to_string(),
                level: "Engineering cycle, year 3".to_string(),
            },
            kind: InternshipKind::Pfe,
            period: Period {
                start: date(2025, 3, 1),
                end: date(2025, 6, 30),
            },
            binomial: false,
            partner: None,
            documents: ApplicationDocuments {
                cv: "uploads/cv.pdf".to_string(),
                motivation_letter: "uploads/motivation.pdf".to_string(),
                application_letter: "uploads/letter.pdf".to_string(),
            },
            offer_ids: offers.iter().map(|id| OfferId::from(*id)).collect(),
            pfe_reference: None,
        }
    }

    pub(super) fn proposal(tutor: &str) -> ProposeInterview {
        ProposeInterview {
            tutor_id: UserId::from(tutor),
            date: date(2025, 2, 10),
            time: time(10, 0),
            location: "Room A".to_string(),
        }
    }

    #[derive(Default)]
    pub(super) struct MemoryMailer {
        sent: Mutex<Vec<OutboundEmail>>,
    }

    impl MemoryMailer {
        pub(super) fn sent(&self) -> Vec<OutboundEmail> {
            self.sent.lock().expect("mailer mutex poisoned").clone()
        }
    }

    impl Mailer for MemoryMailer {
        fn send(&self, email: &OutboundEmail) -> Result<(), DispatchError> {
            self.sent
                .lock()
                .expect("mailer mutex poisoned")
                .push(email.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    pub(super) struct QuietNotifier;

    impl PushNotifier for QuietNotifier {
        fn push(&self, _notification: &Notification) -> Result<(), DispatchError> {
            Ok(())
        }
    }

    pub(super) type Dispatcher =
        SideEffectDispatcher<InMemoryLifecycleStore, MemoryMailer, QuietNotifier>;

    /// Records every published event, then hands it to the dispatcher.
    pub(super) struct TeeBus {
        events: Mutex<Vec<LifecycleEvent>>,
        dispatcher: Arc<Dispatcher>,
    }

    impl TeeBus {
        pub(super) fn events(&self) -> Vec<LifecycleEvent> {
            self.events.lock().expect("bus mutex poisoned").clone()
        }

        pub(super) fn count(&self, name: &str) -> usize {
            self.events()
                .iter()
                .filter(|event| event.kind.name() == name)
                .count()
        }
    }

    impl EventBus for TeeBus {
        fn publish(&self, event: LifecycleEvent) -> Result<(), BusError> {
            self.events
                .lock()
                .map_err(|_| BusError::Closed)?
                .push(event.clone());
            self.dispatcher.publish(event)
        }
    }

    pub(super) type Engine = TransitionEngine<InMemoryLifecycleStore, TeeBus>;

    pub(super) struct World {
        pub(super) engine: Arc<Engine>,
        pub(super) store: Arc<InMemoryLifecycleStore>,
        pub(super) bus: Arc<TeeBus>,
        pub(super) mailer: Arc<MemoryMailer>,
    }

    impl World {
        pub(super) fn new() -> Self {
            Self::with_state(seeded_state())
        }

        pub(super) fn with_state(state: LifecycleState) -> Self {
            let store = Arc::new(InMemoryLifecycleStore::with_state(state));
            let mailer = Arc::new(MemoryMailer::default());
            let dispatcher = Arc::new(SideEffectDispatcher::new(
                store.clone(),
                mailer.clone(),
                Arc::new(QuietNotifier),
            ));
            let bus = Arc::new(TeeBus {
                events: Mutex::new(Vec::new()),
                dispatcher,
            });
            let clock = Arc::new(FixedClock::new(
                Utc.with_ymd_and_hms(2025, 1, 20, 9, 0, 0)
                    .single()
                    .expect("valid instant"),
            ));
            let engine = Arc::new(TransitionEngine::new(
                store.clone(),
                bus.clone(),
                clock,
                LifecycleConfig::default(),
            ));
            Self {
                engine,
                store,
                bus,
                mailer,
            }
        }

        pub(super) fn state(&self) -> LifecycleState {
            self.store.snapshot().expect("snapshot")
        }

        pub(super) fn register(&self, email: &str) -> UserId {
            self.engine
                .register_candidate(
                    &Actor::Anonymous,
                    NewAccount {
                        email: email.to_string(),
                        full_name: "Amira Gharbi".to_string(),
                    },
                )
                .expect("candidate registered")
        }
    }
}

mod scenarios {
    use super::common::*;

    use stagebloom::workflows::lifecycle::{
        Actor, ApplicationId, ApplicationStatus, CompanyId, EmailTemplate, HrInterviewDecision,
        Internship, InternshipId, InternshipKind, InternshipStatus, InterviewId, InterviewStatus,
        LifecycleError, OfferDecisionStatus, OfferId, Period, QuotaBreach, ReportPayload,
        ReportStatus, ReviewDecision, ReviewRequest, Role, SubmitReportRequest, TutorDecision,
        UserId,
    };

    /// Candidate C1 applies for o1/o2 and HR schedules an interview with tutor-1.
    fn scheduled(world: &World) -> (UserId, ApplicationId, InterviewId) {
        let candidate = world.register("c1@example.org");
        let application = world
            .engine
            .submit_application(
                &Actor::User(candidate.clone()),
                payload("c1@example.org", &["o1", "o2"]),
            )
            .expect("submitted")
            .application_id;
        let interview = world
            .engine
            .propose_interview(&actor("hr-x"), &application, proposal("tutor-1"))
            .expect("proposed");
        (candidate, application, interview)
    }

    fn approve_with_o1(world: &World, application: &ApplicationId) -> InternshipId {
        world
            .engine
            .set_offer_decision(
                &actor("hr-x"),
                application,
                &OfferId::from("o1"),
                OfferDecisionStatus::Accepted,
            )
            .expect("offer accepted");
        world
            .engine
            .approve_application(&actor("hr-x"), application)
            .expect("approved")
            .internship_id
    }

    #[test]
    fn happy_path_with_offer() {
        let world = World::new();
        let (candidate, application, interview) = scheduled(&world);
        world
            .engine
            .tutor_decision(&actor("tutor-1"), &interview, TutorDecision::Accept)
            .expect("tutor accepted");

        let view = world
            .engine
            .set_offer_decision(
                &actor("hr-x"),
                &application,
                &OfferId::from("o1"),
                OfferDecisionStatus::Accepted,
            )
            .expect("offer accepted");
        let o2 = view
            .offers
            .iter()
            .find(|row| row.offer == OfferId::from("o2"))
            .expect("o2 row");
        assert_eq!(o2.status, OfferDecisionStatus::Rejected);

        let receipt = world
            .engine
            .approve_application(&actor("hr-x"), &application)
            .expect("approved");

        let state = world.state();
        let internship = state.internship(&receipt.internship_id).expect("internship");
        assert_eq!(internship.company, CompanyId::from(COMPANY_X));
        assert_eq!(internship.intern, candidate);
        assert_eq!(internship.tutor, None);
        let intern = state.user(&candidate).expect("intern");
        assert_eq!(intern.role, Role::Intern);
        assert!(receipt.credentials.is_some());
        assert_eq!(world.bus.count("ApplicationApproved"), 1);

        let approvals: Vec<_> = world
            .mailer
            .sent()
            .into_iter()
            .filter(|email| email.template == EmailTemplate::ApplicationApproved)
            .collect();
        assert_eq!(approvals.len(), 1);
        assert!(approvals[0].password.is_some());
    }

    #[test]
    fn quota_is_charged_once_per_application() {
        let world = World::new();
        let (candidate, _, _) = scheduled(&world);
        assert_eq!(
            world.state().user(&candidate).expect("candidate").quota_remaining,
            Some(3)
        );
    }

    #[test]
    fn tutor_reschedule_then_hr_confirms() {
        let world = World::new();
        let (_, application, interview) = scheduled(&world);

        let request = world
            .engine
            .tutor_decision(
                &actor("tutor-1"),
                &interview,
                TutorDecision::Reschedule {
                    alternative_date: date(2025, 2, 12),
                    alternative_time: time(14, 0),
                    comment: Some("conflict".to_string()),
                },
            )
            .expect("reschedule requested");
        assert_eq!(request.status, InterviewStatus::RescheduleRequested);
        assert_eq!(request.tutor_comment.as_deref(), Some("conflict"));
        assert_eq!(
            world.state().application(&application).expect("app").status,
            ApplicationStatus::InterviewScheduled
        );

        let confirmed = world
            .engine
            .hr_interview_decision(&actor("hr-x"), &interview, HrInterviewDecision::Confirm)
            .expect("confirmed");
        assert_eq!(confirmed.status, InterviewStatus::Accepted);
        assert_eq!(confirmed.proposed_date, date(2025, 2, 12));
    }

    #[test]
    fn quota_exhaustion() {
        let world = World::new();
        let candidate = world.register("c2@example.org");
        for _ in 0..4 {
            world
                .engine
                .submit_application(
                    &Actor::User(candidate.clone()),
                    payload("c2@example.org", &["o3"]),
                )
                .expect("within quota");
        }
        let before = world.state().applications.len();

        let fifth = world.engine.submit_application(
            &Actor::User(candidate.clone()),
            payload("c2@example.org", &["o3"]),
        );
        assert!(matches!(
            fifth,
            Err(LifecycleError::QuotaExceeded(QuotaBreach::Candidate { .. }))
        ));
        let state = world.state();
        assert_eq!(state.applications.len(), before);
        assert_eq!(
            state.user(&candidate).expect("candidate").quota_remaining,
            Some(0)
        );
    }

    #[test]
    fn tutor_capacity() {
        let mut state = seeded_state();
        for n in 0..5 {
            let id = InternshipId(format!("int-legacy-{n}"));
            state.internships.insert(
                id.clone(),
                Internship {
                    id,
                    application: ApplicationId(format!("app-legacy-{n}")),
                    intern: UserId(format!("usr-legacy-{n}")),
                    tutor: Some(UserId::from("tutor-2")),
                    company: CompanyId::from(COMPANY_X),
                    kind: InternshipKind::Pfe,
                    title: "Legacy".to_string(),
                    location: "Tunis".to_string(),
                    period: Period {
                        start: date(2024, 9, 1),
                        end: date(2025, 6, 30),
                    },
                    status: InternshipStatus::Active,
                    progress: 40,
                },
            );
        }
        if let Some(tutor) = state.users.get_mut(&UserId::from("tutor-2")) {
            tutor.assigned_intern_count = 5;
        }
        let world = World::with_state(state);

        let application = world
            .engine
            .submit_application(&Actor::Anonymous, payload("new@example.org", &["o3"]))
            .expect("submitted")
            .application_id;
        world
            .engine
            .set_offer_decision(
                &actor("hr-x"),
                &application,
                &OfferId::from("o3"),
                OfferDecisionStatus::Accepted,
            )
            .expect("accepted");
        let fresh = world
            .engine
            .approve_application(&actor("hr-x"), &application)
            .expect("approved")
            .internship_id;

        let result = world
            .engine
            .assign_tutor(&actor("hr-x"), &fresh, &UserId::from("tutor-2"));
        assert!(matches!(
            result,
            Err(LifecycleError::QuotaExceeded(QuotaBreach::TutorCapacity {
                active: 5,
                capacity: 5,
                ..
            }))
        ));
        assert_eq!(world.state().internship(&fresh).expect("internship").tutor, None);
    }

    #[test]
    fn report_rejection_bumps_version() {
        let world = World::new();
        let (candidate, application, interview) = scheduled(&world);
        world
            .engine
            .tutor_decision(&actor("tutor-1"), &interview, TutorDecision::Accept)
            .expect("accepted");
        let internship = approve_with_o1(&world, &application);
        world
            .engine
            .assign_tutor(&actor("hr-x"), &internship, &UserId::from("tutor-1"))
            .expect("assigned");

        let report = world
            .engine
            .submit_report(
                &Actor::User(candidate),
                &internship,
                SubmitReportRequest {
                    payload: ReportPayload {
                        title: "Fleet telemetry".to_string(),
                        abstract_text: "Streaming telemetry for delivery vans.".to_string(),
                        keywords: vec!["telemetry".to_string()],
                        speciality: "Software engineering".to_string(),
                        year: 2025,
                    },
                    file_ref: "reports/r1.pdf".to_string(),
                },
            )
            .expect("submitted");
        assert_eq!(report.version, 1);
        assert_eq!(report.status, ReportStatus::Submitted);

        let reviewed = world
            .engine
            .review_report(
                &actor("tutor-1"),
                &report.id,
                ReviewRequest {
                    decision: ReviewDecision::Reject,
                    comment: Some("rewrite §3".to_string()),
                },
            )
            .expect("reviewed");
        assert_eq!(reviewed.status, ReportStatus::Draft);
        assert_eq!(reviewed.version, 2);
        assert!(!reviewed.is_final);
    }

    #[test]
    fn full_rejection_fan_out() {
        let world = World::new();
        let application = world
            .engine
            .submit_application(
                &Actor::Anonymous,
                payload("c6@example.org", &["o1", "o2", "o3"]),
            )
            .expect("submitted")
            .application_id;

        for offer in ["o1", "o2", "o3"] {
            world
                .engine
                .set_offer_decision(
                    &actor("hr-x"),
                    &application,
                    &OfferId::from(offer),
                    OfferDecisionStatus::Rejected,
                )
                .expect("offer rejected");
        }

        let state = world.state();
        let stored = state.application(&application).expect("app");
        assert_eq!(stored.status, ApplicationStatus::Rejected);
        assert!(stored.rejection_reason.is_some());
        assert_eq!(world.bus.count("ApplicationRejected"), 1);

        let rejections: Vec<_> = world
            .mailer
            .sent()
            .into_iter()
            .filter(|email| email.template == EmailTemplate::ApplicationRejected)
            .collect();
        assert_eq!(rejections.len(), 1);
        assert_eq!(rejections[0].to, "c6@example.org");
    }

    #[test]
    fn replayed_decisions_emit_nothing() {
        let world = World::new();
        let (_, application, interview) = scheduled(&world);

        let accepted = world
            .engine
            .tutor_decision(&actor("tutor-1"), &interview, TutorDecision::Accept)
            .expect("accepted");
        let events = world.bus.events().len();
        let replayed = world
            .engine
            .tutor_decision(&actor("tutor-1"), &interview, TutorDecision::Accept)
            .expect("replayed");
        assert_eq!(accepted, replayed);
        assert_eq!(world.bus.events().len(), events);

        let first = world
            .engine
            .set_offer_decision(
                &actor("hr-x"),
                &application,
                &OfferId::from("o2"),
                OfferDecisionStatus::Accepted,
            )
            .expect("accepted");
        let events = world.bus.events().len();
        let second = world
            .engine
            .set_offer_decision(
                &actor("hr-x"),
                &application,
                &OfferId::from("o2"),
                OfferDecisionStatus::Accepted,
            )
            .expect("replayed");
        assert_eq!(first, second);
        assert_eq!(world.bus.events().len(), events);
    }
}

mod properties {
    use super::common::*;

    use proptest::prelude::*;
    use stagebloom::workflows::lifecycle::{
        Actor, ApplicationStatus, CompanyId, HrInterviewDecision, InternshipStatus,
        LifecycleError, LifecycleState, OfferDecisionStatus, OfferId, ReportStatus, Role,
        TutorDecision, UserId,
    };

    const CANDIDATES: [&str; 3] = ["p0@example.org", "p1@example.org", "p2@example.org"];
    const OFFERS: [&str; 5] = ["o1", "o2", "o3", "o4", "o5"];
    const TUTORS: [&str; 3] = ["tutor-1", "tutor-2", "tutor-y"];
    const INITIAL_QUOTA: u32 = 4;
    const CAPACITY: usize = 5;

    #[derive(Debug, Clone)]
    enum Op {
        Register(usize),
        Submit { candidate: usize, offers: Vec<usize> },
        Propose { application: usize, tutor: usize },
        TutorAccept(usize),
        TutorReject(usize),
        TutorReschedule(usize),
        HrConfirm(usize),
        HrCancel(usize),
        OfferDecision { application: usize, offer: usize, accept: bool },
        Approve(usize),
        Reject(usize),
        AssignTutor { internship: usize, tutor: usize },
        Close { internship: usize, completed: bool },
    }

    fn arb_op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0..3usize).prop_map(Op::Register),
            (0..3usize, prop::collection::vec(0..5usize, 0..5))
                .prop_map(|(candidate, offers)| Op::Submit { candidate, offers }),
            (0..8usize, 0..3usize)
                .prop_map(|(application, tutor)| Op::Propose { application, tutor }),
            (0..8usize).prop_map(Op::TutorAccept),
            (0..8usize).prop_map(Op::TutorReject),
            (0..8usize).prop_map(Op::TutorReschedule),
            (0..8usize).prop_map(Op::HrConfirm),
            (0..8usize).prop_map(Op::HrCancel),
            (0..8usize, 0..3usize, any::<bool>()).prop_map(|(application, offer, accept)| {
                Op::OfferDecision {
                    application,
                    offer,
                    accept,
                }
            }),
            (0..8usize).prop_map(Op::Approve),
            (0..8usize).prop_map(Op::Reject),
            (0..8usize, 0..3usize)
                .prop_map(|(internship, tutor)| Op::AssignTutor { internship, tutor }),
            (0..8usize, any::<bool>())
                .prop_map(|(internship, completed)| Op::Close { internship, completed }),
        ]
    }

    fn hr_of(company: &CompanyId) -> Actor {
        if company.0 == COMPANY_X {
            actor("hr-x")
        } else {
            actor("hr-y")
        }
    }

    fn nth<K: Clone, V>(map: &std::collections::BTreeMap<K, V>, index: usize) -> Option<(K, &V)> {
        if map.is_empty() {
            return None;
        }
        map.iter()
            .nth(index % map.len())
            .map(|(key, value)| (key.clone(), value))
    }

    /// Run one operation. `None` means there was nothing to act on.
    fn run(world: &World, op: &Op) -> Option<Result<(), LifecycleError>> {
        let state = world.state();
        let engine = &world.engine;
        let outcome = match op {
            Op::Register(candidate) => engine
                .register_candidate(
                    &Actor::Anonymous,
                    stagebloom::workflows::lifecycle::NewAccount {
                        email: CANDIDATES[*candidate].to_string(),
                        full_name: format!("Candidate {candidate}"),
                    },
                )
                .map(|_| ()),
            Op::Submit { candidate, offers } => {
                let email = CANDIDATES[*candidate];
                let caller = state
                    .users
                    .values()
                    .find(|user| user.email == email && user.role == Role::Candidate)
                    .map(|user| Actor::User(user.id.clone()))
                    .unwrap_or(Actor::Anonymous);
                let offers: Vec<&str> = offers.iter().map(|index| OFFERS[*index]).collect();
                engine
                    .submit_application(&caller, payload(email, &offers))
                    .map(|_| ())
            }
            Op::Propose { application, tutor } => {
                let (id, app) = nth(&state.applications, *application)?;
                engine
                    .propose_interview(&hr_of(&app.company), &id, proposal(TUTORS[*tutor]))
                    .map(|_| ())
            }
            Op::TutorAccept(index)
            | Op::TutorReject(index)
            | Op::TutorReschedule(index) => {
                let (id, request) = nth(&state.interviews, *index)?;
                let decision = match op {
                    Op::TutorAccept(_) => TutorDecision::Accept,
                    Op::TutorReject(_) => TutorDecision::Reject {
                        comment: "unavailable".to_string(),
                    },
                    _ => TutorDecision::Reschedule {
                        alternative_date: date(2025, 2, 14),
                        alternative_time: time(9, 30),
                        comment: None,
                    },
                };
                engine
                    .tutor_decision(&Actor::User(request.tutor.clone()), &id, decision)
                    .map(|_| ())
            }
            Op::HrConfirm(index) | Op::HrCancel(index) => {
                let (id, request) = nth(&state.interviews, *index)?;
                let company = state.application(&request.application).ok()?.company.clone();
                let decision = if matches!(op, Op::HrConfirm(_)) {
                    HrInterviewDecision::Confirm
                } else {
                    HrInterviewDecision::Cancel
                };
                engine
                    .hr_interview_decision(&hr_of(&company), &id, decision)
                    .map(|_| ())
            }
            Op::OfferDecision {
                application,
                offer,
                accept,
            } => {
                let (id, app) = nth(&state.applications, *application)?;
                let rows: Vec<OfferId> = state.offers_of(&id).map(|row| row.offer.clone()).collect();
                if rows.is_empty() {
                    return None;
                }
                let decision = if *accept {
                    OfferDecisionStatus::Accepted
                } else {
                    OfferDecisionStatus::Rejected
                };
                engine
                    .set_offer_decision(
                        &hr_of(&app.company),
                        &id,
                        &rows[*offer % rows.len()],
                        decision,
                    )
                    .map(|_| ())
            }
            Op::Approve(index) => {
                let (id, app) = nth(&state.applications, *index)?;
                engine
                    .approve_application(&hr_of(&app.company), &id)
                    .map(|_| ())
            }
            Op::Reject(index) => {
                let (id, app) = nth(&state.applications, *index)?;
                engine
                    .reject_application(&hr_of(&app.company), &id, "not retained")
                    .map(|_| ())
            }
            Op::AssignTutor { internship, tutor } => {
                let (id, stored) = nth(&state.internships, *internship)?;
                engine
                    .assign_tutor(&hr_of(&stored.company), &id, &UserId::from(TUTORS[*tutor]))
                    .map(|_| ())
            }
            Op::Close {
                internship,
                completed,
            } => {
                let (id, stored) = nth(&state.internships, *internship)?;
                let status = if *completed {
                    InternshipStatus::Completed
                } else {
                    InternshipStatus::Cancelled
                };
                engine
                    .close_internship(&hr_of(&stored.company), &id, status)
                    .map(|_| ())
            }
        };
        Some(outcome)
    }

    fn check_invariants(state: &LifecycleState) -> Result<(), TestCaseError> {
        for application in state.applications.values() {
            let rows: Vec<_> = state.offers_of(&application.id).collect();
            prop_assert!(rows.len() <= 3);

            let accepted = rows
                .iter()
                .filter(|row| row.status == OfferDecisionStatus::Accepted)
                .count();
            prop_assert!(accepted <= 1);
            if accepted == 1 {
                prop_assert!(rows.iter().all(|row| row.status != OfferDecisionStatus::Pending));
            }

            let internships: Vec<_> = state
                .internships
                .values()
                .filter(|internship| internship.application == application.id)
                .collect();
            if application.status == ApplicationStatus::Approved {
                prop_assert_eq!(internships.len(), 1);
                let internship = internships[0];
                prop_assert_eq!(&internship.company, &application.company);
                let intern = state.user(&internship.intern).expect("intern exists");
                prop_assert_eq!(intern.role, Role::Intern);
            } else {
                prop_assert!(internships.is_empty());
            }
            if application.status == ApplicationStatus::Rejected {
                prop_assert!(application.rejection_reason.is_some());
            }

            let open: Vec<_> = state
                .interviews
                .values()
                .filter(|request| request.application == application.id && request.status.is_open())
                .collect();
            prop_assert!(open.len() <= 1);
            for request in open {
                let tutor = state.user(&request.tutor).expect("tutor exists");
                prop_assert_eq!(tutor.company.as_ref(), Some(&application.company));
            }
        }

        for user in state.users.values() {
            match user.role {
                Role::Tutor => {
                    let active = state
                        .internships
                        .values()
                        .filter(|internship| {
                            internship.tutor.as_ref() == Some(&user.id)
                                && internship.status == InternshipStatus::Active
                        })
                        .count();
                    prop_assert!(active <= CAPACITY);
                    prop_assert_eq!(user.assigned_intern_count as usize, active);
                    if let Some(internship) = state
                        .internships
                        .values()
                        .find(|internship| internship.tutor.as_ref() == Some(&user.id))
                    {
                        prop_assert_eq!(Some(&internship.company), user.company.as_ref());
                    }
                }
                Role::Candidate => {
                    let submitted = state
                        .applications
                        .values()
                        .filter(|application| application.submitted_by.as_ref() == Some(&user.id))
                        .count() as u32;
                    prop_assert_eq!(user.quota_remaining.map(|left| left + submitted), Some(INITIAL_QUOTA));
                }
                _ => {}
            }
        }

        for report in state.reports.values() {
            prop_assert!(report.version >= 1);
            if report.is_final {
                prop_assert!(matches!(
                    report.status,
                    ReportStatus::Approved | ReportStatus::Archived
                ));
            }
        }
        Ok(())
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn random_operation_sequences_preserve_invariants(ops in prop::collection::vec(arb_op(), 1..40)) {
            let world = World::new();
            for op in &ops {
                let before = world.state();
                let events_before = world.bus.events().len();
                let Some(outcome) = run(&world, op) else {
                    continue;
                };
                let after = world.state();
                if outcome.is_err() {
                    prop_assert_eq!(format!("{before:?}"), format!("{after:?}"));
                    prop_assert_eq!(world.bus.events().len(), events_before);
                }
                prop_assert!(after.outbox.is_empty());
                check_invariants(&after)?;
            }
        }

        #[test]
        fn event_sequences_strictly_increase(ops in prop::collection::vec(arb_op(), 1..30)) {
            let world = World::new();
            for op in &ops {
                let _ = run(&world, op);
            }
            let sequences: Vec<u64> = world.bus.events().iter().map(|event| event.sequence).collect();
            prop_assert!(sequences.windows(2).all(|pair| pair[0] < pair[1]));
        }
    }
}
