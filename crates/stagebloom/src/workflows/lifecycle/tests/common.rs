use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use axum::response::Response;
use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
use serde_json::Value;

use crate::config::LifecycleConfig;
use crate::workflows::lifecycle::dispatcher::{
    DispatchError, Mailer, OutboundEmail, PushNotifier, SideEffectDispatcher,
};
use crate::workflows::lifecycle::domain::{
    Actor, ApplicationDocuments, ApplicationId, ApplicationPayload, CandidateIdentity, Company,
    CompanyId, InternshipKind, Notification, Offer, OfferId, OfferStatus, Period, Role, User,
    UserId,
};
use crate::workflows::lifecycle::events::{BusError, EventBus, LifecycleEvent};
use crate::workflows::lifecycle::interviews::ProposeInterview;
use crate::workflows::lifecycle::memory::InMemoryLifecycleStore;
use crate::workflows::lifecycle::repository::{
    LifecycleRepository, LifecycleState, RepositoryError,
};
use crate::workflows::lifecycle::{FixedClock, TransitionEngine};

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

pub(super) fn config() -> LifecycleConfig {
    LifecycleConfig::default()
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

/// Two companies with HR, tutors, an admin and a handful of offers.
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

pub(super) fn identity(email: &str) -> CandidateIdentity {
    CandidateIdentity {
        first_name: "Amira".to_string(),
        last_name: "Gharbi".to_string(),
        email: email.to_string(),
        phone: "+216 98 000 000".to_string(),
        institute: "ENSI".to_string(),
        speciality: "Software engineering".to_string(),
        level: "Engineering cycle, year 3".to_string(),
    }
}

pub(super) fn payload(email: &str, offers: &[&str]) -> ApplicationPayload {
    ApplicationPayload {
        identity: identity(email),
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

/// Event bus that records everything it accepts and can be switched to refuse.
#[derive(Default)]
pub(super) struct RecordingBus {
    events: Mutex<Vec<LifecycleEvent>>,
    refuse: AtomicBool,
}

impl RecordingBus {
    pub(super) fn events(&self) -> Vec<LifecycleEvent> {
        self.events.lock().expect("bus mutex poisoned").clone()
    }

    pub(super) fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(|event| event.kind.name()).collect()
    }

    pub(super) fn refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }
}

impl EventBus for RecordingBus {
    fn publish(&self, event: LifecycleEvent) -> Result<(), BusError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(BusError::Unavailable("bus offline".to_string()));
        }
        self.events.lock().expect("bus mutex poisoned").push(event);
        Ok(())
    }
}

#[derive(Default)]
pub(super) struct RecordingMailer {
    sent: Mutex<Vec<OutboundEmail>>,
    fail: AtomicBool,
}

impl RecordingMailer {
    pub(super) fn sent(&self) -> Vec<OutboundEmail> {
        self.sent.lock().expect("mailer mutex poisoned").clone()
    }

    pub(super) fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

impl Mailer for RecordingMailer {
    fn send(&self, email: &OutboundEmail) -> Result<(), DispatchError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(DispatchError::Mail("smtp relay refused".to_string()));
        }
        self.sent
            .lock()
            .expect("mailer mutex poisoned")
            .push(email.clone());
        Ok(())
    }
}

#[derive(Default)]
pub(super) struct RecordingNotifier {
    pushed: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub(super) fn pushed(&self) -> Vec<Notification> {
        self.pushed.lock().expect("notifier mutex poisoned").clone()
    }
}

impl PushNotifier for RecordingNotifier {
    fn push(&self, notification: &Notification) -> Result<(), DispatchError> {
        self.pushed
            .lock()
            .expect("notifier mutex poisoned")
            .push(notification.clone());
        Ok(())
    }
}

/// Store whose commits always fail after the work ran.
#[derive(Default)]
pub(super) struct FailingCommitStore {
    inner: InMemoryLifecycleStore,
}

impl FailingCommitStore {
    pub(super) fn new(state: LifecycleState) -> Self {
        Self {
            inner: InMemoryLifecycleStore::with_state(state),
        }
    }
}

impl LifecycleRepository for FailingCommitStore {
    fn transact<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&mut LifecycleState) -> Result<T, E>,
        E: From<RepositoryError>,
    {
        let mut scratch = self.inner.snapshot().map_err(E::from)?;
        work(&mut scratch)?;
        Err(E::from(RepositoryError::CommitFailed(
            "disk full".to_string(),
        )))
    }

    fn read<T, F>(&self, view: F) -> Result<T, RepositoryError>
    where
        F: FnOnce(&LifecycleState) -> T,
    {
        self.inner.read(view)
    }
}

pub(super) type TestEngine = TransitionEngine<InMemoryLifecycleStore, RecordingBus>;

pub(super) struct Harness {
    pub(super) engine: Arc<TestEngine>,
    pub(super) store: Arc<InMemoryLifecycleStore>,
    pub(super) bus: Arc<RecordingBus>,
    pub(super) clock: Arc<FixedClock>,
}

impl Harness {
    pub(super) fn new() -> Self {
        Self::with_config(config())
    }

    pub(super) fn with_config(config: LifecycleConfig) -> Self {
        let store = Arc::new(InMemoryLifecycleStore::with_state(seeded_state()));
        let bus = Arc::new(RecordingBus::default());
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2025, 1, 20, 9, 0, 0)
                .single()
                .expect("valid instant"),
        ));
        let engine = Arc::new(TransitionEngine::new(
            store.clone(),
            bus.clone(),
            clock.clone(),
            config,
        ));
        Self {
            engine,
            store,
            bus,
            clock,
        }
    }

    pub(super) fn state(&self) -> LifecycleState {
        self.store.snapshot().expect("snapshot")
    }

    pub(super) fn register(&self, email: &str) -> UserId {
        self.engine
            .register_candidate(
                &Actor::Anonymous,
                crate::workflows::lifecycle::NewAccount {
                    email: email.to_string(),
                    full_name: "Amira Gharbi".to_string(),
                },
            )
            .expect("candidate registered")
    }

    /// Candidate application for offers o1 and o2 of company X.
    pub(super) fn submit(&self, candidate: &UserId, email: &str) -> ApplicationId {
        self.engine
            .submit_application(
                &Actor::User(candidate.clone()),
                payload(email, &["o1", "o2"]),
            )
            .expect("application submitted")
            .application_id
    }
}

pub(super) type TestDispatcher =
    SideEffectDispatcher<InMemoryLifecycleStore, RecordingMailer, RecordingNotifier>;

pub(super) struct DispatchHarness {
    pub(super) engine: Arc<TransitionEngine<InMemoryLifecycleStore, TestDispatcher>>,
    pub(super) dispatcher: Arc<TestDispatcher>,
    pub(super) store: Arc<InMemoryLifecycleStore>,
    pub(super) mailer: Arc<RecordingMailer>,
    pub(super) notifier: Arc<RecordingNotifier>,
}

impl DispatchHarness {
    pub(super) fn new() -> Self {
        let store = Arc::new(InMemoryLifecycleStore::with_state(seeded_state()));
        let mailer = Arc::new(RecordingMailer::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let dispatcher = Arc::new(SideEffectDispatcher::new(
            store.clone(),
            mailer.clone(),
            notifier.clone(),
        ));
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2025, 1, 20, 9, 0, 0)
                .single()
                .expect("valid instant"),
        ));
        let engine = Arc::new(TransitionEngine::new(
            store.clone(),
            dispatcher.clone(),
            clock,
            config(),
        ));
        Self {
            engine,
            dispatcher,
            store,
            mailer,
            notifier,
        }
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
