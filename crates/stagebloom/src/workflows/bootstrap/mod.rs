//! Idempotent loading of reference data: companies and staff from a JSON seed, offers from a
//! CSV catalogue, candidates through the engine, followed by a tutor load recount.

mod parser;
mod seed;

use serde::Serialize;
use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::info;

use crate::workflows::lifecycle::directory::{self, NewAccount};
use crate::workflows::lifecycle::error::Validator;
use crate::workflows::lifecycle::{
    catalog, Actor, Company, CompanyId, EventBus, LifecycleError, LifecycleRepository,
    InternshipStatus, LifecycleState, Offer, OfferId, Role, TransitionEngine, TutorDrift, User,
    UserId,
};

use parser::{OfferRecord, ParseError};

pub use parser::RowError;
pub use seed::{Seed, SeedCandidate, SeedCompany, SeedStaff};

#[derive(Debug)]
pub enum BootstrapError {
    Io(std::io::Error),
    Csv(csv::Error),
    Json(serde_json::Error),
    Row(RowError),
    Seed(String),
    Lifecycle(LifecycleError),
}

impl std::fmt::Display for BootstrapError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BootstrapError::Io(err) => write!(f, "failed to read bootstrap file: {}", err),
            BootstrapError::Csv(err) => write!(f, "invalid offer catalogue: {}", err),
            BootstrapError::Json(err) => write!(f, "invalid seed file: {}", err),
            BootstrapError::Row(row) => {
                write!(f, "offer catalogue line {}: {}", row.line, row.message)
            }
            BootstrapError::Seed(message) => write!(f, "inconsistent seed: {}", message),
            BootstrapError::Lifecycle(err) => {
                write!(f, "could not apply reference data: {}", err)
            }
        }
    }
}

impl std::error::Error for BootstrapError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BootstrapError::Io(err) => Some(err),
            BootstrapError::Csv(err) => Some(err),
            BootstrapError::Json(err) => Some(err),
            BootstrapError::Lifecycle(err) => Some(err),
            BootstrapError::Row(_) | BootstrapError::Seed(_) => None,
        }
    }
}

impl From<std::io::Error> for BootstrapError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<serde_json::Error> for BootstrapError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err)
    }
}

impl From<ParseError> for BootstrapError {
    fn from(err: ParseError) -> Self {
        match err {
            ParseError::Csv(err) => Self::Csv(err),
            ParseError::Row(row) => Self::Row(row),
        }
    }
}

impl From<LifecycleError> for BootstrapError {
    fn from(err: LifecycleError) -> Self {
        Self::Lifecycle(err)
    }
}

/// What a bootstrap run changed. A second run over the same files reports only `*_existing`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BootstrapReport {
    pub companies_created: usize,
    pub companies_updated: usize,
    pub staff_created: usize,
    pub staff_updated: usize,
    pub offers_created: usize,
    pub offers_updated: usize,
    pub candidates_registered: usize,
    pub candidates_existing: usize,
    pub drifts: Vec<TutorDrift>,
}

/// Parsed seed and catalogue, checked for internal consistency.
#[derive(Debug, Clone, Default)]
pub struct BootstrapPlan {
    seed: Seed,
    offers: Vec<OfferRecord>,
}

impl BootstrapPlan {
    pub fn load(seed: Option<&Path>, offers: Option<&Path>) -> Result<Self, BootstrapError> {
        let seed = match seed {
            Some(path) => seed::parse_seed(File::open(path)?)?,
            None => Seed::default(),
        };
        let offers = match offers {
            Some(path) => parser::parse_offers(File::open(path)?)?,
            None => Vec::new(),
        };
        Self::new(seed, offers)
    }

    pub fn from_readers<S: Read, O: Read>(seed: S, offers: O) -> Result<Self, BootstrapError> {
        Self::new(seed::parse_seed(seed)?, parser::parse_offers(offers)?)
    }

    fn new(seed: Seed, offers: Vec<OfferRecord>) -> Result<Self, BootstrapError> {
        let plan = Self { seed, offers };
        plan.check()?;
        Ok(plan)
    }

    pub fn seed(&self) -> &Seed {
        &self.seed
    }

    pub fn offer_count(&self) -> usize {
        self.offers.len()
    }

    fn check(&self) -> Result<(), BootstrapError> {
        let mut names = HashSet::new();
        for company in &self.seed.companies {
            if company.name.trim().is_empty() {
                return Err(BootstrapError::Seed("company without a name".to_string()));
            }
            if !names.insert(company.name.trim().to_lowercase()) {
                return Err(BootstrapError::Seed(format!(
                    "company '{}' listed twice",
                    company.name
                )));
            }
        }

        let mut emails = HashSet::new();
        for staff in &self.seed.staff {
            if matches!(staff.role, Role::Candidate | Role::Intern) {
                return Err(BootstrapError::Seed(format!(
                    "{} has role {}; only tutors, HR and admins are seeded as staff",
                    staff.email,
                    staff.role.label()
                )));
            }
            if staff.role.requires_company() && staff.company.is_none() {
                return Err(BootstrapError::Seed(format!(
                    "{} needs a company",
                    staff.email
                )));
            }
            if !emails.insert(directory::normalize_email(&staff.email)) {
                return Err(BootstrapError::Seed(format!(
                    "{} listed twice",
                    staff.email
                )));
            }
        }
        for candidate in &self.seed.candidates {
            if !emails.insert(directory::normalize_email(&candidate.email)) {
                return Err(BootstrapError::Seed(format!(
                    "{} listed twice",
                    candidate.email
                )));
            }
        }

        let mut references = HashSet::new();
        for offer in &self.offers {
            if !references.insert(offer.reference.to_ascii_uppercase()) {
                return Err(BootstrapError::Row(RowError {
                    line: offer.line,
                    message: format!("reference {} listed twice", offer.reference),
                }));
            }
        }
        Ok(())
    }
}

pub struct Bootstrapper;

impl Bootstrapper {
    /// Upsert reference data, register seeded candidates and recount tutor loads.
    ///
    /// Companies, staff and offers are written in one transaction: an unknown company
    /// reference leaves the store untouched.
    pub fn apply<R, B>(
        engine: &TransitionEngine<R, B>,
        plan: &BootstrapPlan,
    ) -> Result<BootstrapReport, BootstrapError>
    where
        R: LifecycleRepository + 'static,
        B: EventBus + 'static,
    {
        let mut report = engine.maintain("bootstrap_reference_data", |state, _| {
            let mut report = BootstrapReport::default();
            upsert_companies(state, &plan.seed.companies, &mut report);
            upsert_staff(state, &plan.seed.staff, &mut report)?;
            upsert_offers(state, &plan.offers, &mut report)?;
            Ok(report)
        })?;

        for candidate in &plan.seed.candidates {
            let known = engine
                .repository()
                .read(|state| directory::lookup_by_email(state, &candidate.email).is_some())
                .map_err(LifecycleError::from)?;
            if known {
                report.candidates_existing += 1;
                continue;
            }
            engine.register_candidate(
                &Actor::Anonymous,
                NewAccount {
                    email: candidate.email.clone(),
                    full_name: candidate.full_name.clone(),
                },
            )?;
            report.candidates_registered += 1;
        }

        report.drifts = engine
            .maintain("bootstrap_repair", |state, _| Ok(engine.recount(state)))?
            .drifts;

        info!(
            companies_created = report.companies_created,
            staff_created = report.staff_created,
            offers_created = report.offers_created,
            candidates_registered = report.candidates_registered,
            drifts = report.drifts.len(),
            "bootstrap applied"
        );
        Ok(report)
    }
}

fn company_by_name(state: &LifecycleState, name: &str) -> Option<CompanyId> {
    let wanted = name.trim();
    state
        .companies
        .values()
        .find(|company| company.name.eq_ignore_ascii_case(wanted))
        .map(|company| company.id.clone())
}

fn upsert_companies(state: &mut LifecycleState, rows: &[SeedCompany], report: &mut BootstrapReport) {
    for row in rows {
        let sector = row.sector.trim().to_string();
        match company_by_name(state, &row.name) {
            Some(id) => {
                if let Some(company) = state.companies.get_mut(&id) {
                    if company.sector != sector || company.active != row.active {
                        company.sector = sector;
                        company.active = row.active;
                        report.companies_updated += 1;
                    }
                }
            }
            None => {
                let id = CompanyId(state.next_id("cmp"));
                state.companies.insert(
                    id.clone(),
                    Company {
                        id,
                        name: row.name.trim().to_string(),
                        sector,
                        active: row.active,
                    },
                );
                report.companies_created += 1;
            }
        }
    }
}

fn upsert_staff(
    state: &mut LifecycleState,
    rows: &[SeedStaff],
    report: &mut BootstrapReport,
) -> Result<(), LifecycleError> {
    let mut validator = Validator::default();
    let resolved: Vec<Option<CompanyId>> = rows
        .iter()
        .map(|row| {
            let company = row.company.as_deref().and_then(|name| company_by_name(state, name));
            validator.require(
                &format!("staff.{}.company", row.email),
                row.company.is_none() || company.is_some(),
                "unknown company",
            );
            if let Some(existing) = directory::lookup_by_email(state, &row.email) {
                validator.require(
                    &format!("staff.{}.role", row.email),
                    !matches!(existing.role, Role::Candidate | Role::Intern),
                    "email already belongs to a candidate or intern",
                );
                let moves = existing.role != row.role || existing.company != company;
                validator.require(
                    &format!("staff.{}.company", row.email),
                    !(moves && supervises(state, &existing.id)),
                    "tutor has open interview requests or active internships",
                );
            }
            company
        })
        .collect();
    validator.finish()?;

    for (row, company) in rows.iter().zip(resolved) {
        let email = directory::normalize_email(&row.email);
        let full_name = row.full_name.trim().to_string();
        let existing = directory::lookup_by_email(state, &email).map(|user| user.id.clone());
        match existing {
            Some(id) => {
                let user = state.user_mut(&id)?;
                if user.full_name != full_name
                    || user.role != row.role
                    || user.company != company
                    || user.active != row.active
                {
                    user.full_name = full_name;
                    user.role = row.role;
                    user.company = company;
                    user.active = row.active;
                    report.staff_updated += 1;
                }
            }
            None => {
                let id = UserId(state.next_id("usr"));
                state.users.insert(
                    id.clone(),
                    User {
                        id,
                        email,
                        full_name,
                        role: row.role,
                        company,
                        active: row.active,
                        quota_remaining: None,
                        assigned_intern_count: 0,
                        credentials_issued_at: None,
                    },
                );
                report.staff_created += 1;
            }
        }
    }
    Ok(())
}

/// Whether a tutor is bound to a company by an open interview request or an active internship.
fn supervises(state: &LifecycleState, user: &UserId) -> bool {
    state
        .interviews
        .values()
        .any(|request| &request.tutor == user && request.status.is_open())
        || state.internships.values().any(|internship| {
            internship.tutor.as_ref() == Some(user)
                && internship.status == InternshipStatus::Active
        })
}

fn upsert_offers(
    state: &mut LifecycleState,
    rows: &[OfferRecord],
    report: &mut BootstrapReport,
) -> Result<(), LifecycleError> {
    let mut validator = Validator::default();
    let companies: Vec<Option<CompanyId>> = rows
        .iter()
        .map(|row| {
            let company = company_by_name(state, &row.company);
            validator.require(
                &format!("offers.line{}.company", row.line),
                company.is_some(),
                "unknown company",
            );
            if let (Some(stored), Some(company)) =
                (catalog::get_by_reference(state, &row.reference), &company)
            {
                validator.require(
                    &format!("offers.line{}.company", row.line),
                    &stored.company == company,
                    "the company of an existing offer cannot change",
                );
            }
            company
        })
        .collect();
    validator.finish()?;

    for (row, company) in rows.iter().zip(companies.into_iter().flatten()) {
        let offer = Offer {
            id: OfferId(String::new()),
            reference: row.reference.clone(),
            title: row.title.clone(),
            company,
            kind: row.kind,
            status: row.status,
            location: row.location.clone(),
        };
        let existing = catalog::get_by_reference(state, &row.reference).map(|offer| offer.id.clone());
        match existing {
            Some(id) => {
                if let Some(stored) = state.offers.get_mut(&id) {
                    let updated = Offer {
                        id: id.clone(),
                        reference: stored.reference.clone(),
                        company: stored.company.clone(),
                        ..offer
                    };
                    if *stored != updated {
                        *stored = updated;
                        report.offers_updated += 1;
                    }
                }
            }
            None => {
                let id = OfferId(state.next_id("off"));
                state.offers.insert(id.clone(), Offer { id, ..offer });
                report.offers_created += 1;
            }
        }
    }
    Ok(())
}
