//! Identity and role directory: user lookup, candidate registration, intern provisioning.

use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::domain::{CompanyId, Role, User, UserId};
use super::error::{LifecycleError, Validator};
use super::events::{IssuedCredentials, Secret};
use super::quota::QuotaKeeper;
use super::repository::LifecycleState;

/// Minimal data needed to open an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAccount {
    pub email: String,
    pub full_name: String,
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

pub fn lookup_by_email<'s>(state: &'s LifecycleState, email: &str) -> Option<&'s User> {
    let wanted = normalize_email(email);
    state.users.values().find(|user| user.email == wanted)
}

/// Open a candidate account carrying the full submission quota.
pub fn register_candidate(
    state: &mut LifecycleState,
    account: &NewAccount,
    quota: &QuotaKeeper,
) -> Result<UserId, LifecycleError> {
    Validator::default()
        .present("email", &account.email)
        .require("email", account.email.contains('@'), "must be an email address")
        .present("full_name", &account.full_name)
        .finish()?;

    if lookup_by_email(state, &account.email).is_some() {
        return Err(LifecycleError::conflict(format!(
            "an account already exists for {}",
            normalize_email(&account.email)
        )));
    }

    let id = UserId(state.next_id("usr"));
    state.users.insert(
        id.clone(),
        User {
            id: id.clone(),
            email: normalize_email(&account.email),
            full_name: account.full_name.trim().to_string(),
            role: Role::Candidate,
            company: None,
            active: true,
            quota_remaining: Some(quota.candidate_quota()),
            assigned_intern_count: 0,
            credentials_issued_at: None,
        },
    );
    Ok(id)
}

/// Create an intern account for `company`, or promote the candidate that owns `email`.
///
/// Either way a fresh password is generated and returned once.
pub fn create_intern(
    state: &mut LifecycleState,
    account: &NewAccount,
    company: &CompanyId,
    now: DateTime<Utc>,
    password_length: usize,
) -> Result<IssuedCredentials, LifecycleError> {
    let email = normalize_email(&account.email);
    let password = generate_password(password_length);

    let existing = lookup_by_email(state, &email).map(|user| (user.id.clone(), user.role));
    let (user_id, promoted) = match existing {
        Some((id, Role::Candidate)) => {
            let user = state.user_mut(&id)?;
            user.role = Role::Intern;
            user.company = Some(company.clone());
            user.quota_remaining = None;
            user.active = true;
            user.credentials_issued_at = Some(now);
            (id, true)
        }
        Some((id, role)) => {
            return Err(LifecycleError::conflict(format!(
                "{email} already belongs to {id} with role {}",
                role.label()
            )));
        }
        None => {
            let id = UserId(state.next_id("usr"));
            state.users.insert(
                id.clone(),
                User {
                    id: id.clone(),
                    email: email.clone(),
                    full_name: account.full_name.trim().to_string(),
                    role: Role::Intern,
                    company: Some(company.clone()),
                    active: true,
                    quota_remaining: None,
                    assigned_intern_count: 0,
                    credentials_issued_at: Some(now),
                },
            );
            (id, false)
        }
    };

    Ok(IssuedCredentials {
        user_id,
        email,
        password: Secret::new(password),
        promoted,
    })
}

/// Tutors of `company` with spare capacity, least loaded first, then by name.
pub fn available_tutors<'s>(
    state: &'s LifecycleState,
    company: &CompanyId,
    quota: &QuotaKeeper,
) -> Vec<(&'s User, u32)> {
    let mut tutors: Vec<(&User, u32)> = state
        .users
        .values()
        .filter(|user| user.role == Role::Tutor && user.active)
        .filter(|user| user.company.as_ref() == Some(company))
        .map(|user| (user, quota.active_load(state, &user.id, None)))
        .filter(|(_, load)| *load < quota.tutor_capacity())
        .collect();

    tutors.sort_by(|(a, a_load), (b, b_load)| {
        a_load
            .cmp(b_load)
            .then_with(|| a.full_name.cmp(&b.full_name))
    });
    tutors
}

/// Random alphanumeric password that always mixes letters and digits.
pub fn generate_password(length: usize) -> String {
    let length = length.max(12);
    let mut rng = rand::thread_rng();
    loop {
        let candidate: String = (&mut rng)
            .sample_iter(&Alphanumeric)
            .take(length)
            .map(char::from)
            .collect();
        let has_letter = candidate.chars().any(|c| c.is_ascii_alphabetic());
        let has_digit = candidate.chars().any(|c| c.is_ascii_digit());
        if has_letter && has_digit {
            return candidate;
        }
    }
}
