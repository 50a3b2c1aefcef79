use serde::Serialize;

use super::domain::{InternshipId, InternshipStatus, Role, User, UserId};
use super::error::{LifecycleError, QuotaBreach};
use super::repository::LifecycleState;

/// Candidate submission quota and tutor capacity. Loads are always recounted from the
/// internships themselves; `User::assigned_intern_count` is only a cache for display.
#[derive(Debug, Clone, Copy)]
pub struct QuotaKeeper {
    candidate_quota: u32,
    tutor_capacity: u32,
}

/// Cached tutor count that disagreed with the recount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TutorDrift {
    pub tutor: UserId,
    pub cached: u32,
    pub actual: u32,
}

impl QuotaKeeper {
    pub fn new(candidate_quota: u32, tutor_capacity: u32) -> Self {
        Self {
            candidate_quota,
            tutor_capacity,
        }
    }

    pub fn candidate_quota(&self) -> u32 {
        self.candidate_quota
    }

    pub fn tutor_capacity(&self) -> u32 {
        self.tutor_capacity
    }

    pub fn check_candidate(&self, candidate: &User) -> Result<(), LifecycleError> {
        let remaining = candidate.quota_remaining.unwrap_or(0);
        if remaining == 0 {
            return Err(LifecycleError::QuotaExceeded(QuotaBreach::Candidate {
                candidate: candidate.id.clone(),
                remaining,
            }));
        }
        Ok(())
    }

    pub fn consume(&self, candidate: &mut User) {
        let remaining = candidate.quota_remaining.unwrap_or(0);
        candidate.quota_remaining = Some(remaining.saturating_sub(1));
    }

    /// Active internships supervised by `tutor`, optionally ignoring one of them.
    pub fn active_load(
        &self,
        state: &LifecycleState,
        tutor: &UserId,
        excluding: Option<&InternshipId>,
    ) -> u32 {
        state
            .internships
            .values()
            .filter(|internship| internship.status == InternshipStatus::Active)
            .filter(|internship| internship.tutor.as_ref() == Some(tutor))
            .filter(|internship| Some(&internship.id) != excluding)
            .count() as u32
    }

    /// Refuses when taking one more internship would exceed capacity. Returns the current load.
    pub fn check_tutor(
        &self,
        state: &LifecycleState,
        tutor: &UserId,
        excluding: Option<&InternshipId>,
    ) -> Result<u32, LifecycleError> {
        let active = self.active_load(state, tutor, excluding);
        if active >= self.tutor_capacity {
            return Err(LifecycleError::QuotaExceeded(QuotaBreach::TutorCapacity {
                tutor: tutor.clone(),
                active,
                capacity: self.tutor_capacity,
            }));
        }
        Ok(active)
    }

    /// Rewrite the cached count of one tutor from the internships.
    pub fn refresh_tutor(&self, state: &mut LifecycleState, tutor: &UserId) {
        let actual = self.active_load(state, tutor, None);
        if let Some(user) = state.users.get_mut(tutor) {
            user.assigned_intern_count = actual;
        }
    }

    /// Recompute every tutor's cached count, returning the ones that had drifted.
    pub fn repair(&self, state: &mut LifecycleState) -> Vec<TutorDrift> {
        let tutors: Vec<UserId> = state
            .users
            .values()
            .filter(|user| user.role == Role::Tutor)
            .map(|user| user.id.clone())
            .collect();

        let mut drifts = Vec::new();
        for tutor in tutors {
            let actual = self.active_load(state, &tutor, None);
            if let Some(user) = state.users.get_mut(&tutor) {
                if user.assigned_intern_count != actual {
                    drifts.push(TutorDrift {
                        tutor: tutor.clone(),
                        cached: user.assigned_intern_count,
                        actual,
                    });
                    user.assigned_intern_count = actual;
                }
            }
        }
        drifts
    }
}
