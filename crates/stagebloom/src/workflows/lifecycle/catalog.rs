use super::domain::{Offer, OfferId};
use super::error::LifecycleError;
use super::repository::LifecycleState;

pub fn get<'s>(state: &'s LifecycleState, id: &OfferId) -> Result<&'s Offer, LifecycleError> {
    state
        .offers
        .get(id)
        .ok_or_else(|| LifecycleError::not_found("offer", id))
}

/// References are matched case-insensitively, ignoring surrounding whitespace.
pub fn get_by_reference<'s>(state: &'s LifecycleState, reference: &str) -> Option<&'s Offer> {
    let wanted = reference.trim();
    if wanted.is_empty() {
        return None;
    }
    state
        .offers
        .values()
        .find(|offer| offer.reference.eq_ignore_ascii_case(wanted))
}
