//! Application store: intake validation, company resolution, and per-offer decisions.

use std::collections::HashSet;

use super::catalog;
use super::domain::{
    Application, ApplicationDocuments, ApplicationId, ApplicationOffer, ApplicationPayload,
    ApplicationStatus, CandidateIdentity, CompanyId, InternshipKind, OfferDecisionStatus, OfferId,
    OfferStatus, UserId,
};
use super::error::{LifecycleError, Validator};
use super::repository::{LifecycleState, Stamp};

/// A candidate selects at most this many offers per application.
pub const MAX_OFFERS: usize = 3;

/// Result of applying the multi-offer acceptance rule to one row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OfferDecisionOutcome {
    /// The row already had the requested status.
    Unchanged,
    Accepted { forced_rejections: Vec<OfferId> },
    Rejected,
    /// The last open row was rejected; the caller must reject the application.
    AllRejected,
}

pub fn validate(payload: &ApplicationPayload) -> Result<(), LifecycleError> {
    let mut validator = Validator::default();
    validate_identity(&mut validator, "identity", &payload.identity);
    validate_documents(&mut validator, "documents", &payload.documents);
    validator.require(
        "period",
        payload.period.is_valid(),
        "start must be before end",
    );

    if payload.binomial {
        match &payload.partner {
            Some(partner) => {
                validate_identity(&mut validator, "partner.identity", &partner.identity);
                match &partner.documents {
                    Some(documents) => {
                        validate_documents(&mut validator, "partner.documents", documents)
                    }
                    None => {
                        validator.require(
                            "partner.documents",
                            false,
                            "required for binomial applications",
                        );
                    }
                }
            }
            None => {
                validator.require("partner", false, "required for binomial applications");
            }
        }
    }

    validator.require(
        "offer_ids",
        payload.offer_ids.len() <= MAX_OFFERS,
        "at most three offers may be selected",
    );
    let distinct: HashSet<&OfferId> = payload.offer_ids.iter().collect();
    validator.require(
        "offer_ids",
        distinct.len() == payload.offer_ids.len(),
        "offers must be distinct",
    );

    let has_reference = payload
        .pfe_reference
        .as_deref()
        .is_some_and(|reference| !reference.trim().is_empty());
    match payload.kind {
        InternshipKind::Pfe => validator.require(
            "offer_ids",
            !payload.offer_ids.is_empty() || has_reference,
            "select 1 to 3 offers or give a PFE reference",
        ),
        InternshipKind::Other => validator.require(
            "offer_ids",
            !payload.offer_ids.is_empty(),
            "select 1 to 3 offers",
        ),
    };

    validator.finish()
}

fn validate_identity(validator: &mut Validator, prefix: &str, identity: &CandidateIdentity) {
    validator
        .present(&format!("{prefix}.first_name"), &identity.first_name)
        .present(&format!("{prefix}.last_name"), &identity.last_name)
        .present(&format!("{prefix}.email"), &identity.email)
        .require(
            &format!("{prefix}.email"),
            identity.email.contains('@'),
            "must be an email address",
        )
        .present(&format!("{prefix}.phone"), &identity.phone)
        .present(&format!("{prefix}.institute"), &identity.institute)
        .present(&format!("{prefix}.speciality"), &identity.speciality)
        .present(&format!("{prefix}.level"), &identity.level);
}

fn validate_documents(validator: &mut Validator, prefix: &str, documents: &ApplicationDocuments) {
    validator
        .present(&format!("{prefix}.cv"), &documents.cv)
        .present(
            &format!("{prefix}.motivation_letter"),
            &documents.motivation_letter,
        )
        .present(
            &format!("{prefix}.application_letter"),
            &documents.application_letter,
        );
}

/// Company of the first selected offer, or of the PFE reference when no offer is selected.
pub fn resolve_company(
    state: &LifecycleState,
    payload: &ApplicationPayload,
) -> Result<CompanyId, LifecycleError> {
    let reference_offer = payload
        .pfe_reference
        .as_deref()
        .and_then(|reference| catalog::get_by_reference(state, reference));

    if payload.offer_ids.is_empty() {
        return reference_offer
            .map(|offer| offer.company.clone())
            .ok_or_else(|| {
                LifecycleError::invalid("pfe_reference", "does not match any known offer")
            });
    }

    let mut company: Option<&CompanyId> = None;
    for (index, offer_id) in payload.offer_ids.iter().enumerate() {
        let offer = catalog::get(state, offer_id).map_err(|_| {
            LifecycleError::invalid(format!("offer_ids[{index}]"), "unknown offer")
        })?;
        if offer.status != OfferStatus::Open {
            return Err(LifecycleError::invalid(
                format!("offer_ids[{index}]"),
                "offer is closed",
            ));
        }
        match company {
            None => company = Some(&offer.company),
            Some(first) if first != &offer.company => {
                return Err(LifecycleError::invalid(
                    "offer_ids",
                    "all selected offers must belong to the same company",
                ));
            }
            Some(_) => {}
        }
    }

    let company = company
        .cloned()
        .ok_or_else(|| LifecycleError::invalid("offer_ids", "select 1 to 3 offers"))?;

    if payload.kind == InternshipKind::Pfe {
        if let Some(reference) = reference_offer {
            if reference.company != company {
                return Err(LifecycleError::invalid(
                    "pfe_reference",
                    "refers to a different company than the selected offers",
                ));
            }
        }
    }

    Ok(company)
}

/// Insert a pending application and its offer rows.
pub fn create(
    state: &mut LifecycleState,
    payload: &ApplicationPayload,
    submitted_by: Option<&UserId>,
    stamp: &Stamp,
) -> Result<ApplicationId, LifecycleError> {
    validate(payload)?;
    let company = resolve_company(state, payload)?;

    let id = ApplicationId(state.next_id("app"));
    let mut identity = payload.identity.clone();
    identity.email = identity.email.trim().to_ascii_lowercase();

    state.applications.insert(
        id.clone(),
        Application {
            id: id.clone(),
            identity,
            kind: payload.kind,
            period: payload.period,
            binomial: payload.binomial,
            partner: if payload.binomial {
                payload.partner.clone()
            } else {
                None
            },
            documents: payload.documents.clone(),
            pfe_reference: payload
                .pfe_reference
                .as_ref()
                .map(|reference| reference.trim().to_string())
                .filter(|reference| !reference.is_empty()),
            company: company.clone(),
            submitted_at: stamp.now,
            submitted_by: submitted_by.cloned(),
            status: ApplicationStatus::Pending,
            rejection_reason: None,
            user_created: None,
        },
    );

    for offer in &payload.offer_ids {
        state.application_offers.push(ApplicationOffer {
            application: id.clone(),
            offer: offer.clone(),
            status: OfferDecisionStatus::Pending,
            company: company.clone(),
        });
    }

    Ok(id)
}

/// Multi-offer acceptance rule.
///
/// Accepting a row forces every other row of the application to `rejected`; only one row
/// can ever be accepted. Rejecting the last non-rejected row yields `AllRejected`.
pub fn set_per_offer_status(
    state: &mut LifecycleState,
    application: &ApplicationId,
    offer: &OfferId,
    new_status: OfferDecisionStatus,
) -> Result<OfferDecisionOutcome, LifecycleError> {
    let current = state
        .offers_of(application)
        .find(|row| &row.offer == offer)
        .map(|row| row.status)
        .ok_or_else(|| {
            LifecycleError::not_found("application offer", format!("{application}/{offer}"))
        })?;

    if current == new_status {
        return Ok(OfferDecisionOutcome::Unchanged);
    }

    match new_status {
        OfferDecisionStatus::Pending => Err(LifecycleError::invalid(
            "decision",
            "an offer cannot be reset to pending",
        )),
        OfferDecisionStatus::Accepted => {
            if let Some(accepted) = state
                .offers_of(application)
                .find(|row| row.status == OfferDecisionStatus::Accepted)
            {
                return Err(LifecycleError::precondition(
                    "another offer of this application is already accepted",
                    format!("offer {} accepted", accepted.offer),
                ));
            }
            if current == OfferDecisionStatus::Rejected {
                return Err(LifecycleError::precondition(
                    "a rejected offer cannot be accepted",
                    "rejected",
                ));
            }

            let mut forced_rejections = Vec::new();
            for row in state
                .application_offers
                .iter_mut()
                .filter(|row| &row.application == application)
            {
                if &row.offer == offer {
                    row.status = OfferDecisionStatus::Accepted;
                } else if row.status != OfferDecisionStatus::Rejected {
                    row.status = OfferDecisionStatus::Rejected;
                    forced_rejections.push(row.offer.clone());
                }
            }
            Ok(OfferDecisionOutcome::Accepted { forced_rejections })
        }
        OfferDecisionStatus::Rejected => {
            if current == OfferDecisionStatus::Accepted {
                return Err(LifecycleError::precondition(
                    "an accepted offer cannot be rejected; reject the application instead",
                    "accepted",
                ));
            }
            if let Some(row) = state
                .application_offers
                .iter_mut()
                .find(|row| &row.application == application && &row.offer == offer)
            {
                row.status = OfferDecisionStatus::Rejected;
            }

            let all_rejected = state
                .offers_of(application)
                .all(|row| row.status == OfferDecisionStatus::Rejected);
            if all_rejected {
                Ok(OfferDecisionOutcome::AllRejected)
            } else {
                Ok(OfferDecisionOutcome::Rejected)
            }
        }
    }
}

/// Force every row of the application to `rejected`.
pub fn reject_all_offers(state: &mut LifecycleState, application: &ApplicationId) {
    for row in state
        .application_offers
        .iter_mut()
        .filter(|row| &row.application == application)
    {
        row.status = OfferDecisionStatus::Rejected;
    }
}
