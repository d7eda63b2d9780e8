//! Deterministic dedup keys for lead payloads.

use sha1::{Digest, Sha1};

use crate::domain::lead::{LeadDetails, LeadPayload, VehicleCondition};
use crate::domain::outbox::DedupKey;

/// Derives the dedup key for `payload`.
///
/// Priority: session id, then lead id, then a hash of the normalized
/// business fields. Pure: the same payload always yields the same key.
pub fn derive_dedup_key(payload: &LeadPayload) -> DedupKey {
    if let Some(session_id) = non_blank(payload.session_id.as_deref()) {
        return DedupKey(format!("session:{session_id}"));
    }
    if let Some(lead_id) = non_blank(payload.lead_id.as_deref()) {
        return DedupKey(format!("lead:{lead_id}"));
    }
    DedupKey(format!("hash:{}", content_hash(payload)))
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

fn content_hash(payload: &LeadPayload) -> String {
    let mut fields = vec![payload.flow().as_str().to_string()];

    match &payload.details {
        LeadDetails::Calculator(lead) => {
            let (condition, year, mileage) = match &lead.condition {
                Some(VehicleCondition::New) => ("new", None, None),
                Some(VehicleCondition::Used { year, mileage_km }) => ("used", *year, *mileage_km),
                None => ("", None, None),
            };
            fields.push(normalize(&lead.brand_model));
            fields.push(condition.to_string());
            fields.push(year.map(|year| year.to_string()).unwrap_or_default());
            fields.push(mileage.map(|mileage| mileage.to_string()).unwrap_or_default());
            fields.push(normalize(&lead.city));
            fields.push(lead.country.map(|country| country.code().to_string()).unwrap_or_default());
        }
        LeadDetails::Dealership(lead) => {
            fields.push(normalize(&lead.dealership));
            fields.push(normalize(&lead.brand_model));
            fields.push(normalize(&lead.city));
        }
        LeadDetails::Manager(request) => {
            fields.push(normalize(&request.comment));
        }
    }

    fields.push(normalize(payload.contact.phone_e164.as_deref().unwrap_or_default()));
    fields.push(normalize(payload.contact.handle.as_deref().unwrap_or_default()));

    let mut hasher = Sha1::new();
    hasher.update(fields.join("\u{1f}").as_bytes());
    format!("{:x}", hasher.finalize())
}

fn normalize(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}
