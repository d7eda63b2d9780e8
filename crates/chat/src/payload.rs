use chrono::{DateTime, Utc};
use leadbot_core::domain::lead::{
    CalculatorLead, Consent, Contact, ContactMethod, DealershipLead, FlowKind, LeadDetails,
    LeadPayload, LeadSource, ManagerRequest, VehicleCondition,
};
use leadbot_core::errors::{ApplicationError, DomainError};
use leadbot_core::outbox::OutboxError;
use thiserror::Error;

use crate::parse::normalize_comment;
use crate::session::{ConditionAnswer, IntakeSession};

/// Version of the personal-data consent text shown to users.
pub const CONSENT_VERSION: &str = "2025-09-01";

/// Attribution used when the user arrived without a start parameter.
const ORGANIC_SOURCE: &str = "organic";

/// What the chat platform knows about the user independent of their answers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UserProfile {
    pub handle: Option<String>,
    pub first_name: String,
    pub last_name: String,
}

impl UserProfile {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name.trim(), self.last_name.trim()).trim().to_string()
    }
}

#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("no intake session for this user")]
    NoSession,
    #[error("intake flow has not been started")]
    FlowNotStarted,
    #[error("contact method has not been chosen")]
    MissingContactMethod,
    #[error("telegram contact requires a username")]
    MissingHandle,
    #[error("{0} contact requires a phone number")]
    MissingPhone(&'static str),
    #[error("required answer `{0}` is missing")]
    MissingAnswer(&'static str),
    #[error(transparent)]
    Outbox(#[from] OutboxError),
}

impl From<IntakeError> for ApplicationError {
    fn from(value: IntakeError) -> Self {
        match value {
            IntakeError::Outbox(error) => error.into(),
            IntakeError::FlowNotStarted => DomainError::FlowNotStarted.into(),
            other => DomainError::InvalidPayload(other.to_string()).into(),
        }
    }
}

/// Snapshots the finished intake into an immutable payload.
pub fn build_payload(
    session: &IntakeSession,
    profile: &UserProfile,
    now: DateTime<Utc>,
) -> Result<LeadPayload, IntakeError> {
    let flow = session.flow.ok_or(IntakeError::FlowNotStarted)?;
    let answers = &session.answers;
    let contact_method = answers.contact_method.ok_or(IntakeError::MissingContactMethod)?;

    let details = match flow {
        FlowKind::Calculator => LeadDetails::Calculator(CalculatorLead {
            brand_model: answers.brand_model.clone().unwrap_or_default(),
            condition: answers.condition.map(|condition| match condition {
                ConditionAnswer::New => VehicleCondition::New,
                ConditionAnswer::Used => {
                    VehicleCondition::Used { year: answers.year, mileage_km: answers.mileage_km }
                }
            }),
            city: answers.city.clone().unwrap_or_default(),
            country: answers.country,
            comment: answers.comment.as_deref().map(normalize_comment).unwrap_or_default(),
        }),
        FlowKind::Dealership => LeadDetails::Dealership(DealershipLead {
            dealership: answers.dealership.clone().ok_or(IntakeError::MissingAnswer("dealership"))?,
            brand_model: answers.brand_model.clone().unwrap_or_default(),
            city: answers.city.clone().unwrap_or_default(),
            comment: answers.comment.as_deref().map(normalize_comment).unwrap_or_default(),
        }),
        FlowKind::Manager => LeadDetails::Manager(ManagerRequest {
            comment: answers.comment.as_deref().map(normalize_comment).unwrap_or_default(),
        }),
    };

    let start_param = if session.start_param.is_empty() {
        ORGANIC_SOURCE.to_string()
    } else {
        session.start_param.clone()
    };

    let payload = LeadPayload {
        session_id: session.session_id.clone(),
        lead_id: Some(session.lead_uid.clone()),
        created_at: now,
        source: LeadSource { start_param, utm: session.utm.clone() },
        contact: Contact {
            phone_e164: answers.phone_e164.clone(),
            handle: answers.handle.clone().or_else(|| profile.handle.clone()),
            name: answers.contact_name.clone().unwrap_or_else(|| profile.display_name()),
        },
        contact_method,
        consent: Some(Consent {
            accepted: true,
            version: CONSENT_VERSION.to_string(),
            accepted_at: session.consent_accepted_at.unwrap_or(now),
        }),
        details,
    };
    check_contact(&payload)?;
    Ok(payload)
}

/// Applies the comment length cap to a payload built outside [`build_payload`].
pub fn limit_comment(mut payload: LeadPayload) -> LeadPayload {
    let comment = match &mut payload.details {
        LeadDetails::Calculator(lead) => &mut lead.comment,
        LeadDetails::Dealership(lead) => &mut lead.comment,
        LeadDetails::Manager(request) => &mut request.comment,
    };
    *comment = normalize_comment(comment);
    payload
}

/// Checks that the chosen contact method can actually be used.
pub fn check_contact(payload: &LeadPayload) -> Result<(), IntakeError> {
    let contact = &payload.contact;
    match payload.contact_method {
        ContactMethod::Telegram if contact.handle.is_none() => Err(IntakeError::MissingHandle),
        method if method.requires_phone() && contact.phone_e164.is_none() => {
            Err(IntakeError::MissingPhone(method.as_str()))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use leadbot_core::domain::lead::CountryCode;

    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, 2, 8, 0, 0).unwrap()
    }

    fn calculator_session() -> IntakeSession {
        let mut session = IntakeSession::new(Some("utm_source:vk~utm_campaign:autumn"));
        session.start_flow(FlowKind::Calculator);
        session.answers.brand_model = Some("Kia K5".to_string());
        session.answers.condition = Some(ConditionAnswer::Used);
        session.answers.year = Some(2021);
        session.answers.mileage_km = Some(40_000);
        session.answers.city = Some("Казань".to_string());
        session.answers.country = Some(CountryCode::Korea);
        session.answers.contact_method = Some(ContactMethod::Phone);
        session.answers.phone_e164 = Some("+79990001122".to_string());
        session
    }

    #[test]
    fn calculator_intake_becomes_tagged_payload() {
        let session = calculator_session();
        let profile = UserProfile { first_name: "Oleg".to_string(), ..UserProfile::default() };

        let payload = build_payload(&session, &profile, now()).expect("payload");

        assert_eq!(payload.session_id, session.session_id);
        assert_eq!(payload.lead_id.as_deref(), Some(session.lead_uid.as_str()));
        assert_eq!(payload.source.utm.campaign, "autumn");
        assert_eq!(payload.contact.name, "Oleg");
        assert_eq!(payload.consent.as_ref().map(|consent| consent.version.as_str()), Some(CONSENT_VERSION));
        let LeadDetails::Calculator(lead) = payload.details else {
            panic!("calculator flow should build calculator details");
        };
        assert_eq!(lead.condition, Some(VehicleCondition::Used { year: Some(2021), mileage_km: Some(40_000) }));
    }

    #[test]
    fn telegram_contact_falls_back_to_profile_handle() {
        let mut session = calculator_session();
        session.answers.contact_method = Some(ContactMethod::Telegram);
        session.answers.phone_e164 = None;

        let missing = build_payload(&session, &UserProfile::default(), now());
        assert!(matches!(missing, Err(IntakeError::MissingHandle)));

        let profile = UserProfile { handle: Some("oleg_k".to_string()), ..UserProfile::default() };
        let payload = build_payload(&session, &profile, now()).expect("payload");
        assert_eq!(payload.contact.handle.as_deref(), Some("oleg_k"));
    }

    #[test]
    fn whatsapp_contact_requires_phone() {
        let mut session = calculator_session();
        session.answers.contact_method = Some(ContactMethod::WhatsApp);
        session.answers.phone_e164 = None;

        let result = build_payload(&session, &UserProfile::default(), now());

        assert!(matches!(result, Err(IntakeError::MissingPhone("whatsapp"))));
    }

    #[test]
    fn unstarted_flow_is_rejected() {
        let session = IntakeSession::new(None);

        let result = build_payload(&session, &UserProfile::default(), now());

        assert!(matches!(result, Err(IntakeError::FlowNotStarted)));
    }

    #[test]
    fn missing_start_param_is_attributed_as_organic() {
        let mut session = IntakeSession::new(None);
        session.start_flow(FlowKind::Manager);
        session.answers.contact_method = Some(ContactMethod::Phone);
        session.answers.phone_e164 = Some("+79990001122".to_string());

        let payload = build_payload(&session, &UserProfile::default(), now()).expect("payload");

        assert_eq!(payload.source.start_param, "organic");
        assert_eq!(payload.flow(), FlowKind::Manager);
    }

    #[test]
    fn long_comments_are_capped() {
        let mut session = calculator_session();
        session.answers.comment = Some("а".repeat(1_000));

        let payload = build_payload(&session, &UserProfile::default(), now()).expect("payload");
        let LeadDetails::Calculator(lead) = &payload.details else {
            panic!("calculator flow should build calculator details");
        };
        assert_eq!(lead.comment.chars().count(), crate::parse::MAX_COMMENT_CHARS);

        let mut manager = payload.clone();
        manager.details = LeadDetails::Manager(ManagerRequest { comment: "б".repeat(900) });
        let LeadDetails::Manager(request) = limit_comment(manager).details else {
            panic!("details variant should be kept");
        };
        assert_eq!(request.comment.chars().count(), crate::parse::MAX_COMMENT_CHARS);
    }
}
