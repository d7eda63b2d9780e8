use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use leadbot_core::domain::lead::{ContactMethod, CountryCode, FlowKind, Utm};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::parse::parse_utm;

/// Chat platform user id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionAnswer {
    New,
    Used,
}

/// Answers collected so far in the current flow.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntakeAnswers {
    pub brand_model: Option<String>,
    pub condition: Option<ConditionAnswer>,
    pub year: Option<u16>,
    pub mileage_km: Option<u32>,
    pub city: Option<String>,
    pub country: Option<CountryCode>,
    pub dealership: Option<String>,
    pub comment: Option<String>,
    pub contact_method: Option<ContactMethod>,
    pub phone_e164: Option<String>,
    pub handle: Option<String>,
    pub contact_name: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntakeSession {
    pub flow: Option<FlowKind>,
    pub step: u8,
    /// Regenerated whenever a flow starts, so each intake gets its own dedup key.
    pub session_id: Option<String>,
    pub lead_uid: String,
    pub start_param: String,
    pub utm: Utm,
    pub answers: IntakeAnswers,
    pub consent_accepted_at: Option<DateTime<Utc>>,
}

impl IntakeSession {
    pub fn new(start_param: Option<&str>) -> Self {
        let start_param = start_param.map(str::trim).unwrap_or_default().to_string();
        Self {
            flow: None,
            step: 0,
            session_id: None,
            lead_uid: Uuid::new_v4().to_string(),
            utm: parse_utm(&start_param),
            start_param,
            answers: IntakeAnswers::default(),
            consent_accepted_at: None,
        }
    }

    pub fn start_flow(&mut self, flow: FlowKind) {
        self.flow = Some(flow);
        self.step = 0;
        self.session_id = Some(Uuid::new_v4().to_string());
        self.answers = IntakeAnswers::default();
    }

    pub fn advance(&mut self) {
        self.step = self.step.saturating_add(1);
    }

    /// Clears the flow after submission. Attribution survives; the lead uid does not.
    pub fn reset(&mut self) {
        self.flow = None;
        self.step = 0;
        self.session_id = None;
        self.lead_uid = Uuid::new_v4().to_string();
        self.answers = IntakeAnswers::default();
    }
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, user_id: UserId) -> Option<IntakeSession>;
    async fn put(&self, user_id: UserId, session: IntakeSession);
}

#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<UserId, IntakeSession>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, user_id: UserId) -> Option<IntakeSession> {
        self.sessions.read().await.get(&user_id).cloned()
    }

    async fn put(&self, user_id: UserId, session: IntakeSession) {
        self.sessions.write().await.insert(user_id, session);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starting_a_flow_issues_a_fresh_session_id() {
        let mut session = IntakeSession::new(Some("utm_source:tg"));
        session.start_flow(FlowKind::Calculator);
        let first = session.session_id.clone();
        session.answers.city = Some("Москва".to_string());

        session.start_flow(FlowKind::Calculator);

        assert!(first.is_some());
        assert_ne!(session.session_id, first);
        assert_eq!(session.answers, IntakeAnswers::default());
        assert_eq!(session.utm.source, "tg");
    }

    #[test]
    fn reset_rotates_lead_uid_and_keeps_attribution() {
        let mut session = IntakeSession::new(Some("promo"));
        session.start_flow(FlowKind::Manager);
        let lead_uid = session.lead_uid.clone();

        session.reset();

        assert_ne!(session.lead_uid, lead_uid);
        assert_eq!(session.flow, None);
        assert_eq!(session.session_id, None);
        assert_eq!(session.start_param, "promo");
    }
}
