//! CRM delivery seam.
//!
//! [`CrmGateway`] is the capability the outbox worker drives; the amoCRM
//! HTTP client in the server crate is the production implementation.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::domain::lead::{
    Contact, ContactMethod, FlowKind, LeadDetails, LeadPayload, ResponsibleId, VehicleCondition,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContactId(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LeadId(pub u64);

impl std::fmt::Display for ContactId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Display for LeadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CrmError {
    #[error("crm transport failure: {0}")]
    Transport(String),
    #[error("crm returned http {status}: {body}")]
    Http { status: u16, body: String },
    #[error("crm rejected field `{field}`: {detail}")]
    RejectedField { field: String, detail: String },
    #[error("crm response could not be decoded: {0}")]
    Decode(String),
    #[error("crm authorization failed: {0}")]
    Auth(String),
}

impl CrmError {
    /// Text fragment that identifies a [`CrmError::RejectedField`] for `field`.
    pub fn rejected_field_marker(field: &str) -> String {
        format!("rejected field `{field}`")
    }
}

#[async_trait]
pub trait CrmGateway: Send + Sync {
    /// Looks the contact up by phone and patches it, or creates a new one.
    async fn create_or_update_contact(&self, contact: &Contact) -> Result<ContactId, CrmError>;

    async fn create_lead(
        &self,
        payload: &LeadPayload,
        responsible_id: Option<ResponsibleId>,
    ) -> Result<LeadId, CrmError>;

    async fn link_contact_to_lead(&self, contact_id: ContactId, lead_id: LeadId) -> Result<(), CrmError>;

    async fn add_note(&self, lead_id: LeadId, text: &str) -> Result<(), CrmError>;

    async fn add_task(&self, lead_id: LeadId, text: &str, due_at: DateTime<Utc>) -> Result<(), CrmError>;
}

/// Renders the human-readable note attached to every delivered lead.
pub trait NoteComposer: Send + Sync {
    fn compose(&self, payload: &LeadPayload) -> String;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct PlainNoteComposer;

impl NoteComposer for PlainNoteComposer {
    fn compose(&self, payload: &LeadPayload) -> String {
        let mut lines = Vec::new();

        match &payload.details {
            LeadDetails::Calculator(lead) => {
                lines.push(format!("Калькулятор: {}", or_dash(&lead.brand_model)));
                lines.push(format!("Состояние: {}", condition_title(lead.condition.as_ref())));
                if let Some(VehicleCondition::Used { year, mileage_km }) = &lead.condition {
                    lines.push(format!(
                        "Год: {}",
                        year.map(|year| year.to_string()).unwrap_or_else(|| "-".to_string())
                    ));
                    lines.push(format!(
                        "Пробег: до {} км",
                        mileage_km.map(|km| group_thousands(u64::from(km))).unwrap_or_else(|| "-".to_string())
                    ));
                }
                lines.push(format!("Город доставки: {}", or_dash(&lead.city)));
                lines.push(format!(
                    "Страна вывоза: {}",
                    lead.country.map(|country| country.title()).unwrap_or("-")
                ));
                lines.push(format!("Комментарий: {}", if lead.comment.is_empty() { "нет" } else { "есть" }));
                if let Some(country) = lead.country {
                    let estimate = country.estimate();
                    lines.push(String::new());
                    lines.push(format!(
                        "Ориентировочно: доставка {} ₽, срок ~{} дн., услуги {} ₽.",
                        group_thousands(estimate.delivery_rub),
                        estimate.transit_days,
                        group_thousands(estimate.service_rub)
                    ));
                    lines.push("Растаможка зависит от авто.".to_string());
                }
            }
            LeadDetails::Dealership(lead) => {
                lines.push(format!("Автосалон: {}", or_dash(&lead.dealership)));
                lines.push(format!("Марка и модель: {}", or_dash(&lead.brand_model)));
                lines.push(format!("Город: {}", or_dash(&lead.city)));
                lines.push(format!("Комментарий: {}", or_dash(&lead.comment)));
            }
            LeadDetails::Manager(request) => {
                lines.push("Запрос связи с менеджером".to_string());
                lines.push(format!("Комментарий: {}", or_dash(&request.comment)));
            }
        }

        lines.push(String::new());
        lines.push(format!("Канал связи: {}", contact_channel(payload)));
        lines.push(format!(
            "Источник: {}",
            if payload.source.start_param.is_empty() { "—" } else { payload.source.start_param.as_str() }
        ));
        lines.join("\n")
    }
}

/// Lead title shown in the CRM pipeline.
pub fn lead_title(payload: &LeadPayload) -> String {
    match &payload.details {
        LeadDetails::Calculator(lead) => format!(
            "Кальк • {} • {} → {}",
            or_dash(&lead.brand_model),
            lead.country.map(|country| country.title()).unwrap_or("-"),
            or_dash(&lead.city)
        ),
        LeadDetails::Dealership(lead) => {
            format!("Автосалон • {} • {}", or_dash(&lead.dealership), or_dash(&lead.brand_model))
        }
        LeadDetails::Manager(_) => {
            format!("Менеджер • {}", or_dash(&payload.contact.name))
        }
    }
}

pub fn follow_up_text(flow: FlowKind) -> &'static str {
    match flow {
        FlowKind::Calculator => "Перезвонить/написать клиенту по калькулятору",
        FlowKind::Dealership => "Перезвонить/написать клиенту по заявке в автосалон",
        FlowKind::Manager => "Связаться с клиентом по запросу менеджера",
    }
}

/// Everything about a delivery that is not part of the payload itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeliveryPlan {
    pub task_due_in: Duration,
}

impl Default for DeliveryPlan {
    fn default() -> Self {
        Self { task_due_in: Duration::minutes(15) }
    }
}

/// Runs the full delivery sequence for one lead.
///
/// Any failed step fails the whole attempt. Retries replay every step, so
/// the CRM may see a contact upsert more than once for the same lead.
pub async fn deliver_lead(
    gateway: &dyn CrmGateway,
    composer: &dyn NoteComposer,
    plan: DeliveryPlan,
    payload: &LeadPayload,
    responsible_id: Option<ResponsibleId>,
    now: DateTime<Utc>,
) -> Result<LeadId, CrmError> {
    let contact_id = gateway.create_or_update_contact(&payload.contact).await?;
    let lead_id = gateway.create_lead(payload, responsible_id).await?;
    gateway.link_contact_to_lead(contact_id, lead_id).await?;
    gateway.add_note(lead_id, &composer.compose(payload)).await?;
    gateway.add_task(lead_id, follow_up_text(payload.flow()), now + plan.task_due_in).await?;

    debug!(
        event_name = "crm.lead.delivered",
        contact_id = %contact_id,
        lead_id = %lead_id,
        flow = payload.flow().as_str(),
        "lead delivered to crm"
    );
    Ok(lead_id)
}

pub fn or_dash(value: &str) -> &str {
    if value.trim().is_empty() {
        "-"
    } else {
        value
    }
}

pub fn condition_title(condition: Option<&VehicleCondition>) -> &'static str {
    match condition {
        Some(VehicleCondition::New) => "Новый",
        Some(VehicleCondition::Used { .. }) => "С пробегом",
        None => "-",
    }
}

/// How the manager should reach the client, e.g. `Телефон +79991234567`.
pub fn contact_channel(payload: &LeadPayload) -> String {
    match (payload.contact_method, &payload.contact.phone_e164, &payload.contact.handle) {
        (ContactMethod::Phone, Some(phone), _) => format!("Телефон {phone}"),
        (ContactMethod::WhatsApp, Some(phone), _) => format!("WhatsApp {phone}"),
        (_, _, Some(handle)) => format!("@{handle}"),
        (_, Some(phone), None) => phone.clone(),
        (_, None, None) => "-".to_string(),
    }
}

/// `1234567` → `1 234 567`.
pub fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (index, digit) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            grouped.push(' ');
        }
        grouped.push(digit);
    }
    grouped
}
