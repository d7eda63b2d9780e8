use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::lead::{LeadPayload, ResponsibleId};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Idempotency key shared by every delivery attempt of one logical lead.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DedupKey(pub String);

impl DedupKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DedupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    CrmLead,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CrmLead => "crm_lead",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxJob {
    pub id: JobId,
    pub kind: JobKind,
    pub payload: LeadPayload,
    pub dedup_key: DedupKey,
    pub responsible_id: Option<ResponsibleId>,
    pub attempts: u32,
    pub next_eligible_at: DateTime<Utc>,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl OutboxJob {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_eligible_at <= now
    }
}

/// A job abandoned after the configured attempt ceiling.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub job: OutboxJob,
    pub abandoned_at: DateTime<Utc>,
    pub reason: String,
}
