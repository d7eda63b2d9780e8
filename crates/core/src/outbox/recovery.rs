use serde::{Deserialize, Serialize};

use crate::crm::CrmError;
use crate::domain::lead::{LeadPayload, PayloadField};

/// Clears `strip` from the payload when the CRM error text contains `pattern`.
///
/// Rules are tried once per delivery attempt, before the job falls back to
/// the regular backoff path.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryRule {
    pub pattern: String,
    pub strip: PayloadField,
}

impl RecoveryRule {
    pub fn new(pattern: impl Into<String>, strip: PayloadField) -> Self {
        Self { pattern: pattern.into(), strip }
    }

    /// Matches the text produced by [`CrmError::RejectedField`].
    pub fn rejected_field(field: PayloadField) -> Self {
        Self::new(CrmError::rejected_field_marker(field.as_str()), field)
    }

    pub fn applies(&self, error: &CrmError) -> bool {
        !self.pattern.is_empty() && error.to_string().contains(&self.pattern)
    }

    /// Returns the repaired payload, or `None` when stripping changes nothing.
    pub fn repair(&self, payload: &LeadPayload) -> Option<LeadPayload> {
        let repaired = payload.without_field(self.strip);
        (repaired != *payload).then_some(repaired)
    }
}

pub fn default_rules() -> Vec<RecoveryRule> {
    PayloadField::ALL.into_iter().map(RecoveryRule::rejected_field).collect()
}

/// First rule that matches `error` and actually changes the payload.
pub fn find_repair<'a>(
    rules: &'a [RecoveryRule],
    error: &CrmError,
    payload: &LeadPayload,
) -> Option<(&'a RecoveryRule, LeadPayload)> {
    rules
        .iter()
        .filter(|rule| rule.applies(error))
        .find_map(|rule| rule.repair(payload).map(|repaired| (rule, repaired)))
}
