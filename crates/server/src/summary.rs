use std::collections::HashMap;

use leadbot_core::crm::{
    condition_title, contact_channel, group_thousands, or_dash, NoteComposer, PlainNoteComposer,
};
use leadbot_core::domain::lead::{LeadDetails, LeadPayload, VehicleCondition};
use serde_json::json;
use tera::{Context, Tera};
use tracing::warn;

const NOTE_TEMPLATE: &str = "lead_note.txt";

/// Renders lead notes from the embedded tera template.
#[derive(Clone, Debug)]
pub struct TeraNoteComposer {
    tera: Tera,
}

impl TeraNoteComposer {
    pub fn new() -> Result<Self, tera::Error> {
        let mut tera = Tera::default();
        tera.register_filter("thousands", thousands_filter);
        tera.add_raw_template(NOTE_TEMPLATE, include_str!("../../../templates/crm/lead_note.txt.tera"))?;
        Ok(Self { tera })
    }

    pub fn render(&self, payload: &LeadPayload) -> Result<String, tera::Error> {
        let rendered = self.tera.render(NOTE_TEMPLATE, &note_context(payload))?;
        Ok(rendered.trim().to_string())
    }
}

impl NoteComposer for TeraNoteComposer {
    fn compose(&self, payload: &LeadPayload) -> String {
        self.render(payload).unwrap_or_else(|error| {
            warn!(
                event_name = "crm.note.render_failed",
                error = %error,
                "note template failed; using plain note"
            );
            PlainNoteComposer.compose(payload)
        })
    }
}

fn thousands_filter(
    value: &tera::Value,
    _args: &HashMap<String, tera::Value>,
) -> tera::Result<tera::Value> {
    let number = value
        .as_u64()
        .ok_or_else(|| tera::Error::msg("thousands filter expects a non-negative integer"))?;
    Ok(tera::Value::String(group_thousands(number)))
}

fn note_context(payload: &LeadPayload) -> Context {
    let details = &payload.details;
    let mut context = Context::new();
    context.insert("flow", payload.flow().as_str());
    context.insert("brand_model", or_dash(details.brand_model()));
    context.insert("city", or_dash(details.city()));
    context.insert("comment", or_dash(details.comment()));
    context.insert("has_comment", &!details.comment().trim().is_empty());
    context.insert("channel", &contact_channel(payload));
    context.insert(
        "source",
        if payload.source.start_param.is_empty() { "—" } else { payload.source.start_param.as_str() },
    );

    let mut used = false;
    let mut year = "-".to_string();
    let mut mileage = "-".to_string();
    let mut condition = "-";
    let mut country = "-";
    let mut estimate = tera::Value::Null;
    let mut dealership = "-";

    match details {
        LeadDetails::Calculator(lead) => {
            condition = condition_title(lead.condition.as_ref());
            if let Some(VehicleCondition::Used { year: used_year, mileage_km }) = &lead.condition {
                used = true;
                if let Some(used_year) = used_year {
                    year = used_year.to_string();
                }
                if let Some(km) = mileage_km {
                    mileage = group_thousands(u64::from(*km));
                }
            }
            if let Some(code) = lead.country {
                country = code.title();
                let costs = code.estimate();
                estimate = json!({
                    "delivery_rub": costs.delivery_rub,
                    "transit_days": costs.transit_days,
                    "service_rub": costs.service_rub,
                });
            }
        }
        LeadDetails::Dealership(lead) => dealership = or_dash(&lead.dealership),
        LeadDetails::Manager(_) => {}
    }

    context.insert("used", &used);
    context.insert("year", &year);
    context.insert("mileage", &mileage);
    context.insert("condition", condition);
    context.insert("country", country);
    context.insert("estimate", &estimate);
    context.insert("dealership", dealership);
    context
}
