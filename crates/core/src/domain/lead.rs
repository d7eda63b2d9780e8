use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of the CRM user a lead is assigned to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResponsibleId(pub u64);

impl std::fmt::Display for ResponsibleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Immutable snapshot of one user's completed intake.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lead_id: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub source: LeadSource,
    pub contact: Contact,
    pub contact_method: ContactMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consent: Option<Consent>,
    pub details: LeadDetails,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadSource {
    #[serde(default)]
    pub start_param: String,
    #[serde(default)]
    pub utm: Utm,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utm {
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub medium: String,
    #[serde(default)]
    pub campaign: String,
    #[serde(default)]
    pub content: String,
}

impl Utm {
    pub fn is_empty(&self) -> bool {
        self.source.is_empty()
            && self.medium.is_empty()
            && self.campaign.is_empty()
            && self.content.is_empty()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    /// Phone number in E.164 form, e.g. `+79991234567`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_e164: Option<String>,
    /// Chat handle without the leading `@`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,
    #[serde(default)]
    pub name: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactMethod {
    Phone,
    Telegram,
    WhatsApp,
}

impl ContactMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Phone => "phone",
            Self::Telegram => "telegram",
            Self::WhatsApp => "whatsapp",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "phone" => Some(Self::Phone),
            "telegram" | "tg" => Some(Self::Telegram),
            "whatsapp" | "wa" => Some(Self::WhatsApp),
            _ => None,
        }
    }

    /// Phone and WhatsApp leads are reached by number; Telegram leads by handle.
    pub fn requires_phone(&self) -> bool {
        matches!(self, Self::Phone | Self::WhatsApp)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Consent {
    pub accepted: bool,
    pub version: String,
    pub accepted_at: DateTime<Utc>,
}

/// Flow-specific part of a lead, discriminated by `type`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LeadDetails {
    Calculator(CalculatorLead),
    Dealership(DealershipLead),
    Manager(ManagerRequest),
}

impl LeadDetails {
    pub fn flow(&self) -> FlowKind {
        match self {
            Self::Calculator(_) => FlowKind::Calculator,
            Self::Dealership(_) => FlowKind::Dealership,
            Self::Manager(_) => FlowKind::Manager,
        }
    }

    pub fn comment(&self) -> &str {
        match self {
            Self::Calculator(lead) => &lead.comment,
            Self::Dealership(lead) => &lead.comment,
            Self::Manager(request) => &request.comment,
        }
    }

    pub fn city(&self) -> &str {
        match self {
            Self::Calculator(lead) => &lead.city,
            Self::Dealership(lead) => &lead.city,
            Self::Manager(_) => "",
        }
    }

    pub fn brand_model(&self) -> &str {
        match self {
            Self::Calculator(lead) => &lead.brand_model,
            Self::Dealership(lead) => &lead.brand_model,
            Self::Manager(_) => "",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowKind {
    Calculator,
    Dealership,
    Manager,
}

impl FlowKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Calculator => "calculator",
            Self::Dealership => "dealership",
            Self::Manager => "manager",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalculatorLead {
    #[serde(default)]
    pub brand_model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<VehicleCondition>,
    #[serde(default)]
    pub city: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<CountryCode>,
    #[serde(default)]
    pub comment: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VehicleCondition {
    New,
    Used {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        year: Option<u16>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mileage_km: Option<u32>,
    },
}

impl VehicleCondition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Used { .. } => "used",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DealershipLead {
    pub dealership: String,
    #[serde(default)]
    pub brand_model: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub comment: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerRequest {
    #[serde(default)]
    pub comment: String,
}

/// Export countries offered by the import calculator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CountryCode {
    #[serde(rename = "EU")]
    Europe,
    #[serde(rename = "KR")]
    Korea,
    #[serde(rename = "CN")]
    China,
    #[serde(rename = "US")]
    UnitedStates,
    #[serde(rename = "AE")]
    Emirates,
}

/// Indicative import costs, in roubles.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImportEstimate {
    pub delivery_rub: u64,
    pub transit_days: u32,
    pub service_rub: u64,
}

impl CountryCode {
    pub const ALL: [Self; 5] =
        [Self::Europe, Self::Korea, Self::China, Self::UnitedStates, Self::Emirates];

    pub fn code(&self) -> &'static str {
        match self {
            Self::Europe => "EU",
            Self::Korea => "KR",
            Self::China => "CN",
            Self::UnitedStates => "US",
            Self::Emirates => "AE",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        Self::ALL.into_iter().find(|country| country.code().eq_ignore_ascii_case(value))
    }

    pub fn title(&self) -> &'static str {
        match self {
            Self::Europe => "Европа",
            Self::Korea => "Корея",
            Self::China => "Китай",
            Self::UnitedStates => "США",
            Self::Emirates => "ОАЭ",
        }
    }

    pub fn estimate(&self) -> ImportEstimate {
        let (delivery_rub, transit_days) = match self {
            Self::China => (150_000, 20),
            Self::Europe => (450_000, 45),
            Self::Emirates => (290_000, 45),
            Self::UnitedStates => (350_000, 60),
            Self::Korea => (250_000, 30),
        };
        ImportEstimate { delivery_rub, transit_days, service_rub: 150_000 }
    }
}

/// Payload fields that a recovery rule may clear before replaying a delivery.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadField {
    Comment,
    City,
    Country,
    Source,
    Consent,
    BrandModel,
    Year,
    Mileage,
    ContactHandle,
}

impl PayloadField {
    pub const ALL: [Self; 9] = [
        Self::Comment,
        Self::City,
        Self::Country,
        Self::Source,
        Self::Consent,
        Self::BrandModel,
        Self::Year,
        Self::Mileage,
        Self::ContactHandle,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Comment => "comment",
            Self::City => "city",
            Self::Country => "country",
            Self::Source => "source",
            Self::Consent => "consent",
            Self::BrandModel => "brand_model",
            Self::Year => "year",
            Self::Mileage => "mileage",
            Self::ContactHandle => "contact_handle",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        Self::ALL.into_iter().find(|field| field.as_str().eq_ignore_ascii_case(value))
    }
}

impl LeadPayload {
    pub fn flow(&self) -> FlowKind {
        self.details.flow()
    }

    /// Returns a copy with `field` cleared. The original is left untouched.
    pub fn without_field(&self, field: PayloadField) -> Self {
        let mut stripped = self.clone();
        match field {
            PayloadField::Source => stripped.source = LeadSource::default(),
            PayloadField::Consent => stripped.consent = None,
            PayloadField::ContactHandle => stripped.contact.handle = None,
            PayloadField::Comment => match &mut stripped.details {
                LeadDetails::Calculator(lead) => lead.comment.clear(),
                LeadDetails::Dealership(lead) => lead.comment.clear(),
                LeadDetails::Manager(request) => request.comment.clear(),
            },
            PayloadField::City => match &mut stripped.details {
                LeadDetails::Calculator(lead) => lead.city.clear(),
                LeadDetails::Dealership(lead) => lead.city.clear(),
                LeadDetails::Manager(_) => {}
            },
            PayloadField::BrandModel => match &mut stripped.details {
                LeadDetails::Calculator(lead) => lead.brand_model.clear(),
                LeadDetails::Dealership(lead) => lead.brand_model.clear(),
                LeadDetails::Manager(_) => {}
            },
            PayloadField::Country => {
                if let LeadDetails::Calculator(lead) = &mut stripped.details {
                    lead.country = None;
                }
            }
            PayloadField::Year => {
                if let LeadDetails::Calculator(CalculatorLead {
                    condition: Some(VehicleCondition::Used { year, .. }),
                    ..
                }) = &mut stripped.details
                {
                    *year = None;
                }
            }
            PayloadField::Mileage => {
                if let LeadDetails::Calculator(CalculatorLead {
                    condition: Some(VehicleCondition::Used { mileage_km, .. }),
                    ..
                }) = &mut stripped.details
                {
                    *mileage_km = None;
                }
            }
        }
        stripped
    }
}
