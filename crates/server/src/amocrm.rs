//! amoCRM REST v4 client.
//!
//! Authenticates with the OAuth refresh-token grant and caches the access
//! token until shortly before it expires. Validation errors on custom
//! fields are reported as [`CrmError::RejectedField`] with the payload field
//! that produced the value, so outbox recovery rules can strip it.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use leadbot_core::config::{AmoCrmConfig, AmoFieldIds};
use leadbot_core::crm::{lead_title, ContactId, CrmError, CrmGateway, LeadId};
use leadbot_core::domain::lead::{Contact, LeadDetails, LeadPayload, PayloadField, ResponsibleId};
use leadbot_core::Clock;
use reqwest::header::ACCEPT;
use reqwest::{Client, Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, warn};

const TOKEN_PATH: &str = "/oauth2/access_token";
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;
const FOLLOW_UP_TASK_TYPE: u64 = 1;

/// Custom field value paired with the payload field it was taken from.
type CustomField = (Option<PayloadField>, Value);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
    #[serde(default)]
    refresh_token: Option<String>,
}

struct TokenState {
    refresh_token: SecretString,
    access: Option<(SecretString, DateTime<Utc>)>,
}

/// When a token that lives `expires_in` seconds should be refreshed.
fn refresh_deadline(now: DateTime<Utc>, expires_in: i64) -> Result<DateTime<Utc>, CrmError> {
    expires_in
        .checked_sub(TOKEN_REFRESH_MARGIN_SECS)
        .and_then(Duration::try_seconds)
        .and_then(|lifetime| now.checked_add_signed(lifetime))
        .ok_or_else(|| CrmError::Decode(format!("token expires_in out of range: {expires_in}")))
}

pub struct AmoCrmClient {
    http: Client,
    config: AmoCrmConfig,
    clock: Arc<dyn Clock>,
    token: Mutex<TokenState>,
}

impl AmoCrmClient {
    pub fn new(config: AmoCrmConfig, clock: Arc<dyn Clock>) -> Result<Self, CrmError> {
        let http = Client::builder()
            .timeout(StdDuration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|error| CrmError::Transport(error.to_string()))?;
        let token = Mutex::new(TokenState { refresh_token: config.refresh_token.clone(), access: None });
        Ok(Self { http, config, clock, token })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn access_token(&self) -> Result<SecretString, CrmError> {
        let mut state = self.token.lock().await;
        if let Some((token, refresh_at)) = &state.access {
            if self.clock.now() < *refresh_at {
                return Ok(token.clone());
            }
        }

        let body = json!({
            "client_id": self.config.client_id,
            "client_secret": self.config.client_secret.expose_secret(),
            "grant_type": "refresh_token",
            "refresh_token": state.refresh_token.expose_secret(),
            "redirect_uri": self.config.redirect_uri,
        });
        let response = self
            .http
            .post(self.url(TOKEN_PATH))
            .header(ACCEPT, "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|error| CrmError::Transport(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(CrmError::Auth(format!("token refresh returned {status}: {text}")));
        }
        let token: TokenResponse =
            response.json().await.map_err(|error| CrmError::Decode(error.to_string()))?;
        if token.access_token.is_empty() {
            return Err(CrmError::Auth("token endpoint returned empty access token".to_string()));
        }

        let refresh_at = refresh_deadline(self.clock.now(), token.expires_in)?;
        let access = SecretString::from(token.access_token);
        if let Some(rotated) = token.refresh_token.filter(|value| !value.is_empty()) {
            state.refresh_token = rotated.into();
        }
        state.access = Some((access.clone(), refresh_at));

        debug!(
            event_name = "crm.amocrm.token_refreshed",
            refresh_at = %refresh_at,
            "amocrm access token refreshed"
        );
        Ok(access)
    }

    async fn forget_token(&self) {
        self.token.lock().await.access = None;
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<Value>,
    ) -> Result<Option<Value>, CrmError> {
        let token = self.access_token().await?;
        let mut builder = self
            .http
            .request(method.clone(), self.url(path))
            .bearer_auth(token.expose_secret())
            .header(ACCEPT, "application/json");
        if !query.is_empty() {
            builder = builder.query(query);
        }
        if let Some(body) = &body {
            builder = builder.json(body);
        }

        let response =
            builder.send().await.map_err(|error| CrmError::Transport(error.to_string()))?;
        let status = response.status();
        let text = response.text().await.map_err(|error| CrmError::Transport(error.to_string()))?;

        if status == StatusCode::UNAUTHORIZED {
            self.forget_token().await;
            return Err(CrmError::Auth(format!("{method} {path} -> 401: {text}")));
        }
        if !status.is_success() {
            return Err(CrmError::Http { status: status.as_u16(), body: text });
        }
        if status == StatusCode::NO_CONTENT || text.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&text).map(Some).map_err(|error| CrmError::Decode(error.to_string()))
    }

    async fn create_contact(&self, name: String, fields: Vec<CustomField>) -> Result<ContactId, CrmError> {
        let values: Vec<&Value> = fields.iter().map(|(_, value)| value).collect();
        let mut entity = json!({ "name": name });
        if !values.is_empty() {
            entity["custom_fields_values"] = json!(values);
        }
        let response = self
            .request(Method::POST, "/api/v4/contacts", &[], Some(json!([entity])))
            .await
            .map_err(|error| with_rejected_field(error, &fields))?;
        embedded_id(response, "contacts").map(ContactId)
    }

    fn contact_fields(&self, contact: &Contact) -> Vec<CustomField> {
        match (self.config.contact_telegram_field_id, &contact.handle) {
            (Some(field_id), Some(handle)) => {
                vec![(Some(PayloadField::ContactHandle), cf_value(field_id, format!("@{handle}")))]
            }
            _ => Vec::new(),
        }
    }
}

#[async_trait]
impl CrmGateway for AmoCrmClient {
    async fn create_or_update_contact(&self, contact: &Contact) -> Result<ContactId, CrmError> {
        let mut fields = self.contact_fields(contact);

        let Some(phone) = contact.phone_e164.as_deref() else {
            let name = first_non_empty([
                contact.name.clone(),
                contact.handle.as_ref().map(|handle| format!("@{handle}")).unwrap_or_default(),
                "Telegram lead".to_string(),
            ]);
            return self.create_contact(name, fields).await;
        };

        let found = self
            .request(Method::GET, "/api/v4/contacts", &[("limit", "1"), ("query", phone)], None)
            .await?
            .and_then(|body| body.pointer("/_embedded/contacts/0").cloned());

        match found {
            Some(existing) => {
                let id = existing
                    .get("id")
                    .and_then(Value::as_u64)
                    .ok_or_else(|| CrmError::Decode("contact search result without id".to_string()))?;
                let existing_name = existing.get("name").and_then(Value::as_str).unwrap_or_default();
                let mut entity = json!({
                    "id": id,
                    "name": first_non_empty([contact.name.clone(), existing_name.to_string(), phone.to_string()]),
                });
                if !fields.is_empty() {
                    let values: Vec<&Value> = fields.iter().map(|(_, value)| value).collect();
                    entity["custom_fields_values"] = json!(values);
                }
                self.request(Method::PATCH, "/api/v4/contacts", &[], Some(json!([entity])))
                    .await
                    .map_err(|error| with_rejected_field(error, &fields))?;
                Ok(ContactId(id))
            }
            None => {
                fields.insert(0, (None, json!({ "field_code": "PHONE", "values": [{ "value": phone }] })));
                let name = first_non_empty([contact.name.clone(), phone.to_string()]);
                self.create_contact(name, fields).await
            }
        }
    }

    async fn create_lead(
        &self,
        payload: &LeadPayload,
        responsible_id: Option<ResponsibleId>,
    ) -> Result<LeadId, CrmError> {
        let fields = lead_custom_fields(payload, &self.config.fields);
        let mut entity = json!({ "name": lead_title(payload) });
        if let Some(pipeline_id) = self.config.pipeline_id {
            entity["pipeline_id"] = json!(pipeline_id);
        }
        if let Some(status_id) = self.config.status_id {
            entity["status_id"] = json!(status_id);
        }
        if let Some(responsible_id) = responsible_id {
            entity["responsible_user_id"] = json!(responsible_id.0);
        }
        if !fields.is_empty() {
            let values: Vec<&Value> = fields.iter().map(|(_, value)| value).collect();
            entity["custom_fields_values"] = json!(values);
        }

        let response = self
            .request(Method::POST, "/api/v4/leads", &[], Some(json!([entity])))
            .await
            .map_err(|error| with_rejected_field(error, &fields))?;
        embedded_id(response, "leads").map(LeadId)
    }

    async fn link_contact_to_lead(&self, contact_id: ContactId, lead_id: LeadId) -> Result<(), CrmError> {
        let body = json!([{ "to_entity_id": contact_id.0, "to_entity_type": "contacts" }]);
        self.request(Method::POST, &format!("/api/v4/leads/{lead_id}/link"), &[], Some(body)).await?;
        Ok(())
    }

    async fn add_note(&self, lead_id: LeadId, text: &str) -> Result<(), CrmError> {
        let body = json!([{ "note_type": "common", "params": { "text": text } }]);
        self.request(Method::POST, &format!("/api/v4/leads/{lead_id}/notes"), &[], Some(body)).await?;
        Ok(())
    }

    async fn add_task(&self, lead_id: LeadId, text: &str, due_at: DateTime<Utc>) -> Result<(), CrmError> {
        let body = json!([{
            "text": text,
            "complete_till": due_at.timestamp(),
            "entity_id": lead_id.0,
            "entity_type": "leads",
            "task_type_id": FOLLOW_UP_TASK_TYPE,
        }]);
        self.request(Method::POST, "/api/v4/tasks", &[], Some(body)).await?;
        Ok(())
    }
}

fn cf_value(field_id: u64, value: impl Into<Value>) -> Value {
    json!({ "field_id": field_id, "values": [{ "value": value.into() }] })
}

fn push_text(fields: &mut Vec<CustomField>, id: Option<u64>, source: PayloadField, value: &str) {
    if let Some(field_id) = id {
        if !value.trim().is_empty() {
            fields.push((Some(source), cf_value(field_id, value)));
        }
    }
}

/// Lead card custom fields for `payload`. Unconfigured ids and empty values are skipped.
fn lead_custom_fields(payload: &LeadPayload, ids: &AmoFieldIds) -> Vec<CustomField> {
    let mut fields = Vec::new();
    if let Some(field_id) = ids.direction {
        fields.push((None, cf_value(field_id, payload.flow().as_str())));
    }
    if let LeadDetails::Calculator(lead) = &payload.details {
        if let Some(country) = lead.country {
            push_text(&mut fields, ids.country, PayloadField::Country, country.code());
        }
    }
    let city = payload.details.city();
    push_text(&mut fields, ids.delivery_city, PayloadField::City, city);
    push_text(&mut fields, ids.city, PayloadField::City, city);

    let source = &payload.source;
    push_text(&mut fields, ids.start_param, PayloadField::Source, &source.start_param);
    push_text(&mut fields, ids.utm_source, PayloadField::Source, &source.utm.source);
    push_text(&mut fields, ids.utm_medium, PayloadField::Source, &source.utm.medium);
    push_text(&mut fields, ids.utm_campaign, PayloadField::Source, &source.utm.campaign);
    push_text(&mut fields, ids.utm_content, PayloadField::Source, &source.utm.content);

    if let (Some(consent), Some(version_id), Some(at_id)) =
        (&payload.consent, ids.consent_version, ids.consent_at)
    {
        fields.push((Some(PayloadField::Consent), cf_value(version_id, consent.version.as_str())));
        fields.push((Some(PayloadField::Consent), cf_value(at_id, consent.accepted_at.to_rfc3339())));
    }
    fields
}

/// Turns a 400 validation failure on a custom field into a rejected-field error.
fn with_rejected_field(error: CrmError, fields: &[CustomField]) -> CrmError {
    let CrmError::Http { status: 400, body } = &error else {
        return error;
    };
    match rejected_field(body, fields) {
        Some(rejected) => {
            warn!(
                event_name = "crm.amocrm.field_rejected",
                error = %rejected,
                "amocrm rejected a custom field value"
            );
            rejected
        }
        None => error,
    }
}

fn rejected_field(body: &str, fields: &[CustomField]) -> Option<CrmError> {
    let parsed: Value = serde_json::from_str(body).ok()?;
    let groups = parsed.get("validation-errors")?.as_array()?;

    groups
        .iter()
        .filter_map(|group| group.get("errors").and_then(Value::as_array))
        .flatten()
        .find_map(|entry| {
            let path = entry.get("path").and_then(Value::as_str)?;
            let index = custom_field_index(path)?;
            let field = fields.get(index).and_then(|(field, _)| *field)?;
            let code = entry.get("code").and_then(Value::as_str).unwrap_or("invalid");
            let detail = entry.get("detail").and_then(Value::as_str).unwrap_or_default();
            Some(CrmError::RejectedField {
                field: field.as_str().to_string(),
                detail: format!("{code}: {detail}").trim_end_matches([' ', ':']).to_string(),
            })
        })
}

/// `custom_fields_values.3.values.0.value` → `3`.
fn custom_field_index(path: &str) -> Option<usize> {
    let mut segments = path.split('.');
    segments.find(|segment| *segment == "custom_fields_values")?;
    segments.next()?.parse().ok()
}

fn embedded_id(response: Option<Value>, collection: &str) -> Result<u64, CrmError> {
    response
        .as_ref()
        .and_then(|body| body.pointer(&format!("/_embedded/{collection}/0/id")))
        .and_then(Value::as_u64)
        .ok_or_else(|| CrmError::Decode(format!("response has no `{collection}` id")))
}

fn first_non_empty<const N: usize>(candidates: [String; N]) -> String {
    candidates.into_iter().find(|value| !value.trim().is_empty()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    use axum::extract::{Path, State};
    use axum::http::{HeaderMap, StatusCode as HttpStatus};
    use axum::response::{IntoResponse, Response};
    use axum::routing::post;
    use axum::{Json, Router};
    use chrono::TimeZone;
    use leadbot_core::crm::{deliver_lead, DeliveryPlan, PlainNoteComposer};
    use leadbot_core::domain::lead::{
        CalculatorLead, Consent, ContactMethod, CountryCode, LeadSource, Utm,
    };
    use leadbot_core::ManualClock;

    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, 2, 8, 0, 0).unwrap()
    }

    fn payload() -> LeadPayload {
        LeadPayload {
            session_id: Some("abc".to_string()),
            lead_id: None,
            created_at: now(),
            source: LeadSource {
                start_param: "utm_source:vk".to_string(),
                utm: Utm { source: "vk".to_string(), ..Utm::default() },
            },
            contact: Contact {
                phone_e164: None,
                handle: Some("ivan".to_string()),
                name: String::new(),
            },
            contact_method: ContactMethod::Telegram,
            consent: Some(Consent { accepted: true, version: "2025-09-01".to_string(), accepted_at: now() }),
            details: LeadDetails::Calculator(CalculatorLead {
                brand_model: "BMW X5".to_string(),
                condition: None,
                city: "Москва".to_string(),
                country: Some(CountryCode::Korea),
                comment: "нужен кредит".to_string(),
            }),
        }
    }

    fn field_ids() -> AmoFieldIds {
        AmoFieldIds {
            direction: Some(100),
            country: Some(101),
            city: Some(102),
            start_param: Some(103),
            utm_source: Some(104),
            consent_version: Some(105),
            consent_at: Some(106),
            ..AmoFieldIds::default()
        }
    }

    #[test]
    fn custom_fields_skip_unconfigured_ids_and_empty_values() {
        let fields = lead_custom_fields(&payload(), &field_ids());
        let ids: Vec<u64> =
            fields.iter().filter_map(|(_, value)| value["field_id"].as_u64()).collect();

        assert_eq!(ids, vec![100, 101, 102, 103, 104, 105, 106]);
        assert_eq!(fields[0].1["values"][0]["value"], "calculator");
        assert_eq!(fields[1].1["values"][0]["value"], "KR");
        assert_eq!(fields[1].0, Some(PayloadField::Country));
    }

    #[test]
    fn refresh_deadline_keeps_margin_and_rejects_absurd_lifetimes() {
        assert_eq!(
            refresh_deadline(now(), 86_400).expect("deadline"),
            now() + Duration::seconds(86_400 - TOKEN_REFRESH_MARGIN_SECS)
        );
        assert!(matches!(refresh_deadline(now(), i64::MIN), Err(CrmError::Decode(_))));
        assert!(matches!(refresh_deadline(now(), i64::MAX), Err(CrmError::Decode(_))));
    }

    #[test]
    fn validation_error_path_maps_to_payload_field() {
        let fields = lead_custom_fields(&payload(), &field_ids());
        let body = json!({
            "title": "Bad Request",
            "status": 400,
            "validation-errors": [{
                "request_id": "0",
                "errors": [{
                    "code": "NotSupportedChoice",
                    "path": "custom_fields_values.2.values.0.value",
                    "detail": "The value is not supported"
                }]
            }]
        })
        .to_string();

        let mapped = with_rejected_field(CrmError::Http { status: 400, body }, &fields);

        assert_eq!(
            mapped,
            CrmError::RejectedField {
                field: "city".to_string(),
                detail: "NotSupportedChoice: The value is not supported".to_string()
            }
        );
        assert!(mapped.to_string().contains(&CrmError::rejected_field_marker("city")));
    }

    #[test]
    fn unrelated_failures_pass_through() {
        let fields = lead_custom_fields(&payload(), &field_ids());
        let direction_error = json!({
            "validation-errors": [{ "errors": [{ "path": "custom_fields_values.0.field_id" }] }]
        })
        .to_string();

        let server = CrmError::Http { status: 502, body: "bad gateway".to_string() };
        assert_eq!(with_rejected_field(server.clone(), &fields), server);

        let direction = CrmError::Http { status: 400, body: direction_error };
        assert_eq!(with_rejected_field(direction.clone(), &fields), direction);
    }

    #[derive(Default)]
    struct FakeAmo {
        refreshes: AtomicUsize,
        requests: StdMutex<Vec<(String, Option<String>, Value)>>,
    }

    impl FakeAmo {
        fn record(&self, route: &str, headers: &HeaderMap, body: Value) {
            let auth = headers
                .get("authorization")
                .and_then(|value| value.to_str().ok())
                .map(str::to_string);
            self.requests.lock().expect("requests lock").push((route.to_string(), auth, body));
        }

        fn body_of(&self, route: &str) -> Value {
            self.requests
                .lock()
                .expect("requests lock")
                .iter()
                .find(|(recorded, _, _)| recorded == route)
                .map(|(_, _, body)| body.clone())
                .unwrap_or(Value::Null)
        }
    }

    async fn token(State(fake): State<Arc<FakeAmo>>, Json(body): Json<Value>) -> Json<Value> {
        let issued = fake.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
        assert_eq!(body["grant_type"], "refresh_token");
        Json(json!({
            "token_type": "Bearer",
            "access_token": format!("access-{issued}"),
            "refresh_token": format!("refresh-{issued}"),
            "expires_in": 86_400
        }))
    }

    async fn search_contacts(State(fake): State<Arc<FakeAmo>>, headers: HeaderMap) -> HttpStatus {
        fake.record("search_contacts", &headers, Value::Null);
        HttpStatus::NO_CONTENT
    }

    async fn create_contacts(
        State(fake): State<Arc<FakeAmo>>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> Json<Value> {
        fake.record("create_contacts", &headers, body);
        Json(json!({ "_embedded": { "contacts": [{ "id": 7 }] } }))
    }

    async fn create_leads(
        State(fake): State<Arc<FakeAmo>>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> Response {
        fake.record("create_leads", &headers, body);
        Json(json!({ "_embedded": { "leads": [{ "id": 9 }] } })).into_response()
    }

    async fn lead_child(
        State(fake): State<Arc<FakeAmo>>,
        Path((lead_id, child)): Path<(u64, String)>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> Json<Value> {
        assert_eq!(lead_id, 9);
        fake.record(&child, &headers, body);
        Json(json!({}))
    }

    async fn create_tasks(
        State(fake): State<Arc<FakeAmo>>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> Json<Value> {
        fake.record("tasks", &headers, body);
        Json(json!({ "_embedded": { "tasks": [{ "id": 3 }] } }))
    }

    async fn spawn_fake() -> (String, Arc<FakeAmo>) {
        let fake = Arc::new(FakeAmo::default());
        let app = Router::new()
            .route("/oauth2/access_token", post(token))
            .route("/api/v4/contacts", post(create_contacts).get(search_contacts))
            .route("/api/v4/leads", post(create_leads))
            .route("/api/v4/leads/{lead_id}/{child}", post(lead_child))
            .route("/api/v4/tasks", post(create_tasks))
            .with_state(fake.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind fake amocrm");
        let address = listener.local_addr().expect("local addr");
        tokio::spawn(async move { axum::serve(listener, app).await });
        (format!("http://{address}"), fake)
    }

    fn client_config(base_url: String) -> AmoCrmConfig {
        AmoCrmConfig {
            base_url,
            client_id: "client".to_string(),
            client_secret: "secret".to_string().into(),
            redirect_uri: "https://example.test/oauth".to_string(),
            refresh_token: "refresh-0".to_string().into(),
            pipeline_id: Some(55),
            status_id: Some(66),
            fields: field_ids(),
            contact_telegram_field_id: Some(200),
            timeout_secs: 5,
        }
    }

    #[tokio::test]
    async fn full_delivery_reuses_one_access_token() {
        let (base_url, fake) = spawn_fake().await;
        let clock = Arc::new(ManualClock::new(now()));
        let client = AmoCrmClient::new(client_config(base_url), clock).expect("client");

        let lead_id = deliver_lead(
            &client,
            &PlainNoteComposer,
            DeliveryPlan::default(),
            &payload(),
            Some(ResponsibleId(11)),
            now(),
        )
        .await
        .expect("delivery succeeds");

        assert_eq!(lead_id, LeadId(9));
        assert_eq!(fake.refreshes.load(Ordering::SeqCst), 1);
        let requests = fake.requests.lock().expect("requests lock").clone();
        let routes: Vec<&str> = requests.iter().map(|(route, _, _)| route.as_str()).collect();
        assert_eq!(routes, vec!["create_contacts", "create_leads", "link", "notes", "tasks"]);
        assert!(requests.iter().all(|(_, auth, _)| auth.as_deref() == Some("Bearer access-1")));

        let contact = fake.body_of("create_contacts");
        assert_eq!(contact[0]["name"], "@ivan");
        assert_eq!(contact[0]["custom_fields_values"][0]["values"][0]["value"], "@ivan");

        let lead = fake.body_of("create_leads");
        assert_eq!(lead[0]["name"], "Кальк • BMW X5 • Корея → Москва");
        assert_eq!(lead[0]["pipeline_id"], 55);
        assert_eq!(lead[0]["responsible_user_id"], 11);

        let task = fake.body_of("tasks");
        assert_eq!(task[0]["complete_till"], (now() + Duration::minutes(15)).timestamp());
        assert_eq!(task[0]["entity_id"], 9);
    }

    #[tokio::test]
    async fn phone_contact_is_searched_then_created_with_phone_field() {
        let (base_url, fake) = spawn_fake().await;
        let clock = Arc::new(ManualClock::new(now()));
        let client = AmoCrmClient::new(client_config(base_url), clock).expect("client");
        let contact = Contact {
            phone_e164: Some("+79991234567".to_string()),
            handle: None,
            name: "Иван".to_string(),
        };

        let contact_id = client.create_or_update_contact(&contact).await.expect("contact");

        assert_eq!(contact_id, ContactId(7));
        let created = fake.body_of("create_contacts");
        assert_eq!(created[0]["name"], "Иван");
        assert_eq!(created[0]["custom_fields_values"][0]["field_code"], "PHONE");
        assert_eq!(created[0]["custom_fields_values"][0]["values"][0]["value"], "+79991234567");
    }

    #[tokio::test]
    async fn expired_token_is_refreshed_with_rotated_refresh_token() {
        let (base_url, fake) = spawn_fake().await;
        let clock = Arc::new(ManualClock::new(now()));
        let client = AmoCrmClient::new(client_config(base_url), clock.clone()).expect("client");

        client.add_note(LeadId(9), "first").await.expect("first note");
        clock.advance(Duration::seconds(86_400 - 30));
        client.add_note(LeadId(9), "second").await.expect("second note");

        assert_eq!(fake.refreshes.load(Ordering::SeqCst), 2);
        let requests = fake.requests.lock().expect("requests lock").clone();
        assert_eq!(requests[1].1.as_deref(), Some("Bearer access-2"));
    }
}
