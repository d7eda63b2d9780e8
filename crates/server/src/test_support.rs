use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use leadbot_chat::{InMemorySessionStore, LeadIntake};
use leadbot_core::crm::{ContactId, CrmError, CrmGateway, LeadId};
use leadbot_core::domain::lead::{
    Contact, ContactMethod, LeadDetails, LeadPayload, LeadSource, ManagerRequest, ResponsibleId,
};
use leadbot_core::ledger::{DedupLedger, LedgerTtl};
use leadbot_core::outbox::Outbox;
use leadbot_core::routing::RoundRobin;
use leadbot_core::store::{InMemorySnapshotStore, SnapshotStore, StoreError};
use leadbot_core::{Clock, ManualClock};

pub fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 9, 2, 8, 0, 0).unwrap()
}

pub fn manager_payload(session_id: &str) -> LeadPayload {
    LeadPayload {
        session_id: Some(session_id.to_string()),
        lead_id: None,
        created_at: fixed_now(),
        source: LeadSource { start_param: "organic".to_string(), ..LeadSource::default() },
        contact: Contact {
            phone_e164: Some("+79990001122".to_string()),
            handle: Some("ivan".to_string()),
            name: "Иван".to_string(),
        },
        contact_method: ContactMethod::Phone,
        consent: None,
        details: LeadDetails::Manager(ManagerRequest { comment: "перезвоните".to_string() }),
    }
}

pub struct IntakeFixture {
    pub intake: Arc<LeadIntake>,
    pub outbox: Arc<Outbox>,
    pub clock: Arc<dyn Clock>,
}

pub async fn intake_fixture(pool: Vec<ResponsibleId>) -> IntakeFixture {
    intake_fixture_with_store(Arc::new(InMemorySnapshotStore::new()), pool).await
}

pub async fn intake_fixture_with_store(
    store: Arc<dyn SnapshotStore>,
    pool: Vec<ResponsibleId>,
) -> IntakeFixture {
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(fixed_now()));
    let ledger =
        Arc::new(DedupLedger::load(store.clone(), clock.clone(), LedgerTtl::default()).await);
    let outbox = Arc::new(Outbox::load(store.clone(), clock.clone(), ledger).await);
    let routing = Arc::new(RoundRobin::load(pool, store).await);
    let intake = Arc::new(LeadIntake::new(
        Arc::new(InMemorySessionStore::new()),
        outbox.clone(),
        routing,
        clock.clone(),
    ));
    IntakeFixture { intake, outbox, clock }
}

/// Store whose writes always fail, as on a full or read-only disk.
pub struct ReadOnlyStore;

#[async_trait]
impl SnapshotStore for ReadOnlyStore {
    async fn read(&self, _key: &str) -> Result<Option<String>, StoreError> {
        Ok(None)
    }

    async fn write(&self, _key: &str, _contents: String) -> Result<(), StoreError> {
        Err(StoreError::Backend("read-only volume".to_string()))
    }
}

/// CRM that accepts everything.
#[derive(Default)]
pub struct StubGateway {
    leads: AtomicUsize,
}

impl StubGateway {
    pub fn leads_created(&self) -> usize {
        self.leads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CrmGateway for StubGateway {
    async fn create_or_update_contact(&self, _contact: &Contact) -> Result<ContactId, CrmError> {
        Ok(ContactId(1))
    }

    async fn create_lead(
        &self,
        _payload: &LeadPayload,
        _responsible_id: Option<ResponsibleId>,
    ) -> Result<LeadId, CrmError> {
        Ok(LeadId(self.leads.fetch_add(1, Ordering::SeqCst) as u64 + 1))
    }

    async fn link_contact_to_lead(&self, _contact_id: ContactId, _lead_id: LeadId) -> Result<(), CrmError> {
        Ok(())
    }

    async fn add_note(&self, _lead_id: LeadId, _text: &str) -> Result<(), CrmError> {
        Ok(())
    }

    async fn add_task(&self, _lead_id: LeadId, _text: &str, _due_at: DateTime<Utc>) -> Result<(), CrmError> {
        Ok(())
    }
}
