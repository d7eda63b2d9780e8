pub mod clock;
pub mod config;
pub mod crm;
pub mod domain;
pub mod errors;
pub mod idempotency;
pub mod ledger;
pub mod notify;
pub mod outbox;
pub mod routing;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use crm::{ContactId, CrmError, CrmGateway, LeadId, NoteComposer, PlainNoteComposer};
pub use domain::lead::{FlowKind, LeadDetails, LeadPayload, PayloadField, ResponsibleId};
pub use domain::outbox::{DeadLetter, DedupKey, JobId, OutboxJob};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use idempotency::derive_dedup_key;
pub use ledger::{DedupLedger, LedgerTtl};
pub use notify::{OperatorAlert, OperatorNotifier, TracingNotifier};
pub use outbox::worker::{DeliveryPolicy, DeliveryWorker, TickReport};
pub use outbox::{EnqueueOutcome, Outbox, OutboxError};
pub use routing::RoundRobin;
pub use store::{InMemorySnapshotStore, JsonFileStore, SnapshotStore, StoreError};
