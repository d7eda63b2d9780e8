pub mod lead;
pub mod outbox;
