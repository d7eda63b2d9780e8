//! Chat-side lead intake: per-user sessions, answer parsing, and the hand-off
//! of a finished intake to the outbox.

pub mod intake;
pub mod parse;
pub mod payload;
pub mod session;

pub use intake::{LeadIntake, Submission, SUBMITTED_MESSAGE};
pub use parse::{normalize_comment, MAX_COMMENT_CHARS};
pub use payload::{
    build_payload, check_contact, limit_comment, IntakeError, UserProfile, CONSENT_VERSION,
};
pub use session::{InMemorySessionStore, IntakeAnswers, IntakeSession, SessionStore, UserId};
