//! Lifelog core — canonical timeline model and storage.
//!
//! Lifelog ingests data from third-party personal-data APIs (fitness rings,
//! banks, note-taking services) and renders a single timeline of "things that
//! happened" regardless of source. This crate holds the pieces shared by
//! every integration:
//!
//! - [`event`] — the canonical Event / EventObject / Block draft types, the
//!   integer + multiplier numeric encoding, and draft validation
//! - [`credentials`] — integration groups (one per external account
//!   connection) with OAuth tokens encrypted at rest
//! - [`store`] — the SQLite timeline store: integration instances, events,
//!   actor/target objects, child blocks, and the idempotent event writer
//! - [`logging`] — the sanitizing request/response logger every outbound
//!   API call passes through
//!
//! The sync engine itself (provider adapters, pagination, scheduling, OAuth
//! flow) lives in the `sync-engine` crate and builds on these types.

pub mod credentials;
pub mod event;
pub mod logging;
pub mod store;

// Re-export the types integrations touch constantly
pub use credentials::{Credentials, GroupStore, IntegrationGroup};
pub use event::{encode_value, BlockDraft, EventDraft, NormalizedRecord, ObjectDraft};
pub use store::{EventRow, Integration, TimelineStore, WriteOutcome};
