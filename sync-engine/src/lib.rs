//! Lifelog sync engine — pulls external services into the canonical
//! timeline.
//!
//! # Architecture
//!
//! ```text
//! Scheduler Gate (due-check per instance)
//!          ↓ trigger
//! ┌─────────────────────────────────────────┐
//! │       Sync Engine (work queue)           │
//! │  - one page fetch per work item          │
//! │  - 429 → deferred re-enqueue, same cursor│
//! │  - write page, then enqueue continuation │
//! └─────────────────────────────────────────┘
//!          ↓ fetch_page / normalize
//! ┌─────────────────────────────────────────┐
//! │   Provider adapters (oura, outline,      │
//! │   monzo) behind one capability trait     │
//! └─────────────────────────────────────────┘
//!          ↓ normalized records
//!    lifelog::TimelineStore (idempotent writer)
//! ```
//!
//! # Core types
//!
//! - [`Provider`] — the capability trait every service adapter implements
//! - [`ProviderRegistry`] — explicit registration table built at startup
//! - [`SyncEngine`] — work-queue consumer driving pagination and writes
//! - [`Scheduler`] — periodic due-check sweep over all instances
//! - [`TokenRefresher`] — lazy OAuth refresh before authenticated calls
//! - [`SyncError`] — the error taxonomy the engine routes on
//!
//! The OAuth boundary (authorize redirect, signed state, callback,
//! API-key connect, status API) lives in [`oauth`].

pub mod engine;
pub mod error;
pub mod http;
pub mod oauth;
pub mod provider;
pub mod providers;
pub mod registry;
pub mod scheduler;
pub mod token;
pub mod types;

pub use engine::{RunStatus, SyncEngine, WorkItem};
pub use error::SyncError;
pub use http::{ApiClient, AuthHeader};
pub use provider::Provider;
pub use registry::ProviderRegistry;
pub use scheduler::Scheduler;
pub use token::TokenRefresher;
pub use types::{
    AccountProfile, AuthScheme, Cursor, FetchedPage, IntegrationConfig, OAuthConfig, SyncContext,
};
