//! Karte AI+ Shared Library
//!
//! Types and helpers used by the API server, the billing crate, and the
//! background worker: database pool construction, the subscription status
//! model, and the session token signer.

pub mod db;
pub mod status;
pub mod tokens;

pub use db::{create_migration_pool, create_pool, run_migrations};
pub use status::SubscriptionStatus;
pub use tokens::{SessionClaims, SessionTokens};
