//! # TierNotify Scheduler
//!
//! Decides, per tenant and package, which lifecycle notification must be
//! sent now, sends it once, and records that it was sent.
//!
//! ## Architecture
//! ```text
//! NotificationEngine::run(dry_run, cancel)
//!   ├── inactive tenants (presentation tier) ──┐
//!   └── active trials (trial, zero-entitlements, heritage-resold)
//!                                              │  TenantPool (semaphore)
//!        per tenant: bookkeeping + admins ─────┘
//!          ├── selector: highest relevant windowed definition
//!          ├── usage nudges gated by UsageCheck
//!          ├── TemplateResolver → RecipientAssembler → Dispatcher
//!          └── StatePersister: one write if anything was sent
//! ```

pub mod catalog;
pub mod deadline;
pub mod dispatch;
pub mod engine;
pub mod persistence;
pub mod pool;
pub mod recipients;
pub mod selector;
pub mod template;
pub mod usage;

#[cfg(test)]
pub(crate) mod test_support;

pub use catalog::{Catalog, Category, NotificationDefinition, Reference, TemplateOverrides, UsageCheck};
pub use engine::{Collaborators, EngineSettings, NotificationEngine, RunReport, TenantReport, TenantState};
pub use persistence::{RetryPolicy, StatePersister};
pub use pool::TenantPool;
pub use selector::{relevant_candidates, select_notification};
