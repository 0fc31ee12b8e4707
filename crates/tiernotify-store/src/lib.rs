//! # TierNotify Store
//!
//! SQLite-backed records: tenants, package enrollments, users, account teams,
//! assets, usage signals, contracts, and per-tenant notification bookkeeping.
//! `RecordDb` implements every read collaborator plus `BookkeepingStore`.

pub mod db;

pub use db::RecordDb;
