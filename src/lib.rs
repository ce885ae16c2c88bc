//! Multi-tenant infrastructure reconciliation daemon.
//!
//! Two reconciliation planes run against the same PostgreSQL-backed desired
//! state: cluster bootstrap (assets and `make` targets executed over SSH
//! through each organization's bastion) and DNS record sets (upserted into
//! Route53 hosted zones, defended against a co-running external-dns
//! controller). All cadence lives in a self-rescheduling job table.

pub mod bastion;
pub mod cluster;
pub mod config;
pub mod daemon;
pub mod dns;
pub mod engine;
pub mod model;
pub mod scheduler;
pub mod secrets;
pub mod signing;
pub mod ssh;
pub mod store;
