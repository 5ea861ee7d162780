//! Availability, pricing, and reservation lifecycle for short-term rentals.
//!
//! [`engine::Engine`] owns the per-property calendars. Property data comes from an
//! injected [`catalog::Catalog`]; every calendar change is written to a WAL and
//! published through [`notify::NotifyHub`].

pub mod catalog;
pub mod config;
pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod sweeper;
pub mod wal;
