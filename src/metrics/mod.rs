//! Metrics export.
//!
//! After a report is produced its headline numbers can be pushed to a
//! Prometheus Push Gateway.
//!
//! # Submodules
//!
//! - `prom` - Prometheus metrics integration

pub mod prom;
