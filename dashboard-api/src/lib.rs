//! Consumer Interface (Layer 4)
//!
//! Ties the cache, scheduler, merger, classification engine and risk
//! controls together behind one service handle.

pub mod service;
pub mod settings;
pub mod views;

pub use service::{ClassifiedSignal, DashboardService, ViewSubscription};
pub use settings::{load_settings, DashboardSettings};
pub use views::{view_keys, ViewParams};
