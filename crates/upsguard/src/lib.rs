//! UPS guard daemon support: HTTP endpoints and logging setup

pub mod api;
pub mod logging;
