//! Canonical HTTP paths for the monitor surface.
//!
//! Issuers post updates to the first group; everything else is
//! monitor-to-monitor gossip. The default and EEA distribution modes share
//! the notification/request/partial-signature paths, distinguished by the
//! notification kind.

pub const CA_UPDATE_EEA: &str = "/monitor/ca_update_EEA";
pub const LOGGER_UPDATE_EEA: &str = "/monitor/logger_update_EEA";
pub const LOGGER_UPDATE: &str = "/monitor/logger_update";

pub const SRH: &str = "/monitor/SRH";
pub const STH: &str = "/monitor/STH";

pub const REVOCATION_NOTIFICATION: &str = "/monitor/revocation_notification";
pub const REVOCATION_REQUEST: &str = "/monitor/revocation_request";
pub const REVOCATION_PARTIAL_SIGNATURE: &str = "/monitor/revocation_partial_signature";

pub const TRANSPARENCY_NOTIFICATION: &str = "/monitor/transparency_notification";
pub const TRANSPARENCY_REQUEST: &str = "/monitor/transparency_request";
pub const TRANSPARENCY_PARTIAL_SIGNATURE: &str = "/monitor/transparency_partial_signature";

pub const POM: &str = "/monitor/PoM";
