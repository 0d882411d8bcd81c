//! Human readable statuses written to inventory
//!
//! Operators see these strings in the UI, so they are kept stable.

use inventory_client::{ResourceStatus, StatusIndication};

/// Status text and severity, usable in `const` position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusDef {
    pub text: &'static str,
    pub indicator: StatusIndication,
}

impl StatusDef {
    const fn new(text: &'static str, indicator: StatusIndication) -> Self {
        Self { text, indicator }
    }

    pub fn status(self) -> ResourceStatus {
        ResourceStatus::new(self.text, self.indicator)
    }

    /// `"<text>: <detail>"`, or the plain status when there is no detail
    pub fn with_details(self, detail: &str) -> ResourceStatus {
        if detail.is_empty() {
            return self.status();
        }
        ResourceStatus::new(format!("{}: {}", self.text, detail), self.indicator)
    }

    /// Whether `status` carries this definition's text and severity
    pub fn matches(self, status: &ResourceStatus) -> bool {
        status.status == self.text && status.indicator == self.indicator
    }
}

impl From<StatusDef> for ResourceStatus {
    fn from(def: StatusDef) -> Self {
        def.status()
    }
}

pub const UNKNOWN: StatusDef = StatusDef::new("Unknown", StatusIndication::Unspecified);

pub const PROVISIONING_IN_PROGRESS: StatusDef =
    StatusDef::new("Provisioning In Progress", StatusIndication::InProgress);
pub const PROVISIONING_FAILED: StatusDef = StatusDef::new("Provisioning Failed", StatusIndication::Error);
pub const PROVISIONING_DONE: StatusDef = StatusDef::new("Provisioned", StatusIndication::Idle);

pub const ONBOARDING_DONE: StatusDef = StatusDef::new("Onboarded", StatusIndication::Idle);

pub const AUTHORIZATION_INVALIDATED: StatusDef = StatusDef::new("Invalidated", StatusIndication::Idle);

pub const HOST_REGISTRATION_UNKNOWN: StatusDef = UNKNOWN;
pub const HOST_REGISTRATION_DONE: StatusDef = StatusDef::new("Host is Registered", StatusIndication::Idle);
pub const HOST_REGISTRATION_UUID_FAILED: StatusDef = StatusDef::new(
    "Host Registration Failed due to mismatch of UUID, Reported UUID is",
    StatusIndication::Error,
);
pub const HOST_REGISTRATION_SERIAL_FAILED: StatusDef = StatusDef::new(
    "Host Registration Failed due to mismatch of Serial Number, Reported Serial Number is",
    StatusIndication::Error,
);

pub const HOST_STATUS_REBOOTING: StatusDef = StatusDef::new("Rebooting", StatusIndication::InProgress);

pub const DELETING: StatusDef = StatusDef::new("Deleting", StatusIndication::InProgress);

/// `Deleting: <detail>`, e.g. while an Instance still holds the Host
pub fn deleting_with_details(detail: &str) -> ResourceStatus {
    DELETING.with_details(detail)
}

pub fn registration_uuid_failed(reported_uuid: &str) -> ResourceStatus {
    HOST_REGISTRATION_UUID_FAILED.with_details(reported_uuid)
}

pub fn registration_serial_failed(reported_serial: &str) -> ResourceStatus {
    HOST_REGISTRATION_SERIAL_FAILED.with_details(reported_serial)
}
