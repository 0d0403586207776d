//! Push event kinds and their rendering.
//!
//! Each [`EventKind`] maps through a static table to a formatter that turns
//! an [`EventPayload`] into a title, a body and flat string data fields.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Kind of push event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    CommandIssued,
    CommandCompleted,
    ApprovalRequested,
    ApprovalPartial,
    ApprovalGranted,
    ApprovalDenied,
    GeofenceAlert,
    FlaggedMessage,
}

impl EventKind {
    /// Every kind, in table order.
    pub const ALL: [EventKind; 8] = [
        EventKind::CommandIssued,
        EventKind::CommandCompleted,
        EventKind::ApprovalRequested,
        EventKind::ApprovalPartial,
        EventKind::ApprovalGranted,
        EventKind::ApprovalDenied,
        EventKind::GeofenceAlert,
        EventKind::FlaggedMessage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::CommandIssued => "COMMAND_ISSUED",
            EventKind::CommandCompleted => "COMMAND_COMPLETED",
            EventKind::ApprovalRequested => "APPROVAL_REQUESTED",
            EventKind::ApprovalPartial => "APPROVAL_PARTIAL",
            EventKind::ApprovalGranted => "APPROVAL_GRANTED",
            EventKind::ApprovalDenied => "APPROVAL_DENIED",
            EventKind::GeofenceAlert => "GEOFENCE_ALERT",
            EventKind::FlaggedMessage => "FLAGGED_MESSAGE",
        }
    }

    /// Render a payload with this kind's formatter.
    pub fn render(&self, payload: &EventPayload) -> RenderedEvent {
        let formatter = FORMATTERS
            .iter()
            .find(|(kind, _)| kind == self)
            .map(|(_, formatter)| *formatter)
            .unwrap_or(format_generic);

        let (title, body) = formatter(payload);
        RenderedEvent {
            title,
            body,
            data: payload.data_fields(*self),
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        EventKind::ALL
            .iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| format!("Unknown event kind: {}", s))
    }
}

/// Structured fields carried by an event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPayload {
    pub subject_device_id: Option<String>,
    pub authority_id: Option<String>,
    pub correlation_id: Option<String>,
    pub request_id: Option<String>,
    /// Kind-specific fields (`commandType`, `action`, `status`, ...).
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl EventPayload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_subject(mut self, subject_device_id: impl Into<String>) -> Self {
        self.subject_device_id = Some(subject_device_id.into());
        self
    }

    pub fn with_authority(mut self, authority_id: impl Into<String>) -> Self {
        self.authority_id = Some(authority_id.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    fn extra(&self, key: &str) -> Option<&str> {
        self.extra.get(key).map(String::as_str)
    }

    fn subject(&self) -> &str {
        self.subject_device_id.as_deref().unwrap_or("the device")
    }

    fn data_fields(&self, kind: EventKind) -> BTreeMap<String, String> {
        let mut data = BTreeMap::new();
        data.insert("eventKind".to_string(), kind.as_str().to_string());
        let ids = [
            ("subjectDeviceId", &self.subject_device_id),
            ("authorityId", &self.authority_id),
            ("correlationId", &self.correlation_id),
            ("requestId", &self.request_id),
        ];
        for (key, value) in ids {
            if let Some(value) = value {
                data.insert(key.to_string(), value.clone());
            }
        }
        for (key, value) in &self.extra {
            data.entry(key.clone()).or_insert_with(|| value.clone());
        }
        data
    }
}

/// Event ready to be handed to a transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedEvent {
    pub title: String,
    pub body: String,
    pub data: BTreeMap<String, String>,
}

type Formatter = fn(&EventPayload) -> (String, String);

static FORMATTERS: &[(EventKind, Formatter)] = &[
    (EventKind::CommandIssued, format_command_issued),
    (EventKind::CommandCompleted, format_command_completed),
    (EventKind::ApprovalRequested, format_approval_requested),
    (EventKind::ApprovalPartial, format_approval_partial),
    (EventKind::ApprovalGranted, format_approval_granted),
    (EventKind::ApprovalDenied, format_approval_denied),
    (EventKind::GeofenceAlert, format_geofence_alert),
    (EventKind::FlaggedMessage, format_flagged_message),
];

fn format_command_issued(p: &EventPayload) -> (String, String) {
    let command = p.extra("commandType").unwrap_or("command");
    (
        "New command".to_string(),
        format!("Run {} requested for {}", command, p.subject()),
    )
}

fn format_command_completed(p: &EventPayload) -> (String, String) {
    let command = p.extra("commandType").unwrap_or("Command");
    let status = p.extra("status").unwrap_or("COMPLETED");
    (
        "Command finished".to_string(),
        format!("{} on {} finished: {}", command, p.subject(), status),
    )
}

fn format_approval_requested(p: &EventPayload) -> (String, String) {
    let action = p.extra("action").unwrap_or("an action");
    (
        "Approval needed".to_string(),
        format!("{} asks to {}. Approve or reject.", p.subject(), action),
    )
}

fn format_approval_partial(_: &EventPayload) -> (String, String) {
    (
        "Approval in progress".to_string(),
        "A response was recorded. Waiting for the remaining authorities.".to_string(),
    )
}

fn format_approval_granted(p: &EventPayload) -> (String, String) {
    let action = p.extra("action").unwrap_or("The request");
    ("Approved".to_string(), format!("{} was approved", action))
}

fn format_approval_denied(p: &EventPayload) -> (String, String) {
    let action = p.extra("action").unwrap_or("The request");
    ("Rejected".to_string(), format!("{} was rejected", action))
}

fn format_geofence_alert(p: &EventPayload) -> (String, String) {
    let zone = p.extra("zone").unwrap_or("a zone");
    let transition = p.extra("transition").unwrap_or("crossed");
    (
        "Location alert".to_string(),
        format!("{} {} {}", p.subject(), transition, zone),
    )
}

fn format_flagged_message(p: &EventPayload) -> (String, String) {
    let category = p.extra("category").unwrap_or("suspicious");
    (
        "Flagged message".to_string(),
        format!("A {} message was received on {}", category, p.subject()),
    )
}

fn format_generic(p: &EventPayload) -> (String, String) {
    ("Notification".to_string(), format!("Update from {}", p.subject()))
}
