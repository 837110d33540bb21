use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::BrokerError;

/// Event kinds exchanged within a collaboration session
///
/// The catalog is closed: statistics report every kind, even with a zero
/// count. Wire names are kebab-case (`code-edited`, `conflict-detected`, ...).
///
/// Categories:
/// - presence: participants entering or leaving a session
/// - editing: code edits and shared context
/// - conflicts: detection and resolution
/// - coordination: roles, messages, status, recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    // ========================================================================
    // Presence
    // ========================================================================
    ParticipantJoined,
    ParticipantLeft,

    // ========================================================================
    // Editing
    // ========================================================================
    CodeEdited,
    ContextShared,

    // ========================================================================
    // Conflicts
    // ========================================================================
    ConflictDetected,
    ConflictResolved,

    // ========================================================================
    // Coordination
    // ========================================================================
    RoleChanged,
    MessageSent,
    StatusChanged,
    RecordingToggled,
}

impl EventKind {
    /// Every kind, in catalog order
    pub const ALL: [EventKind; 10] = [
        EventKind::ParticipantJoined,
        EventKind::ParticipantLeft,
        EventKind::CodeEdited,
        EventKind::ContextShared,
        EventKind::ConflictDetected,
        EventKind::ConflictResolved,
        EventKind::RoleChanged,
        EventKind::MessageSent,
        EventKind::StatusChanged,
        EventKind::RecordingToggled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ParticipantJoined => "participant-joined",
            EventKind::ParticipantLeft => "participant-left",
            EventKind::CodeEdited => "code-edited",
            EventKind::ContextShared => "context-shared",
            EventKind::ConflictDetected => "conflict-detected",
            EventKind::ConflictResolved => "conflict-resolved",
            EventKind::RoleChanged => "role-changed",
            EventKind::MessageSent => "message-sent",
            EventKind::StatusChanged => "status-changed",
            EventKind::RecordingToggled => "recording-toggled",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| BrokerError::UnknownEventKind(s.to_string()))
    }
}
