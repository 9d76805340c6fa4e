//! Per-session presence and cursor tables.

use std::collections::HashMap;

use spacelink_core::types::ParticipantId;

use crate::message::payload::{CollaborationCursor, PresenceInfo};

/// Presence and cursor state of the participants of one space.
///
/// Owned by a single session and mutated only from its dispatch path;
/// readers get copies through [`PresenceTracker::presence`] and
/// [`PresenceTracker::cursors`].
#[derive(Debug, Default)]
pub struct PresenceTracker {
    /// Participant ID → presence
    presence: HashMap<ParticipantId, PresenceInfo>,
    /// Participant ID → cursor
    cursors: HashMap<ParticipantId, CollaborationCursor>,
}

impl PresenceTracker {
    /// Create empty tables.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a participant's presence.
    pub fn upsert_presence(&mut self, info: PresenceInfo) {
        self.presence.insert(info.participant_id.clone(), info);
    }

    /// Insert or replace a participant's cursor.
    pub fn upsert_cursor(&mut self, cursor: CollaborationCursor) {
        self.cursors.insert(cursor.participant_id.clone(), cursor);
    }

    /// Forget a participant in both tables. Returns whether anything was removed.
    pub fn remove_participant(&mut self, participant_id: &ParticipantId) -> bool {
        let had_presence = self.presence.remove(participant_id).is_some();
        let had_cursor = self.cursors.remove(participant_id).is_some();
        had_presence || had_cursor
    }

    /// Copy of the presence table.
    pub fn presence(&self) -> HashMap<ParticipantId, PresenceInfo> {
        self.presence.clone()
    }

    /// Copy of the cursor table.
    pub fn cursors(&self) -> HashMap<ParticipantId, CollaborationCursor> {
        self.cursors.clone()
    }
}
