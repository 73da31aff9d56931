//! Session record: the current state plus archived predecessors

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::crypto::curve::PublicKey;
use crate::crypto::session::SessionState;
use crate::error::Result;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionRecord {
    current: SessionState,
    /// Newest first
    previous: VecDeque<SessionState>,
    #[serde(skip)]
    fresh: bool,
}

impl Default for SessionRecord {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRecord {
    /// Empty record; the store hands this out when nothing is saved
    pub fn new() -> Self {
        Self {
            current: SessionState::new(),
            previous: VecDeque::new(),
            fresh: true,
        }
    }

    pub fn from_state(state: SessionState) -> Self {
        Self {
            current: state,
            previous: VecDeque::new(),
            fresh: false,
        }
    }

    /// True until the record has been persisted and loaded back
    pub fn is_fresh(&self) -> bool {
        self.fresh
    }

    pub fn session_state(&self) -> &SessionState {
        &self.current
    }

    pub fn session_state_mut(&mut self) -> &mut SessionState {
        &mut self.current
    }

    pub fn previous_session_states(&self) -> impl Iterator<Item = &SessionState> {
        self.previous.iter()
    }

    pub fn previous_session_count(&self) -> usize {
        self.previous.len()
    }

    /// Whether any state (current or archived) was built from this base key
    pub fn has_session_state(&self, version: u8, alice_base_key: &PublicKey) -> bool {
        std::iter::once(&self.current)
            .chain(self.previous.iter())
            .any(|state| {
                state.session_version() == version
                    && state.alice_base_key() == Some(alice_base_key)
            })
    }

    /// Replace the current state without archiving it
    pub fn set_state(&mut self, state: SessionState) {
        self.current = state;
    }

    /// Move the current state into the archive and start from an empty one
    pub fn archive_current_state(&mut self, max_archived: usize) {
        self.promote_state(SessionState::new(), max_archived);
    }

    /// Make `state` current, archiving the old current state if it was established
    pub fn promote_state(&mut self, state: SessionState, max_archived: usize) {
        let old = std::mem::replace(&mut self.current, state);
        if !old.has_sender_chain() {
            return;
        }

        self.previous.push_front(old);
        while self.previous.len() > max_archived {
            self.previous.pop_back();
            tracing::debug!("Evicted oldest archived session state");
        }
    }

    /// Take an archived state out of the record
    pub fn remove_previous_state(&mut self, index: usize) -> Option<SessionState> {
        self.previous.remove(index)
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
