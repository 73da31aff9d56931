//! Protocol configuration

use crate::consts::limits;

/// Resource bounds applied by the session builder and cipher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolConfig {
    /// Largest gap between a chain's index and an incoming counter
    pub max_forward_jumps: usize,

    /// Skipped message keys kept per receiving chain (oldest evicted)
    pub max_message_keys: usize,

    /// Receiving chains kept per session state (oldest evicted)
    pub max_receiver_chains: usize,

    /// Archived session states kept per record (oldest evicted)
    pub max_archived_states: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            max_forward_jumps: limits::MAX_FORWARD_JUMPS,
            max_message_keys: limits::MAX_MESSAGE_KEYS,
            max_receiver_chains: limits::MAX_RECEIVER_CHAINS,
            max_archived_states: limits::MAX_ARCHIVED_STATES,
        }
    }
}

impl ProtocolConfig {
    /// Tight bounds for constrained hosts
    pub fn compact() -> Self {
        Self {
            max_forward_jumps: 500,
            max_message_keys: 500,
            max_receiver_chains: 2,
            max_archived_states: 5,
        }
    }
}
