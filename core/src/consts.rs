//! Protocol constants.

/// Version mixed into every outgoing message and used for new sessions.
pub const CURRENT_VERSION: u8 = 3;

/// Oldest message version this engine still negotiates (no signed pre-key).
pub const MIN_VERSION: u8 = 2;

/// Type byte prefixed to serialized Curve25519 public keys.
pub const DJB_TYPE: u8 = 0x05;

/// Pre-key ids live in a 24-bit space; the top value is the last resort key.
pub const MEDIUM_MAX_VALUE: u32 = 0xFF_FFFF;

/// Length of the truncated HMAC appended to a WhisperMessage.
pub const MAC_LENGTH: usize = 8;

/// HKDF info strings.
pub mod info {
    pub const ROOT_DERIVATION: &[u8] = b"WhisperText";
    pub const RATCHET: &[u8] = b"WhisperRatchet";
    pub const MESSAGE_KEYS: &[u8] = b"WhisperMessageKeys";
}

/// Bounds on per-session resource use. `ProtocolConfig::default` is built from these.
pub mod limits {
    /// Largest counter jump accepted within one receiving chain.
    pub const MAX_FORWARD_JUMPS: usize = 2000;
    /// Skipped message keys retained per receiving chain.
    pub const MAX_MESSAGE_KEYS: usize = 2000;
    /// Receiving chains retained per session state.
    pub const MAX_RECEIVER_CHAINS: usize = 5;
    /// Archived session states retained per record.
    pub const MAX_ARCHIVED_STATES: usize = 40;
}
