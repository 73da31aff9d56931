//! Session negotiation: derive the initial root and chain keys
//!
//! Three entry points: the initiator of a pre-key bundle handshake
//! ("Alice"), its responder ("Bob"), and the key exchange handshake
//! where roles are picked by comparing base keys.

use zeroize::Zeroize;

use crate::consts::{info, limits, CURRENT_VERSION};
use crate::crypto::curve::{KeyPair, PublicKey};
use crate::crypto::kdf::derive_secrets;
use crate::crypto::keys::{IdentityKey, IdentityKeyPair};
use crate::crypto::ratchet::{ChainKey, RootKey};
use crate::crypto::session::SessionState;
use crate::error::Result;

/// Prefix that separates version 3 agreements from legacy ones
const DISCONTINUITY: [u8; 32] = [0xFF; 32];

pub struct AliceParameters<'a> {
    pub our_identity_key: &'a IdentityKeyPair,
    pub our_base_key: &'a KeyPair,
    pub their_identity_key: IdentityKey,
    pub their_signed_pre_key: PublicKey,
    pub their_one_time_pre_key: Option<PublicKey>,
    pub their_ratchet_key: PublicKey,
}

pub struct BobParameters<'a> {
    pub our_identity_key: &'a IdentityKeyPair,
    pub our_signed_pre_key: &'a KeyPair,
    pub our_one_time_pre_key: Option<&'a KeyPair>,
    pub our_ratchet_key: &'a KeyPair,
    pub their_identity_key: IdentityKey,
    pub their_base_key: PublicKey,
}

pub struct SymmetricParameters<'a> {
    pub our_identity_key: &'a IdentityKeyPair,
    pub our_base_key: &'a KeyPair,
    pub our_ratchet_key: &'a KeyPair,
    pub their_identity_key: IdentityKey,
    pub their_base_key: PublicKey,
    pub their_ratchet_key: PublicKey,
}

/// Key exchange role: the side with the higher base key initiates
pub fn is_alice(our_base_key: &PublicKey, their_base_key: &PublicKey) -> bool {
    our_base_key > their_base_key
}

/// Initiator side of a bundle handshake
pub fn initialize_alice_session(version: u8, params: AliceParameters<'_>) -> Result<SessionState> {
    let mut state = SessionState::new();
    state.set_session_version(version);
    state.set_remote_identity_key(params.their_identity_key);
    state.set_local_identity_key(*params.our_identity_key.identity_key());

    let sending_ratchet_key = KeyPair::generate();

    let mut secrets = Vec::with_capacity(32 * 5);
    if version >= CURRENT_VERSION {
        secrets.extend_from_slice(&DISCONTINUITY);
    }
    secrets.extend_from_slice(
        &params
            .our_identity_key
            .private_key()
            .calculate_agreement(&params.their_signed_pre_key),
    );
    secrets.extend_from_slice(
        &params
            .our_base_key
            .calculate_agreement(params.their_identity_key.public_key()),
    );
    secrets.extend_from_slice(&params.our_base_key.calculate_agreement(&params.their_signed_pre_key));
    if version >= CURRENT_VERSION {
        if let Some(one_time) = params.their_one_time_pre_key.as_ref() {
            secrets.extend_from_slice(&params.our_base_key.calculate_agreement(one_time));
        }
    }

    let (root_key, chain_key) = derive_keys(&mut secrets)?;
    let (sending_root, sending_chain) =
        root_key.create_chain(&params.their_ratchet_key, &sending_ratchet_key)?;

    state.add_receiver_chain(params.their_ratchet_key, chain_key, limits::MAX_RECEIVER_CHAINS);
    state.set_sender_chain(sending_ratchet_key, sending_chain);
    state.set_root_key(sending_root);

    Ok(state)
}

/// Responder side of a bundle handshake
pub fn initialize_bob_session(version: u8, params: BobParameters<'_>) -> Result<SessionState> {
    let mut state = SessionState::new();
    state.set_session_version(version);
    state.set_remote_identity_key(params.their_identity_key);
    state.set_local_identity_key(*params.our_identity_key.identity_key());

    let mut secrets = Vec::with_capacity(32 * 5);
    if version >= CURRENT_VERSION {
        secrets.extend_from_slice(&DISCONTINUITY);
    }
    secrets.extend_from_slice(
        &params
            .our_signed_pre_key
            .calculate_agreement(params.their_identity_key.public_key()),
    );
    secrets.extend_from_slice(
        &params
            .our_identity_key
            .private_key()
            .calculate_agreement(&params.their_base_key),
    );
    secrets.extend_from_slice(&params.our_signed_pre_key.calculate_agreement(&params.their_base_key));
    if version >= CURRENT_VERSION {
        if let Some(one_time) = params.our_one_time_pre_key {
            secrets.extend_from_slice(&one_time.calculate_agreement(&params.their_base_key));
        }
    }

    let (root_key, chain_key) = derive_keys(&mut secrets)?;

    state.set_sender_chain(params.our_ratchet_key.clone(), chain_key);
    state.set_root_key(root_key);

    Ok(state)
}

/// Key exchange handshake; delegates to one of the bundle roles
pub fn initialize_symmetric_session(
    version: u8,
    params: SymmetricParameters<'_>,
) -> Result<SessionState> {
    if is_alice(&params.our_base_key.public_key, &params.their_base_key) {
        tracing::debug!("Key exchange: taking initiator role");
        initialize_alice_session(
            version,
            AliceParameters {
                our_identity_key: params.our_identity_key,
                our_base_key: params.our_base_key,
                their_identity_key: params.their_identity_key,
                their_signed_pre_key: params.their_base_key,
                their_one_time_pre_key: None,
                their_ratchet_key: params.their_ratchet_key,
            },
        )
    } else {
        tracing::debug!("Key exchange: taking responder role");
        initialize_bob_session(
            version,
            BobParameters {
                our_identity_key: params.our_identity_key,
                our_signed_pre_key: params.our_base_key,
                our_one_time_pre_key: None,
                our_ratchet_key: params.our_ratchet_key,
                their_identity_key: params.their_identity_key,
                their_base_key: params.their_base_key,
            },
        )
    }
}

fn derive_keys(secrets: &mut Vec<u8>) -> Result<(RootKey, ChainKey)> {
    let derived: Result<[u8; 64]> = derive_secrets(secrets, None, info::ROOT_DERIVATION);
    secrets.zeroize();
    let mut derived = derived?;

    let mut root = [0u8; 32];
    let mut chain = [0u8; 32];
    root.copy_from_slice(&derived[..32]);
    chain.copy_from_slice(&derived[32..]);
    derived.zeroize();

    Ok((RootKey::new(root), ChainKey::new(chain, 0)))
}
