//! Pluggable sign-challenge capability.
//!
//! The original source dynamically loads a native validator module at this
//! point; there is no equivalent dynamic-loading mechanism here, so this is
//! a trait boundary a real signer can be plugged into without touching
//! `HandshakeMachine`. Absent a signer, the handshake falls back to a fixed
//! challenge string, with validation falling through to shared-token
//! equality.

pub trait Signer: Send + Sync {
    fn create_challenge(&self, seed: &[u8]) -> Vec<u8>;
    fn validate(&self, signed: &[u8]) -> bool;
}

/// Placeholder used when no real signer is configured.
pub struct PlaceholderSigner;

impl Signer for PlaceholderSigner {
    fn create_challenge(&self, _seed: &[u8]) -> Vec<u8> {
        b"placeholder-challenge".to_vec()
    }

    fn validate(&self, _signed: &[u8]) -> bool {
        false
    }
}
