//! Short connection codes and rendezvous identities.
//!
//! A [`ConnectionCode`] is the 4-digit value one person reads to another.
//! A [`RendezvousIdentity`] is the globally addressable string a peer
//! registers under on the shared rendezvous namespace. Both are pure
//! values; neither construction path can fail at runtime.

use std::fmt;

use rand::Rng;

/// Application-specific prefix prepended to every namespaced identity.
///
/// Keeps our identities from colliding with unrelated users of a shared
/// public rendezvous server.
pub const IDENTITY_PREFIX: &str = "syncstream-v1-";

// ── ConnectionCode ───────────────────────────────────────────────

/// A short human-relayed code: exactly 4 ASCII digits.
///
/// The invariant is enforced by construction — a value of this type is
/// always 4 digits, so downstream code never re-validates.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionCode(String);

impl ConnectionCode {
    /// Generate a uniformly random code in `[1000, 9999]`.
    pub fn generate() -> Self {
        let n: u16 = rand::thread_rng().gen_range(1000..=9999);
        Self(n.to_string())
    }

    /// Validate user input into a code.
    ///
    /// Returns `None` unless the trimmed input is exactly 4 ASCII digits.
    pub fn parse(input: &str) -> Option<Self> {
        let trimmed = input.trim();
        if trimmed.len() == 4 && trimmed.bytes().all(|b| b.is_ascii_digit()) {
            Some(Self(trimmed.to_owned()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── RendezvousIdentity ───────────────────────────────────────────

/// A globally unique string two peers use to find each other on the
/// shared transport.
///
/// Identities are only ever compared for equality — never parsed back
/// into a code.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RendezvousIdentity(String);

impl RendezvousIdentity {
    /// Derive the identity a sender registers under for `code`.
    ///
    /// Deterministic, and injective over codes under the fixed prefix.
    pub fn namespace(code: &ConnectionCode) -> Self {
        Self(format!("{IDENTITY_PREFIX}{code}"))
    }

    /// A fresh ephemeral identity for a dialing peer.
    ///
    /// Opaque: carries no code and is never meaningful to parse.
    pub fn ephemeral() -> Self {
        let tag: u64 = rand::thread_rng().r#gen();
        Self(format!("{IDENTITY_PREFIX}peer-{tag:016x}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RendezvousIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Tests ────────────────────────────────────────────────────────
