//! HMAC-SHA-256 salt rotation and key derivation for user identifiers.
//!
//! Two derivations share one root secret:
//!
//! - [`salt_for_day`] / [`UserKey`]: per-epoch, per-day opaque key. Stable for any two
//!   days that fall in the same rotation epoch, deliberately unstable across epochs.
//! - [`UserRoot`]: stable across all epochs, used to locate a user's historical days
//!   during an erasure.
//!
//! A third, unrelated hash — keyed BLAKE2b-64, used only inside the sketch family to
//! turn a `UserKey` into a uniformly distributed 64-bit integer — lives here too since
//! it is also a keyed hash over raw bytes, but it never touches `root_secret`.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// 32-byte opaque key, stable within one rotation epoch and derived from an
/// epoch-scoped salt plus a raw user identifier.
pub type UserKey = [u8; 32];

/// 32-byte opaque key, stable across all rotation epochs.
pub type UserRoot = [u8; 32];

/// Personalization tag for the sketch-internal keyed hash (BLAKE2b-64).
const SKETCH_HASH_PERSON: &[u8] = b"dpdau-sketch-key";

/// Root HMAC secret, held as raw bytes.
///
/// `Debug` never prints the underlying bytes: secrets must not leak into logs.
#[derive(Clone)]
pub struct HashSecret(Vec<u8>);

impl std::fmt::Debug for HashSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("HashSecret").field(&"<redacted>").finish()
    }
}

impl HashSecret {
    /// Parses a secret string. A `b64:` prefix signals base64-encoded bytes;
    /// otherwise the raw UTF-8 bytes of the string are used directly.
    pub fn parse(raw: &str) -> Self {
        if let Some(encoded) = raw.strip_prefix("b64:") {
            if let Ok(bytes) = base64_decode(encoded) {
                return Self(bytes);
            }
        }
        Self(raw.as_bytes().to_vec())
    }

    /// Mints a fresh 32-byte cryptographically random secret.
    ///
    /// Used when the configured secret is absent so a process still gets a usable
    /// (if non-reproducible across restarts) root secret.
    pub fn random() -> Self {
        use rand::RngCore;
        let mut bytes = vec![0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Minimal base64 decoder (standard alphabet, with or without padding) so this crate
/// does not need to pull in a dedicated base64 dependency for a single call site.
fn base64_decode(input: &str) -> Result<Vec<u8>, ()> {
    fn value(byte: u8) -> Option<u8> {
        match byte {
            b'A'..=b'Z' => Some(byte - b'A'),
            b'a'..=b'z' => Some(byte - b'a' + 26),
            b'0'..=b'9' => Some(byte - b'0' + 52),
            b'+' => Some(62),
            b'/' => Some(63),
            _ => None,
        }
    }
    let clean: Vec<u8> = input.bytes().filter(|&b| b != b'=').collect();
    let mut out = Vec::with_capacity(clean.len() * 3 / 4 + 3);
    for chunk in clean.chunks(4) {
        let mut buf = [0u8; 4];
        for (i, &b) in chunk.iter().enumerate() {
            buf[i] = value(b).ok_or(())?;
        }
        let n = ((buf[0] as u32) << 18) | ((buf[1] as u32) << 12) | ((buf[2] as u32) << 6) | (buf[3] as u32);
        out.push((n >> 16) as u8);
        if chunk.len() > 2 {
            out.push((n >> 8) as u8);
        }
        if chunk.len() > 3 {
            out.push(n as u8);
        }
    }
    Ok(out)
}

/// Derives the salt for the rotation epoch containing `day`.
///
/// `rotation_days` is clamped to a minimum of 1. The message includes both the ISO
/// date and the epoch index deliberately: stability holds within an epoch, and the
/// ISO date keeps the HMAC input unambiguous across differing epoch lengths.
pub fn salt_for_day(secret: &HashSecret, day: &chrono_like::Ordinal, rotation_days: i64) -> [u8; 32] {
    let rotation = rotation_days.max(1);
    let epoch = day.ordinal.div_euclid(rotation);
    let message = format!("{}::{}", day.iso, epoch);
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(message.as_bytes());
    mac.finalize().into_bytes().into()
}

/// Derives `UserKey(user_id, day)`.
pub fn user_key(secret: &HashSecret, user_id: &str, day: &chrono_like::Ordinal, rotation_days: i64) -> UserKey {
    let salt = salt_for_day(secret, day, rotation_days);
    let mut mac = HmacSha256::new_from_slice(&salt).expect("HMAC accepts any key length");
    mac.update(user_id.as_bytes());
    mac.finalize().into_bytes().into()
}

/// Derives `UserRoot(user_id)`, stable across all rotation epochs.
pub fn user_root(secret: &HashSecret, user_id: &str) -> UserRoot {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(user_id.as_bytes());
    mac.finalize().into_bytes().into()
}

/// Keyed BLAKE2b hash of a [`UserKey`] into a uniformly distributed 64-bit integer,
/// used by the KMV and HLL++ sketches. Independent of `root_secret`: the sketch hash
/// only needs uniform bit distribution, not linkability control.
pub fn sketch_hash(key: &[u8]) -> u64 {
    use blake2::Blake2bVar;
    use blake2::digest::{Update, VariableOutput};
    let mut hasher = Blake2bVar::new(8).expect("8-byte output is within BLAKE2b's range");
    hasher.update(SKETCH_HASH_PERSON);
    hasher.update(key);
    let mut out = [0u8; 8];
    hasher.finalize_variable(&mut out).expect("output buffer matches requested size");
    u64::from_be_bytes(out)
}

/// A day expressed the way the hashing layer needs it: an ISO string (for the HMAC
/// message, to match the reference implementation byte-for-byte) and a proleptic
/// Gregorian ordinal (day 1 = 0001-01-01), used for epoch arithmetic.
///
/// Kept dependency-free here (no `chrono` in this crate) so `dpdau-core` constructs
/// it once from a `chrono::NaiveDate` and passes it down.
pub mod chrono_like {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Ordinal {
        pub iso: String,
        pub ordinal: i64,
    }

    impl Ordinal {
        pub fn new(iso: impl Into<String>, ordinal: i64) -> Self {
            Self { iso: iso.into(), ordinal }
        }
    }
}
