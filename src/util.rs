use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::CanonicalError;

const HEX: &[u8; 16] = b"0123456789abcdef";

/// 64-bit mixer (splitmix64 finalizer), used to derive stable hashes for
/// cache keys and sticky routing without pulling in a general-purpose
/// hashing crate.
#[inline]
pub(crate) fn mix_u64(mut x: u64) -> u64 {
    x ^= x >> 30;
    x = x.wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x ^= x >> 27;
    x = x.wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

/// Stable, non-cryptographic hash over arbitrary bytes. Used for
/// provider-config cache keys and prompt-cache exact-match keys.
#[must_use]
pub fn bytes_hash(bytes: &[u8]) -> u64 {
    const HASH_SEED: u64 = 0x9e37_79b9_7f4a_7c15;
    let mut hash = mix_u64((bytes.len() as u64) ^ HASH_SEED);
    for chunk in bytes.chunks(8) {
        let mut buf = [0u8; 8];
        buf[..chunk.len()].copy_from_slice(chunk);
        hash ^= mix_u64(u64::from_le_bytes(buf));
    }
    mix_u64(hash)
}

#[must_use]
pub fn str_hash(s: &str) -> u64 {
    bytes_hash(s.as_bytes())
}

#[inline]
#[must_use]
pub fn unix_now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_secs())
}

#[inline]
#[must_use]
pub fn unix_now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_millis() as u64)
}

static REQUEST_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Monotonic per-process request sequence number, used for log correlation.
#[must_use]
pub fn next_request_seq() -> u64 {
    REQUEST_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

#[inline]
fn push_u64_hex_16(out: &mut String, mut value: u64) {
    let mut buf = [b'0'; 16];
    let mut idx = 16;
    while idx > 0 {
        idx -= 1;
        let nibble = usize::try_from(value & 0x0f).unwrap_or(0);
        buf[idx] = HEX[nibble];
        value >>= 4;
    }
    for byte in buf {
        out.push(char::from(byte));
    }
}

/// Generate a synthetic identifier of the form `{prefix}-{16 hex digits}`,
/// used for cached/replayed responses that never had a real upstream id.
#[must_use]
pub fn synthetic_id(prefix: &str) -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    let id = COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut out = String::with_capacity(prefix.len() + 17);
    out.push_str(prefix);
    out.push('-');
    push_u64_hex_16(&mut out, id);
    out
}

/// Parses a tool-call argument string into a [`serde_json::value::RawValue`],
/// so downstream re-encoding never has to re-serialize through a typed
/// `Value`. `context` names the field being decoded, for the error message.
///
/// # Errors
///
/// Returns [`CanonicalError::Translation`] when `raw` is not valid JSON.
pub fn raw_value_from_string(raw: String, context: &str) -> Result<Box<serde_json::value::RawValue>, CanonicalError> {
    serde_json::value::RawValue::from_string(raw)
        .map_err(|err| CanonicalError::Translation(format!("{context} arguments are not valid JSON: {err}")))
}

/// Generates a monotonic, provider-shaped synthetic id (`{prefix}_{seq}`)
/// for responses that never had a real upstream id to decode (cached
/// replays, provider omissions).
#[must_use]
pub fn next_generated_id(prefix: &str, counter: &AtomicU64) -> String {
    let seq = counter.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}_{seq:016x}")
}

#[inline]
pub(crate) fn push_json_string_escaped(out: &mut String, value: &str) {
    let bytes = value.as_bytes();
    if bytes.iter().all(|&b| b >= 0x20 && b != b'"' && b != b'\\') {
        out.push('"');
        out.push_str(value);
        out.push('"');
        return;
    }

    out.push('"');
    for ch in value.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            c if c <= '\u{1f}' => {
                let control = c as u8;
                out.push_str("\\u00");
                out.push(char::from(HEX[(control >> 4) as usize]));
                out.push(char::from(HEX[(control & 0x0f) as usize]));
            }
            _ => out.push(ch),
        }
    }
    out.push('"');
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_hash_is_deterministic() {
        assert_eq!(bytes_hash(b"hello"), bytes_hash(b"hello"));
        assert_ne!(bytes_hash(b"hello"), bytes_hash(b"hellp"));
    }

    #[test]
    fn synthetic_id_has_prefix_and_is_unique() {
        let a = synthetic_id("msg");
        let b = synthetic_id("msg");
        assert!(a.starts_with("msg-"));
        assert_ne!(a, b);
    }

    #[test]
    fn push_json_string_escaped_handles_control_chars() {
        let mut out = String::new();
        push_json_string_escaped(&mut out, "a\"b\nc");
        assert_eq!(out, "\"a\\\"b\\nc\"");
    }
}
