//! Topic name <-> directory name codec.
//!
//! Topic strings are arbitrary Unicode, which no filesystem accepts verbatim.
//! A topic's directory is named with the uppercase hexadecimal expansion of
//! the topic's UTF-8 bytes: no padding, no delimiters. Decoding is strict so
//! that foreign directories in the topic root are ignored rather than
//! misread.
//!
//! Topic names are compared byte-for-byte. `"café"` in composed and
//! decomposed form are two distinct topics; the codec performs no Unicode
//! normalization on purpose.

use std::fmt::Write;

/// Encodes a topic string into its on-disk directory name.
pub fn encode_topic(topic: &str) -> String {
    let mut out = String::with_capacity(topic.len() * 2);
    for byte in topic.as_bytes() {
        // infallible: writing to a String cannot fail
        let _ = write!(out, "{byte:02X}");
    }
    out
}

/// Decodes a directory name back into a topic string.
///
/// Accepts only an even number of hexadecimal digits, at least two, whose
/// bytes form valid UTF-8. Returns `None` for anything else; the caller
/// skips the directory.
pub fn decode_topic(name: &str) -> Option<String> {
    if name.len() < 2 || name.len() % 2 != 0 {
        return None;
    }
    if !name.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }

    let mut bytes = Vec::with_capacity(name.len() / 2);
    for chunk in name.as_bytes().chunks_exact(2) {
        // chunk is two ASCII hex digits, checked above
        let hex = std::str::from_utf8(chunk).ok()?;
        bytes.push(u8::from_str_radix(hex, 16).ok()?);
    }

    String::from_utf8(bytes).ok()
}

/// Whether a directory name is even a candidate for decoding.
///
/// Matches the `[0-9A-Fa-f]{2,}` filter applied when scanning the topic
/// root; directories failing it are not reported as corrupt, just skipped.
pub fn is_encoded_name(name: &str) -> bool {
    name.len() >= 2 && name.bytes().all(|b| b.is_ascii_hexdigit())
}
