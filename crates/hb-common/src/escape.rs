//! Filesystem-safe names for per-symlink stack directories.

use std::hash::Hasher;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use siphasher::sip::SipHasher24;

/// Linux NAME_MAX.
const NAME_MAX: usize = 255;

// Fixed SipHash-2-4 key. Must never change: hashed directory names are
// part of the on-disk contract across restarts.
const HASH_KEY_0: u64 = 0x3f76_21b3_9c5e_a8d1;
const HASH_KEY_1: u64 = 0x84c1_0d2a_57ee_49f6;

/// Escape a symlink path into a single directory-entry name.
///
/// The `/dev/` prefix is stripped, `/` becomes `\x2f` and `\` becomes
/// `\x5c`; every other byte is passed through verbatim. If the escaped
/// form would not fit in NAME_MAX, it is truncated and suffixed with 11
/// base64url characters of a SipHash-2-4 digest of the full path, which
/// keeps the name unique and bounded.
pub fn escape_link_name(slink: &str) -> String {
    let name = slink.strip_prefix("/dev/").unwrap_or(slink);

    let mut escaped = String::with_capacity(name.len());
    for c in name.chars() {
        match c {
            '/' => escaped.push_str("\\x2f"),
            '\\' => escaped.push_str("\\x5c"),
            c => escaped.push(c),
        }
    }

    if escaped.len() > NAME_MAX {
        let mut hasher = SipHasher24::new_with_keys(HASH_KEY_0, HASH_KEY_1);
        hasher.write(slink.as_bytes());
        // 8 digest bytes encode to exactly 11 base64url characters.
        let tag = URL_SAFE_NO_PAD.encode(hasher.finish().to_be_bytes());

        let mut cut = NAME_MAX - tag.len() - 1;
        while !escaped.is_char_boundary(cut) {
            cut -= 1;
        }
        escaped.truncate(cut);
        escaped.push('@');
        escaped.push_str(&tag);
    }

    escaped
}
