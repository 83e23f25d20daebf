//! Terminal output sanitation.
//!
//! Interactive targets repaint their screen with CSI escape sequences
//! (cursor movement, colors, erase). Assertions want the text underneath,
//! so captured output is stripped before anything looks at it.

use std::borrow::Cow;

use once_cell::sync::Lazy;
use regex::Regex;

/// CSI escape sequences: ESC '[' followed by parameter bytes and a final
/// letter. Parameter bytes may be empty, as in the bare reset `ESC[m`.
static CSI: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\x1b\[[0-9;]*[A-Za-z]").unwrap()
});

/// Remove all CSI escape sequences from `input`.
///
/// Matching operates on ASCII bytes only, so multi-byte characters adjacent
/// to a sequence come through intact. Stripping already-stripped text is a
/// no-op.
pub fn strip_csi(input: &str) -> Cow<'_, str> {
    CSI.replace_all(input, "")
}

/// Decode raw terminal bytes (lossily) and strip CSI sequences.
pub fn sanitize_bytes(bytes: &[u8]) -> String {
    strip_csi(&String::from_utf8_lossy(bytes)).into_owned()
}
