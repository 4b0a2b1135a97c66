//! Deterministic mapping from a caller-supplied identifier to a cache path.

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::{Error, Result};

/// Maximum length, in bytes, of a mangled cache file basename.
const MAX_BASENAME_LEN: usize = 254;

/// Characters replaced with `#` when mangling is requested.
///
/// Mirrors the set used by the original file-locking cache this crate is
/// modelled on: angle brackets, equals, comma, path separators, parens,
/// backslash, quotes, colon, question mark, square brackets, dollar, space.
const RESERVED_CHARS: [char; 16] = [
    '<', '>', '=', ',', '/', '(', ')', '\\', '"', '\'', ':', '?', '[', ']', '$', ' ',
];

/// Builds the absolute cache file path for `id` under `directory` with
/// `prefix` prepended, replacing reserved characters with `#` when `mangle`
/// is `true`.
///
/// Mangling is deterministic and idempotent: mangling an already-mangled
/// basename is a no-op, since the reserved character set never appears in
/// the output.
///
/// # Errors
///
/// Returns [`Error::NameTooLong`] if the resulting basename exceeds 254
/// bytes.
pub fn cache_file_name(
    directory: &Utf8Path,
    prefix: &str,
    id: &str,
    mangle: bool,
) -> Result<Utf8PathBuf> {
    let mut target = format!("{prefix}{id}");

    if mangle {
        target = target
            .chars()
            .map(|c| if RESERVED_CHARS.contains(&c) { '#' } else { c })
            .collect();
    }

    if target.len() > MAX_BASENAME_LEN {
        return Err(Error::NameTooLong(target));
    }

    Ok(directory.join(target))
}

/// Basename of the control file for a given prefix.
pub(crate) fn control_file_name(prefix: &str) -> String {
    format!("{prefix}cache_control")
}
