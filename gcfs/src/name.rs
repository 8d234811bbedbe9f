//! File and directory names
//!
//! Names are stored in the string table as NUL-terminated Shift-JIS.

use crate::error::{Error, Result};
use encoding_rs::SHIFT_JIS;

/// Longest encoded name accepted, excluding the terminator.
pub const MAX_NAME_LEN: usize = 0x1FF;

/// Encode and validate a name for the string table.
pub fn encode_name(name: &str) -> Result<Vec<u8>> {
    let invalid = |reason| Error::Name {
        name: name.to_string(),
        reason,
    };
    if name.is_empty() {
        return Err(invalid("name is empty"));
    }
    if name == "." || name == ".." {
        return Err(invalid("name is reserved"));
    }
    if name.contains('\0') {
        return Err(invalid("name contains a NUL character"));
    }
    if name.contains('/') {
        return Err(invalid("name contains '/'"));
    }
    let (encoded, _, had_errors) = SHIFT_JIS.encode(name);
    if had_errors {
        return Err(invalid("name cannot be encoded as Shift-JIS"));
    }
    if encoded.len() > MAX_NAME_LEN {
        return Err(invalid("name is too long"));
    }
    Ok(encoded.into_owned())
}

/// Decode a name read from the string table; `offset` is where it was found.
pub fn decode_name(raw: &[u8], offset: u64) -> Result<String> {
    let (decoded, had_errors) = SHIFT_JIS.decode_without_bom_handling(raw);
    if had_errors {
        return Err(Error::format(offset, "name is not valid Shift-JIS"));
    }
    Ok(decoded.into_owned())
}

/// Lossy decoding for free-form text such as banner descriptions.
pub fn decode_text(raw: &[u8]) -> String {
    SHIFT_JIS.decode_without_bom_handling(raw).0.into_owned()
}

/// Ordering key used when placing new entries in a directory.
pub fn sort_key(name: &str) -> String {
    name.to_uppercase()
}
