//! 802.11 information element parsing.

use std::collections::BTreeMap;

use crate::error::Result;

/// Element ID to raw payload.
pub type InformationElements = BTreeMap<u8, Vec<u8>>;

/// Parse a hex-encoded sequence of information elements.
///
/// See [`parse_ie_bytes`] for how malformed input is handled.
pub fn parse_ie(hex_buf: &str) -> Result<InformationElements> {
    let data = hex::decode(hex_buf.trim())?;
    Ok(parse_ie_bytes(&data))
}

/// Parse consecutive `(id, len, payload)` elements.
///
/// Parsing stops silently at a record whose length runs past the end of the
/// buffer or when fewer than two header bytes remain. A repeated element ID
/// keeps the last payload seen.
pub fn parse_ie_bytes(mut data: &[u8]) -> InformationElements {
    let mut ret = InformationElements::new();
    while let [id, len, rest @ ..] = data {
        let len = *len as usize;
        if len > rest.len() {
            break;
        }
        let (payload, tail) = rest.split_at(len);
        ret.insert(*id, payload.to_vec());
        data = tail;
    }
    ret
}
