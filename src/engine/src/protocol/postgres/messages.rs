//! Backend message builders for the v3 wire protocol. Framing is uniform:
//! 1-byte tag, big-endian i32 length including itself, payload.

use crate::protocol::postgres::TEXT_OID;

fn framed(tag: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 5);
    out.push(tag);
    out.extend_from_slice(&(payload.len() as i32 + 4).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// `AuthenticationOk`. Trust everyone, there is nothing to protect.
pub fn authentication_ok() -> Vec<u8> {
    framed(b'R', &0i32.to_be_bytes())
}

/// `ReadyForQuery` in the idle state; no transaction tracking.
pub fn ready_for_query() -> Vec<u8> {
    framed(b'Z', b"I")
}

/// `RowDescription` declaring each field as variable-length `text`.
pub fn row_description(fields: &[String]) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&(fields.len() as i16).to_be_bytes());
    for name in fields {
        payload.extend_from_slice(name.as_bytes());
        payload.push(0);
        payload.extend_from_slice(&0i32.to_be_bytes()); // table oid
        payload.extend_from_slice(&0i16.to_be_bytes()); // attribute number
        payload.extend_from_slice(&TEXT_OID.to_be_bytes());
        payload.extend_from_slice(&(-1i16).to_be_bytes()); // variable length
        payload.extend_from_slice(&(-1i32).to_be_bytes()); // type modifier
        payload.extend_from_slice(&0i16.to_be_bytes()); // text format
    }
    framed(b'T', &payload)
}

/// `DataRow`; a `None` cell goes out as the -1 NULL length.
pub fn data_row(cells: &[Option<String>]) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&(cells.len() as i16).to_be_bytes());
    for cell in cells {
        match cell {
            Some(text) => {
                payload.extend_from_slice(&(text.len() as i32).to_be_bytes());
                payload.extend_from_slice(text.as_bytes());
            }
            None => payload.extend_from_slice(&(-1i32).to_be_bytes()),
        }
    }
    framed(b'D', &payload)
}

/// `CommandComplete` with the given tag, e.g. `SELECT 2`.
pub fn command_complete(tag: &str) -> Vec<u8> {
    let mut payload = Vec::with_capacity(tag.len() + 1);
    payload.extend_from_slice(tag.as_bytes());
    payload.push(0);
    framed(b'C', &payload)
}
