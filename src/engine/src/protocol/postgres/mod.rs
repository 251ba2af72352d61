pub mod messages;

/// Frontend message tags the engine understands. Anything else closes the
/// connection.
pub const MSG_QUERY: u8 = b'Q';
pub const MSG_TERMINATE: u8 = b'X';

/// Every synthesized column is declared as `text`.
pub const TEXT_OID: i32 = 25;

/// Startup messages outside this window are framing garbage, not a client.
pub const MAX_STARTUP_LEN: i32 = 16384;
