use num_derive::{FromPrimitive, ToPrimitive};

// see: https://dev.mysql.com/doc/dev/mysql-server/latest/page_protocol_basic_packets.html
// max packet payload length; larger payloads are split into continuation packets.
pub const MAX_PAYLOAD_LEN: usize = 16_777_215;

pub const PACKET_HEADER_LEN: usize = 4;

/// auth-plugin-data-part-1: the first 8 bytes of the scramble.
pub const AUTH_PLUGIN_DATA_PART_1_LENGTH: usize = 8;
/// Full scramble length (part-1 + part-2).
pub const SCRAMBLE_SIZE: usize = 20;

pub const SERVER_VERSION: &[u8] = b"8.0.36-veritaserum";
pub const AUTH_PLUGIN_NAME: &[u8] = b"mysql_native_password";

/// utf8_general_ci, the charset every synthesized column advertises.
pub const UTF8_GENERAL_CI: u8 = 0x21;

pub const OK_HEADER: u8 = 0x00;
pub const EOF_HEADER: u8 = 0xfe;
pub const ERR_HEADER: u8 = 0xff;
/// NULL cell sentinel inside a text result-set row.
pub const NULL_CELL: u8 = 0xfb;

/// ER_PARSE_ERROR, reused for an unknown prepared-statement id. The only
/// protocol-level error this server ever emits.
pub const ERR_UNKNOWN_STMT: u16 = 1064;
pub const SQL_STATE_SYNTAX: &[u8; 5] = b"42000";

#[derive(Debug, PartialEq, Eq, Clone, Copy, FromPrimitive, ToPrimitive)]
#[repr(u8)]
pub enum CommandCode {
    ComQuit = 0x01,
    ComInitDb = 0x02,
    ComQuery = 0x03,
    ComPing = 0x0e,
    ComStmtPrepare = 0x16,
    ComStmtExecute = 0x17,
    ComStmtClose = 0x19,
}
