use crate::protocol::mysql::constants::CommandCode as ComInfo;

use winnow::binary::le_u32;
use winnow::combinator::{alt, preceded, rest};
use winnow::prelude::*;
use winnow::token::literal;
use winnow::{Parser, Partial};

/// Decoded command-phase packet. Only the commands the engine answers are
/// parsed; anything else falls out as a parse error and gets a bare OK.
#[derive(Debug, PartialEq, Eq)]
pub enum Command<'a> {
    Query(&'a [u8]),
    Prepare(&'a [u8]),
    Execute { stmt: u32 },
    Close(u32),
    Init(&'a [u8]),
    Ping,
    Quit,
}

fn execute(i: Partial<&[u8]>) -> IResult<Partial<&[u8]>, Command<'_>> {
    // statement id is the first 4 payload bytes; flags, iteration count and
    // bound parameters behind it are ignored; the SQL text alone is the key.
    let (remaining, stmt) = le_u32.parse_peek(i)?;
    Ok((remaining, Command::Execute { stmt }))
}

pub fn from_packet(pkt: &[u8]) -> IResult<Partial<&[u8]>, Command<'_>> {
    alt((
        preceded(literal([ComInfo::ComQuery as u8]), rest).map(Command::Query),
        preceded(literal([ComInfo::ComStmtPrepare as u8]), rest).map(Command::Prepare),
        preceded(
            literal([ComInfo::ComStmtExecute as u8]),
            winnow::unpeek(execute),
        ),
        preceded(literal([ComInfo::ComStmtClose as u8]), le_u32).map(Command::Close),
        preceded(literal([ComInfo::ComInitDb as u8]), rest).map(Command::Init),
        literal([ComInfo::ComPing as u8]).map(|_| Command::Ping),
        literal([ComInfo::ComQuit as u8]).map(|_| Command::Quit),
    ))
    .parse_peek(Partial::new(pkt))
}

/// `?` occurrences in the statement text, reported back as num_params in the
/// prepare reply.
pub fn count_params(sql: &str) -> u16 {
    sql.bytes().filter(|byte| *byte == b'?').count() as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_com_query() {
        let mut payload = vec![0x03];
        payload.extend_from_slice(b"SELECT 1");
        let (_, command) = from_packet(&payload).unwrap();
        assert_eq!(command, Command::Query(&b"SELECT 1"[..]));
    }

    #[test]
    fn parses_stmt_execute_id() {
        let payload = [0x17, 0x05, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00];
        let (_, command) = from_packet(&payload).unwrap();
        assert_eq!(command, Command::Execute { stmt: 5 });
    }

    #[test]
    fn parses_stmt_close_and_quit() {
        let (_, close) = from_packet(&[0x19, 0x02, 0x00, 0x00, 0x00]).unwrap();
        assert_eq!(close, Command::Close(2));
        let (_, quit) = from_packet(&[0x01]).unwrap();
        assert_eq!(quit, Command::Quit);
    }

    #[test]
    fn unknown_command_does_not_parse() {
        assert!(from_packet(&[0x1f, 0x00]).is_err());
    }

    #[test]
    fn placeholder_count() {
        assert_eq!(count_params("SELECT * FROM t WHERE id = ?"), 1);
        assert_eq!(count_params("INSERT INTO t VALUES (?, ?, ?)"), 3);
        assert_eq!(count_params("SELECT 1"), 0);
    }
}
