//! Minimal RESP codec: array-of-bulk-strings and inline commands in,
//! simple/bulk/null-bulk strings out.

use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

/// One decoded client command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RespCommand {
    /// Uppercased command name.
    pub command: String,
    pub args: Vec<String>,
}

/// Reads one command in either wire form. `None` on a clean EOF; malformed
/// framing surfaces as `InvalidData` and the caller closes the connection.
pub async fn read_command<R>(reader: &mut R) -> io::Result<Option<RespCommand>>
where
    R: AsyncBufRead + Unpin,
{
    let Some(line) = read_line(reader).await? else {
        return Ok(None);
    };
    if line.is_empty() {
        return Ok(None);
    }
    if let Some(count_text) = line.strip_prefix('*') {
        let count: i64 = count_text
            .parse()
            .map_err(|_| bad_frame(format!("bad array header {line:?}")))?;
        let mut parts = Vec::new();
        for _ in 0..count.max(0) {
            parts.push(read_bulk(reader).await?);
        }
        let mut parts = parts.into_iter();
        let Some(command) = parts.next() else {
            return Ok(None);
        };
        Ok(Some(RespCommand {
            command: command.to_uppercase(),
            args: parts.collect(),
        }))
    } else {
        let mut words = line.split_whitespace().map(str::to_string);
        let Some(command) = words.next() else {
            return Ok(None);
        };
        Ok(Some(RespCommand {
            command: command.to_uppercase(),
            args: words.collect(),
        }))
    }
}

async fn read_bulk<R>(reader: &mut R) -> io::Result<String>
where
    R: AsyncBufRead + Unpin,
{
    let line = read_line(reader).await?.ok_or_else(|| {
        io::Error::new(io::ErrorKind::UnexpectedEof, "array ended mid-command")
    })?;
    let len_text = line
        .strip_prefix('$')
        .ok_or_else(|| bad_frame(format!("expected bulk string, got {line:?}")))?;
    let len: usize = len_text
        .parse()
        .map_err(|_| bad_frame(format!("bad bulk length {len_text:?}")))?;
    let mut buf = vec![0u8; len + 2]; // payload + trailing \r\n
    reader.read_exact(&mut buf).await?;
    buf.truncate(len);
    String::from_utf8(buf).map_err(|_| bad_frame("bulk string is not utf-8".to_string()))
}

async fn read_line<R>(reader: &mut R) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut raw = Vec::new();
    let read = reader.read_until(b'\n', &mut raw).await?;
    if read == 0 {
        return Ok(None);
    }
    while matches!(raw.last(), Some(b'\n') | Some(b'\r')) {
        raw.pop();
    }
    String::from_utf8(raw)
        .map(Some)
        .map_err(|_| bad_frame("command line is not utf-8".to_string()))
}

fn bad_frame(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

pub fn simple_string(value: &str) -> Vec<u8> {
    format!("+{value}\r\n").into_bytes()
}

pub fn bulk_string(value: &str) -> Vec<u8> {
    format!("${}\r\n{}\r\n", value.len(), value).into_bytes()
}

pub fn null_bulk() -> &'static [u8] {
    b"$-1\r\n"
}
