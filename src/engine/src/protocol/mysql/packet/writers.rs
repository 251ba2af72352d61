use crate::protocol::mysql::constants::{
    AUTH_PLUGIN_DATA_PART_1_LENGTH, AUTH_PLUGIN_NAME, EOF_HEADER, ERR_HEADER, NULL_CELL,
    OK_HEADER, SCRAMBLE_SIZE, SERVER_VERSION, UTF8_GENERAL_CI,
};
use crate::protocol::mysql::packet::packet_writer::PacketWriter;

use byteorder::{LittleEndian, WriteBytesExt};
use mysql_common::constants::{CapabilityFlags, ColumnType, StatusFlags};
use mysql_common::io::WriteMysqlExt;
use std::io::{self, Write};
use tokio::io::AsyncWrite;

pub async fn write_ok_packet<W: AsyncWrite + Unpin>(
    w: &mut PacketWriter<W>,
    affected_rows: u64,
    last_insert_id: u64,
    status: StatusFlags,
) -> io::Result<()> {
    w.write_u8(OK_HEADER)?;
    w.write_lenenc_int(affected_rows)?;
    w.write_lenenc_int(last_insert_id)?;
    w.write_u16::<LittleEndian>(status.bits())?;
    w.write_all(&[0x00, 0x00])?; // no warnings
    w.end_packet().await
}

pub async fn write_eof_packet<W: AsyncWrite + Unpin>(
    w: &mut PacketWriter<W>,
    status: StatusFlags,
) -> io::Result<()> {
    w.write_all(&[EOF_HEADER, 0x00, 0x00])?;
    w.write_u16::<LittleEndian>(status.bits())?;
    w.end_packet().await
}

pub async fn write_err_packet<W: AsyncWrite + Unpin>(
    w: &mut PacketWriter<W>,
    code: u16,
    sql_state: &[u8; 5],
    msg: &[u8],
) -> io::Result<()> {
    w.write_u8(ERR_HEADER)?;
    w.write_u16::<LittleEndian>(code)?;
    w.write_u8(b'#')?;
    w.write_all(sql_state)?;
    w.write_all(msg)?;
    w.end_packet().await
}

/// Server-first protocol-10 handshake. Only `CLIENT_PROTOCOL_41` and
/// `CLIENT_SECURE_CONNECTION` are advertised; the upper capability bytes
/// stay zero.
pub async fn write_initial_handshake<W: AsyncWrite + Unpin>(
    writer: &mut PacketWriter<W>,
    conn_id: u32,
    scramble: &[u8; SCRAMBLE_SIZE],
) -> io::Result<()> {
    writer.write_u8(10)?; // protocol 10
    writer.write_all(SERVER_VERSION)?;
    writer.write_u8(0x00)?;
    writer.write_u32::<LittleEndian>(conn_id)?;
    writer.write_all(&scramble[..AUTH_PLUGIN_DATA_PART_1_LENGTH])?; // auth-plugin-data-part-1
    writer.write_u8(0x00)?; // filler

    let capabilities =
        CapabilityFlags::CLIENT_PROTOCOL_41 | CapabilityFlags::CLIENT_SECURE_CONNECTION;
    let capability_bytes = capabilities.bits().to_le_bytes();
    writer.write_all(&capability_bytes[..2])?; // lower capability flags

    writer.write_u8(UTF8_GENERAL_CI)?;
    writer.write_u16::<LittleEndian>(StatusFlags::SERVER_STATUS_AUTOCOMMIT.bits())?;
    writer.write_all(&[0x00, 0x00])?; // upper capability flags
    writer.write_u8((SCRAMBLE_SIZE + 1) as u8)?; // auth-plugin-data length, 21
    writer.write_all(&[0x00; 10][..])?; // 10 bytes reserved
    writer.write_all(&scramble[AUTH_PLUGIN_DATA_PART_1_LENGTH..])?; // part-2, 12 bytes
    writer.write_u8(0x00)?; // 13th part-2 byte
    writer.write_all(AUTH_PLUGIN_NAME)?;
    writer.write_u8(0x00)?;
    writer.end_packet().await?;
    writer.flush_all().await
}

/// Column definition for ColumnDefinition41 clients. Every synthesized
/// column is a VAR_STRING with zero length and flags; clients only need the
/// name to label the cell.
pub async fn write_column_definition<W: AsyncWrite + Unpin>(
    w: &mut PacketWriter<W>,
    name: &str,
) -> io::Result<()> {
    w.write_lenenc_str(b"def")?; // catalog
    w.write_lenenc_str(b"")?; // schema
    w.write_lenenc_str(b"")?; // table
    w.write_lenenc_str(b"")?; // org_table
    w.write_lenenc_str(name.as_bytes())?;
    w.write_lenenc_str(name.as_bytes())?; // org_name
    w.write_u8(0x0c)?; // length of fixed fields
    w.write_u16::<LittleEndian>(UTF8_GENERAL_CI as u16)?;
    w.write_u32::<LittleEndian>(0)?; // column length
    w.write_u8(ColumnType::MYSQL_TYPE_VAR_STRING as u8)?;
    w.write_u16::<LittleEndian>(0)?; // flags
    w.write_u8(0x00)?; // decimals
    w.write_all(&[0x00, 0x00])?; // filler
    w.end_packet().await
}

pub async fn write_prepare_ok<W: AsyncWrite + Unpin>(
    w: &mut PacketWriter<W>,
    statement_id: u32,
    num_params: u16,
) -> io::Result<()> {
    w.write_u8(OK_HEADER)?;
    w.write_u32::<LittleEndian>(statement_id)?;
    w.write_u16::<LittleEndian>(0)?; // num_columns
    w.write_u16::<LittleEndian>(num_params)?;
    w.write_u8(0x00)?; // reserved
    w.write_u16::<LittleEndian>(0)?; // warning count
    w.end_packet().await?;

    if num_params > 0 {
        for _ in 0..num_params {
            write_column_definition(w, "?").await?;
        }
        write_eof_packet(w, StatusFlags::SERVER_STATUS_AUTOCOMMIT).await?;
    }
    Ok(())
}

/// Text result set: lenenc column count, column definitions, EOF, one packet
/// per row (NULL cells as 0xfb), final EOF.
pub async fn write_result_set<W: AsyncWrite + Unpin>(
    w: &mut PacketWriter<W>,
    columns: &[String],
    rows: &[Vec<Option<String>>],
) -> io::Result<()> {
    w.write_lenenc_int(columns.len() as u64)?;
    w.end_packet().await?;
    for column in columns {
        write_column_definition(w, column).await?;
    }
    write_eof_packet(w, StatusFlags::SERVER_STATUS_AUTOCOMMIT).await?;
    for row in rows {
        for cell in row {
            match cell {
                Some(text) => {
                    w.write_lenenc_str(text.as_bytes())?;
                }
                None => {
                    w.write_u8(NULL_CELL)?;
                }
            }
        }
        w.end_packet().await?;
    }
    write_eof_packet(w, StatusFlags::SERVER_STATUS_AUTOCOMMIT).await
}
