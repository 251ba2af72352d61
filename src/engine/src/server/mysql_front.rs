//! MySQL front-end: server-first handshake, a discarded auth exchange, then
//! a command loop that answers from the capture store. Prepared statements
//! are mapped back to their SQL text and dispatched like plain queries.

use crate::protocol::mysql::basic::{self, Command};
use crate::protocol::mysql::constants::{
    ERR_UNKNOWN_STMT, SCRAMBLE_SIZE, SQL_STATE_SYNTAX,
};
use crate::protocol::mysql::packet::packet_reader::PacketReader;
use crate::protocol::mysql::packet::packet_writer::PacketWriter;
use crate::protocol::mysql::packet::writers;
use crate::store::model::{self, Protocol, RequestSnapshot, ResponseSpec};
use crate::store::CaptureStore;

use hashbrown::HashMap;
use mysql_common::constants::StatusFlags;
use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::warn;

static CONN_ID: AtomicU32 = AtomicU32::new(1);

/// Fixed handshake scramble. Nothing is ever verified against it, so a
/// stable value keeps sessions reproducible; NUL and `$` would confuse some
/// connectors and are avoided.
fn default_scramble() -> [u8; SCRAMBLE_SIZE] {
    let bytes = b"veritaserum/scramble";
    let mut scramble = [0u8; SCRAMBLE_SIZE];
    scramble.copy_from_slice(bytes);
    scramble
}

/// Prepared statements live and die with their connection.
struct SessionState {
    statements: HashMap<u32, String>,
    next_stmt_id: u32,
}

impl SessionState {
    fn new() -> Self {
        Self {
            statements: HashMap::new(),
            next_stmt_id: 1,
        }
    }
}

pub async fn handle_conn(stream: TcpStream, store: Arc<CaptureStore>) -> io::Result<()> {
    let (read_half, write_half) = stream.into_split();
    run_session(read_half, write_half, store).await
}

/// Split out of [`handle_conn`] so tests can drive a session over in-memory
/// pipes.
pub async fn run_session<R, W>(reader: R, writer: W, store: Arc<CaptureStore>) -> io::Result<()>
where
    R: AsyncRead + Send + Unpin,
    W: AsyncWrite + Send + Unpin,
{
    let mut reader = PacketReader::new(reader);
    let mut writer = PacketWriter::new(writer);

    let conn_id = CONN_ID.fetch_add(1, Ordering::Relaxed);
    writers::write_initial_handshake(&mut writer, conn_id, &default_scramble()).await?;

    // The HandshakeResponse is consumed and discarded: no auth challenge
    // validation, every client is welcome.
    let Some((seq, _handshake_response)) = reader.next_async().await? else {
        return Ok(());
    };
    writer.set_seq(seq.wrapping_add(1));
    writers::write_ok_packet(&mut writer, 0, 0, StatusFlags::SERVER_STATUS_AUTOCOMMIT).await?;
    writer.flush_all().await?;

    let mut session = SessionState::new();
    while let Some((seq, packet)) = reader.next_async().await? {
        writer.set_seq(seq.wrapping_add(1));
        let _dispatch_timer = crate::server::dispatch_timer(Protocol::Mysql);
        match basic::from_packet(&packet) {
            Ok((_, Command::Query(query))) => {
                let sql = String::from_utf8_lossy(query).to_string();
                answer_query(&mut writer, &store, &sql).await?;
            }
            Ok((_, Command::Prepare(statement))) => {
                let sql = String::from_utf8_lossy(statement).to_string();
                let statement_id = session.next_stmt_id;
                session.next_stmt_id += 1;
                session.statements.insert(statement_id, sql.clone());
                writers::write_prepare_ok(&mut writer, statement_id, basic::count_params(&sql))
                    .await?;
            }
            Ok((_, Command::Execute { stmt })) => match session.statements.get(&stmt) {
                Some(sql) => {
                    let sql = sql.clone();
                    answer_query(&mut writer, &store, &sql).await?;
                }
                None => {
                    writers::write_err_packet(
                        &mut writer,
                        ERR_UNKNOWN_STMT,
                        SQL_STATE_SYNTAX,
                        format!("Unknown prepared statement id {stmt}").as_bytes(),
                    )
                    .await?;
                }
            },
            Ok((_, Command::Close(stmt))) => {
                session.statements.remove(&stmt);
                // COM_STMT_CLOSE expects no reply
                continue;
            }
            Ok((_, Command::Init(_))) | Ok((_, Command::Ping)) => {
                writers::write_ok_packet(&mut writer, 0, 0, StatusFlags::SERVER_STATUS_AUTOCOMMIT)
                    .await?;
            }
            Ok((_, Command::Quit)) => break,
            Err(_) => {
                // unrecognized command byte: a bare OK keeps connectors alive
                writers::write_ok_packet(&mut writer, 0, 0, StatusFlags::SERVER_STATUS_AUTOCOMMIT)
                    .await?;
            }
        }
        writer.flush_all().await?;
    }
    Ok(())
}

async fn answer_query<W>(
    writer: &mut PacketWriter<W>,
    store: &CaptureStore,
    sql: &str,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let key = model::sql_key(Protocol::Mysql, sql);
    let Some(interaction) = store.lookup_configured(Protocol::Mysql, &key) else {
        store.register(
            Protocol::Mysql,
            key,
            RequestSnapshot::Sql {
                query: sql.to_string(),
            },
        );
        return writers::write_ok_packet(writer, 0, 0, StatusFlags::SERVER_STATUS_AUTOCOMMIT)
            .await;
    };

    match interaction.response {
        Some(ResponseSpec::Sql {
            rows: Some(rows), ..
        }) if !rows.is_empty() => {
            let columns: Vec<String> = rows[0].keys().cloned().collect();
            let table: Vec<Vec<Option<String>>> = rows
                .iter()
                .map(|row| {
                    columns
                        .iter()
                        .map(|column| row.get(column).and_then(model::cell_text))
                        .collect()
                })
                .collect();
            writers::write_result_set(writer, &columns, &table).await
        }
        Some(ResponseSpec::Sql { affected_rows, .. }) => {
            writers::write_ok_packet(
                writer,
                affected_rows.unwrap_or(0),
                0,
                StatusFlags::SERVER_STATUS_AUTOCOMMIT,
            )
            .await
        }
        ref other => {
            warn!("interaction {} carries a non-SQL response {other:?}; replying with an empty result", interaction.id);
            writers::write_ok_packet(writer, 0, 0, StatusFlags::SERVER_STATUS_AUTOCOMMIT).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::mysql::constants::{EOF_HEADER, ERR_HEADER, OK_HEADER};
    use serde_json::json;
    use tokio::io::{duplex, DuplexStream, ReadHalf, WriteHalf};

    struct TestClient {
        reader: PacketReader<ReadHalf<DuplexStream>>,
        writer: PacketWriter<WriteHalf<DuplexStream>>,
    }

    async fn connect(store: Arc<CaptureStore>) -> TestClient {
        let (client_side, server_side) = duplex(1 << 20);
        let (server_read, server_write) = tokio::io::split(server_side);
        tokio::spawn(async move {
            let _ = run_session(server_read, server_write, store).await;
        });
        let (client_read, client_write) = tokio::io::split(client_side);
        let mut client = TestClient {
            reader: PacketReader::new(client_read),
            writer: PacketWriter::new(client_write),
        };
        // swallow the handshake, answer with an empty HandshakeResponse
        let (seq, handshake) = client.reader.next_async().await.unwrap().unwrap();
        assert_eq!(handshake[0], 10);
        client.writer.set_seq(seq.wrapping_add(1));
        std::io::Write::write_all(&mut client.writer, &[0u8; 32]).unwrap();
        client.writer.end_packet().await.unwrap();
        client.writer.flush_all().await.unwrap();
        // auth OK
        let (_, ok) = client.reader.next_async().await.unwrap().unwrap();
        assert_eq!(ok[0], OK_HEADER);
        client
    }

    impl TestClient {
        async fn send(&mut self, payload: &[u8]) {
            self.writer.reset_seq();
            std::io::Write::write_all(&mut self.writer, payload).unwrap();
            self.writer.end_packet().await.unwrap();
            self.writer.flush_all().await.unwrap();
        }

        async fn recv(&mut self) -> Vec<u8> {
            let (_, packet) = self.reader.next_async().await.unwrap().unwrap();
            packet.to_vec()
        }
    }

    fn query_payload(sql: &str) -> Vec<u8> {
        let mut payload = vec![0x03];
        payload.extend_from_slice(sql.as_bytes());
        payload
    }

    #[tokio::test]
    async fn miss_registers_and_replies_ok() {
        let store = Arc::new(CaptureStore::new());
        let mut client = connect(Arc::clone(&store)).await;
        client.send(&query_payload("SELECT 1")).await;
        let reply = client.recv().await;
        assert_eq!(reply[0], OK_HEADER);
        assert!(store.is_pending(Protocol::Mysql, "MYSQL SELECT 1"));
    }

    #[tokio::test]
    async fn configured_rows_play_back_as_result_set() {
        let store = Arc::new(CaptureStore::new());
        let pending = store.register(
            Protocol::Mysql,
            "MYSQL SELECT id, name FROM users".to_string(),
            RequestSnapshot::Sql {
                query: "SELECT id, name FROM users".to_string(),
            },
        );
        store
            .configure(
                &pending.id,
                None,
                ResponseSpec::from_config(
                    Protocol::Mysql,
                    json!({"rows": [{"id": 1, "name": "Alice"}, {"id": 2, "name": null}]}),
                )
                .unwrap(),
            )
            .unwrap();

        let mut client = connect(Arc::clone(&store)).await;
        client.send(&query_payload("SELECT id, name FROM users")).await;

        // column count
        assert_eq!(client.recv().await, vec![0x02]);
        // two column definitions starting with lenenc "def"
        let first_column = client.recv().await;
        assert_eq!(&first_column[..4], &[0x03, b'd', b'e', b'f']);
        let _second_column = client.recv().await;
        // EOF closing the definitions
        assert_eq!(client.recv().await[0], EOF_HEADER);
        // first row: "1", "Alice"
        assert_eq!(client.recv().await, vec![0x01, b'1', 0x05, b'A', b'l', b'i', b'c', b'e']);
        // second row: "2", NULL
        assert_eq!(client.recv().await, vec![0x01, b'2', 0xfb]);
        // final EOF
        assert_eq!(client.recv().await[0], EOF_HEADER);
    }

    #[tokio::test]
    async fn prepared_statement_roundtrip_matches_text_query() {
        let store = Arc::new(CaptureStore::new());
        let sql = "SELECT * FROM t WHERE id = ?";
        let pending = store.register(
            Protocol::Mysql,
            model::sql_key(Protocol::Mysql, sql),
            RequestSnapshot::Sql {
                query: sql.to_string(),
            },
        );
        store
            .configure(
                &pending.id,
                None,
                ResponseSpec::from_config(Protocol::Mysql, json!({"rows": [{"id": 9}]})).unwrap(),
            )
            .unwrap();

        let mut client = connect(Arc::clone(&store)).await;

        let mut prepare = vec![0x16];
        prepare.extend_from_slice(sql.as_bytes());
        client.send(&prepare).await;
        let prepare_ok = client.recv().await;
        assert_eq!(prepare_ok[0], OK_HEADER);
        let statement_id = u32::from_le_bytes([
            prepare_ok[1],
            prepare_ok[2],
            prepare_ok[3],
            prepare_ok[4],
        ]);
        assert_eq!(u16::from_le_bytes([prepare_ok[7], prepare_ok[8]]), 1); // num_params
        // one dummy param definition + EOF
        let _param_def = client.recv().await;
        assert_eq!(client.recv().await[0], EOF_HEADER);

        // execute: id + flags + iteration count; bound values are ignored
        let mut execute = vec![0x17];
        execute.extend_from_slice(&statement_id.to_le_bytes());
        execute.push(0x00);
        execute.extend_from_slice(&1u32.to_le_bytes());
        client.send(&execute).await;

        assert_eq!(client.recv().await, vec![0x01]); // column count
        let _column = client.recv().await;
        assert_eq!(client.recv().await[0], EOF_HEADER);
        assert_eq!(client.recv().await, vec![0x01, b'9']);
        assert_eq!(client.recv().await[0], EOF_HEADER);
    }

    #[tokio::test]
    async fn unknown_statement_id_gets_err_1064() {
        let store = Arc::new(CaptureStore::new());
        let mut client = connect(store).await;
        let mut execute = vec![0x17];
        execute.extend_from_slice(&77u32.to_le_bytes());
        execute.push(0x00);
        execute.extend_from_slice(&1u32.to_le_bytes());
        client.send(&execute).await;
        let reply = client.recv().await;
        assert_eq!(reply[0], ERR_HEADER);
        assert_eq!(u16::from_le_bytes([reply[1], reply[2]]), 1064);
        assert_eq!(&reply[4..9], b"42000");
    }

    #[tokio::test]
    async fn affected_rows_playback_rides_the_ok_packet() {
        let store = Arc::new(CaptureStore::new());
        let sql = "UPDATE t SET a = 1";
        let pending = store.register(
            Protocol::Mysql,
            model::sql_key(Protocol::Mysql, sql),
            RequestSnapshot::Sql {
                query: sql.to_string(),
            },
        );
        store
            .configure(
                &pending.id,
                None,
                ResponseSpec::from_config(Protocol::Mysql, json!({"affectedRows": 3})).unwrap(),
            )
            .unwrap();

        let mut client = connect(store).await;
        client.send(&query_payload(sql)).await;
        let reply = client.recv().await;
        assert_eq!(reply[0], OK_HEADER);
        assert_eq!(reply[1], 3); // lenenc affected rows
    }
}
