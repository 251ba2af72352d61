//! PostgreSQL front-end: just enough of protocol v3 to finish startup and
//! answer simple queries from the capture store. Extended query, COPY and
//! SSL negotiation are out of scope; a client that needs them gets its
//! connection closed.

use crate::protocol::postgres::{messages, MAX_STARTUP_LEN, MSG_QUERY, MSG_TERMINATE};
use crate::store::model::{self, Protocol, RequestSnapshot, ResponseSpec};
use crate::store::CaptureStore;

use std::io;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::warn;

pub async fn handle_conn(stream: TcpStream, store: Arc<CaptureStore>) -> io::Result<()> {
    let (read_half, write_half) = stream.into_split();
    run_session(read_half, write_half, store).await
}

pub async fn run_session<R, W>(
    mut reader: R,
    mut writer: W,
    store: Arc<CaptureStore>,
) -> io::Result<()>
where
    R: AsyncRead + Send + Unpin,
    W: AsyncWrite + Send + Unpin,
{
    // StartupMessage: int32 length including itself, then parameters we
    // deliberately ignore.
    let mut length_buf = [0u8; 4];
    match reader.read_exact(&mut length_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
        Err(e) => return Err(e),
    }
    let startup_len = i32::from_be_bytes(length_buf);
    if !(4..=MAX_STARTUP_LEN).contains(&startup_len) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("impossible startup message length {startup_len}"),
        ));
    }
    let mut startup_body = vec![0u8; (startup_len - 4) as usize];
    reader.read_exact(&mut startup_body).await?;

    writer.write_all(&messages::authentication_ok()).await?;
    writer.write_all(&messages::ready_for_query()).await?;
    writer.flush().await?;

    loop {
        let mut tag = [0u8; 1];
        match reader.read_exact(&mut tag).await {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e),
        }
        match tag[0] {
            MSG_QUERY => {
                reader.read_exact(&mut length_buf).await?;
                let length = i32::from_be_bytes(length_buf);
                if length < 4 {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("impossible message length {length}"),
                    ));
                }
                let mut payload = vec![0u8; (length - 4) as usize];
                reader.read_exact(&mut payload).await?;
                if payload.last() == Some(&0) {
                    payload.pop();
                }
                let sql = String::from_utf8_lossy(&payload).to_string();
                let _dispatch_timer = crate::server::dispatch_timer(Protocol::Postgres);
                answer_query(&mut writer, &store, &sql).await?;
                writer.write_all(&messages::ready_for_query()).await?;
                writer.flush().await?;
            }
            MSG_TERMINATE => return Ok(()),
            other => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unsupported frontend message {other:#04x}"),
                ));
            }
        }
    }
}

/// The three-way outcome. A miss or a pending capture both answer
/// `CommandComplete("SELECT 0")`; this server never sends an ErrorResponse.
async fn answer_query<W>(writer: &mut W, store: &CaptureStore, sql: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let key = model::sql_key(Protocol::Postgres, sql);
    let Some(interaction) = store.lookup_configured(Protocol::Postgres, &key) else {
        store.register(
            Protocol::Postgres,
            key,
            RequestSnapshot::Sql {
                query: sql.to_string(),
            },
        );
        return writer.write_all(&messages::command_complete("SELECT 0")).await;
    };

    match &interaction.response {
        Some(ResponseSpec::Sql {
            rows: Some(rows), ..
        }) if !rows.is_empty() => {
            // fields come from the first row, in insertion order
            let columns: Vec<String> = rows[0].keys().cloned().collect();
            writer.write_all(&messages::row_description(&columns)).await?;
            for row in rows {
                let cells: Vec<Option<String>> = columns
                    .iter()
                    .map(|column| row.get(column).and_then(model::cell_text))
                    .collect();
                writer.write_all(&messages::data_row(&cells)).await?;
            }
            writer
                .write_all(&messages::command_complete(&format!("SELECT {}", rows.len())))
                .await
        }
        Some(ResponseSpec::Sql { .. }) => {
            writer.write_all(&messages::command_complete("SELECT 0")).await
        }
        other => {
            warn!(
                "interaction {} carries a non-SQL response {other:?}; replying with an empty result",
                interaction.id
            );
            writer.write_all(&messages::command_complete("SELECT 0")).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

    async fn connect(store: Arc<CaptureStore>) -> DuplexStream {
        let (mut client, server) = duplex(1 << 16);
        let (server_read, server_write) = tokio::io::split(server);
        tokio::spawn(async move {
            let _ = run_session(server_read, server_write, store).await;
        });
        // StartupMessage: length + protocol version 3.0, no parameters
        let mut startup = Vec::new();
        startup.extend_from_slice(&9i32.to_be_bytes());
        startup.extend_from_slice(&196608i32.to_be_bytes());
        startup.push(0);
        client.write_all(&startup).await.unwrap();

        assert_eq!(read_message(&mut client).await, (b'R', vec![0, 0, 0, 0]));
        assert_eq!(read_message(&mut client).await, (b'Z', vec![b'I']));
        client
    }

    async fn read_message(client: &mut DuplexStream) -> (u8, Vec<u8>) {
        let mut tag = [0u8; 1];
        client.read_exact(&mut tag).await.unwrap();
        let mut length = [0u8; 4];
        client.read_exact(&mut length).await.unwrap();
        let mut payload = vec![0u8; (i32::from_be_bytes(length) - 4) as usize];
        client.read_exact(&mut payload).await.unwrap();
        (tag[0], payload)
    }

    async fn send_query(client: &mut DuplexStream, sql: &str) {
        let mut message = vec![b'Q'];
        message.extend_from_slice(&(sql.len() as i32 + 5).to_be_bytes());
        message.extend_from_slice(sql.as_bytes());
        message.push(0);
        client.write_all(&message).await.unwrap();
    }

    #[tokio::test]
    async fn miss_registers_and_completes_empty() {
        let store = Arc::new(CaptureStore::new());
        let mut client = connect(Arc::clone(&store)).await;
        send_query(&mut client, "SELECT 1").await;
        let (tag, payload) = read_message(&mut client).await;
        assert_eq!(tag, b'C');
        assert_eq!(payload, b"SELECT 0\0");
        assert_eq!(read_message(&mut client).await.0, b'Z');
        assert!(store.is_pending(Protocol::Postgres, "POSTGRES SELECT 1"));
    }

    #[tokio::test]
    async fn two_row_playback_matches_wire_contract() {
        let store = Arc::new(CaptureStore::new());
        let sql = "SELECT id, name FROM users";
        let pending = store.register(
            Protocol::Postgres,
            model::sql_key(Protocol::Postgres, sql),
            RequestSnapshot::Sql {
                query: sql.to_string(),
            },
        );
        store
            .configure(
                &pending.id,
                None,
                ResponseSpec::from_config(
                    Protocol::Postgres,
                    json!({"rows": [{"id": 1, "name": "Alice"}, {"id": 2, "name": "Bob"}]}),
                )
                .unwrap(),
            )
            .unwrap();

        let mut client = connect(store).await;
        send_query(&mut client, sql).await;

        let (tag, description) = read_message(&mut client).await;
        assert_eq!(tag, b'T');
        assert_eq!(&description[..2], &2i16.to_be_bytes());
        assert_eq!(&description[2..5], b"id\0");

        let (tag, first_row) = read_message(&mut client).await;
        assert_eq!(tag, b'D');
        assert_eq!(&first_row[..2], &2i16.to_be_bytes());
        assert_eq!(&first_row[2..6], &1i32.to_be_bytes());
        assert_eq!(&first_row[6..7], b"1");
        assert_eq!(&first_row[7..11], &5i32.to_be_bytes());
        assert_eq!(&first_row[11..16], b"Alice");

        let (tag, second_row) = read_message(&mut client).await;
        assert_eq!(tag, b'D');
        assert_eq!(&second_row[11..14], b"Bob");

        let (tag, complete) = read_message(&mut client).await;
        assert_eq!(tag, b'C');
        assert_eq!(complete, b"SELECT 2\0");
        assert_eq!(read_message(&mut client).await.0, b'Z');
    }

    #[tokio::test]
    async fn zero_row_playback_completes_without_description() {
        let store = Arc::new(CaptureStore::new());
        let pending = store.register(
            Protocol::Postgres,
            model::sql_key(Protocol::Postgres, "SELECT 1"),
            RequestSnapshot::Sql {
                query: "SELECT 1".to_string(),
            },
        );
        store
            .configure(
                &pending.id,
                None,
                ResponseSpec::from_config(Protocol::Postgres, json!({"rows": []})).unwrap(),
            )
            .unwrap();

        let mut client = connect(store).await;
        send_query(&mut client, "SELECT 1").await;
        let (tag, payload) = read_message(&mut client).await;
        assert_eq!(tag, b'C');
        assert_eq!(payload, b"SELECT 0\0");
    }

    #[tokio::test]
    async fn empty_query_text_is_registerable() {
        let store = Arc::new(CaptureStore::new());
        let mut client = connect(Arc::clone(&store)).await;
        send_query(&mut client, "").await;
        let (tag, _) = read_message(&mut client).await;
        assert_eq!(tag, b'C');
        assert!(store.is_pending(Protocol::Postgres, "POSTGRES "));
    }

    #[tokio::test]
    async fn terminate_closes_cleanly() {
        let store = Arc::new(CaptureStore::new());
        let mut client = connect(store).await;
        let mut terminate = vec![b'X'];
        terminate.extend_from_slice(&4i32.to_be_bytes());
        client.write_all(&terminate).await.unwrap();
        let mut probe = [0u8; 1];
        assert_eq!(client.read(&mut probe).await.unwrap(), 0);
    }
}
