//! RESP front-end. `PING` is answered locally and never captured; every
//! other command routes through the store. The wire never carries a RESP
//! error: a null bulk keeps clients alive while a capture awaits
//! configuration.

use crate::protocol::resp::{self, RespCommand};
use crate::store::model::{self, Protocol, RequestSnapshot, ResponseSpec};
use crate::store::CaptureStore;

use std::io;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::warn;

pub async fn handle_conn(stream: TcpStream, store: Arc<CaptureStore>) -> io::Result<()> {
    let (read_half, write_half) = stream.into_split();
    run_session(BufReader::new(read_half), write_half, store).await
}

pub async fn run_session<R, W>(
    mut reader: R,
    mut writer: W,
    store: Arc<CaptureStore>,
) -> io::Result<()>
where
    R: AsyncBufRead + Send + Unpin,
    W: AsyncWrite + Send + Unpin,
{
    loop {
        let Some(command) = resp::read_command(&mut reader).await? else {
            return Ok(());
        };
        let _dispatch_timer = crate::server::dispatch_timer(Protocol::Redis);
        let reply = dispatch(&store, command);
        writer.write_all(&reply).await?;
        writer.flush().await?;
    }
}

fn dispatch(store: &CaptureStore, command: RespCommand) -> Vec<u8> {
    if command.command == "PING" {
        return resp::simple_string("PONG");
    }
    let key = model::resp_key(&command.command, &command.args);
    match store.lookup_configured(Protocol::Redis, &key) {
        Some(interaction) => match interaction.response {
            Some(ResponseSpec::Redis { value }) if !value.is_empty() => {
                resp::bulk_string(&value)
            }
            Some(ResponseSpec::Redis { .. }) => resp::null_bulk().to_vec(),
            other => {
                warn!(
                    "interaction {} carries a non-Redis response {other:?}; replying null bulk",
                    interaction.id
                );
                resp::null_bulk().to_vec()
            }
        },
        None => {
            store.register(
                Protocol::Redis,
                key,
                RequestSnapshot::Resp {
                    command: command.command,
                    args: command.args,
                },
            );
            resp::null_bulk().to_vec()
        }
    }
}
