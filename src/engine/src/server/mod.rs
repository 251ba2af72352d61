pub mod engine_args;
pub mod http_front;
pub mod mysql_front;
pub mod postgres_front;
pub mod resp_front;

use crate::store::model::Protocol;
use crate::store::CaptureStore;

use common::metrics::metric_def::{ENGINE_CURR_CONN, ENGINE_DISPATCH_LATENCY};
use common::metrics::{common_labels, gauge_dec, gauge_inc, MetricsTimer};
use common::ShutdownMessage;
use hashbrown::HashMap;
use std::future::Future;
use std::io;
use std::sync::{Arc, OnceLock};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch::Receiver;
use tracing::{debug, info, warn};

/// Dispatch-latency labels, one precomputed set per protocol tag.
fn dispatch_labels(protocol: Protocol) -> &'static Vec<(&'static str, String)> {
    static LABELS: OnceLock<HashMap<Protocol, Vec<(&'static str, String)>>> = OnceLock::new();
    let by_protocol = LABELS.get_or_init(|| {
        [
            Protocol::Http,
            Protocol::Postgres,
            Protocol::Mysql,
            Protocol::Redis,
            Protocol::Dynamodb,
        ]
        .into_iter()
        .map(|tag| {
            let mut labels = vec![("protocol", tag.as_ref().to_string())];
            labels.extend(common_labels().iter().cloned());
            (tag, labels)
        })
        .collect()
    });
    &by_protocol[&protocol]
}

/// Times one decoded request through the store, labelled by protocol.
pub(crate) fn dispatch_timer(protocol: Protocol) -> MetricsTimer {
    MetricsTimer::new_with_labels(ENGINE_DISPATCH_LATENCY, dispatch_labels(protocol))
}

/// Accept loop shared by the wire front-ends. Every connection runs on its
/// own task; accept errors are logged and the loop keeps going; a worker
/// error closes only that connection.
pub async fn serve_wire<H, Fut>(
    name: &'static str,
    listener: TcpListener,
    store: Arc<CaptureStore>,
    mut shutdown_rx: Receiver<ShutdownMessage>,
    handler: H,
) where
    H: Fn(TcpStream, Arc<CaptureStore>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = io::Result<()>> + Send + 'static,
{
    let handler = Arc::new(handler);
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                info!("{name} listener stopping");
                return;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, addr)) => {
                        let store = Arc::clone(&store);
                        let handler = Arc::clone(&handler);
                        tokio::spawn(async move {
                            gauge_inc(ENGINE_CURR_CONN, 1.0, Some(common_labels()));
                            if let Err(e) = (*handler)(stream, store).await {
                                debug!("{name} connection from {addr} closed: {e:?}");
                            }
                            gauge_dec(ENGINE_CURR_CONN, 1.0, Some(common_labels()));
                        });
                    }
                    Err(e) => {
                        warn!("{name} accept connection err. cause by {e:?}");
                    }
                }
            }
        }
    }
}
