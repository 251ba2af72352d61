//! HTTP forward-proxy front-end. Clients point their proxy environment at
//! this listener; requests arrive in absolute form, are captured or played
//! back, and never travel upstream.

use crate::store::model::{self, Protocol, RequestSnapshot, ResponseSpec};
use crate::store::CaptureStore;

use axum::body::{self, Body, Bytes};
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use hashbrown::HashMap;
use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::warn;

/// Hosts carrying this marker are captured under the DynamoDB protocol tag.
const DYNAMODB_HOST_MARKER: &str = ".dynamodb.";

pub fn proxy_router(store: Arc<CaptureStore>) -> Router {
    Router::new().fallback(intercept).with_state(store)
}

pub async fn serve<F>(
    listener: TcpListener,
    store: Arc<CaptureStore>,
    shutdown: F,
) -> io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, proxy_router(store).into_make_service())
        .with_graceful_shutdown(shutdown)
        .await
}

async fn intercept(State(store): State<Arc<CaptureStore>>, request: Request) -> Response {
    let (parts, raw_body) = request.into_parts();

    // Forward proxies receive the absolute request form; anything else is a
    // confused direct client.
    let (Some(_scheme), Some(authority)) = (parts.uri.scheme(), parts.uri.authority()) else {
        return (
            StatusCode::BAD_REQUEST,
            "veritaserum: proxy requests must use an absolute-form request URI\n",
        )
            .into_response();
    };
    let host = authority.to_string();
    let path = if parts.uri.path().is_empty() {
        "/".to_string()
    } else {
        parts.uri.path().to_string()
    };

    let body = match body::to_bytes(raw_body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("request body read failed, treating as empty: {e}");
            Bytes::new()
        }
    };
    let body_hash = model::body_hash(&body);
    let method = parts.method.as_str().to_string();
    let key = model::http_key(&method, &host, &path, &body_hash);

    let protocol = if host.contains(DYNAMODB_HOST_MARKER) {
        Protocol::Dynamodb
    } else {
        Protocol::Http
    };

    let _dispatch_timer = crate::server::dispatch_timer(protocol);
    if let Some(interaction) = store.lookup_configured(protocol, &key) {
        return playback(interaction.id, interaction.response).await;
    }

    let body_text = String::from_utf8_lossy(&body).to_string();
    let headers = snapshot_headers(&parts.headers);
    let request = if protocol == Protocol::Dynamodb {
        RequestSnapshot::Dynamo {
            operation: amz_target_operation(&parts.headers),
            table: json_string_field(&body_text, "TableName").unwrap_or_default(),
            key_json: json_raw_field(&body_text, "Key").unwrap_or_default(),
            method,
            host,
            path,
            headers,
            body: body_text,
            body_hash,
        }
    } else {
        RequestSnapshot::Http {
            method,
            host,
            path,
            headers,
            body: body_text,
            body_hash,
        }
    };
    let interaction = store.register(protocol, key, request);
    (
        StatusCode::SERVICE_UNAVAILABLE,
        format!(
            "veritaserum: no response configured for capture {}\n",
            interaction.id
        ),
    )
        .into_response()
}

async fn playback(id: String, response: Option<ResponseSpec>) -> Response {
    match response {
        Some(ResponseSpec::Http {
            status_code,
            headers,
            body,
            latency_ms,
        }) => {
            if latency_ms > 0 {
                tokio::time::sleep(Duration::from_millis(latency_ms)).await;
            }
            let mut builder = Response::builder()
                .status(StatusCode::from_u16(status_code).unwrap_or(StatusCode::OK));
            let mut has_content_type = false;
            for (name, value) in &headers {
                let (Ok(name), Ok(value)) = (
                    HeaderName::try_from(name.as_str()),
                    HeaderValue::try_from(value.as_str()),
                ) else {
                    warn!("skipping unencodable response header {name:?} on {id}");
                    continue;
                };
                if name == header::CONTENT_TYPE {
                    has_content_type = true;
                }
                builder = builder.header(name, value);
            }
            if !has_content_type {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
            }
            builder
                .body(Body::from(body))
                .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
        Some(ResponseSpec::Dynamo { item_json }) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            item_json,
        )
            .into_response(),
        other => {
            warn!("interaction {id} carries a non-HTTP response {other:?}");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "veritaserum: configured response does not fit the HTTP wire\n",
            )
                .into_response()
        }
    }
}

fn snapshot_headers(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).to_string(),
            )
        })
        .collect()
}

/// Operation name is whatever follows the first `.` of `X-Amz-Target`, e.g.
/// `DynamoDB_20120810.GetItem` -> `GetItem`. Best effort; absent means empty.
fn amz_target_operation(headers: &HeaderMap) -> String {
    headers
        .get("x-amz-target")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split_once('.'))
        .map(|(_, operation)| operation.to_string())
        .unwrap_or_default()
}

/// Textual scan for `"field": "value"`; deliberately not a JSON parser.
fn json_string_field(body: &str, field: &str) -> Option<String> {
    let needle = format!("\"{field}\"");
    let after = body.find(&needle)? + needle.len();
    let rest = body[after..].trim_start().strip_prefix(':')?.trim_start();
    let rest = rest.strip_prefix('"')?;
    let end = rest.find('"')?;
    Some(rest[..end].to_string())
}

/// Raw text of a top-level object field, found by brace counting. Braces
/// inside string values will fool it; the value is a UI hint, not a contract.
fn json_raw_field(body: &str, field: &str) -> Option<String> {
    let needle = format!("\"{field}\"");
    let after = body.find(&needle)? + needle.len();
    let rest = body[after..].trim_start().strip_prefix(':')?.trim_start();
    if !rest.starts_with('{') {
        return None;
    }
    let mut depth = 0usize;
    for (index, byte) in rest.bytes().enumerate() {
        match byte {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(rest[..=index].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::model::InteractionState;
    use http_body_util::BodyExt;
    use serde_json::json;
    use tower::ServiceExt;

    fn proxy_request(method: &str, uri: &str, body: &str) -> Request {
        axum::http::Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8_lossy(&bytes).to_string()
    }

    #[tokio::test]
    async fn relative_uri_is_rejected() {
        let router = proxy_router(Arc::new(CaptureStore::new()));
        let response = router
            .oneshot(proxy_request("GET", "/v1/users", ""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn miss_then_configure_then_playback() {
        let store = Arc::new(CaptureStore::new());
        let router = proxy_router(Arc::clone(&store));

        let response = router
            .clone()
            .oneshot(proxy_request("GET", "http://api.example.com/v1/users", ""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let pending = &store.list_pending()[0];
        assert_eq!(pending.key, "GET api.example.com /v1/users ");
        store
            .configure(
                &pending.id,
                Some("list users".to_string()),
                ResponseSpec::from_config(
                    Protocol::Http,
                    json!({"statusCode": 200, "body": "[]", "latencyMs": 0}),
                )
                .unwrap(),
            )
            .unwrap();

        let response = router
            .oneshot(proxy_request("GET", "http://api.example.com/v1/users", ""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
        assert_eq!(body_text(response).await, "[]");
    }

    #[tokio::test]
    async fn key_ignores_incidental_headers_but_not_body() {
        let store = Arc::new(CaptureStore::new());
        let router = proxy_router(Arc::clone(&store));

        let with_headers = axum::http::Request::builder()
            .method("POST")
            .uri("http://api.example.com/v1/users")
            .header("user-agent", "curl/8.0")
            .header("connection", "keep-alive")
            .body(Body::from("{\"a\":1}"))
            .unwrap();
        router.clone().oneshot(with_headers).await.unwrap();
        router
            .clone()
            .oneshot(proxy_request(
                "POST",
                "http://api.example.com/v1/users",
                "{\"a\":1}",
            ))
            .await
            .unwrap();
        assert_eq!(store.list_all().len(), 1);

        // a different body is a different key
        router
            .oneshot(proxy_request(
                "POST",
                "http://api.example.com/v1/users",
                "{\"a\":2}",
            ))
            .await
            .unwrap();
        assert_eq!(store.list_all().len(), 2);
    }

    #[tokio::test]
    async fn pending_repeat_stays_unavailable() {
        let store = Arc::new(CaptureStore::new());
        let router = proxy_router(Arc::clone(&store));
        for _ in 0..2 {
            let response = router
                .clone()
                .oneshot(proxy_request("GET", "http://api.example.com/ping", ""))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        }
        assert_eq!(store.list_all().len(), 1);
        assert_eq!(store.list_all()[0].state, InteractionState::Pending);
    }

    #[tokio::test]
    async fn racing_misses_yield_two_503s_and_one_capture() {
        let store = Arc::new(CaptureStore::new());
        let router = proxy_router(Arc::clone(&store));
        let (first, second) = tokio::join!(
            router
                .clone()
                .oneshot(proxy_request("GET", "http://api.example.com/fresh", "")),
            router
                .clone()
                .oneshot(proxy_request("GET", "http://api.example.com/fresh", "")),
        );
        assert_eq!(first.unwrap().status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(second.unwrap().status(), StatusCode::SERVICE_UNAVAILABLE);
        let all = store.list_all();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn dynamodb_requests_are_recognized() {
        let store = Arc::new(CaptureStore::new());
        let router = proxy_router(Arc::clone(&store));
        let request = axum::http::Request::builder()
            .method("POST")
            .uri("https://dynamodb.us-east-1.amazonaws.com/")
            .header("x-amz-target", "DynamoDB_20120810.GetItem")
            .body(Body::from(
                "{\"TableName\":\"Orders\",\"Key\":{\"id\":{\"S\":\"42\"}}}",
            ))
            .unwrap();
        router.oneshot(request).await.unwrap();

        let captured = &store.list_all()[0];
        assert_eq!(captured.protocol, Protocol::Dynamodb);
        let RequestSnapshot::Dynamo {
            operation,
            table,
            key_json,
            ..
        } = &captured.request
        else {
            panic!("expected a DynamoDB snapshot, got {:?}", captured.request);
        };
        assert_eq!(operation, "GetItem");
        assert_eq!(table, "Orders");
        assert_eq!(key_json, "{\"id\":{\"S\":\"42\"}}");
    }

    #[tokio::test]
    async fn dynamodb_item_plays_back_as_json_body() {
        let store = Arc::new(CaptureStore::new());
        let router = proxy_router(Arc::clone(&store));
        let request = axum::http::Request::builder()
            .method("POST")
            .uri("https://dynamodb.us-east-1.amazonaws.com/")
            .header("x-amz-target", "DynamoDB_20120810.GetItem")
            .body(Body::from("{\"TableName\":\"Orders\"}"))
            .unwrap();
        router.clone().oneshot(request).await.unwrap();

        let pending = &store.list_pending()[0];
        store
            .configure(
                &pending.id,
                None,
                ResponseSpec::from_config(
                    Protocol::Dynamodb,
                    json!({"itemJson": {"Item": {"id": {"S": "42"}}}}),
                )
                .unwrap(),
            )
            .unwrap();

        let request = axum::http::Request::builder()
            .method("POST")
            .uri("https://dynamodb.us-east-1.amazonaws.com/")
            .header("x-amz-target", "DynamoDB_20120810.GetItem")
            .body(Body::from("{\"TableName\":\"Orders\"}"))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "{\"Item\":{\"id\":{\"S\":\"42\"}}}");
    }

    #[test]
    fn textual_field_scan_tolerates_spacing() {
        assert_eq!(
            json_string_field("{ \"TableName\" :  \"Orders\" }", "TableName").as_deref(),
            Some("Orders")
        );
        assert_eq!(json_string_field("{}", "TableName"), None);
        assert_eq!(
            json_raw_field("{\"Key\": {\"a\": {\"b\": 1}}, \"x\": 2}", "Key").as_deref(),
            Some("{\"a\": {\"b\": 1}}")
        );
    }
}
