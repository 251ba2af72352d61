use chrono::{DateTime, Utc};
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use strum_macros::AsRefStr;
use thiserror::Error;

/// Wire protocol a capture belongs to. The tag drives routing-key layout,
/// response-shape validation, and wire encoding.
#[derive(
    AsRefStr, Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Protocol {
    #[strum(serialize = "HTTP")]
    Http,
    #[strum(serialize = "POSTGRES")]
    Postgres,
    #[strum(serialize = "MYSQL")]
    Mysql,
    #[strum(serialize = "REDIS")]
    Redis,
    #[strum(serialize = "DYNAMODB")]
    Dynamodb,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionState {
    Pending,
    Configured,
}

/// What arrived on the wire, decoded just far enough to be addressable.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum RequestSnapshot {
    #[serde(rename_all = "camelCase")]
    Http {
        method: String,
        host: String,
        path: String,
        headers: HashMap<String, String>,
        body: String,
        body_hash: String,
    },
    #[serde(rename_all = "camelCase")]
    Dynamo {
        method: String,
        host: String,
        path: String,
        headers: HashMap<String, String>,
        body: String,
        body_hash: String,
        operation: String,
        table: String,
        key_json: String,
    },
    #[serde(rename_all = "camelCase")]
    Sql { query: String },
    #[serde(rename_all = "camelCase")]
    Resp { command: String, args: Vec<String> },
}

/// Developer-supplied answer for a capture. The variant must match the
/// interaction's protocol; [`ResponseSpec::from_config`] enforces that at the
/// configuration boundary.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ResponseSpec {
    #[serde(rename_all = "camelCase")]
    Http {
        status_code: u16,
        #[serde(default)]
        headers: HashMap<String, String>,
        #[serde(default)]
        body: String,
        #[serde(default)]
        latency_ms: u64,
    },
    #[serde(rename_all = "camelCase")]
    Sql {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rows: Option<Vec<Map<String, Value>>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        affected_rows: Option<u64>,
    },
    #[serde(rename_all = "camelCase")]
    Dynamo { item_json: String },
    #[serde(rename_all = "camelCase")]
    Redis {
        #[serde(default)]
        value: String,
    },
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("response payload does not fit protocol {0:?}: {1}")]
    BadResponse(Protocol, serde_json::Error),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HttpResponseConfig {
    status_code: u16,
    #[serde(default)]
    headers: HashMap<String, String>,
    #[serde(default)]
    body: String,
    #[serde(default)]
    latency_ms: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SqlResponseConfig {
    #[serde(default)]
    rows: Option<Vec<Map<String, Value>>>,
    #[serde(default)]
    affected_rows: Option<u64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DynamoResponseConfig {
    item_json: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RedisResponseConfig {
    #[serde(default)]
    value: String,
}

impl ResponseSpec {
    /// Shapes a raw configuration payload by the interaction's protocol.
    ///
    /// DynamoDB accepts either an `itemJson` document or a full HTTP response
    /// (status/headers/body/latency), since those captures travel over the
    /// HTTP front-end.
    pub fn from_config(protocol: Protocol, raw: Value) -> Result<Self, ModelError> {
        let bad = |e| ModelError::BadResponse(protocol, e);
        match protocol {
            Protocol::Http => {
                let config: HttpResponseConfig = serde_json::from_value(raw).map_err(bad)?;
                Ok(ResponseSpec::Http {
                    status_code: config.status_code,
                    headers: config.headers,
                    body: config.body,
                    latency_ms: config.latency_ms,
                })
            }
            Protocol::Postgres | Protocol::Mysql => {
                let config: SqlResponseConfig = serde_json::from_value(raw).map_err(bad)?;
                Ok(ResponseSpec::Sql {
                    rows: config.rows,
                    affected_rows: config.affected_rows,
                })
            }
            Protocol::Dynamodb => {
                if raw.get("itemJson").is_some() {
                    let config: DynamoResponseConfig =
                        serde_json::from_value(raw).map_err(bad)?;
                    let item_json = match config.item_json {
                        Value::String(text) => text,
                        document => document.to_string(),
                    };
                    Ok(ResponseSpec::Dynamo { item_json })
                } else {
                    let config: HttpResponseConfig = serde_json::from_value(raw).map_err(bad)?;
                    Ok(ResponseSpec::Http {
                        status_code: config.status_code,
                        headers: config.headers,
                        body: config.body,
                        latency_ms: config.latency_ms,
                    })
                }
            }
            Protocol::Redis => {
                let config: RedisResponseConfig = serde_json::from_value(raw).map_err(bad)?;
                Ok(ResponseSpec::Redis {
                    value: config.value,
                })
            }
        }
    }

    pub fn fits(&self, protocol: Protocol) -> bool {
        matches!(
            (self, protocol),
            (ResponseSpec::Http { .. }, Protocol::Http)
                | (ResponseSpec::Http { .. }, Protocol::Dynamodb)
                | (ResponseSpec::Sql { .. }, Protocol::Postgres)
                | (ResponseSpec::Sql { .. }, Protocol::Mysql)
                | (ResponseSpec::Dynamo { .. }, Protocol::Dynamodb)
                | (ResponseSpec::Redis { .. }, Protocol::Redis)
        )
    }
}

/// One captured request/response pair, the atomic unit of the store.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Interaction {
    pub id: String,
    pub protocol: Protocol,
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub request: RequestSnapshot,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponseSpec>,
    pub state: InteractionState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_case_id: Option<String>,
    pub captured_at: DateTime<Utc>,
}

/// Named grouping of interaction ids. Organizational only; the interception
/// engine never reads it.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub interactions: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Per-table DDL hint surfaced by the UI next to SQL captures.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSchema {
    pub id: String,
    pub protocol: Protocol,
    pub table: String,
    pub ddl: String,
}

/// Hex of the first 8 bytes of SHA-256 over the raw body; the empty body
/// hashes to the empty string.
pub fn body_hash(body: &[u8]) -> String {
    if body.is_empty() {
        return String::new();
    }
    let digest = Sha256::digest(body);
    hex::encode(&digest[..8])
}

/// `"{METHOD} {host} {path} {bodyHash}"`, no normalization. An empty body
/// hash leaves the trailing separator in place; the wire side and the
/// configuration side build the key through this same function, so the forms
/// always agree byte for byte.
pub fn http_key(method: &str, host: &str, path: &str, body_hash: &str) -> String {
    format!("{method} {host} {path} {body_hash}")
}

/// `"POSTGRES {sql}"` / `"MYSQL {sql}"`: the exact query text, no trimming.
pub fn sql_key(protocol: Protocol, sql: &str) -> String {
    format!("{} {}", protocol.as_ref(), sql)
}

/// Uppercased command joined with its arguments by single spaces. Inline and
/// array command forms therefore collapse to the same key.
pub fn resp_key(command: &str, args: &[String]) -> String {
    let mut key = command.to_uppercase();
    for arg in args {
        key.push(' ');
        key.push_str(arg);
    }
    key
}

/// Stringifies one JSON cell for a wire row. `Null` becomes the protocol's
/// NULL encoding; everything else rides as text.
pub fn cell_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}
