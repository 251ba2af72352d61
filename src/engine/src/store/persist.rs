use crate::store::model::{Interaction, TableSchema, TestCase};

use anyhow::Context;
use fs_err as fs;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// On-disk snapshot of the whole store, every map keyed by id.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateFile {
    #[serde(default)]
    pub interactions: HashMap<String, Interaction>,
    #[serde(default)]
    pub test_cases: HashMap<String, TestCase>,
    #[serde(default)]
    pub schemas: HashMap<String, TableSchema>,
}

/// Replay-mode payload: one optional grouping plus its interactions. Only
/// configured entries are hydrated on load.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SuiteFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_case: Option<TestCase>,
    #[serde(default)]
    pub interactions: Vec<Interaction>,
}

/// Writes the state document atomically: serialize to a sibling temp file,
/// then rename over the target.
pub fn save_state(path: &Path, state: &StateFile) -> anyhow::Result<()> {
    let payload = serde_json::to_vec_pretty(state)?;
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, &payload)
        .with_context(|| format!("writing state to {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .with_context(|| format!("replacing state file {}", path.display()))?;
    Ok(())
}

pub fn load_state(path: &Path) -> anyhow::Result<Option<StateFile>> {
    if !path.exists() {
        return Ok(None);
    }
    let bytes =
        fs::read(path).with_context(|| format!("reading state file {}", path.display()))?;
    let state = serde_json::from_slice(&bytes)
        .with_context(|| format!("parsing state file {}", path.display()))?;
    Ok(Some(state))
}

pub fn load_suite(path: &Path) -> anyhow::Result<SuiteFile> {
    let bytes =
        fs::read(path).with_context(|| format!("reading suite file {}", path.display()))?;
    let suite = serde_json::from_slice(&bytes)
        .with_context(|| format!("parsing suite file {}", path.display()))?;
    Ok(suite)
}
