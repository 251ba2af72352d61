pub mod model;
pub mod persist;

use crate::store::model::{
    Interaction, InteractionState, Protocol, RequestSnapshot, ResponseSpec, TableSchema, TestCase,
};
use crate::store::persist::{StateFile, SuiteFile};

use chrono::Utc;
use common::metrics::metric_def::{ENGINE_CAPTURES, ENGINE_PLAYBACKS};
use common::metrics::{common_labels, counter_inc};
use hashbrown::HashMap;
use nanoid::nanoid;
use parking_lot::RwLock;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no interaction with id {0}")]
    NotFound(String),
    #[error("response shape does not fit protocol {0:?}")]
    ProtocolMismatch(Protocol),
}

#[derive(Default)]
struct Tables {
    interactions: HashMap<String, Interaction>,
    by_key: HashMap<(Protocol, String), String>,
    test_cases: HashMap<String, TestCase>,
    schemas: HashMap<String, TableSchema>,
}

/// Single source of truth for captures. One reader/writer lock guards all
/// three tables; it is never held across I/O, so every read hands out a
/// snapshot clone.
#[derive(Default)]
pub struct CaptureStore {
    tables: RwLock<Tables>,
}

impl CaptureStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a capture for `(protocol, key)`. Idempotent: racing callers
    /// converge on one record because existence is re-checked after taking
    /// the write lock, and the winner's record is returned unchanged.
    pub fn register(
        &self,
        protocol: Protocol,
        key: String,
        request: RequestSnapshot,
    ) -> Interaction {
        let mut tables = self.tables.write();
        if let Some(id) = tables.by_key.get(&(protocol, key.clone())) {
            let id = id.clone();
            return tables.interactions[&id].clone();
        }
        let interaction = Interaction {
            id: nanoid!(),
            protocol,
            key: key.clone(),
            name: None,
            request,
            response: None,
            state: InteractionState::Pending,
            test_case_id: None,
            captured_at: Utc::now(),
        };
        debug!(
            "captured {} {} as {}",
            protocol.as_ref(),
            interaction.key,
            interaction.id
        );
        tables.by_key.insert((protocol, key), interaction.id.clone());
        tables
            .interactions
            .insert(interaction.id.clone(), interaction.clone());
        counter_inc(ENGINE_CAPTURES, 1, Some(common_labels()));
        interaction
    }

    /// The configured record for `(protocol, key)`, or nothing. Pending
    /// records are invisible here.
    pub fn lookup_configured(&self, protocol: Protocol, key: &str) -> Option<Interaction> {
        let tables = self.tables.read();
        let id = tables.by_key.get(&(protocol, key.to_string()))?;
        let interaction = tables.interactions.get(id)?;
        if interaction.state == InteractionState::Configured {
            counter_inc(ENGINE_PLAYBACKS, 1, Some(common_labels()));
            Some(interaction.clone())
        } else {
            None
        }
    }

    pub fn is_pending(&self, protocol: Protocol, key: &str) -> bool {
        let tables = self.tables.read();
        tables
            .by_key
            .get(&(protocol, key.to_string()))
            .and_then(|id| tables.interactions.get(id))
            .is_some_and(|interaction| interaction.state == InteractionState::Pending)
    }

    pub fn get(&self, id: &str) -> Option<Interaction> {
        self.tables.read().interactions.get(id).cloned()
    }

    /// Attaches a response and flips the record to `configured`. Overwrite
    /// semantics: a second call replaces name and response but preserves
    /// `id`, `key`, and `capturedAt`.
    pub fn configure(
        &self,
        id: &str,
        name: Option<String>,
        response: ResponseSpec,
    ) -> Result<Interaction, StoreError> {
        let mut tables = self.tables.write();
        let interaction = tables
            .interactions
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if !response.fits(interaction.protocol) {
            return Err(StoreError::ProtocolMismatch(interaction.protocol));
        }
        if name.is_some() {
            interaction.name = name;
        }
        interaction.response = Some(response);
        interaction.state = InteractionState::Configured;
        Ok(interaction.clone())
    }

    pub fn list_all(&self) -> Vec<Interaction> {
        let tables = self.tables.read();
        let mut all: Vec<Interaction> = tables.interactions.values().cloned().collect();
        all.sort_by(|a, b| a.captured_at.cmp(&b.captured_at).then(a.id.cmp(&b.id)));
        all
    }

    pub fn list_pending(&self) -> Vec<Interaction> {
        self.list_all()
            .into_iter()
            .filter(|interaction| interaction.state == InteractionState::Pending)
            .collect()
    }

    pub fn create_test_case(
        &self,
        name: String,
        description: String,
        interactions: Vec<String>,
    ) -> TestCase {
        let mut tables = self.tables.write();
        let test_case = TestCase {
            id: nanoid!(),
            name,
            description,
            interactions: interactions.clone(),
            created_at: Utc::now(),
        };
        for id in &interactions {
            if let Some(interaction) = tables.interactions.get_mut(id) {
                interaction.test_case_id = Some(test_case.id.clone());
            }
        }
        tables
            .test_cases
            .insert(test_case.id.clone(), test_case.clone());
        test_case
    }

    pub fn list_test_cases(&self) -> Vec<TestCase> {
        let tables = self.tables.read();
        let mut all: Vec<TestCase> = tables.test_cases.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        all
    }

    /// Upserts the DDL hint for `(protocol, table)`.
    pub fn put_schema(&self, protocol: Protocol, table: String, ddl: String) -> TableSchema {
        let mut tables = self.tables.write();
        if let Some(existing) = tables
            .schemas
            .values_mut()
            .find(|schema| schema.protocol == protocol && schema.table == table)
        {
            existing.ddl = ddl;
            return existing.clone();
        }
        let schema = TableSchema {
            id: nanoid!(),
            protocol,
            table,
            ddl,
        };
        tables.schemas.insert(schema.id.clone(), schema.clone());
        schema
    }

    pub fn list_schemas(&self) -> Vec<TableSchema> {
        let tables = self.tables.read();
        let mut all: Vec<TableSchema> = tables.schemas.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Suite document for replay: the configured subset, optionally narrowed
    /// to one test case.
    pub fn export_suite(&self, test_case_id: Option<&str>) -> SuiteFile {
        let tables = self.tables.read();
        let interactions = tables
            .interactions
            .values()
            .filter(|interaction| interaction.state == InteractionState::Configured)
            .filter(|interaction| match test_case_id {
                Some(wanted) => interaction.test_case_id.as_deref() == Some(wanted),
                None => true,
            })
            .cloned()
            .collect();
        SuiteFile {
            test_case: test_case_id.and_then(|id| tables.test_cases.get(id).cloned()),
            interactions,
        }
    }

    /// Bulk register + configure. Only configured entries hydrate; pending
    /// entries in a suite are skipped. Returns how many were loaded.
    pub fn import_suite(&self, suite: SuiteFile) -> usize {
        if let Some(test_case) = &suite.test_case {
            self.tables
                .write()
                .test_cases
                .insert(test_case.id.clone(), test_case.clone());
        }
        let mut loaded = 0;
        for interaction in suite.interactions {
            let (Some(response), InteractionState::Configured) =
                (interaction.response, interaction.state)
            else {
                continue;
            };
            let registered = self.register(
                interaction.protocol,
                interaction.key,
                interaction.request,
            );
            if self
                .configure(&registered.id, interaction.name, response)
                .is_ok()
            {
                loaded += 1;
            }
        }
        loaded
    }

    pub fn snapshot_state(&self) -> StateFile {
        let tables = self.tables.read();
        StateFile {
            interactions: tables.interactions.clone(),
            test_cases: tables.test_cases.clone(),
            schemas: tables.schemas.clone(),
        }
    }

    /// Replaces the tables with a previously persisted state. The routing
    /// index is rebuilt from the stored keys; ids and timestamps survive.
    pub fn restore_state(&self, state: StateFile) {
        let mut tables = self.tables.write();
        tables.by_key = state
            .interactions
            .values()
            .map(|interaction| {
                (
                    (interaction.protocol, interaction.key.clone()),
                    interaction.id.clone(),
                )
            })
            .collect();
        tables.interactions = state.interactions;
        tables.test_cases = state.test_cases;
        tables.schemas = state.schemas;
    }
}
