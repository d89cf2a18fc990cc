//! In-process remote engine.
//!
//! Serves views of JSON rows through the same [`Connector`]/[`RemoteEngine`]
//! seam as a networked engine. Every row gets a stable 64-bit row id hashed
//! from its view and position, so ids are spread across the whole id space
//! the way remote fragment ids are. Used by the CLI and the test suite.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::trace;
use xxhash_rust::xxh64::xxh64;

use crate::config::ConnectionProperties;
use crate::plan::classify::NO_ROWS_DIAGNOSTIC;
use crate::plan::RowRange;
use crate::query::plan::{ROW_LOWER_PARAM, ROW_UPPER_PARAM};
use crate::query::{Field, QueryDefinition, Schema, Value};
use crate::remote::eval::{limit_of, selected_columns, Evaluator, JsonRow};
use crate::remote::{ConnectionStatus, Connector, RemoteEngine, RemoteError};

const ROW_ID_SEED: u64 = 0x5348_5244;

/// Serialized dataset accepted by [`MemoryEngine::from_dataset`].
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Dataset {
    /// Views to serve.
    pub views: Vec<ViewData>,
}

/// One view of a [`Dataset`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ViewData {
    /// Owning schema, if qualified.
    #[serde(default)]
    pub schema: Option<String>,
    /// View name.
    pub name: String,
    /// Columns in output order.
    pub fields: Vec<Field>,
    /// Rows as JSON objects.
    #[serde(default)]
    pub rows: Vec<JsonRow>,
}

#[derive(Debug)]
struct View {
    schema: Option<String>,
    name: String,
    fields: Vec<Field>,
    /// Sorted by row id.
    rows: Vec<(u64, JsonRow)>,
}

impl View {
    fn new(data: ViewData) -> Self {
        let key = match &data.schema {
            Some(schema) => format!("{schema}.{}", data.name),
            None => data.name.clone(),
        };
        let mut rows: Vec<(u64, JsonRow)> = data
            .rows
            .into_iter()
            .enumerate()
            .map(|(idx, row)| (xxh64(format!("{key}#{idx}").as_bytes(), ROW_ID_SEED), row))
            .collect();
        rows.sort_by_key(|(id, _)| *id);
        Self {
            schema: data.schema,
            name: data.name,
            fields: data.fields,
            rows,
        }
    }
}

/// Request and connection counters.
#[derive(Debug, Default)]
pub struct EngineStats {
    connections_opened: AtomicUsize,
    open_connections: AtomicUsize,
    estimate_requests: AtomicUsize,
    fetch_requests: AtomicUsize,
    rows_returned: AtomicU64,
}

impl EngineStats {
    /// Connections opened since the engine was created.
    pub fn connections_opened(&self) -> usize {
        self.connections_opened.load(Ordering::Relaxed)
    }

    /// Connections currently open.
    pub fn open_connections(&self) -> usize {
        self.open_connections.load(Ordering::Relaxed)
    }

    /// Cardinality estimates served.
    pub fn estimate_requests(&self) -> usize {
        self.estimate_requests.load(Ordering::Relaxed)
    }

    /// Row fetches served (including failed ones).
    pub fn fetch_requests(&self) -> usize {
        self.fetch_requests.load(Ordering::Relaxed)
    }

    /// Rows shipped back across all fetches.
    pub fn rows_returned(&self) -> u64 {
        self.rows_returned.load(Ordering::Relaxed)
    }
}

#[derive(Debug)]
struct Fault {
    range: RowRange,
    remaining: usize,
    message: String,
}

#[derive(Debug, Default)]
struct Shared {
    views: RwLock<Vec<View>>,
    stats: EngineStats,
    faults: Mutex<Vec<Fault>>,
    auth_failure: Mutex<Option<String>>,
}

/// In-process engine serving views of JSON rows.
#[derive(Clone, Debug, Default)]
pub struct MemoryEngine {
    shared: Arc<Shared>,
}

impl MemoryEngine {
    /// Engine with no views.
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine serving every view of `dataset`.
    pub fn from_dataset(dataset: Dataset) -> Self {
        let engine = Self::new();
        for view in dataset.views {
            engine.insert_view(view);
        }
        engine
    }

    /// Adds or replaces a view.
    pub fn insert_view(&self, data: ViewData) {
        let view = View::new(data);
        let mut views = self.shared.views.write();
        views.retain(|v| !(v.name == view.name && v.schema == view.schema));
        views.push(view);
    }

    /// Builder form of [`MemoryEngine::insert_view`].
    pub fn with_view(
        self,
        schema: Option<&str>,
        name: &str,
        fields: Vec<Field>,
        rows: Vec<JsonRow>,
    ) -> Self {
        self.insert_view(ViewData {
            schema: schema.map(str::to_string),
            name: name.to_string(),
            fields,
            rows,
        });
        self
    }

    /// Declared columns of a view.
    pub fn view_schema(&self, schema: Option<&str>, name: &str) -> Option<Schema> {
        let views = self.shared.views.read();
        find_view(&views, schema, name).map(|view| Schema::new(view.fields.clone()))
    }

    /// Row ids of a view in id order.
    pub fn row_ids(&self, schema: Option<&str>, name: &str) -> Vec<u64> {
        let views = self.shared.views.read();
        find_view(&views, schema, name)
            .map(|view| view.rows.iter().map(|(id, _)| *id).collect())
            .unwrap_or_default()
    }

    /// Counters shared by every connection of this engine.
    pub fn stats(&self) -> &EngineStats {
        &self.shared.stats
    }

    /// Fails the next `times` fetches whose lower row bound lies in `range`.
    pub fn fail_fetches(&self, range: RowRange, times: usize, message: impl Into<String>) {
        self.shared.faults.lock().push(Fault {
            range,
            remaining: times,
            message: message.into(),
        });
    }

    /// Makes every connection check report an authentication failure.
    pub fn reject_auth(&self, message: impl Into<String>) {
        *self.shared.auth_failure.lock() = Some(message.into());
    }

    /// Connector opening connections to this engine.
    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Opens [`MemoryConnection`]s to a [`MemoryEngine`].
#[derive(Clone, Debug)]
pub struct MemoryConnector {
    shared: Arc<Shared>,
}

impl Connector for MemoryConnector {
    fn connect(
        &self,
        properties: &ConnectionProperties,
    ) -> Result<Box<dyn RemoteEngine>, RemoteError> {
        let stats = &self.shared.stats;
        stats.connections_opened.fetch_add(1, Ordering::Relaxed);
        stats.open_connections.fetch_add(1, Ordering::Relaxed);
        trace!(host = %properties.host, port = properties.port, "opened in-process connection");
        Ok(Box::new(MemoryConnection {
            shared: Arc::clone(&self.shared),
        }))
    }
}

/// One open connection; decrements the open-connection count on drop.
#[derive(Debug)]
pub struct MemoryConnection {
    shared: Arc<Shared>,
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.shared
            .stats
            .open_connections
            .fetch_sub(1, Ordering::Relaxed);
    }
}

struct Output {
    columns: Vec<String>,
    rows: Vec<JsonRow>,
}

impl MemoryConnection {
    fn execute(&self, query: &QueryDefinition, range: RowRange) -> Result<Output, RemoteError> {
        let (schema, name) = query.source_view().ok_or_else(|| RemoteError::Status {
            status_code: 400,
            message: "plan has no from-view source".into(),
        })?;
        let views = self.shared.views.read();
        let view = find_view(&views, schema, name).ok_or_else(|| RemoteError::Status {
            status_code: 404,
            message: format!("SQL-TABLENOTFOUND: Unknown table: {name}"),
        })?;

        let mut columns: Vec<String> = view.fields.iter().map(|f| f.name.clone()).collect();
        let mut rows: Vec<JsonRow> = view
            .rows
            .iter()
            .filter(|(id, _)| range.contains(*id))
            .map(|(_, row)| row.clone())
            .collect();
        let evaluator = Evaluator::new(query.params());
        for op in query.operators().skip(1) {
            match (op.ns.as_str(), op.function.as_str()) {
                ("op", "where") => {
                    let expr = op.child_nodes().next().ok_or_else(|| RemoteError::Status {
                        status_code: 400,
                        message: "op:where expects an expression".into(),
                    })?;
                    let mut kept = Vec::with_capacity(rows.len());
                    for row in rows {
                        if evaluator.matches(expr, &row)? {
                            kept.push(row);
                        }
                    }
                    rows = kept;
                }
                ("op", "select") => {
                    columns = selected_columns(op)?;
                    for row in &mut rows {
                        row.retain(|key, _| columns.contains(key));
                    }
                }
                ("op", "limit") => {
                    let limit = usize::try_from(limit_of(op)?).unwrap_or(usize::MAX);
                    rows.truncate(limit);
                }
                (ns, function) => {
                    return Err(RemoteError::Status {
                        status_code: 400,
                        message: format!("unsupported operator {ns}:{function}"),
                    })
                }
            }
        }
        Ok(Output { columns, rows })
    }

    fn take_fault(&self, lower: u64) -> Option<String> {
        let mut faults = self.shared.faults.lock();
        let fault = faults
            .iter_mut()
            .find(|fault| fault.remaining > 0 && fault.range.contains(lower))?;
        fault.remaining -= 1;
        Some(fault.message.clone())
    }
}

impl RemoteEngine for MemoryConnection {
    fn check_connection(&mut self) -> ConnectionStatus {
        match self.shared.auth_failure.lock().as_ref() {
            Some(message) => ConnectionStatus::failed(401, message.clone()),
            None => ConnectionStatus::ok(),
        }
    }

    fn estimate_rows(&mut self, query: &QueryDefinition) -> Result<u64, RemoteError> {
        self.shared
            .stats
            .estimate_requests
            .fetch_add(1, Ordering::Relaxed);
        let output = self.execute(query, RowRange::FULL)?;
        if output.rows.is_empty() {
            return Err(RemoteError::Status {
                status_code: 500,
                message: format!("XDMP-AS: (err:XPTY0004) {NO_ROWS_DIAGNOSTIC}"),
            });
        }
        Ok(output.rows.len() as u64)
    }

    fn fetch_rows(&mut self, query: &QueryDefinition) -> Result<String, RemoteError> {
        self.shared
            .stats
            .fetch_requests
            .fetch_add(1, Ordering::Relaxed);
        let range = requested_range(query.params())?;
        if let Some(message) = self.take_fault(range.lower) {
            return Err(RemoteError::Status {
                status_code: 503,
                message,
            });
        }
        let output = self.execute(query, range)?;
        self.shared
            .stats
            .rows_returned
            .fetch_add(output.rows.len() as u64, Ordering::Relaxed);
        Ok(json!({ "columns": output.columns, "rows": output.rows }).to_string())
    }
}

fn find_view<'v>(views: &'v [View], schema: Option<&str>, name: &str) -> Option<&'v View> {
    views
        .iter()
        .find(|view| view.name == name && (schema.is_none() || view.schema.as_deref() == schema))
}

fn requested_range(params: &BTreeMap<String, Value>) -> Result<RowRange, RemoteError> {
    let bound = |name: &str, default: u64| match params.get(name) {
        None => Ok(default),
        Some(Value::String(text)) => text.parse::<u64>().map_err(|_| RemoteError::Status {
            status_code: 400,
            message: format!("invalid value for {name}: {text}"),
        }),
        Some(Value::Int(v)) => u64::try_from(*v).map_err(|_| RemoteError::Status {
            status_code: 400,
            message: format!("invalid value for {name}: {v}"),
        }),
        Some(other) => Err(RemoteError::Status {
            status_code: 400,
            message: format!("invalid value for {name}: {other:?}"),
        }),
    };
    Ok(RowRange::new(
        bound(ROW_LOWER_PARAM, 0)?,
        bound(ROW_UPPER_PARAM, u64::MAX)?,
    ))
}
