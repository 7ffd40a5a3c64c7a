use crate::entities::{BindingRecord, RecordId, TaxQuery, TaxRecord, TaxUsage};
use crate::error::{ConnectorError, Result};
use crate::storage::{Archived, BindingStore, BindingUpdate, Condition, TaxStore, WriteOrigin};
use anyhow::Context;
use chrono::{DateTime, Utc};
use rusqlite::types::{Type, Value as SqlValue};
use rusqlite::{params, params_from_iter, Connection, Row};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

/// Event for the change log.
///
/// Downstream change tracking reads these; `data.no_export` tells it whether
/// the write may be exported back to Magento.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }

    /// Event recorded for a binding update
    pub fn binding_written(
        model: &str,
        id: RecordId,
        update: &BindingUpdate,
        origin: WriteOrigin,
    ) -> Self {
        Event::new(
            "binding_written",
            model,
            &id.to_string(),
            serde_json::json!({
                "fields": {
                    "external_id": update.external_id,
                    "sync_date": update.sync_date.to_rfc3339(),
                },
                "no_export": origin.suppresses_export(),
            }),
            origin.actor(),
        )
    }

    pub fn suppresses_export(&self) -> bool {
        self.data
            .get("no_export")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // ==========================================================================
    // Bindings Table (all binding models share it, keyed by `model`)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS magento_bindings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            model TEXT NOT NULL,
            external_id TEXT,
            internal_id INTEGER,
            backend_id INTEGER NOT NULL,
            sync_date TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Taxes Table
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS taxes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            rate REAL NOT NULL,
            inclusive INTEGER NOT NULL DEFAULT 0,
            usage TEXT NOT NULL DEFAULT 'sale',
            active INTEGER NOT NULL DEFAULT 1
        )",
        [],
    )?;

    // ==========================================================================
    // Events Table (change log)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes (the two uniqueness rules of bindings live here)
    // ==========================================================================
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS uniq_binding_external
         ON magento_bindings(model, backend_id, external_id)",
        [],
    )?;

    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS uniq_binding_internal
         ON magento_bindings(model, backend_id, internal_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_taxes_rate ON taxes(rate)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// BINDINGS
// ============================================================================

/// Insert a binding row and return its id.
///
/// Fails with a storage error if it collides with an existing binding.
pub fn insert_binding(conn: &Connection, binding: &BindingRecord) -> Result<RecordId> {
    conn.execute(
        "INSERT INTO magento_bindings (model, external_id, internal_id, backend_id, sync_date, active)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            binding.model,
            binding.external_id,
            binding.internal_id,
            binding.backend_id,
            binding.sync_date.map(|dt| dt.to_rfc3339()),
            binding.active,
        ],
    )?;

    let id = conn.last_insert_rowid();
    debug!(model = %binding.model, id, internal_id = ?binding.internal_id, "binding inserted");
    Ok(id)
}

/// Archive or restore a binding
pub fn set_binding_active(conn: &Connection, id: RecordId, active: bool) -> Result<()> {
    let changed = conn.execute(
        "UPDATE magento_bindings SET active = ?1 WHERE id = ?2",
        params![active, id],
    )?;
    if changed == 0 {
        return Err(ConnectorError::PreconditionViolation(format!(
            "binding {} not found",
            id
        )));
    }
    Ok(())
}

fn parse_timestamp(idx: usize, value: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    value
        .map(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
        })
        .transpose()
}

fn parse_usage(idx: usize, value: String) -> rusqlite::Result<TaxUsage> {
    TaxUsage::parse(&value).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("unknown tax usage: {}", value).into(),
        )
    })
}

fn binding_from_row(row: &Row<'_>) -> rusqlite::Result<BindingRecord> {
    Ok(BindingRecord {
        id: row.get(0)?,
        model: row.get(1)?,
        external_id: row.get(2)?,
        internal_id: row.get(3)?,
        backend_id: row.get(4)?,
        sync_date: parse_timestamp(5, row.get(5)?)?,
        active: row.get(6)?,
    })
}

fn tax_from_row(row: &Row<'_>) -> rusqlite::Result<TaxRecord> {
    Ok(TaxRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        rate: row.get(2)?,
        inclusive: row.get(3)?,
        usage: parse_usage(4, row.get(4)?)?,
        active: row.get(5)?,
    })
}

const BINDING_COLUMNS: &str =
    "id, model, external_id, internal_id, backend_id, sync_date, active";

pub fn search_bindings(
    conn: &Connection,
    model: &str,
    conditions: &[Condition],
    archived: Archived,
) -> Result<Vec<BindingRecord>> {
    let mut sql = format!(
        "SELECT {} FROM magento_bindings WHERE model = ?1",
        BINDING_COLUMNS
    );
    let mut values: Vec<SqlValue> = vec![SqlValue::Text(model.to_string())];

    for condition in conditions {
        let (column, value) = match condition {
            Condition::ExternalId(id) => ("external_id", SqlValue::Text(id.clone())),
            Condition::InternalId(id) => ("internal_id", SqlValue::Integer(*id)),
            Condition::BackendId(id) => ("backend_id", SqlValue::Integer(*id)),
        };
        values.push(value);
        sql.push_str(&format!(" AND {} = ?{}", column, values.len()));
    }

    if archived == Archived::Exclude {
        sql.push_str(" AND active = 1");
    }
    sql.push_str(" ORDER BY id");

    let mut stmt = conn.prepare(&sql)?;
    let bindings = stmt
        .query_map(params_from_iter(values), binding_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(bindings)
}

pub fn get_binding(conn: &Connection, model: &str, id: RecordId) -> Result<Option<BindingRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM magento_bindings WHERE model = ?1 AND id = ?2",
        BINDING_COLUMNS
    ))?;
    let mut rows = stmt.query_map(params![model, id], binding_from_row)?;
    let binding = rows.next().transpose()?;
    Ok(binding)
}

/// Set external id and sync date and log the change, all or nothing
pub fn write_binding(
    conn: &Connection,
    model: &str,
    id: RecordId,
    update: &BindingUpdate,
    origin: WriteOrigin,
) -> Result<()> {
    let tx = conn.unchecked_transaction()?;

    let changed = tx.execute(
        "UPDATE magento_bindings SET external_id = ?1, sync_date = ?2
         WHERE model = ?3 AND id = ?4",
        params![update.external_id, update.sync_date.to_rfc3339(), model, id],
    )?;
    if changed == 0 {
        return Err(ConnectorError::PreconditionViolation(format!(
            "{} {} does not exist",
            model, id
        )));
    }

    insert_event(&tx, &Event::binding_written(model, id, update, origin))?;
    tx.commit()?;

    debug!(model, id, external_id = %update.external_id, "binding written");
    Ok(())
}

// ============================================================================
// TAXES
// ============================================================================

pub fn insert_tax(conn: &Connection, tax: &TaxRecord) -> Result<RecordId> {
    conn.execute(
        "INSERT INTO taxes (name, rate, inclusive, usage, active) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![tax.name, tax.rate, tax.inclusive, tax.usage.as_str(), tax.active],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn insert_taxes(conn: &Connection, taxes: &[TaxRecord]) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    for tax in taxes {
        insert_tax(&tx, tax)?;
    }
    tx.commit()?;

    info!(count = taxes.len(), "taxes inserted");
    Ok(taxes.len())
}

pub fn search_taxes(conn: &Connection, query: &TaxQuery) -> Result<Vec<TaxRecord>> {
    if query.usages.is_empty() {
        return Ok(Vec::new());
    }

    let mut values: Vec<SqlValue> = vec![
        SqlValue::Integer(query.inclusive as i64),
        SqlValue::Real(query.min_rate),
        SqlValue::Real(query.max_rate),
    ];
    let mut placeholders = Vec::new();
    for usage in &query.usages {
        values.push(SqlValue::Text(usage.as_str().to_string()));
        placeholders.push(format!("?{}", values.len()));
    }

    let sql = format!(
        "SELECT id, name, rate, inclusive, usage, active FROM taxes
         WHERE active = 1 AND inclusive = ?1 AND rate >= ?2 AND rate <= ?3
           AND usage IN ({})
         ORDER BY id",
        placeholders.join(", ")
    );

    let mut stmt = conn.prepare(&sql)?;
    let taxes = stmt
        .query_map(params_from_iter(values), tax_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(taxes)
}

/// CSV row for tax seeding: `name,rate,inclusive,usage`
#[derive(Debug, Deserialize)]
struct TaxCsvRow {
    name: String,
    rate: f64,
    #[serde(default)]
    inclusive: bool,
    #[serde(default = "default_usage")]
    usage: String,
}

fn default_usage() -> String {
    "sale".to_string()
}

pub fn load_taxes_csv(csv_path: &Path) -> anyhow::Result<Vec<TaxRecord>> {
    let mut rdr = csv::Reader::from_path(csv_path)
        .with_context(|| format!("Failed to open CSV file: {}", csv_path.display()))?;

    let mut taxes = Vec::new();

    for (line, result) in rdr.deserialize().enumerate() {
        let row: TaxCsvRow = result.context("Failed to deserialize tax")?;
        let usage = TaxUsage::parse(&row.usage)
            .with_context(|| format!("Unknown tax usage '{}' on row {}", row.usage, line + 1))?;

        // ids are assigned on insert
        taxes.push(TaxRecord::new(0, &row.name, row.rate, row.inclusive, usage));
    }

    Ok(taxes)
}

// ============================================================================
// EVENTS
// ============================================================================

/// Insert event into the change log
pub fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

/// Get events for a specific entity, newest first
pub fn get_events_for_entity(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY timestamp DESC",
    )?;

    let events = stmt
        .query_map(params![entity_type, entity_id], |row| {
            let timestamp: Option<String> = row.get(1)?;
            let data_json: String = row.get(5)?;

            Ok(Event {
                event_id: row.get(0)?,
                timestamp: parse_timestamp(1, timestamp)?.unwrap_or_default(),
                event_type: row.get(2)?,
                entity_type: row.get(3)?,
                entity_id: row.get(4)?,
                data: serde_json::from_str(&data_json).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e))
                })?,
                actor: row.get(6)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(events)
}

// ============================================================================
// SQLITE STORE
// ============================================================================

/// `BindingStore` and `TaxStore` over one SQLite connection
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (and create if needed) the database at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        setup_database(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        setup_database(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Direct access for inserts and maintenance
    pub fn connection(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl BindingStore for SqliteStore {
    fn search_bindings(
        &self,
        model: &str,
        conditions: &[Condition],
        archived: Archived,
    ) -> Result<Vec<BindingRecord>> {
        search_bindings(&self.connection(), model, conditions, archived)
    }

    fn browse_binding(&self, model: &str, id: RecordId) -> Result<Option<BindingRecord>> {
        get_binding(&self.connection(), model, id)
    }

    fn write_binding(
        &self,
        model: &str,
        id: RecordId,
        update: &BindingUpdate,
        origin: WriteOrigin,
    ) -> Result<()> {
        write_binding(&self.connection(), model, id, update, origin)
    }
}

impl TaxStore for SqliteStore {
    fn search_taxes(&self, query: &TaxQuery) -> Result<Vec<TaxRecord>> {
        search_taxes(&self.connection(), query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    #[test]
    fn test_insert_and_get_binding() {
        let conn = setup();
        let binding = BindingRecord::new("magento.product.product", 42, 1).with_external_id("0");

        let id = insert_binding(&conn, &binding).unwrap();
        let stored = get_binding(&conn, "magento.product.product", id).unwrap().unwrap();

        assert_eq!(stored.id, id);
        assert_eq!(stored.external_id.as_deref(), Some("0"));
        assert_eq!(stored.internal_id, Some(42));
        assert!(stored.active);
        assert!(stored.sync_date.is_none());

        // Same id under another model is a different record
        assert!(get_binding(&conn, "magento.sale.order", id).unwrap().is_none());
    }

    #[test]
    fn test_unique_internal_per_backend() {
        let conn = setup();
        insert_binding(&conn, &BindingRecord::new("magento.res.partner", 7, 1)).unwrap();

        let duplicate = insert_binding(&conn, &BindingRecord::new("magento.res.partner", 7, 1));
        assert!(matches!(duplicate, Err(ConnectorError::Storage(_))));

        // Another backend may bind the same partner
        insert_binding(&conn, &BindingRecord::new("magento.res.partner", 7, 2)).unwrap();
    }

    #[test]
    fn test_unique_external_per_backend() {
        let conn = setup();
        insert_binding(
            &conn,
            &BindingRecord::new("magento.res.partner", 7, 1).with_external_id("100"),
        )
        .unwrap();

        let duplicate = insert_binding(
            &conn,
            &BindingRecord::new("magento.res.partner", 8, 1).with_external_id("100"),
        );
        assert!(duplicate.is_err());

        // Unbound rows (NULL external id) never collide
        insert_binding(&conn, &BindingRecord::new("magento.res.partner", 9, 1)).unwrap();
        insert_binding(&conn, &BindingRecord::new("magento.res.partner", 10, 1)).unwrap();
    }

    #[test]
    fn test_search_bindings_archived() {
        let conn = setup();
        let id = insert_binding(
            &conn,
            &BindingRecord::new("magento.sale.order", 3, 1).with_external_id("000000012"),
        )
        .unwrap();
        set_binding_active(&conn, id, false).unwrap();

        let conditions = [
            Condition::ExternalId("000000012".to_string()),
            Condition::BackendId(1),
        ];
        let hidden = search_bindings(&conn, "magento.sale.order", &conditions, Archived::Exclude).unwrap();
        assert!(hidden.is_empty());

        let found = search_bindings(&conn, "magento.sale.order", &conditions, Archived::Include).unwrap();
        assert_eq!(found.len(), 1);
        assert!(!found[0].active);
    }

    #[test]
    fn test_write_binding_logs_no_export_event() {
        let conn = setup();
        let id = insert_binding(&conn, &BindingRecord::new("magento.account.invoice", 5, 1)).unwrap();

        let update = BindingUpdate {
            external_id: "100000001".to_string(),
            sync_date: Utc::now(),
        };
        write_binding(&conn, "magento.account.invoice", id, &update, WriteOrigin::Connector).unwrap();

        let stored = get_binding(&conn, "magento.account.invoice", id).unwrap().unwrap();
        assert_eq!(stored.external_id.as_deref(), Some("100000001"));
        assert!(stored.sync_date.is_some());

        let events = get_events_for_entity(&conn, "magento.account.invoice", &id.to_string()).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "binding_written");
        assert_eq!(events[0].actor, "connector");
        assert!(events[0].suppresses_export());
    }

    #[test]
    fn test_write_missing_binding_rolls_back() {
        let conn = setup();
        let update = BindingUpdate {
            external_id: "1".to_string(),
            sync_date: Utc::now(),
        };

        let err = write_binding(&conn, "magento.res.partner", 404, &update, WriteOrigin::Connector)
            .unwrap_err();
        assert!(err.is_precondition_violation());

        let events = get_events_for_entity(&conn, "magento.res.partner", "404").unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn test_search_taxes() {
        let conn = setup();
        insert_taxes(
            &conn,
            &[
                TaxRecord::new(0, "VAT 20%", 20.0, false, TaxUsage::Sale),
                TaxRecord::new(0, "VAT 20% incl.", 20.0, true, TaxUsage::Sale),
                TaxRecord::new(0, "VAT 20% purchase", 20.0, false, TaxUsage::Purchase),
                TaxRecord::new(0, "VAT 5.5%", 5.5, false, TaxUsage::Sale),
            ],
        )
        .unwrap();

        let query = TaxQuery::around(20.0, 0.001, false, &[TaxUsage::Sale]);
        let found = search_taxes(&conn, &query).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "VAT 20%");

        let both = TaxQuery::around(20.0, 0.001, false, &[TaxUsage::Sale, TaxUsage::Purchase]);
        assert_eq!(search_taxes(&conn, &both).unwrap().len(), 2);

        let none = TaxQuery::around(20.0, 0.001, false, &[]);
        assert!(search_taxes(&conn, &none).unwrap().is_empty());
    }

    #[test]
    fn test_stored_tax_with_unknown_usage_is_rejected() {
        let conn = setup();
        conn.execute(
            "INSERT INTO taxes (name, rate, inclusive, usage) VALUES ('Eco fee', 0.5, 0, 'adjustment')",
            [],
        )
        .unwrap();

        let err = conn
            .query_row(
                "SELECT id, name, rate, inclusive, usage, active FROM taxes",
                [],
                tax_from_row,
            )
            .unwrap_err();
        assert!(matches!(err, rusqlite::Error::FromSqlConversionFailure(4, Type::Text, _)));
        assert!(err.to_string().contains("unknown tax usage: adjustment"));
    }

    #[test]
    fn test_standalone_bindings_never_collide_on_internal_id() {
        let conn = setup();
        insert_binding(
            &conn,
            &BindingRecord::standalone("magento.website", 1).with_external_id("0"),
        )
        .unwrap();
        let id = insert_binding(
            &conn,
            &BindingRecord::standalone("magento.website", 1).with_external_id("1"),
        )
        .unwrap();

        let stored = get_binding(&conn, "magento.website", id).unwrap().unwrap();
        assert_eq!(stored.internal_id, None);
        assert_eq!(stored.external_id.as_deref(), Some("1"));
    }

    #[test]
    fn test_load_taxes_csv() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "name,rate,inclusive,usage").unwrap();
        writeln!(file, "VAT 20%,20.0,false,sale").unwrap();
        writeln!(file, "VAT 20% incl.,20.0,true,sale").unwrap();
        writeln!(file, "Import duty,2.5,false,purchase").unwrap();
        file.flush().unwrap();

        let taxes = load_taxes_csv(file.path()).unwrap();
        assert_eq!(taxes.len(), 3);
        assert!(taxes[1].inclusive);
        assert_eq!(taxes[2].usage, TaxUsage::Purchase);
    }

    #[test]
    fn test_load_taxes_csv_rejects_unknown_usage() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "name,rate,inclusive,usage").unwrap();
        writeln!(file, "Odd,1.0,false,adjustment").unwrap();
        file.flush().unwrap();

        let err = load_taxes_csv(file.path()).unwrap_err();
        assert!(err.to_string().contains("adjustment"));
    }

    #[test]
    fn test_sqlite_store_is_a_binding_store() {
        let store = SqliteStore::in_memory().unwrap();
        let id = insert_binding(
            &store.connection(),
            &BindingRecord::new("magento.stock.picking", 11, 1),
        )
        .unwrap();

        let found = store.browse_binding("magento.stock.picking", id).unwrap();
        assert_eq!(found.unwrap().internal_id, Some(11));
    }
}
