/// SQLite persistence gateway
///
/// Flows, executions, step results and schedules live in one SQLite database.
/// Structured fields (definitions, inputs, outputs, metadata) are stored as
/// JSON text; timestamps as RFC 3339 text with millisecond precision.

use crate::gateway::{
    Execution, ExecutionStatus, FlowRecord, Gateway, Schedule, StepResult,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow},
    Row,
};
use std::str::FromStr;

/// sqlx-backed gateway
#[derive(Debug, Clone)]
pub struct SqliteGateway {
    pool: SqlitePool,
}

impl SqliteGateway {
    /// Wrap an existing pool; call `init_schema` before use
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if missing) the database at `url` and initialise the schema
    pub async fn connect(url: &str) -> Result<Self> {
        tracing::info!("🗄️ Opening SQLite database: {}", url);
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        let gateway = Self::new(pool);
        gateway.init_schema().await?;
        Ok(gateway)
    }

    /// Private in-memory database; a single connection keeps every query on the same database
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let gateway = Self::new(pool);
        gateway.init_schema().await?;
        Ok(gateway)
    }

    /// Create tables and indexes. Safe to call repeatedly.
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS flows (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                definition_json TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS executions (
                id TEXT PRIMARY KEY,
                flow_id TEXT NOT NULL,
                status TEXT NOT NULL,
                trigger_data_json TEXT NOT NULL,
                trigger_node_id TEXT,
                current_node_id TEXT,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                error TEXT,
                suspend_reason TEXT,
                suspend_metadata_json TEXT,
                resume_data_json TEXT NOT NULL DEFAULT '{}'
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS step_results (
                id TEXT PRIMARY KEY,
                execution_id TEXT NOT NULL,
                node_id TEXT NOT NULL,
                step_type TEXT NOT NULL,
                inputs_json TEXT NOT NULL,
                outputs_json TEXT NOT NULL,
                status TEXT NOT NULL,
                branch TEXT,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                error TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schedules (
                id TEXT PRIMARY KEY,
                flow_id TEXT NOT NULL,
                cron_expression TEXT NOT NULL,
                next_run_at TEXT NOT NULL,
                last_run_at TEXT,
                active INTEGER NOT NULL DEFAULT 1
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_executions_status ON executions(status)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_step_results_execution ON step_results(execution_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(text: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(text)?.with_timezone(&Utc))
}

fn parse_optional_timestamp(text: Option<String>) -> Result<Option<DateTime<Utc>>> {
    text.as_deref().map(parse_timestamp).transpose()
}

fn parse_map(text: &str) -> Result<Map<String, Value>> {
    Ok(serde_json::from_str(text)?)
}

fn flow_from_row(row: &SqliteRow) -> Result<FlowRecord> {
    let definition_json: String = row.try_get("definition_json")?;
    Ok(FlowRecord {
        definition: serde_json::from_str(&definition_json)?,
        description: row.try_get("description")?,
        active: row.try_get::<i64, _>("active")? != 0,
        created_at: parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
        updated_at: parse_timestamp(&row.try_get::<String, _>("updated_at")?)?,
    })
}

fn execution_from_row(row: &SqliteRow) -> Result<Execution> {
    let status: String = row.try_get("status")?;
    let trigger_data: String = row.try_get("trigger_data_json")?;
    let suspend_metadata: Option<String> = row.try_get("suspend_metadata_json")?;
    let resume_data: String = row.try_get("resume_data_json")?;
    Ok(Execution {
        id: row.try_get("id")?,
        flow_id: row.try_get("flow_id")?,
        status: status.parse()?,
        trigger_data: serde_json::from_str(&trigger_data)?,
        trigger_node_id: row.try_get("trigger_node_id")?,
        current_node_id: row.try_get("current_node_id")?,
        started_at: parse_timestamp(&row.try_get::<String, _>("started_at")?)?,
        completed_at: parse_optional_timestamp(row.try_get("completed_at")?)?,
        error: row.try_get("error")?,
        suspend_reason: row.try_get("suspend_reason")?,
        suspend_metadata: suspend_metadata.as_deref().map(parse_map).transpose()?,
        resume_data: parse_map(&resume_data)?,
    })
}

fn step_result_from_row(row: &SqliteRow) -> Result<StepResult> {
    let status: String = row.try_get("status")?;
    Ok(StepResult {
        id: row.try_get("id")?,
        execution_id: row.try_get("execution_id")?,
        node_id: row.try_get("node_id")?,
        step_type: row.try_get("step_type")?,
        inputs: parse_map(&row.try_get::<String, _>("inputs_json")?)?,
        outputs: parse_map(&row.try_get::<String, _>("outputs_json")?)?,
        status: status.parse()?,
        branch: row.try_get("branch")?,
        started_at: parse_timestamp(&row.try_get::<String, _>("started_at")?)?,
        completed_at: parse_optional_timestamp(row.try_get("completed_at")?)?,
        error: row.try_get("error")?,
    })
}

fn schedule_from_row(row: &SqliteRow) -> Result<Schedule> {
    Ok(Schedule {
        id: row.try_get("id")?,
        flow_id: row.try_get("flow_id")?,
        cron_expression: row.try_get("cron_expression")?,
        next_run_at: parse_timestamp(&row.try_get::<String, _>("next_run_at")?)?,
        last_run_at: parse_optional_timestamp(row.try_get("last_run_at")?)?,
        active: row.try_get::<i64, _>("active")? != 0,
    })
}

const INSERT_EXECUTION: &str = r#"
    INSERT INTO executions (
        id, flow_id, status, trigger_data_json, trigger_node_id, current_node_id,
        started_at, completed_at, error, suspend_reason, suspend_metadata_json, resume_data_json
    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
"#;

/// Bind every execution column in `INSERT_EXECUTION` order
fn bind_execution<'q>(
    query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    execution: &Execution,
) -> Result<sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>> {
    let suspend_metadata = execution
        .suspend_metadata
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    Ok(query
        .bind(execution.id.clone())
        .bind(execution.flow_id.clone())
        .bind(execution.status.as_str())
        .bind(serde_json::to_string(&execution.trigger_data)?)
        .bind(execution.trigger_node_id.clone())
        .bind(execution.current_node_id.clone())
        .bind(timestamp(&execution.started_at))
        .bind(execution.completed_at.as_ref().map(timestamp))
        .bind(execution.error.clone())
        .bind(execution.suspend_reason.clone())
        .bind(suspend_metadata)
        .bind(serde_json::to_string(&execution.resume_data)?))
}

#[async_trait]
impl Gateway for SqliteGateway {
    async fn save_flow(&self, flow: &FlowRecord) -> Result<()> {
        let definition_json = serde_json::to_string(&flow.definition)?;

        sqlx::query(
            r#"
            INSERT INTO flows (id, name, description, definition_json, active, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                description = excluded.description,
                definition_json = excluded.definition_json,
                active = excluded.active,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(flow.id())
        .bind(&flow.definition.name)
        .bind(&flow.description)
        .bind(&definition_json)
        .bind(flow.active as i64)
        .bind(timestamp(&flow.created_at))
        .bind(timestamp(&flow.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_flow(&self, id: &str) -> Result<Option<FlowRecord>> {
        let row = sqlx::query("SELECT * FROM flows WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(flow_from_row).transpose()
    }

    async fn list_flows(&self) -> Result<Vec<FlowRecord>> {
        let rows = sqlx::query("SELECT * FROM flows ORDER BY updated_at DESC")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(flow_from_row).collect()
    }

    async fn delete_flow(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM flows WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn insert_execution(&self, execution: &Execution) -> Result<()> {
        bind_execution(sqlx::query(INSERT_EXECUTION), execution)?
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_execution(&self, id: &str) -> Result<Option<Execution>> {
        let row = sqlx::query("SELECT * FROM executions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(execution_from_row).transpose()
    }

    async fn list_executions(&self, status: ExecutionStatus) -> Result<Vec<Execution>> {
        let rows = sqlx::query("SELECT * FROM executions WHERE status = ? ORDER BY started_at")
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(execution_from_row).collect()
    }

    async fn compare_and_set(
        &self,
        execution: &Execution,
        expected: &[ExecutionStatus],
    ) -> Result<bool> {
        if expected.is_empty() {
            return Ok(false);
        }
        let placeholders = vec!["?"; expected.len()].join(", ");
        let sql = format!(
            r#"
            UPDATE executions SET
                status = ?, current_node_id = ?, completed_at = ?, error = ?,
                suspend_reason = ?, suspend_metadata_json = ?, resume_data_json = ?
            WHERE id = ? AND status IN ({})
            "#,
            placeholders
        );

        let suspend_metadata = execution
            .suspend_metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let mut query = sqlx::query(&sql)
            .bind(execution.status.as_str())
            .bind(&execution.current_node_id)
            .bind(execution.completed_at.as_ref().map(timestamp))
            .bind(&execution.error)
            .bind(&execution.suspend_reason)
            .bind(suspend_metadata)
            .bind(serde_json::to_string(&execution.resume_data)?)
            .bind(&execution.id);
        for status in expected {
            query = query.bind(status.as_str());
        }

        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected() == 1)
    }

    async fn append_step_result(&self, result: &StepResult) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO step_results (
                id, execution_id, node_id, step_type, inputs_json, outputs_json,
                status, branch, started_at, completed_at, error
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&result.id)
        .bind(&result.execution_id)
        .bind(&result.node_id)
        .bind(&result.step_type)
        .bind(serde_json::to_string(&result.inputs)?)
        .bind(serde_json::to_string(&result.outputs)?)
        .bind(result.status.as_str())
        .bind(&result.branch)
        .bind(timestamp(&result.started_at))
        .bind(result.completed_at.as_ref().map(timestamp))
        .bind(&result.error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_step_results(&self, execution_id: &str) -> Result<Vec<StepResult>> {
        let rows = sqlx::query("SELECT * FROM step_results WHERE execution_id = ? ORDER BY rowid")
            .bind(execution_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(step_result_from_row).collect()
    }

    async fn save_schedule(&self, schedule: &Schedule) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO schedules (id, flow_id, cron_expression, next_run_at, last_run_at, active)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                flow_id = excluded.flow_id,
                cron_expression = excluded.cron_expression,
                next_run_at = excluded.next_run_at,
                last_run_at = excluded.last_run_at,
                active = excluded.active
            "#,
        )
        .bind(&schedule.id)
        .bind(&schedule.flow_id)
        .bind(&schedule.cron_expression)
        .bind(timestamp(&schedule.next_run_at))
        .bind(schedule.last_run_at.as_ref().map(timestamp))
        .bind(schedule.active as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_schedules(&self) -> Result<Vec<Schedule>> {
        let rows = sqlx::query("SELECT * FROM schedules ORDER BY next_run_at")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(schedule_from_row).collect()
    }

    async fn delete_schedule(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM schedules WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn claim_schedule(
        &self,
        schedule: &Schedule,
        now: DateTime<Utc>,
        next_run_at: DateTime<Utc>,
        execution: &Execution,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let claimed = sqlx::query(
            r#"
            UPDATE schedules SET next_run_at = ?, last_run_at = ?
            WHERE id = ? AND next_run_at = ? AND active = 1
            "#,
        )
        .bind(timestamp(&next_run_at))
        .bind(timestamp(&now))
        .bind(&schedule.id)
        .bind(timestamp(&schedule.next_run_at))
        .execute(&mut *tx)
        .await?;

        if claimed.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        bind_execution(sqlx::query(INSERT_EXECUTION), execution)?
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::types::FlowDefinition;
    use crate::gateway::StepResultStatus;
    use chrono::Duration;
    use serde_json::json;

    fn flow_record(id: &str) -> FlowRecord {
        FlowRecord::new(FlowDefinition {
            id: id.into(),
            name: format!("Flow {id}"),
            nodes: Vec::new(),
            edges: Vec::new(),
            variables: Vec::new(),
        })
    }

    #[tokio::test]
    async fn flows_upsert_and_delete() {
        let gateway = SqliteGateway::in_memory().await.unwrap();
        let mut record = flow_record("f1");
        gateway.save_flow(&record).await.unwrap();

        record.definition.name = "Renamed".into();
        gateway.save_flow(&record).await.unwrap();

        let loaded = gateway.get_flow("f1").await.unwrap().unwrap();
        assert_eq!(loaded.definition.name, "Renamed");
        assert_eq!(gateway.list_flows().await.unwrap().len(), 1);
        assert!(gateway.delete_flow("f1").await.unwrap());
        assert!(gateway.get_flow("f1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn compare_and_set_only_applies_from_expected_status() {
        let gateway = SqliteGateway::in_memory().await.unwrap();
        let mut execution = Execution::pending("f1", json!({"a": 1}), None);
        gateway.insert_execution(&execution).await.unwrap();

        execution.status = ExecutionStatus::Running;
        assert!(gateway.compare_and_set(&execution, &[ExecutionStatus::Pending]).await.unwrap());
        // Second claimer still expects pending and loses
        assert!(!gateway.compare_and_set(&execution, &[ExecutionStatus::Pending]).await.unwrap());

        execution.status = ExecutionStatus::Suspended;
        execution.current_node_id = Some("wait".into());
        execution.suspend_metadata = Some(json!({"ticket": 7}).as_object().unwrap().clone());
        assert!(gateway.compare_and_set(&execution, &[ExecutionStatus::Running]).await.unwrap());

        let stored = gateway.get_execution(&execution.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ExecutionStatus::Suspended);
        assert_eq!(stored.current_node_id.as_deref(), Some("wait"));
        assert_eq!(stored.suspend_metadata, execution.suspend_metadata);
        assert_eq!(stored.trigger_data, json!({"a": 1}));
        assert_eq!(gateway.list_executions(ExecutionStatus::Suspended).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn step_results_keep_append_order() {
        let gateway = SqliteGateway::in_memory().await.unwrap();
        for node in ["a", "b", "c"] {
            gateway.append_step_result(&StepResult {
                id: uuid::Uuid::new_v4().to_string(),
                execution_id: "x".into(),
                node_id: node.into(),
                step_type: "logic.echo".into(),
                inputs: Map::new(),
                outputs: json!({"message": node}).as_object().unwrap().clone(),
                status: StepResultStatus::Completed,
                branch: None,
                started_at: Utc::now(),
                completed_at: Some(Utc::now()),
                error: None,
            }).await.unwrap();
        }
        let nodes: Vec<String> = gateway.list_step_results("x").await.unwrap()
            .into_iter().map(|r| r.node_id).collect();
        assert_eq!(nodes, ["a", "b", "c"]);
    }

    #[tokio::test]
    async fn schedule_claim_is_exclusive_and_creates_execution() {
        let gateway = SqliteGateway::in_memory().await.unwrap();
        let now = Utc::now();
        let schedule = Schedule {
            id: "s1".into(),
            flow_id: "f1".into(),
            cron_expression: "0 * * * * *".into(),
            next_run_at: now - Duration::seconds(5),
            last_run_at: None,
            active: true,
        };
        gateway.save_schedule(&schedule).await.unwrap();

        let first = Execution::pending("f1", json!({}), None);
        let second = Execution::pending("f1", json!({}), None);
        let next = now + Duration::minutes(1);
        assert!(gateway.claim_schedule(&schedule, now, next, &first).await.unwrap());
        // Stale snapshot of the same schedule loses
        assert!(!gateway.claim_schedule(&schedule, now, next, &second).await.unwrap());

        let pending = gateway.list_executions(ExecutionStatus::Pending).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, first.id);

        let stored = &gateway.list_schedules().await.unwrap()[0];
        assert_eq!(stored.next_run_at.timestamp_millis(), next.timestamp_millis());
        assert!(stored.last_run_at.is_some());
    }
}
