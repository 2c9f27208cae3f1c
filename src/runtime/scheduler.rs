/// Background cron scheduler service
///
/// A tokio-cron-scheduler job fires on the configured tick expression and
/// evaluates every stored schedule. Each due schedule is claimed through the
/// gateway, which advances `next_run_at` and inserts the pending execution in
/// one transaction; only the claimer that wins spawns the run. Two ticks
/// racing on the same schedule (or a tick replayed after a restart) therefore
/// create at most one execution per due time.

use crate::error::EngineError;
use crate::gateway::{Execution, Schedule};
use crate::runtime::engine::ExecutionEngine;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::{str::FromStr, sync::Arc};
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler};

/// Step type marking the entry point scheduled runs fire
const SCHEDULE_TRIGGER: &str = "trigger.schedule";

pub struct ScheduleService {
    scheduler: RwLock<JobScheduler>,
    engine: Arc<ExecutionEngine>,
    tick_expression: String,
}

impl ScheduleService {
    pub async fn new(engine: Arc<ExecutionEngine>, tick_expression: &str) -> Result<Self> {
        let scheduler = JobScheduler::new().await?;
        Ok(Self {
            scheduler: RwLock::new(scheduler),
            engine,
            tick_expression: tick_expression.to_string(),
        })
    }

    /// Register the tick job and start the scheduler
    pub async fn start(&self) -> Result<()> {
        tracing::info!("⏰ Starting schedule service (tick: {})", self.tick_expression);

        let engine = Arc::clone(&self.engine);
        let job = Job::new_async(self.tick_expression.as_str(), move |_uuid, _l| {
            let engine = Arc::clone(&engine);
            Box::pin(async move {
                if let Err(e) = run_due(&engine, Utc::now()).await {
                    tracing::error!("❌ Schedule tick failed: {}", e);
                }
            })
        })?;

        {
            let scheduler = self.scheduler.write().await;
            scheduler.add(job).await?;
            scheduler.start().await?;
        }

        tracing::info!("✅ Schedule service started");
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        tracing::info!("⏹️ Stopping schedule service");
        {
            let mut scheduler = self.scheduler.write().await;
            scheduler.shutdown().await?;
        }
        tracing::info!("✅ Schedule service stopped");
        Ok(())
    }

    /// Evaluate every schedule against `now`; returns the created execution ids
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        run_due(&self.engine, now).await
    }

    /// Store a new active schedule for an existing flow
    pub async fn create_schedule(&self, flow_id: &str, cron_expression: &str) -> Result<Schedule, EngineError> {
        self.engine.flows().load(flow_id).await?;

        let now = Utc::now();
        let next_run_at = next_run_after(cron_expression, now)?;
        let schedule = Schedule {
            id: uuid::Uuid::new_v4().to_string(),
            flow_id: flow_id.to_string(),
            cron_expression: cron_expression.to_string(),
            next_run_at,
            last_run_at: None,
            active: true,
        };
        self.engine.gateway().save_schedule(&schedule).await?;

        tracing::info!("📅 Scheduled flow '{}' ({}), next run at {}", flow_id, cron_expression, next_run_at);
        Ok(schedule)
    }
}

/// Accept five-field expressions by prepending a zero seconds field
fn normalize(expression: &str) -> String {
    let expression = expression.trim();
    if expression.split_whitespace().count() == 5 {
        format!("0 {}", expression)
    } else {
        expression.to_string()
    }
}

/// First fire time strictly after `after`
pub fn next_run_after(expression: &str, after: DateTime<Utc>) -> Result<DateTime<Utc>, EngineError> {
    let invalid = |reason: String| EngineError::InvalidSchedule {
        expression: expression.to_string(),
        reason,
    };
    let schedule = cron::Schedule::from_str(&normalize(expression)).map_err(|e| invalid(e.to_string()))?;
    schedule.after(&after).next().ok_or_else(|| invalid("expression never fires again".to_string()))
}

async fn run_due(engine: &Arc<ExecutionEngine>, now: DateTime<Utc>) -> Result<Vec<String>> {
    let schedules = engine.gateway().list_schedules().await?;
    let mut created = Vec::new();

    for schedule in schedules.into_iter().filter(|s| s.active && s.next_run_at <= now) {
        // Missed fire times collapse into this one run
        let next_run_at = match next_run_after(&schedule.cron_expression, now) {
            Ok(next) => next,
            Err(e) => {
                tracing::warn!("⚠️ Skipping schedule {}: {}", schedule.id, e);
                continue;
            }
        };

        let trigger_node_id = match engine.flows().load_active(&schedule.flow_id).await {
            Ok(flow) => flow.triggers().iter()
                .find(|id| flow.node(id).is_some_and(|node| node.step_type == SCHEDULE_TRIGGER))
                .cloned(),
            Err(EngineError::FlowNotFound(_)) => {
                tracing::warn!("⚠️ Schedule {} points at missing flow '{}'", schedule.id, schedule.flow_id);
                continue;
            }
            Err(EngineError::FlowInactive(_)) => {
                // Skipped fire times are not replayed when the flow is switched back on
                tracing::debug!("⏭️ Schedule {} skipped, flow '{}' is inactive", schedule.id, schedule.flow_id);
                let advanced = Schedule { next_run_at, ..schedule };
                engine.gateway().save_schedule(&advanced).await?;
                continue;
            }
            // The walk records the configuration error on the execution
            Err(_) => None,
        };

        let execution = Execution::pending(&schedule.flow_id, json!({}), trigger_node_id);
        if engine.gateway().claim_schedule(&schedule, now, next_run_at, &execution).await? {
            tracing::info!("🔔 Schedule {} fired execution {} for flow '{}'",
                schedule.id, execution.id, schedule.flow_id);
            engine.spawn(&execution.id);
            created.push(execution.id);
        } else {
            tracing::debug!("⏭️ Schedule {} was claimed elsewhere", schedule.id);
        }
    }

    Ok(created)
}
