//! Scheduled producers: heartbeat, daily summary, cost alert.
//!
//! Producers only append rows; consumption is the agent loop's and external
//! tooling's business. Each producer is its own task and stops on the
//! shared cancellation token.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use serde_json::json;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use env_config::ScheduledTaskConfig;

use crate::observe::ObservabilityWriter;
use crate::stream::LogStore;
use crate::types::{MessageRecord, MessageType, Severity, TARGET_AGENT};

pub const TASK_HEARTBEAT: &str = "heartbeat";
pub const TASK_DAILY_SUMMARY: &str = "daily_summary";
pub const TASK_COST_ALERT: &str = "cost_alert";

const DEFAULT_HEARTBEAT_MINUTES: u64 = 30;
const DEFAULT_COST_THRESHOLD: f64 = 5.0;

pub struct ScheduledProducers {
    logs: Arc<dyn LogStore>,
    observe: Arc<ObservabilityWriter>,
    agent_name: String,
    tasks: BTreeMap<String, ScheduledTaskConfig>,
    shutdown: CancellationToken,
}

impl ScheduledProducers {
    pub fn new(
        logs: Arc<dyn LogStore>,
        observe: Arc<ObservabilityWriter>,
        agent_name: impl Into<String>,
        tasks: BTreeMap<String, ScheduledTaskConfig>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            logs,
            observe,
            agent_name: agent_name.into(),
            tasks,
            shutdown,
        }
    }

    /// Spawns one task per enabled producer and returns their handles.
    pub fn spawn(self: Arc<Self>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        if self.enabled(TASK_HEARTBEAT) {
            let this = Arc::clone(&self);
            handles.push(tokio::spawn(async move { this.run_heartbeat().await }));
        }
        if self.enabled(TASK_DAILY_SUMMARY) {
            let this = Arc::clone(&self);
            handles.push(tokio::spawn(async move { this.run_daily_summary().await }));
        }
        if self.enabled(TASK_COST_ALERT) {
            let this = Arc::clone(&self);
            handles.push(tokio::spawn(async move { this.run_cost_alert().await }));
        }
        handles
    }

    fn enabled(&self, name: &str) -> bool {
        self.tasks.get(name).map(|t| t.enabled).unwrap_or(false)
    }

    fn task(&self, name: &str) -> ScheduledTaskConfig {
        self.tasks.get(name).cloned().unwrap_or_default()
    }

    async fn run_heartbeat(&self) {
        let task = self.task(TASK_HEARTBEAT);
        let minutes = task.interval_minutes.unwrap_or(DEFAULT_HEARTBEAT_MINUTES);
        let period = std::time::Duration::from_secs(minutes * 60);
        let text = task
            .payload
            .unwrap_or_else(|| "Periodic heartbeat.".to_string());
        info!(every_minutes = minutes, "heartbeat producer running");
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = tokio::time::sleep(period) => {}
            }
            let message = MessageRecord::new(
                TASK_HEARTBEAT,
                TARGET_AGENT,
                format!("heartbeat-{}", Utc::now().format("%Y%m%d")),
                MessageType::Heartbeat,
                &json!({"text": text}),
            )
            .with_priority(-1);
            if let Err(e) = self.logs.append_message(&message).await {
                warn!(error = %e, "heartbeat append failed");
            }
        }
    }

    async fn run_daily_summary(&self) {
        let task = self.task(TASK_DAILY_SUMMARY);
        let (hour, minute) = task
            .daily_time
            .as_deref()
            .and_then(env_config::parse_daily_time)
            .unwrap_or((0, 0));
        let text = task
            .payload
            .unwrap_or_else(|| "Summarize today's conversations and activity.".to_string());
        info!(hour, minute, "daily summary producer running");
        loop {
            let wait = until_next_daily(Utc::now(), hour, minute)
                .to_std()
                .unwrap_or_default();
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = tokio::time::sleep(wait) => {}
            }
            let message = MessageRecord::new(
                TASK_DAILY_SUMMARY,
                TARGET_AGENT,
                format!("daily-summary-{}", Utc::now().format("%Y%m%d")),
                MessageType::ScheduledTask,
                &json!({"text": text, "task": TASK_DAILY_SUMMARY}),
            )
            .with_priority(1);
            if let Err(e) = self.logs.append_message(&message).await {
                warn!(error = %e, "daily summary append failed");
            }
        }
    }

    async fn run_cost_alert(&self) {
        let task = self.task(TASK_COST_ALERT);
        let threshold = task
            .hourly_cost_threshold
            .unwrap_or(DEFAULT_COST_THRESHOLD);
        let period = std::time::Duration::from_secs(3600);
        info!(threshold, "cost alert producer running");
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = tokio::time::sleep(period) => {}
            }
            match self.logs.hourly_llm_cost().await {
                Ok(cost) if cost > threshold => {
                    self.observe
                        .record_event(
                            "cost_alert",
                            Severity::Warning,
                            &json!({
                                "hourly_cost": cost,
                                "threshold": threshold,
                                "agent": self.agent_name,
                            }),
                            vec!["cost".to_string()],
                        )
                        .await;
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "cost query failed"),
            }
        }
    }
}

/// Time left until the next UTC occurrence of `HH:MM`.
pub fn until_next_daily(now: DateTime<Utc>, hour: u32, minute: u32) -> ChronoDuration {
    let today = now
        .date_naive()
        .and_hms_opt(hour, minute, 0)
        .map(|naive| Utc.from_utc_datetime(&naive))
        .unwrap_or(now);
    let next = if today > now {
        today
    } else {
        today + ChronoDuration::days(1)
    };
    next - now
}
