//! Simulated ECU log pipeline used by the `run` command.
//!
//! Every dataset goes through three chained tasks: a CSV import, an analysis of the
//! imported rows and an export of the findings. Each stage reports progress, can fail
//! at random and publishes a `Data*` event when it succeeds.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use rand::Rng;
use serde::Serialize;
use serde_json::json;
use tokio::task::JoinSet;

use crate::config::WorkloadSettings;
use crate::events::{
    Event, EventBus, EventHandler, EventKind, EventPriority, EventTag, SubscriptionHandle,
};
use crate::task_manager::{
    BoxError, JsonTaskScheduler, TaskContext, TaskKind, TaskPriority, TaskSpec,
};

const STAGE_STEPS: u8 = 5;

/// Summary printed by the `run` command
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkloadReport {
    pub datasets: usize,
    pub imported: usize,
    pub analysed: usize,
    pub exported: usize,
    pub failed: usize,
    pub rejected: usize,
    /// Rows seen on the bus through `data.imported` events
    pub rows_imported: u64,
    pub duration_ms: u64,
}

/// How far one dataset got through the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reached {
    Rejected,
    Nothing,
    Imported,
    Analysed,
    Exported,
}

/// Submit the pipeline for `settings.imports` datasets and wait for all of them
pub async fn run_workload(
    scheduler: &JsonTaskScheduler,
    bus: &EventBus,
    settings: &WorkloadSettings,
) -> eyre::Result<WorkloadReport> {
    let started = Instant::now();
    let rows_imported = Arc::new(AtomicU64::new(0));
    let subscription = track_imported_rows(bus, rows_imported.clone());

    tracing::info!(
        datasets = settings.imports,
        fail_rate = settings.fail_rate,
        "Starting simulated workload"
    );

    let mut pipelines = JoinSet::new();
    for index in 0..settings.imports {
        let scheduler = scheduler.clone();
        let bus = bus.clone();
        let settings = settings.clone();
        let dataset = format!("ecu_log_{index:03}.csv");
        pipelines.spawn(async move { run_pipeline(&scheduler, &bus, &settings, dataset).await });
    }

    let mut report = WorkloadReport {
        datasets: settings.imports,
        ..Default::default()
    };
    while let Some(reached) = pipelines.join_next().await {
        match reached? {
            Reached::Rejected => report.rejected += 1,
            Reached::Nothing => report.failed += 1,
            Reached::Imported => {
                report.imported += 1;
                report.failed += 1;
            }
            Reached::Analysed => {
                report.imported += 1;
                report.analysed += 1;
                report.failed += 1;
            }
            Reached::Exported => {
                report.imported += 1;
                report.analysed += 1;
                report.exported += 1;
            }
        }
    }

    bus.unsubscribe_handle(&subscription);
    report.rows_imported = rows_imported.load(Ordering::Relaxed);
    report.duration_ms = started.elapsed().as_millis() as u64;

    tracing::info!(
        exported = report.exported,
        failed = report.failed,
        rejected = report.rejected,
        duration_ms = report.duration_ms,
        "Simulated workload finished"
    );
    Ok(report)
}

fn track_imported_rows(bus: &EventBus, rows: Arc<AtomicU64>) -> SubscriptionHandle {
    bus.subscribe(
        EventTag::DataImported,
        EventHandler::sync(move |event| {
            if let EventKind::DataImported { rows: imported, .. } = &event.kind {
                rows.fetch_add(*imported, Ordering::Relaxed);
            }
            Ok(())
        }),
        "workload_row_counter",
        EventPriority::Normal,
    )
}

async fn run_pipeline(
    scheduler: &JsonTaskScheduler,
    bus: &EventBus,
    settings: &WorkloadSettings,
    dataset: String,
) -> Reached {
    let stages = [
        (TaskKind::CsvImport, TaskPriority::High, Reached::Imported),
        (TaskKind::Analysis, TaskPriority::Normal, Reached::Analysed),
        (TaskKind::Export, TaskPriority::Low, Reached::Exported),
    ];

    let mut reached = Reached::Nothing;
    let mut previous = json!({ "dataset": dataset });
    for (kind, priority, stage_reached) in stages {
        let spec = stage_spec(kind, &dataset, previous.clone(), bus.clone(), settings)
            .priority(priority);

        let task_id = match scheduler.submit(spec).await {
            Ok(task_id) => task_id,
            Err(error) => {
                tracing::warn!(dataset = %dataset, stage = %kind, error = %error, "Stage rejected");
                return if reached == Reached::Nothing {
                    Reached::Rejected
                } else {
                    reached
                };
            }
        };

        match scheduler.wait(&task_id, None).await {
            Some(outcome) if outcome.success => {
                previous = outcome.value.unwrap_or_default();
                reached = stage_reached;
            }
            Some(outcome) => {
                tracing::warn!(
                    dataset = %dataset,
                    stage = %kind,
                    error = outcome.error_message().unwrap_or("unknown"),
                    "Stage failed, abandoning dataset"
                );
                return reached;
            }
            None => return reached,
        }
    }
    reached
}

fn stage_spec(
    kind: TaskKind,
    dataset: &str,
    input: serde_json::Value,
    bus: EventBus,
    settings: &WorkloadSettings,
) -> TaskSpec<serde_json::Value> {
    let fail_rate = settings.fail_rate;
    let dataset = dataset.to_string();

    TaskSpec::new(format!("{kind} {dataset}"), kind, move |ctx| {
        let dataset = dataset.clone();
        let input = input.clone();
        let bus = bus.clone();
        async move {
            simulate_stage(&ctx, fail_rate).await?;
            let (output, event) = stage_output(kind, &dataset, &input);
            if let Err(error) = bus.publish(Event::new(ctx.name.clone(), event)).await {
                tracing::debug!(error = %error, "Stage event not published");
            }
            Ok(output)
        }
    })
    .retries(settings.retries)
    .retry_delay(Duration::from_millis(settings.retry_delay_ms))
    .timeout(Duration::from_millis(settings.stage_timeout_ms))
}

/// Sleep through the stage steps, reporting progress, and fail at random
async fn simulate_stage(ctx: &TaskContext, fail_rate: f64) -> Result<(), BoxError> {
    for step in 1..=STAGE_STEPS {
        let pause = rand::rng().random_range(5..25);
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(pause)) => {}
            _ = ctx.cancelled() => return Err("stage cancelled".into()),
        }
        ctx.report_progress(
            step * (100 / STAGE_STEPS),
            format!("step {step} of {STAGE_STEPS}"),
            ctx.kind.to_string(),
        );
    }

    if rand::rng().random_bool(fail_rate) {
        return Err(format!("simulated failure in {} (attempt {})", ctx.name, ctx.attempt).into());
    }
    Ok(())
}

fn stage_output(kind: TaskKind, dataset: &str, input: &serde_json::Value) -> (serde_json::Value, EventKind) {
    match kind {
        TaskKind::CsvImport => {
            let rows = rand::rng().random_range(500..5_000);
            (
                json!({ "dataset": dataset, "rows": rows }),
                EventKind::DataImported {
                    dataset: dataset.to_string(),
                    rows,
                },
            )
        }
        TaskKind::Analysis => {
            let rows = input["rows"].as_u64().unwrap_or_default();
            let findings = rows / 250;
            (
                json!({ "dataset": dataset, "rows": rows, "findings": findings }),
                EventKind::AnalysisFinished {
                    dataset: dataset.to_string(),
                    analysis: "fault_code_scan".to_string(),
                    findings,
                },
            )
        }
        TaskKind::Export | TaskKind::User => {
            let destination = format!("reports/{}.json", dataset.trim_end_matches(".csv"));
            (
                json!({ "dataset": dataset, "destination": destination, "summary": input }),
                EventKind::DataExported {
                    dataset: dataset.to_string(),
                    destination,
                },
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task_manager::{SchedulerConfig, TaskScheduler};

    fn quick_settings(imports: usize, fail_rate: f64) -> WorkloadSettings {
        WorkloadSettings {
            imports,
            fail_rate,
            retries: 0,
            retry_delay_ms: 1,
            stage_timeout_ms: 1_000,
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_workload_without_failures_exports_everything() {
        let bus = EventBus::new();
        let scheduler = TaskScheduler::with_event_bus(
            SchedulerConfig {
                workers: 4,
                poll_interval: Duration::from_millis(10),
                ..Default::default()
            },
            bus.clone(),
        );
        scheduler.start().await.unwrap();

        let report = run_workload(&scheduler, &bus, &quick_settings(3, 0.0))
            .await
            .unwrap();

        assert_eq!(report.datasets, 3);
        assert_eq!(report.exported, 3);
        assert_eq!(report.failed, 0);
        assert!(report.rows_imported >= 3 * 500);
        assert_eq!(bus.history(100, Some(EventTag::DataExported)).len(), 3);
        assert!(bus.subscribers(Some(EventTag::DataImported)).is_empty());
    }

    #[tokio::test]
    async fn test_workload_with_certain_failure_exports_nothing() {
        let bus = EventBus::new();
        let scheduler = TaskScheduler::with_event_bus(
            SchedulerConfig {
                workers: 2,
                poll_interval: Duration::from_millis(10),
                ..Default::default()
            },
            bus.clone(),
        );
        scheduler.start().await.unwrap();

        let report = run_workload(&scheduler, &bus, &quick_settings(2, 1.0))
            .await
            .unwrap();

        assert_eq!(report.exported, 0);
        assert_eq!(report.imported, 0);
        assert_eq!(report.failed, 2);
        assert_eq!(report.rows_imported, 0);
    }

    #[test]
    fn test_analysis_output_counts_findings() {
        let input = json!({ "dataset": "a.csv", "rows": 1000 });
        let (output, event) = stage_output(TaskKind::Analysis, "a.csv", &input);

        assert_eq!(output["findings"], 4);
        assert_eq!(event.tag(), EventTag::AnalysisFinished);
    }
}
