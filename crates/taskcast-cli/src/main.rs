use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::info;

use taskcast_core::ports::StaticPricing;
use taskcast_core::{
    Handler, Priority, ProgressTracker, Result, TaskId, TaskPayload, TaskScheduler, TaskcastConfig,
    TaskcastError,
};

#[derive(Debug, Serialize, Deserialize)]
struct ReviewAnalysis {
    product: String,
    reviews: u32,
}

impl TaskPayload for ReviewAnalysis {
    const TYPE: &'static str = "analysis.reviews.v1";
}

/// デモ用の handler: 3 stage で進捗を出し、最初の数回はわざと失敗する
struct ReviewHandler {
    remaining_failures: AtomicU32,
    pricing: StaticPricing,
}

impl ReviewHandler {
    fn new(failures: u32) -> Self {
        Self {
            remaining_failures: AtomicU32::new(failures),
            pricing: StaticPricing::new()
                .with_rate("small", 0.000_5)
                .with_rate("large", 0.003),
        }
    }
}

#[async_trait]
impl Handler<ReviewAnalysis> for ReviewHandler {
    fn total_stages(&self) -> u32 {
        3
    }

    async fn handle(
        &self,
        _task_id: TaskId,
        task: ReviewAnalysis,
        progress: &mut ProgressTracker,
    ) -> Result<serde_json::Value> {
        progress.note(format!("analyzing {} reviews of {}", task.reviews, task.product));

        for pct in [25.0, 50.0, 100.0] {
            progress.update_stage("scrape", pct);
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        progress.record_usage(u64::from(task.reviews) * 40, "small", &self.pricing);

        let left = self.remaining_failures.load(Ordering::Relaxed);
        if left > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::Relaxed);
            return Err(TaskcastError::handler(format!(
                "intentional failure (left={left})"
            )));
        }

        for pct in [30.0, 60.0, 100.0] {
            progress.update_stage("sentiment", pct);
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        progress.record_usage(u64::from(task.reviews) * 120, "large", &self.pricing);
        if task.reviews < 10 {
            progress.add_warning(
                "small sample",
                serde_json::json!({ "reviews": task.reviews }),
            );
        }

        progress.update_stage("report", 100.0);
        Ok(serde_json::json!({
            "product": task.product,
            "sentiment": "positive",
        }))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    taskcast_core::logging::init_tracing();

    // (A) 設定は環境変数から。worker は全部積んでから起動する
    let mut config = TaskcastConfig::from_env()?;
    config.scheduler.autostart = false;

    let scheduler = TaskScheduler::builder()
        .register_typed::<ReviewAnalysis, _>(ReviewHandler::new(1))?
        .config(config)
        .expect_task_types(&[ReviewAnalysis::TYPE])
        .build()?;

    // (B) 優先度の違うタスクを投入
    let mut ids = Vec::new();
    for (product, reviews, priority) in [
        ("kettle", 8, Priority::Low),
        ("headphones", 120, Priority::Urgent),
        ("desk lamp", 45, Priority::High),
    ] {
        let payload = ReviewAnalysis {
            product: product.to_string(),
            reviews,
        };
        let id = scheduler.enqueue_typed(&payload, priority).await?;
        info!(%id, product, %priority, "submitted");
        ids.push(id);
    }

    // (C) 1 件目の stream を購読して JSON lines で出す
    let watched = ids[0];
    let events = scheduler.streams().subscribe(watched)?.into_stream();
    scheduler.start();

    let printer = tokio::spawn(async move {
        futures::pin_mut!(events);
        while let Some(event) = events.next().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => eprintln!("encode failed: {e}"),
            }
        }
    });

    // (D) 全タスクの完了を待つ
    for id in &ids {
        let record = scheduler.wait_for(*id).await?;
        info!(
            id = %record.id,
            status = ?record.status,
            retry_count = record.retry_count,
            "finished"
        );
    }
    if let Err(e) = printer.await {
        eprintln!("printer task failed: {e}");
    }

    let stats = scheduler.get_stats().await;
    println!("{}", serde_json::to_string_pretty(&stats)?);

    scheduler.shutdown().await;
    Ok(())
}
