use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

use crate::core::harness::Harness;
use crate::core::paths::StatePaths;
use crate::core::proactive::ProactiveScheduler;
use crate::core::processor::QueueProcessor;
use crate::core::queue::QueueSpooler;
use crate::core::repository::Repository;
use crate::core::settings::Settings;
use crate::core::terminal::{print_banner, GuideSection};

const PROACTIVE_TICK: Duration = Duration::from_secs(60);

/// Boot the long-running queue processor with its proactive scheduler.
pub async fn run() -> Result<()> {
    let paths = StatePaths::resolve()?;
    crate::logging::init(&paths.logs_dir(), false)?;

    let settings = Settings::load(&paths)?;
    if !paths.settings_file().exists() {
        settings.save(&paths)?;
    }

    let repo = Arc::new(
        Repository::open(&paths.state_db())?.with_event_stream(paths.events_dir()),
    );
    let queue = Arc::new(QueueSpooler::new(&paths));
    let harness = Harness::new(repo.clone(), paths.clone(), settings.clone());
    let proactive = Arc::new(ProactiveScheduler::new(
        repo.clone(),
        queue.clone(),
        settings.clone(),
        paths.clone(),
    ));

    // The 60 s proactive tick rides the cron scheduler; the 1 s queue tick
    // is the processor's own interval.
    let scheduler = JobScheduler::new().await.map_err(|e| anyhow!("{e}"))?;
    let proactive_job = proactive.clone();
    let job = Job::new_repeated_async(PROACTIVE_TICK, move |_uuid, _lock| {
        let proactive = proactive_job.clone();
        Box::pin(async move {
            if let Err(e) = proactive.tick().await {
                error!("Proactive tick failed: {:#}", e);
            }
        })
    })
    .map_err(|e| anyhow!("{e}"))?;
    scheduler.add(job).await.map_err(|e| anyhow!("{e}"))?;
    scheduler.start().await.map_err(|e| anyhow!("{e}"))?;

    print_banner();
    GuideSection::new("Daemon Running")
        .status("State home", &paths.root().display().to_string())
        .status(
            "Harness",
            if settings.harness.enabled {
                "enabled"
            } else {
                "disabled"
            },
        )
        .status("Agents", &settings.agents.len().to_string())
        .status("Teams", &settings.teams.len().to_string())
        .blank()
        .info("Watching queue/incoming — Ctrl-C to stop.")
        .print();

    info!("tinyagi daemon started at {}", paths.root().display());
    let processor = QueueProcessor::new(repo, queue, settings, harness, proactive, paths);
    processor.run().await
}
