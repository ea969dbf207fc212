mod args;
mod demo;

use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use jobqueue::{JobManager, ManagerConfig, Params};
use tokio::{select, signal, time};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

use crate::args::Args;
use crate::demo::SleepJob;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Logging
    if args.debug {
        tracing_subscriber::fmt()
            .with_max_level(Level::TRACE)
            .init();
    } else {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(EnvFilter::from_default_env())
            .init();
    }

    // Cancellation channel, tripped by ctrl-c.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(error) = signal::ctrl_c().await {
                warn!(%error, "something strange with ctrl-c handling!");
            };
            cancel.cancel();
        });
    }

    if let Err(error) = begin(args, cancel).await {
        error!(error = %format!("{error:#}"), "encountered runtime error");
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn load_config(args: &Args) -> Result<ManagerConfig> {
    let mut config = match &args.config {
        Some(path) => ManagerConfig::from_yaml_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ManagerConfig::default(),
    };

    if let Some(consumers) = args.consumers {
        config.consumers = consumers;
    }
    if let Some(flush_interval_ms) = args.flush_interval_ms {
        config.flush_interval_ms = flush_interval_ms;
    }
    config.validate().context("validating configuration")?;

    Ok(config)
}

async fn begin(args: Args, cancel: CancellationToken) -> Result<()> {
    let config = load_config(&args)?;
    let manager = JobManager::new(config).context("starting job manager")?;

    // Hold consumers back while queueing, so some jobs are still cancellable.
    manager.stop();
    let work = Duration::from_millis(args.work_ms);
    let ids: Vec<_> = (0..args.jobs)
        .map(|n| {
            let persistent = n % 3 == 0;
            let params = Params::new((n % 4) as i32)
                .set_persistent(persistent)
                .group_by(format!("group-{}", n % 5));
            let job = SleepJob::new(format!("job-{n}"), work, n % 7 == 0);
            (manager.add_job(params, job), persistent)
        })
        .collect();

    for (n, &(id, persistent)) in ids.iter().enumerate() {
        if n % 5 == 1 {
            let cancelled = manager.cancel_job(id, persistent);
            info!(job_id = id, cancelled, "cancelled in the foreground");
        } else if n % 5 == 3 {
            manager.cancel_job_in_background(
                id,
                persistent,
                Some(Box::new(|job_id, cancelled| {
                    info!(job_id, cancelled, "cancelled in the background");
                })),
            );
        }
    }

    manager.start();

    // Run until every job is done or we're told to stop.
    loop {
        select! {
            _ = cancel.cancelled() => break,
            _ = time::sleep(Duration::from_millis(250)) => {},
        }

        if manager.count() == 0 {
            break;
        }
    }

    let stats = serde_yaml::to_string(&manager.stats())
        .context("rendering stats")?;
    info!("final stats:\n{stats}");

    manager.shutdown().await;

    Ok(())
}
