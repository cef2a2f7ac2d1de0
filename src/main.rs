//! `typereg`: keeps a registry of type definitions in sync with its upstream
//! repositories and answers queries against it.

mod cli;
mod error;
mod logging;

use crate::cli::{Args, Command};
use crate::error::{ErrorKind, Result};
use clap::Parser;
use exn::ResultExt;
use futures::StreamExt;
use serde::Serialize;
use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use typereg_config::{Config, UpstreamConfig};
use typereg_mirror::GitMirror;
use typereg_pipeline::{Context, Upstream, Worker, WorkerOptions};
use typereg_queue::{Queue, QueueOptions, SqliteTransport};
use typereg_store::{Database, Repository, SearchOptions};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    logging::init(args.verbose, args.log_format);
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = ?err, "{err}");
            ExitCode::FAILURE
        },
    }
}

async fn run(args: Args) -> Result<()> {
    let config = Config::load(args.config.as_deref()).or_raise(|| ErrorKind::Config)?;
    let db = Database::connect(&config.database_url).await.or_raise(|| ErrorKind::Store)?;
    let repo = Repository::from(&db);
    let result = match args.command {
        Command::Worker { upstreams } => worker(&config, &repo, &cli::upstreams(&upstreams)).await,
        Command::Sync { upstreams, concurrency } => {
            let concurrency = concurrency.unwrap_or(config.worker.file_concurrency);
            sync(&config, &repo, &cli::upstreams(&upstreams), concurrency).await
        },
        Command::Status { upstreams } => status(&config, &repo, &cli::upstreams(&upstreams)).await,
        Command::Search { query, name, sources, ambient, modules, offset, limit, sort, order } => {
            let options = SearchOptions {
                query,
                name,
                sources,
                ambient: (ambient || modules).then_some(ambient),
                offset,
                limit,
                sort: sort.into(),
                order: order.into(),
            };
            output(&repo.search(&options).await.or_raise(|| ErrorKind::Query)?)
        },
        Command::Entry { source, name } => output(&repo.get_entry(source, &name).await.or_raise(|| ErrorKind::Query)?),
        Command::Versions { source, name, range } => {
            let versions = repo.get_versions(source, &name, range.as_deref()).await.or_raise(|| ErrorKind::Query)?;
            output(&versions)
        },
        Command::Tag { source, name, tag } => output(&repo.get_tag(source, &name, &tag).await.or_raise(|| ErrorKind::Query)?),
    };
    db.close().await;
    result
}

fn upstream_config(config: &Config, upstream: Upstream) -> &UpstreamConfig {
    match upstream {
        Upstream::DefinitelyTyped => &config.definitely_typed,
        Upstream::Registry => &config.registry,
    }
}

fn context(config: &Config, repo: &Repository, upstream: Upstream) -> Result<Context> {
    let upstream_config = upstream_config(config, upstream);
    let data_dir = std::path::absolute(&config.data_dir).or_raise(|| ErrorKind::Config)?;
    let mirror = GitMirror::new(
        &upstream_config.url,
        &upstream_config.branch,
        data_dir.join(upstream.to_string()),
        config.worker.refresh_interval(),
    )
    .or_raise(|| ErrorKind::Mirror(upstream.to_string()))?;
    Ok(Context::new(upstream, Arc::new(mirror), repo.clone()))
}

async fn worker(config: &Config, repo: &Repository, upstreams: &[Upstream]) -> Result<()> {
    let transport = SqliteTransport::connect(&config.queue_url).await.or_raise(|| ErrorKind::Queue)?;
    let transport = Arc::new(transport);
    let stuck_timeout = config.worker.stuck_timeout();
    let queue = Queue::new(transport.clone(), QueueOptions {
        max_attempts: config.queue.max_attempts,
        backoff: config.queue.backoff(),
        poll_interval: config.queue.poll_interval(),
        heartbeat_interval: stuck_timeout / 4,
        shutdown_grace: config.queue.shutdown_grace(),
        job_timeout: stuck_timeout,
    });
    let mut worker = Worker::new(queue, WorkerOptions {
        file_concurrency: config.worker.file_concurrency,
        resync_interval: config.worker.resync_interval(),
        stuck_timeout,
    });
    for &upstream in upstreams {
        worker = worker.with_upstream(context(config, repo, upstream)?);
    }

    let shutdown = shutdown_signal();
    info!(upstreams = ?upstreams, "worker starting");
    let result = worker.run(shutdown).await.or_raise(|| ErrorKind::Pipeline);
    transport.close().await;
    result
}

async fn sync(config: &Config, repo: &Repository, upstreams: &[Upstream], concurrency: usize) -> Result<()> {
    let shutdown = shutdown_signal();
    for &upstream in upstreams {
        let ctx = context(config, repo, upstream)?;
        let mut events = std::pin::pin!(typereg_pipeline::sync(&ctx, concurrency));
        loop {
            let event = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    warn!(%upstream, "sync interrupted");
                    return Ok(());
                },
                event = events.next() => event,
            };
            match event {
                Some(event) => output_line(&event.or_raise(|| ErrorKind::Pipeline)?)?,
                None => break,
            }
        }
    }
    Ok(())
}

async fn status(config: &Config, repo: &Repository, upstreams: &[Upstream]) -> Result<()> {
    let mut statuses = Vec::with_capacity(upstreams.len());
    for &upstream in upstreams {
        let url = &upstream_config(config, upstream).url;
        statuses.push(typereg_pipeline::status(repo, upstream, url).await.or_raise(|| ErrorKind::Query)?);
    }
    output(&statuses)
}

/// Cancelled on the first SIGINT or SIGTERM.
fn shutdown_signal() -> CancellationToken {
    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        let interrupt = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            match signal(SignalKind::terminate()) {
                Ok(mut terminate) => tokio::select! {
                    _ = interrupt => {},
                    _ = terminate.recv() => {},
                },
                Err(err) => {
                    warn!(error = %err, "could not listen for SIGTERM");
                    _ = interrupt.await;
                },
            }
        }
        #[cfg(not(unix))]
        {
            _ = interrupt.await;
        }
        info!("shutdown requested");
        cancel.cancel();
    });
    token
}

fn output(value: &impl Serialize) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value).or_raise(|| ErrorKind::Output)?;
    writeln!(stdout).or_raise(|| ErrorKind::Output)
}

fn output_line(value: &impl Serialize) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer(&mut stdout, value).or_raise(|| ErrorKind::Output)?;
    writeln!(stdout).or_raise(|| ErrorKind::Output)
}
