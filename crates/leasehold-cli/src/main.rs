mod telemetry;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use leasehold_core::impls::InMemoryTransport;
use leasehold_core::{
    HandlerConfig, HandlerFactory, Message, MessageHandler, MessageWorker, QueueName, WorkerError,
};
use serde::{Deserialize, Serialize};
use tokio::time::{Duration, sleep};
use tracing::{error, info, warn};

const DEMO_QUEUE: &str = "demo-jobs";
const DEMO_LEASE: Duration = Duration::from_secs(30);
const DEMO_JOBS: usize = 12;

#[derive(Debug, Serialize, Deserialize)]
struct Job {
    name: String,
    work_ms: u64,
}

#[derive(Debug)]
struct Report {
    name: String,
    took_ms: u64,
}

/// Sleeps for the job's duration; roughly one job in six fails.
struct SleepyWorker;

#[async_trait]
impl MessageWorker<Job, Report> for SleepyWorker {
    async fn work(&self, message: &Message<Job>) -> Result<Report, WorkerError> {
        let job = message.payload();
        sleep(Duration::from_millis(job.work_ms)).await;
        if rand::random::<f64>() < 1.0 / 6.0 {
            return Err(WorkerError::failed(format!("job {} gave up", job.name)));
        }
        Ok(Report {
            name: job.name.clone(),
            took_ms: job.work_ms,
        })
    }
}

/// Config from the path given as first argument, else `leasehold.toml`,
/// else defaults.
fn load_config() -> HandlerConfig {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "leasehold.toml".to_string());

    if Path::new(&path).exists() {
        match std::fs::read_to_string(&path) {
            Ok(contents) => match HandlerConfig::from_toml_str(&contents) {
                Ok(config) => {
                    info!(path, "loaded configuration");
                    return config;
                }
                Err(e) => {
                    eprintln!("error parsing {path}: {e}");
                    std::process::exit(1);
                }
            },
            Err(e) => {
                eprintln!("error reading {path}: {e}");
                std::process::exit(1);
            }
        }
    }

    info!("no config file found, using defaults");
    HandlerConfig::default()
}

fn seed(transport: &InMemoryTransport, queue: &QueueName) -> Result<(), serde_json::Error> {
    for n in 0..DEMO_JOBS {
        let job = Job {
            name: format!("job-{n:02}"),
            work_ms: 200 + rand::random::<u64>() % 1_800,
        };
        transport.send(queue, serde_json::to_string(&job)?);
    }
    Ok(())
}

/// Single-threaded dispatch loop: fetch a batch, hand each message over.
async fn dispatch(
    transport: &InMemoryTransport,
    handler: &MessageHandler<Job, Report>,
    queue: &QueueName,
    batch_size: usize,
) -> leasehold_core::Result<()> {
    loop {
        let batch = transport.receive(queue, batch_size);
        if batch.is_empty() {
            if handler.in_flight_count() == 0 && transport.leased(queue) == 0 {
                return Ok(());
            }
            sleep(Duration::from_millis(100)).await;
            continue;
        }
        for raw in batch {
            match raw.decode_json::<Job>() {
                Ok(message) => handler.handle_message(message).await?,
                // redelivered once its lease lapses
                Err(e) => warn!(error = %e, "skipping undecodable message"),
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    telemetry::init_tracing();

    let config = load_config();
    let transport = Arc::new(InMemoryTransport::new());
    let queue = QueueName::from(DEMO_QUEUE);
    transport.create_queue(queue.clone(), DEMO_LEASE);
    seed(&transport, &queue)?;

    let factory = HandlerFactory::new(transport.clone()).with_batch_size(config.batch_size);
    let handler = factory
        .handler(&queue, SleepyWorker)
        .await?
        .with_config(&config)
        .on_completed(|job: &Job, report: &Report| {
            info!(job = %job.name, report = %report.name, took_ms = report.took_ms, "job finished");
        })
        .build()?;
    info!(queue = %queue, concurrency = config.concurrency, jobs = DEMO_JOBS, "dispatching");

    tokio::select! {
        result = dispatch(&transport, &handler, &queue, factory.batch_size()) => {
            if let Err(e) = result {
                error!(error = %e, "dispatch loop stopped");
            }
        }
        _ = shutdown_signal() => {}
    }

    let drained = handler.close().await;
    factory.shutdown();
    if !drained {
        warn!("some workers had to be aborted");
    }

    println!("{}", serde_json::to_string_pretty(&handler.stats())?);
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("received shutdown signal");
}
