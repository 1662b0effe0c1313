// groundlink demo harness: run the scheduler and the codec against a
// simulated noisy link and print the resulting summaries.

use async_trait::async_trait;
use clap::Parser;
use groundlink::ldpc::{bits_from_bytes, simulate_channel_errors};
use groundlink::{
    LdpcEngine, LinkConfig, Message, MessageProcessor, MessageScheduler, Payload, PriorityClass,
    TimeConstraints,
};
use log::{info, warn};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(
    name = "groundlink",
    about = "Priority message dispatch with LDPC error correction over a simulated space-to-ground link"
)]
struct Cli {
    /// TOML configuration file; defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of demo messages to admit.
    #[arg(long, default_value_t = 24)]
    messages: usize,

    /// Simulated per-bit channel error rate.
    #[arg(long, default_value_t = 0.02)]
    error_rate: f64,

    /// Initial error-correction mode; overrides the configured code rate.
    #[arg(long, value_enum)]
    mode: Option<groundlink::ErrorCorrectionMode>,

    /// How long to let the dispatch loops run.
    #[arg(long, default_value_t = 2)]
    run_secs: u64,

    /// Serve prometheus text exposition on this address (e.g. 127.0.0.1:9464).
    #[arg(long)]
    metrics_addr: Option<String>,

    /// Seed for the channel simulation.
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

/// Demo processor: every dispatched message is encoded, pushed through the
/// simulated channel, and decoded again. Success is the decoder's verdict.
struct LinkProcessor {
    engine: Arc<LdpcEngine>,
    error_rate: f64,
    next_seed: AtomicU64,
}

#[async_trait]
impl MessageProcessor for LinkProcessor {
    async fn process(&self, message: &Message) -> bool {
        let bytes = match &message.payload {
            Payload::Bytes(bytes) => bytes.clone(),
            Payload::Text(text) => text.clone().into_bytes(),
            Payload::Structured(map) => serde_json::to_vec(map).unwrap_or_default(),
        };
        let bits = bits_from_bytes(&bytes);
        let (encoded, meta) = match self.engine.encode(&bits, Duration::from_secs(5)) {
            Ok(out) => out,
            Err(err) => {
                warn!("encode failed for {}: {}", message.id, err);
                return false;
            }
        };
        let seed = self.next_seed.fetch_add(1, Ordering::Relaxed);
        let corrupted = simulate_channel_errors(&encoded, self.error_rate, 0.001, 3.0, seed);
        match self.engine.decode(&corrupted, &meta, Duration::from_secs(10)) {
            Ok(result) => result.success,
            Err(err) => {
                warn!("decode failed for {}: {}", message.id, err);
                false
            }
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => LinkConfig::from_file(path)?,
        None => LinkConfig::default(),
    };
    if let Some(mode) = cli.mode {
        config.ldpc.code_rate = mode.code_rate();
    }
    config.validate()?;

    if let Some(addr) = &cli.metrics_addr {
        groundlink::telemetry::serve(addr);
        info!("metrics exposed on {}", addr);
    }

    let scheduler = MessageScheduler::new(config.scheduler.clone())?;
    let engine = Arc::new(LdpcEngine::with_metrics(
        &config.ldpc,
        scheduler.metrics(),
    )?);

    let processor: Arc<dyn MessageProcessor> = Arc::new(LinkProcessor {
        engine: Arc::clone(&engine),
        error_rate: cli.error_rate,
        next_seed: AtomicU64::new(cli.seed),
    });
    for class in PriorityClass::DESCENDING {
        scheduler.set_processor(class, Arc::clone(&processor));
    }
    scheduler.start();

    let classes = PriorityClass::DESCENDING;
    for i in 0..cli.messages {
        let class = classes[i % classes.len()];
        let constraints = TimeConstraints {
            deadline: Some(groundlink::clock::Clock::new().deadline_in_ms(10_000)),
            ..TimeConstraints::default()
        };
        let message = Message::new(
            format!("demo-{:04}", i),
            Payload::Text(format!("telemetry frame {} over the simulated downlink", i)),
            class,
            1200,
        )
        .with_constraints(constraints)
        .with_route("spacecraft", "ground-station");
        if let Err(err) = scheduler.admit(message).await {
            warn!("admission failed for demo-{:04}: {}", i, err);
        }
    }

    tokio::time::sleep(Duration::from_secs(cli.run_secs)).await;

    let status = scheduler.queue_status().await;
    let metrics = scheduler.metrics_summary();
    let codec = engine.summary();
    println!("{}", serde_json::to_string_pretty(&status)?);
    println!("{}", serde_json::to_string_pretty(&metrics)?);
    println!("{}", serde_json::to_string_pretty(&codec)?);

    scheduler.shutdown().await;
    groundlink::telemetry::flush();
    Ok(())
}
