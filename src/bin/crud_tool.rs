use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use crudroute::prelude::*;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

const COUNTER_KEY: &str = "hits";

#[derive(Parser)]
#[command(name = "crud-tool")]
#[command(about = "Developer tooling for crudroute routers and transactions")]
struct Cli {
    #[command(subcommand)]
    command: ToolCommand,
}

#[derive(Subcommand)]
enum ToolCommand {
    /// Concurrent read-modify-save of one record through the retry executor
    Contention {
        #[arg(long, default_value_t = 8)]
        workers: usize,
        #[arg(long, default_value_t = 5)]
        retries: u32,
        #[arg(long, default_value_t = 10)]
        delay_ms: u64,
    },
    /// Write through one store, read through another
    SplitBrain,
    /// Parse a context URL and print the resolved settings
    Config {
        #[arg(long)]
        url: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Counter {
    id: String,
    value: u64,
}

impl Entity for Counter {
    const COLLECTION: &'static str = "counters";

    fn key(&self) -> String {
        self.id.clone()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Note {
    id: String,
    text: String,
}

impl Entity for Note {
    const COLLECTION: &'static str = "notes";

    fn key(&self) -> String {
        self.id.clone()
    }
}

store_context!(ReadSide);
store_context!(WriteSide);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        ToolCommand::Contention {
            workers,
            retries,
            delay_ms,
        } => contention(workers, retries, delay_ms).await,
        ToolCommand::SplitBrain => split_brain().await,
        ToolCommand::Config { url } => show_config(&url),
    }
}

async fn contention(workers: usize, retries: u32, delay_ms: u64) -> Result<()> {
    let router = CrudServices::new()
        .register_command::<CommandBase>()
        .add_store(MemoryContext::new("contention"));

    let seed = router.build_command::<CommandBase>()?;
    seed.set::<Counter>()?.add(Counter {
        id: COUNTER_KEY.to_string(),
        value: 0,
    })?;
    seed.save_changes().await?;

    let plan = TransactionPlan::new()
        .retry_count(retries)
        .retry_delay(Duration::from_millis(delay_ms));

    let started = Instant::now();
    let mut tasks = Vec::with_capacity(workers);
    for _ in 0..workers {
        let router = router.clone();
        let plan = plan.clone();
        tasks.push(tokio::spawn(async move {
            with_transaction(
                || {
                    let router = router.clone();
                    async move {
                        let command = router.build_command::<CommandBase>()?;
                        let counter = command
                            .set::<Counter>()?
                            .find(COUNTER_KEY)?
                            .ok_or_else(|| CrudError::NotFound {
                                collection: Counter::COLLECTION.to_string(),
                                key: COUNTER_KEY.to_string(),
                            })?;
                        counter.modify(|c| c.value += 1);
                        tokio::task::yield_now().await;
                        command.save_changes().await
                    }
                },
                plan,
            )
            .await
        }));
    }

    let mut committed = 0usize;
    let mut exhausted = 0usize;
    let mut failed = 0usize;
    for task in tasks {
        match task.await.context("worker task panicked")? {
            Ok(_) => committed += 1,
            Err(err) if err.is_concurrency_conflict() => exhausted += 1,
            Err(err) => {
                failed += 1;
                eprintln!("worker failed: {}", err);
            }
        }
    }

    let check = router.build_command::<CommandBase>()?;
    let final_value = check
        .handle()?
        .find::<Counter>(COUNTER_KEY)?
        .map(|c| c.value)
        .ok_or_else(|| anyhow!("counter record disappeared"))?;

    println!("Workers: {}", workers);
    println!("Retry budget: {} attempts, base delay {}ms", retries, delay_ms);
    println!("Committed: {}", committed);
    println!("Conflicts exhausted: {}", exhausted);
    println!("Other failures: {}", failed);
    println!("Final counter value: {}", final_value);
    println!("Elapsed: {:?}", started.elapsed());
    Ok(())
}

async fn split_brain() -> Result<()> {
    let services = CrudServices::new()
        .register_query::<QueryBase>()
        .register_command::<CommandBase>();

    let separate = services.add_split_store(ReadSide::isolated(), WriteSide::isolated())?;
    let shared = services.add_split_store(
        ReadSide::named("split-brain-shared")?,
        WriteSide::named("split-brain-shared")?,
    )?;

    println!(
        "Separate stores: {} note(s) visible after write",
        write_then_read(&separate).await?
    );
    println!(
        "Shared store: {} note(s) visible after write",
        write_then_read(&shared).await?
    );
    Ok(())
}

async fn write_then_read<R: CrudRouter>(router: &R) -> Result<usize> {
    router
        .with_transaction(
            || async {
                let command = router.build_command::<CommandBase>()?;
                command.set::<Note>()?.add(Note {
                    id: "first".to_string(),
                    text: "written through the write context".to_string(),
                })?;
                command.save_changes().await
            },
            TransactionPlan::new(),
        )
        .await?;

    let query = router.build_query::<QueryBase>()?;
    Ok(query.as_no_tracking::<Note>()?.len())
}

fn show_config(url: &str) -> Result<()> {
    let config = ContextConfig::from_url(url)
        .with_context(|| format!("Failed to parse context URL '{}'", url))?;
    config.validate()?;

    let plan = config.transaction_plan();
    println!("{}", serde_json::to_string_pretty(&config)?);
    println!("Base retry delay: {:?}", plan.base_delay());
    println!("Canonical URL: {}", config.to_url());
    Ok(())
}
