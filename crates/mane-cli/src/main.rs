mod album;

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use mane_contracts::catalog::StyleCategory;
use mane_contracts::events::{RunEvent, RunLog};
use mane_contracts::items::{ItemStatus, WorkItem};
use mane_contracts::payload::ImagePayload;
use mane_engine::{HttpTransport, Orchestrator, RemixClient, RetryPolicy, DEFAULT_WORKERS};

#[derive(Debug, Parser)]
#[command(name = "mane", version, about = "Hairstyle try-on generation runner")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate every style in a category from one source photo.
    Run(RunArgs),
    /// Apply a free-form instruction to an already-generated image.
    Remix(RemixArgs),
    /// List the available categories and their styles.
    Styles,
}

#[derive(Debug, Parser)]
struct RunArgs {
    /// Source photo (png, jpg, webp, or gif).
    #[arg(long)]
    image: PathBuf,
    #[arg(long, default_value = "classic")]
    category: String,
    /// Directory for result images and the event log.
    #[arg(long)]
    out: PathBuf,
    #[arg(long, default_value_t = DEFAULT_WORKERS)]
    workers: usize,
    /// Retry rounds for styles that failed the initial pass.
    #[arg(long, default_value_t = 0)]
    retry_failed: usize,
    /// Compose all completed styles into one album image.
    #[arg(long)]
    album: Option<PathBuf>,
    #[arg(long)]
    events: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct RemixArgs {
    /// Previously generated image to modify.
    #[arg(long)]
    image: PathBuf,
    #[arg(long)]
    instruction: String,
    #[arg(long)]
    out: PathBuf,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => run_command(args),
        Command::Remix(args) => remix_command(args),
        Command::Styles => styles_command(),
    }
}

fn run_command(args: RunArgs) -> Result<()> {
    let Some(category) = StyleCategory::parse(&args.category) else {
        let known: Vec<&str> = StyleCategory::all()
            .iter()
            .map(|category| category.name())
            .collect();
        bail!(
            "unknown category '{}'; expected one of: {}",
            args.category,
            known.join(", ")
        );
    };

    let source = ImagePayload::from_file(&args.image)?;
    let transport = Arc::new(HttpTransport::from_env()?);
    let orchestrator = Orchestrator::new(transport, RetryPolicy::default(), args.workers);

    fs::create_dir_all(&args.out)
        .with_context(|| format!("creating {}", args.out.display()))?;
    let log = RunLog::create(
        args.events
            .clone()
            .unwrap_or_else(|| args.out.join("events.jsonl")),
    );

    let labels = category.labels();
    log.record(&RunEvent::RunStarted {
        category: category.name().to_string(),
        labels: labels.iter().map(|label| label.to_string()).collect(),
        workers: args.workers,
    })?;
    println!(
        "Generating {} {} styles (run {}).",
        labels.len(),
        category.name(),
        log.run_id()
    );

    let updates = orchestrator.store().subscribe();
    let handle = orchestrator.start_run(category, source)?;

    let mut settled = 0usize;
    while settled < labels.len() {
        let Ok(item) = updates.recv() else {
            break;
        };
        if item.status == ItemStatus::Pending {
            continue;
        }
        settled += 1;
        report_item(&item);
        log.record(&RunEvent::ItemSettled {
            label: item.label.clone(),
            status: item.status,
            error: item.error.clone(),
        })?;
    }
    handle.wait();

    for round in 1..=args.retry_failed {
        let failed: Vec<String> = orchestrator
            .store()
            .snapshot()
            .into_iter()
            .filter(|item| item.status == ItemStatus::Error)
            .map(|item| item.label)
            .collect();
        if failed.is_empty() {
            break;
        }
        println!("Retry round {round}: {} failed styles.", failed.len());
        let mut retries = Vec::new();
        for label in &failed {
            log.record(&RunEvent::ItemReset {
                label: label.clone(),
                operation: "retry".to_string(),
            })?;
            if let Some(retry) = orchestrator.retry_item(label) {
                retries.push(retry);
            }
        }
        for retry in retries {
            let _ = retry.join();
        }
        for label in &failed {
            if let Some(item) = orchestrator.store().get(label) {
                report_item(&item);
                log.record(&RunEvent::ItemSettled {
                    label: item.label.clone(),
                    status: item.status,
                    error: item.error.clone(),
                })?;
            }
        }
    }

    let snapshot = orchestrator.store().snapshot();
    let mut done = 0usize;
    for item in &snapshot {
        let (ItemStatus::Done, Some(image)) = (item.status, item.image.as_ref()) else {
            continue;
        };
        done += 1;
        let path = args
            .out
            .join(format!("{}.{}", slug(&item.label), image.file_extension()));
        fs::write(&path, image.decoded_bytes()?)
            .with_context(|| format!("writing {}", path.display()))?;
        println!("  wrote {}", path.display());
    }
    let failed = snapshot.len() - done;

    if let Some(album_path) = &args.album {
        match orchestrator.store().completed_images() {
            Some(images) => {
                let composed = album::compose_album(&images)?;
                composed
                    .save(album_path)
                    .with_context(|| format!("writing {}", album_path.display()))?;
                println!("Album written to {}.", album_path.display());
            }
            None => eprintln!("Album skipped: not every style completed."),
        }
    }

    log.record(&RunEvent::RunFinished { done, failed })?;
    println!("Run finished: {done} done, {failed} failed.");
    if failed > 0 {
        bail!("{failed} styles failed; rerun with --retry-failed or retry individually");
    }
    Ok(())
}

fn remix_command(args: RemixArgs) -> Result<()> {
    let source = ImagePayload::from_file(&args.image)?;
    let transport = Arc::new(HttpTransport::from_env()?);
    let client = RemixClient::new(transport, RetryPolicy::default());

    let remixed = client.remix(&source, &args.instruction)?;
    fs::write(&args.out, remixed.decoded_bytes()?)
        .with_context(|| format!("writing {}", args.out.display()))?;
    println!("Remixed image written to {}.", args.out.display());
    Ok(())
}

fn styles_command() -> Result<()> {
    for category in StyleCategory::all() {
        println!("{}:", category.name());
        for label in category.labels() {
            println!("  {label}");
        }
    }
    Ok(())
}

fn report_item(item: &WorkItem) {
    match item.status {
        ItemStatus::Done => println!("  [done]  {}", item.label),
        ItemStatus::Error => println!(
            "  [error] {}: {}",
            item.label,
            item.error.as_deref().unwrap_or("unknown failure")
        ),
        ItemStatus::Pending => {}
    }
}

/// Filesystem-safe file stem for a style label.
fn slug(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    for ch in label.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_matches('-').to_string()
}
