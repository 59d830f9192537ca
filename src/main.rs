mod api;
mod server;

use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use channel_virality::config::EngineConfig;
use channel_virality::error::partial_batch;
use channel_virality::synthetic::{generate_channel_history, synthetic_channel};
use channel_virality::{
    format_float, format_number, format_percent, ChannelBaseline, ChannelId, Coordinator,
    EngineError, JobOutcome, JobState, PostId, Store,
};

#[derive(Parser)]
#[command(name = "channel-virality", about = "Per-channel viral post detection")]
struct Cli {
    /// Config file (defaults to $ENGINE_CONFIG_PATH or config/engine.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Store file, overriding the config.
    #[arg(long, global = true)]
    store: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    Serve(ServeArgs),
    /// Fill the store with synthetic channels.
    Seed(SeedArgs),
    /// Ingest a JSON file shaped like the /api/ingest body.
    Ingest(IngestArgs),
    /// Show (or recompute) one channel's baseline.
    Baseline(BaselineArgs),
    RecomputeAll,
    /// Score one batch of unscored posts.
    Score(ScoreArgs),
    /// Rescore every post; Ctrl-C cancels and keeps the checkpoint.
    ScoreAll,
    /// Classify one post, failing if its channel has no ready baseline.
    Classify(ClassifyArgs),
    Viral(ViralArgs),
    InitConfig(InitConfigArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    #[arg(long, default_value = "127.0.0.1")]
    host: String,
    #[arg(long, default_value_t = 8787)]
    port: u16,
    /// Do not run the periodic baseline refresh / auto-scoring loop.
    #[arg(long)]
    no_scheduler: bool,
}

#[derive(Args, Debug, Clone)]
struct SeedArgs {
    #[arg(long, default_value_t = 3)]
    channels: usize,
    #[arg(long, default_value_t = 60)]
    posts: usize,
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

#[derive(Args, Debug, Clone)]
struct IngestArgs {
    file: PathBuf,
}

#[derive(Args, Debug, Clone)]
struct BaselineArgs {
    channel: ChannelId,
    #[arg(long)]
    recompute: bool,
}

#[derive(Args, Debug, Clone)]
struct ScoreArgs {
    #[arg(long)]
    channel: Option<ChannelId>,
    #[arg(long)]
    limit: Option<usize>,
}

#[derive(Args, Debug, Clone)]
struct ClassifyArgs {
    post: PostId,
}

#[derive(Args, Debug, Clone)]
struct ViralArgs {
    #[arg(long, default_value_t = 0.0)]
    min_score: f64,
    #[arg(long)]
    channel: Option<ChannelId>,
    #[arg(long, default_value_t = 20)]
    limit: usize,
}

#[derive(Args, Debug, Clone)]
struct InitConfigArgs {
    #[arg(long, default_value = "config/engine.toml")]
    path: PathBuf,
    #[arg(long)]
    force: bool,
}

#[tokio::main]
async fn main() {
    load_dotenv();
    init_tracing();
    if let Err(err) = run().await {
        eprintln!("Error: {}", err);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), EngineError> {
    let cli = Cli::parse();

    if let Command::InitConfig(args) = &cli.command {
        return init_config(args);
    }

    let coordinator = open_coordinator(cli.config.clone(), cli.store.clone()).await?;
    match cli.command {
        Command::Serve(args) => server::serve(args, coordinator).await,
        Command::Seed(args) => run_seed(&coordinator, args).await,
        Command::Ingest(args) => run_ingest(&coordinator, &args.file).await,
        Command::Baseline(args) => run_baseline(&coordinator, args).await,
        Command::RecomputeAll => run_recompute_all(&coordinator).await,
        Command::Score(args) => run_score(&coordinator, args).await,
        Command::ScoreAll => run_score_all(&coordinator).await,
        Command::Classify(args) => run_classify(&coordinator, args.post).await,
        Command::Viral(args) => run_viral(&coordinator, args).await,
        Command::InitConfig(_) => Ok(()),
    }
}

async fn open_coordinator(
    config_path: Option<PathBuf>,
    store_path: Option<PathBuf>,
) -> Result<Coordinator, EngineError> {
    let (mut config, _) = EngineConfig::load(config_path)?;
    if let Some(path) = store_path {
        config.store.path = path;
    }
    let store = Store::open(config.store.path.clone()).await?;
    Coordinator::new(Arc::new(store), config)
}

fn init_config(args: &InitConfigArgs) -> Result<(), EngineError> {
    if args.path.exists() && !args.force {
        return Err(EngineError::Config(format!(
            "{} already exists (pass --force to overwrite)",
            args.path.display()
        )));
    }
    EngineConfig::default().write(&args.path)?;
    println!("Wrote default config to {}", args.path.display());
    Ok(())
}

async fn run_seed(coordinator: &Coordinator, args: SeedArgs) -> Result<(), EngineError> {
    let now = Utc::now();
    for index in 0..args.channels {
        let channel_id = index as ChannelId + 1;
        let first_post_id = channel_id * 100_000;
        let posts = generate_channel_history(channel_id, first_post_id, args.posts, args.seed, now);
        let summary = coordinator
            .ingest_posts(synthetic_channel(channel_id), posts)
            .await?;
        println!("Channel {}: ingested {} posts", channel_id, summary.ingested);
    }
    Ok(())
}

async fn run_ingest(coordinator: &Coordinator, file: &Path) -> Result<(), EngineError> {
    let data = std::fs::read_to_string(file)
        .map_err(|err| EngineError::InvalidInput(format!("failed to read {}: {}", file.display(), err)))?;
    let request: api::IngestRequest = serde_json::from_str(&data)
        .map_err(|err| EngineError::InvalidInput(format!("failed to parse {}: {}", file.display(), err)))?;
    let (channel, posts) = request.into_parts();
    let summary = coordinator.ingest_posts(channel, posts).await?;
    println!("Ingested {} posts", summary.ingested);
    for failure in &summary.rejected {
        eprintln!("Rejected post {:?}: {}", failure.post, failure.error);
    }
    if let Some(scored) = summary.scored {
        println!(
            "Auto-scored: {} processed | {} viral | {} skipped",
            scored.processed, scored.viral_found, scored.skipped
        );
    }
    Ok(())
}

async fn run_baseline(coordinator: &Coordinator, args: BaselineArgs) -> Result<(), EngineError> {
    let baseline = if args.recompute {
        Some(coordinator.compute_baseline(args.channel).await?)
    } else {
        coordinator.get_channel_baseline(args.channel).await
    };
    match baseline {
        Some(baseline) => print_baseline(&baseline),
        None => println!("Channel {}: no baseline yet", args.channel),
    }
    Ok(())
}

fn print_baseline(baseline: &ChannelBaseline) {
    println!(
        "Channel {}: {} ({} eligible posts, computed {})",
        baseline.channel_id,
        baseline.status.label(),
        baseline.posts_analyzed,
        baseline.computed_at.to_rfc3339()
    );
    if let Some(stats) = baseline.stats.as_ref() {
        println!(
            "  mean {} | median {} | p75 {} | stddev {} | {} posts after trimming",
            format_percent(stats.avg_engagement_rate),
            format_percent(stats.median_engagement_rate),
            format_percent(stats.p75_engagement_rate),
            format_percent(stats.stddev_engagement_rate),
            stats.posts_used
        );
    }
}

async fn run_recompute_all(coordinator: &Coordinator) -> Result<(), EngineError> {
    let summary = coordinator.recompute_all_baselines().await?;
    for updated in &summary.updated {
        println!(
            "Channel {}: {} ({} eligible posts)",
            updated.channel_id,
            updated.status.label(),
            updated.posts_analyzed
        );
    }
    if let Some(err) = partial_batch(summary.updated.len() + summary.errors.len(), &summary.errors) {
        eprintln!("Warning: {}", err);
    }
    Ok(())
}

async fn run_score(coordinator: &Coordinator, args: ScoreArgs) -> Result<(), EngineError> {
    let limit = args
        .limit
        .unwrap_or_else(|| coordinator.config().calc.batch_size);
    let summary = coordinator.score_posts_batch(args.channel, limit).await?;
    println!(
        "Processed {} | viral {} | skipped {} ({} without baseline)",
        summary.processed, summary.viral_found, summary.skipped, summary.skipped_no_baseline
    );
    if let Some(err) = partial_batch(summary.processed + summary.skipped, &summary.errors) {
        eprintln!("Warning: {}", err);
    }
    Ok(())
}

async fn run_score_all(coordinator: &Coordinator) -> Result<(), EngineError> {
    let handle = coordinator.score_all_posts().await;
    println!("Job {} started", handle.id());

    let status = tokio::select! {
        status = handle.wait() => status,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("Cancelling; progress is checkpointed");
            handle.cancel().await?;
            handle.wait().await
        }
    };
    let status = status.ok_or_else(|| EngineError::NotFound(format!("job {}", handle.id())))?;

    if status.state == JobState::Failed {
        return Err(EngineError::Infrastructure(
            status.error.unwrap_or_else(|| "score-all failed".to_string()),
        ));
    }
    if let Some(JobOutcome::ScoreAll(summary)) = status.outcome {
        println!(
            "Scored {} of {} posts | viral {} | skipped {}{}",
            format_number(summary.progress.processed_posts as f64),
            format_number(summary.progress.total_posts as f64),
            summary.viral_found,
            summary.skipped,
            if summary.cancelled { " (cancelled)" } else { "" }
        );
        for channel in &summary.progress.channels {
            println!(
                "  channel {}: {} posts, {} viral",
                channel.channel_id, channel.processed_posts, channel.viral_posts
            );
        }
    }
    Ok(())
}

async fn run_classify(coordinator: &Coordinator, post_id: PostId) -> Result<(), EngineError> {
    let metrics = coordinator.classify_post(post_id).await?;
    println!(
        "Post {}: {} (score {})",
        post_id,
        if metrics.is_viral { "VIRAL" } else { "not viral" },
        format_float(metrics.viral_score, 2)
    );
    println!(
        "  engagement {} | z-score {} | x median {} | views percentile {}",
        format_percent(metrics.engagement_rate),
        format_float(metrics.zscore, 2),
        format_float(metrics.median_multiplier, 2),
        format_percent(metrics.views_percentile)
    );
    Ok(())
}

async fn run_viral(coordinator: &Coordinator, args: ViralArgs) -> Result<(), EngineError> {
    let posts = coordinator
        .list_viral_posts(args.min_score, args.channel, args.limit)
        .await;
    if posts.is_empty() {
        println!("No viral posts");
        return Ok(());
    }
    for post in posts {
        let Some(viral) = post.viral.as_ref() else {
            continue;
        };
        println!(
            "{:>10}  channel {:<6} score {:>6}  z {:>6}  x{:<6} views {}",
            post.id,
            post.channel_id,
            format_float(viral.viral_score, 2),
            format_float(viral.zscore, 2),
            format_float(viral.median_multiplier, 1),
            format_number(post.views as f64)
        );
    }
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_dotenv() {
    let _ = dotenvy::dotenv();
    let manifest_dir = env!("CARGO_MANIFEST_DIR");
    let manifest_path = Path::new(manifest_dir).join(".env");
    let _ = dotenvy::from_path(manifest_path);
}
