use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use mailsift::constants::DEFAULT_CONFIG_FILE;
use mailsift::utils::{discover_input_files, format_duration, setup_logging};
use mailsift::{SorterConfig, SortingPipeline};

#[derive(Parser)]
#[command(name = "mailsift")]
#[command(about = "📬 Mailsift: sorts email address lists into per-country files ✨")]
#[command(version)]
struct Args {
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE, help = "Configuration file")]
    config: PathBuf,

    #[arg(short, long, help = "Input file or glob pattern (repeatable, replaces configured inputs)")]
    input: Vec<String>,

    #[arg(short, long, help = "Output directory for the per-country files")]
    output: Option<PathBuf>,

    #[arg(long, help = "Directory holding the resume checkpoint")]
    state_dir: Option<PathBuf>,

    #[arg(long, help = "Only use the configured suffix rules")]
    no_remote_lookup: bool,

    #[arg(long, help = "Discard any saved progress and start over")]
    fresh: bool,

    #[arg(short, long, help = "Verbose output")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = if args.config.exists() {
        SorterConfig::from_file(&args.config)?
    } else {
        println!("📄 Config file not found, creating default: {}", args.config.display());
        let default_config = SorterConfig::default();
        default_config.to_file(&args.config)?;
        default_config
    };

    if args.verbose {
        config.verbose = true;
    }
    if !args.input.is_empty() {
        config.input_files = args.input.clone();
    }
    if let Some(output) = args.output {
        config.output_directory = output;
    }
    if let Some(state_dir) = args.state_dir {
        config.state_directory = state_dir;
    }
    if args.no_remote_lookup {
        config.use_remote_lookup = false;
        println!("🗺️ Remote lookups disabled, unmatched domains go to OTHER");
    }

    setup_logging(config.verbose)?;

    let pipeline = SortingPipeline::new(config)?;
    let config = pipeline.config();

    if args.fresh {
        println!("🧽 Discarding saved progress in {}", config.state_directory.display());
        pipeline.checkpoint_store().remove()?;
    }

    let input_files = discover_input_files(&config.input_files)?;
    if input_files.is_empty() {
        return Err(anyhow::anyhow!(
            "No input files matched: {}",
            config.input_files.join(", ")
        ));
    }

    println!("📬 Mailsift is sorting...");
    println!("🔍 Found {} input files", input_files.len());
    println!("📝 Output: {}", config.output_directory.display());

    let shutdown_flag = Arc::new(AtomicBool::new(false));
    let shutdown_flag_clone = shutdown_flag.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("\n🛑 Shutdown signal received. Finishing the current chunk...");
            shutdown_flag_clone.store(true, Ordering::Relaxed);
        }
    });

    let pipeline = pipeline.with_shutdown_signal(shutdown_flag);
    let stats = pipeline.sort_emails(&input_files).await?;

    if !stats.completed {
        println!("\n⏸️ Sorting stopped early. Run again with the same settings to resume.");
        println!("📊 Emails sorted so far: {}", stats.total_processed);
        std::process::exit(130);
    }

    println!("\n🎉 Sorting completed successfully! 🎉");
    println!("=======================================");
    for (bucket, count) in &stats.bucket_counts {
        println!("🌍 {}: {}", bucket, count);
    }
    println!("📊 Total sorted: {}", stats.total_processed);
    println!("⚠️ Invalid addresses: {}", stats.invalid_emails);
    println!("📖 Matched by suffix rules: {}", stats.static_rule_hits);
    println!(
        "🌐 Remote lookups: {} ({} cached, {} network calls, {} failed, {} domains known)",
        stats.remote_lookups,
        stats.cache_hits,
        stats.network_calls,
        stats.lookup_failures,
        stats.cached_domains
    );
    if stats.resumed {
        println!("🔄 Resumed from a checkpoint; {} files were already done", stats.files_skipped);
    }
    println!(
        "⏱️ Processing time: {}",
        format_duration(stats.processing_time_ms as f64 / 1000.0)
    );

    Ok(())
}
