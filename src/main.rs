use anyhow::{bail, Context};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tierdex::cli::{Cli, Commands};
use tierdex::{Config, ContextService, TierSet};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tierdex=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let base_dir = cli.base_dir.as_deref().map(PathBuf::from);

    match cli.command {
        Commands::Init => handle_init(base_dir),
        Commands::Index { force } => {
            let service = open_service(base_dir)?;
            println!("{}", service.index_files(force));
            Ok(())
        }
        Commands::Watch => handle_watch(base_dir),
        Commands::Search {
            query,
            context,
            tiers,
            limit,
        } => handle_search(base_dir, &query, &context, tiers.as_deref(), limit),
        Commands::Context { query, context } => {
            let service = open_service(base_dir)?;
            let block = service.get_context_for_query(&query, &context);
            if block.is_empty() {
                println!("No relevant context found.");
            } else {
                println!("{}", block);
            }
            Ok(())
        }
        Commands::Stats => {
            let service = open_service(base_dir)?;
            println!("{}", service.format_stats());
            Ok(())
        }
        Commands::Files => {
            let service = open_service(base_dir)?;
            let files = service.indexed_files();
            if files.is_empty() {
                println!("No files indexed yet.");
            }
            for file in &files {
                println!("{}", file);
            }
            Ok(())
        }
        Commands::Purge => {
            let service = open_service(base_dir)?;
            let purged = service.purge_excluded()?;
            if purged.is_empty() {
                println!("No excluded files found in the index.");
            } else {
                println!("Removed {} excluded files:", purged.len());
                for path in &purged {
                    println!("  ✗ {}", path);
                }
            }
            Ok(())
        }
        Commands::Reset { yes } => {
            if !yes {
                bail!("reset deletes every indexed document; re-run with --yes to confirm");
            }
            let service = open_service(base_dir)?;
            service.reset()?;
            println!("✓ Index reset. Run 'tierdex index' to rebuild it.");
            Ok(())
        }
    }
}

fn open_service(base_dir: Option<PathBuf>) -> anyhow::Result<ContextService> {
    let config = Config::load(base_dir).context("failed to load configuration")?;
    ContextService::open(config).context("failed to open index")
}

fn handle_init(base_dir: Option<PathBuf>) -> anyhow::Result<()> {
    let config = Config::new(base_dir)?;

    if config.is_initialized() {
        println!("tierdex is already initialized at: {}", config.base_dir.display());
        println!("Edit {} to change settings.", config.config_path.display());
        return Ok(());
    }

    config.init()?;
    println!("✓ Created configuration directory: {}", config.base_dir.display());
    println!("✓ Created database directory: {}", config.database_dir.display());
    println!("✓ Wrote default settings: {}", config.config_path.display());

    println!("\nInitialization complete!");
    println!("Next steps:");
    println!("  1. Set indexing.watch_dirs and privacy rules in config.yaml");
    println!("  2. Index your files: tierdex index");
    println!("  3. Or keep the index current: tierdex watch");
    Ok(())
}

fn handle_watch(base_dir: Option<PathBuf>) -> anyhow::Result<()> {
    let service = Arc::new(open_service(base_dir)?);

    println!("{}", service.index_files(false));
    let handle = service.watch()?;
    println!("Watching for changes. Press Ctrl+C to stop.");
    handle.join();
    Ok(())
}

fn handle_search(
    base_dir: Option<PathBuf>,
    query: &str,
    context: &str,
    tiers: Option<&str>,
    limit: Option<usize>,
) -> anyhow::Result<()> {
    let service = open_service(base_dir)?;
    let tiers = tiers.map(TierSet::parse_list).transpose()?;

    let results = service.search(query, context, tiers, limit);

    if results.is_empty() {
        println!("No results found.");
        return Ok(());
    }

    println!("Found {} results:", results.len());
    for (i, result) in results.iter().enumerate() {
        let meta = &result.document.metadata;
        println!(
            "\n{}. {} [{}] (distance: {:.3}, chunk {}/{})",
            i + 1,
            meta.source_path,
            result.tier,
            result.distance,
            meta.chunk_index + 1,
            meta.chunk_count
        );
        let preview: String = result.document.content.chars().take(150).collect();
        println!("   {}", preview.replace('\n', " "));
    }
    Ok(())
}
