use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use revdb_core::PageTarget;
use revdb_storage::Store;
use revdb_sync::{
    audit_report, build_pipeline, load_seed_file, retry_seeds, seed_from_url, yearly_sitemaps,
    SyncConfig,
};

#[derive(Debug, Parser)]
#[command(name = "revdb")]
#[command(about = "Album review archive: crawl, normalize and audit")]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// SQLite database file (overrides REVDB_DATABASE_PATH).
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Crawl from the given seeds.
    Run(RunArgs),
    /// Re-crawl every URL whose latest step failed.
    Retry(PoolArgs),
    /// Create or upgrade the database schema.
    Migrate,
    /// Step outcomes and table sizes.
    Report {
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Args)]
struct PoolArgs {
    #[arg(long)]
    workers: Option<usize>,

    /// Stop dequeuing after this many seconds and let in-flight pages finish.
    #[arg(long)]
    run_timeout: Option<u64>,

    #[arg(long)]
    no_follow_artists: bool,
}

#[derive(Debug, Args)]
struct RunArgs {
    /// Page or sitemap URL; repeatable.
    #[arg(long = "seed")]
    seeds: Vec<String>,

    /// YAML file with `seeds: [{ url, classification }]`.
    #[arg(long)]
    seed_file: Option<PathBuf>,

    /// First year of sitemap indexes to crawl.
    #[arg(long, requires = "to_year")]
    from_year: Option<i32>,

    #[arg(long, requires = "from_year")]
    to_year: Option<i32>,

    #[command(flatten)]
    pool: PoolArgs,
}

impl PoolArgs {
    fn apply(&self, config: &mut SyncConfig) {
        if let Some(workers) = self.workers {
            config.workers = workers.max(1);
        }
        if let Some(secs) = self.run_timeout {
            config.run_timeout_secs = Some(secs).filter(|s| *s > 0);
        }
        if self.no_follow_artists {
            config.follow_artists = false;
        }
    }
}

async fn collect_seeds(args: &RunArgs, config: &SyncConfig) -> Result<Vec<PageTarget>> {
    let mut seeds: Vec<PageTarget> = args.seeds.iter().map(|url| seed_from_url(url)).collect();
    if let Some(path) = &args.seed_file {
        seeds.extend(load_seed_file(path).await?);
    }
    if let (Some(from), Some(to)) = (args.from_year, args.to_year) {
        seeds.extend(yearly_sitemaps(&config.site_root, from, to));
    }
    if seeds.is_empty() {
        bail!("nothing to crawl: pass --seed, --seed-file or --from-year/--to-year");
    }
    Ok(seeds)
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "revdb=debug" } else { "revdb=info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = SyncConfig::from_env();
    if let Some(path) = cli.database {
        config.database_path = path;
    }

    match cli.command {
        Commands::Run(args) => {
            args.pool.apply(&mut config);
            let seeds = collect_seeds(&args, &config).await?;
            let pipeline = build_pipeline(&config).await?;
            let summary = pipeline.run(seeds).await.context("crawl run")?;
            pipeline.store().close().await;
            println!("{summary}");
        }
        Commands::Retry(pool) => {
            pool.apply(&mut config);
            let pipeline = build_pipeline(&config).await?;
            let seeds = retry_seeds(pipeline.store()).await.context("loading failed urls")?;
            if seeds.is_empty() {
                println!("nothing to retry");
                return Ok(());
            }
            info!(count = seeds.len(), "retrying failed urls");
            let summary = pipeline.run(seeds).await.context("retry run")?;
            pipeline.store().close().await;
            println!("{summary}");
        }
        Commands::Migrate => {
            let store = Store::open(&config.store_config())
                .await
                .with_context(|| format!("opening {}", config.database_path.display()))?;
            store.close().await;
            println!("schema up to date at {}", config.database_path.display());
        }
        Commands::Report { json } => {
            let store = Store::open(&config.store_config())
                .await
                .with_context(|| format!("opening {}", config.database_path.display()))?;
            let report = audit_report(&store).await.context("building audit report")?;
            store.close().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&report).context("serializing report")?);
            } else {
                println!("{report}");
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn pool_flags_override_config() {
        let cli = Cli::parse_from([
            "revdb",
            "run",
            "--seed",
            "https://pitchfork.com/staff/jane-doe/",
            "--workers",
            "2",
            "--run-timeout",
            "30",
            "--no-follow-artists",
        ]);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        let mut config = SyncConfig::default();
        args.pool.apply(&mut config);
        assert_eq!(config.workers, 2);
        assert_eq!(config.run_timeout_secs, Some(30));
        assert!(!config.follow_artists);
    }

    #[test]
    fn year_bounds_come_in_pairs() {
        assert!(Cli::try_parse_from(["revdb", "run", "--from-year", "2019"]).is_err());
    }

    #[tokio::test]
    async fn seeds_are_required() {
        let cli = Cli::parse_from(["revdb", "run", "--from-year", "2019", "--to-year", "2020"]);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        let seeds = collect_seeds(&args, &SyncConfig::default()).await.expect("seeds");
        assert_eq!(seeds.len(), 2);

        let cli = Cli::parse_from(["revdb", "run"]);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert!(collect_seeds(&args, &SyncConfig::default()).await.is_err());
    }
}
