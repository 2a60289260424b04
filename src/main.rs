use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use earmark::batch::cache::HashCache;
use earmark::batch::{self, BatchOptions, BatchSummary};
use earmark::config::AppConfig;
use earmark::db::Database;
use earmark::fingerprint::Fingerprinter;
use earmark::matcher::{QueryMethod, ScoringMode};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "earmark", version, about = "Landmark audio fingerprinting and recognition")]
struct Cli {
    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Scoring {
    Votes,
    Idf,
}

impl From<Scoring> for ScoringMode {
    fn from(s: Scoring) -> Self {
        match s {
            Scoring::Votes => ScoringMode::Votes,
            Scoring::Idf => ScoringMode::Idf,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Fingerprint every audio file under a directory into a fresh index
    BuildIndex {
        /// Directory of reference tracks (scanned recursively)
        input_dir: PathBuf,

        /// Index file to create (replaced if it exists)
        db: PathBuf,
    },

    /// Identify a single audio clip
    Identify {
        /// Index built with build-index
        db: PathBuf,

        /// Query clip
        file: PathBuf,

        /// Scoring mode (overrides config)
        #[arg(long, value_enum, conflicts_with = "store_vote")]
        scoring: Option<Scoring>,

        /// Show the best N candidates
        #[arg(long, conflicts_with = "store_vote")]
        top: Option<usize>,

        /// Count matching records in the store directly, without exclusion or weighting
        #[arg(long)]
        store_vote: bool,

        /// Exit with status 1 when nothing matches
        #[arg(long)]
        fail_on_no_match: bool,
    },

    /// Recognize a labelled sample set and report accuracy
    Batch {
        /// Index built with build-index
        db: PathBuf,

        /// Sample directory; first-level subdirectories are categories
        samples_dir: PathBuf,

        /// Number of parallel workers (0 = auto-detect from config)
        #[arg(short = 'j', long, default_value = "0")]
        jobs: usize,

        /// Only populate the hash cache
        #[arg(long)]
        warmup_only: bool,

        /// Extract every sample on a shared pool before recognizing
        #[arg(long, conflicts_with = "warmup_only")]
        prewarm: bool,

        /// Delete all cache entries before running
        #[arg(long)]
        clear_cache: bool,

        /// Recompute hashes even if cached
        #[arg(long)]
        refresh: bool,

        /// Hash cache directory (overrides config)
        #[arg(long)]
        cache_dir: Option<PathBuf>,

        /// Scoring mode (overrides config)
        #[arg(long, value_enum)]
        scoring: Option<Scoring>,
    },

    /// Show index statistics
    Stats {
        /// Index built with build-index
        db: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Load config file (optional, defaults if missing)
    let config = AppConfig::load();

    match cli.command {
        Commands::BuildIndex { input_dir, db } => {
            if !input_dir.is_dir() {
                anyhow::bail!("Not a directory: {}", input_dir.display());
            }
            remove_store(&db)?;

            let fingerprinter = Fingerprinter::new(config.fingerprint.clone())
                .context("Invalid fingerprint configuration")?;
            let store = Database::open(&db).context("Failed to create index")?;
            let result = earmark::indexer::build_index(
                &store,
                &input_dir,
                &fingerprinter,
                config.index.on_error,
            )
            .context("Indexing failed")?;
            println!(
                "Index complete: {} indexed, {} failed, {} fingerprints",
                result.indexed, result.failed, result.records
            );
        }

        Commands::Identify {
            db,
            file,
            scoring,
            top,
            store_vote,
            fail_on_no_match,
        } => {
            let fingerprinter = Fingerprinter::new(config.fingerprint.clone())
                .context("Invalid fingerprint configuration")?;
            let samples =
                earmark::fingerprint::decode::load_audio(&file, config.fingerprint.sample_rate)
                    .with_context(|| format!("Failed to decode {}", file.display()))?;

            let method = if store_vote {
                QueryMethod::StoreVote
            } else {
                QueryMethod::Matcher {
                    config: config.matcher.clone().with_scoring(scoring.map(Into::into)),
                    top: top.unwrap_or(1).max(1),
                }
            };
            let ranked = earmark::matcher::identify(&db, &fingerprinter, &samples, &method)
                .context("Identification failed")?;

            if ranked.len() > 1 {
                println!("{:>3}  {:<40} {:>8} {:>10}", "#", "Track", "Votes", "Score");
                println!("{}", "-".repeat(64));
                for (i, m) in ranked.iter().enumerate() {
                    println!("{:>3}  {:<40} {:>8} {:>10.3}", i + 1, m.track, m.votes, m.score);
                }
                println!();
            }

            match ranked.first() {
                Some(m) => println!("{} ({} votes)", m.track, m.votes),
                None => {
                    println!("No match found.");
                    if fail_on_no_match {
                        std::process::exit(1);
                    }
                }
            }
        }

        Commands::Batch {
            db,
            samples_dir,
            jobs,
            warmup_only,
            prewarm,
            clear_cache,
            refresh,
            cache_dir,
            scoring,
        } => {
            let matcher = config.matcher.clone().with_scoring(scoring.map(Into::into));
            let options = BatchOptions {
                db_path: db,
                cache_dir: cache_dir.unwrap_or_else(|| config.resolve_cache_dir()),
                workers: if jobs > 0 { jobs } else { config.resolve_workers() },
                fingerprint: config.fingerprint.clone(),
                matcher,
                refresh,
            };
            log::info!("Hash cache: {}", options.cache_dir.display());

            if clear_cache {
                let removed = HashCache::new(&options.cache_dir)
                    .and_then(|cache| cache.clear())
                    .context("Failed to clear hash cache")?;
                println!("Cleared {} cache entries", removed);
            }

            let samples = earmark::scanner::discover_samples(&samples_dir);
            if samples.is_empty() {
                anyhow::bail!("No audio samples found under {}", samples_dir.display());
            }

            if warmup_only {
                let result = batch::warmup_cache(&samples, &options).context("Warmup failed")?;
                println!(
                    "Warmup complete: {} extracted, {} cached, {} failed",
                    result.extracted, result.cached, result.failed
                );
                return Ok(());
            }

            let run = if prewarm {
                batch::batch_recognize_fast(samples, &options).context("Warmup failed")?
            } else {
                batch::batch_recognize(samples, &options)
            };

            let mut summary = BatchSummary::default();
            for outcome in run {
                match outcome {
                    Ok(o) => {
                        log::info!(
                            "{} [{}] -> {} ({} votes)",
                            o.expected,
                            o.category,
                            o.predicted_label(),
                            o.votes
                        );
                        summary.record(&o);
                    }
                    Err(e) => {
                        log::error!("{}", e);
                        summary.record_error();
                    }
                }
            }
            print_summary(&summary);
        }

        Commands::Stats { db } => {
            let store = Database::open_existing(&db).context("Failed to open index")?;
            let stats = store.stats().context("Failed to get stats")?;
            println!("Index Statistics");
            println!("================");
            println!("Fingerprints:     {}", stats.records);
            println!("Distinct hashes:  {}", stats.distinct_hashes);
            println!("Tracks:           {}", stats.tracks);
            if let Some(built_at) = &stats.built_at {
                println!("Built at:         {}", built_at);
            }

            let meta = store.read_meta().context("Failed to read index metadata")?;
            if !meta.is_empty() {
                println!();
                println!("Parameters:");
                for (key, value) in meta.iter().filter(|(k, _)| k.as_str() != "built_at") {
                    println!("  {:<14} {}", key, value);
                }
            }
        }
    }

    Ok(())
}

/// Delete an index file and its SQLite side files, if present.
fn remove_store(db: &std::path::Path) -> Result<()> {
    let side = earmark::db::side_files(db);
    for path in std::iter::once(db).chain(side.iter().map(|p| p.as_path())) {
        if path.exists() {
            std::fs::remove_file(path)
                .with_context(|| format!("Failed to remove {}", path.display()))?;
            log::info!("Removed {}", path.display());
        }
    }
    Ok(())
}

/// Print per-category accuracy for a batch run.
fn print_summary(summary: &BatchSummary) {
    println!(
        "{:<20} {:>7} {:>7} {:>8}",
        "Category", "Total", "Correct", "Accuracy"
    );
    println!("{}", "-".repeat(46));

    for (name, cat) in &summary.categories {
        println!(
            "{:<20} {:>7} {:>7} {:>7.1}%",
            name,
            cat.total,
            cat.correct,
            cat.accuracy() * 100.0
        );
    }

    println!("{}", "-".repeat(46));
    println!(
        "{:<20} {:>7} {:>7} {:>7.1}%",
        "Overall",
        summary.overall.total,
        summary.overall.correct,
        summary.overall.accuracy() * 100.0
    );
    println!();
    println!("No match: {}  Errors: {}", summary.no_match, summary.errors);
}
