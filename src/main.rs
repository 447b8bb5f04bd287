use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

use humanitix_importer::app::ports::{EventSource, LocalStore, LogSink};
use humanitix_importer::config::Config;
use humanitix_importer::domain::EntityKind;
use humanitix_importer::infra::{FileEventSource, HumanitixClient, InMemoryStore, TracingLogSink};
use humanitix_importer::observability::{self, metrics};
use humanitix_importer::pipeline::processing::{FieldMapper, MappingSuggester, SchemaAnalyzer};
use humanitix_importer::pipeline::{
    BatchPlanner, CancelFlag, ImportOptions, ImportOrchestrator, ImportRunResult, SystemMemoryProbe,
};

#[derive(Parser)]
#[command(name = "humanitix-importer")]
#[command(about = "Import Humanitix events into the local event catalog")]
#[command(version)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct SourceArgs {
    /// Read events from a saved API response instead of the live API
    #[arg(long)]
    from_file: Option<PathBuf>,

    /// Map and match everything without writing
    #[arg(long)]
    dry_run: bool,

    /// Catalog file the run reads from and saves back to
    #[arg(long, default_value = "humanitix-catalog.json")]
    catalog: PathBuf,
}

fn open_catalog(source: &SourceArgs) -> anyhow::Result<Arc<InMemoryStore>> {
    let store = InMemoryStore::load(&source.catalog)
        .with_context(|| format!("opening catalog {}", source.catalog.display()))?;
    Ok(Arc::new(store))
}

fn save_catalog(source: &SourceArgs, store: &InMemoryStore) -> anyhow::Result<()> {
    if source.dry_run {
        return Ok(());
    }
    store
        .save(&source.catalog)
        .with_context(|| format!("saving catalog {}", source.catalog.display()))?;
    println!("💾 Saved catalog to {}", source.catalog.display());
    Ok(())
}

#[derive(Subcommand)]
enum Commands {
    /// Run a paged import
    Import {
        #[command(flatten)]
        source: SourceArgs,
        #[arg(long, default_value_t = 1)]
        start_page: u32,
        /// Overrides import.max_pages
        #[arg(long)]
        max_pages: Option<u32>,
        /// Stop after this many events
        #[arg(long)]
        limit: Option<usize>,
        /// Only link venues/organizers that already exist
        #[arg(long)]
        no_create_entities: bool,
        /// Do not record event image URLs
        #[arg(long)]
        no_images: bool,
        /// Print Prometheus metrics after the run
        #[arg(long)]
        metrics: bool,
    },
    /// Import one event by its Humanitix id
    ImportOne {
        id: String,
        #[command(flatten)]
        source: SourceArgs,
    },
    /// Suggest target fields for keys the mapper does not know
    Suggest { file: PathBuf },
    /// Show the field shapes present in a saved API response
    Analyze { file: PathBuf },
}

fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let config = match path {
        Some(path) => {
            let mut config = Config::load_from(path)?;
            config.apply_env(|key| std::env::var(key).ok());
            config.validate()?;
            config
        }
        None => Config::load()?,
    };
    Ok(config)
}

fn build_source(config: &Config, from_file: Option<&Path>) -> anyhow::Result<Arc<dyn EventSource>> {
    match from_file {
        Some(path) => {
            let source = FileEventSource::load(path, config.api.page_size as usize)
                .with_context(|| format!("loading events from {}", path.display()))?;
            Ok(Arc::new(source))
        }
        None => {
            config.require_api_key()?;
            Ok(Arc::new(HumanitixClient::new(&config.api)?))
        }
    }
}

fn build_orchestrator(
    config: &Config,
    source: Arc<dyn EventSource>,
    store: Arc<dyn LocalStore>,
) -> anyhow::Result<ImportOrchestrator> {
    let log: Arc<dyn LogSink> = Arc::new(TracingLogSink);
    let mapper = FieldMapper::new(config.import.timezone()?, config.import.default_currency.clone());
    let planner = BatchPlanner::new(
        config.import.batch_size,
        config.import.memory_target_bytes(),
        Arc::new(SystemMemoryProbe),
    );
    Ok(ImportOrchestrator::new(source, store, log, mapper, planner))
}

fn print_result(result: &ImportRunResult) {
    println!("\n📊 Import results{}:", if result.dry_run { " (dry run)" } else { "" });
    println!("   Fetched: {} ({} pages)", result.fetched_count, result.pages_fetched);
    println!("   Imported: {}", result.imported_count);
    println!("   Updated: {}", result.updated_count);
    println!("   Skipped: {}", result.skipped_count);
    println!("   Failed: {}", result.failed_count);
    println!("   Duration: {:.2}s", result.duration.as_secs_f64());
    if let Some(reason) = result.aborted {
        println!("   ⚠️  Stopped early: {}", reason);
    }
    if !result.warnings.is_empty() {
        println!("   Warnings: {}", result.warnings.len());
    }
    if !result.errors.is_empty() {
        println!("\n⚠️  Errors encountered:");
        for error in result.error_preview() {
            println!("   - {}", error);
        }
        let hidden = result.errors.len() - result.error_preview().len();
        if hidden > 0 {
            println!("   ... and {} more (see logs)", hidden);
        }
    }
}

async fn print_store_totals(store: &InMemoryStore) {
    println!(
        "\n💾 Catalog now holds {} events, {} venues, {} organizers",
        store.count(EntityKind::Event).await,
        store.count(EntityKind::Venue).await,
        store.count(EntityKind::Organizer).await
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    observability::init_logging(&config.logging);

    match cli.command {
        Commands::Import {
            source,
            start_page,
            max_pages,
            limit,
            no_create_entities,
            no_images,
            metrics: show_metrics,
        } => {
            if let Err(e) = metrics::init() {
                warn!("Metrics unavailable: {}", e);
            }
            println!("🚀 Running Humanitix import...");
            let store = open_catalog(&source)?;
            let event_source = build_source(&config, source.from_file.as_deref())?;
            let orchestrator = build_orchestrator(&config, event_source, store.clone())?;

            let options = ImportOptions {
                start_page,
                max_pages: max_pages.unwrap_or(config.import.max_pages),
                record_limit: limit,
                create_missing_entities: config.import.create_missing_entities && !no_create_entities,
                fetch_images: config.import.fetch_images && !no_images,
                dry_run: source.dry_run,
            };

            let cancel = CancelFlag::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupt received, finishing the current record");
                    on_signal.cancel();
                }
            });

            match orchestrator.run(&options, &cancel).await {
                Ok(result) => {
                    info!("Import finished");
                    print_result(&result);
                    print_store_totals(&store).await;
                    save_catalog(&source, &store)?;
                }
                Err(e) => {
                    error!("Import failed: {}", e);
                    println!("❌ Import failed: {}", e);
                    return Err(e.into());
                }
            }

            if show_metrics {
                if let Some(rendered) = metrics::render() {
                    println!("\n{}", rendered);
                }
            }
        }
        Commands::ImportOne { id, source } => {
            println!("🎯 Importing event {}...", id);
            let store = open_catalog(&source)?;
            let event_source = build_source(&config, source.from_file.as_deref())?;
            let orchestrator = build_orchestrator(&config, event_source, store.clone())?;
            let options = ImportOptions {
                create_missing_entities: config.import.create_missing_entities,
                fetch_images: config.import.fetch_images,
                dry_run: source.dry_run,
                ..Default::default()
            };

            let result = orchestrator.import_one(&id, &options).await?;
            print_result(&result);
            print_store_totals(&store).await;
            save_catalog(&source, &store)?;
        }
        Commands::Suggest { file } => {
            let events = FileEventSource::load(&file, usize::MAX)?;
            let suggester = MappingSuggester::new();
            let mut seen = std::collections::BTreeSet::new();

            println!("🔍 Mapping suggestions for unknown fields in {}:", file.display());
            for event in events.events() {
                for suggestion in suggester.suggest(event) {
                    if seen.insert(suggestion.source_field.clone()) {
                        println!(
                            "   {} → {} (e.g. {})",
                            suggestion.source_field, suggestion.suggested_target_field, suggestion.sample_value
                        );
                    }
                }
            }
            if seen.is_empty() {
                println!("   Every field is covered by the mapping table");
            }
        }
        Commands::Analyze { file } => {
            let events = FileEventSource::load(&file, usize::MAX)?;
            let presence = SchemaAnalyzer::default().analyze_many(events.events());

            println!("🧬 Field shapes across {} events in {}:", events.events().len(), file.display());
            for field in presence {
                println!("   {:<40} {:>5}  {}", field.path, field.seen, field.kinds.join("|"));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_import_reads_and_saves_the_catalog_file() {
        let cli = Cli::try_parse_from(["humanitix-importer", "import", "--catalog", "/tmp/events.json"]).unwrap();
        match cli.command {
            Commands::Import { source, .. } => assert_eq!(source.catalog, PathBuf::from("/tmp/events.json")),
            _ => panic!("expected import"),
        }

        let cli = Cli::try_parse_from(["humanitix-importer", "import-one", "e1"]).unwrap();
        match cli.command {
            Commands::ImportOne { source, .. } => {
                assert_eq!(source.catalog, PathBuf::from("humanitix-catalog.json"))
            }
            _ => panic!("expected import-one"),
        }
    }

    #[tokio::test]
    async fn test_dry_run_leaves_the_catalog_file_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        let source = SourceArgs {
            from_file: None,
            dry_run: true,
            catalog: path.clone(),
        };
        let store = open_catalog(&source).unwrap();
        save_catalog(&source, &store).unwrap();
        assert!(!path.exists());

        let source = SourceArgs { dry_run: false, ..source };
        save_catalog(&source, &store).unwrap();
        assert!(path.exists());
    }
}
