use std::{io::Write, sync::Arc, time::Duration};

use clap::Parser;
use docmux::{
    DataDir,
    RankingConfig,
    SearchIndex,
    classify::ContextClassifier,
    cli::{Cli, Command, ConfigAction, ExpandArgs, SearchArgs},
    config,
    error,
    expand::QueryExpander,
    flavor::FlavorFilter,
    ingest,
    search::{self, SearchOptions, Searcher},
};
use tracing_subscriber::EnvFilter;

/// Writer memory budget for ingestion (in bytes).
const WRITER_MEMORY: usize = 50_000_000;

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("DOCMUX_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn main() -> error::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(());
    }

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let config_path = data_dir.config_file(cli.config.as_deref());

    match cli.command {
        Command::Search(args) => {
            let config = config::init_global(&config_path);
            let search_index = SearchIndex::open(&data_dir.index_dir()?)?;
            cmd_search(config, Arc::new(search_index), &args)?;
        }
        Command::Expand(args) => {
            let config = config::init_global(&config_path);
            cmd_expand(config, &args)?;
        }
        Command::Ingest(args) => {
            let search_index = SearchIndex::open(&data_dir.index_dir()?)?;
            let mut writer = search_index.writer(WRITER_MEMORY)?;
            let summary = ingest::ingest_file(
                &search_index,
                &mut writer,
                &args.file,
                args.replace,
            )?;
            for (source, count) in &summary.per_source {
                println!("  {source}: {count}");
            }
            println!("Ingested {} document(s)", summary.documents);
        }
        Command::Status(args) => {
            let config = config::init_global(&config_path);
            cmd_status(config, &data_dir, &config_path, args.json)?;
        }
        Command::Config { action } => match action {
            ConfigAction::Check { path } => {
                let path = path.unwrap_or(config_path);
                cmd_config_check(&path)?;
            }
        },
        Command::Completions(_) => {}
    }

    Ok(())
}

fn cmd_search(
    config: &RankingConfig,
    search_index: Arc<SearchIndex>,
    args: &SearchArgs,
) -> error::Result<()> {
    let content = match &args.content {
        Some(path) => Some(std::fs::read_to_string(path)?),
        None => None,
    };
    let options = SearchOptions {
        max_total: args.count,
        max_per_source: args.per_source,
        sources: args.sources.clone(),
        content,
        min_score: args.min_score,
        timeout: args.timeout_ms.map(Duration::from_millis),
    };

    let outcome = Searcher::new(config, search_index).search(&args.query, &options);

    if args.json {
        println!("{}", search::format_json(&outcome)?);
    } else {
        let mut stdout = std::io::stdout().lock();
        search::write_human(&mut stdout, &outcome)?;
        stdout.flush()?;
    }
    Ok(())
}

fn cmd_expand(config: &RankingConfig, args: &ExpandArgs) -> error::Result<()> {
    let variants = QueryExpander::new(config).expand(&args.query);
    let context = ContextClassifier::new(config).classify(&args.query, &variants);
    let dialects = FlavorFilter::new(config).detect(&args.query);

    if args.json {
        let dialects: Vec<serde_json::Value> = dialects
            .iter()
            .map(|d| {
                serde_json::json!({
                    "group": d.group,
                    "dialect": d.dialect,
                    "explicit": d.explicit,
                })
            })
            .collect();
        let view = serde_json::json!({
            "query": args.query,
            "context": context.as_str(),
            "variants": variants,
            "dialects": dialects,
        });
        println!("{}", serde_json::to_string_pretty(&view)?);
    } else {
        println!("Context: {context}");
        println!("Variants:");
        for (i, variant) in variants.iter().enumerate() {
            println!("{:>3}. {variant}", i + 1);
        }
        for d in &dialects {
            let dialect = d.dialect.as_deref().unwrap_or("(any)");
            let how = if d.explicit { "requested" } else { "default" };
            println!("Dialect {}: {dialect} ({how})", d.group);
        }
    }
    Ok(())
}

fn cmd_status(
    config: &RankingConfig,
    data_dir: &DataDir,
    config_path: &std::path::Path,
    json: bool,
) -> error::Result<()> {
    let search_index = SearchIndex::open(&data_dir.index_dir()?)?;
    let documents = search_index.count(None)?;
    let mut sources = Vec::with_capacity(config.sources.len());
    for source in &config.sources {
        sources.push((source, search_index.count(Some(&source.id))?));
    }

    if json {
        let sources: Vec<serde_json::Value> = sources
            .iter()
            .map(|(source, count)| {
                serde_json::json!({
                    "id": source.id,
                    "libraryId": source.library_id(),
                    "documents": count,
                })
            })
            .collect();
        let view = serde_json::json!({
            "dataDir": data_dir.root().display().to_string(),
            "config": config_path.display().to_string(),
            "configFound": config_path.exists(),
            "documents": documents,
            "sources": sources,
        });
        println!("{}", serde_json::to_string_pretty(&view)?);
    } else {
        println!("Data directory: {}", data_dir.root().display());
        let found = if config_path.exists() { "" } else { " (missing, using defaults)" };
        println!("Configuration: {}{found}", config_path.display());
        println!("Sources: {}", sources.len());
        for (source, count) in &sources {
            println!("  {} [{}]: {count}", source.id, source.library_id());
        }
        println!("Documents: {documents}");
    }
    Ok(())
}

fn cmd_config_check(path: &std::path::Path) -> error::Result<()> {
    let config = RankingConfig::load(path)?;
    println!("{}: ok (version {})", path.display(), config.version);
    println!("  sources: {}", config.sources.len());
    println!("  synonyms: {}", config.synonyms.len());
    println!("  acronyms: {}", config.acronyms.len());
    println!("  contexts: {}", config.context_indicator_terms.len());
    println!("  dialect groups: {}", config.dialect_groups().len());
    Ok(())
}
