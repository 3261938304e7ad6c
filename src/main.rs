use std::sync::Arc;

use clap::Parser;
use pagebert::{
    ConfigDb, DataDir, EmbeddingDb, Error, Filters, Result, SearchConfig,
    SearchEngine, SearchRequest, SearchResponse,
    embedder::{HashingEmbedder, QueryEmbedder},
    ingestion,
    item::ItemKind,
    model_manager::{ColbertEmbedder, ModelManager, resolve_model_id},
    text_util::{DEFAULT_PREVIEW_MAX_CHARS, truncate_preview},
};
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{Cli, Command, ConfigAction, EmbedderArg};

/// Seed for `--embedder hashing`; loaders must use the same one.
const HASHING_SEED: u64 = 0;

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("PAGEBERT_LOG") {
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

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(());
    }

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let config_db = ConfigDb::open(&data_dir.config_db())?;

    match cli.command {
        Command::Search(args) => {
            cmd_search(&args, cli.model.as_deref(), &config_db, &data_dir)?;
        }
        Command::Load(args) => {
            let config = SearchConfig::load(&config_db)?;
            let db = EmbeddingDb::open(&data_dir.store_db())?;
            let codec = config.codec.build();
            let summary = ingestion::load_file(
                &args.path,
                &db,
                codec.as_ref(),
                config.dimension,
            )?;
            println!(
                "Loaded {} items ({} visual, {} text)",
                summary.total(),
                summary.visual,
                summary.text
            );
        }
        Command::Remove(args) => {
            let db = EmbeddingDb::open(&data_dir.store_db())?;
            if !db.remove(args.kind.into(), &args.id)? {
                return Err(Error::NotFound {
                    kind: "item",
                    name: args.id,
                });
            }
            println!("Removed '{}'", args.id);
        }
        Command::Status(args) => {
            cmd_status(&config_db, &data_dir, cli.model.as_deref(), args.json)?;
        }
        Command::Config { action } => match action {
            ConfigAction::Show { json } => {
                config_show(&config_db, cli.model.as_deref(), json)?;
            }
            ConfigAction::Set { key, value } => {
                // Reject values the next load would fail on.
                SearchConfig::default().apply(&key, &value)?;
                config_db.set_setting(&key, &value)?;
                println!("Set {key} = {value}");
            }
            ConfigAction::Clear { key } => {
                if !config_db.remove_setting(&key)? {
                    return Err(Error::NotFound {
                        kind: "setting",
                        name: key,
                    });
                }
                println!("Cleared {key}");
            }
        },
        Command::Completions(_) => {}
    }

    Ok(())
}

fn cmd_search(
    args: &cli::SearchArgs,
    model: Option<&str>,
    config_db: &ConfigDb,
    data_dir: &DataDir,
) -> Result<()> {
    let config = SearchConfig::load(config_db)?;
    let filters = match &args.filters {
        Some(json) => Filters::parse(json)?,
        None => Filters::default(),
    };

    let embedder: Arc<dyn QueryEmbedder> = match args.embedder {
        EmbedderArg::Colbert => {
            let model_id = resolve_model_id(model, config_db)?;
            let embedder =
                ColbertEmbedder::new(ModelManager::with_model_id(model_id));
            // Model loading must not eat into the request deadline.
            embedder.preload()?;
            Arc::new(embedder)
        }
        EmbedderArg::Hashing => {
            Arc::new(HashingEmbedder::new(config.dimension, HASHING_SEED))
        }
    };
    if !data_dir.has_store() {
        tracing::warn!(
            root = %data_dir.root().display(),
            "no items loaded yet; run `pagebert load` first"
        );
    }
    let store = Arc::new(EmbeddingDb::open(&data_dir.store_db())?);
    let engine = SearchEngine::new(config, embedder, store);

    let request = SearchRequest {
        query: args.query.clone(),
        n_results: args.count,
        search_mode: args.mode.into(),
        filters,
        enable_reranking: !args.no_rerank,
        rerank_candidates: args.rerank_candidates,
        normalization: args.normalization.map(Into::into),
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let response = runtime.block_on(engine.search(request))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        print_response(&response);
    }
    Ok(())
}

fn print_response(response: &SearchResponse) {
    if response.results.is_empty() {
        println!("No results found.");
    }

    for (i, r) in response.results.iter().enumerate() {
        let marker = if r.reranked { "" } else { " (stage 1)" };
        println!(
            "{:>3}. {} [{}] {:.4}{marker}  {}:{}",
            i + 1,
            r.id,
            r.kind,
            r.score,
            r.metadata.filename,
            r.metadata.page
        );
        if let Some(preview) = &r.metadata.text_preview {
            println!(
                "     {}",
                truncate_preview(preview, DEFAULT_PREVIEW_MAX_CHARS)
            );
        }
        if !r.highlights.is_empty() {
            println!("     matches: {}", r.highlights.join(", "));
        }
    }

    eprintln!(
        "{} result(s) from {} candidates, {} reranked, {:.1} ms \
         (stage 1 {:.1} ms, stage 2 {:.1} ms)",
        response.total_results,
        response.candidates_retrieved,
        response.reranked_count,
        response.total_time.as_secs_f64() * 1000.0,
        response.stage1_time.as_secs_f64() * 1000.0,
        response.stage2_time.as_secs_f64() * 1000.0,
    );
    if response.partial {
        eprintln!("Warning: some collections failed; results are partial.");
    }
    if response.timed_out {
        eprintln!("Warning: time budget exceeded; results are best-effort.");
    }
}

fn cmd_status(
    config_db: &ConfigDb,
    data_dir: &DataDir,
    model: Option<&str>,
    json: bool,
) -> Result<()> {
    let db = EmbeddingDb::open(&data_dir.store_db())?;
    let visual = db.count(ItemKind::Visual)?;
    let text = db.count(ItemKind::Text)?;
    let model_id = resolve_model_id(model, config_db)?;
    let config = SearchConfig::load(config_db)?;

    if json {
        let settings: serde_json::Map<String, serde_json::Value> = config
            .entries()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.into()))
            .collect();
        let status = serde_json::json!({
            "data_dir": data_dir.root().display().to_string(),
            "data_dir_source": data_dir.source().as_str(),
            "model": model_id,
            "visual": visual,
            "text": text,
            "config": settings,
        });
        println!("{status}");
    } else {
        println!(
            "Data directory: {} ({})",
            data_dir.root().display(),
            data_dir.source().as_str()
        );
        println!("Model: {model_id}");
        println!("Visual items: {visual}");
        println!("Text items: {text}");
        println!("Codec: {}", config.codec.as_str());
        println!("Dimension: {}", config.dimension);
    }
    Ok(())
}

fn config_show(
    config_db: &ConfigDb,
    model: Option<&str>,
    json: bool,
) -> Result<()> {
    let config = SearchConfig::load(config_db)?;
    let stored: std::collections::HashMap<String, String> =
        config_db.list_settings()?.into_iter().collect();

    let mut entries = config.entries();
    entries.push(("model", resolve_model_id(model, config_db)?));

    if json {
        let map: serde_json::Map<String, serde_json::Value> = entries
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.into()))
            .collect();
        println!("{}", serde_json::Value::Object(map));
    } else {
        for (key, value) in entries {
            let source = if stored.contains_key(key) {
                "stored"
            } else {
                "default"
            };
            println!("{key} = {value}\t({source})");
        }
    }
    Ok(())
}
