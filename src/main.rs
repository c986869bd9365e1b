use std::{
    io::{BufRead, Write},
    path::Path,
};

use clap::Parser;
use hydrag::{
    RagConfig,
    RagContext,
    chunking::ChunkingConfig,
    citations::reconcile_generation,
    data_dir::DataDir,
    error::{self, Error},
    evaluator::comparisons_to_markdown,
    hyde::{Conversation, RetrievalMode},
    ingestion::{IngestPolicy, IngestReport, ingest_files},
    preamble::Language,
    report::{Report, ReportEntry},
    walker,
};
use kdam::{BarExt, tqdm};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{
    AskArgs,
    BatchArgs,
    ChatArgs,
    Cli,
    CollectionAction,
    Command,
    CompareArgs,
    IngestArgs,
    QueryOptions,
    SearchArgs,
};

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("HYDRAG_LOG") {
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
    let config_path = cli.config.unwrap_or_else(|| data_dir.config_file());
    let mut config = RagConfig::load(&config_path)?;

    match cli.command {
        Command::Collection { action } => {
            let ctx = RagContext::init(config, data_dir)?;
            collection(&ctx, action)?;
        }
        Command::Ingest(args) => {
            if args.chunk_size.is_some() || args.chunk_overlap.is_some() {
                config.chunking = ChunkingConfig::new(
                    args.chunk_size.unwrap_or(config.chunking.chunk_size),
                    args.chunk_overlap.unwrap_or(config.chunking.chunk_overlap),
                )?;
            }
            let ctx = RagContext::init(config, data_dir)?;
            cmd_ingest(&ctx, &args)?;
        }
        Command::Search(args) => {
            config.retrieval.rerank |= args.rerank;
            let ctx = RagContext::init(config, data_dir)?;
            cmd_search(&ctx, &args)?;
        }
        Command::Ask(args) => {
            config.retrieval.rerank |= args.options.rerank;
            config.decoding.streaming |= args.stream;
            let ctx = RagContext::init(config, data_dir)?;
            cmd_ask(&ctx, &args)?;
        }
        Command::Chat(args) => {
            config.retrieval.rerank |= args.options.rerank;
            let ctx = RagContext::init(config, data_dir)?;
            cmd_chat(&ctx, &args)?;
        }
        Command::Batch(args) => {
            config.retrieval.rerank |= args.options.rerank;
            let ctx = RagContext::init(config, data_dir)?;
            cmd_batch(&ctx, &args)?;
        }
        Command::Compare(args) => {
            let ctx = RagContext::init(config, data_dir)?;
            cmd_compare(&ctx, &args)?;
        }
        Command::Completions(_) => {}
    }

    Ok(())
}

fn collection_name<'a>(
    ctx: &'a RagContext,
    explicit: &'a Option<String>,
) -> &'a str {
    explicit
        .as_deref()
        .unwrap_or(&ctx.config().default_collection)
}

fn resolve_query(
    ctx: &RagContext,
    options: &QueryOptions,
) -> (RetrievalMode, Language) {
    (
        options.mode.into(),
        options.lang.unwrap_or(ctx.config().language),
    )
}

fn collection(
    ctx: &RagContext,
    action: CollectionAction,
) -> error::Result<()> {
    let store = ctx.store();
    match action {
        CollectionAction::List { json } => {
            let names = store.list_collections()?;
            if json {
                let mut rows = Vec::with_capacity(names.len());
                for name in &names {
                    rows.push(serde_json::json!({
                        "name": name,
                        "chunks": store.chunk_count(name, None)?,
                        "sources": store.list_sources(name)?.len(),
                    }));
                }
                println!("{}", serde_json::to_string(&rows)?);
            } else if names.is_empty() {
                println!("No collections.");
            } else {
                for name in &names {
                    println!(
                        "{name}\t{} documents\t{} chunks",
                        store.list_sources(name)?.len(),
                        store.chunk_count(name, None)?
                    );
                }
            }
        }
        CollectionAction::Sources { name, json } => {
            if !store.exists(&name)? {
                return Err(Error::NotFound {
                    kind: "collection",
                    name,
                });
            }
            let sources = store.list_sources(&name)?;
            if json {
                println!("{}", serde_json::to_string(&sources)?);
            } else {
                for source in &sources {
                    println!("{source}");
                }
            }
        }
        CollectionAction::Delete { name, sources } => {
            let removed = store.delete_sources(&name, &sources)?;
            println!("Removed {removed} chunks from '{name}'.");
        }
        CollectionAction::Drop { name } => {
            if store.drop_collection(&name)? {
                println!("Dropped collection '{name}'.");
            } else {
                return Err(Error::NotFound {
                    kind: "collection",
                    name,
                });
            }
        }
    }
    Ok(())
}

fn cmd_ingest(ctx: &RagContext, args: &IngestArgs) -> error::Result<()> {
    let name = collection_name(ctx, &args.collection);
    let filter = walker::build_filter(&args.globs)?;

    let mut files = Vec::new();
    for path in &args.paths {
        if !path.exists() {
            return Err(Error::Config(format!(
                "path does not exist: {}",
                path.display()
            )));
        }
        files.extend(walker::discover(path, filter.as_ref())?);
    }
    if files.is_empty() {
        warn!("no supported documents found");
        return Ok(());
    }
    info!(collection = name, files = files.len(), "loading documents");

    let policy = if args.new_only {
        IngestPolicy::NewOnly
    } else {
        IngestPolicy::AppendOrCreate
    };
    let report = ingest_files(
        ctx.store(),
        ctx.embedder(),
        name,
        &files,
        &ctx.config().chunking,
        policy,
    )?;

    if args.json {
        println!("{}", serde_json::to_string(&report)?);
    } else {
        print_ingest_report(&report);
    }
    Ok(())
}

fn print_ingest_report(report: &IngestReport) {
    println!(
        "{}: {} loaded ({} chunks), {} already present, {} empty, {} failed",
        report.collection,
        report.loaded.len(),
        report.chunks,
        report.skipped.len(),
        report.empty.len(),
        report.failed.len()
    );
    for (source, reason) in &report.failed {
        println!("  failed {source}: {reason}");
    }
}

fn cmd_search(ctx: &RagContext, args: &SearchArgs) -> error::Result<()> {
    let name = collection_name(ctx, &args.collection);
    let count = args
        .count
        .map_or(ctx.config().retrieval.top_k, |n| n as usize);

    let retriever = ctx.retriever_with_top_k(name, count)?;
    let hits = retriever.search(&args.query, count)?;

    if args.json {
        let rows: Vec<_> = hits
            .iter()
            .map(|hit| {
                serde_json::json!({
                    "score": hit.score,
                    "source": hit.chunk.source,
                    "page": hit.chunk.page,
                    "text": hit.chunk.text,
                })
            })
            .collect();
        println!("{}", serde_json::to_string(&rows)?);
    } else {
        for (i, hit) in hits.iter().enumerate() {
            println!(
                "{}. {} p.{} (score: {:.3})",
                i + 1,
                hit.chunk.source,
                hit.chunk.page,
                hit.score
            );
            println!("   {}", hit.chunk.text.replace('\n', " "));
        }
    }
    Ok(())
}

fn cmd_ask(ctx: &RagContext, args: &AskArgs) -> error::Result<()> {
    let name = collection_name(ctx, &args.options.collection);
    let (mode, language) = resolve_query(ctx, &args.options);
    let pipeline = ctx.pipeline(name)?;

    let outcome = pipeline.answer(&args.query, mode, language)?;
    let reconciled =
        reconcile_generation(outcome.generation.as_ref(), &outcome.references);

    if args.json {
        let json = serde_json::json!({
            "outcome": outcome,
            "reconciled": reconciled,
        });
        println!("{}", serde_json::to_string_pretty(&json)?);
        return Ok(());
    }

    match (reconciled, &outcome.generation) {
        (Some(answer), _) => println!("{}", answer.annotated_text),
        (None, Some(generation)) => println!("{}", generation.text),
        (None, None) => error!("no answer was generated"),
    }
    Ok(())
}

fn cmd_chat(ctx: &RagContext, args: &ChatArgs) -> error::Result<()> {
    let name = collection_name(ctx, &args.options.collection);
    let (mode, language) = resolve_query(ctx, &args.options);
    let pipeline = ctx.pipeline(name)?;
    let mut conversation = Conversation::new(args.max_turns);

    let stdin = std::io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        eprint!("> ");
        std::io::stderr().flush()?;
        let Some(line) = lines.next() else {
            break;
        };
        let question = line?;
        let question = question.trim();
        if question.is_empty() {
            continue;
        }

        let outcome = match pipeline.converse(
            question,
            conversation.turns(),
            mode,
            language,
        ) {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(question, error = %e, "question failed");
                continue;
            }
        };
        let Some(generation) = &outcome.generation else {
            error!("no answer was generated");
            continue;
        };
        match reconcile_generation(Some(generation), &outcome.references) {
            Some(answer) => println!("{}\n", answer.annotated_text),
            None => println!("{}\n", generation.text),
        }
        conversation.record(question, &generation.text);
    }
    Ok(())
}

fn read_questions(path: &Path) -> error::Result<Vec<String>> {
    let contents = std::fs::read_to_string(path)?;
    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
        .collect())
}

fn cmd_batch(ctx: &RagContext, args: &BatchArgs) -> error::Result<()> {
    let name = collection_name(ctx, &args.options.collection);
    let (mode, language) = resolve_query(ctx, &args.options);
    let questions = read_questions(&args.questions)?;
    if questions.is_empty() {
        warn!(path = %args.questions.display(), "no questions found");
        return Ok(());
    }

    let pipeline = ctx.pipeline(name)?;
    let mut report = Report::new(name, mode, language);

    let mut pb = tqdm!(total = questions.len(), desc = "answering");
    for question in &questions {
        let entry = match pipeline.answer(question, mode, language) {
            Ok(outcome) => ReportEntry::answered(question, &outcome),
            Err(e) => {
                error!(question = %question, error = %e, "question failed");
                ReportEntry::failed(question, &e)
            }
        };
        report.entries.push(entry);
        pb.update(1)?;
    }
    eprintln!();

    let dir = match &args.output {
        Some(dir) => dir.clone(),
        None => ctx.data_dir().reports_dir()?,
    };
    let (markdown, json) = report.write(&dir, &args.name)?;
    info!(
        answered = report.answered(),
        questions = report.entries.len(),
        markdown = %markdown.display(),
        json = %json.display(),
        "report written"
    );
    Ok(())
}

fn cmd_compare(ctx: &RagContext, args: &CompareArgs) -> error::Result<()> {
    let first = Report::load(&args.first)?;
    let second = Report::load(&args.second)?;
    let name = args
        .collection
        .as_deref()
        .unwrap_or(first.collection.as_str());

    let judge = ctx.judge(name)?;
    let comparisons = judge.compare_reports(&first, &second)?;
    let markdown = comparisons_to_markdown(&comparisons);

    match &args.output {
        Some(path) => {
            std::fs::write(path, markdown)?;
            info!(path = %path.display(), "comparison written");
        }
        None => print!("{markdown}"),
    }
    Ok(())
}
