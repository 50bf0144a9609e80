//! DuoDB CLI - Main entry point for CLI binary
//!
//! This binary provides the `duodb` tool for querying, importing into and
//! serving a project's relational and graph stores.

use anyhow::{bail, Context, Result};
use clap::Parser;
use duodb_lib::engine::{
    api::{create_router, ApiState},
    cli::{formatter::CliFormatter, Cli, Commands, OutputFormat},
    database::DuoDb,
    error::StoreResult,
    import::ImportKind,
    logging,
    model::{SetupBatch, StoreStats},
    query::{QueryRequest, Target},
    relational::SqlDialect,
    search::{search_articles, SearchArticlesRequest},
    seed,
};
use serde::de::DeserializeOwned;
use std::path::Path;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    if let Err(e) = run_cli(cli).await {
        CliFormatter::error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

async fn run_cli(cli: Cli) -> Result<()> {
    let project_dir = cli.get_project_dir();
    let json = cli.format == OutputFormat::Json;
    let db = DuoDb::open_project(&project_dir)
        .with_context(|| format!("opening project at {}", project_dir.display()))?;

    // Ctrl+C cancels whatever store call is outstanding
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    match cli.command {
        Commands::Serve { port, host } => cmd_serve(db, host, port).await,
        Commands::Query { request, targets } => cmd_query(&db, &request, targets, json, &cancel).await,
        Commands::Explain { request, dialect } => cmd_explain(&db, &request, dialect, json, &cancel).await,
        Commands::Import { batch, kind, targets } => {
            cmd_import(&db, &batch, kind, targets, json, &cancel).await
        }
        Commands::Seed { targets } => cmd_seed(&db, targets, json, &cancel).await,
        Commands::Search { request } => cmd_search(&db, &request, json, &cancel).await,
        Commands::Status => cmd_status(&db, json, &cancel).await,
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn cmd_serve(db: DuoDb, host: Option<String>, port: Option<u16>) -> Result<()> {
    let host = host.unwrap_or_else(|| db.config().api.host.clone());
    let port = port.unwrap_or(db.config().api.port);
    let project = db.config().project.name.clone();
    let app = create_router(ApiState { db });

    let addr = format!("{}:{}", host, port);
    CliFormatter::header("DuoDB API Server");
    CliFormatter::kv("Project", &project);
    CliFormatter::kv("Listening", &format!("http://{}", addr));
    CliFormatter::kv("OpenAPI", &format!("http://{}/api/openapi.json", addr));
    println!("   Press Ctrl+C to stop");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    Ok(())
}

async fn cmd_query(
    db: &DuoDb,
    path: &Path,
    targets: Target,
    json: bool,
    cancel: &CancellationToken,
) -> Result<()> {
    let request: QueryRequest = read_json(path)?;
    let outcomes = db.executor().execute(&request, targets, cancel).await?;

    if json {
        return print_json(&outcomes);
    }
    for outcome in &outcomes {
        CliFormatter::outcome(outcome);
    }
    Ok(())
}

async fn cmd_explain(
    db: &DuoDb,
    path: &Path,
    dialect: SqlDialect,
    json: bool,
    cancel: &CancellationToken,
) -> Result<()> {
    let request: QueryRequest = read_json(path)?;
    let explained = db.executor().explain(&request, dialect, cancel).await?;

    if json {
        return print_json(&explained);
    }
    CliFormatter::header(&format!("Relational ({})", explained.relational.dialect));
    CliFormatter::code_block(&explained.relational.data.sql, "sql");
    CliFormatter::kv("Params", &serde_json::to_string(&explained.relational.data.params)?);
    CliFormatter::code_block(&explained.relational.count.sql, "sql");

    CliFormatter::header("Graph (Cypher)");
    CliFormatter::code_block(&explained.graph.data, "cypher");
    CliFormatter::code_block(&explained.graph.count, "cypher");
    CliFormatter::kv("Params", &serde_json::to_string(&explained.graph.params)?);
    Ok(())
}

async fn cmd_import(
    db: &DuoDb,
    path: &Path,
    kind: Option<ImportKind>,
    targets: Target,
    json: bool,
    cancel: &CancellationToken,
) -> Result<()> {
    let batch = match kind {
        None => read_json::<SetupBatch>(path)?,
        Some(ImportKind::Articles) => SetupBatch {
            articles: read_json(path)?,
            ..Default::default()
        },
        Some(ImportKind::Users) => SetupBatch {
            users: read_json(path)?,
            ..Default::default()
        },
        Some(ImportKind::SocialGraph) => SetupBatch {
            follows: read_json(path)?,
            ..Default::default()
        },
        Some(ImportKind::Orders) => SetupBatch {
            orders: read_json(path)?,
            ..Default::default()
        },
    };
    if batch.is_empty() {
        bail!("{} contains no rows", path.display());
    }

    let report = db.importer().import(&batch, targets, cancel).await;
    if json {
        return print_json(&report);
    }
    CliFormatter::import_report(&report);
    Ok(())
}

async fn cmd_seed(db: &DuoDb, targets: Target, json: bool, cancel: &CancellationToken) -> Result<()> {
    let report = db.importer().import(&seed::dataset(), targets, cancel).await;
    if json {
        return print_json(&report);
    }
    CliFormatter::import_report(&report);
    CliFormatter::success("Deterministic dataset loaded");
    Ok(())
}

async fn cmd_search(db: &DuoDb, path: &Path, json: bool, cancel: &CancellationToken) -> Result<()> {
    let request: SearchArticlesRequest = read_json(path)?;
    let page = search_articles(db.sqlite(), &request, cancel).await?;

    if json {
        return print_json(&page);
    }
    CliFormatter::header("Articles");
    CliFormatter::kv(
        "Page",
        &format!("{}/{} ({} total)", page.page, page.total_pages, page.total_count),
    );
    CliFormatter::table_header(&["Id", "Name", "Price", "Sellers"]);
    for hit in &page.items {
        let sellers = hit
            .sellers
            .as_ref()
            .map(|s| s.iter().map(|u| u.user_name.as_str()).collect::<Vec<_>>().join(", "))
            .unwrap_or_default();
        CliFormatter::table_row(&[
            hit.id.to_string(),
            hit.name.clone(),
            format!("{:.2}", hit.price),
            sellers,
        ]);
    }
    Ok(())
}

async fn cmd_status(db: &DuoDb, json: bool, cancel: &CancellationToken) -> Result<()> {
    let (relational, graph) = db.stats(cancel).await;

    if json {
        let side = |r: &StoreResult<StoreStats>| match r {
            Ok(stats) => serde_json::json!({ "status": "ok", "stats": stats }),
            Err(e) => serde_json::json!({ "status": "error", "error": { "kind": e.kind(), "message": e.to_string() } }),
        };
        return print_json(&serde_json::json!({
            "project": db.config().project.name,
            "relational": side(&relational),
            "graph": side(&graph),
        }));
    }

    CliFormatter::header("DuoDB Project Status");
    CliFormatter::kv("Project", &db.config().project.name);
    CliFormatter::kv("Directory", &db.project_dir().display().to_string());
    CliFormatter::kv("Relational", &db.sqlite().path().display().to_string());
    match relational {
        Ok(stats) => CliFormatter::stats("Relational store", &stats),
        Err(e) => CliFormatter::error(&format!("relational store: {}", e)),
    }
    match graph {
        Ok(stats) => CliFormatter::stats("Graph store", &stats),
        Err(e) => CliFormatter::error(&format!("graph store: {}", e)),
    }
    Ok(())
}
