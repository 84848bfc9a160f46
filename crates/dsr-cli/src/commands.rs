use std::io::Write;
use std::sync::Arc;

use anyhow::{bail, Context};
use colored::Colorize;
use dsr_backend::{LogBackend, LogConfig, SyncMode};
use dsr_client::RemoteStore;
use dsr_server::{shutdown_signal, BackendConfig, DsrServer, ServerConfig};
use dsr_store::{ConsistencyReport, DedupStore, KvStore, StoreConfig, StoreMode};
use dsr_types::{ContentHash, Entry, QuerySpec};
use futures::StreamExt;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cli::*;

struct Ctx {
    server: String,
    format: OutputFormat,
}

impl Ctx {
    fn client(&self) -> RemoteStore {
        RemoteStore::new(self.server.clone())
    }

    fn json(&self) -> bool {
        self.format == OutputFormat::Json
    }
}

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let ctx = Ctx { server: cli.server, format: cli.format };
    match cli.command {
        Command::Serve(args) => cmd_serve(args).await,
        Command::Put(args) => cmd_put(&ctx, args).await,
        Command::Get(args) => cmd_get(&ctx, args).await,
        Command::Has(args) => cmd_has(&ctx, args).await,
        Command::Size(args) => cmd_size(&ctx, args).await,
        Command::Delete(args) => cmd_delete(&ctx, args).await,
        Command::Query(args) => cmd_query(&ctx, args).await,
        Command::Verify(args) => cmd_verify(&ctx, args).await,
        Command::Compact(args) => cmd_compact(&ctx, args),
    }
}

/// Configuration file (or defaults) with command-line overrides applied.
fn server_config(args: &ServeArgs) -> anyhow::Result<ServerConfig> {
    let mut config = match &args.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }

    let backend = args.backend.or(args.path.as_ref().map(|_| BackendKind::Log));
    match backend {
        Some(BackendKind::Memory) => {
            if args.path.is_some() {
                bail!("--path only applies to the log backend");
            }
            config.backend = BackendConfig::Memory;
        }
        Some(BackendKind::Log) => {
            let (current_path, sync_mode) = match &config.backend {
                BackendConfig::Log { path, sync_mode } => (Some(path.clone()), *sync_mode),
                BackendConfig::Memory => (None, SyncMode::default()),
            };
            let Some(path) = args.path.clone().or(current_path) else {
                bail!("the log backend needs --path");
            };
            config.backend = BackendConfig::Log { path, sync_mode };
        }
        None => {}
    }

    if let Some(mode) = args.mode {
        config.store.mode = match mode {
            ModeArg::Dedup => StoreMode::Dedup,
            ModeArg::PassThrough => StoreMode::PassThrough,
        };
    }
    config.validate()?;
    Ok(config)
}

async fn cmd_serve(args: ServeArgs) -> anyhow::Result<()> {
    let config = server_config(&args)?;
    let server = DsrServer::open(config)?;
    let token = server.shutdown_token();
    tokio::spawn(async move {
        shutdown_signal().await;
        token.cancel();
    });
    server.serve().await?;
    info!("bye");
    Ok(())
}

async fn cmd_put(ctx: &Ctx, args: PutArgs) -> anyhow::Result<()> {
    let value = match (&args.value, &args.file) {
        (Some(value), _) => value.as_bytes().to_vec(),
        (None, Some(path)) => {
            std::fs::read(path).with_context(|| format!("reading {}", path.display()))?
        }
        (None, None) => bail!("a value or --file is required"),
    };
    let size = value.len();
    ctx.client().put(&args.key, &value).await?;

    if ctx.json() {
        println!("{}", json!({ "key": args.key, "size": size }));
    } else {
        println!("{} Stored {} ({} bytes)", "✓".green().bold(), args.key.bold(), size);
    }
    Ok(())
}

async fn cmd_get(ctx: &Ctx, args: GetArgs) -> anyhow::Result<()> {
    let value = ctx.client().get(&args.key).await?;
    if let Some(out) = &args.out {
        std::fs::write(out, &value).with_context(|| format!("writing {}", out.display()))?;
        if !ctx.json() {
            println!("{} Wrote {} bytes to {}", "✓".green().bold(), value.len(), out.display());
            return Ok(());
        }
    }

    if ctx.json() {
        println!(
            "{}",
            json!({
                "key": args.key,
                "size": value.len(),
                "value": String::from_utf8_lossy(&value),
            })
        );
    } else if args.out.is_none() {
        let mut stdout = std::io::stdout().lock();
        stdout.write_all(&value)?;
        stdout.flush()?;
    }
    Ok(())
}

async fn cmd_has(ctx: &Ctx, args: KeyArgs) -> anyhow::Result<()> {
    let found = ctx.client().has(&args.key).await?;
    if ctx.json() {
        println!("{}", json!({ "key": args.key, "found": found }));
    } else if found {
        println!("{} {}", args.key.bold(), "present".green());
    } else {
        println!("{} {}", args.key.bold(), "absent".yellow());
    }
    Ok(())
}

async fn cmd_size(ctx: &Ctx, args: KeyArgs) -> anyhow::Result<()> {
    let size = ctx.client().get_size(&args.key).await?;
    if ctx.json() {
        println!("{}", json!({ "key": args.key, "size": size }));
    } else {
        println!("{}", size);
    }
    Ok(())
}

async fn cmd_delete(ctx: &Ctx, args: KeyArgs) -> anyhow::Result<()> {
    let existed = ctx.client().delete(&args.key).await?;
    if ctx.json() {
        println!("{}", json!({ "key": args.key, "deleted": existed }));
    } else if existed {
        println!("{} Deleted {}", "✓".green().bold(), args.key.bold());
    } else {
        println!("{} not present", args.key.bold());
    }
    Ok(())
}

fn query_spec(args: &QueryArgs) -> QuerySpec {
    let mut spec = QuerySpec::with_prefix(args.prefix.clone())
        .offset(args.offset)
        .limit(args.limit);
    if args.keys_only {
        spec = spec.keys_only();
    }
    if args.ignore_case {
        spec = spec.case_insensitive();
    }
    spec
}

fn print_entry(ctx: &Ctx, entry: &Entry) {
    if ctx.json() {
        let value = entry.value.as_deref().map(String::from_utf8_lossy);
        println!("{}", json!({ "key": entry.key, "size": entry.size, "value": value }));
        return;
    }
    match &entry.value {
        Some(value) => println!("{}  {}", entry.key.bold(), String::from_utf8_lossy(value)),
        None => println!("{}  {}", entry.key.bold(), format!("{} bytes", entry.size).dimmed()),
    }
}

async fn cmd_query(ctx: &Ctx, args: QueryArgs) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            cancel.cancel();
        })
    };

    let mut entries = ctx.client().query(query_spec(&args), cancel).await?;
    let mut count = 0u64;
    let outcome = loop {
        match entries.next().await {
            Some(Ok(entry)) => {
                print_entry(ctx, &entry);
                count += 1;
            }
            Some(Err(err)) => break Err(err),
            None => break Ok(()),
        }
    };
    watcher.abort();
    outcome?;

    if !ctx.json() {
        println!("{}", format!("{count} entries").dimmed());
    }
    Ok(())
}

fn print_report(ctx: &Ctx, report: &ConsistencyReport) {
    if ctx.json() {
        let mismatches: Vec<_> = report
            .mismatches
            .iter()
            .map(|m| json!({ "hash": m.hash.to_string(), "stored": m.stored, "actual": m.actual }))
            .collect();
        let hashes = |v: &Vec<ContentHash>| -> Vec<String> { v.iter().map(ToString::to_string).collect() };
        println!(
            "{}",
            json!({
                "clean": report.is_clean(),
                "references": report.references,
                "blocks": report.blocks,
                "dangling": report.dangling,
                "orphans": hashes(&report.orphans),
                "mismatches": mismatches,
                "corrupt": hashes(&report.corrupt),
            })
        );
        return;
    }

    println!("  References: {}", report.references.to_string().bold());
    println!("  Blocks: {}", report.blocks.to_string().bold());
    for key in &report.dangling {
        println!("  {} {} targets a missing block", "dangling:".red(), key);
    }
    for hash in &report.orphans {
        println!("  {} {}", "orphan:".yellow(), hash);
    }
    for m in &report.mismatches {
        println!(
            "  {} {} stored {} actual {}",
            "mismatch:".red(),
            m.hash,
            m.stored,
            m.actual
        );
    }
    for hash in &report.corrupt {
        println!("  {} {}", "corrupt:".red(), hash);
    }
    if report.is_clean() {
        println!("{} Reference counts consistent", "✓".green().bold());
    }
}

async fn cmd_verify(ctx: &Ctx, args: VerifyArgs) -> anyhow::Result<()> {
    let store_config = match &args.config {
        Some(path) => ServerConfig::load(path)?.store,
        None => StoreConfig::default(),
    };
    if store_config.mode != StoreMode::Dedup {
        bail!("verify only applies to dedup stores");
    }

    let backend = LogBackend::open(&args.path, LogConfig::default())
        .with_context(|| format!("opening {}", args.path.display()))?;
    let store = DedupStore::new(Arc::new(backend), &store_config);
    let report = store.verify().await?;
    print_report(ctx, &report);

    if !report.is_clean() {
        bail!("store at {} is inconsistent", args.path.display());
    }
    Ok(())
}

fn cmd_compact(ctx: &Ctx, args: CompactArgs) -> anyhow::Result<()> {
    let backend = LogBackend::open(&args.path, LogConfig::default())
        .with_context(|| format!("opening {}", args.path.display()))?;
    let stats = backend.compact()?;
    if ctx.json() {
        println!(
            "{}",
            json!({
                "bytes_before": stats.bytes_before,
                "bytes_after": stats.bytes_after,
                "live_keys": stats.live_keys,
            })
        );
    } else {
        println!(
            "{} Compacted {}: {} -> {} bytes, {} live keys",
            "✓".green().bold(),
            args.path.display(),
            stats.bytes_before,
            stats.bytes_after,
            stats.live_keys
        );
    }
    Ok(())
}
