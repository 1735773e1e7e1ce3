use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use logspan_core::engine::{LogsQuery, TimeRange};
use logspan_core::storage::TraceQueryParameters;
use logspan_core::trace::Span;
use logspan_storage::query::trace_ids_query;
use logspan_storage::search::SearchWindows;
use logspan_storage::{EncodedSpan, ReaderConfig, decode_span, encode_span};
use tracing::info;

// ─────────────────────────────────────────────────────────────────────────────
// CLI
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "logspan",
    about = "Jaeger spans stored as log rows: codec and query tooling",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Encode a span JSON document into log row fields.
    Encode {
        /// Span document to read; stdin when omitted.
        #[arg(short, long, value_name = "PATH")]
        input: Option<PathBuf>,
    },
    /// Decode the output of `encode` back into a span.
    Decode {
        /// Encoded row document to read; stdin when omitted.
        #[arg(short, long, value_name = "PATH")]
        input: Option<PathBuf>,
    },
    /// Print the log query used to search for trace IDs.
    Query(QueryArgs),
}

#[derive(Debug, Args)]
struct QueryArgs {
    #[arg(short, long, default_value = "")]
    service: String,

    #[arg(short, long, default_value = "")]
    operation: String,

    /// Span tag filter, repeatable.
    #[arg(short, long = "tag", value_name = "KEY=VALUE", value_parser = parse_tag)]
    tags: Vec<(String, String)>,

    #[arg(long, value_name = "MS")]
    duration_min_ms: Option<u64>,

    #[arg(long, value_name = "MS")]
    duration_max_ms: Option<u64>,

    /// How far back from now the search reaches.
    #[arg(long, default_value = "60", value_name = "MINUTES")]
    lookback_mins: u64,

    /// Number of traces to find; 0 uses the configured default.
    #[arg(short, long, default_value = "0")]
    limit: usize,

    /// Reader configuration (JSON).
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Print every query the widening search would run, with time ranges.
    #[arg(long)]
    explain: bool,
}

fn parse_tag(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got `{raw}`")),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────────────

fn read_input(path: Option<&Path>) -> anyhow::Result<String> {
    match path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display())),
        None => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("failed to read stdin")?;
            Ok(text)
        }
    }
}

fn encode_document(text: &str) -> anyhow::Result<String> {
    let span: Span = serde_json::from_str(text).context("invalid span document")?;
    let encoded = encode_span(&span)?;
    info!(
        trace_id = %span.trace_id,
        span_id = %span.span_id,
        fields = encoded.fields.len(),
        "encoded span"
    );
    Ok(serde_json::to_string_pretty(&encoded)?)
}

fn decode_document(text: &str) -> anyhow::Result<String> {
    let encoded: EncodedSpan = serde_json::from_str(text).context("invalid encoded row document")?;
    let span = decode_span(&encoded.fields)?;
    info!(trace_id = %span.trace_id, span_id = %span.span_id, "decoded span");
    Ok(serde_json::to_string_pretty(&span)?)
}

fn load_config(path: Option<&Path>) -> anyhow::Result<ReaderConfig> {
    let Some(path) = path else {
        return Ok(ReaderConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("invalid config {}", path.display()))
}

fn query_params(args: &QueryArgs, config: &ReaderConfig, now: SystemTime) -> TraceQueryParameters {
    let lookback = Duration::from_secs(args.lookback_mins.saturating_mul(60));
    let mut params = TraceQueryParameters::new(now.checked_sub(lookback).unwrap_or(UNIX_EPOCH), now);
    params.service_name = args.service.clone();
    params.operation_name = args.operation.clone();
    params.tags = args.tags.iter().cloned().collect();
    params.duration_min = args.duration_min_ms.map(Duration::from_millis);
    params.duration_max = args.duration_max_ms.map(Duration::from_millis);
    params.num_traces = if args.limit == 0 {
        config.default_num_traces
    } else {
        args.limit
    };
    params
}

/// The translated trace-ID query, or with `explain` the full text of every
/// window query followed by the exact-range query.
fn render_queries(args: &QueryArgs, config: &ReaderConfig, now: SystemTime) -> anyhow::Result<Vec<String>> {
    let params = query_params(args, config, now);
    params.validate()?;
    let text = trace_ids_query(&params);
    if !args.explain {
        return Ok(vec![text]);
    }

    let query = LogsQuery::parse(&text)?;
    let range = TimeRange::between(params.start_time_min, params.start_time_max);
    let limit = params.num_traces as u64;
    Ok(SearchWindows::new(range, config.search)
        .chain(std::iter::once(range))
        .map(|window| query.clone().with_time_range(window).with_limit(limit).to_string())
        .collect())
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("logspan=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Encode { input } => {
            println!("{}", encode_document(&read_input(input.as_deref())?)?);
        }
        Command::Decode { input } => {
            println!("{}", decode_document(&read_input(input.as_deref())?)?);
        }
        Command::Query(args) => {
            let config = load_config(args.config.as_deref())?;
            info!(tenant = %config.tenant, explain = args.explain, "rendering trace id query");
            for query in render_queries(&args, &config, SystemTime::now())? {
                println!("{query}");
            }
        }
    }

    Ok(())
}
