//! Virtual Fields CLI
//!
//! Command-line interface for checking field manifests and resolving them on
//! batches of content items.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde_json::{json, Map, Value};
use tracing::debug;
use tracing_subscriber::EnvFilter;
use virtual_fields::{
    load_items, load_manifest, ContentItem, Coordinator, MemoryHost, QueryContext,
    ResolutionContext, ResolveError, Surface, SurfaceOutput, SurfaceRequest,
};

/// Environment variable holding the log filter (e.g. `debug`).
const LOG_ENV: &str = "VIRTUAL_FIELDS_LOG";

#[derive(Parser)]
#[command(name = "virtual-fields")]
#[command(about = "Resolve read-time computed fields on content items")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve a manifest's fields on a batch of content items
    Resolve {
        /// Items source: file path or URL (http:// or https://) holding a JSON array
        items: String,

        /// Field manifest: file path or URL
        #[arg(long, short)]
        manifest: String,

        /// Output surface: core, rest, rest_revisions or acf
        #[arg(long, short, default_value = "core", value_parser = parse_surface)]
        surface: Surface,

        /// Content type the query asked for (core surface only)
        #[arg(long = "type")]
        content_type: Option<String>,

        /// Treat the query as a secondary query (core surface only)
        #[arg(long)]
        nested: bool,

        /// Output file (stdout if not specified)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Pretty-print JSON output
        #[arg(long)]
        pretty: bool,
    },

    /// Validate a field manifest and list its registrations
    Check {
        /// Field manifest: file path or URL
        manifest: String,

        /// Output the field table as JSON
        #[arg(long)]
        json: bool,
    },
}

fn parse_surface(tag: &str) -> Result<Surface, String> {
    Surface::parse(tag).ok_or_else(|| {
        format!(
            "unknown surface \"{}\", expected one of: {}",
            tag,
            Surface::ALLOWED_TAGS.join(", ")
        )
    })
}

fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Resolve {
            items,
            manifest,
            surface,
            content_type,
            nested,
            output,
            pretty,
        } => {
            let query = match content_type {
                Some(t) => QueryContext::new(t),
                None => QueryContext::any(),
            }
            .nested(nested);
            run_resolve(&items, &manifest, surface, &query, output, pretty)
        }
        Commands::Check { manifest, json } => run_check(&manifest, json),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => ExitCode::from(code),
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run_resolve(
    items_source: &str,
    manifest_source: &str,
    surface: Surface,
    query: &QueryContext,
    output: Option<PathBuf>,
    pretty: bool,
) -> Result<(), u8> {
    let coordinator = load_manifest(manifest_source).map_err(|e| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })?;

    let items = load_items(items_source).map_err(|e| {
        eprintln!("Error loading items: {}", e);
        e.exit_code() as u8
    })?;
    debug!(items = items.len(), %surface, "resolving");

    // The batch doubles as the host's content store.
    let host = MemoryHost::from_items(items.iter().cloned());
    let mut ctx = coordinator.context(&host);

    let resolved = resolve_surface(&coordinator, &items, surface, query, &mut ctx).map_err(|e| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })?;

    let json_output = if pretty {
        serde_json::to_string_pretty(&resolved)
    } else {
        serde_json::to_string(&resolved)
    }
    .map_err(|e| {
        eprintln!("Error serializing output: {}", e);
        2u8
    })?;

    match output {
        Some(path) => {
            std::fs::write(&path, &json_output).map_err(|e| {
                eprintln!("Error writing to {}: {}", path.display(), e);
                3u8
            })?;
        }
        None => {
            println!("{}", json_output);
        }
    }

    Ok(())
}

fn resolve_surface(
    coordinator: &Coordinator,
    items: &[ContentItem],
    surface: Surface,
    query: &QueryContext,
    ctx: &mut ResolutionContext<'_>,
) -> Result<Value, ResolveError> {
    match surface {
        Surface::BatchQuery => {
            let request = SurfaceRequest::BatchQuery { items, query };
            Ok(output_value(coordinator.resolve(request, ctx)?))
        }
        Surface::FieldAccessor => {
            let accessors = coordinator.accessors();
            let mut responses = Vec::with_capacity(items.len());
            for item in items {
                let raw = item.to_value();
                let mut response = response_map(item);
                for accessor in accessors
                    .iter()
                    .filter(|a| a.content_types().contains(&item.item_type))
                {
                    let request = SurfaceRequest::FieldAccessor {
                        content_type: &item.item_type,
                        field: accessor.name(),
                        item: &raw,
                    };
                    let value = output_value(coordinator.resolve(request, ctx)?);
                    response.insert(accessor.name().to_string(), value);
                }
                responses.push(Value::Object(response));
            }
            Ok(Value::Array(responses))
        }
        Surface::Revision => {
            let mut responses = Vec::new();
            for revision in items.iter().filter(|item| item.parent_id().is_some()) {
                let request = SurfaceRequest::Revision {
                    response: response_map(revision),
                    revision,
                };
                responses.push(output_value(coordinator.resolve(request, ctx)?));
            }
            Ok(Value::Array(responses))
        }
        Surface::ExternalProjection => {
            let records = Value::Array(items.iter().map(ContentItem::to_value).collect());
            let request = SurfaceRequest::ExternalProjection { records };
            Ok(output_value(coordinator.resolve(request, ctx)?))
        }
    }
}

fn response_map(item: &ContentItem) -> Map<String, Value> {
    match item.to_value() {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn output_value(output: SurfaceOutput) -> Value {
    match output {
        SurfaceOutput::Items(items) => Value::Array(items.iter().map(ContentItem::to_value).collect()),
        SurfaceOutput::Value(value) => value.unwrap_or(Value::Null),
        SurfaceOutput::Response(map) => Value::Object(map),
        SurfaceOutput::Records(records) => records,
    }
}

fn run_check(manifest_source: &str, json_output: bool) -> Result<(), u8> {
    let coordinator = match load_manifest(manifest_source) {
        Ok(coordinator) => coordinator,
        Err(e) => {
            if json_output {
                println!("{}", json!({ "valid": false, "error": e.to_string() }));
            } else {
                eprintln!("Error: {}", e);
                if let virtual_fields::ManifestError::Invalid { violations } = &e {
                    for violation in violations {
                        eprintln!("  {}", violation);
                    }
                }
            }
            return Err(e.exit_code() as u8);
        }
    };

    if json_output {
        let registrations: Vec<Value> = coordinator
            .registrations()
            .iter()
            .map(|r| {
                json!({
                    "content_types": r.content_types(),
                    "fields": r.fields().iter().map(|f| f.settings()).collect::<Vec<_>>(),
                })
            })
            .collect();
        println!(
            "{}",
            json!({ "valid": true, "registrations": registrations })
        );
        return Ok(());
    }

    for registration in coordinator.registrations() {
        println!("{}", registration.content_types().join(", "));
        for field in registration.fields() {
            let settings = field.settings();
            let excluded: Vec<&str> = settings.excluded_from.iter().map(Surface::tag).collect();
            println!(
                "  {:<24} {:<9} depth {:<3} excluded: {}",
                settings.name,
                settings.source,
                settings.max_recursive_depth,
                if excluded.is_empty() {
                    "-".to_string()
                } else {
                    excluded.join(", ")
                }
            );
        }
    }
    println!("Valid");

    Ok(())
}
