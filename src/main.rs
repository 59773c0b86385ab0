use std::io::{self, Write};
use std::path::Path;

use clap::Parser;
use colored::*;
use tracing_subscriber::EnvFilter;

use site_preview::cli::Args;
use site_preview::compiler::compile;
use site_preview::config::EditorConfig;
use site_preview::context::LocalContext;
use site_preview::replay::{replay, EditStep};
use site_preview::session::Session;
use site_preview::snapshot::SiteSnapshot;
use site_preview::web;

fn init_tracing(config: &EditorConfig) {
    // RUST_LOG wins over the configured filter.
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log.filter))
        .unwrap_or_else(|_| EnvFilter::new("site_preview=info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn emit(output: Option<&Path>, text: &str) -> io::Result<()> {
    match output {
        Some(path) => {
            std::fs::write(path, text)?;
            eprintln!("{}", format!("  Wrote {}", path.display()).bright_green());
            Ok(())
        }
        None => {
            let mut stdout = io::stdout().lock();
            stdout.write_all(text.as_bytes())?;
            if !text.ends_with('\n') {
                stdout.write_all(b"\n")?;
            }
            stdout.flush()
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = EditorConfig::load(args.config.as_deref())?;
    config.apply_env();
    args.apply_to(&mut config);
    init_tracing(&config);

    let snapshot = match args.snapshot.as_deref() {
        Some(path) => Some(SiteSnapshot::from_path(path)?),
        None if args.requires_snapshot() => {
            eprintln!("{}", "  A snapshot file is required (or pass --web).".red());
            std::process::exit(2);
        }
        None => None,
    };

    // Web editor mode
    if args.web {
        web::serve(&config, snapshot).await?;
        return Ok(());
    }

    let Some(snapshot) = snapshot else {
        return Ok(());
    };
    let output = args.output.as_deref();

    if args.compile_only {
        let document = compile(&snapshot, &config.editor)?;
        emit(output, document.as_str())?;
        return Ok(());
    }

    if let Some(edits) = args.edits.as_deref() {
        let steps = EditStep::load_all(edits)?;
        let report = replay(snapshot, config.editor.clone(), &steps).await?;
        eprintln!(
            "{}",
            format!("  Applied {} of {} edits", report.applied, steps.len()).bright_cyan()
        );
        for rejected in &report.rejected {
            eprintln!(
                "{}",
                format!(
                    "  skipped #{} ({}): {}",
                    rejected.index, rejected.instance_id, rejected.reason
                )
                .yellow()
            );
        }
        emit(output, &report.artifact)?;
        return Ok(());
    }

    // Default: list the editable instances the document exposes.
    let (_session, mount) = Session::open_with(snapshot.into(), config.editor.clone())?;
    let context = LocalContext::mount(mount);
    eprintln!(
        "{}",
        format!("  {} editable instances", context.bindings().len()).bright_cyan()
    );
    emit(output, &serde_json::to_string_pretty(context.bindings())?)?;
    Ok(())
}
