use std::path::PathBuf;

use clap::Parser;

use crate::config::EditorConfig;

#[derive(Parser, Debug)]
#[command(name = "site-preview")]
#[command(version)]
#[command(about = "Sandboxed live-preview editor for scraped page snapshots")]
pub struct Args {
    /// Snapshot JSON file ({html, css, structureMetadata, targetableElements})
    pub snapshot: Option<PathBuf>,

    /// Print the compiled, instrumented document and exit
    #[arg(long, conflicts_with_all = ["edits", "web"])]
    pub compile_only: bool,

    /// Replay a JSON list of {instanceId, prompt, modifications} edits and print
    /// the synthesized code
    #[arg(long, value_name = "FILE", conflicts_with = "web")]
    pub edits: Option<PathBuf>,

    /// Write output to a file instead of stdout
    #[arg(long, short, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Serve the browser editor instead of running offline
    #[arg(long)]
    pub web: bool,

    /// Port for the editor server (overrides config and environment)
    #[arg(long)]
    pub port: Option<u16>,

    /// TOML config file
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Translator endpoint URL (overrides config and environment)
    #[arg(long, value_name = "URL")]
    pub translator_url: Option<String>,
}

impl Args {
    /// Layer command-line overrides on top of `config`.
    pub fn apply_to(&self, config: &mut EditorConfig) {
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(url) = self.translator_url.as_deref().filter(|u| !u.trim().is_empty()) {
            config.translator.endpoint = Some(url.to_string());
        }
    }

    /// Offline modes need a snapshot file; `--web` can start without one.
    pub fn requires_snapshot(&self) -> bool {
        !self.web
    }
}
