//! Command line arguments

use std::path::PathBuf;

use clap::Parser;

/// RCode: agentic task execution engine
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Bind host override
    #[arg(long)]
    pub host: Option<String>,

    /// Bind port override
    #[arg(long)]
    pub port: Option<u16>,

    /// Project root override for new sessions
    #[arg(long)]
    pub project_root: Option<PathBuf>,

    /// Model identifier override
    #[arg(long)]
    pub model: Option<String>,

    /// Stream model responses to subscribers
    #[arg(long)]
    pub streaming: bool,
}

impl Args {
    /// Fold CLI overrides into a loaded config
    pub fn apply_to(&self, config: &mut rcode_core::Config) {
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(root) = &self.project_root {
            config.project_root = root.clone();
        }
        if let Some(model) = &self.model {
            config.model = model.clone();
        }
        if self.streaming {
            config.streaming = true;
        }
    }
}
