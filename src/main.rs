use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use export_native::{ComponentRegistry, ExportOptions, ExportRequest, Exporter, PackageTarget};

/// Turn a visual-builder page snapshot into a standalone Next.js project
#[derive(Parser, Debug)]
#[command(name = "export-native")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Export a page and write the package to a directory or a .zip file
    Export {
        #[command(flatten)]
        input: InputArgs,

        /// Output directory, or a path ending in .zip for an archive
        #[arg(short, long)]
        out: PathBuf,
    },

    /// Compile a page without writing anything and report warnings
    Check {
        #[command(flatten)]
        input: InputArgs,
    },
}

#[derive(Args, Debug)]
struct InputArgs {
    /// Export request JSON (pageState, theme, imageData, seo)
    #[arg(short, long)]
    request: PathBuf,

    /// Export options JSON
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory of *.template.json manifests overlaid on the builtin templates
    #[arg(short, long)]
    templates: Option<PathBuf>,

    /// Inline assets up to this many bytes as data URIs
    #[arg(long)]
    inline_asset_limit: Option<u64>,

    /// Package name written to package.json
    #[arg(long)]
    project_name: Option<String>,

    /// Skip the editor-leak scan of emitted modules
    #[arg(long)]
    no_verify: bool,
}

impl InputArgs {
    fn exporter(&self) -> anyhow::Result<Exporter> {
        let mut options = match &self.config {
            Some(path) => ExportOptions::from_file(path)?,
            None => ExportOptions::default(),
        };
        if let Some(limit) = self.inline_asset_limit {
            options.inline_asset_limit = limit;
        }
        if let Some(name) = &self.project_name {
            options.project_name = name.clone();
        }
        if self.no_verify {
            options.verify_output = false;
        }
        options.validate()?;

        let mut registry = ComponentRegistry::builtin();
        if let Some(dir) = &self.templates {
            let loaded = registry.load_dir(dir)?;
            tracing::info!(dir = %dir.display(), loaded, "templates loaded");
        }
        Ok(Exporter::new(registry, options))
    }

    fn request(&self) -> anyhow::Result<ExportRequest> {
        let raw = fs::read_to_string(&self.request)
            .with_context(|| format!("reading {}", self.request.display()))?;
        Ok(ExportRequest::from_json(&raw)?)
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Export { input, out } => {
            let exporter = input.exporter()?;
            let request = input.request()?;
            let target = PackageTarget::from_path(out);
            let output = exporter.export_to(&request, &target)?;
            println!(
                "exported {} files to {} ({} warnings)",
                output.files.len(),
                target.path().display(),
                output.warnings.len()
            );
            for warning in &output.warnings {
                println!("  warning: {}", warning.message());
            }
        }
        Command::Check { input } => {
            let exporter = input.exporter()?;
            let request = input.request()?;
            let output = exporter.export(&request)?;
            for path in output.paths() {
                println!("{}", path);
            }
            for warning in &output.warnings {
                println!("  warning: {}", warning.message());
            }
        }
    }
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run(Cli::parse()) {
        tracing::error!("export failed: {:#}", err);
        std::process::exit(1);
    }
}
