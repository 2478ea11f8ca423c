//! # Item Composer CLI
//!
//! Renders item views from a directory of template sources, or checks that a
//! template file parses.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use item_composer::config::ComposerConfig;
use item_composer::logging::init_tracing;
use item_composer::provider::ProviderStorage;
use item_composer::repository::{LocalStorage, Storage, TemplateRepository};
use item_composer::template::TemplateEngine;
use item_composer::{ComposerError, RequestContext};

#[derive(Parser, Debug)]
#[command(name = "item-composer")]
#[command(about = "Compose JSON item views from declarative templates")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Render one item through a template
    Render {
        /// Template directory (overrides storage.template_dir)
        #[arg(long)]
        templates: Option<PathBuf>,
        /// Template id (file stem)
        #[arg(long)]
        template: String,
        /// Item as a JSON object, or @path to read it from a file
        #[arg(long)]
        item: String,
        /// Request context as a JSON object, or @path
        #[arg(long)]
        context: Option<String>,
    },
    /// Parse a template file and report what it contains
    Validate {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = ComposerConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Render {
            templates,
            template,
            item,
            context,
        } => {
            let item = read_object(&item).context("invalid --item")?;
            let context = match context {
                Some(raw) => read_object(&raw).context("invalid --context")?,
                None => Map::new(),
            };
            let output = render(&config, templates, &template, item, context).await?;
            println!("{output}");
        }
        Commands::Validate { file } => validate(&config, &file)?,
    }
    Ok(())
}

async fn render(
    config: &ComposerConfig,
    templates: Option<PathBuf>,
    template_id: &str,
    item: Map<String, Value>,
    context: Map<String, Value>,
) -> anyhow::Result<String> {
    let providers = Arc::new(ProviderStorage::new());
    let engine = Arc::new(
        TemplateEngine::new(providers.clone()).with_retry_policy(config.retry.to_policy()),
    );
    let template_dir = templates.unwrap_or_else(|| config.storage.template_dir.clone());
    let local: Arc<dyn Storage> = Arc::new(LocalStorage::new(template_dir, engine.clone()));
    let repository = TemplateRepository::new(config.cache.to_options(), vec![local])?;

    repository.start().await?;
    info!(template_id = %template_id, "Templates loaded");

    let result = async {
        let instructions = repository
            .get_template(template_id)
            .ok_or_else(|| ComposerError::template_not_found(template_id))?;
        let bytes = engine
            .compose(&RequestContext::new(context), &item, &instructions)
            .await?;
        Ok::<_, anyhow::Error>(String::from_utf8(bytes)?)
    }
    .await;

    if let Err(e) = repository.close(config.shutdown.timeout()).await {
        warn!(error = %e, "Template cache did not shut down cleanly");
    }
    providers.close_all();
    result
}

fn validate(config: &ComposerConfig, file: &Path) -> anyhow::Result<()> {
    let providers = Arc::new(ProviderStorage::new());
    let engine =
        TemplateEngine::new(providers.clone()).with_retry_policy(config.retry.to_policy());
    let bytes = std::fs::read(file).with_context(|| format!("read {}", file.display()))?;
    let instructions = engine.parse(&bytes)?;

    let views = instructions.iter().filter(|i| i.is_view()).count();
    println!(
        "{}: {} view(s), {} template(s), providers: [{}]",
        file.display(),
        views,
        instructions.len() - views,
        providers.names().join(", ")
    );
    providers.close_all();
    Ok(())
}

/// Parse a JSON object given inline or as `@path`
fn read_object(raw: &str) -> anyhow::Result<Map<String, Value>> {
    let text = match raw.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path).with_context(|| format!("read {path}"))?,
        None => raw.to_string(),
    };
    match serde_json::from_str(&text)? {
        Value::Object(map) => Ok(map),
        other => bail!("expected a JSON object, got {other}"),
    }
}
