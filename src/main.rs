//! Nulls CLI - load, check and render a template tree

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;

use nulls::config::CONFIG_FILE;
use nulls::{FixSuggestion, ModuleRegistry, NullsConfig, NullsError, ProviderTable, RenderContext, Renderer, Request, TemplateStore};

#[derive(Parser)]
#[command(name = "nulls")]
#[command(about = "Nulls - declarative HTML templating engine")]
#[command(version)]
struct Cli {
    /// Config file (defaults apply when it does not exist)
    #[arg(short, long, global = true, default_value = CONFIG_FILE)]
    config: PathBuf,

    /// Template directory, overriding the config file
    #[arg(short, long, global = true)]
    templates: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load every template and report what was registered
    Check,

    /// Render a page (or a single template) to stdout
    Render {
        /// Request target the page is rendered for
        #[arg(default_value = "/")]
        url: String,

        /// Render this template path instead of the full page
        #[arg(long)]
        template: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let cli = Cli::parse();

    let result = match &cli.command {
        Commands::Check => check(&cli).await,
        Commands::Render { url, template } => render(&cli, url, template.as_deref()).await,
    };

    if let Err(e) = result {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        if let Some(suggestion) = e.downcast_ref::<NullsError>().and_then(|e| e.fix_suggestion()) {
            eprintln!("  {} {}", "Fix:".yellow(), suggestion);
        }
        std::process::exit(1);
    }
}

fn config(cli: &Cli) -> anyhow::Result<NullsConfig> {
    let mut config = NullsConfig::load(&cli.config)?.with_env()?;
    if let Some(dir) = &cli.templates {
        config.templates = dir.clone();
    }
    Ok(config)
}

async fn load(cli: &Cli) -> anyhow::Result<TemplateStore> {
    let config = config(cli)?;
    let store = TemplateStore::load(&config, ModuleRegistry::new().into_shared(), ProviderTable::new()).await?;
    Ok(store)
}

async fn check(cli: &Cli) -> anyhow::Result<()> {
    let store = load(cli).await?;
    println!(
        "{} {} templates, {} actions, {} endpoints",
        "✓".green(),
        store.len().to_string().bold(),
        store.actions().len().to_string().bold(),
        store.endpoints().len().to_string().bold()
    );
    for path in store.paths() {
        println!("  {} {}", "→".cyan(), path);
    }
    for action in store.actions().paths() {
        println!("  {} {}", "⚡".yellow(), action);
    }
    Ok(())
}

async fn render(cli: &Cli, url: &str, template: Option<&str>) -> anyhow::Result<()> {
    let store = load(cli).await?;
    let renderer = Renderer::new(Arc::new(store));
    let ctx = RenderContext::from_request(Request::get(url));
    let html = match template {
        Some(path) => renderer
            .render(path, &ctx)
            .await
            .with_context(|| format!("rendering template '{}'", path))?,
        None => renderer.render_page(&ctx).await?,
    };
    println!("{}", html);
    Ok(())
}
