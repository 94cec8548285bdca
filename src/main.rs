use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use log::info;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use storyworld_templates::config::{AppConfig, StorageBackend};
use storyworld_templates::logic::{TemplateApplicator, TemplateValidator};
use storyworld_templates::model::{ApplyOptions, EntityType, MergeMode, Template};
use storyworld_templates::seed;
use storyworld_templates::store::{FileStore, MemoryStore, Store, TemplateStore};

#[derive(Parser)]
#[command(name = "storyworld", about = "Apply story-world template bundles", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check a bundle file without creating anything
    Validate {
        bundle: PathBuf,
    },
    /// Instantiate a bundle into a story
    Apply(ApplyArgs),
    /// Store the built-in starter bundles
    Seed,
    /// List stored bundles
    List,
}

#[derive(Args)]
struct ApplyArgs {
    /// Bundle file (.json, .yaml or .yml)
    #[arg(required_unless_present_any = ["template", "seed"])]
    bundle: Option<PathBuf>,

    /// Id of a stored bundle
    #[arg(long, conflicts_with = "bundle")]
    template: Option<String>,

    /// Apply the built-in Thieves Guild starter
    #[arg(long, conflicts_with_all = ["bundle", "template"])]
    seed: bool,

    #[arg(long)]
    story: String,

    /// name=value; values are parsed as JSON and fall back to plain text
    #[arg(long = "var", value_parser = parse_variable)]
    vars: Vec<(String, Value)>,

    /// type=id1,id2 limits which entities of a type are created
    #[arg(long = "select", value_parser = parse_selection)]
    selections: Vec<(EntityType, Vec<String>)>,

    #[arg(long, value_enum, default_value = "merge")]
    mode: ModeArg,

    #[arg(long)]
    strict: bool,

    #[arg(long)]
    rollback: bool,

    /// Leave relationship fields empty
    #[arg(long)]
    no_relationships: bool,

    /// Print the full result as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum ModeArg {
    Merge,
    Replace,
}

fn parse_variable(raw: &str) -> Result<(String, Value), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got '{}'", raw))?;
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((name.trim().to_string(), value))
}

fn parse_selection(raw: &str) -> Result<(EntityType, Vec<String>), String> {
    let (entity_type, ids) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected type=id1,id2, got '{}'", raw))?;
    let ids = ids
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect();
    Ok((entity_type.parse()?, ids))
}

fn read_bundle(path: &Path) -> anyhow::Result<Template> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let template = match path.extension().and_then(|e| e.to_str()) {
        Some("yaml") | Some("yml") => serde_yaml::from_str(&text)?,
        _ => serde_json::from_str(&text)?,
    };
    Ok(template)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::load()?;

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.logging.level.as_str()),
    )
    .init();

    let cli = Cli::parse();

    match config.storage.backend {
        StorageBackend::Memory => run(Arc::new(MemoryStore::new()), cli.command, &config).await,
        StorageBackend::File => {
            info!("Using file store at {}", config.storage.root_dir.display());
            run(
                Arc::new(FileStore::new(&config.storage.root_dir)),
                cli.command,
                &config,
            )
            .await
        }
    }
}

async fn run<S: Store + 'static>(
    store: Arc<S>,
    command: Command,
    config: &AppConfig,
) -> anyhow::Result<()> {
    match command {
        Command::Validate { bundle } => {
            let result = TemplateValidator::validate(&read_bundle(&bundle)?);
            println!("{}", serde_json::to_string_pretty(&result)?);
            if !result.is_valid {
                std::process::exit(1);
            }
        }
        Command::Seed => {
            seed::load_seed_data(store.as_ref()).await?;
            println!("Stored template '{}'", seed::THIEVES_GUILD_TEMPLATE_ID);
        }
        Command::List => {
            for template in store.list_templates().await? {
                println!(
                    "{}\t{}\t{} entities\tused {} time(s)",
                    template.id,
                    template.name,
                    template.entities.len(),
                    template.usage_count
                );
            }
        }
        Command::Apply(args) => {
            let mut options = ApplyOptions::new(args.story.clone());
            options.mode = match args.mode {
                ModeArg::Merge => MergeMode::Merge,
                ModeArg::Replace => MergeMode::Replace,
            };
            options.variable_values = args.vars.iter().cloned().collect();
            options.selection = args.selections.iter().cloned().collect();
            options.merge_relationships = !args.no_relationships;
            options.strict_variables = args.strict || config.templates.strict_variables;
            options.rollback_on_failure = args.rollback || config.templates.rollback_on_failure;

            let applicator = TemplateApplicator::new(store);
            let result = if let Some(id) = &args.template {
                applicator.apply_stored_template(id, options).await
            } else if args.seed {
                applicator
                    .apply_template(&seed::thieves_guild_template()?, options)
                    .await
            } else if let Some(path) = &args.bundle {
                applicator.apply_template(&read_bundle(path)?, options).await
            } else {
                bail!("nothing to apply");
            };

            if args.json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("{}", result.summary());
                for warning in &result.warnings {
                    println!("warning: {}", warning);
                }
            }
            if !result.success {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
