//! Entry point for the `vestra` CLI.
//!
//! ```sh
//! vestra init
//! vestra import sample_data/products.json
//! vestra build-index
//! vestra lookbook "red dress under $100" --occasion "Date Night"
//! ```

use clap::Parser;
use once_cell::sync::OnceCell;
use std::{error::Error, fs, path::PathBuf};
use tracing::{debug, info};

use vestra::assistant::ShoppingAssistant;
use vestra::catalog::{ProductCatalog, establish_connection, import_catalog, read_catalog_file};
use vestra::commands::{Cli, Commands};
use vestra::config::{self, VestraConfig};
use vestra::embedding::build_provider;
use vestra::filter::Budget;
use vestra::query::{ShopperProfile, extract_budget_ceiling};
use vestra::template::{DEFAULT_TEMPLATE_NAME, LookbookTemplate};
use vestra::vector_index::build_index;

static TRACING: OnceCell<()> = OnceCell::new();

fn main() -> Result<(), Box<dyn Error>> {
    TRACING.get_or_init(|| {
        tracing_subscriber::fmt::init();
    });
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run())?;
    Ok(())
}

async fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let config_path = cli.config;

    match cli.command {
        Commands::Init => {
            debug!("Initializing configuration");
            init()?;
        }
        Commands::Import { file } => {
            let config = load(config_path)?;
            let products = read_catalog_file(&file)?;
            let mut conn = establish_connection(&config.catalog_db_url)?;
            let version = import_catalog(&mut conn, &products)?;
            println!(
                "Imported {} products as catalog version {}",
                version.product_count, version.version
            );
        }
        Commands::BuildIndex => {
            let config = load(config_path)?;
            let mut conn = establish_connection(&config.catalog_db_url)?;
            let catalog = ProductCatalog::load_latest(&mut conn)?;
            let provider = build_provider(&config.embedding)?;
            let index = build_index(
                &catalog,
                provider.as_ref(),
                config.embedding.batch_size,
                config.index.kind,
            )
            .await?;
            index.save(&config.index.path)?;
            println!(
                "Indexed {} products from catalog v{} into {}",
                index.len(),
                index.catalog_version(),
                config.index.path.display()
            );
        }
        Commands::Search {
            query,
            k,
            min_price,
            max_price,
        } => {
            let assistant = ShoppingAssistant::open(&load(config_path)?)?;
            let budget = Budget {
                min: min_price,
                max: max_price.or_else(|| extract_budget_ceiling(&query)),
            };
            let k = k.unwrap_or(assistant.default_k());
            let result = assistant.search(&query, k, budget).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Lookbook {
            query,
            occasion,
            weather,
            region,
            min_price,
            max_price,
        } => {
            let assistant = ShoppingAssistant::open(&load(config_path)?)?;
            let budget = Budget {
                min: min_price,
                max: max_price.or_else(|| extract_budget_ceiling(&query)),
            };
            let profile = ShopperProfile {
                occasion,
                weather,
                region,
            };
            let request = profile.contextualize(&query);
            let lookbook = assistant.lookbook(&request, budget, &[]).await?;
            println!("{}", serde_json::to_string_pretty(&lookbook)?);
        }
        Commands::AfterPurchase { ids, top_n } => {
            let assistant = ShoppingAssistant::open(&load(config_path)?)?;
            let recs = assistant.post_purchase_recommendations(&ids, top_n).await?;
            println!("{}", serde_json::to_string_pretty(&recs)?);
        }
    }

    Ok(())
}

/// `--config` if given, else `<config_dir>/config.yaml`.
fn load(path: Option<PathBuf>) -> Result<VestraConfig, Box<dyn Error>> {
    let path = match path {
        Some(path) => path,
        None => vestra::config_dir()?.join("config.yaml"),
    };
    debug!("Loading config from: {}", path.display());
    Ok(config::load_config(&path.to_string_lossy())?)
}

/// Write the default config and lookbook template, keeping existing files.
fn init() -> Result<(), Box<dyn Error>> {
    let config_dir = vestra::config_dir()?;
    let templates = config_dir.join("templates");
    info!("Creating template config directory: {}", templates.display());
    fs::create_dir_all(&templates)?;

    let template_path = templates.join(format!("{DEFAULT_TEMPLATE_NAME}.yaml"));
    write_if_missing(
        template_path,
        serde_yaml::to_string(&LookbookTemplate::default())?,
    )?;

    let config_path = config_dir.join("config.yaml");
    write_if_missing(config_path, serde_yaml::to_string(&VestraConfig::default())?)?;
    Ok(())
}

fn write_if_missing(path: PathBuf, content: String) -> Result<(), Box<dyn Error>> {
    if path.exists() {
        info!("Keeping existing file: {}", path.display());
    } else {
        info!("Creating file: {}", path.display());
        fs::write(&path, content)?;
    }
    Ok(())
}
