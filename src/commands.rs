//! Command-line interface, parsed with `clap`.
//!
//! ```sh
//! vestra init
//! vestra import catalog.json
//! vestra build-index
//! vestra search "red dress" -k 5 --max-price 100
//! vestra lookbook "linen suit for men" --occasion Wedding --weather Sunny --region EU
//! vestra after-purchase 3 7 --top-n 3
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, propagate_version = true, color = clap::ColorChoice::Always)]
pub struct Cli {
    /// Config file; defaults to `<config_dir>/config.yaml`.
    #[arg(long, global = true, env = "VESTRA_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
#[command(about, long_about = None, color = clap::ColorChoice::Always)]
pub enum Commands {
    /// Write a default config and lookbook template to the config directory.
    Init,

    /// Import a JSON array of products as a new catalog version.
    #[clap(name = "import")]
    Import { file: PathBuf },

    /// Embed the latest catalog version and save the vector index.
    #[clap(name = "build-index")]
    BuildIndex,

    /// Ranked, filtered products for a query.
    #[clap(name = "search", alias = "s")]
    Search {
        query: String,

        #[arg(short = 'k', long)]
        k: Option<usize>,

        #[arg(long)]
        min_price: Option<f64>,

        /// Ceiling; parsed from the query when omitted.
        #[arg(long)]
        max_price: Option<f64>,
    },

    /// Compose a lookbook for a request.
    #[clap(name = "lookbook", alias = "l")]
    Lookbook {
        query: String,

        #[arg(long)]
        occasion: Option<String>,

        #[arg(long)]
        weather: Option<String>,

        #[arg(long)]
        region: Option<String>,

        #[arg(long)]
        min_price: Option<f64>,

        /// Ceiling; parsed from the query when omitted.
        #[arg(long)]
        max_price: Option<f64>,
    },

    /// Suggest complements for purchased product ids.
    #[clap(name = "after-purchase")]
    AfterPurchase {
        #[arg(required = true)]
        ids: Vec<u32>,

        #[arg(long, default_value_t = 3)]
        top_n: usize,
    },
}
