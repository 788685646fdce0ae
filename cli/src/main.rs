//! splist - read and write SharePoint list items from the command line.
//!
//! Signs in with the Azure AD device-code flow, keeps the credential in the
//! system keychain (or a file named by `credential_path`), and talks to one site's lists through
//! `splist_core`.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod transport;

#[derive(Parser)]
#[command(name = "splist")]
#[command(about = "Read and write SharePoint list items")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Site configuration file
    #[arg(short, long, env = "SPLIST_CONFIG", default_value = "splist.toml", global = true)]
    config: PathBuf,

    /// Increase logging verbosity
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Sign in with a device code and store the credential
    Login,

    /// Forget the stored credential
    Logout,

    /// Print every item of a list, one JSON object per line
    Items {
        /// List title
        list: String,

        /// Columns to print
        #[arg(short, long, value_delimiter = ',', default_value = "ID,Title")]
        fields: Vec<String>,
    },

    /// Run one query against a list without following continuation links
    Get {
        /// List title
        list: String,

        /// Appended to the items URL, e.g. "?$filter=Status eq 'Open'"
        suffix: String,

        /// Columns to print
        #[arg(short, long, value_delimiter = ',', default_value = "ID,Title")]
        fields: Vec<String>,
    },

    /// Create an item
    Add {
        /// List title
        list: String,

        /// Column values as a JSON object
        #[arg(long)]
        json: String,
    },

    /// Overwrite columns of an item
    Edit {
        /// List title
        list: String,

        /// Item ID
        id: i64,

        /// Column values as a JSON object
        #[arg(long)]
        json: String,
    },

    /// Delete an item
    Delete {
        /// List title
        list: String,

        /// Item ID
        id: i64,
    },

    /// List people who can be assigned work on the site
    Users,
}

/// `-v` flags win; without them `RUST_LOG` applies, then errors only.
fn log_filter(verbose: u8, rust_log: Option<&str>) -> EnvFilter {
    match verbose {
        0 => rust_log
            .and_then(|directives| EnvFilter::try_new(directives).ok())
            .unwrap_or_else(|| EnvFilter::new("error")),
        1 => EnvFilter::new("warn"),
        2 => EnvFilter::new("info"),
        3 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(cli.verbose, rust_log.as_deref()))
        .with_writer(std::io::stderr)
        .init();

    let ctx = commands::Context::open(&cli.config)?;
    match cli.command {
        Command::Login => commands::login(&ctx),
        Command::Logout => commands::logout(&ctx),
        Command::Items { list, fields } => commands::items(&ctx, &list, &fields),
        Command::Get { list, suffix, fields } => commands::get(&ctx, &list, &suffix, &fields),
        Command::Add { list, json } => commands::add(&ctx, &list, &json),
        Command::Edit { list, id, json } => commands::edit(&ctx, &list, id, &json),
        Command::Delete { list, id } => commands::delete(&ctx, &list, id),
        Command::Users => commands::users(&ctx),
    }
}
