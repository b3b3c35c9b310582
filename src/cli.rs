use std::path::PathBuf;

use clap::Parser;

#[derive(Parser)]
#[command(name = "lingoroom")]
#[command(version = "0.3.2")]
#[command(about = "Two-party translation chat demo over an in-memory datastore")]
pub struct Args {
    /// Room id to join (created when it does not exist)
    pub room: String,

    /// Shared room password
    pub password: String,

    /// Display name
    pub name: String,

    /// Language code (e.g. en, ja, zh-Hans)
    #[arg(default_value = "en")]
    pub language: String,

    /// Path to a TOML config file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Translation endpoint; without it messages pass through untranslated
    #[arg(long)]
    pub endpoint: Option<String>,
}
