use std::sync::Arc;

use anyhow::Context;
use config::{Config, Environment, File};

mod auth;
mod bot;
mod calendar;
mod cfg;
mod commands;
mod web;

/// Loads the configuration using the `config` crate.
/// Every required key missing from the file or the environment aborts
/// the startup here.
fn load_config() -> Result<cfg::Config, anyhow::Error> {
    let settings = Config::builder()
        .add_source(File::with_name("config"))
        .add_source(Environment::with_prefix("CALBOT").separator("__"))
        .build()?;

    Ok(settings.try_deserialize()?)
}

#[tokio::main]
/// Entrypoint for the calbot discord bot.
/// Calbot links discord users to their Google Calendar account and lets
/// them list and create events from slash commands; a small embedded web
/// listener completes the OAuth consent redirect.
async fn main() -> Result<(), anyhow::Error> {
    // Initialize the logger
    pretty_env_logger::init();

    // load the config
    let config = Arc::from(load_config().context("failed to load configuration")?);

    let bot = bot::Bot::new(config).await?;
    bot.start().await
}
