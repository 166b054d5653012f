// kb command-line client entry point.

use anyhow::Context;
use clap::Parser;
use kb_app::config::AppConfig;
use kb_app::{interrupt, logging, persistence};
use kb_core::{update, AppState, Msg};
use kb_engine::{CancellationToken, KbClient};
use kb_logging::{kb_error, kb_info};

mod cli;
mod commands;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref())?;
    config.apply_env(|key| std::env::var(key).ok());
    if let Some(base_url) = cli.base_url {
        config.base_url = base_url;
    }
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }
    config.validate()?;

    logging::initialize(cli.log, config.log_level()?, &logging::default_log_file());
    kb_info!("kb starting against {}", config.base_url);

    let client = KbClient::connect(config.api_settings(), config.poll_settings())
        .context("cannot create HTTP client")?;

    let mut state = AppState::new();
    if let Some(snapshot) = persistence::load_session(&config.state_dir) {
        update(&mut state, Msg::Restore(snapshot)).context("cannot restore session")?;
        state.consume_dirty();
    }

    let cancel = CancellationToken::new();
    interrupt::install_ctrl_c(cancel.clone());

    let mut session = commands::Session {
        client,
        state,
        cancel,
    };
    let result = commands::run(&mut session, cli.command).await;
    if let Err(err) = &result {
        kb_error!("Command failed: {:#}", err);
    }

    // Partial results of a failed command are kept too.
    if session.state.consume_dirty() {
        persistence::save_session(&config.state_dir, &session.state.snapshot())
            .context("cannot save session")?;
    }
    result
}
