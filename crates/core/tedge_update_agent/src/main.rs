use clap::Parser;
use tedge_update_agent::agent::AgentCore;
use tedge_update_agent::config::{AgentConfig, AgentOpt, TomlConfig};
use tedge_update_agent::error::AgentError;
use tedge_update_agent::persist::StateRepository;

#[tokio::main]
async fn main() -> Result<(), AgentError> {
    let opt = AgentOpt::parse();

    let log_level = opt
        .log_level
        .as_deref()
        .map(|level| level.parse().unwrap_or(tracing::Level::INFO))
        .unwrap_or(tracing::Level::INFO);
    tracing_subscriber::fmt().with_max_level(log_level).init();

    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("a rustls crypto provider must not already be installed");

    let file_config = TomlConfig::read(&opt.config_file)?;
    let config = AgentConfig::from_opt_and_file(&opt, file_config);

    let state_repo = StateRepository::new(config.state_dir.clone());
    let snapshot = state_repo.load().await?;

    let agent = AgentCore::new(config, snapshot);
    agent.run(opt.once).await
}
