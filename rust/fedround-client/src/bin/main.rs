use std::{path::PathBuf, process};

use anyhow::Context;
use structopt::StructOpt;
use tracing::info;
use tracing_subscriber::*;

use fedround_client::{
    learner::SoftmaxLearner,
    settings::Settings,
    Agent,
    HttpClient,
    LocalClient,
};

#[derive(Debug, StructOpt)]
#[structopt(name = "Participant")]
struct Opt {
    /// Path of the configuration file
    #[structopt(short, parse(from_os_str))]
    config_path: PathBuf,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let opt = Opt::from_args();

    let settings = Settings::new(opt.config_path).unwrap_or_else(|err| {
        eprintln!("{}", err);
        process::exit(1);
    });
    let Settings {
        api: api_settings,
        agent: agent_settings,
        model: model_settings,
        data: data_settings,
        training: training_settings,
        log: log_settings,
    } = settings;

    let _fmt_subscriber = FmtSubscriber::builder()
        .with_env_filter(log_settings.filter)
        .with_ansi(true)
        .init();

    let learner = SoftmaxLearner::new(model_settings, data_settings, training_settings);
    let client = LocalClient::new(learner).context("failed to set up the local model")?;
    let coordinator = HttpClient::new(&api_settings.server_address)?;

    let mut agent = Agent::new(client, coordinator, agent_settings);
    let client_id = agent
        .run()
        .await
        .context("lost the connection to the coordinator")?;
    info!("client {} done", client_id);
    Ok(())
}
