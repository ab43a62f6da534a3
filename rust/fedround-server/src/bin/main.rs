use std::{path::PathBuf, process};

use structopt::StructOpt;
use tokio::signal;
use tracing::warn;
use tracing_subscriber::*;

use fedround_core::weighted_average;
use fedround_server::{
    rest,
    services::{Fetcher, MessageHandler},
    settings::Settings,
    state_machine::StateMachineInitializer,
    strategy::FedAvg,
};

#[derive(Debug, StructOpt)]
#[structopt(name = "Coordinator")]
struct Opt {
    /// Path of the configuration file
    #[structopt(short, parse(from_os_str))]
    config_path: PathBuf,
}

#[tokio::main]
async fn main() {
    let opt = Opt::from_args();

    let settings = Settings::new(opt.config_path).unwrap_or_else(|err| {
        eprintln!("{}", err);
        process::exit(1);
    });
    let Settings {
        api: api_settings,
        rounds: round_settings,
        strategy: strategy_settings,
        log: log_settings,
    } = settings;

    let _fmt_subscriber = FmtSubscriber::builder()
        .with_env_filter(log_settings.filter)
        .with_ansi(true)
        .init();

    let strategy =
        FedAvg::new(strategy_settings).with_evaluate_metrics_aggregation(weighted_average);
    let (state_machine, requests_tx, event_subscriber) =
        StateMachineInitializer::new(round_settings, strategy).init();

    let fetcher = Fetcher::new(&event_subscriber);
    let message_handler = MessageHandler::new(requests_tx);

    tokio::select! {
        _ = state_machine.run() => {
            warn!("shutting down: all rounds done");
        }
        _ = rest::serve(api_settings, fetcher, message_handler) => {
            warn!("shutting down: REST server terminated");
        }
        _ = signal::ctrl_c() => {}
    }
}
