use std::{process::ExitCode, sync::Arc};

use clap::Parser;
use log::{error, info};

use relay_sender::{
    app::cli,
    config::Config,
    endpoint::http::HttpEndpoint,
    logging::{sink::LogSink, stream::StreamPublisher},
    manager::task_manager::JobManager,
};

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let config = Config::parse();

    let sink = Arc::new(LogSink::new(config.log_capacity));
    let endpoint = Arc::new(HttpEndpoint::new(&config.endpoint_url, config.request_timeout()));
    let manager = JobManager::new(config.manager_config(), endpoint, Arc::clone(&sink));
    let publisher = StreamPublisher::new(Arc::clone(&sink), config.stream_poll_interval());

    info!("Relaying through {}", config.endpoint_url);
    sink.info(None, "App starting...");

    let result = cli::run_cli(&manager, &publisher, &config);
    manager.shutdown();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Console failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
