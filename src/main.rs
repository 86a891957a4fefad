use clap::Parser;
use log::{error, info};
use sshcast::configuration::config::{Args, Config};
use sshcast::controller::controller_handler::Controller;

#[tokio::main]
async fn main() {
    // Get command-line arguments
    let args = Args::parse();

    let mut logger = env_logger::Builder::from_default_env();
    if std::env::var_os("RUST_LOG").is_none() {
        logger.filter_level(log::LevelFilter::Info);
    }
    if let Some(level) = args.log_level {
        logger.filter_level(level);
    }
    logger.format_target(false).init();

    info!(
        "sshcast v{} importing configuration from {}",
        env!("CARGO_PKG_VERSION"),
        args.config_file.display()
    );

    let mut config = match Config::from_file(&args.config_file) {
        Ok(config) => config,
        Err(e) => {
            error!("Unable to import configuration from file: {}", e);
            std::process::exit(1);
        }
    };
    config.apply_args(&args);
    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        std::process::exit(1);
    }

    info!("Configuration imported successfully");

    let controller = match Controller::new(config) {
        Ok(controller) => controller,
        Err(e) => {
            error!("Unable to create a controller instance: {}, exiting...", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = controller.run().await {
        error!("Error occured in the controller process: {}, exiting...", e);
        std::process::exit(1);
    }
    info!("Stopped");
}
