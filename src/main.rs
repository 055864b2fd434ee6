mod cli;
mod config;
mod database;
mod error;
mod logging;
mod migration;
mod notifications;
mod retention;
mod schema;
mod settings_store;
mod upkeep;
mod utils;

use cli::Cli;
use config::Config;
use directories::ProjectDirs;
use log::{debug, error};

fn main() {
    let Some(project_dirs) = ProjectDirs::from("", "", "netwatch") else {
        eprintln!("Could not determine the data directory");
        std::process::exit(1);
    };

    let config = Config::load_config(&project_dirs);

    // Log level comes from the config file; set RUST_LOG to override it
    let _logger = match logging::setup_logging(&config.logging) {
        Ok(handle) => handle,
        Err(err) => {
            eprintln!("{}", err);
            std::process::exit(1);
        }
    };
    debug!("Command-line args: {:?}", std::env::args_os().collect::<Vec<_>>());

    if let Err(err) = Cli::handle_command_line(&config) {
        error!("{:?}", err);
        eprintln!("{}", err);
        std::process::exit(1);
    }
}
