use colored::Colorize;
use log::{error, info};
use relink_core::{CoordinationError, Coordinator, StorageError};
use relink_server::{run_server, ConfigError, ServerConfig, ServerContext};
use thiserror::Error;
use tokio::runtime::{self, Runtime};

mod logging;

pub struct Relink {
    config: ServerConfig,
    context: ServerContext,
    runtime: Runtime,
}

#[derive(Debug, Error)]
enum RelinkError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Could not open storage: {0}")]
    Storage(#[from] StorageError),

    #[error("Could not restore offers: {0}")]
    Coordination(#[from] CoordinationError),

    #[error("Fatal error: {0}")]
    Io(#[from] std::io::Error),
}

impl Relink {
    fn new() -> Result<Self, RelinkError> {
        let config = ServerConfig::from_env()?;

        info!("Building async runtime...");
        let runtime = runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("relink-async")
            .build()?;

        info!("Opening storage...");
        let storage = config.storage()?;
        let coordinator = Coordinator::with_shared_storage(config.core.clone(), storage);

        let restored = runtime.block_on(coordinator.restore())?;
        info!("Restored {} offers", restored);

        let context = ServerContext::new(coordinator, config.identities()?, config.rate_limiter());

        Ok(Self {
            config,
            context,
            runtime,
        })
    }

    fn run(self) -> Result<(), RelinkError> {
        let port = self.config.port;

        self.runtime
            .block_on(run_server(self.context, port))
            .map_err(RelinkError::from)
    }
}

impl RelinkError {
    fn hint(&self) -> String {
        match self {
            RelinkError::Config(_) => "Check the RELINK_* and RATE_* environment variables and try again.".to_string(),
            RelinkError::Storage(_) => "Make sure RELINK_DATA_DIR points to a writable directory and that its files are not corrupted.".to_string(),
            RelinkError::Coordination(_) => "The stored offers could not be loaded. Inspect the files in RELINK_DATA_DIR.".to_string(),
            RelinkError::Io(_) => "This usually means the port is already in use. Set RELINK_SERVER_PORT to a free port.".to_string(),
        }
    }
}

fn report(error: RelinkError) {
    error!("{} Read the error below to troubleshoot the issue. If you think this might be a bug, please report it by making a GitHub issue.", "reLink failed!".bold().red());
    error!("{}", error);
    error!("{}", format!("Hint: {}", error.hint()).dimmed().italic());
}

fn main() {
    if let Err(e) = logging::init_logger() {
        eprintln!("Could not initialize logging: {}", e);
    }

    match Relink::new() {
        Ok(relink) => {
            info!("Initialized successfully.");

            if let Err(error) = relink.run() {
                report(error);
            }
        }
        Err(error) => report(error),
    }
}
