use std::process::exit;
use std::sync::Arc;

use clap::Parser;
use redberry::auth::{AllowAll, NoAuth, SharedPassword};
use redberry::config::{Cli, Config};
use redberry::connection::ServerShared;
use redberry::pubsub::Registry as PubSubRegistry;
use redberry::server;
use redberry::store::Store;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let cfg = match Config::from_cli(cli) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("redberry-server: {e}");
            exit(1);
        }
    };

    init_logging(&cfg);

    let auth: Box<dyn redberry::auth::AuthHook> = match &cfg.requirepass {
        Some(pass) => Box::new(SharedPassword::new(pass.clone())),
        None => Box::new(NoAuth),
    };

    let shared = Arc::new(ServerShared {
        store: Store::new(cfg.databases),
        pubsub: PubSubRegistry::default(),
        auth,
        authz: Box::new(AllowAll),
        start_time: std::time::Instant::now(),
    });

    tracing::info!(port = cfg.port, databases = cfg.databases, "starting redberry");

    if let Err(e) = server::serve(shared, &cfg.bind, cfg.port).await {
        tracing::error!(error = %e, "server exited with error");
        exit(1);
    }
}

fn init_logging(cfg: &Config) {
    let filter = cfg.loglevel.as_tracing_filter();
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if let Some(path) = &cfg.logfile {
        match std::fs::OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => {
                builder.with_writer(file).init();
                return;
            }
            Err(e) => eprintln!("redberry-server: could not open log file '{path}': {e}, logging to stderr instead"),
        }
    }
    builder.init();
}
