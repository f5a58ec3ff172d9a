//! Forging rotator CLI

use clap::{Arg, ArgAction, ArgGroup, Command};
use rand::{rngs::StdRng, SeedableRng};
use rotator::{
    config::Config,
    controller::Controller,
    crate_version,
    node::Node,
    notify::Channel,
    prober::Prober,
    source,
    state::FileStore,
    toggle::Toggler,
    transport::Http,
    Error,
};
use std::{fs::OpenOptions, path::PathBuf, process::ExitCode, sync::Mutex, time::SystemTime};
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Flag for verbose output
const VERBOSE_FLAG: &str = "verbose";

/// Flag for appending logs to a file
const LOG_FILE_FLAG: &str = "log-file";

const RUN_CMD: &str = "run";
const CHECK_CMD: &str = "check";
const TOGGLE_CMD: &str = "toggle";

fn config_arg() -> Arg {
    Arg::new("config")
        .long("config")
        .required(true)
        .help("Path to YAML config file")
        .value_parser(clap::value_parser!(PathBuf))
}

/// Entrypoint for the forging rotator CLI
#[tokio::main]
async fn main() -> ExitCode {
    // Define application
    let matches = Command::new("rotator")
        .version(crate_version())
        .about("Rotate a delegate's forging duty across a pool of candidate nodes.")
        .arg(
            Arg::new(VERBOSE_FLAG)
                .short('v')
                .long(VERBOSE_FLAG)
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(LOG_FILE_FLAG)
                .long(LOG_FILE_FLAG)
                .help("Append logs to this file in addition to stdout")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .subcommand(
            Command::new(RUN_CMD)
                .about("Verify the active forger and rotate to a new one if required.")
                .arg(config_arg()),
        )
        .subcommand(
            Command::new(CHECK_CMD)
                .about("Print the forging status of every candidate node.")
                .arg(config_arg()),
        )
        .subcommand(
            Command::new(TOGGLE_CMD)
                .about("Enable or disable forging on a single node.")
                .arg(config_arg())
                .arg(
                    Arg::new("node")
                        .long("node")
                        .required(true)
                        .help("URL of the node to toggle")
                        .value_parser(clap::value_parser!(String)),
                )
                .arg(
                    Arg::new("enable")
                        .long("enable")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("disable")
                        .long("disable")
                        .action(ArgAction::SetTrue),
                )
                .group(
                    ArgGroup::new("status")
                        .args(["enable", "disable"])
                        .required(true),
                ),
        )
        .get_matches();

    // Create logger
    let level = if matches.get_flag(VERBOSE_FLAG) {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let file_layer = match matches.get_one::<PathBuf>(LOG_FILE_FLAG) {
        Some(path) => match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            ),
            Err(e) => {
                eprintln!("failed to open log file {}: {e}", path.display());
                return ExitCode::FAILURE;
            }
        },
        None => None,
    };
    tracing_subscriber::registry()
        .with(level)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    // Parse subcommands
    let result = match matches.subcommand() {
        Some((RUN_CMD, matches)) => {
            let config_path = matches.get_one::<PathBuf>("config").unwrap();
            run(config_path).await
        }
        Some((CHECK_CMD, matches)) => {
            let config_path = matches.get_one::<PathBuf>("config").unwrap();
            check(config_path).await
        }
        Some((TOGGLE_CMD, matches)) => {
            let config_path = matches.get_one::<PathBuf>("config").unwrap();
            let node = Node::new(matches.get_one::<String>("node").unwrap());
            let enabled = matches.get_flag("enable");
            toggle(config_path, node, enabled).await
        }
        Some((cmd, _)) => {
            error!(cmd, "invalid subcommand");
            return ExitCode::FAILURE;
        }
        None => {
            error!("no subcommand provided");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = result {
        error!(error=?e, "command failed");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

/// Perform a single rotation run.
async fn run(config_path: &PathBuf) -> Result<(), Error> {
    let config = Config::load(config_path)?;
    info!("starting run");

    let candidates = source::candidates(&config).await?;
    let transport = Http::new(
        config.timeout(),
        config.public_key.clone(),
        config.password.clone(),
    )?;
    let store = FileStore::new(config.state_path.clone());
    let notifier = Channel::new(config.webhook.clone(), config.timeout())?;
    let mut controller = Controller::new(
        &config,
        transport,
        store,
        notifier,
        StdRng::from_entropy(),
    );
    let outcome = controller.run(&candidates, SystemTime::now()).await?;
    info!(%outcome, "run finished");
    Ok(())
}

/// Print the forging status of every candidate.
async fn check(config_path: &PathBuf) -> Result<(), Error> {
    let config = Config::load(config_path)?;
    let candidates = source::candidates(&config).await?;
    let transport = Http::new(
        config.timeout(),
        config.public_key.clone(),
        config.password.clone(),
    )?;
    let prober = Prober::new(transport, config.timeout());
    for node in &candidates {
        match prober.forging_status(node).await {
            Some(forging) => info!(%node, forging, "forging status"),
            None => info!(%node, "unreachable"),
        }
    }
    Ok(())
}

/// Set the forging flag of `node`.
async fn toggle(config_path: &PathBuf, node: Node, enabled: bool) -> Result<(), Error> {
    let config = Config::load(config_path)?;
    let transport = Http::new(
        config.timeout(),
        config.public_key.clone(),
        config.password.clone(),
    )?;
    let toggler = Toggler::new(transport, config.timeout());
    let confirmed = toggler.set_forging(&node, enabled).await;
    info!(%node, requested = enabled, confirmed, "forging status set");
    if confirmed != enabled {
        return Err(Error::Unconfirmed {
            node: node.to_string(),
            requested: enabled,
        });
    }
    Ok(())
}
