mod cli;
mod dns;
mod icmp;
mod receive;
mod scheduler;
mod sink;
mod state;
mod stats;
mod target;
mod transmit;
mod utils;

#[cfg(test)]
mod testing;

use icmp::IcmpSocket;
use scheduler::ProbeScheduler;
use sink::{ConsoleSink, spawn_reporter};
use std::sync::Arc;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Parse command line arguments
    let config = match cli::parse_args() {
        Ok(config) => config,
        Err(e) => {
            utils::exit_with_error(&format!("invalid arguments: {}", e), 1);
        }
    };

    if let Err(e) = utils::validate_engine_params(config.period, config.timeout, config.queue_capacity) {
        utils::exit_with_error(&e.to_string(), 1);
    }

    let families = config.families();
    if config.privileged {
        if let Err(e) = utils::check_privileges_detailed(&families) {
            utils::exit_with_error(&e.to_string(), 1);
        }
    }

    let targets = Arc::new(dns::resolve_targets(&config.targets, config.use_ipv4, config.use_ipv6).await);
    if targets.is_empty() {
        utils::exit_with_error("no usable targets", 1);
    }

    let identifier = utils::process_identifier();
    log::debug!("Process identifier: {}", identifier);

    // Every enabled family gets a socket; failing to open one is fatal.
    let mut sockets = Vec::new();
    for family in families {
        match IcmpSocket::open(family, config.privileged, config.source(family), identifier, config.timeout) {
            Ok(socket) => {
                log::info!(
                    "Using {} {} socket",
                    if config.privileged { "raw" } else { "datagram" },
                    family
                );
                sockets.push(Arc::new(socket));
            }
            Err(e) => {
                utils::exit_with_error(&format!("cannot create {} ICMP socket: {:#}", family, e), 1);
            }
        }
        if !targets.has_family(family) {
            log::warn!("{} is enabled but no target resolved to an {} address", family, family);
        }
    }

    let (reports, reporter) = spawn_reporter(Arc::clone(&targets), ConsoleSink::new(), config.queue_capacity);
    let scheduler = ProbeScheduler::new(config.period, config.timeout, targets, sockets, reports);
    let mut phase = scheduler.subscribe();
    tokio::spawn(async move {
        while phase.changed().await.is_ok() {
            log::debug!("Scheduler is now {:?}", *phase.borrow_and_update());
        }
    });
    log::info!("echomon is running! Hit CTRL-C to stop it.");

    scheduler.run(utils::shutdown_signal()).await;

    match reporter.await {
        Ok(sink) => print!("{}", sink.format_summary()),
        Err(e) => log::error!("Reporter task failed: {}", e),
    }
}
