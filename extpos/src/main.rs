//! Extpos main entry point
//!
//! Opens the flight-control link, starts the relay and runs the tab event
//! loop until interrupted.

use std::env;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use extpos_lib::{load_config, ExtposSink, ExtposTab, FlightLink, LoggingSink, RelayConfig, UdpCrtpSink};
use log::{error, info};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    // Config file is optional; defaults match the stock detector setup
    let config = match env::args().nth(1) {
        Some(path) => {
            info!("Loading configuration from: {}", path);
            match load_config(&path) {
                Ok(config) => config,
                Err(e) => {
                    error!("Error loading configuration: {}", e);
                    process::exit(1);
                }
            }
        }
        None => RelayConfig::default(),
    };

    info!("Detector: {}", config.detector_endpoint);
    info!("Link: {}{}", config.link_uri, if config.dry_run { " (dry run)" } else { "" });

    let sink: Arc<dyn ExtposSink> = if config.dry_run {
        Arc::new(LoggingSink)
    } else {
        Arc::new(UdpCrtpSink::new())
    };
    let link = FlightLink::new(sink);

    let mut tab = match ExtposTab::new(&link, &config) {
        Ok(tab) => tab,
        Err(e) => {
            error!("Error starting relay: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = link.open(&config.link_uri) {
        error!("Error opening link {}: {}", config.link_uri, e);
        tab.shutdown().ok();
        process::exit(1);
    }

    let running = Arc::new(AtomicBool::new(true));
    let running_clone = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        running_clone.store(false, Ordering::SeqCst);
    }) {
        error!("Error setting Ctrl+C handler: {}", e);
        process::exit(1);
    }

    info!("{} tab running, entering event loop...", tab.name());
    tab.run(&running);

    link.close();
    tab.process_pending();

    match tab.shutdown() {
        Ok(stats) => info!(
            "Relay stopped: {} messages, {} detections, {} forwarded, {} dropped, {} malformed, {} channel errors",
            stats.messages_received,
            stats.detections,
            stats.samples_forwarded,
            stats.samples_dropped,
            stats.messages_malformed,
            stats.receive_errors
        ),
        Err(e) => {
            error!("Error during shutdown: {}", e);
            process::exit(1);
        }
    }

    info!("Extpos shutdown complete");
}
