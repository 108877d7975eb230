//! chute receiver binary entry point.

use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Mutex};

use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use chute_core::constants::{METRICS_INTERVAL, SWEEP_INTERVAL};
use chute_core::MetricsWindow;

use chute_receiver::control::{handle_control_session, ControlState};
use chute_receiver::fleet::{Channel, Dispatcher, ListenerFleet};
use chute_receiver::ingest::handle_data_session;
use chute_receiver::sweeper::run_sweeper;
use chute_receiver::sysports::{handle_ack, handle_health, handle_telemetry};
use chute_receiver::{Assembler, ChunkStore, Cli};

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    let log_format = cli.log_format.into();
    if let Err(e) = chute_core::init_logging(cli.verbose, cli.log_file.as_deref(), log_format) {
        eprintln!("failed to initialize logging: {}", e);
        return std::process::ExitCode::FAILURE;
    }

    if let Err(message) = cli.validate() {
        error!("{}", message);
        return std::process::ExitCode::FAILURE;
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %cli.address,
        sys_base = cli.sys_base,
        data_base = cli.data_base,
        data_listeners = cli.data_listeners,
        ttl_secs = cli.ttl,
        root = %cli.root.display(),
        "chute-receiver starting"
    );

    let ttl_cell = Arc::new(AtomicU64::new(cli.ttl));
    let store = match ChunkStore::new(&cli.root, Arc::clone(&ttl_cell)) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!(root = %cli.root.display(), error = %e, "failed to prepare storage root");
            return std::process::ExitCode::FAILURE;
        }
    };
    let assembler = match Assembler::new(store.files_dir()) {
        Ok(assembler) => Arc::new(assembler),
        Err(e) => {
            error!(error = %e, "failed to prepare files directory");
            return std::process::ExitCode::FAILURE;
        }
    };
    let metrics = Arc::new(Mutex::new(MetricsWindow::new("receiver")));

    // Control sessions need the fleet, which needs the dispatcher; the
    // accepted control sockets are routed through a channel instead.
    let (control_tx, mut control_rx) = mpsc::unbounded_channel();

    let dispatcher: Dispatcher = {
        let store = Arc::clone(&store);
        let assembler = Arc::clone(&assembler);
        let metrics = Arc::clone(&metrics);
        Arc::new(move |channel, socket| match channel {
            Channel::Health => {
                tokio::spawn(handle_health(socket));
            }
            Channel::Telemetry => {
                tokio::spawn(handle_telemetry(socket, Arc::clone(&metrics)));
            }
            Channel::Ack => {
                tokio::spawn(handle_ack(socket));
            }
            Channel::Control => {
                if control_tx.send(socket).is_err() {
                    warn!("control session dropped during shutdown");
                }
            }
            Channel::Data(_) => {
                tokio::spawn(handle_data_session(
                    socket,
                    Arc::clone(&store),
                    Arc::clone(&assembler),
                    Arc::clone(&metrics),
                ));
            }
        })
    };

    let fleet = Arc::new(ListenerFleet::new(
        cli.address,
        cli.sys_base,
        cli.data_base,
        dispatcher,
    ));
    if let Err(e) = fleet.start(cli.data_listeners).await {
        // Losing a system port at startup is the one fatal condition.
        error!(error = %e, "failed to start listener fleet");
        return std::process::ExitCode::FAILURE;
    }

    let control_state = Arc::new(ControlState {
        fleet: Arc::clone(&fleet),
        store: Arc::clone(&store),
        metrics: Arc::clone(&metrics),
    });
    let control_task = tokio::spawn(async move {
        while let Some(socket) = control_rx.recv().await {
            tokio::spawn(handle_control_session(socket, Arc::clone(&control_state)));
        }
    });

    let cancel = CancellationToken::new();
    let sweeper_task = tokio::spawn(run_sweeper(
        Arc::clone(&store),
        store.files_dir().to_path_buf(),
        SWEEP_INTERVAL,
        Arc::clone(&metrics),
        cancel.clone(),
    ));

    let ticker_metrics = Arc::clone(&metrics);
    let ticker_store = Arc::clone(&store);
    let ticker_fleet = Arc::clone(&fleet);
    let ticker_cancel = cancel.clone();
    let metrics_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(METRICS_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker_cancel.cancelled() => return,
                _ = ticker.tick() => {
                    let gauges = [
                        ("pending_payloads", ticker_store.pending_payloads() as u64),
                        ("data_listeners", ticker_fleet.data_count() as u64),
                    ];
                    ticker_metrics
                        .lock()
                        .expect("metrics lock poisoned")
                        .maybe_report(&gauges);
                }
            }
        }
    });

    wait_for_shutdown().await;
    info!("shutdown requested");

    cancel.cancel();
    fleet.stop().await;
    let _ = metrics_task.await;
    let _ = sweeper_task.await;
    control_task.abort();

    metrics
        .lock()
        .expect("metrics lock poisoned")
        .force_report(&[("pending_payloads", store.pending_payloads() as u64)]);
    info!("chute-receiver stopped");
    std::process::ExitCode::SUCCESS
}

async fn wait_for_shutdown() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut term = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            Ok(term) => term,
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                let _ = ctrl_c.await;
                return;
            }
        };
        tokio::select! {
            _ = ctrl_c => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
