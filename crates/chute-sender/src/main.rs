//! chute sender binary entry point.

use std::sync::Arc;

use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use chute_core::BoundedQueue;

use chute_sender::pipeline::run_producer;
use chute_sender::{Chunker, Cli, Scanner, SenderEngine, SidebandClient};

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
        watch_dir = %cli.watch_dir.display(),
        chunk_size = cli.chunk_size,
        connections = cli.connections,
        target = format!("{}:{}", cli.host_prefix, cli.base_port),
        "chute-sender starting"
    );

    let queue = match BoundedQueue::new(cli.queue_capacity) {
        Ok(queue) => Arc::new(queue),
        Err(e) => {
            error!(error = %e, "invalid queue configuration");
            return std::process::ExitCode::FAILURE;
        }
    };
    let chunker = match Chunker::new(cli.chunk_size) {
        Ok(chunker) => chunker,
        Err(e) => {
            error!(error = %e, "invalid chunk configuration");
            return std::process::ExitCode::FAILURE;
        }
    };
    let sideband = match SidebandClient::connect(&cli.control_host, cli.control_port).await {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!(error = %e, "failed to set up sideband socket");
            return std::process::ExitCode::FAILURE;
        }
    };

    let engine = match SenderEngine::new(Arc::clone(&queue), cli.sender_config(), Arc::clone(&sideband))
    {
        Ok(engine) => engine,
        Err(e) => {
            error!(error = %e, "invalid sender configuration");
            return std::process::ExitCode::FAILURE;
        }
    };
    engine.start();

    let cancel = CancellationToken::new();

    let (descriptor_tx, descriptor_rx) = mpsc::channel(16);
    let scanner = Scanner::new(cli.watch_dir.clone(), cli.scan_interval());
    let scanner_task = tokio::spawn(scanner.run(descriptor_tx, cancel.clone()));

    let producer_task = tokio::spawn(run_producer(
        descriptor_rx,
        Arc::clone(&queue),
        chunker,
        cli.compression_level,
        Arc::clone(&sideband),
        cancel.clone(),
    ));

    let probe_queue = Arc::clone(&queue);
    let probe_task = tokio::spawn(Arc::clone(&sideband).run_queue_probe(
        cli.queue_update_interval(),
        move || probe_queue.len() as u32,
        cancel.clone(),
    ));

    wait_for_shutdown().await;
    info!("shutdown requested, draining");

    // Stop producing, then let the engine drain what is already queued.
    cancel.cancel();
    let _ = scanner_task.await;
    let _ = producer_task.await;
    queue.close();

    let drain = engine.stop();
    tokio::pin!(drain);
    tokio::select! {
        _ = &mut drain => {}
        _ = wait_for_shutdown() => {
            warn!("second signal, abandoning drain");
            engine.abort();
            drain.await;
        }
    }

    let _ = probe_task.await;
    info!("chute-sender stopped");
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
