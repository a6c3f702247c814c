//! GPU Dispatch Agent — consumes tasks and drives a local generative-AI
//! engine (or face-swap service) to completion.

use gpu_dispatch_agent::dispatcher::Dispatcher;
use std::error::Error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

fn print_usage() {
    println!("usage: gpu-dispatch-agent [api|consumer|run]");
    println!("  api       placeholder — the REST façade is not part of this agent");
    println!("  consumer  run the task dispatch loop");
    println!("  run       same as consumer (default)");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let subcommand = std::env::args().nth(1).unwrap_or_else(|| "run".to_string());

    match subcommand.as_str() {
        "api" => {
            println!("api subcommand is a placeholder: the REST façade is not part of this agent");
            return Ok(());
        }
        "consumer" | "run" => {}
        "-h" | "--help" => {
            print_usage();
            return Ok(());
        }
        other => {
            eprintln!("unknown subcommand '{other}'");
            print_usage();
            std::process::exit(2);
        }
    }

    let Some(dispatcher) = Dispatcher::from_config().await else {
        eprintln!("✗ no task source available, exiting");
        std::process::exit(1);
    };

    if !dispatcher.storage_ready() {
        eprintln!("✗ no storage backend configured (set STORAGE_PROVIDER and its credentials)");
        std::process::exit(1);
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_for_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("\nshutdown signal received, finishing in-flight job then stopping...");
            shutdown_for_signal.store(true, Ordering::Relaxed);
        }
    });

    dispatcher.run(shutdown).await;
    Ok(())
}
