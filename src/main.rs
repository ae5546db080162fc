use anyhow::{Result, bail};
use clap::Parser;
use lockwatch::{Lockwatch, Mutex, init_tracing};
use std::path::PathBuf;
use std::sync::{Arc, Barrier, mpsc};
use std::thread;
use std::time::Duration;

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Lockwatch - Runtime Deadlock Detector for Mutex-Based Programs",
    long_about = "Runs a ring of threads that each take their own lock and then \
                  their neighbour's, so the ring deadlocks, and prints the report \
                  the monitor produces."
)]
struct Cli {
    /// Number of threads in the deadlocking ring
    #[arg(long, default_value_t = 3)]
    threads: usize,

    /// Monitor check interval in milliseconds
    #[arg(long, default_value_t = 200)]
    interval_ms: u64,

    /// Do not capture call stacks on blocking acquires
    #[arg(long)]
    no_stacks: bool,

    /// Also append the report as a JSON line to this file
    #[arg(long)]
    report_file: Option<PathBuf>,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    if cli.threads < 2 {
        bail!("A deadlocking ring needs at least 2 threads, got {}", cli.threads);
    }

    let (tx, rx) = mpsc::channel();
    let mut builder = Lockwatch::new()
        .interval(Duration::from_millis(cli.interval_ms))
        .capture_stacks(!cli.no_stacks)
        .callback(move |info| {
            let _ = tx.send(info);
        });
    if let Some(path) = &cli.report_file {
        builder = builder.with_log(path);
    }
    builder.start()?;

    let locks: Vec<_> = (0..cli.threads)
        .map(|i| Arc::new(Mutex::new(i)))
        .collect();
    let barrier = Arc::new(Barrier::new(cli.threads));

    for i in 0..cli.threads {
        let own = Arc::clone(&locks[i]);
        let next = Arc::clone(&locks[(i + 1) % cli.threads]);
        let barrier = Arc::clone(&barrier);
        thread::Builder::new()
            .name(format!("ring-{}", i))
            .spawn(move || {
                let _own = own.lock();
                barrier.wait();
                let _next = next.lock();
            })?;
    }

    let timeout = Duration::from_millis(cli.interval_ms) * 10 + Duration::from_secs(1);
    let info = match rx.recv_timeout(timeout) {
        Ok(info) => info,
        Err(_) => bail!("No deadlock reported within {:?}", timeout),
    };

    println!("{}", info);
    if let Some(path) = &cli.report_file {
        println!("Report appended to {}", path.display());
    }

    lockwatch::shutdown();
    // The ring threads stay blocked forever; exiting the process ends them
    std::process::exit(0)
}
