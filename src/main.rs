#![deny(rust_2018_idioms)]

use attach_bench_populate as populate;
use attach_bench_runner as runner;
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[cfg(all(target_os = "linux", target_arch = "x86_64", target_env = "gnu"))]
#[global_allocator]
static GLOBAL: jemallocator::Jemalloc = jemallocator::Jemalloc;

#[derive(Parser)]
#[clap(about = "Volume attach latency benchmark")]
enum AttachBench {
    /// Benchmarks every combination of storage class and tree shape.
    Run(runner::Cmd),
    /// Grows a test file tree; runs inside the populate job.
    Populate(populate::Cmd),
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match AttachBench::parse() {
        AttachBench::Run(cmd) => cmd.run().await?,
        AttachBench::Populate(cmd) => cmd.run().await?,
    }

    Ok(())
}
