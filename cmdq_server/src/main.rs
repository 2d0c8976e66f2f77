use std::{error::Error, path::PathBuf, time::Duration};

use cmdq_lib::{install_signal_handler, layout::QueueLayout, logging, QueueConfig, QueueProcessor};
use structopt::StructOpt;
use tracing::error;

/// Runs queued commands dropped into <ROOT>/pending
#[derive(StructOpt, Debug)]
#[structopt(name = "cmdq")]
struct Opt {
    /// Queue root holding pending/, completed/, failed/ and daemon.log
    #[structopt(long, env = "CMDQ_ROOT", default_value = "command_queue", parse(from_os_str))]
    root: PathBuf,

    /// Seconds a job may run before it is killed
    #[structopt(long, env = "CMDQ_TIMEOUT_SECS", default_value = "300")]
    timeout_secs: u64,

    /// Log filter used when RUST_LOG is not set
    #[structopt(long, env = "CMDQ_LOG", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let opt = Opt::from_args();

    let layout = QueueLayout::new(&opt.root);
    layout.ensure_dirs()?;
    logging::init(layout.log_file(), &opt.log_level)?;

    println!("cmdq queue processor");
    println!("Monitoring: {}", layout.pending().display());
    println!("Log file: {}", layout.log_file().display());
    println!("Press Ctrl+C to stop...");

    let config = QueueConfig::new(&opt.root).with_job_timeout(Duration::from_secs(opt.timeout_secs));
    let mut processor = QueueProcessor::new(config);
    install_signal_handler(processor.shutdown_handle())?;

    if let Err(err) = processor.run().await {
        error!("queue processor failed: {}", err);
        return Err(err.into());
    }
    Ok(())
}
