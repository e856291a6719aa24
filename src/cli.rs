use std::path::PathBuf;

use clap::Parser;

/// The daemon's only real entry point is `serve`; `--internal-worker` is
/// the hidden re-exec mode `child::spawn_supervised` uses to hand a VM
/// operation off to a fresh process (§4.1) and is not meant to be typed
/// by a human.
#[derive(Parser, Debug)]
#[command(name = "witbotd", about = "CI VM scheduling and lifecycle daemon")]
pub struct Cli {
    /// Path to the engine config file
    #[arg(short, long, default_value = "witbot.toml")]
    pub config: PathBuf,

    /// Enable verbose (debug-level) logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Re-exec entry point for a supervised child (§4.1): `<op> <vm>`
    /// where `op` is `revert` or `power-off`. Set by `child::spawn_supervised`
    /// via `current_exe()`, never by a human operator.
    #[arg(long, num_args = 2, value_names = ["OP", "VM"], hide = true)]
    pub internal_worker: Option<Vec<String>>,
}
