use clap::Parser;
use tracing_subscriber::EnvFilter;

use witbot::cli::Cli;
use witbot::config;
use witbot::engine::Engine;

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive("witbot=info".parse().expect("valid log directive"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let sys_config = config::load_config(&cli.config)?;

    if let Some(worker_args) = cli.internal_worker {
        return run_internal_worker(&sys_config, &worker_args).await.map_err(Into::into);
    }

    let engine = Engine::open(sys_config)?;
    engine.run().await?;
    Ok(())
}

/// Entry point for a re-exec'd supervised child (§4.1). Runs outside the
/// engine process entirely, so it opens its own store handle rather than
/// sharing the parent's.
async fn run_internal_worker(sys_config: &witbot::config::Config, args: &[String]) -> witbot::error::WitResult<()> {
    let [op, vm_name] = args else {
        return Err(witbot::error::WitError::NotImplemented {
            command: format!("internal-worker expects exactly 2 args, got {}", args.len()),
        });
    };

    let db_path = std::path::Path::new(&sys_config.data_dir).join("witbot.db");
    let store = witbot::store::sqlite::SqliteStore::open(&db_path)?;
    let hv = witbot::hypervisor::FakeHypervisor::new();
    let agent = witbot::vmagent::FakeVmAgent::new();

    match op.as_str() {
        "revert" => {
            let vm = store
                .load_vm(vm_name)?
                .ok_or_else(|| witbot::error::WitError::UnknownVm { name: vm_name.clone() })?;
            let limits = sys_config.limits_for_host(&vm.hostname).clone();
            witbot::lifecycle::worker::run_revert_worker(vm_name, &store, &hv, &agent, &sys_config.engine, &limits).await
        }
        "power-off" => witbot::lifecycle::worker::run_power_off_worker(vm_name, &store, &hv).await,
        other => Err(witbot::error::WitError::NotImplemented {
            command: format!("internal-worker op '{other}'"),
        }),
    }
}
