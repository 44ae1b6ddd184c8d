//! DPDK launch CLI
//!
//! Usage:
//!   pktgen_launch -l
//!   pktgen_launch -s default
//!   pktgen_launch -n --cfg-dir cfg two-ports

use pktgen_launch::{
    find_unit, list_units, Invocation, LaunchArgs, LaunchContext, Launcher, Provisioner,
    SystemRunner, VariableNamespace,
};
use std::path::Path;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = match LaunchArgs::from_env() {
        Invocation::Run(args) => args,
        Invocation::Exit { output, code } => {
            if code == 0 {
                println!("{}", output);
            } else {
                eprintln!("{}", output);
            }
            std::process::exit(code);
        }
    };

    // Initialize logging
    let log_level = if args.verbose { "debug" } else { "info" };
    let env = env_logger::Env::default().default_filter_or(log_level);
    env_logger::init_from_env(env);

    let cfg_dir = Path::new(&args.cfg_dir);

    // Listing mode
    if args.list {
        print!("{}", list_units(cfg_dir));
        return;
    }

    let namespace = match VariableNamespace::from_env() {
        Ok(ns) => ns,
        Err(e) => {
            log::error!("{}", e);
            std::process::exit(1);
        }
    };

    let unit_name = args.unit().unwrap_or_default();
    let unit_path = match find_unit(cfg_dir, unit_name) {
        Ok(path) => path,
        Err(e) => {
            log::error!("{}", e);
            print!("{}", list_units(cfg_dir));
            std::process::exit(1);
        }
    };

    let mut ctx = LaunchContext::new(namespace);
    ctx.verbose = args.verbose;
    ctx.norun = args.norun;
    let runner = SystemRunner;

    // Setup mode
    if args.setup {
        match Provisioner::new(&ctx, &runner).setup(&unit_path).await {
            Ok(report) => log::info!(
                "Setup of '{}' complete ({} step(s) skipped)",
                unit_name,
                report.ignored.len() + report.hugepage_failures.len()
            ),
            Err(e) => {
                log::error!("Setup failed: {}", e);
                std::process::exit(1);
            }
        }
        return;
    }

    // The application owns the terminal while it runs; it gets SIGINT from
    // the terminal itself and the launcher waits for it to exit.
    if !args.norun {
        if let Err(e) = ctrlc::set_handler(|| {
            log::debug!("Received Ctrl+C, waiting for the application to exit");
        }) {
            log::warn!("Failed to set Ctrl+C handler: {}", e);
        }
    }

    let mut launcher = Launcher::new(&ctx, &runner);
    if let Err(e) = launcher.run(&unit_path).await {
        log::error!("Launch failed: {}", e);
        std::process::exit(1);
    }
}
