//! `strata` – above/below-ground ESDF combiner.
//!
//! 1. Loads `~/.strata/config.toml` (or `--config`), then `STRATA_*`
//!    environment overrides, then command-line flags.
//! 2. Assembles the enabled fusion stages into a combine node on the event
//!    bus.
//! 3. Serves the rosbridge WebSocket endpoint until Ctrl-C.

mod config;
mod telemetry;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info};

use strata_middleware::{CombineNode, EventBus, RosbridgeServer};
use strata_types::StrataError;

#[derive(Parser, Debug)]
#[command(name = "strata")]
#[command(about = "Fuse below-ground ESDF layers into above-ground ones")]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Config file (default: ~/.strata/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// rosbridge listen address
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Enable grid (map slice) fusion
    #[arg(long)]
    grid: bool,

    /// Enable point cloud fusion
    #[arg(long)]
    points: bool,

    /// Invert below-ground distances instead of denoising
    #[arg(long)]
    invert: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the effective configuration as TOML and exit
    PrintConfig {
        /// Also write it to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

impl Args {
    /// Flags only ever switch features on; they never disable what the file
    /// or environment enabled.
    fn apply(&self, cfg: &mut config::Config) {
        if let Some(addr) = self.listen {
            cfg.listen_addr = addr;
        }
        cfg.enable_grid_fusion |= self.grid;
        cfg.enable_point_fusion |= self.points;
        cfg.invert_below_ground |= self.invert;
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    let guard = telemetry::init_tracing("strata");
    if guard.exporting() {
        info!("exporting spans over OTLP");
    }

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "strata exited with an error");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<(), StrataError> {
    let mut cfg = config::load(args.config.as_deref())?;
    args.apply(&mut cfg);
    cfg.validate()?;

    if let Some(Command::PrintConfig { output }) = &args.command {
        print!("{}", cfg.to_toml()?);
        if let Some(path) = output {
            config::save_to(&cfg, path)?;
        }
        return Ok(());
    }

    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| StrataError::Io(format!("failed to start tokio runtime: {e}")))?;
    runtime.block_on(serve(cfg))
}

async fn serve(cfg: config::Config) -> Result<(), StrataError> {
    let bus = Arc::new(EventBus::new(cfg.bus_capacity));

    let node = Arc::new(CombineNode::from_config(&cfg.node_config()));
    if !node.grid_enabled() && !node.points_enabled() {
        info!("no fusion stage enabled; inputs will be dropped");
    }
    let node_task = node.spawn(Arc::clone(&bus));

    let server = RosbridgeServer::new(Arc::clone(&bus), cfg.topics.clone());
    let result = tokio::select! {
        res = server.run_ws_server(cfg.listen_addr) => res,
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received; shutting down");
            Ok(())
        }
    };

    node_task.abort();
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_switch_features_on() {
        let args = Args::parse_from(["strata", "--grid", "--invert", "--listen", "0.0.0.0:9191"]);
        let mut cfg = config::Config::default();
        args.apply(&mut cfg);
        assert!(cfg.enable_grid_fusion);
        assert!(!cfg.enable_point_fusion);
        assert!(cfg.invert_below_ground);
        assert_eq!(cfg.listen_addr.to_string(), "0.0.0.0:9191");
    }

    #[test]
    fn absent_flags_keep_file_settings() {
        let args = Args::parse_from(["strata"]);
        let mut cfg = config::Config {
            enable_point_fusion: true,
            ..config::Config::default()
        };
        args.apply(&mut cfg);
        assert!(cfg.enable_point_fusion);
        assert!(args.command.is_none());
    }

    #[test]
    fn print_config_subcommand_parses() {
        let args = Args::parse_from(["strata", "--config", "/tmp/s.toml", "print-config", "-o", "/tmp/out.toml"]);
        assert_eq!(args.config, Some(PathBuf::from("/tmp/s.toml")));
        assert!(matches!(
            args.command,
            Some(Command::PrintConfig { output: Some(ref p) }) if p == &PathBuf::from("/tmp/out.toml")
        ));
    }
}
