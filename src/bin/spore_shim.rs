//! Host-side shim invoked by the reconciler to restore a microVM from a
//! snapshot bundle. One subcommand: `restore`.
//!
//! ```text
//! spore-shim restore [--fc-bin PATH] [--jailer-bin PATH] [--socket-path PATH] [--id ID] <dir>
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use sporelet_core::config::Settings;
use sporelet_core::orchestrator::SnapshotSpec;

const SNAPSHOT_PREFIX: &str = "snapshot";

fn main() -> ExitCode {
    sporelet_core::logging::init();

    let mut args = std::env::args().skip(1);
    match args.next().as_deref() {
        Some("restore") => restore(args),
        _ => {
            usage();
            ExitCode::FAILURE
        }
    }
}

fn usage() {
    eprintln!("Usage: spore-shim <command> [options]");
    eprintln!("Commands:");
    eprintln!("  restore   Restore a microVM from snapshot files");
}

fn restore(args: impl Iterator<Item = String>) -> ExitCode {
    let mut fc_bin: Option<String> = None;
    let mut jailer_bin: Option<String> = None;
    let mut socket_path: Option<PathBuf> = None;
    let mut id: Option<String> = None;
    let mut dir: Option<PathBuf> = None;

    let mut args = args.peekable();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--fc-bin" => fc_bin = args.next(),
            "--jailer-bin" => jailer_bin = args.next(),
            "--socket-path" => socket_path = args.next().map(PathBuf::from),
            "--id" => id = args.next(),
            _ if dir.is_none() => dir = Some(PathBuf::from(arg)),
            other => {
                eprintln!("unrecognized argument: {other}");
                return ExitCode::FAILURE;
            }
        }
    }

    let Some(dir) = dir else {
        eprintln!("snapshot directory required");
        return ExitCode::FAILURE;
    };

    let spec = SnapshotSpec {
        fc_bin,
        jailer_bin,
        socket_path,
        id,
        ..SnapshotSpec::default()
    };

    let settings = Settings::from_env();
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let result = runtime.block_on(sporelet_core::orchestrator::restore(
        &dir,
        SNAPSHOT_PREFIX,
        &spec,
        &settings,
        now,
    ));

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}
