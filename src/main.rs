mod backup;
mod db;
mod grading;
mod ipc;
mod reconcile;
mod report;

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "GRADEBOOKD_LOG";
const WORKSPACE_ENV: &str = "GRADEBOOKD_WORKSPACE";

fn init_logging() {
    // stdout carries the protocol; logs go to stderr.
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("gradebookd=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(false)
        .init();
}

fn main() {
    init_logging();

    let mut state = ipc::AppState::default();
    if let Some(path) = std::env::var_os(WORKSPACE_ENV).map(PathBuf::from) {
        if let Err(e) = ipc::select_workspace(&mut state, &path) {
            tracing::error!(workspace = %path.display(), "failed to open workspace: {e:#}");
        }
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                tracing::error!("stdin read failed: {e}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // Can't reply without id.
                tracing::warn!("malformed request: {e}");
                let resp = ipc::err("", "bad_json", e.to_string(), None);
                let _ = writeln!(stdout, "{}", resp);
                let _ = stdout.flush();
                continue;
            }
        };

        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
    tracing::debug!("stdin closed, exiting");
}
