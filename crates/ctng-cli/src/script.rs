//! tmux run-script generation.
//!
//! Emits `run.sh`: one tmux session with a window per process, monitors
//! first so they are listening before the issuers fire, each window
//! redirecting to its own log file.

use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use ctng_core::Settings;

pub fn generate_run_script(settings: &Settings, env: &str, out_dir: &Path) -> Result<PathBuf> {
    let path = out_dir.join("run.sh");
    let mut file = std::fs::File::create(&path).context("creating run.sh")?;

    writeln!(file, "#!/bin/bash")?;
    writeln!(file, "SESSION=\"network\"")?;
    writeln!(file)?;
    writeln!(file, "# Start a new tmux session")?;
    writeln!(file, "tmux new-session -d -s $SESSION")?;
    writeln!(file)?;

    for i in 1..=settings.num_monitors {
        writeln!(
            file,
            "tmux new-window -n \"network_monitor_{i}\" bash -c \
             './ctng monitor M{i} --env {env} > monitor_{i}.log 2>&1'"
        )?;
    }
    writeln!(file)?;
    writeln!(file, "# Give the monitors a moment to start listening")?;
    writeln!(file, "sleep 1")?;
    writeln!(file)?;

    for i in 1..=settings.num_cas {
        writeln!(
            file,
            "tmux new-window -n \"network_ca_{i}\" bash -c \
             './ctng ca C{i} --env {env} > ca_{i}.log 2>&1'"
        )?;
    }
    for i in 1..=settings.num_loggers {
        writeln!(
            file,
            "tmux new-window -n \"network_logger_{i}\" bash -c \
             './ctng logger L{i} --env {env} > logger_{i}.log 2>&1'"
        )?;
    }
    writeln!(file)?;
    writeln!(file, "# Attach to the tmux session")?;
    writeln!(file, "tmux attach-session -t $SESSION")?;

    let mut permissions = std::fs::metadata(&path)?.permissions();
    permissions.set_mode(0o755);
    std::fs::set_permissions(&path, permissions)?;
    Ok(path)
}
