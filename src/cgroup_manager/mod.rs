#[cfg(target_os = "linux")]
mod cgroup_manager_linux;

#[cfg(target_os = "linux")]
pub use cgroup_manager_linux::*;

#[cfg(not(target_os = "linux"))]
mod cgroup_manager_stub;

use std::{
    path::Path,
    process::{Child, Stdio},
};

use anyhow::Context;
#[cfg(not(target_os = "linux"))]
pub use cgroup_manager_stub::*;

/// Spawn `program` with piped stdin/stdout. Stderr is inherited only when `allow_stderr` is set.
fn create_process(program: &Path, allow_stderr: bool) -> anyhow::Result<Child> {
    let mut cmd = std::process::Command::new(program);
    cmd.stdin(Stdio::piped()).stdout(Stdio::piped());
    if !allow_stderr {
        cmd.stderr(Stdio::null());
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }
    cmd.spawn()
        .with_context(|| format!("program '{}' could not be started", program.display()))
}

/// Kill every process left in the process group led by `child`.
#[cfg(unix)]
fn kill_process_group(child: &Child) {
    let Ok(pgid) = libc::pid_t::try_from(child.id()) else {
        return;
    };
    // SAFETY: killpg only sends a signal; `create_process` made `child` the leader of its group.
    if unsafe { libc::killpg(pgid, libc::SIGKILL) } != 0 {
        let e = std::io::Error::last_os_error();
        if e.raw_os_error() != Some(libc::ESRCH) {
            tracing::debug!("could not kill process group {pgid}: {e}");
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_child: &Child) {}
