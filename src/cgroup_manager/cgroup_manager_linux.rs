use std::{
    path::Path,
    process::Child,
    sync::atomic::{AtomicU32, Ordering},
    time::{Duration, Instant},
};

use anyhow::{self, Context};
use cgroups_rs::Cgroup;
use tracing::warn;

use super::{create_process, kill_process_group};

fn get_current_user_id() -> anyhow::Result<String> {
    let output = std::process::Command::new("id")
        .arg("-u")
        .output()
        .context("Could not launch 'id -u'")?;
    let untrimed_id = std::str::from_utf8(&output.stdout).context("id is not a valid string")?;
    Ok(untrimed_id.trim().to_string())
}

fn get_cgroup_path(user_id: &str, group_name: &str) -> String {
    format!("user.slice/user-{user_id}.slice/user@{user_id}.service/{group_name}")
}

/// Create a cgroup at `path`.
///
/// * `max_memory` - Maximum available memory in Bytes. Non-positive means no restriction.
/// * `max_pids` - Maximum number of PIDS inside the cgroup at any time. Non-positive means no restriction.
/// * `cpus` - which cpus the members can run on ("1-5,7", "1,3,4", ...). Empty means no restriction.
fn create_cgroup(path: &str, max_memory: i64, max_pids: i64, cpus: &str) -> anyhow::Result<Cgroup> {
    let mut builder = cgroups_rs::cgroup_builder::CgroupBuilder::new(path);
    if max_memory > 0 {
        builder = builder.memory().memory_hard_limit(max_memory).done();
    }
    if max_pids > 0 {
        builder = builder
            .pid()
            .maximum_number_of_processes(cgroups_rs::MaxValue::Value(max_pids))
            .done();
    }
    if !cpus.is_empty() {
        builder = builder.cpu().cpus(cpus.to_string()).done();
    }
    builder
        .build(cgroups_rs::hierarchies::auto())
        .context("could not create cgroup")
}

const CLEANUP_DURATION: Duration = Duration::from_millis(100);

fn wait_for_empty_cgroup(cgroup: &Cgroup, max_duration: Duration) -> anyhow::Result<()> {
    let deadline = Instant::now() + max_duration;
    while !cgroup.tasks().is_empty() {
        if Instant::now() > deadline {
            anyhow::bail!("cgroup still populated after {max_duration:?}");
        }
        std::thread::sleep(std::cmp::min(Duration::from_millis(10), max_duration / 10));
    }
    Ok(())
}

/// A program process, optionally confined to its own cgroup.
///
/// The process runs as the leader of its own process group. Every process it starts (and its
/// cgroup) is killed when dropped unless [`release`](Self::release) or
/// [`try_kill`](Self::try_kill) already cleaned it up.
#[derive(Debug)]
pub struct LimitedProcess {
    pub child: Child,
    cgroup: Option<Cgroup>,
    cleaned_up: bool,
}

impl LimitedProcess {
    /// Start `program` inside a fresh cgroup limited to `max_memory` bytes and `cpus`.
    pub fn launch(
        program: &Path,
        max_memory: i64,
        cpus: &str,
        allow_stderr: bool,
    ) -> anyhow::Result<LimitedProcess> {
        static COUNTER: AtomicU32 = AtomicU32::new(1);
        let user_id = get_current_user_id().context("could not get user id")?;
        let group_name = format!(
            "BATTLE_SANDBOX_{}_{}",
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::Relaxed)
        );
        let path = get_cgroup_path(&user_id, &group_name);
        let group = create_cgroup(&path, max_memory, 100, cpus).context("could not create cgroup")?;

        let mut child = match create_process(program, allow_stderr) {
            Ok(child) => child,
            Err(e) => {
                let _ = group.delete();
                return Err(e.context("could not create process in cgroup"));
            }
        };

        let pid = child.id() as u64;
        if let Err(e) = group.add_task_by_tgid(cgroups_rs::CgroupPid { pid }) {
            let _ = child.kill();
            let _ = child.wait();
            let _ = group.delete();
            return Err(anyhow::Error::new(e).context("could not add process to cgroup"));
        }

        Ok(LimitedProcess {
            child,
            cgroup: Some(group),
            cleaned_up: false,
        })
    }

    /// Start `program` without any memory or CPU confinement.
    pub fn launch_without_container(program: &Path, allow_stderr: bool) -> anyhow::Result<LimitedProcess> {
        let child = create_process(program, allow_stderr).context("could not create process")?;

        Ok(LimitedProcess {
            child,
            cgroup: None,
            cleaned_up: false,
        })
    }

    pub fn try_kill(&mut self, max_duration: Duration) -> anyhow::Result<()> {
        match &self.cgroup {
            Some(cgroup) => {
                kill_process_group(&self.child);
                cgroup.kill().context("could not kill process")?;
                wait_for_empty_cgroup(cgroup, max_duration).context("process cleanup timed out")?;
                let _ = self.child.wait();
                self.cleaned_up = true;
                if let Err(e) = cgroup.delete() {
                    warn!("Failed to remove cgroup. If this happens a lot, it may slow down the computer. {e}");
                }
                Ok(())
            }
            None => {
                kill_process_group(&self.child);
                self.child.kill().context("could not kill process")?;
                let _ = self.child.wait();
                self.cleaned_up = true;
                Ok(())
            }
        }
    }

    /// Kill whatever a process that exited on its own left running, then remove its cgroup.
    pub fn release(&mut self) {
        kill_process_group(&self.child);
        if let Some(cgroup) = &self.cgroup {
            if !cgroup.tasks().is_empty() {
                if let Err(e) = cgroup.kill() {
                    warn!("could not kill leftover processes: {e}");
                }
                if let Err(e) = wait_for_empty_cgroup(cgroup, CLEANUP_DURATION) {
                    warn!("{e:#}");
                }
            }
            if let Err(e) = cgroup.delete() {
                warn!("Failed to remove cgroup: {e}");
            }
        }
        self.cleaned_up = true;
    }
}

impl Drop for LimitedProcess {
    fn drop(&mut self) {
        if !self.cleaned_up {
            if let Err(e) = self.try_kill(CLEANUP_DURATION) {
                warn!("could not kill process {} on drop: {e:#}", self.child.id());
            }
        }
    }
}
