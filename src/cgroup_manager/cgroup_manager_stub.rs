use std::{path::Path, process::Child, time::Duration};

use anyhow::{self, bail, Context};

use super::{create_process, kill_process_group};

#[derive(Debug)]
pub struct LimitedProcess {
    pub child: Child,
    cleaned_up: bool,
}

impl LimitedProcess {
    pub fn launch(
        _program: &Path,
        _max_memory: i64,
        _cpus: &str,
        _allow_stderr: bool,
    ) -> anyhow::Result<LimitedProcess> {
        bail!("cgroups only available on linux")
    }

    pub fn launch_without_container(program: &Path, allow_stderr: bool) -> anyhow::Result<LimitedProcess> {
        let child = create_process(program, allow_stderr).context("could not create process")?;

        Ok(LimitedProcess {
            child,
            cleaned_up: false,
        })
    }

    pub fn try_kill(&mut self, _max_duration: Duration) -> anyhow::Result<()> {
        kill_process_group(&self.child);
        self.child.kill().context("could not kill process")?;
        let _ = self.child.wait();
        self.cleaned_up = true;
        Ok(())
    }

    pub fn release(&mut self) {
        kill_process_group(&self.child);
        self.cleaned_up = true;
    }
}

impl Drop for LimitedProcess {
    fn drop(&mut self) {
        if !self.cleaned_up {
            if let Err(e) = self.try_kill(Duration::from_millis(100)) {
                tracing::warn!("could not kill process {} on drop: {e:#}", self.child.id());
            }
        }
    }
}
