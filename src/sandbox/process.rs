use std::{
    fs,
    io::{Read, Write},
    path::{Path, PathBuf},
    sync::mpsc::{self, RecvTimeoutError},
    time::{Duration, Instant},
};

use anyhow::Context;
use tracing::{debug, instrument, warn};

use super::{
    compiler, wait_with_deadline, ArchiveToken, Interrupt, ProgramHandle, Role, RunLimits, Sandbox,
    Waited,
};
use crate::{
    cgroup_manager::LimitedProcess,
    configuration::Configuration,
    error::{BuildError, RunError},
};

const KILL_GRACE: Duration = Duration::from_millis(500);

/// Runs programs as local processes, confined with cgroups v2 when available.
///
/// Built programs are copied into `<root>/store`. Archiving moves them to `<root>/archive`,
/// out of reach of builds that look at the store.
#[derive(Debug)]
pub struct ProcessSandbox {
    store: PathBuf,
    archive: PathBuf,
    config: Configuration,
}

impl ProcessSandbox {
    /// Create a sandbox keeping its programs under `root`.
    ///
    /// # Errors
    /// Returned when the store directories cannot be created.
    pub fn new(root: impl AsRef<Path>, config: Configuration) -> anyhow::Result<Self> {
        let root = root.as_ref();
        let store = root.join("store");
        let archive = root.join("archive");
        fs::create_dir_all(&store).with_context(|| format!("could not create {}", store.display()))?;
        fs::create_dir_all(&archive)
            .with_context(|| format!("could not create {}", archive.display()))?;
        Ok(Self {
            store,
            archive,
            config,
        })
    }

    fn launch(&self, program: &ProgramHandle, limits: &RunLimits) -> Result<LimitedProcess, RunError> {
        let allow_stderr = self.config.debug_program_stderr;
        let max_memory = limits
            .memory_mb
            .map(|mb| mb.saturating_mul(1_000_000).min(i64::MAX as u64) as i64)
            .unwrap_or(0);
        match LimitedProcess::launch(program.path(), max_memory, &limits.cpus, allow_stderr) {
            Ok(process) => Ok(process),
            Err(e) if self.config.allow_uncontained => {
                warn!("running {} uncontained: {e:#}", program.tag());
                LimitedProcess::launch_without_container(program.path(), allow_stderr)
                    .map_err(|e| RunError::Launch(format!("{e:#}")))
            }
            Err(e) => Err(RunError::Launch(format!("{e:#}"))),
        }
    }
}

fn kill(process: &mut LimitedProcess, tag: &str) {
    if let Err(e) = process.try_kill(KILL_GRACE) {
        warn!("could not kill {tag}: {e:#}");
    }
}

impl Sandbox for ProcessSandbox {
    #[instrument(skip(self, interrupt))]
    fn build(
        &self,
        program_dir: &Path,
        team: &str,
        role: Role,
        timeout: Duration,
        interrupt: &Interrupt,
    ) -> Result<ProgramHandle, BuildError> {
        let built = if self.config.compile_programs {
            compiler::compile_program(program_dir, role, timeout, interrupt)?
        } else {
            compiler::collect_binary(program_dir)?
        };

        let handle = ProgramHandle::new(team, role, self.store.join(format!("{role}-{team}")));
        fs::copy(&built, handle.path()).with_context(|| {
            format!("could not copy {} into the program store", built.display())
        })?;
        debug!("stored {} at {}", handle.tag(), handle.path().display());
        Ok(handle)
    }

    fn run(
        &self,
        program: &ProgramHandle,
        input: &[u8],
        limits: &RunLimits,
        interrupt: &Interrupt,
    ) -> Result<Vec<u8>, RunError> {
        if interrupt.is_triggered() {
            return Err(RunError::Interrupted);
        }
        let tag = program.tag();
        let started = Instant::now();
        let mut process = self.launch(program, limits)?;

        // Feed and drain the pipes on their own threads so a chatty program cannot dead-lock us.
        // The writer is detached: it ends with a broken pipe once the program's group is gone.
        let stdin = process.child.stdin.take();
        let input = input.to_vec();
        let writer_tag = tag.clone();
        std::thread::spawn(move || {
            if let Some(mut stdin) = stdin {
                if let Err(e) = stdin.write_all(&input) {
                    debug!("could not feed {writer_tag}: {e}");
                }
            }
        });
        let stdout = process.child.stdout.take();
        let (output_tx, output_rx) = mpsc::channel();
        std::thread::spawn(move || {
            let mut output = vec![];
            let read = match stdout {
                Some(mut stdout) => stdout.read_to_end(&mut output).map(|_| output),
                None => Ok(output),
            };
            let _ = output_tx.send(read);
        });

        let status = match wait_with_deadline(&mut process.child, limits.timeout, interrupt) {
            Waited::Exited(status) => status,
            Waited::TimedOut => {
                debug!("{tag} timed out");
                kill(&mut process, &tag);
                return Err(RunError::Timeout(limits.timeout));
            }
            Waited::Interrupted => {
                kill(&mut process, &tag);
                return Err(RunError::Interrupted);
            }
            Waited::Failed(e) => {
                kill(&mut process, &tag);
                return Err(RunError::Launch(e.to_string()));
            }
        };
        // Background processes still holding stdout would keep the reader waiting.
        process.release();

        let remaining = limits.timeout.saturating_sub(started.elapsed());
        let output = match output_rx.recv_timeout(remaining) {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                debug!("could not read the output of {tag}: {e}");
                return Err(RunError::Output(e.to_string()));
            }
            Err(RecvTimeoutError::Timeout) => {
                debug!("{tag} kept its output open past the timeout");
                return Err(RunError::Timeout(limits.timeout));
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(RunError::Output("output reader stopped".to_string()));
            }
        };
        if !status.success() {
            return Err(RunError::NonZeroExit(status.code()));
        }
        if output.is_empty() {
            return Err(RunError::NoOutput);
        }
        Ok(output)
    }

    fn archive(&self, program: ProgramHandle) -> anyhow::Result<ArchiveToken> {
        let location = self.archive.join(program.tag());
        fs::rename(program.path(), &location)
            .with_context(|| format!("could not archive {}", program.tag()))?;
        Ok(ArchiveToken::new(program, location))
    }

    fn restore(&self, token: ArchiveToken) -> anyhow::Result<ProgramHandle> {
        fs::rename(token.location(), token.program().path())
            .with_context(|| format!("could not restore {}", token.program().tag()))?;
        Ok(token.program().clone())
    }

    fn release(&self, program: ProgramHandle) {
        match fs::remove_file(program.path()) {
            Ok(()) => debug!("released {}", program.tag()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("could not release {}: {e}", program.tag()),
        }
    }

    fn discard(&self, token: ArchiveToken) {
        let tag = token.program().tag();
        for path in [token.location(), token.program().path()] {
            match fs::remove_file(path) {
                Ok(()) => debug!("discarded {tag} at {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("could not discard {tag}: {e}"),
            }
        }
    }
}

#[cfg(test)]
mod process_tests {
    use super::*;

    #[test]
    fn archive_moves_program_out_of_the_store() {
        let root = tempfile::tempdir().unwrap();
        let sandbox = ProcessSandbox::new(root.path(), Configuration::new()).unwrap();
        let handle = ProgramHandle::new("blue", Role::Generator, root.path().join("store/generator-blue"));
        fs::write(handle.path(), "bin").unwrap();

        let token = sandbox.archive(handle.clone()).unwrap();
        assert!(!handle.path().exists());
        assert!(token.location().exists());

        let restored = sandbox.restore(token).unwrap();
        assert_eq!(restored, handle);
        assert!(handle.path().exists());

        sandbox.release(restored);
        assert!(!handle.path().exists());
    }

    #[test]
    fn discard_removes_the_archive() {
        let root = tempfile::tempdir().unwrap();
        let sandbox = ProcessSandbox::new(root.path(), Configuration::new()).unwrap();
        let handle = ProgramHandle::new("blue", Role::Solver, root.path().join("store/solver-blue"));
        fs::write(handle.path(), "bin").unwrap();

        let token = sandbox.archive(handle.clone()).unwrap();
        let location = token.location().to_path_buf();
        sandbox.discard(token);
        assert!(!location.exists());
        assert!(!handle.path().exists());
    }

    #[test]
    fn interrupted_run_never_launches() {
        let root = tempfile::tempdir().unwrap();
        let sandbox = ProcessSandbox::new(root.path(), Configuration::new()).unwrap();
        let handle = ProgramHandle::new("blue", Role::Solver, root.path().join("missing"));
        let interrupt = Interrupt::new();
        interrupt.trigger();
        let limits = RunLimits {
            timeout: Duration::from_secs(1),
            memory_mb: None,
            cpus: String::new(),
        };
        assert_eq!(
            sandbox.run(&handle, b"", &limits, &interrupt),
            Err(RunError::Interrupted)
        );
    }
}
