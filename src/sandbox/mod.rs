//! Building and running team programs.
//!
//! The arena only talks to programs through the [`Sandbox`] trait: build a program folder into
//! a runnable [`ProgramHandle`], run it on some input under [`RunLimits`], and manage the
//! lifetime of what was built (archive, restore, release).
//!
//! [`ProcessSandbox`] is the provided implementation. It compiles program crates with `cargo`
//! (or collects prebuilt binaries), keeps the results in a program store, and runs them as
//! cgroup-limited processes fed through stdin/stdout.

use std::{
    fmt::Display,
    path::{Path, PathBuf},
    process::{Child, ExitStatus},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use crate::error::{BuildError, RunError};

mod compiler;
mod process;

pub use process::ProcessSandbox;

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// The two programs every team provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Produces instances (and certificates).
    Generator,
    /// Solves instances.
    Solver,
}

impl Role {
    /// Lowercase role name, also used as the binary name of compiled programs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Generator => "generator",
            Role::Solver => "solver",
        }
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A built, runnable program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramHandle {
    team: String,
    role: Role,
    path: PathBuf,
}

impl ProgramHandle {
    /// Create a handle for the `role` program of `team`, stored at `path`.
    pub fn new(team: impl Into<String>, role: Role, path: impl Into<PathBuf>) -> Self {
        Self {
            team: team.into(),
            role,
            path: path.into(),
        }
    }

    /// Unique tag of this program, `"<role>-<team>"`.
    pub fn tag(&self) -> String {
        format!("{}-{}", self.role, self.team)
    }

    /// Owning team name.
    pub fn team(&self) -> &str {
        &self.team
    }

    /// Program role.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Location of the runnable program.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// A program moved out of the live program store by [`Sandbox::archive`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveToken {
    program: ProgramHandle,
    location: PathBuf,
}

impl ArchiveToken {
    /// Record that `program` is archived at `location`.
    pub fn new(program: ProgramHandle, location: impl Into<PathBuf>) -> Self {
        Self {
            program,
            location: location.into(),
        }
    }

    /// The archived program, as it was before archiving.
    pub fn program(&self) -> &ProgramHandle {
        &self.program
    }

    /// Where the archive lives.
    pub fn location(&self) -> &Path {
        &self.location
    }
}

/// Limits of one program run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLimits {
    /// Wall-clock timeout. The program is killed once it expires.
    pub timeout: Duration,
    /// Memory cap in MB, `None` for no cap.
    pub memory_mb: Option<u64>,
    /// CPUs the program may run on, as a cgroup cpu list. Empty means any.
    pub cpus: String,
}

/// Shared flag used to abort a running match.
///
/// Cloning is cheap; every clone observes the same flag.
#[derive(Debug, Clone, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    /// A new, untriggered interrupt.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request every holder of this interrupt to stop.
    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether [`trigger`](Self::trigger) was called.
    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Executes team programs in isolation.
///
/// Implementations must be usable from several battle workers at once.
pub trait Sandbox: Send + Sync {
    /// Build the program in `program_dir` as the `role` program of `team`.
    fn build(
        &self,
        program_dir: &Path,
        team: &str,
        role: Role,
        timeout: Duration,
        interrupt: &Interrupt,
    ) -> Result<ProgramHandle, BuildError>;

    /// Run `program` with `input` on stdin and return everything it wrote to stdout.
    ///
    /// Implementations must kill the program when the timeout expires or `interrupt` triggers.
    fn run(
        &self,
        program: &ProgramHandle,
        input: &[u8],
        limits: &RunLimits,
        interrupt: &Interrupt,
    ) -> Result<Vec<u8>, RunError>;

    /// Remove `program` from the live program store, keeping a restorable archive.
    fn archive(&self, program: ProgramHandle) -> anyhow::Result<ArchiveToken>;

    /// Bring an archived program back into the live store.
    fn restore(&self, token: ArchiveToken) -> anyhow::Result<ProgramHandle>;

    /// Delete a built program. Errors are logged, never returned.
    fn release(&self, program: ProgramHandle);

    /// Delete an archived program that could not be restored. Errors are logged, never returned.
    ///
    /// Defaults to releasing the program it was archived from.
    fn discard(&self, token: ArchiveToken) {
        self.release(token.program().clone());
    }
}

pub(crate) enum Waited {
    Exited(ExitStatus),
    TimedOut,
    Interrupted,
    Failed(std::io::Error),
}

/// Poll `child` until it exits, `timeout` expires or `interrupt` triggers. Never kills.
pub(crate) fn wait_with_deadline(child: &mut Child, timeout: Duration, interrupt: &Interrupt) -> Waited {
    let deadline = Instant::now().checked_add(timeout);
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Waited::Exited(status),
            Ok(None) => {}
            Err(e) => return Waited::Failed(e),
        }
        if interrupt.is_triggered() {
            return Waited::Interrupted;
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Waited::TimedOut;
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

#[cfg(test)]
mod sandbox_tests {
    use super::*;

    #[test]
    fn interrupt_is_shared_between_clones() {
        let interrupt = Interrupt::new();
        let clone = interrupt.clone();
        assert!(!clone.is_triggered());
        interrupt.trigger();
        assert!(clone.is_triggered());
    }

    #[test]
    fn tag_combines_role_and_team() {
        let handle = ProgramHandle::new("red", Role::Solver, "/tmp/x");
        assert_eq!(handle.tag(), "solver-red");
        assert_eq!(handle.role(), Role::Solver);
    }
}
