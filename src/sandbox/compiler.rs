use std::{
    io::Read,
    path::{Path, PathBuf},
    process::{Command, Stdio},
    time::Duration,
};

use anyhow::{anyhow, bail, Context};
use tracing::{error, instrument, warn};

use super::{wait_with_deadline, Interrupt, Role, Waited};
use crate::error::BuildError;

/// Compile the program crate in `dir`. The crate must define a binary named after `role`.
#[instrument(skip(interrupt))]
pub(super) fn compile_program(
    dir: &Path,
    role: Role,
    timeout: Duration,
    interrupt: &Interrupt,
) -> Result<PathBuf, BuildError> {
    let bin_name = role.as_str();
    //TODO: --offline to prevent using other crates than expected ?
    let args = [
        "build",
        "--release",
        "--bin",
        bin_name,
        "--message-format",
        "short",
    ];

    let dir = dir
        .canonicalize()
        .with_context(|| format!("program folder '{}' not found", dir.display()))?;
    let target_dir = dir.join("target");

    let mut proc = Command::new("cargo")
        .args(args)
        .current_dir(&dir)
        .env("CARGO_TARGET_DIR", &target_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .context("could not launch command 'cargo'")?;

    let stderr = proc.stderr.take();
    let stderr_reader = std::thread::spawn(move || {
        let mut output = String::new();
        if let Some(mut stderr) = stderr {
            let _ = stderr.read_to_string(&mut output);
        }
        output
    });

    let status = match wait_with_deadline(&mut proc, timeout, interrupt) {
        Waited::Exited(status) => status,
        Waited::TimedOut => {
            let _ = proc.kill();
            let _ = proc.wait();
            warn!("compilation of {} timed out", dir.display());
            return Err(BuildError::Timeout(timeout));
        }
        Waited::Interrupted => {
            let _ = proc.kill();
            let _ = proc.wait();
            return Err(BuildError::Interrupted);
        }
        Waited::Failed(e) => {
            let _ = proc.kill();
            return Err(BuildError::Io(anyhow!(e).context("failed to wait for end of compilation")));
        }
    };

    let output = stderr_reader.join().unwrap_or_default();
    if status.success() {
        Ok(target_dir
            .join("release")
            .join(format!("{bin_name}{}", std::env::consts::EXE_SUFFIX)))
    } else {
        let output = output.trim();
        error!("compilation error: {output}");
        Err(BuildError::Failed(format!(
            "compilation error: {}",
            output.lines().last().unwrap_or_default()
        )))
    }
}

/// Find the single prebuilt executable in `dir`.
#[instrument]
pub(super) fn collect_binary(dir: &Path) -> anyhow::Result<PathBuf> {
    let metadata = dir
        .metadata()
        .with_context(|| format!("error reading '{}'", dir.display()))?;
    if !metadata.is_dir() {
        bail!("'{}' is not a directory", dir.display());
    }

    let entries = std::fs::read_dir(dir)
        .context("error reading directory")?
        .collect::<Result<Vec<_>, _>>()
        .context("one entry cannot be read in directory")?;
    let [entry] = entries.as_slice() else {
        bail!("directory contains {} elements instead of 1", entries.len());
    };

    let metadata = entry.metadata().context("could not read program metadata")?;
    if !metadata.is_file() {
        bail!("{:?} is not a file", entry.file_name());
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if metadata.permissions().mode() & 0o111 == 0 {
            bail!("{:?} is not executable", entry.file_name());
        }
    }
    Ok(entry.path())
}

#[cfg(test)]
mod compiler_tests {
    use super::*;

    #[test]
    fn collect_binary_needs_exactly_one_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(collect_binary(dir.path()).is_err());

        std::fs::write(dir.path().join("a"), "x").unwrap();
        std::fs::write(dir.path().join("b"), "x").unwrap();
        let err = collect_binary(dir.path()).unwrap_err();
        assert!(err.to_string().contains("2 elements"));
    }

    #[cfg(unix)]
    #[test]
    fn collect_binary_requires_executable() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prog");
        std::fs::write(&path, "#!/bin/sh\n").unwrap();
        assert!(collect_binary(dir.path()).is_err());

        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        assert_eq!(collect_binary(dir.path()).unwrap(), path);
    }

    #[test]
    fn missing_folder_is_a_build_error() {
        let res = compile_program(
            Path::new("/definitely/not/here"),
            Role::Generator,
            Duration::from_secs(1),
            &Interrupt::new(),
        );
        assert!(matches!(res, Err(BuildError::Io(_))));
    }
}
