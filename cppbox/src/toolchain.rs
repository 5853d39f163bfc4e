use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::time;
use tracing::{debug, warn};

use crate::error::Error;

const PROBE_DEADLINE: Duration = Duration::from_secs(5);

/// Fixed compilation flag set: standard revision pinned, no optimization,
/// warnings on.
const FLAGS: [&str; 3] = ["-std=c++17", "-O0", "-Wall"];

/// Raw product of one compiler invocation. A non-zero compiler exit is an
/// expected outcome, carried here rather than surfaced as an error.
#[derive(Debug, Clone)]
pub struct CompileOutcome {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    /// The compiler was killed at its deadline; stderr is empty or partial
    pub timed_out: bool,
}

/// Handle to the external C++ compiler.
#[derive(Debug, Clone)]
pub struct Toolchain {
    compiler: PathBuf,
}

impl Toolchain {
    /// Resolve `compiler` on PATH, falling back to the literal value; whether
    /// the binary actually works is the probe's business.
    pub fn resolve(compiler: &str) -> Self {
        let compiler = which::which(compiler).unwrap_or_else(|_| PathBuf::from(compiler));
        Self { compiler }
    }

    pub fn compiler_path(&self) -> &Path {
        &self.compiler
    }

    /// Compile `source` into `artifact` within `deadline`.
    ///
    /// Returns `Err` only when the toolchain cannot be invoked at all; a
    /// rejected program or an expired deadline is a failed `CompileOutcome`.
    pub async fn compile(
        &self,
        source: &Path,
        artifact: &Path,
        deadline: Duration,
    ) -> Result<CompileOutcome, Error> {
        let child = Command::new(&self.compiler)
            .arg(source)
            .arg("-o")
            .arg(artifact)
            .args(FLAGS)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::ToolchainUnavailable(format!("{}: {e}", self.compiler.display()))
            })?;

        match time::timeout(deadline, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let outcome = CompileOutcome {
                    success: output.status.success(),
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                    timed_out: false,
                };
                debug!(success = outcome.success, source = %source.display(), "compiler finished");
                Ok(outcome)
            }
            Ok(Err(e)) => Err(Error::Io(e)),
            Err(_) => {
                // Dropping the timed-out future reaps the compiler
                // (kill_on_drop).
                warn!(deadline_ms = deadline.as_millis() as u64, "compiler deadline expired");
                Ok(CompileOutcome {
                    success: false,
                    stdout: String::new(),
                    stderr: String::new(),
                    timed_out: true,
                })
            }
        }
    }

    /// Ask the compiler for its version banner. Failure here means the
    /// toolchain is unusable, which operators see via the health endpoint.
    pub async fn probe(&self) -> Result<String, Error> {
        let output = time::timeout(
            PROBE_DEADLINE,
            Command::new(&self.compiler).arg("--version").output(),
        )
        .await
        .map_err(|_| {
            Error::ToolchainUnavailable(format!("{}: probe timed out", self.compiler.display()))
        })?
        .map_err(|e| Error::ToolchainUnavailable(format!("{}: {e}", self.compiler.display())))?;

        if !output.status.success() {
            return Err(Error::ToolchainUnavailable(format!(
                "{}: probe exited with {}",
                self.compiler.display(),
                output.status
            )));
        }

        let banner = String::from_utf8_lossy(&output.stdout);
        Ok(banner.lines().next().unwrap_or_default().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn gxx() -> Option<Toolchain> {
        which::which("g++").ok().map(|_| Toolchain::resolve("g++"))
    }

    #[tokio::test]
    async fn compiles_valid_source() {
        let Some(toolchain) = gxx() else {
            eprintln!("g++ not installed, skipping");
            return;
        };
        let dir = tempdir().unwrap();
        let source = dir.path().join("ok.cpp");
        tokio::fs::write(&source, "int main() { return 0; }\n")
            .await
            .unwrap();
        let artifact = dir.path().join("ok");

        let outcome = toolchain
            .compile(&source, &artifact, Duration::from_secs(60))
            .await
            .unwrap();
        assert!(outcome.success);
        assert!(!outcome.timed_out);
        assert!(artifact.exists());
    }

    #[tokio::test]
    async fn broken_source_is_an_outcome_not_an_error() {
        let Some(toolchain) = gxx() else {
            eprintln!("g++ not installed, skipping");
            return;
        };
        let dir = tempdir().unwrap();
        let source = dir.path().join("bad.cpp");
        tokio::fs::write(&source, "int main() { return\n").await.unwrap();
        let artifact = dir.path().join("bad");

        let outcome = toolchain
            .compile(&source, &artifact, Duration::from_secs(60))
            .await
            .unwrap();
        assert!(!outcome.success);
        assert!(!outcome.timed_out);
        assert!(outcome.stderr.contains("error"));
    }

    #[tokio::test]
    async fn missing_compiler_is_unavailable() {
        let toolchain = Toolchain::resolve("definitely-not-a-compiler");
        let err = toolchain
            .compile(
                Path::new("a.cpp"),
                Path::new("a.out"),
                Duration::from_secs(1),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ToolchainUnavailable(_)));
        assert!(toolchain.probe().await.is_err());
    }
}
