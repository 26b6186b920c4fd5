//! The PHREEQC child process and its lifecycle.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use deck::Deck;

use crate::table::{parse_selected_output, PunchTable};
use crate::{ConvergenceFailure, Result, SolverError};

/// Environment variable naming the PHREEQC executable.
pub const PHREEQC_EXE_ENV: &str = "PHREEQC_EXE";

/// Environment variable overriding the wall-clock limit (seconds).
pub const TIMEOUT_ENV: &str = "MCP_SIMULATION_TIMEOUT_S";

/// Environment variable pointing at the installation root that carries
/// `databases/` and `calibrations/`.
pub const ROOT_ENV: &str = "IX_DESIGN_MCP_ROOT";

const DEFAULT_TIMEOUT_S: u64 = 600;
const POLL_INTERVAL: Duration = Duration::from_millis(25);
const TAIL_CAP_BYTES: usize = 64 * 1024;

/// Cooperative cancellation handle. Clones share the flag; any clone can
/// cancel, and the runner checks it between polls.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Everything a finished run hands back to the parser.
#[derive(Debug, Clone)]
pub struct RunArtifacts {
    pub table: PunchTable,

    /// Last 64 KiB of process stdout
    pub stdout_tail: String,

    /// Last 64 KiB of process stderr
    pub stderr_tail: String,

    /// Convergence diagnostic found in the output of a zero-exit run;
    /// PHREEQC sometimes reports and then limps to completion
    pub convergence: Option<ConvergenceFailure>,

    /// Wall-clock solve time (seconds)
    pub solve_time_s: f64,
}

/// Supervises one PHREEQC invocation per call.
#[derive(Debug, Clone)]
pub struct PhreeqcRunner {
    exe: PathBuf,
    databases_dir: Option<PathBuf>,
    timeout: Duration,
}

impl PhreeqcRunner {
    pub fn new(exe: PathBuf, databases_dir: Option<PathBuf>, timeout: Duration) -> Self {
        PhreeqcRunner {
            exe,
            databases_dir,
            timeout,
        }
    }

    /// Resolve the runner from the environment: `PHREEQC_EXE`, then a
    /// `phreeqc` binary on PATH; `MCP_SIMULATION_TIMEOUT_S` and
    /// `IX_DESIGN_MCP_ROOT` are honored when present.
    pub fn from_env() -> Result<Self> {
        let exe = match std::env::var_os(PHREEQC_EXE_ENV) {
            Some(path) => {
                let path = PathBuf::from(path);
                if !path.is_file() {
                    return Err(SolverError::NotInstalled(format!(
                        "{} points at {}, which does not exist",
                        PHREEQC_EXE_ENV,
                        path.display()
                    )));
                }
                path
            }
            None => find_on_path("phreeqc").ok_or_else(|| {
                SolverError::NotInstalled(format!(
                    "no 'phreeqc' on PATH and {} unset",
                    PHREEQC_EXE_ENV
                ))
            })?,
        };

        let timeout = std::env::var(TIMEOUT_ENV)
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_S);

        let databases_dir = std::env::var_os(ROOT_ENV)
            .map(|root| PathBuf::from(root).join("databases"));

        Ok(PhreeqcRunner::new(
            exe,
            databases_dir,
            Duration::from_secs(timeout),
        ))
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Override the wall-clock limit.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn database_path(&self, deck: &Deck) -> PathBuf {
        match &self.databases_dir {
            Some(dir) => dir.join(deck.database.file_name()),
            None => PathBuf::from(deck.database.file_name()),
        }
    }

    /// Run one deck to completion.
    ///
    /// The scratch directory is dropped on every exit path, and the child
    /// is killed on drop, so a panicking caller or a fired cancel token
    /// never leaks a process or a directory.
    pub fn run(&self, deck: &Deck, cancel: &CancelToken) -> Result<RunArtifacts> {
        if cancel.is_canceled() {
            return Err(SolverError::Canceled);
        }

        let scratch = tempfile::TempDir::new()?;
        let input_path = scratch.path().join("input.pqi");
        let output_path = scratch.path().join("output.pqo");
        let punch_path = scratch.path().join(&deck.punch_file);
        std::fs::write(&input_path, &deck.text)?;

        let database = self.database_path(deck);
        debug!(
            exe = %self.exe.display(),
            database = %database.display(),
            "spawning PHREEQC"
        );

        let started = Instant::now();
        let child = Command::new(&self.exe)
            .arg(&input_path)
            .arg(&output_path)
            .arg(&database)
            .current_dir(scratch.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    SolverError::NotInstalled(self.exe.display().to_string())
                } else {
                    SolverError::Io(e)
                }
            })?;
        let mut child = ChildGuard::new(child);

        let stdout_reader = spawn_tail_reader(child.inner.stdout.take());
        let stderr_reader = spawn_tail_reader(child.inner.stderr.take());

        let deadline = started + self.timeout;
        let status = loop {
            if let Some(status) = child.inner.try_wait()? {
                break status;
            }
            if cancel.is_canceled() {
                child.kill_now();
                drain(stdout_reader);
                drain(stderr_reader);
                return Err(SolverError::Canceled);
            }
            if Instant::now() >= deadline {
                warn!(timeout_s = self.timeout.as_secs(), "PHREEQC timed out, killing");
                child.kill_now();
                drain(stdout_reader);
                let stderr_tail = drain(stderr_reader);
                return Err(SolverError::Timeout {
                    seconds: self.timeout.as_secs(),
                    stderr_tail,
                });
            }
            thread::sleep(POLL_INTERVAL);
        };
        child.reaped();

        let solve_time_s = started.elapsed().as_secs_f64();
        let stdout_tail = drain(stdout_reader);
        let stderr_tail = drain(stderr_reader);

        let punch_text = std::fs::read_to_string(&punch_path).unwrap_or_default();

        if !status.success() {
            let code = status.code().unwrap_or(-1);
            // A recognized convergence diagnostic is a domain outcome, not
            // a process failure; carry the rows written so far upward.
            if let Some(failure) =
                ConvergenceFailure::scan(&stderr_tail).or_else(|| ConvergenceFailure::scan(&stdout_tail))
            {
                return Err(SolverError::NotConverged {
                    failure,
                    partial: parse_selected_output(&punch_text).ok(),
                    stderr_tail,
                });
            }
            return Err(SolverError::NonZeroExit { code, stderr_tail });
        }

        let table = parse_selected_output(&punch_text)?;
        let convergence =
            ConvergenceFailure::scan(&stderr_tail).or_else(|| ConvergenceFailure::scan(&stdout_tail));
        info!(
            rows = table.rows(),
            dropped = table.dropped_rows,
            solve_time_s,
            "PHREEQC run complete"
        );

        Ok(RunArtifacts {
            table,
            stdout_tail,
            stderr_tail,
            convergence,
            solve_time_s,
        })
    }
}

/// Kills the child on drop unless the caller already reaped it.
struct ChildGuard {
    inner: Child,
    live: bool,
}

impl ChildGuard {
    fn new(inner: Child) -> Self {
        ChildGuard { inner, live: true }
    }

    fn kill_now(&mut self) {
        if self.live {
            let _ = self.inner.kill();
            let _ = self.inner.wait();
            self.live = false;
        }
    }

    fn reaped(&mut self) {
        self.live = false;
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        self.kill_now();
    }
}

/// Read a process stream to EOF, keeping only the final 64 KiB.
fn spawn_tail_reader<R: Read + Send + 'static>(
    stream: Option<R>,
) -> Option<JoinHandle<Vec<u8>>> {
    stream.map(|mut stream| {
        thread::spawn(move || {
            let mut tail: Vec<u8> = Vec::new();
            let mut chunk = [0u8; 8192];
            while let Ok(n) = stream.read(&mut chunk) {
                if n == 0 {
                    break;
                }
                tail.extend_from_slice(&chunk[..n]);
                if tail.len() > TAIL_CAP_BYTES {
                    let excess = tail.len() - TAIL_CAP_BYTES;
                    tail.drain(..excess);
                }
            }
            tail
        })
    })
}

fn drain(handle: Option<JoinHandle<Vec<u8>>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}

fn find_on_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path_var) {
        let candidate = dir.join(name);
        if is_executable(&candidate) {
            return Some(candidate);
        }
    }
    None
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.is_file()
        && path
            .metadata()
            .map(|m| m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use deck::{Database, Deck};

    /// A deck stub; the fake executables below never read it.
    fn stub_deck() -> Deck {
        Deck {
            text: "TITLE stub\nEND\n".into(),
            database: Database::Phreeqc,
            phases: vec![],
            punch_file: "selected.dat".into(),
            regenerant_bv: 0.0,
        }
    }

    /// Write an executable shell script standing in for PHREEQC.
    fn fake_exe(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("phreeqc-fake");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    fn runner(exe: PathBuf) -> PhreeqcRunner {
        PhreeqcRunner::new(exe, None, Duration::from_secs(5))
    }

    const TABLE_BODY: &str = r#"cat > selected.dat <<'EOF'
shift bv phase Ca_mg_L Mg_mg_L Na_mg_L K_mg_L pH alk_mg_L_CaCO3 hardness_mg_L_CaCO3
1 0.0625 2 0.1 0.05 930 0 7.9 99.9 0.455
2 0.125 2 0.2 0.08 929 0 7.9 99.8 0.828
bad row
EOF"#;

    #[test]
    fn successful_run_parses_table_and_counts_drops() {
        let dir = tempfile::TempDir::new().unwrap();
        let exe = fake_exe(dir.path(), TABLE_BODY);
        let artifacts = runner(exe).run(&stub_deck(), &CancelToken::new()).unwrap();
        assert_eq!(artifacts.table.rows(), 2);
        assert_eq!(artifacts.table.dropped_rows, 1);
        assert!(artifacts.convergence.is_none());
        assert!(artifacts.solve_time_s >= 0.0);
    }

    #[test]
    fn nonzero_exit_surfaces_code_and_stderr() {
        let dir = tempfile::TempDir::new().unwrap();
        let exe = fake_exe(dir.path(), "echo 'ERROR: input file scrambled' >&2\nexit 3");
        let err = runner(exe).run(&stub_deck(), &CancelToken::new()).unwrap_err();
        match err {
            SolverError::NonZeroExit { code, stderr_tail } => {
                assert_eq!(code, 3);
                assert!(stderr_tail.contains("scrambled"));
            }
            other => panic!("expected NonZeroExit, got {:?}", other),
        }
    }

    #[test]
    fn convergence_diagnostic_keeps_partial_rows() {
        let dir = tempfile::TempDir::new().unwrap();
        let body = format!(
            "{}\necho 'The model has not converged for cell 7' >&2\nexit 1",
            TABLE_BODY
        );
        let exe = fake_exe(dir.path(), &body);
        let err = runner(exe).run(&stub_deck(), &CancelToken::new()).unwrap_err();
        match err {
            SolverError::NotConverged {
                failure, partial, ..
            } => {
                assert_eq!(failure, ConvergenceFailure::NotConverged);
                assert_eq!(partial.unwrap().rows(), 2);
            }
            other => panic!("expected NotConverged, got {:?}", other),
        }
    }

    #[test]
    fn timeout_kills_the_child() {
        let dir = tempfile::TempDir::new().unwrap();
        let exe = fake_exe(dir.path(), "sleep 30");
        let started = Instant::now();
        let err = runner(exe)
            .with_timeout(Duration::from_secs(1))
            .run(&stub_deck(), &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, SolverError::Timeout { seconds: 1, .. }));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn pre_canceled_token_short_circuits() {
        let dir = tempfile::TempDir::new().unwrap();
        let exe = fake_exe(dir.path(), "sleep 30");
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = runner(exe).run(&stub_deck(), &cancel).unwrap_err();
        assert!(matches!(err, SolverError::Canceled));
    }

    #[test]
    fn missing_executable_is_not_installed() {
        let err = runner(PathBuf::from("/nonexistent/phreeqc"))
            .run(&stub_deck(), &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, SolverError::NotInstalled(_)));
    }

    #[test]
    fn missing_punch_file_is_malformed_output() {
        let dir = tempfile::TempDir::new().unwrap();
        let exe = fake_exe(dir.path(), "exit 0");
        let err = runner(exe).run(&stub_deck(), &CancelToken::new()).unwrap_err();
        assert!(matches!(err, SolverError::MalformedOutput { .. }));
    }
}
