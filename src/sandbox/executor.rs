//! Compile-and-run pipeline for a single execution cell.
//!
//! The executor owns the whole lifecycle of one cell: materialize the
//! snippet into a fresh workspace, invoke the configuration's compiler,
//! and (when the expectation judges runtime behavior) execute the
//! artifact under kernel-enforced resource limits. Limits are installed
//! in the child between fork and exec, so they are in place before any
//! untrusted instruction runs, not racing the child's own setup.
//!
//! Compile failure, runtime crash, and timeout are first-class
//! `RawResult` data, never errors: observing them is the point of the
//! harness. Only `ToolchainUnavailable` and `SandboxSetupFailed`
//! surface as `ExecError`.

use crate::catalog::Snippet;
use crate::config::{Configuration, Limits};
use crate::sandbox::output::{CapturedStream, StreamCollector, StreamIntegrity};
use crate::sandbox::workspace::CellWorkspace;
use crate::types::{CancelToken, ExecError};
use nix::sys::resource::{setrlimit, Resource};
use nix::unistd::{setpgid, Pid};
use serde::{Deserialize, Serialize};
use std::io;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

/// Signal escalation report for forced-termination paths.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct KillReport {
    pub term_sent: bool,
    pub kill_sent: bool,
    pub waited_ms: u64,
    pub notes: Vec<String>,
}

/// Compiler invocation result.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompileRecord {
    pub success: bool,
    pub diagnostics: String,
    pub timed_out: bool,
    pub duration_ms: u64,
}

/// Child process result for an executed artifact.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunRecord {
    /// Exit code when the process exited normally.
    pub exit_code: Option<i32>,
    /// Terminating signal when the process crashed or was killed.
    pub signal: Option<i32>,
    /// The watchdog killed the process at the wall-clock limit.
    /// Distinct from a crash and from a natural signal exit.
    pub timed_out: bool,
    pub stdout: String,
    pub stderr: String,
    pub stdout_integrity: StreamIntegrity,
    pub stderr_integrity: StreamIntegrity,
    pub wall_time_ms: u64,
    pub kill_report: Option<KillReport>,
}

/// Raw, unclassified observation from one cell. Owned exclusively by
/// the executor while the cell runs, handed off immutably to the
/// classifier as a whole; no partial result is ever visible.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RawResult {
    pub compile: CompileRecord,
    /// Present only when compilation succeeded and the expectation
    /// judges runtime behavior.
    pub run: Option<RunRecord>,
    /// The global cancellation signal fired while this cell was in
    /// flight; whatever was observed is not attributable to the snippet.
    pub cancelled: bool,
}

struct Supervised {
    exit_code: Option<i32>,
    signal: Option<i32>,
    timed_out: bool,
    cancelled: bool,
    stdout: CapturedStream,
    stderr: CapturedStream,
    wall_time_ms: u64,
    kill_report: Option<KillReport>,
}

/// Compiles and runs snippets inside per-cell working areas under a
/// common base directory.
pub struct SandboxExecutor {
    base_dir: PathBuf,
}

impl SandboxExecutor {
    pub fn new(base_dir: PathBuf) -> io::Result<Self> {
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }

    /// Run one cell to a complete `RawResult`.
    pub fn run(
        &self,
        snippet: &Snippet,
        configuration: &Configuration,
        limits: &Limits,
        cancel: &CancelToken,
    ) -> std::result::Result<RawResult, ExecError> {
        let workspace = CellWorkspace::create(
            &self.base_dir,
            &snippet.id,
            &configuration.id,
            &snippet.source,
            snippet.standard.language().source_extension(),
        )
        .map_err(|e| ExecError::SandboxSetupFailed(e.to_string()))?;

        let compile = self.compile(configuration, &workspace, limits, cancel)?;
        if compile.timed_out || !compile.success {
            // Short-circuit: no artifact to run, or nothing trustworthy.
            let cancelled = cancel.is_cancelled();
            return Ok(RawResult {
                compile,
                run: None,
                cancelled,
            });
        }

        if !snippet.expectation.needs_execution() {
            return Ok(RawResult {
                compile,
                run: None,
                cancelled: false,
            });
        }

        let run = self.execute(&workspace, limits, cancel)?;
        let cancelled = run.1;
        Ok(RawResult {
            compile,
            run: Some(run.0),
            cancelled,
        })
    }

    fn compile(
        &self,
        configuration: &Configuration,
        workspace: &CellWorkspace,
        limits: &Limits,
        cancel: &CancelToken,
    ) -> std::result::Result<CompileRecord, ExecError> {
        let argv = configuration.compile_command(workspace.source_file(), workspace.artifact_file());
        log::debug!("compile: {argv:?}");

        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..])
            .current_dir(workspace.root())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        // Own process group so a hung compiler and its helpers can be
        // killed as a unit.
        unsafe {
            cmd.pre_exec(|| {
                setpgid(Pid::from_raw(0), Pid::from_raw(0)).map_err(errno_to_io)?;
                Ok(())
            });
        }

        let child = cmd.spawn().map_err(|e| match e.kind() {
            io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => {
                ExecError::ToolchainUnavailable(format!(
                    "{}: {e}",
                    configuration.compiler.display()
                ))
            }
            _ => ExecError::SandboxSetupFailed(format!("spawn(compiler): {e}")),
        })?;

        let supervised = supervise(child, limits.compile_wall_time, limits.max_output_bytes, cancel)
            .map_err(|e| ExecError::SandboxSetupFailed(format!("wait(compiler): {e}")))?;

        let mut diagnostics = supervised.stderr.into_lossy_string();
        let stdout = supervised.stdout.into_lossy_string();
        if !stdout.is_empty() {
            diagnostics.push_str(&stdout);
        }

        Ok(CompileRecord {
            success: supervised.exit_code == Some(0) && !supervised.timed_out,
            diagnostics,
            timed_out: supervised.timed_out,
            duration_ms: supervised.wall_time_ms,
        })
    }

    fn execute(
        &self,
        workspace: &CellWorkspace,
        limits: &Limits,
        cancel: &CancelToken,
    ) -> std::result::Result<(RunRecord, bool), ExecError> {
        let memory_bytes = limits.memory_bytes;
        let file_size_cap = limits.max_output_bytes as u64;

        let mut cmd = Command::new(workspace.artifact_file());
        cmd.current_dir(workspace.root())
            .env_clear()
            .env("PATH", "/usr/bin:/bin")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // Limits go in between fork and exec: by the time the artifact's
        // first instruction runs, the kernel is already enforcing them.
        unsafe {
            cmd.pre_exec(move || {
                setpgid(Pid::from_raw(0), Pid::from_raw(0)).map_err(errno_to_io)?;
                setrlimit(Resource::RLIMIT_CORE, 0, 0).map_err(errno_to_io)?;
                setrlimit(Resource::RLIMIT_FSIZE, file_size_cap, file_size_cap)
                    .map_err(errno_to_io)?;
                if let Some(bytes) = memory_bytes {
                    setrlimit(Resource::RLIMIT_AS, bytes, bytes).map_err(errno_to_io)?;
                }
                Ok(())
            });
        }

        let child = cmd
            .spawn()
            .map_err(|e| ExecError::SandboxSetupFailed(format!("spawn(artifact): {e}")))?;

        let supervised = supervise(child, limits.wall_time, limits.max_output_bytes, cancel)
            .map_err(|e| ExecError::SandboxSetupFailed(format!("wait(artifact): {e}")))?;

        let cancelled = supervised.cancelled;
        let stdout_integrity = supervised.stdout.integrity;
        let stderr_integrity = supervised.stderr.integrity;
        Ok((
            RunRecord {
                exit_code: supervised.exit_code,
                signal: supervised.signal,
                timed_out: supervised.timed_out,
                stdout: supervised.stdout.into_lossy_string(),
                stderr: supervised.stderr.into_lossy_string(),
                stdout_integrity,
                stderr_integrity,
                wall_time_ms: supervised.wall_time_ms,
                kill_report: supervised.kill_report,
            },
            cancelled,
        ))
    }
}

/// Watch a child until exit, wall-clock limit, or cancellation.
/// Collector threads drain the output pipes the whole time.
fn supervise(
    mut child: Child,
    wall_limit: Duration,
    output_cap: usize,
    cancel: &CancelToken,
) -> io::Result<Supervised> {
    let stdout = StreamCollector::spawn(child.stdout.take(), output_cap);
    let stderr = StreamCollector::spawn(child.stderr.take(), output_cap);

    let started = Instant::now();
    let mut timed_out = false;
    let mut cancelled = false;
    let mut kill_report = None;

    let status = loop {
        match child.try_wait()? {
            Some(status) => break status,
            None => {
                if cancel.is_cancelled() {
                    cancelled = true;
                } else if started.elapsed() > wall_limit {
                    timed_out = true;
                }
                if timed_out || cancelled {
                    kill_report = Some(terminate_cell_group(child.id() as i32));
                    break child.wait()?;
                }
                std::thread::sleep(Duration::from_millis(10));
            }
        }
    };

    Ok(Supervised {
        exit_code: status.code(),
        signal: status.signal(),
        timed_out,
        cancelled,
        stdout: stdout.finish(),
        stderr: stderr.finish(),
        wall_time_ms: started.elapsed().as_millis() as u64,
        kill_report,
    })
}

/// Grace window between SIGTERM and SIGKILL when tearing a cell down.
const KILL_GRACE: Duration = Duration::from_millis(150);

/// Forced teardown of a cell's whole process group: SIGTERM, a short
/// grace window, then SIGKILL. The artifact may have forked helpers
/// into its group, so the group id is signalled first; when the kernel
/// rejects that, the lone child pid still gets the signal.
fn terminate_cell_group(pid: i32) -> KillReport {
    let started = Instant::now();
    let mut report = KillReport::default();

    let deliver = |signal: libc::c_int, name: &str| -> Option<String> {
        if unsafe { libc::kill(-pid, signal) } == 0 {
            return None;
        }
        let cause = io::Error::last_os_error();
        let _ = unsafe { libc::kill(pid, signal) };
        Some(format!("{name} delivered to pid {pid} only ({cause})"))
    };

    report.notes.extend(deliver(libc::SIGTERM, "SIGTERM"));
    report.term_sent = true;

    std::thread::sleep(KILL_GRACE);

    report.notes.extend(deliver(libc::SIGKILL, "SIGKILL"));
    report.kill_sent = true;

    report.waited_ms = started.elapsed().as_millis() as u64;
    report
}

fn errno_to_io(errno: nix::errno::Errno) -> io::Error {
    io::Error::from_raw_os_error(errno as i32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Expectation;
    use crate::config::{LanguageStandard, OptLevel};
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    fn scratch(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("specbox-exec-test-{name}"))
    }

    /// Stand-in compiler: copies the source to the artifact path and
    /// marks it executable, so shell-script "snippets" run end to end
    /// without a real toolchain.
    fn write_fake_compiler(dir: &Path) -> PathBuf {
        fs::create_dir_all(dir).unwrap();
        let path = dir.join("fakecc");
        fs::write(
            &path,
            "#!/bin/sh\nout=\nsrc=\nwhile [ $# -gt 0 ]; do\n  case \"$1\" in\n    -o) out=\"$2\"; shift 2 ;;\n    -*) shift ;;\n    *) src=\"$1\"; shift ;;\n  esac\ndone\ncp \"$src\" \"$out\" && chmod +x \"$out\"\n",
        )
        .unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn snippet(source: &str, expectation: Expectation) -> Snippet {
        Snippet {
            id: "test_snippet".to_string(),
            source: source.to_string(),
            standard: LanguageStandard::C17,
            tags: Vec::new(),
            expectation,
        }
    }

    fn configuration(compiler: PathBuf) -> Configuration {
        Configuration {
            id: "fake-c17-O0".to_string(),
            compiler,
            standard: LanguageStandard::C17,
            opt_level: OptLevel::O0,
            extra_args: Vec::new(),
        }
    }

    #[test]
    fn missing_compiler_is_toolchain_unavailable() {
        let base = scratch("missing-compiler");
        let executor = SandboxExecutor::new(base.clone()).unwrap();
        let snip = snippet("#!/bin/sh\nexit 0\n", Expectation::MustCompile);
        let cfg = configuration(PathBuf::from("/nonexistent/compiler-xyz"));

        let err = executor
            .run(&snip, &cfg, &Limits::default(), &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, ExecError::ToolchainUnavailable(_)));
        let _ = fs::remove_dir_all(&base);
    }

    #[test]
    fn successful_run_captures_stdout_and_exit_code() {
        let base = scratch("success");
        let compiler = write_fake_compiler(&base.join("bin"));
        let executor = SandboxExecutor::new(base.clone()).unwrap();
        let snip = snippet(
            "#!/bin/sh\nprintf '0'\nexit 0\n",
            Expectation::DefinedOutcome {
                expected_stdout: "0".to_string(),
                expected_exit_code: 0,
            },
        );

        let raw = executor
            .run(
                &snip,
                &configuration(compiler),
                &Limits::default(),
                &CancelToken::new(),
            )
            .unwrap();

        assert!(raw.compile.success);
        let run = raw.run.expect("runtime expectation executes the artifact");
        assert_eq!(run.exit_code, Some(0));
        assert_eq!(run.signal, None);
        assert!(!run.timed_out);
        assert_eq!(run.stdout, "0");
        assert_eq!(run.stdout_integrity, StreamIntegrity::Complete);
        let _ = fs::remove_dir_all(&base);
    }

    #[test]
    fn compile_only_expectation_skips_execution() {
        let base = scratch("compile-only");
        let compiler = write_fake_compiler(&base.join("bin"));
        let executor = SandboxExecutor::new(base.clone()).unwrap();
        let snip = snippet("#!/bin/sh\nexit 0\n", Expectation::MustCompile);

        let raw = executor
            .run(
                &snip,
                &configuration(compiler),
                &Limits::default(),
                &CancelToken::new(),
            )
            .unwrap();
        assert!(raw.compile.success);
        assert!(raw.run.is_none());
        let _ = fs::remove_dir_all(&base);
    }

    #[test]
    fn compile_failure_short_circuits_with_diagnostics() {
        let base = scratch("compile-fail");
        let dir = base.join("bin");
        fs::create_dir_all(&dir).unwrap();
        let compiler = dir.join("failcc");
        fs::write(
            &compiler,
            "#!/bin/sh\necho 'error: cannot bind rvalue reference' >&2\nexit 1\n",
        )
        .unwrap();
        fs::set_permissions(&compiler, fs::Permissions::from_mode(0o755)).unwrap();

        let executor = SandboxExecutor::new(base.clone()).unwrap();
        let snip = snippet(
            "#!/bin/sh\nexit 0\n",
            Expectation::MustNotCompile {
                diagnostic_contains: Some("cannot bind".to_string()),
            },
        );

        let raw = executor
            .run(
                &snip,
                &configuration(compiler),
                &Limits::default(),
                &CancelToken::new(),
            )
            .unwrap();
        assert!(!raw.compile.success);
        assert!(raw.compile.diagnostics.contains("cannot bind rvalue"));
        assert!(raw.run.is_none());
        let _ = fs::remove_dir_all(&base);
    }

    #[test]
    fn hanging_artifact_is_killed_at_the_wall_limit() {
        let base = scratch("hang");
        let compiler = write_fake_compiler(&base.join("bin"));
        let executor = SandboxExecutor::new(base.clone()).unwrap();
        let snip = snippet(
            "#!/bin/sh\nwhile true; do :; done\n",
            Expectation::UndefinedOutcomeTolerant {
                forbidden_signals: Vec::new(),
                must_not_hang: true,
            },
        );
        let limits = Limits {
            wall_time: Duration::from_millis(300),
            ..Limits::default()
        };

        let started = Instant::now();
        let raw = executor
            .run(&snip, &configuration(compiler), &limits, &CancelToken::new())
            .unwrap();
        let elapsed = started.elapsed();

        let run = raw.run.unwrap();
        assert!(run.timed_out, "watchdog must flag the timeout");
        let kill_report = run.kill_report.as_ref().unwrap();
        assert!(kill_report.term_sent && kill_report.kill_sent);
        // Bounded grace period: limit + escalation delay, with slack.
        assert!(
            elapsed < Duration::from_secs(5),
            "termination took {elapsed:?}"
        );
        let _ = fs::remove_dir_all(&base);
    }

    #[test]
    fn cancellation_terminates_in_flight_cell() {
        let base = scratch("cancel");
        let compiler = write_fake_compiler(&base.join("bin"));
        let executor = SandboxExecutor::new(base.clone()).unwrap();
        let snip = snippet(
            "#!/bin/sh\nsleep 30\n",
            Expectation::UndefinedOutcomeTolerant {
                forbidden_signals: Vec::new(),
                must_not_hang: false,
            },
        );

        let cancel = CancelToken::new();
        let canceller = cancel.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(200));
            canceller.cancel();
        });

        let raw = executor
            .run(&snip, &configuration(compiler), &Limits::default(), &cancel)
            .unwrap();
        handle.join().unwrap();

        assert!(raw.cancelled);
        let run = raw.run.unwrap();
        assert!(run.wall_time_ms < 5000, "cancelled cell must not run out its limit");
        let _ = fs::remove_dir_all(&base);
    }

    #[test]
    fn runaway_output_is_truncated_and_recorded() {
        let base = scratch("flood");
        let compiler = write_fake_compiler(&base.join("bin"));
        let executor = SandboxExecutor::new(base.clone()).unwrap();
        let snip = snippet(
            "#!/bin/sh\ni=0\nwhile [ $i -lt 2000 ]; do printf 'xxxxxxxxxxxxxxxxxxxxxxxxxxxxxxx\\n'; i=$((i+1)); done\n",
            Expectation::UndefinedOutcomeTolerant {
                forbidden_signals: Vec::new(),
                must_not_hang: true,
            },
        );
        let limits = Limits {
            max_output_bytes: 1024,
            ..Limits::default()
        };

        let raw = executor
            .run(&snip, &configuration(compiler), &limits, &CancelToken::new())
            .unwrap();
        let run = raw.run.unwrap();
        assert_eq!(run.stdout.len(), 1024);
        assert_eq!(run.stdout_integrity, StreamIntegrity::TruncatedByLimit);
        assert!(!run.timed_out, "a flooding-but-terminating child is not a hang");
        let _ = fs::remove_dir_all(&base);
    }

    #[test]
    fn crashing_artifact_records_its_signal() {
        let base = scratch("crash");
        let compiler = write_fake_compiler(&base.join("bin"));
        let executor = SandboxExecutor::new(base.clone()).unwrap();
        let snip = snippet(
            "#!/bin/sh\nkill -11 $$\n",
            Expectation::UndefinedOutcomeTolerant {
                forbidden_signals: vec![11],
                must_not_hang: true,
            },
        );

        let raw = executor
            .run(
                &snip,
                &configuration(compiler),
                &Limits::default(),
                &CancelToken::new(),
            )
            .unwrap();
        let run = raw.run.unwrap();
        assert_eq!(run.signal, Some(11));
        assert_eq!(run.exit_code, None);
        assert!(!run.timed_out);
        let _ = fs::remove_dir_all(&base);
    }

    #[test]
    fn workspace_is_destroyed_after_the_cell() {
        let base = scratch("teardown");
        let compiler = write_fake_compiler(&base.join("bin"));
        let executor = SandboxExecutor::new(base.clone()).unwrap();
        let snip = snippet("#!/bin/sh\nexit 0\n", Expectation::MustCompile);

        executor
            .run(
                &snip,
                &configuration(compiler),
                &Limits::default(),
                &CancelToken::new(),
            )
            .unwrap();

        let leftovers: Vec<_> = fs::read_dir(&base)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("test_snippet"))
            .collect();
        assert!(leftovers.is_empty(), "cell workspace must be torn down");
        let _ = fs::remove_dir_all(&base);
    }
}
