//! Toolchain configurations and per-cell resource limits.
//!
//! A `Configuration` is one point on the toolchain axis of the matrix:
//! compiler identity, optimization level, and language-standard flag.
//! Configurations are enumerable, finite, and reused across snippets.

use crate::types::ExecError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

/// Language family of a standard flag. Determines the source file
/// extension and which standards are comparable.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    C,
    Cpp,
}

impl Language {
    pub fn source_extension(self) -> &'static str {
        match self {
            Language::C => "c",
            Language::Cpp => "cpp",
        }
    }
}

/// Language-standard versions understood by the harness.
///
/// A snippet declares the minimum standard it requires; a configuration
/// declares the standard it compiles under. Standards from different
/// language families never satisfy each other.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LanguageStandard {
    C99,
    C11,
    C17,
    #[serde(rename = "c++11")]
    Cpp11,
    #[serde(rename = "c++14")]
    Cpp14,
    #[serde(rename = "c++17")]
    Cpp17,
    #[serde(rename = "c++20")]
    Cpp20,
}

impl LanguageStandard {
    pub fn language(self) -> Language {
        match self {
            LanguageStandard::C99 | LanguageStandard::C11 | LanguageStandard::C17 => Language::C,
            _ => Language::Cpp,
        }
    }

    pub fn flag(self) -> &'static str {
        match self {
            LanguageStandard::C99 => "-std=c99",
            LanguageStandard::C11 => "-std=c11",
            LanguageStandard::C17 => "-std=c17",
            LanguageStandard::Cpp11 => "-std=c++11",
            LanguageStandard::Cpp14 => "-std=c++14",
            LanguageStandard::Cpp17 => "-std=c++17",
            LanguageStandard::Cpp20 => "-std=c++20",
        }
    }

    fn rank(self) -> u32 {
        match self {
            LanguageStandard::C99 => 1999,
            LanguageStandard::C11 => 2011,
            LanguageStandard::C17 => 2017,
            LanguageStandard::Cpp11 => 2011,
            LanguageStandard::Cpp14 => 2014,
            LanguageStandard::Cpp17 => 2017,
            LanguageStandard::Cpp20 => 2020,
        }
    }

    /// Whether this standard satisfies a snippet's minimum requirement.
    pub fn satisfies(self, required: LanguageStandard) -> bool {
        self.language() == required.language() && self.rank() >= required.rank()
    }
}

/// Optimization level axis of the matrix.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum OptLevel {
    O0,
    O1,
    O2,
    O3,
}

impl OptLevel {
    pub fn flag(self) -> &'static str {
        match self {
            OptLevel::O0 => "-O0",
            OptLevel::O1 => "-O1",
            OptLevel::O2 => "-O2",
            OptLevel::O3 => "-O3",
        }
    }
}

/// One toolchain identity with its flag set. The unit of the
/// configuration axis; immutable once loaded.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Configuration {
    /// Stable identifier used in reports, e.g. "gcc-13-c17-O2".
    pub id: String,
    /// Compiler executable path.
    pub compiler: PathBuf,
    /// Language-standard flag applied to every compile.
    pub standard: LanguageStandard,
    /// Optimization level applied to every compile.
    pub opt_level: OptLevel,
    /// Extra compiler arguments (warnings-as-errors, sanitizers, ...).
    #[serde(default)]
    pub extra_args: Vec<String>,
}

impl Configuration {
    /// Full compiler argv for one snippet: compiler, standard flag,
    /// optimization flag, extra args, then `-o artifact source`.
    pub fn compile_command(&self, source: &Path, artifact: &Path) -> Vec<String> {
        let mut argv = vec![
            self.compiler.to_string_lossy().to_string(),
            self.standard.flag().to_string(),
            self.opt_level.flag().to_string(),
        ];
        argv.extend(self.extra_args.iter().cloned());
        argv.push("-o".to_string());
        argv.push(artifact.to_string_lossy().to_string());
        argv.push(source.to_string_lossy().to_string());
        argv
    }

    /// Probe compiler availability by spawning `<compiler> --version`.
    ///
    /// Availability means the executable can be spawned at all; a
    /// non-zero probe exit is logged but does not fail the probe, since
    /// the compile step itself is the authoritative check.
    pub fn probe(&self) -> std::result::Result<(), ExecError> {
        let spawned = Command::new(&self.compiler)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();

        match spawned {
            Ok(mut child) => {
                match child.wait() {
                    Ok(status) if !status.success() => {
                        log::debug!(
                            "probe for '{}' exited non-zero ({status}); treating as available",
                            self.id
                        );
                    }
                    Ok(_) => {}
                    Err(e) => {
                        return Err(ExecError::ToolchainUnavailable(format!(
                            "{}: wait on probe failed: {e}",
                            self.compiler.display()
                        )));
                    }
                }
                Ok(())
            }
            Err(e) => Err(ExecError::ToolchainUnavailable(format!(
                "{}: {e}",
                self.compiler.display()
            ))),
        }
    }
}

/// Parse a configuration list from its JSON descriptor.
pub fn load_configurations(input: &str) -> std::result::Result<Vec<Configuration>, serde_json::Error> {
    serde_json::from_str(input)
}

/// Resource limits applied to a single cell. Enforced before the child
/// begins running untrusted code, never advisory.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Limits {
    /// Wall-clock limit for the snippet's own execution.
    pub wall_time: Duration,
    /// Wall-clock limit for the compiler invocation. Compilers get a
    /// larger envelope than the programs they produce.
    pub compile_wall_time: Duration,
    /// Address-space cap in bytes for the child process.
    pub memory_bytes: Option<u64>,
    /// Per-stream capture cap; output past this is truncated and the
    /// truncation recorded.
    pub max_output_bytes: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            wall_time: Duration::from_secs(5),
            compile_wall_time: Duration::from_secs(30),
            memory_bytes: Some(256 * 1024 * 1024),
            max_output_bytes: 1024 * 1024,
        }
    }
}
