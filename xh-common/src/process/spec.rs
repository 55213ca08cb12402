//! Launch descriptions for operating-system processes and forked JVMs.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use crate::error::{HarnessError, HarnessResult};
use crate::project::Project;

/// What to run and how to judge its exit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub dir: Option<PathBuf>,
    /// Treat a non-zero exit code as a failure.
    pub fail_on_error: bool,
    /// Kill the process once it has run this long.
    pub timeout: Option<Duration>,
}

impl ProcessSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            dir: None,
            fail_on_error: true,
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    pub fn fail_on_error(mut self, fail: bool) -> Self {
        self.fail_on_error = fail;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Copy with `${property}` references expanded.
    pub fn expanded(&self, project: &Project) -> Self {
        Self {
            program: project.expand(&self.program),
            args: self.args.iter().map(|a| project.expand(a)).collect(),
            env: self
                .env
                .iter()
                .map(|(k, v)| (k.clone(), project.expand(v)))
                .collect(),
            dir: self
                .dir
                .as_ref()
                .map(|d| PathBuf::from(project.expand(&d.to_string_lossy()))),
            fail_on_error: self.fail_on_error,
            timeout: self.timeout,
        }
    }

    /// Shell-style rendering for logs and result records.
    pub fn command_line(&self) -> String {
        std::iter::once(&self.program)
            .chain(&self.args)
            .map(|part| quote(part))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Build the command with piped output, relative directories resolved
    /// against `base_dir`.
    pub(crate) fn command(&self, base_dir: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let dir = match &self.dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => base_dir.join(dir),
            None => base_dir.to_path_buf(),
        };
        cmd.current_dir(dir);
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        cmd
    }
}

fn quote(part: &str) -> String {
    if part.is_empty() {
        return "''".to_string();
    }
    if part.chars().any(|c| c.is_whitespace() || matches!(c, '\'' | '"' | '$' | '\\')) {
        format!("'{}'", part.replace('\'', r"'\''"))
    } else {
        part.to_string()
    }
}

/// A forked JVM, turned into a [`ProcessSpec`] for the `java` launcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JavaSpec {
    /// Launcher executable; `java` from `PATH` by default.
    pub java: String,
    pub classname: Option<String>,
    pub jar: Option<String>,
    pub classpath: Vec<String>,
    pub jvm_args: Vec<String>,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub dir: Option<PathBuf>,
    pub fail_on_error: bool,
    pub timeout: Option<Duration>,
}

impl Default for JavaSpec {
    fn default() -> Self {
        Self {
            java: "java".to_string(),
            classname: None,
            jar: None,
            classpath: Vec::new(),
            jvm_args: Vec::new(),
            args: Vec::new(),
            env: BTreeMap::new(),
            dir: None,
            fail_on_error: true,
            timeout: None,
        }
    }
}

impl JavaSpec {
    pub fn class(classname: impl Into<String>) -> Self {
        Self {
            classname: Some(classname.into()),
            ..Self::default()
        }
    }

    pub fn jar(jar: impl Into<String>) -> Self {
        Self {
            jar: Some(jar.into()),
            ..Self::default()
        }
    }

    /// Exactly one of `classname` and `jar` must be set.
    pub fn to_process_spec(&self) -> HarnessResult<ProcessSpec> {
        let entry = match (&self.classname, &self.jar) {
            (Some(class), None) => vec![class.clone()],
            (None, Some(jar)) => vec!["-jar".to_string(), jar.clone()],
            (Some(_), Some(_)) => {
                return Err(HarnessError::config("java: set either classname or jar, not both"));
            }
            (None, None) => return Err(HarnessError::config("java: classname or jar is required")),
        };

        let separator = if cfg!(windows) { ";" } else { ":" };
        let mut args = self.jvm_args.clone();
        if !self.classpath.is_empty() {
            args.push("-classpath".to_string());
            args.push(self.classpath.join(separator));
        }
        args.extend(entry);
        args.extend(self.args.iter().cloned());

        Ok(ProcessSpec {
            program: self.java.clone(),
            args,
            env: self.env.clone(),
            dir: self.dir.clone(),
            fail_on_error: self.fail_on_error,
            timeout: self.timeout,
        })
    }
}
