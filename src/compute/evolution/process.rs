//! External process evaluator.
//!
//! Runs one process per candidate. Parameters are passed as separate argv
//! entries (`--name value`), never through a shell string, and the fitness is
//! read from the last non-empty line of stdout.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::Duration;

use crate::schema::{CommandConfig, ParameterKind, ParameterView};

use super::evaluator::{EvaluationContext, EvaluationError, Evaluator};

const DEFAULT_FLAG_PREFIX: &str = "--";
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(20);
const STDERR_TAIL_LINES: usize = 5;

/// Evaluator that launches an external simulation per candidate.
#[derive(Debug, Clone)]
pub struct CommandEvaluator {
    program: String,
    args: Vec<String>,
    flag_prefix: String,
    working_dir: Option<PathBuf>,
    env: BTreeMap<String, String>,
    poll_interval: Duration,
}

impl CommandEvaluator {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            flag_prefix: DEFAULT_FLAG_PREFIX.to_string(),
            working_dir: None,
            env: BTreeMap::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn from_config(config: &CommandConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            flag_prefix: config
                .flag_prefix
                .clone()
                .unwrap_or_else(|| DEFAULT_FLAG_PREFIX.to_string()),
            working_dir: config.working_dir.as_ref().map(PathBuf::from),
            env: config.env.clone(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Fixed arguments placed before the parameter flags.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_flag_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.flag_prefix = prefix.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Full argument list for one candidate.
    pub fn arguments(&self, params: &ParameterView<'_>) -> Vec<String> {
        let mut argv = self.args.clone();
        for (spec, value) in params.iter() {
            argv.push(format!("{}{}", self.flag_prefix, spec.name));
            argv.push(format_value(value, spec.kind));
        }
        argv
    }

    fn command(&self, params: &ParameterView<'_>) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.arguments(params))
            .envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

impl Evaluator for CommandEvaluator {
    fn evaluate(
        &self,
        params: &ParameterView<'_>,
        ctx: &EvaluationContext,
    ) -> Result<f64, EvaluationError> {
        ctx.check()?;

        let mut child = self
            .command(params)
            .spawn()
            .map_err(EvaluationError::Spawn)?;

        // Drain both pipes on their own threads so a chatty model cannot block.
        let stdout = spawn_reader(child.stdout.take());
        let stderr = spawn_reader(child.stderr.take());

        let status = loop {
            if let Some(status) = child.try_wait().map_err(EvaluationError::Spawn)? {
                break status;
            }
            if ctx.is_cancelled() {
                kill(&mut child);
                return Err(EvaluationError::Cancelled);
            }
            if let Some(timeout) = ctx.timeout()
                && ctx.is_expired()
            {
                kill(&mut child);
                return Err(EvaluationError::Timeout(timeout));
            }
            thread::sleep(self.poll_interval);
        };

        let stdout = join_reader(stdout);
        let stderr = join_reader(stderr);

        if !status.success() {
            return Err(EvaluationError::ExitStatus {
                status: status.to_string(),
                stderr: tail(&stderr, STDERR_TAIL_LINES),
            });
        }

        parse_fitness(&stdout)
    }
}

/// Read the fitness from the last non-empty line of output.
pub fn parse_fitness(output: &str) -> Result<f64, EvaluationError> {
    let line = output
        .lines()
        .map(str::trim)
        .rfind(|l| !l.is_empty())
        .ok_or_else(|| EvaluationError::MalformedOutput("no output".to_string()))?;

    line.parse::<f64>()
        .map_err(|e| EvaluationError::MalformedOutput(format!("{line:?}: {e}")))
}

fn format_value(value: f64, kind: ParameterKind) -> String {
    match kind {
        ParameterKind::Integer => format!("{}", value.round() as i64),
        ParameterKind::Continuous => format!("{}", value),
    }
}

fn spawn_reader<R>(pipe: Option<R>) -> Option<thread::JoinHandle<String>>
where
    R: Read + Send + 'static,
{
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = String::new();
            if let Err(e) = pipe.read_to_string(&mut buf) {
                log::debug!("failed to read evaluator output: {}", e);
            }
            buf
        })
    })
}

fn join_reader(handle: Option<thread::JoinHandle<String>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}

// Reader threads are left detached: a killed process may have children that
// still hold the pipes open.
fn kill(child: &mut Child) {
    if let Err(e) = child.kill() {
        log::debug!("failed to kill evaluator process: {}", e);
    }
    let _ = child.wait();
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}
