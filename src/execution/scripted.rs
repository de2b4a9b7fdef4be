//! A [`CommandRunner`] that answers from a script instead of spawning
//! processes.
//!
//! Backs `--dry-run` and the test suites. Every invocation is recorded.
//! Unscripted commands succeed with runtime-shaped output: `wait` prints
//! `0`, `inspect` prints `exited 0`, everything else prints nothing.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::CommandError;
use crate::execution::command::{CommandOutput, CommandRunner, CommandSpec};

/// Canned answer for a scripted command.
#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    /// The command ran and produced this output.
    Output(CommandOutput),
    /// The program could not be spawned.
    SpawnFailure,
    /// The command exceeded its timeout.
    Timeout,
}

impl ScriptedResponse {
    /// Exit 0 with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self::Output(CommandOutput {
            stdout: stdout.into(),
            exit_code: Some(0),
            ..Default::default()
        })
    }

    /// Non-zero exit with the given stderr.
    pub fn fail(code: i32, stderr: impl Into<String>) -> Self {
        Self::Output(CommandOutput {
            stderr: stderr.into(),
            exit_code: Some(code),
            ..Default::default()
        })
    }
}

#[derive(Debug)]
struct Rule {
    verb: String,
    needle: Option<String>,
    response: ScriptedResponse,
    remaining: Option<usize>,
}

impl Rule {
    fn matches(&self, spec: &CommandSpec) -> bool {
        if self.remaining == Some(0) || verb_of(spec) != self.verb {
            return false;
        }
        match &self.needle {
            Some(needle) => spec.args.iter().any(|a| a.contains(needle.as_str())),
            None => true,
        }
    }
}

/// Normalized runtime verb: `buildx build` and `build` both map to `build`.
fn verb_of(spec: &CommandSpec) -> &str {
    match spec.verb() {
        Some("buildx") => "build",
        Some(verb) => verb,
        None => "",
    }
}

#[derive(Debug, Default)]
struct State {
    rules: Vec<Rule>,
    calls: Vec<CommandSpec>,
}

/// Scripted, recording command runner.
#[derive(Debug, Clone, Default)]
pub struct ScriptedRunner {
    state: Arc<Mutex<State>>,
    echo: bool,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runner for `--dry-run`: every command succeeds and is logged.
    pub fn dry_run() -> Self {
        Self {
            echo: true,
            ..Self::default()
        }
    }

    /// Answers every `verb` command whose arguments contain `needle`.
    pub fn on(&self, verb: &str, needle: &str, response: ScriptedResponse) -> &Self {
        self.push_rule(verb, Some(needle), response, None)
    }

    /// Answers every `verb` command.
    pub fn on_any(&self, verb: &str, response: ScriptedResponse) -> &Self {
        self.push_rule(verb, None, response, None)
    }

    /// Answers only the next matching `verb` command containing `needle`.
    pub fn once(&self, verb: &str, needle: &str, response: ScriptedResponse) -> &Self {
        self.push_rule(verb, Some(needle), response, Some(1))
    }

    fn push_rule(
        &self,
        verb: &str,
        needle: Option<&str>,
        response: ScriptedResponse,
        remaining: Option<usize>,
    ) -> &Self {
        if let Ok(mut state) = self.state.lock() {
            state.rules.push(Rule {
                verb: verb.to_string(),
                needle: needle.map(str::to_string),
                response,
                remaining,
            });
        }
        self
    }

    /// Every command run so far, in order.
    pub fn calls(&self) -> Vec<CommandSpec> {
        self.state
            .lock()
            .map(|state| state.calls.clone())
            .unwrap_or_default()
    }

    /// Commands with the given verb whose arguments contain `needle`.
    pub fn calls_matching(&self, verb: &str, needle: &str) -> Vec<CommandSpec> {
        self.calls()
            .into_iter()
            .filter(|spec| verb_of(spec) == verb && spec.args.iter().any(|a| a.contains(needle)))
            .collect()
    }

    /// Number of commands with the given verb.
    pub fn count(&self, verb: &str) -> usize {
        self.calls().iter().filter(|spec| verb_of(spec) == verb).count()
    }
}

fn default_response(verb: &str) -> ScriptedResponse {
    match verb {
        "wait" => ScriptedResponse::ok("0\n"),
        "inspect" => ScriptedResponse::ok("exited 0\n"),
        _ => ScriptedResponse::ok(""),
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError> {
        if self.echo {
            tracing::info!(command = %spec, "Dry run");
        }

        let response = match self.state.lock() {
            Ok(mut state) => {
                state.calls.push(spec.clone());
                let verb = verb_of(spec).to_string();
                match state.rules.iter_mut().find(|rule| rule.matches(spec)) {
                    Some(rule) => {
                        if let Some(remaining) = rule.remaining.as_mut() {
                            *remaining -= 1;
                        }
                        rule.response.clone()
                    }
                    None => default_response(&verb),
                }
            }
            Err(_) => default_response(verb_of(spec)),
        };

        match response {
            ScriptedResponse::Output(output) => Ok(output),
            ScriptedResponse::SpawnFailure => Err(CommandError::Spawn {
                program: spec.program.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "scripted spawn failure"),
            }),
            ScriptedResponse::Timeout => Err(CommandError::TimedOut {
                program: spec.program.clone(),
                seconds: spec.timeout.map(|t| t.as_secs()).unwrap_or_default(),
            }),
        }
    }
}
