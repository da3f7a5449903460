//! Test support utilities shared across unit and integration tests.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, MutexGuard};

use crate::control::{ControlClient, ControlError, ControlFuture, NodeStatus};
use crate::gateway::{
    CommandOutput, CommandRunner, Gateway, GatewayFuture, RemoteOutput, RunnerError, RunnerFuture,
};
use crate::hosts::HostName;
use crate::topology::PublicKey;

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic command outcomes without spawning processes.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Arc<Mutex<VecDeque<CommandOutput>>>,
    invocations: Arc<Mutex<Vec<CommandInvocation>>>,
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        lock(&self.invocations).clone()
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32) {
        self.push_output(Some(code), "", "simulated failure");
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        lock(&self.responses).push_back(CommandOutput {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        });
    }
}

impl CommandRunner for ScriptedRunner {
    fn run<'a>(&'a self, program: &'a str, args: &'a [OsString]) -> RunnerFuture<'a> {
        lock(&self.invocations).push(CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
        });
        let response = lock(&self.responses).pop_front();
        Box::pin(async move {
            response.ok_or_else(|| RunnerError {
                program: program.to_owned(),
                message: String::from("no scripted response available"),
            })
        })
    }
}

/// A call observed by [`ScriptedGateway`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GatewayCall {
    /// Host for remote commands, `None` for machine-tool subcommands.
    pub host: Option<String>,
    /// Remote command, or the machine-tool arguments joined by spaces.
    pub command: String,
}

#[derive(Debug)]
struct Rule {
    host: Option<String>,
    needle: String,
    queue: VecDeque<RemoteOutput>,
    last: RemoteOutput,
    delay: Option<Duration>,
}

/// Gateway double answering by substring match on the command text.
///
/// Rules added later win over earlier ones. A rule with several outputs
/// replays them in order and then keeps returning the final one. Commands
/// matching no rule succeed with empty output.
#[derive(Clone, Debug, Default)]
pub struct ScriptedGateway {
    rules: Arc<Mutex<Vec<Rule>>>,
    calls: Arc<Mutex<Vec<GatewayCall>>>,
}

impl ScriptedGateway {
    /// Creates a gateway where every command succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn add(&self, host: Option<&str>, needle: &str, outputs: Vec<RemoteOutput>, delay: Option<Duration>) {
        let last = outputs.last().cloned().unwrap_or_default();
        lock(&self.rules).push(Rule {
            host: host.map(str::to_owned),
            needle: needle.to_owned(),
            queue: outputs.into(),
            last,
            delay,
        });
    }

    /// Answers commands containing `needle` on any host with `output`.
    pub fn respond(&self, needle: &str, output: RemoteOutput) -> &Self {
        self.add(None, needle, vec![output], None);
        self
    }

    /// Answers commands containing `needle` on `host` with `output`.
    pub fn respond_on(&self, host: &str, needle: &str, output: RemoteOutput) -> &Self {
        self.add(Some(host), needle, vec![output], None);
        self
    }

    /// Answers commands containing `needle` on `host` with `outputs` in turn.
    pub fn respond_sequence_on(&self, host: &str, needle: &str, outputs: Vec<RemoteOutput>) -> &Self {
        self.add(Some(host), needle, outputs, None);
        self
    }

    /// Makes commands containing `needle` on `host` take `delay` to succeed.
    pub fn stall_on(&self, host: &str, needle: &str, delay: Duration) -> &Self {
        self.add(Some(host), needle, vec![RemoteOutput::success("")], Some(delay));
        self
    }

    /// Returns every call recorded so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<GatewayCall> {
        lock(&self.calls).clone()
    }

    /// Returns the commands executed on `host`, in order.
    #[must_use]
    pub fn commands_on(&self, host: &str) -> Vec<String> {
        lock(&self.calls)
            .iter()
            .filter(|call| call.host.as_deref() == Some(host))
            .map(|call| call.command.clone())
            .collect()
    }

    /// Returns the machine-tool invocations, in order.
    #[must_use]
    pub fn machine_calls(&self) -> Vec<String> {
        lock(&self.calls)
            .iter()
            .filter(|call| call.host.is_none())
            .map(|call| call.command.clone())
            .collect()
    }

    fn answer(&self, host: Option<&str>, command: &str) -> (RemoteOutput, Option<Duration>) {
        lock(&self.calls).push(GatewayCall {
            host: host.map(str::to_owned),
            command: command.to_owned(),
        });
        let mut rules = lock(&self.rules);
        let matched = rules.iter_mut().rev().find(|rule| {
            rule.host.as_deref().is_none_or(|wanted| Some(wanted) == host)
                && command.contains(&rule.needle)
        });
        match matched {
            Some(rule) => {
                let output = match rule.queue.pop_front() {
                    Some(next) => {
                        rule.last = next.clone();
                        next
                    }
                    None => rule.last.clone(),
                };
                (output, rule.delay)
            }
            None => (RemoteOutput::success(""), None),
        }
    }
}

impl Gateway for ScriptedGateway {
    fn execute<'a>(&'a self, host: &'a HostName, command: &'a str) -> GatewayFuture<'a, RemoteOutput> {
        let (output, delay) = self.answer(Some(host.as_str()), command);
        Box::pin(async move {
            if let Some(pause) = delay {
                tokio::time::sleep(pause).await;
            }
            output
        })
    }

    fn machine<'a>(&'a self, args: &'a [String]) -> GatewayFuture<'a, RemoteOutput> {
        let (output, delay) = self.answer(None, &args.join(" "));
        Box::pin(async move {
            if let Some(pause) = delay {
                tokio::time::sleep(pause).await;
            }
            output
        })
    }
}

#[derive(Debug, Default)]
struct StatusScript {
    queue: VecDeque<Result<PublicKey, String>>,
    last: Option<Result<PublicKey, String>>,
}

/// Control-client double with per-endpoint scripted status answers.
///
/// An endpoint without a script fails every status query. Seed dials
/// succeed unless the endpoint was marked with [`ScriptedControl::fail_dial`].
#[derive(Clone, Debug, Default)]
pub struct ScriptedControl {
    statuses: Arc<Mutex<BTreeMap<String, StatusScript>>>,
    failing_dials: Arc<Mutex<BTreeSet<String>>>,
    dials: Arc<Mutex<Vec<(String, Vec<String>)>>>,
    status_calls: Arc<Mutex<Vec<String>>>,
}

impl ScriptedControl {
    /// Creates a client with no scripted endpoints.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a status answer for `endpoint`; the last answer repeats.
    pub fn push_status(&self, endpoint: &str, answer: Result<PublicKey, &str>) -> &Self {
        lock(&self.statuses)
            .entry(endpoint.to_owned())
            .or_default()
            .queue
            .push_back(answer.map_err(str::to_owned));
        self
    }

    /// Makes `dial_seeds` fail for `endpoint`.
    pub fn fail_dial(&self, endpoint: &str) -> &Self {
        lock(&self.failing_dials).insert(endpoint.to_owned());
        self
    }

    /// Returns every `dial_seeds` call as `(endpoint, seeds)`.
    #[must_use]
    pub fn dials(&self) -> Vec<(String, Vec<String>)> {
        lock(&self.dials).clone()
    }

    /// Returns the endpoints queried for status, in order.
    #[must_use]
    pub fn status_calls(&self) -> Vec<String> {
        lock(&self.status_calls).clone()
    }

    fn next_status(&self, endpoint: &str) -> Result<PublicKey, String> {
        lock(&self.status_calls).push(endpoint.to_owned());
        let mut statuses = lock(&self.statuses);
        let Some(script) = statuses.get_mut(endpoint) else {
            return Err(String::from("no status scripted"));
        };
        if let Some(next) = script.queue.pop_front() {
            script.last = Some(next.clone());
            return next;
        }
        script
            .last
            .clone()
            .unwrap_or_else(|| Err(String::from("no status scripted")))
    }
}

impl ControlClient for ScriptedControl {
    fn status<'a>(&'a self, endpoint: &'a str) -> ControlFuture<'a, NodeStatus> {
        let answer = self.next_status(endpoint);
        Box::pin(async move {
            answer
                .map(|pub_key| NodeStatus { pub_key })
                .map_err(|message| ControlError::Request {
                    endpoint: endpoint.to_owned(),
                    message,
                })
        })
    }

    fn dial_seeds<'a>(&'a self, endpoint: &'a str, seeds: &'a [String]) -> ControlFuture<'a, ()> {
        lock(&self.dials).push((endpoint.to_owned(), seeds.to_vec()));
        let fails = lock(&self.failing_dials).contains(endpoint);
        Box::pin(async move {
            if fails {
                return Err(ControlError::Request {
                    endpoint: endpoint.to_owned(),
                    message: String::from("connection refused"),
                });
            }
            Ok(())
        })
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Guard that holds the env mutex and cleans up variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
