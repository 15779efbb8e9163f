//! Scripted command runner for tests.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::runner::{CommandFailure, CommandRunner};

type Scripted = Result<String, CommandFailure>;

/// One recorded invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Program name
    pub program: String,
    /// Arguments
    pub args: Vec<String>,
    /// Working directory
    pub cwd: PathBuf,
}

impl Invocation {
    /// First argument, e.g. `push` for `docker push ...`
    #[must_use]
    pub fn subcommand(&self) -> &str {
        self.args.first().map_or("", String::as_str)
    }
}

#[derive(Default)]
struct State {
    once: HashMap<String, VecDeque<Scripted>>,
    always: HashMap<String, Scripted>,
    invocations: Vec<Invocation>,
}

/// Runner answering by subcommand; unscripted subcommands succeed with no
/// output.
#[derive(Clone, Default)]
pub struct ScriptedRunner {
    state: Arc<Mutex<State>>,
}

impl ScriptedRunner {
    /// Create an empty script
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every `subcommand` invocation with `result`
    #[must_use]
    pub fn respond(self, subcommand: &str, result: Scripted) -> Self {
        self.state.lock().always.insert(subcommand.to_string(), result);
        self
    }

    /// Answer the next `subcommand` invocation with `result`
    #[must_use]
    pub fn respond_once(self, subcommand: &str, result: Scripted) -> Self {
        self.state
            .lock()
            .once
            .entry(subcommand.to_string())
            .or_default()
            .push_back(result);
        self
    }

    /// Every invocation so far, in order
    #[must_use]
    pub fn invocations(&self) -> Vec<Invocation> {
        self.state.lock().invocations.clone()
    }

    /// Subcommands invoked so far, in order
    #[must_use]
    pub fn subcommands(&self) -> Vec<String> {
        self.state
            .lock()
            .invocations
            .iter()
            .map(|invocation| invocation.subcommand().to_string())
            .collect()
    }
}

impl std::fmt::Debug for ScriptedRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedRunner")
            .field("invocations", &self.state.lock().invocations.len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, program: &str, args: &[String], cwd: &Path) -> Result<String, CommandFailure> {
        tokio::task::yield_now().await;
        let mut state = self.state.lock();
        let invocation = Invocation {
            program: program.to_string(),
            args: args.to_vec(),
            cwd: cwd.to_path_buf(),
        };
        let subcommand = invocation.subcommand().to_string();
        state.invocations.push(invocation);

        if let Some(result) = state.once.get_mut(&subcommand).and_then(VecDeque::pop_front) {
            return result;
        }
        state
            .always
            .get(&subcommand)
            .cloned()
            .unwrap_or_else(|| Ok(String::new()))
    }
}
