//! Checkpointed execution of a deployment plan.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use alloy_core::primitives::Address;
use futures::future::LocalBoxFuture;

use crate::deployer::Deployer;
use crate::environment::{AddressBook, Environment, EnvironmentStore};
use crate::error::{DeployError, Result};
use crate::ledger::Ledger;

/// How a step behaves when a plan is run again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum StepMode {
    /// The step is a no-op once its effects exist (deployments, versions).
    Idempotent,
    /// The step must not run twice (initializers, one-off calls); a completion
    /// marker is recorded after it succeeds.
    Once,
}

type StepAction<L> = Box<dyn for<'a> FnOnce(&'a mut Deployer<L>) -> LocalBoxFuture<'a, Result<()>>>;

/// A named unit of work of a [`Plan`].
pub struct Step<L> {
    name: String,
    mode: StepMode,
    action: StepAction<L>,
}

impl<L> Step<L> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> StepMode {
        self.mode
    }
}

impl<L> std::fmt::Debug for Step<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

/// Ordered steps, executed one after another.
#[derive(Debug)]
pub struct Plan<L> {
    steps: Vec<Step<L>>,
}

impl<L> Default for Plan<L> {
    fn default() -> Self {
        Self { steps: Vec::new() }
    }
}

impl<L: Ledger + 'static> Plan<L> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an idempotent step.
    pub fn step<F>(self, name: impl Into<String>, action: F) -> Self
    where
        F: for<'a> FnOnce(&'a mut Deployer<L>) -> LocalBoxFuture<'a, Result<()>> + 'static,
    {
        self.push(name, StepMode::Idempotent, action)
    }

    /// Append a step that runs at most once per environment.
    pub fn once<F>(self, name: impl Into<String>, action: F) -> Self
    where
        F: for<'a> FnOnce(&'a mut Deployer<L>) -> LocalBoxFuture<'a, Result<()>> + 'static,
    {
        self.push(name, StepMode::Once, action)
    }

    pub fn push<F>(mut self, name: impl Into<String>, mode: StepMode, action: F) -> Self
    where
        F: for<'a> FnOnce(&'a mut Deployer<L>) -> LocalBoxFuture<'a, Result<()>> + 'static,
    {
        self.steps.push(Step {
            name: name.into(),
            mode,
            action: Box::new(action),
        });
        self
    }
}

impl<L> Plan<L> {
    pub fn steps(&self) -> &[Step<L>] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Completion markers are keyed by step name.
    fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for step in self.steps.iter().filter(|s| s.mode == StepMode::Once) {
            if !seen.insert(step.name.as_str()) {
                return Err(DeployError::config(format!(
                    "step {} is registered more than once",
                    step.name
                )));
            }
        }
        Ok(())
    }
}

/// Outcome of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// Steps that ran, in order. Idempotent steps count even if they were no-ops.
    pub executed: Vec<String>,
    /// Once-steps skipped because they completed in a previous run.
    pub skipped: Vec<String>,
    pub environment: Environment,
}

/// Loads the environment of a network and runs plans against it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Restorer {
    state_dir: PathBuf,
    network: String,
    overrides: BTreeMap<String, Address>,
}

impl Restorer {
    pub fn new(state_dir: impl AsRef<Path>, network: impl Into<String>) -> Self {
        Self {
            state_dir: state_dir.as_ref().to_path_buf(),
            network: network.into(),
            overrides: BTreeMap::new(),
        }
    }

    /// Operator overrides for the network.
    pub fn with_overrides(mut self, overrides: BTreeMap<String, Address>) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    /// Lock and load the last persisted environment, or an empty one, and apply
    /// the operator overrides.
    pub fn restore(&self) -> Result<AddressBook> {
        let store = EnvironmentStore::open(&self.state_dir, &self.network)?;
        let mut book = AddressBook::open(store)?;
        book.replace_overrides(self.overrides.clone())?;

        let environment = book.environment();
        if !environment.pending.is_empty() || !environment.pending_calls.is_empty() {
            tracing::warn!(
                network = %self.network,
                deployments = ?environment.pending.keys().collect::<Vec<_>>(),
                calls = ?environment.pending_calls.keys().collect::<Vec<_>>(),
                "Previous run left unconfirmed transactions, they will be reconciled"
            );
        }
        Ok(book)
    }

    /// Run `plan` step by step, persisting the environment after each one.
    ///
    /// The first failing step stops the run. Its error is returned as is, after
    /// the partial progress has been persisted.
    pub async fn run<L: Ledger>(deployer: &mut Deployer<L>, plan: Plan<L>) -> Result<RunReport> {
        plan.validate()?;

        let total = plan.len();
        let mut executed = Vec::new();
        let mut skipped = Vec::new();

        tracing::info!(network = %deployer.book().network(), steps = total, "Starting plan...");

        for (index, step) in plan.steps.into_iter().enumerate() {
            let Step { name, mode, action } = step;

            if mode == StepMode::Once && deployer.environment().is_completed(&name) {
                tracing::info!(step = %name, "Step completed by a previous run, skipping");
                skipped.push(name);
                continue;
            }

            tracing::info!(step = %name, %mode, "Running step {}/{}...", index + 1, total);

            let result = action(deployer).await;
            let flushed = deployer.book().flush();

            if let Err(err) = result {
                if let Err(flush_err) = flushed {
                    tracing::error!(error = %flush_err, "Failed to persist partial progress");
                }
                tracing::error!(step = %name, error = %err, "Step failed");
                return Err(err);
            }
            flushed?;

            if mode == StepMode::Once {
                deployer.book_mut().mark_completed(&name)?;
            }
            executed.push(name);
        }

        tracing::info!(
            executed = executed.len(),
            skipped = skipped.len(),
            "Plan completed"
        );

        Ok(RunReport {
            executed,
            skipped,
            environment: deployer.environment().clone(),
        })
    }
}
