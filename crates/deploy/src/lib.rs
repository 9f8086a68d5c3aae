//! strata-deploy - Resumable deployment orchestrator for on-chain components.
//!
//! Components are deployed in dependency order by a [`Deployer`], which skips
//! anything the persisted [`Environment`] already holds with the same code and
//! arguments. A [`Restorer`] runs a [`Plan`] step by step and checkpoints the
//! environment after each one, so an interrupted run can simply be started again.

pub mod abi;

mod artifact;
pub use artifact::{Artifact, ArtifactStore, LinkReference};

mod deployer;
pub use deployer::{DEFAULT_PROXY_ARTIFACT, Decision, DeployOptions, Deployer, decide};

mod environment;
pub use environment::{
    AddressBook, CompletedStep, DeploymentRecord, Environment, EnvironmentStore,
    ImplementationRecord, Lookup, PendingTransaction, ProxyDeployment, VersionEntry,
};

mod error;
pub use error::{DeployError, LedgerError, Result};

mod fingerprint;
pub use fingerprint::Fingerprint;

pub mod ledger;
pub use ledger::{
    Confirmation, ConfirmationPolicy, InMemoryLedger, JsonRpcLedger, Ledger, Receipt,
    TransactionRequest,
};

mod manifest;
pub use manifest::{Manifest, ManifestStep};

mod proxy;
pub use proxy::implementation_key;

mod registry;
pub use registry::VersionBundle;

mod restorer;
pub use restorer::{Plan, Restorer, RunReport, Step, StepMode};
