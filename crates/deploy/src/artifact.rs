//! Compiled contract artifacts.
//!
//! Artifacts are Hardhat-style JSON files (`contractName`, `abi`, `bytecode`,
//! `linkReferences`). The store indexes every artifact found under a directory by
//! contract name; debug files (`*.dbg.json`) and unrelated JSON are ignored.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

use alloy_core::dyn_abi::{DynSolType, DynSolValue, Specifier};
use alloy_core::json_abi::{Function, JsonAbi, Param};
use serde::Deserialize;
use walkdir::WalkDir;

use crate::abi;
use crate::environment::Environment;
use crate::error::{DeployError, Result};

/// Byte range of a library placeholder in the creation code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct LinkReference {
    pub start: usize,
    pub length: usize,
}

/// A compiled contract.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub contract_name: String,
    pub abi: JsonAbi,
    /// Hex creation code, possibly containing library placeholders.
    pub bytecode: String,
    /// Source file → library name → placeholder positions.
    #[serde(default)]
    pub link_references: BTreeMap<String, BTreeMap<String, Vec<LinkReference>>>,
}

impl Artifact {
    /// Parse an artifact from its JSON text.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Names of the libraries the creation code must be linked against.
    pub fn libraries(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .link_references
            .values()
            .flat_map(|libs| libs.keys().map(String::as_str))
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }

    /// Creation code with every library placeholder replaced by the library's
    /// address in `environment`.
    pub fn link(&self, environment: &Environment) -> Result<Vec<u8>> {
        let mut code = self.bytecode.trim_start_matches("0x").to_string();
        // Link references index hex digits, which are single bytes.
        if !code.is_ascii() {
            return Err(DeployError::config(format!(
                "{}: creation code is not hex",
                self.contract_name
            )));
        }

        for libraries in self.link_references.values() {
            for (library, references) in libraries {
                let address = environment.address_of(library).ok_or_else(|| {
                    DeployError::config(format!(
                        "{} links library {library}, which is not deployed",
                        self.contract_name
                    ))
                })?;
                let address_hex = hex::encode(address);

                for reference in references {
                    let range = 2 * reference.start..2 * (reference.start + reference.length);
                    if reference.length != 20 || range.end > code.len() {
                        return Err(DeployError::config(format!(
                            "{}: invalid link reference for {library} at byte {}",
                            self.contract_name, reference.start
                        )));
                    }
                    code.replace_range(range, &address_hex);
                }
            }
        }

        hex::decode(&code).map_err(|e| {
            DeployError::config(format!(
                "{}: creation code is not valid hex after linking ({e})",
                self.contract_name
            ))
        })
    }

    fn constructor_inputs(&self) -> &[Param] {
        self.abi
            .constructor
            .as_ref()
            .map(|c| c.inputs.as_slice())
            .unwrap_or_default()
    }

    /// ABI types of the constructor parameters.
    pub fn constructor_types(&self) -> Result<Vec<DynSolType>> {
        resolve_params(&self.contract_name, self.constructor_inputs())
    }

    /// Check constructor arguments against the ABI and encode them.
    pub fn encode_constructor_args(&self, args: &[DynSolValue]) -> Result<Vec<u8>> {
        let types = self.constructor_types()?;

        if types.len() != args.len() {
            return Err(DeployError::config(format!(
                "{} constructor takes {} arguments, {} given",
                self.contract_name,
                types.len(),
                args.len()
            )));
        }

        for (index, (ty, value)) in types.iter().zip(args).enumerate() {
            if !ty.matches(value) {
                return Err(DeployError::config(format!(
                    "{} constructor argument {index} should be {ty}, got {value:?}",
                    self.contract_name
                )));
            }
        }

        Ok(abi::encode_args(args))
    }

    /// Parse textual constructor arguments into ABI values.
    pub fn coerce_constructor_args(&self, raw: &[String]) -> Result<Vec<DynSolValue>> {
        let context = format!("{} constructor", self.contract_name);
        coerce_args(&context, &self.constructor_types()?, raw)
    }

    /// The overload of `name` taking `arity` arguments.
    pub fn function(&self, name: &str, arity: usize) -> Result<&Function> {
        let overloads = self.abi.function(name).ok_or_else(|| {
            DeployError::config(format!("{} has no function {name}", self.contract_name))
        })?;

        let mut matching = overloads.iter().filter(|f| f.inputs.len() == arity);
        match (matching.next(), matching.next()) {
            (Some(function), None) => Ok(function),
            (None, _) => Err(DeployError::config(format!(
                "{} has no function {name} taking {arity} arguments",
                self.contract_name
            ))),
            (Some(_), Some(_)) => Err(DeployError::config(format!(
                "{}.{name} with {arity} arguments is ambiguous",
                self.contract_name
            ))),
        }
    }

    /// Calldata for `name(raw...)`, coercing the arguments to the parameter types.
    pub fn encode_function_call(&self, name: &str, raw: &[String]) -> Result<alloy_core::primitives::Bytes> {
        let function = self.function(name, raw.len())?;
        let context = format!("{}.{name}", self.contract_name);
        let types = resolve_params(&context, &function.inputs)?;
        let values = coerce_args(&context, &types, raw)?;
        Ok(abi::encode_call(&function.signature(), values))
    }
}

fn resolve_params(context: &str, params: &[Param]) -> Result<Vec<DynSolType>> {
    params
        .iter()
        .map(|p| {
            p.resolve()
                .map_err(|e| DeployError::config(format!("{context}: unsupported parameter type: {e}")))
        })
        .collect()
}

fn coerce_args(context: &str, types: &[DynSolType], raw: &[String]) -> Result<Vec<DynSolValue>> {
    if types.len() != raw.len() {
        return Err(DeployError::config(format!(
            "{context} takes {} arguments, {} given",
            types.len(),
            raw.len()
        )));
    }

    types
        .iter()
        .zip(raw)
        .map(|(ty, value)| {
            ty.coerce_str(value)
                .map_err(|e| DeployError::config(format!("{context}: {value:?} is not a valid {ty}: {e}")))
        })
        .collect()
}

/// Artifacts indexed by contract name.
#[derive(Debug, Clone, Default)]
pub struct ArtifactStore {
    artifacts: HashMap<String, Artifact>,
    /// Names defined by more than one artifact file.
    ambiguous: HashSet<String>,
}

impl ArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index every artifact under `dir`, recursively.
    pub fn load(dir: &Path) -> Result<Self> {
        if !dir.is_dir() {
            return Err(DeployError::config(format!(
                "artifact directory {} does not exist",
                dir.display()
            )));
        }

        let mut store = Self::new();
        let files: Vec<PathBuf> = WalkDir::new(dir)
            .min_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| is_artifact_file(p))
            .collect();

        for path in files {
            let content = std::fs::read_to_string(&path)?;
            let value: serde_json::Value = match serde_json::from_str(&content) {
                Ok(value) => value,
                Err(err) => {
                    tracing::debug!(path = %path.display(), error = %err, "Skipping unreadable JSON file");
                    continue;
                }
            };
            if value.get("contractName").is_none() || value.get("bytecode").is_none() {
                continue;
            }

            let artifact: Artifact = serde_json::from_value(value).map_err(|e| {
                DeployError::config(format!("invalid artifact {}: {e}", path.display()))
            })?;
            tracing::trace!(contract = %artifact.contract_name, path = %path.display(), "Artifact found");
            store.insert(artifact);
        }

        tracing::info!(
            dir = %dir.display(),
            artifacts = store.artifacts.len(),
            "Artifacts loaded"
        );
        Ok(store)
    }

    /// Add an artifact. A second artifact with the same name makes the name ambiguous.
    pub fn insert(&mut self, artifact: Artifact) {
        let name = artifact.contract_name.clone();
        if self.artifacts.contains_key(&name) {
            tracing::warn!(contract = %name, "Several artifacts share this contract name");
            self.ambiguous.insert(name);
            return;
        }
        self.artifacts.insert(name, artifact);
    }

    pub fn get(&self, name: &str) -> Result<&Artifact> {
        if self.ambiguous.contains(name) {
            return Err(DeployError::config(format!(
                "contract name {name} is defined by several artifacts"
            )));
        }
        self.artifacts
            .get(name)
            .ok_or_else(|| DeployError::config(format!("no artifact for contract {name}")))
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }
}

fn is_artifact_file(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    name.ends_with(".json") && !name.ends_with(".dbg.json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_core::primitives::{Address, U256};
    use tempdir::TempDir;

    use crate::environment::{DeploymentRecord, Environment};
    use crate::Fingerprint;

    const PERPETUAL: &str = r#"{
        "contractName": "Perpetual",
        "abi": [
            {
                "type": "constructor",
                "inputs": [
                    { "name": "globalConfig", "type": "address" },
                    { "name": "devAddress", "type": "address" },
                    { "name": "collateral", "type": "address" },
                    { "name": "decimals", "type": "uint256" }
                ],
                "stateMutability": "nonpayable"
            },
            {
                "type": "function",
                "name": "setGovernanceParameter",
                "inputs": [
                    { "name": "key", "type": "bytes32" },
                    { "name": "value", "type": "int256" }
                ],
                "outputs": [],
                "stateMutability": "nonpayable"
            }
        ],
        "bytecode": "0x6080__$1234567890abcdef1234567890abcdef12$__6040",
        "linkReferences": {
            "contracts/lib/LibMathSigned.sol": {
                "LibMathSigned": [{ "start": 2, "length": 20 }]
            }
        }
    }"#;

    fn environment_with(name: &str, address: Address) -> Environment {
        let mut env = Environment::new("kovan");
        env.records.insert(
            name.to_string(),
            DeploymentRecord {
                name: name.to_string(),
                address,
                artifact: name.to_string(),
                fingerprint: Fingerprint::of_code(&[]),
                tx_hash: Default::default(),
                timestamp: 0,
            },
        );
        env
    }

    #[test]
    fn test_link_replaces_placeholders() {
        let artifact = Artifact::from_json(PERPETUAL).unwrap();
        assert_eq!(artifact.libraries(), vec!["LibMathSigned"]);

        let library = Address::repeat_byte(0xab);
        let code = artifact.link(&environment_with("LibMathSigned", library)).unwrap();

        assert_eq!(code.len(), 24);
        assert_eq!(&code[..2], &[0x60, 0x80]);
        assert_eq!(&code[2..22], library.as_slice());
        assert_eq!(&code[22..], &[0x60, 0x40]);
    }

    #[test]
    fn test_link_requires_deployed_library() {
        let artifact = Artifact::from_json(PERPETUAL).unwrap();
        let result = artifact.link(&Environment::new("kovan"));
        assert!(matches!(result, Err(DeployError::Configuration(msg)) if msg.contains("LibMathSigned")));
    }

    #[test]
    fn test_link_rejects_non_hex_code() {
        let mut artifact = Artifact::from_json(PERPETUAL).unwrap();
        // A multi-byte character right where the library address goes.
        artifact.bytecode = "0x6080\u{e9}_$1234567890abcdef1234567890abcdef12$__6040".to_string();

        let result = artifact.link(&environment_with("LibMathSigned", Address::repeat_byte(0xab)));
        assert!(matches!(result, Err(DeployError::Configuration(msg)) if msg.contains("not hex")));
    }

    #[test]
    fn test_constructor_args_are_checked() {
        let artifact = Artifact::from_json(PERPETUAL).unwrap();
        let address = DynSolValue::Address(Address::repeat_byte(0x01));

        let too_few = artifact.encode_constructor_args(&[address.clone()]);
        assert!(matches!(too_few, Err(DeployError::Configuration(_))));

        let wrong_type = artifact.encode_constructor_args(&[
            address.clone(),
            address.clone(),
            address.clone(),
            DynSolValue::Bool(true),
        ]);
        assert!(matches!(wrong_type, Err(DeployError::Configuration(_))));

        let encoded = artifact
            .encode_constructor_args(&[
                address.clone(),
                address.clone(),
                address,
                DynSolValue::Uint(U256::from(18u64), 256),
            ])
            .unwrap();
        assert_eq!(encoded.len(), 4 * 32);
    }

    #[test]
    fn test_coerce_constructor_args() {
        let artifact = Artifact::from_json(PERPETUAL).unwrap();
        let raw: Vec<String> = vec![
            "0x0101010101010101010101010101010101010101".into(),
            "0x0202020202020202020202020202020202020202".into(),
            "0x0000000000000000000000000000000000000000".into(),
            "18".into(),
        ];

        let values = artifact.coerce_constructor_args(&raw).unwrap();
        assert_eq!(values[0], DynSolValue::Address(Address::repeat_byte(0x01)));
        assert_eq!(values[3], DynSolValue::Uint(U256::from(18u64), 256));

        let bad = artifact.coerce_constructor_args(&["not an address".into(), "".into(), "".into(), "1".into()]);
        assert!(matches!(bad, Err(DeployError::Configuration(_))));
    }

    #[test]
    fn test_encode_function_call() {
        let artifact = Artifact::from_json(PERPETUAL).unwrap();
        let data = artifact
            .encode_function_call(
                "setGovernanceParameter",
                &[format!("0x{}", "00".repeat(32)), "-5".to_string()],
            )
            .unwrap();

        assert!(abi::is_call_to(&data, "setGovernanceParameter(bytes32,int256)"));
        assert_eq!(data.len(), 4 + 2 * 32);

        let missing = artifact.encode_function_call("setGovernanceParameter", &["0x00".into()]);
        assert!(matches!(missing, Err(DeployError::Configuration(_))));
    }

    #[test]
    fn test_store_scans_directory() {
        let dir = TempDir::new("strata-artifacts").unwrap();
        let nested = dir.path().join("contracts").join("Perpetual.sol");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("Perpetual.json"), PERPETUAL).unwrap();
        std::fs::write(nested.join("Perpetual.dbg.json"), r#"{ "buildInfo": "x" }"#).unwrap();
        std::fs::write(dir.path().join("package.json"), r#"{ "name": "contracts" }"#).unwrap();

        let store = ArtifactStore::load(dir.path()).unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.get("Perpetual").is_ok());
        assert!(matches!(store.get("Broker"), Err(DeployError::Configuration(_))));
    }

    #[test]
    fn test_duplicate_names_are_ambiguous() {
        let mut store = ArtifactStore::new();
        store.insert(Artifact::from_json(PERPETUAL).unwrap());
        store.insert(Artifact::from_json(PERPETUAL).unwrap());

        assert!(matches!(store.get("Perpetual"), Err(DeployError::Configuration(_))));
    }

    #[test]
    fn test_missing_directory() {
        let result = ArtifactStore::load(Path::new("/nonexistent/strata/artifacts"));
        assert!(matches!(result, Err(DeployError::Configuration(_))));
    }
}
