//! Upgradeable components: a proxy whose implementation can be repointed by its admin.
//!
//! The implementation of `<name>` is recorded under `<name>.implementation` and the
//! proxy under `<name>`, so an interrupted deployment or upgrade resumes from the
//! last confirmed piece.

use alloy_core::dyn_abi::DynSolValue;
use alloy_core::primitives::Address;

use crate::abi;
use crate::deployer::{Decision, Deployer, decide};
use crate::environment::{ImplementationRecord, Lookup, ProxyDeployment, unix_now};
use crate::error::{DeployError, Result};
use crate::ledger::Ledger;

/// Record name of the implementation of an upgradeable component.
pub fn implementation_key(name: &str) -> String {
    format!("{name}.implementation")
}

impl<L: Ledger> Deployer<L> {
    /// Deploy `name` behind a proxy administered by `admin`, or upgrade it if its
    /// code changed. Returns the proxy address, which never changes.
    pub async fn deploy_as_upgradeable(&mut self, name: &str, admin: Address) -> Result<Address> {
        self.deploy_upgradeable_component(name, name, admin).await
    }

    /// Like [`deploy_as_upgradeable`](Self::deploy_as_upgradeable) with the
    /// implementation taken from `artifact`.
    pub async fn deploy_upgradeable_component(
        &mut self,
        name: &str,
        artifact: &str,
        admin: Address,
    ) -> Result<Address> {
        if let Lookup::Override(address) = self.book().get(name) {
            return self.adopt_override(name, address).await;
        }

        let implementation = self.prepare(artifact, &[])?;

        let Some(current) = self.environment().proxy(name).cloned() else {
            let key = implementation_key(name);
            // A proxy record without proxy state is left by a run that stopped
            // before recording it. Only that same proxy may be adopted.
            let orphan = match self.book().get(name) {
                Lookup::Deployed(record) => Some(record.clone()),
                _ => None,
            };
            if let Some(record) = &orphan {
                if decide(self.book().get(&key), &implementation.fingerprint) == Decision::Deploy {
                    return Err(orphan_proxy(name, record.address, "its implementation changed"));
                }
            }

            let logic = self.ensure_deployed(&key, &implementation).await?;

            let proxy_artifact = self.options().proxy_artifact.clone();
            let proxy_args = vec![
                DynSolValue::Address(logic),
                DynSolValue::Address(admin),
                DynSolValue::Bytes(Vec::new()),
            ];
            let proxy_code = self.prepare(&proxy_artifact, &proxy_args)?;
            if let Some(record) = &orphan {
                if record.fingerprint != proxy_code.fingerprint {
                    return Err(orphan_proxy(name, record.address, "it was created with other arguments"));
                }
            }
            let proxy = self.ensure_deployed(name, &proxy_code).await?;

            self.book_mut().set_proxy(
                name,
                ProxyDeployment {
                    proxy,
                    admin,
                    implementation: ImplementationRecord {
                        address: logic,
                        fingerprint: implementation.fingerprint,
                        activated_at: unix_now(),
                    },
                    history: Vec::new(),
                },
            )?;
            tracing::info!(component = %name, proxy = %proxy, implementation = %logic, "Upgradeable component deployed");
            return Ok(proxy);
        };

        if current.admin != admin {
            return Err(DeployError::config(format!(
                "{name} is administered by {}, not {admin}",
                current.admin
            )));
        }

        if current.implementation.fingerprint == implementation.fingerprint {
            tracing::info!(
                component = %name,
                proxy = %current.proxy,
                implementation = %current.implementation.address,
                "Implementation up to date, skipping"
            );
            return Ok(current.proxy);
        }

        self.authorize_upgrade(name, admin).await?;

        let key = implementation_key(name);
        let logic = self.ensure_deployed(&key, &implementation).await?;

        let data = abi::encode_call(
            abi::UPGRADE,
            vec![DynSolValue::Address(current.proxy), DynSolValue::Address(logic)],
        );
        // The marker is cleared once the new implementation is recorded.
        let label = format!("{name}.upgrade");
        self.send_tracked(&label, admin, data)
            .await
            .map_err(|e| DeployError::deployment(name, e))?;

        let mut upgraded = current.clone();
        upgraded.history.push(current.implementation);
        upgraded.implementation = ImplementationRecord {
            address: logic,
            fingerprint: implementation.fingerprint,
            activated_at: unix_now(),
        };
        self.book_mut().set_proxy(name, upgraded)?;
        self.book_mut().clear_pending_call(&label)?;

        tracing::info!(
            component = %name,
            proxy = %current.proxy,
            implementation = %logic,
            "Proxy upgraded"
        );
        Ok(current.proxy)
    }

    /// Fail unless the sender owns the proxy admin.
    async fn authorize_upgrade(&self, name: &str, admin: Address) -> Result<()> {
        let owner = abi::decode_address(&self.read(admin, abi::encode_call(abi::OWNER, vec![])).await?)?;

        if owner != self.sender() {
            return Err(DeployError::Unauthorized {
                component: name.to_string(),
                admin,
                owner,
                sender: self.sender(),
            });
        }
        Ok(())
    }
}

fn orphan_proxy(name: &str, proxy: Address, reason: &str) -> DeployError {
    DeployError::config(format!(
        "{name}: proxy {proxy} is recorded without its proxy state and {reason}; \
         refusing to deploy a second proxy"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_implementation_key() {
        assert_eq!(implementation_key("PoolCreator"), "PoolCreator.implementation");
    }
}
