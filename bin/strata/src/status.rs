//! Human-readable view of an environment.

use anyhow::{Context, Result};
use comfy_table::presets::UTF8_FULL;
use comfy_table::{ContentArrangement, Table};
use strata_deploy::Environment;

use crate::cli::OutputFormat;

pub fn print(environment: &Environment, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(environment)
                .context("Failed to serialize the environment")?;
            println!("{json}");
        }
        OutputFormat::Table => {
            for table in tables(environment) {
                println!("{table}");
            }
        }
    }
    Ok(())
}

fn new_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    table
}

/// One table per non-empty section of the environment.
fn tables(environment: &Environment) -> Vec<Table> {
    let mut tables = Vec::new();

    let mut components = new_table(vec!["Component", "Address", "Source", "Artifact", "Fingerprint"]);
    for (name, address) in &environment.overrides {
        components.add_row(vec![
            name.clone(),
            address.to_string(),
            "override".to_string(),
            String::new(),
            String::new(),
        ]);
    }
    for (name, record) in &environment.records {
        if environment.overrides.contains_key(name) {
            continue;
        }
        components.add_row(vec![
            name.clone(),
            record.address.to_string(),
            "deployed".to_string(),
            record.artifact.clone(),
            record.fingerprint.short().to_string(),
        ]);
    }
    tables.push(components);

    if !environment.proxies.is_empty() {
        let mut proxies = new_table(vec!["Upgradeable", "Proxy", "Admin", "Implementation", "Upgrades"]);
        for (name, proxy) in &environment.proxies {
            proxies.add_row(vec![
                name.clone(),
                proxy.proxy.to_string(),
                proxy.admin.to_string(),
                proxy.implementation.address.to_string(),
                proxy.history.len().to_string(),
            ]);
        }
        tables.push(proxies);
    }

    if !environment.versions.is_empty() {
        let mut versions = new_table(vec!["Registry", "Version", "Modules", "Description"]);
        for (registry, entries) in &environment.versions {
            for entry in entries {
                versions.add_row(vec![
                    registry.clone(),
                    entry.version.to_string(),
                    entry.module_names.join(", "),
                    entry.description.clone(),
                ]);
            }
        }
        tables.push(versions);
    }

    if !environment.pending.is_empty() || !environment.pending_calls.is_empty() {
        let mut pending = new_table(vec!["Unconfirmed", "Kind", "Transaction", "Fingerprint"]);
        let deployments = environment.pending.iter().map(|entry| (entry, "deployment"));
        let calls = environment.pending_calls.iter().map(|entry| (entry, "call"));
        for ((name, marker), kind) in deployments.chain(calls) {
            pending.add_row(vec![
                name.clone(),
                kind.to_string(),
                marker.tx_hash.to_string(),
                marker.fingerprint.short().to_string(),
            ]);
        }
        tables.push(pending);
    }

    tables
}
