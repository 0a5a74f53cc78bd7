//! Startup: build the registry from the stored root addresses and every
//! entity indexed so far.

use alloy::primitives::Address;
use anyhow::{bail, Context as _, Result};
use homebase_common::store::{DocPath, DocumentStore, Fields};
use tracing::{info, warn};

use crate::config::Config;
use crate::reconcilers::ContractKind;
use crate::registry::Registry;

const HOMEBASE_CONFIG: &str = "contracts";
const AFTERME_CONFIG: &str = "networks";

fn address_field(fields: &Fields, key: &str) -> Option<Address> {
    fields.get(key)?.as_str()?.parse().ok()
}

/// Root factories plus one token and one organization per stored DAO.
/// Returns false when there is neither a configuration document nor a
/// factory address on the command line.
async fn load_homebase(store: &dyn DocumentStore, config: &Config, registry: &mut Registry) -> Result<bool> {
    let path = DocPath::new(HOMEBASE_CONFIG, config.profile.config_doc);
    let contracts = store.get(&path).await.context("Failed to read homebase config")?;
    if contracts.is_none() && !config.roots.has_homebase() {
        warn!("No homebase config at {}, homebase indexing disabled", path);
        return Ok(false);
    }

    for (field, kind, flag) in [
        ("wrapper", ContractKind::RootFactory, config.roots.wrapper),
        ("wrapper_w", ContractKind::WrappedRootFactory, config.roots.wrapper_w),
    ] {
        let stored = contracts.as_ref().and_then(|fields| address_field(fields, field));
        match flag.or(stored) {
            Some(address) => {
                registry.track(address, kind);
                info!("Root factory {} ({:?}) at {}", field, kind, address);
            }
            None => warn!("Homebase config {} has no valid `{}` address", path, field),
        }
    }

    let daos = store
        .list(config.profile.daos_collection)
        .await
        .context("Failed to list organizations")?;
    let mut loaded = 0;
    for (id, fields) in &daos {
        let org = address_field(fields, "address").or_else(|| id.parse().ok());
        let token = address_field(fields, "token");
        match (org, token) {
            (Some(org), Some(token)) => {
                registry.track(token, ContractKind::GovernanceToken { org });
                registry.track(org, ContractKind::Organization { token });
                loaded += 1;
            }
            _ => warn!("Organization document {} has no usable address/token, skipping", id),
        }
    }
    info!("Loaded {} of {} stored organizations", loaded, daos.len());
    Ok(true)
}

/// The will factory plus every stored will
async fn load_afterme(store: &dyn DocumentStore, config: &Config, registry: &mut Registry) -> Result<bool> {
    let path = DocPath::new(AFTERME_CONFIG, config.profile.config_doc);
    let network = store.get(&path).await.context("Failed to read afterme config")?;
    let stored = network
        .as_ref()
        .and_then(|fields| address_field(fields, "sourceContractAddress"));
    let Some(source) = config.roots.will_factory.or(stored) else {
        warn!("Afterme config {} has no valid `sourceContractAddress`, afterme indexing disabled", path);
        return Ok(false);
    };
    registry.track(source, ContractKind::WillFactory);
    info!("Will factory at {}", source);

    let wills = store
        .list(config.profile.wills_collection)
        .await
        .context("Failed to list wills")?;
    let mut loaded = 0;
    for (id, _) in &wills {
        match id.parse::<Address>() {
            Ok(will) => {
                registry.track(will, ContractKind::Will);
                loaded += 1;
            }
            Err(_) => warn!("Will document id {} is not an address, skipping", id),
        }
    }
    info!("Loaded {} of {} stored wills", loaded, wills.len());
    Ok(true)
}

pub async fn build_registry(store: &dyn DocumentStore, config: &Config) -> Result<Registry> {
    let mut registry = Registry::new();
    let mut enabled = 0;

    if config.run_homebase() && load_homebase(store, config, &mut registry).await? {
        enabled += 1;
    }
    if config.run_afterme() && load_afterme(store, config, &mut registry).await? {
        enabled += 1;
    }

    if enabled == 0 {
        bail!(
            "No app could be configured for {:?}; check the {} and {} documents or pass the root addresses as flags",
            config.network,
            HOMEBASE_CONFIG,
            AFTERME_CONFIG
        );
    }

    info!(
        "Registry ready: {} reconcilers, {} watched addresses",
        registry.len(),
        registry.watched()
    );
    Ok(registry)
}
