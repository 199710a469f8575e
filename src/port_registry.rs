// Port-name reference table refresh from the service-name registry CSV.
// Full replace: the table is emptied and reloaded in one transaction.

use std::collections::BTreeMap;
use std::io::Read;
use std::time::Duration;

use tracing::{debug, info, instrument};

use crate::config::RegistryConfig;
use crate::error::RefreshError;
use crate::flow_store::FlowStoreClient;
use crate::models::{MAX_SERVICE_NAME_LEN, PortNameEntry};
use crate::version;

/// Parses registry rows `service name, port number, ...`.
///
/// Rows without a name or with a non-numeric port (the header, port ranges) are
/// skipped. When several rows name the same port, the last one wins.
pub fn parse_registry<R: Read>(reader: R) -> Result<Vec<PortNameEntry>, csv::Error> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);

    let mut by_port: BTreeMap<u16, String> = BTreeMap::new();
    for record in rdr.records() {
        let record = record?;
        if record.len() < 2 {
            continue;
        }
        let name = record[0].trim();
        if name.is_empty() {
            continue;
        }
        let Ok(port) = record[1].trim().parse::<u16>() else {
            continue;
        };
        if name.len() > MAX_SERVICE_NAME_LEN {
            debug!(port, name, "service name too long, skipped");
            continue;
        }
        by_port.insert(port, name.to_string());
    }

    Ok(by_port
        .into_iter()
        .map(|(port, name)| PortNameEntry { port, name })
        .collect())
}

/// Downloads the registry feed.
#[instrument(skip(config), fields(url = %config.url))]
pub async fn fetch_registry(config: &RegistryConfig) -> Result<String, RefreshError> {
    let fetch_err = |source| RefreshError::Fetch {
        url: config.url.clone(),
        source,
    };
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .user_agent(version::user_agent())
        .build()
        .map_err(fetch_err)?;
    let body = client
        .get(&config.url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(fetch_err)?
        .text()
        .await
        .map_err(fetch_err)?;
    debug!(bytes = body.len(), "registry fetched");
    Ok(body)
}

/// Replaces the port-name table with `entries`. Refuses an empty set so a
/// broken feed never wipes the table.
pub async fn load_entries(
    store: &FlowStoreClient,
    entries: &[PortNameEntry],
) -> Result<u64, RefreshError> {
    if entries.is_empty() {
        return Err(RefreshError::Empty);
    }
    let inserted = store.replace_port_names(entries).await?;
    info!(store = store.backend(), ports = inserted, "port-name table replaced");
    Ok(inserted)
}

/// Fetch, parse and load.
pub async fn refresh(
    store: &FlowStoreClient,
    config: &RegistryConfig,
) -> Result<u64, RefreshError> {
    let body = fetch_registry(config).await?;
    let entries = parse_registry(body.as_bytes())?;
    load_entries(store, &entries).await
}

/// Parse and load from a local copy of the feed.
pub async fn refresh_from_reader<R: Read>(
    store: &FlowStoreClient,
    reader: R,
) -> Result<u64, RefreshError> {
    let entries = parse_registry(reader)?;
    load_entries(store, &entries).await
}
