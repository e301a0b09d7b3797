use std::path::Path;

use anyhow::{Context, Result};
use phonecast_protocol::ClientConfig;
use serde::de::DeserializeOwned;

const SECTIONS: [&str; 5] = ["input", "pipeline", "quality", "p2p", "session"];

/// Read the client config. A missing file means built-in defaults; a bad
/// value is reported with the `[section]` it belongs to.
pub fn load_config(path: &Path) -> Result<ClientConfig> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(path = %path.display(), "No client config, running with built-in defaults");
            return Ok(ClientConfig::default());
        }
        Err(e) => {
            return Err(e).with_context(|| format!("Cannot read client config {}", path.display()));
        }
    };

    let table: toml::Table = contents
        .parse()
        .with_context(|| format!("Client config {} is not valid TOML", path.display()))?;
    for key in table.keys().filter(|key| !SECTIONS.contains(&key.as_str())) {
        tracing::warn!(section = %key, "Ignoring unknown client config section");
    }

    let config = ClientConfig {
        input: section(&table, "input")?,
        pipeline: section(&table, "pipeline")?,
        quality: section(&table, "quality")?,
        p2p: section(&table, "p2p")?,
        session: section(&table, "session")?,
    };
    tracing::info!(
        path = %path.display(),
        strategy = ?config.pipeline.strategy,
        quality = config.quality.enabled,
        "Client config loaded"
    );
    Ok(config)
}

fn section<T: DeserializeOwned + Default>(table: &toml::Table, name: &str) -> Result<T> {
    match table.get(name) {
        Some(value) => value
            .clone()
            .try_into()
            .with_context(|| format!("Invalid [{name}] section in client config")),
        None => Ok(T::default()),
    }
}

/// Log every validation issue. Returns `false` when any of them is an error.
pub fn report_issues(config: &ClientConfig) -> bool {
    let Err(issues) = config.validate() else {
        return true;
    };
    let mut ok = true;
    for issue in &issues {
        if issue.starts_with("ERROR:") {
            tracing::error!("{}", issue);
            ok = false;
        } else {
            tracing::warn!("{}", issue);
        }
    }
    ok
}
