use anyhow::{Context, Result, bail};
use schemars::{Schema, schema_for};
use serde_valid::Validate;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::Path;
use tracing::debug;

use super::models::{Config, MacroDef};

/// Parse and validate a JSON config held in memory.
pub fn load_from_str(s: &str) -> Result<Config> {
    checked(serde_json::from_str(s), "string")
}

/// Parse and validate a JSON config from any reader.
pub fn load_from_reader<R: Read>(reader: R) -> Result<Config> {
    checked(serde_json::from_reader(reader), "reader")
}

/// Blocking load; used by tests and tools that run outside the runtime.
pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let file = File::open(path)
        .with_context(|| format!("Cannot open config {}", path.display()))?;
    let cfg = load_from_reader(BufReader::new(file))
        .with_context(|| format!("Bad config {}", path.display()))?;
    debug!(target: "macrobot::config", path = %path.display(), macros = cfg.macros.len(), "Config loaded");
    Ok(cfg)
}

/// Load from disk on the tokio runtime.
pub async fn load_from_path_async<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Cannot read config {}", path.display()))?;
    let cfg = load_from_str(&text).with_context(|| format!("Bad config {}", path.display()))?;
    debug!(target: "macrobot::config", path = %path.display(), macros = cfg.macros.len(), "Config loaded");
    Ok(cfg)
}

fn checked(parsed: serde_json::Result<Config>, origin: &str) -> Result<Config> {
    let cfg = parsed.with_context(|| format!("Config from {origin} is not valid JSON for this schema"))?;
    validate_config(&cfg)?;
    Ok(cfg)
}

/// Generate the JSON Schema for the Config model (for external validation or tooling).
pub fn generate_schema() -> Schema {
    schema_for!(Config)
}

/// Write the JSON Schema for the Config model to any writer (pretty-printed).
pub fn write_schema_to_writer<W: Write>(mut writer: W) -> Result<()> {
    let schema = generate_schema();
    let json = serde_json::to_string_pretty(&schema).context("Failed to serialize schema")?;
    writer
        .write_all(json.as_bytes())
        .context("Failed to write schema to writer")?;
    Ok(())
}

/// Perform field-level validation and cross-macro sanity checks.
/// - Ensure numeric settings are within their declared bounds.
/// - Ensure macro names are unique and non-empty.
/// - Ensure each macro has exactly one of `text` or `path`.
pub fn validate_config(cfg: &Config) -> Result<()> {
    cfg.validate()
        .map_err(|e| anyhow::anyhow!("{e}"))
        .context("Invalid settings")?;

    let mut seen = BTreeSet::new();
    for (idx, def) in cfg.macros.iter().enumerate() {
        validate_macro_def(def).with_context(|| format!("Invalid macro at index {idx}"))?;
        if !seen.insert(def.name.as_str()) {
            bail!("Macro name '{}' is defined more than once", def.name);
        }
    }
    Ok(())
}

fn validate_macro_def(def: &MacroDef) -> Result<()> {
    if def.name.trim().is_empty() {
        bail!("Macro name must not be empty");
    }
    match (&def.text, &def.path) {
        (Some(_), None) | (None, Some(_)) => Ok(()),
        (Some(_), Some(_)) => bail!("Macro '{}' sets both `text` and `path`", def.name),
        (None, None) => bail!("Macro '{}' needs one of `text` or `path`", def.name),
    }
}
