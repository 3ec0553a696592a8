//! Index generation naming: `<base>_v<N>`

use crate::{MigrationError, Result};

const VERSION_SEPARATOR: &str = "_v";

/// Split `<base>_v<N>` into base and version
pub fn parse_index_name(name: &str) -> Result<(&str, u32)> {
    let unrecognized = || MigrationError::UnrecognizedIndexName(name.to_string());

    let (base, version) = name.rsplit_once(VERSION_SEPARATOR).ok_or_else(unrecognized)?;
    if base.is_empty() || version.is_empty() || !version.bytes().all(|b| b.is_ascii_digit()) {
        return Err(unrecognized());
    }
    let version = version.parse::<u32>().map_err(|_| unrecognized())?;
    Ok((base, version))
}

pub fn index_name(base: &str, version: u32) -> String {
    format!("{}{}{}", base, VERSION_SEPARATOR, version)
}

/// One step of an alias's generation history
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexGeneration {
    pub alias: String,
    pub current: String,
    pub candidate: String,
    pub version: u32,
}

impl IndexGeneration {
    /// Next generation after `current`, which the alias resolves to
    pub fn next(alias: &str, current: &str) -> Result<Self> {
        let (base, version) = parse_index_name(current)?;
        let next = version
            .checked_add(1)
            .ok_or_else(|| MigrationError::UnrecognizedIndexName(current.to_string()))?;

        Ok(Self {
            alias: alias.to_string(),
            current: current.to_string(),
            candidate: index_name(base, next),
            version: next,
        })
    }
}
