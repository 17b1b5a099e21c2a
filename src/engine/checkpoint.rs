//! Checkpoint persistence.
//!
//! A checkpoint is a whole-state serialization sufficient to resume the
//! run at the next iteration. With `cp_overwrite` a single file is
//! reused; otherwise each file name encodes
//! `<iteration>_<bestFitness>_<basename>`, and the final checkpoint is
//! prefixed `final_`.

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::Error;
use crate::net::SerializationMode;

use super::config::EngineConfig;

/// Computes the checkpoint path for the given loop state.
pub fn checkpoint_path(
    config: &EngineConfig,
    iteration: u32,
    best_raw: f64,
    is_final: bool,
) -> PathBuf {
    let name = if config.cp_overwrite {
        config.cp_base_name.clone()
    } else {
        let encoded = format!("{}_{}_{}", iteration, best_raw, config.cp_base_name);
        if is_final {
            format!("final_{encoded}")
        } else {
            encoded
        }
    };
    config.cp_directory.join(name)
}

/// Serializes a snapshot to disk under the configured encoding.
pub fn write_checkpoint<T: Serialize>(
    snapshot: &T,
    config: &EngineConfig,
    iteration: u32,
    best_raw: f64,
    is_final: bool,
) -> Result<PathBuf, Error> {
    let path = checkpoint_path(config, iteration, best_raw, is_final);
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let bytes = encode(snapshot, config.cp_ser_mode)?;
    fs::write(&path, bytes)?;
    debug!(path = %path.display(), iteration, "checkpoint written");
    Ok(path)
}

/// Reads a snapshot back from disk.
pub fn read_checkpoint<T: DeserializeOwned>(
    path: &Path,
    mode: SerializationMode,
) -> Result<T, Error> {
    let bytes = fs::read(path)?;
    decode(&bytes, mode)
}

fn encode<T: Serialize>(value: &T, mode: SerializationMode) -> Result<Vec<u8>, Error> {
    match mode {
        SerializationMode::Text => {
            serde_json::to_vec_pretty(value).map_err(|e| Error::Serialization(e.to_string()))
        }
        SerializationMode::Xml => quick_xml::se::to_string_with_root("checkpoint", value)
            .map(String::into_bytes)
            .map_err(|e| Error::Serialization(e.to_string())),
        SerializationMode::Binary => {
            bincode::serialize(value).map_err(|e| Error::Serialization(e.to_string()))
        }
    }
}

fn decode<T: DeserializeOwned>(bytes: &[u8], mode: SerializationMode) -> Result<T, Error> {
    match mode {
        SerializationMode::Text => {
            serde_json::from_slice(bytes).map_err(|e| Error::Serialization(e.to_string()))
        }
        SerializationMode::Xml => {
            let text =
                std::str::from_utf8(bytes).map_err(|e| Error::Serialization(e.to_string()))?;
            quick_xml::de::from_str(text).map_err(|e| Error::Serialization(e.to_string()))
        }
        SerializationMode::Binary => {
            bincode::deserialize(bytes).map_err(|e| Error::Serialization(e.to_string()))
        }
    }
}
