//! Multi-document YAML manifests of `Site` and `TmSource` objects.

use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::resource::Object;

/// Parse every document of a YAML stream into objects.
///
/// Empty documents are skipped. Workers are rejected: they belong to the
/// controller, not to operators.
///
/// # Errors
///
/// Returns [`Error::YamlParseFailed`] for malformed documents and
/// [`Error::InvalidConfig`] for `Worker` entries.
pub fn parse_manifest(input: &str) -> Result<Vec<Object>> {
    let mut objects = Vec::new();
    for document in serde_yaml::Deserializer::from_str(input) {
        let value = serde_yaml::Value::deserialize(document)
            .map_err(|e| Error::yaml_parse_failed(e.to_string()))?;
        if value.is_null() {
            continue;
        }
        let object: Object =
            serde_yaml::from_value(value).map_err(|e| Error::yaml_parse_failed(e.to_string()))?;
        if let Object::Worker(worker) = &object {
            return Err(Error::invalid_config(format!(
                "worker '{}' cannot be declared in a manifest",
                worker.metadata.key()
            )));
        }
        objects.push(object);
    }
    Ok(objects)
}

/// Read and parse a manifest file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load_manifest(path: impl AsRef<Path>) -> Result<Vec<Object>> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::file_read_failed(path, e.to_string()))?;
    parse_manifest(&content)
}
