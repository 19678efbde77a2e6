// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Circuit file codec: versioned JSON on disk.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::Circuit;

/// Schema version this crate reads and writes.
pub const CIRCUIT_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct CircuitFile {
    schema_version: u32,
    circuit: Circuit,
}

/// Circuit file load/save failure.
#[derive(Debug, Error)]
pub enum CircuitFileError {
    /// Filesystem-level failure.
    #[error("circuit file io: {0}")]
    Io(#[from] std::io::Error),

    /// Content is not valid JSON for the expected shape.
    #[error("circuit file parse: {0}")]
    Parse(#[from] serde_json::Error),

    /// `schema_version` is not one this crate accepts.
    #[error("circuit file schema mismatch: found {found}, expected {expected}")]
    SchemaMismatch {
        /// Version in the file.
        found: u32,
        /// Version this crate writes.
        expected: u32,
    },
}

/// Reads and validates a circuit file.
pub fn load_circuit(path: &Path) -> Result<Circuit, CircuitFileError> {
    let raw = std::fs::read_to_string(path)?;
    let file: CircuitFile = serde_json::from_str(&raw)?;
    if file.schema_version != CIRCUIT_SCHEMA_VERSION {
        return Err(CircuitFileError::SchemaMismatch {
            found: file.schema_version,
            expected: CIRCUIT_SCHEMA_VERSION,
        });
    }
    Ok(file.circuit)
}

/// Writes a circuit file (pretty JSON, trailing newline).
pub fn save_circuit(path: &Path, circuit: &Circuit) -> Result<(), CircuitFileError> {
    let file = CircuitFile {
        schema_version: CIRCUIT_SCHEMA_VERSION,
        circuit: circuit.clone(),
    };
    let mut body = serde_json::to_string_pretty(&file)?;
    body.push('\n');
    std::fs::write(path, body)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::model::ComponentClass;
    use crate::ops::EditOperation;

    #[test]
    fn save_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("demo.vltc");

        let mut circuit = Circuit::new();
        circuit
            .apply(EditOperation::AddComponent {
                id: "k".into(),
                class: ComponentClass::Constant,
                properties: std::collections::BTreeMap::new(),
                custom_pins: Vec::new(),
            })
            .unwrap();
        save_circuit(&path, &circuit).unwrap();

        let loaded = load_circuit(&path).unwrap();
        assert_eq!(loaded, circuit);
    }

    #[test]
    fn unknown_schema_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("demo.vltc");
        std::fs::write(&path, r#"{"schema_version": 9, "circuit": {}}"#).unwrap();
        assert!(matches!(
            load_circuit(&path),
            Err(CircuitFileError::SchemaMismatch { found: 9, .. })
        ));
    }
}
