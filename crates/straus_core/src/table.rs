//! Identity tables
//!
//! An ordered list of validated identities plus a SHA-256 fingerprint of the
//! canonical form. The fingerprint is the table version recorded in every
//! checkpoint, so a resumed run can tell whether the filter it built matches
//! the one that produced the checkpointed results.

use crate::error::{Error, Result};
use crate::identity::{Family, Identity, Witness};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;

const MORDELL_JSON: &str = include_str!("../../../tables/mordell.json");
const SALEZ_EXTENSION_JSON: &str = include_str!("../../../tables/salez_extension.json");

/// On-disk shape of a table entry
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct IdentitySpec {
    pub modulus: u64,
    pub residues: Vec<u64>,
    pub formula: Family,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// On-disk shape of a table
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    pub name: String,
    pub identities: Vec<IdentitySpec>,
}

/// Validated identity table
#[derive(Debug, Clone)]
pub struct IdentityTable {
    name: String,
    identities: Vec<Identity>,
    fingerprint: String,
}

impl IdentityTable {
    /// Validate a parsed table. The first bad entry rejects the whole table.
    pub fn from_spec(spec: TableSpec) -> Result<Self> {
        let mut identities = Vec::with_capacity(spec.identities.len());
        for (entry, id) in spec.identities.into_iter().enumerate() {
            let identity = Identity::new(id.modulus, &id.residues, id.formula, id.source)
                .map_err(|reason| Error::table(entry, reason))?;
            identities.push(identity);
        }
        let fingerprint = fingerprint_of(&identities)?;
        Ok(Self {
            name: spec.name,
            identities,
            fingerprint,
        })
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        Self::from_spec(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// The classical mod-840 Mordell identities.
    pub fn mordell() -> Result<Self> {
        Self::from_json_str(MORDELL_JSON)
    }

    /// Further identities for refining the Mordell filter.
    pub fn salez_extension() -> Result<Self> {
        Self::from_json_str(SALEZ_EXTENSION_JSON)
    }

    /// This table followed by the identities of `other`.
    pub fn extended_with(&self, other: &IdentityTable) -> Result<Self> {
        let identities: Vec<Identity> = self
            .identities
            .iter()
            .chain(other.identities.iter())
            .cloned()
            .collect();
        let fingerprint = fingerprint_of(&identities)?;
        Ok(Self {
            name: format!("{}+{}", self.name, other.name),
            identities,
            fingerprint,
        })
    }

    pub fn to_spec(&self) -> TableSpec {
        TableSpec {
            name: self.name.clone(),
            identities: self.identities.iter().map(spec_of).collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn identities(&self) -> &[Identity] {
        &self.identities
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    /// Hex SHA-256 of the canonical identity list.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// First identity resolving `n`, with its witness.
    pub fn lookup(&self, n: u64) -> Option<(&Identity, Witness)> {
        self.identities
            .iter()
            .find_map(|id| id.witness_for(n).map(|w| (id, w)))
    }
}

fn spec_of(id: &Identity) -> IdentitySpec {
    IdentitySpec {
        modulus: id.modulus,
        residues: id.residues().to_vec(),
        formula: id.family,
        source: id.source.clone(),
    }
}

/// Name and source notes do not change which residues are resolved, so they
/// stay out of the fingerprint.
fn fingerprint_of(identities: &[Identity]) -> Result<String> {
    let mut hasher = Sha256::new();
    for id in identities {
        let canonical = IdentitySpec {
            source: None,
            ..spec_of(id)
        };
        // field order is fixed by the struct, residues are already sorted
        hasher.update(serde_json::to_vec(&canonical)?);
        hasher.update(b"\n");
    }
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_tables_load() {
        let mordell = IdentityTable::mordell().unwrap();
        assert_eq!(mordell.len(), 6);
        let moduli: Vec<u64> = mordell.identities().iter().map(|i| i.modulus).collect();
        assert_eq!(moduli, vec![2, 4, 8, 3, 7, 15]);

        let ext = IdentityTable::salez_extension().unwrap();
        assert!(ext.identities().iter().any(|i| i.modulus == 184));
    }

    #[test]
    fn test_rejects_zero_modulus() {
        let json = r#"{"name":"bad","identities":[
            {"modulus":3,"residues":[2],"formula":{"family":"n-multiple","s":1}},
            {"modulus":0,"residues":[],"formula":{"family":"halving"}}]}"#;
        match IdentityTable::from_json_str(json) {
            Err(Error::Table { entry, .. }) => assert_eq!(entry, 1),
            other => panic!("expected table error, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_residue_out_of_range() {
        let json = r#"{"name":"bad","identities":[
            {"modulus":7,"residues":[3,7],"formula":{"family":"n-multiple","s":2}}]}"#;
        assert!(matches!(
            IdentityTable::from_json_str(json),
            Err(Error::Table { entry: 0, .. })
        ));
    }

    #[test]
    fn test_rejects_unresolvable_residue_and_bad_json() {
        let json = r#"{"name":"bad","identities":[
            {"modulus":7,"residues":[1],"formula":{"family":"n-multiple","s":2}}]}"#;
        assert!(matches!(
            IdentityTable::from_json_str(json),
            Err(Error::Table { .. })
        ));

        let unknown = r#"{"name":"bad","identities":[
            {"modulus":7,"residues":[3],"formula":{"family":"mystery"}}]}"#;
        assert!(matches!(
            IdentityTable::from_json_str(unknown),
            Err(Error::Json(_))
        ));
    }

    #[test]
    fn test_fingerprint_stable_and_sensitive() {
        let a = IdentityTable::mordell().unwrap();
        let b = IdentityTable::from_spec(a.to_spec()).unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);

        let mut spec = a.to_spec();
        spec.name = "renamed".into();
        spec.identities[5].residues.reverse();
        let renamed = IdentityTable::from_spec(spec).unwrap();
        assert_eq!(a.fingerprint(), renamed.fingerprint());

        let mut spec = a.to_spec();
        spec.identities[5].residues.pop();
        let smaller = IdentityTable::from_spec(spec).unwrap();
        assert_ne!(a.fingerprint(), smaller.fingerprint());
    }

    #[test]
    fn test_extended_fingerprint_matches_reloaded_union() {
        let base = IdentityTable::mordell().unwrap();
        let ext = IdentityTable::salez_extension().unwrap();
        let union = base.extended_with(&ext).unwrap();
        assert_eq!(union.len(), base.len() + ext.len());
        assert_ne!(union.fingerprint(), base.fingerprint());

        let reloaded = IdentityTable::from_spec(union.to_spec()).unwrap();
        assert_eq!(reloaded.fingerprint(), union.fingerprint());
    }

    #[test]
    fn test_lookup_first_match() {
        let t = IdentityTable::mordell().unwrap();
        let (id, _) = t.lookup(5).unwrap();
        assert_eq!(id.modulus, 8);
        let (id, _) = t.lookup(2).unwrap();
        assert_eq!(id.modulus, 2);
        assert!(t.lookup(1009).is_none());
    }
}
