use crate::error::ConvertError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// A canonical output track. Source tracks whose General MIDI family (`program / 8`)
/// is listed in `families` are merged into it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Bucket {
    pub name: String,
    pub program: u8,
    #[serde(default)]
    pub families: Vec<u8>,
}

/// Ordered table of output tracks. Sources matching no bucket land in `fallback`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Instrumentation {
    pub buckets: Vec<Bucket>,
    pub fallback: usize,
}

impl Default for Instrumentation {
    fn default() -> Self {
        let bucket = |name: &str, program: u8, families: &[u8]| Bucket {
            name: name.to_string(),
            program,
            families: families.to_vec(),
        };

        Self {
            buckets: vec![
                bucket("Piano", 0, &[0]),
                bucket("Guitar", 24, &[3]),
                bucket("Bass", 32, &[4]),
                bucket("Strings", 48, &[5]),
            ],
            fallback: 3,
        }
    }
}

impl Instrumentation {
    pub fn from_json(json: &str) -> Result<Self> {
        let table: Instrumentation =
            serde_json::from_str(json).context("Failed to parse instrumentation table")?;
        table.validate()?;
        Ok(table)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = fs::read_to_string(path.as_ref()).with_context(|| {
            format!(
                "Failed to read instrumentation file {}",
                path.as_ref().display()
            )
        })?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<(), ConvertError> {
        if self.buckets.is_empty() {
            return Err(ConvertError::Instrumentation("no buckets defined".into()));
        }
        if self.fallback >= self.buckets.len() {
            return Err(ConvertError::Instrumentation(format!(
                "fallback index {} out of range for {} buckets",
                self.fallback,
                self.buckets.len()
            )));
        }
        if let Some(bucket) = self.buckets.iter().find(|b| b.program > 127) {
            return Err(ConvertError::Instrumentation(format!(
                "bucket '{}' has program {} outside 0..=127",
                bucket.name, bucket.program
            )));
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Index of the bucket a melodic source track with `program` belongs to.
    pub fn bucket_for(&self, program: u8) -> usize {
        let family = program / 8;
        self.buckets
            .iter()
            .position(|b| b.families.contains(&family))
            .unwrap_or(self.fallback)
    }

    pub fn programs(&self) -> Vec<u8> {
        self.buckets.iter().map(|b| b.program).collect()
    }
}
