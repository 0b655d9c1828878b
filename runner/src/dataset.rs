use serde_json::{value::RawValue, Map, Value};
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, info, warn};

/// one record exactly as it appears in the source file
pub type RawRecord = Box<RawValue>;
/// one record decoded into its top level fields
pub type ParsedRecord = Map<String, Value>;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("Failed to read records {path:?}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to decode dataset into {form}")]
    Decode {
        form: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("Record #{index} is missing the field '{field}'")]
    MissingField { index: usize, field: &'static str },
    #[error("Dataset holds {len} records but at least {required} are required")]
    TooSmall { len: usize, required: usize },
}

#[derive(Debug)]
/// The benchmark dataset, decoded twice from the same bytes.
///
/// `raw` feeds inserts without any re-encoding, `parsed` is used wherever fields have to be read
/// or added. Both always hold the same number of records.
pub struct Dataset {
    pub raw: Vec<RawRecord>,
    pub parsed: Vec<ParsedRecord>,
}

impl Dataset {
    /// read and decode the JSON array stored at `path`
    pub fn load(path: &Path) -> Result<Self, DatasetError> {
        let bytes = fs::read(path).map_err(|source| DatasetError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        debug!(path = ?path, bytes = bytes.len(), "Read dataset");

        let dataset = Self::from_slice(&bytes)?;
        if dataset.is_empty() {
            warn!(path = ?path, "Dataset holds no records");
        }

        info!(path = ?path, records = dataset.len(), "Loaded dataset");

        Ok(dataset)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, DatasetError> {
        let raw = serde_json::from_slice::<Vec<RawRecord>>(bytes).map_err(|source| {
            DatasetError::Decode {
                form: "slice of raw json",
                source,
            }
        })?;
        let parsed = serde_json::from_slice::<Vec<ParsedRecord>>(bytes).map_err(|source| {
            DatasetError::Decode {
                form: "slice of maps",
                source,
            }
        })?;

        Ok(Self { raw, parsed })
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// check that every parsed record carries all of `fields`
    pub fn require_fields(&self, fields: &[&'static str]) -> Result<(), DatasetError> {
        for (index, record) in self.parsed.iter().enumerate() {
            if let Some(field) = fields.iter().find(|field| !record.contains_key(**field)) {
                return Err(DatasetError::MissingField {
                    index,
                    field: *field,
                });
            }
        }

        Ok(())
    }

    pub fn require_len(&self, required: usize) -> Result<(), DatasetError> {
        if self.len() < required {
            Err(DatasetError::TooSmall {
                len: self.len(),
                required,
            })
        } else {
            Ok(())
        }
    }
}
