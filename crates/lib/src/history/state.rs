//! Execution state snapshots.
//!
//! Snapshots are produced by the fingerprinting collaborator and are never
//! recomputed here. The same shape describes both the state captured before
//! an execution and the state persisted after the last successful one.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::util::hash::Fingerprint;

/// Fingerprints of the files making up one file property.
///
/// Keys are normalized paths, values are content fingerprints. Ordering is
/// deterministic so that comparisons and reported changes are stable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileCollectionFingerprint {
  files: BTreeMap<String, Fingerprint>,
}

impl FileCollectionFingerprint {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn from_files<I, P, F>(files: I) -> Self
  where
    I: IntoIterator<Item = (P, F)>,
    P: Into<String>,
    F: Into<Fingerprint>,
  {
    Self {
      files: files
        .into_iter()
        .map(|(path, fingerprint)| (path.into(), fingerprint.into()))
        .collect(),
    }
  }

  pub fn files(&self) -> &BTreeMap<String, Fingerprint> {
    &self.files
  }

  pub fn get(&self, path: &str) -> Option<&Fingerprint> {
    self.files.get(path)
  }

  pub fn is_empty(&self) -> bool {
    self.files.is_empty()
  }

  pub fn len(&self) -> usize {
    self.files.len()
  }
}

/// A snapshot of a unit of work's implementation, inputs and outputs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionState {
  /// Fingerprint of the code implementing the unit, if known.
  pub implementation: Option<Fingerprint>,

  /// Non-file input properties (name -> value fingerprint).
  pub input_properties: BTreeMap<String, Fingerprint>,

  /// File input properties (name -> file fingerprints).
  pub input_file_properties: BTreeMap<String, FileCollectionFingerprint>,

  /// File output properties (name -> file fingerprints).
  pub output_file_properties: BTreeMap<String, FileCollectionFingerprint>,
}

/// State captured immediately before an execution attempt.
pub type BeforeExecutionState = ExecutionState;

/// State persisted after the most recent successful execution.
pub type AfterPreviousExecutionState = ExecutionState;

impl ExecutionState {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_implementation(mut self, implementation: impl Into<Fingerprint>) -> Self {
    self.implementation = Some(implementation.into());
    self
  }

  pub fn with_input_property(mut self, name: &str, value: impl Into<Fingerprint>) -> Self {
    self.input_properties.insert(name.to_string(), value.into());
    self
  }

  pub fn with_input_files(mut self, name: &str, files: FileCollectionFingerprint) -> Self {
    self.input_file_properties.insert(name.to_string(), files);
    self
  }

  pub fn with_output_files(mut self, name: &str, files: FileCollectionFingerprint) -> Self {
    self.output_file_properties.insert(name.to_string(), files);
    self
  }
}
