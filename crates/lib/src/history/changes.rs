//! Change reports produced by change detection.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::error::ChangeDetectionError;
use super::incremental::IncrementalInputProperties;
use super::state::{BeforeExecutionState, FileCollectionFingerprint};

/// How a single file differs from the previous execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileChangeKind {
  Added,
  Modified,
  Removed,
}

impl std::fmt::Display for FileChangeKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      FileChangeKind::Added => write!(f, "has been added"),
      FileChangeKind::Modified => write!(f, "has changed"),
      FileChangeKind::Removed => write!(f, "has been removed"),
    }
  }
}

/// A change to one file of an input property.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileChange {
  pub path: String,
  pub kind: FileChangeKind,
}

impl FileChange {
  pub fn new(path: &str, kind: FileChangeKind) -> Self {
    Self {
      path: path.to_string(),
      kind,
    }
  }
}

/// File-level input changes handed to a unit that consumes them.
///
/// When the execution is not incremental every file of each incremental
/// property is reported as [`FileChangeKind::Added`], so the unit reprocesses
/// all of its inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputChanges {
  incremental: bool,
  properties: IncrementalInputProperties,
  changes: BTreeMap<String, Vec<FileChange>>,
}

impl InputChanges {
  pub(crate) fn incremental(properties: IncrementalInputProperties, changes: BTreeMap<String, Vec<FileChange>>) -> Self {
    Self {
      incremental: true,
      properties,
      changes,
    }
  }

  pub(crate) fn non_incremental(
    input_files: &BTreeMap<String, FileCollectionFingerprint>,
    properties: IncrementalInputProperties,
  ) -> Self {
    let changes = input_files
      .iter()
      .filter(|(name, _)| properties.is_incremental(name))
      .map(|(name, files)| {
        let added = files
          .files()
          .keys()
          .map(|path| FileChange::new(path, FileChangeKind::Added))
          .collect();
        (name.clone(), added)
      })
      .collect();

    Self {
      incremental: false,
      properties,
      changes,
    }
  }

  /// Returns true if only the reported files need reprocessing.
  pub fn is_incremental(&self) -> bool {
    self.incremental
  }

  /// File changes for an incremental property, looked up by name.
  pub fn file_changes(&self, property: &str) -> Result<&[FileChange], ChangeDetectionError> {
    if !self.properties.is_incremental(property) {
      return Err(ChangeDetectionError::PropertyNotIncremental {
        property: property.to_string(),
      });
    }
    Ok(self.changes.get(property).map(Vec::as_slice).unwrap_or(&[]))
  }

  /// File changes for an incremental property, looked up by its declared value.
  pub fn file_changes_for_value(&self, value: &str) -> Result<&[FileChange], ChangeDetectionError> {
    let property = self.properties.property_name_for(value)?;
    self.file_changes(property)
  }
}

/// The outcome of change detection for one execution attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionStateChanges {
  messages: Vec<String>,
  input_changes: Option<InputChanges>,
}

impl ExecutionStateChanges {
  /// A full rebuild for the given reason.
  ///
  /// Input changes are only available when a before-execution state exists.
  pub fn rebuild(
    reason: &str,
    before: Option<&BeforeExecutionState>,
    properties: IncrementalInputProperties,
  ) -> Self {
    Self {
      messages: vec![reason.to_string()],
      input_changes: before.map(|state| InputChanges::non_incremental(&state.input_file_properties, properties)),
    }
  }

  pub(crate) fn detected(messages: Vec<String>, input_changes: InputChanges) -> Self {
    Self {
      messages,
      input_changes: Some(input_changes),
    }
  }

  /// Human-readable reasons, in detection order.
  pub fn all_change_messages(&self) -> &[String] {
    &self.messages
  }

  /// Returns true if nothing changed since the previous execution.
  pub fn is_empty(&self) -> bool {
    self.messages.is_empty()
  }

  /// Returns true if the changes can be handled incrementally.
  pub fn is_incremental(&self) -> bool {
    self.input_changes.as_ref().is_some_and(InputChanges::is_incremental)
  }

  /// Builds the input changes to hand to the unit of work.
  ///
  /// # Errors
  ///
  /// Returns [`ChangeDetectionError::InputTrackingDisabled`] if no
  /// before-execution state was captured for this attempt.
  pub fn create_input_changes(&self) -> Result<InputChanges, ChangeDetectionError> {
    self
      .input_changes
      .clone()
      .ok_or(ChangeDetectionError::InputTrackingDisabled)
  }
}
