//! Deterministic comparison of execution states.

use std::collections::BTreeMap;

use tracing::debug;

use super::changes::{ExecutionStateChanges, FileChange, FileChangeKind, InputChanges};
use super::incremental::IncrementalInputProperties;
use super::state::{AfterPreviousExecutionState, BeforeExecutionState, FileCollectionFingerprint};

/// Compares a previous and a current execution state.
///
/// Implementations must be deterministic: identical states and policy always
/// produce the same report, and neither state is modified.
pub trait ExecutionStateChangeDetector: Send + Sync {
  /// Detect what changed between two executions of `work`.
  ///
  /// # Arguments
  ///
  /// * `previous` - State persisted after the last successful execution
  /// * `current` - State captured before this execution
  /// * `work` - Display name of the unit of work, used in messages
  /// * `include_added_outputs` - Whether output files that appeared since the
  ///   previous execution count as a change (false when other units may write
  ///   into the same output locations)
  /// * `incremental_properties` - Input properties tracked incrementally
  fn detect_changes(
    &self,
    previous: &AfterPreviousExecutionState,
    current: &BeforeExecutionState,
    work: &str,
    include_added_outputs: bool,
    incremental_properties: IncrementalInputProperties,
  ) -> ExecutionStateChanges;
}

/// The standard change detector.
///
/// Checks, in order: implementation, input value properties, input file
/// properties, output file properties. Every change is reported. The result
/// is incremental only if all changes are file changes of incremental inputs.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultExecutionStateChangeDetector;

impl ExecutionStateChangeDetector for DefaultExecutionStateChangeDetector {
  fn detect_changes(
    &self,
    previous: &AfterPreviousExecutionState,
    current: &BeforeExecutionState,
    work: &str,
    include_added_outputs: bool,
    incremental_properties: IncrementalInputProperties,
  ) -> ExecutionStateChanges {
    let mut collector = ChangeCollector::default();

    if previous.implementation != current.implementation {
      collector.rebuild(format!("Implementation of {work} has changed."));
    }

    for (name, change) in diff_keyed(&previous.input_properties, &current.input_properties) {
      match change {
        KeyedChange::Added => collector.rebuild(format!("Input property '{name}' has been added for {work}.")),
        KeyedChange::Removed => collector.rebuild(format!("Input property '{name}' has been removed for {work}.")),
        KeyedChange::Changed(..) => collector.rebuild(format!("Value of input property '{name}' has changed for {work}.")),
      }
    }

    for (name, change) in diff_keyed(&previous.input_file_properties, &current.input_file_properties) {
      match change {
        KeyedChange::Added => collector.rebuild(format!("Input file property '{name}' has been added for {work}.")),
        KeyedChange::Removed => {
          collector.rebuild(format!("Input file property '{name}' has been removed for {work}."))
        }
        KeyedChange::Changed(previous_files, current_files) => {
          let incremental = incremental_properties.is_incremental(name);
          for file_change in diff_files(previous_files, current_files) {
            let message = format!("Input property '{name}' file {} {}.", file_change.path, file_change.kind);
            if incremental {
              collector.incremental(name, file_change, message);
            } else {
              collector.rebuild(message);
            }
          }
        }
      }
    }

    for (name, change) in diff_keyed(&previous.output_file_properties, &current.output_file_properties) {
      match change {
        KeyedChange::Added => collector.rebuild(format!("Output property '{name}' has been added for {work}.")),
        KeyedChange::Removed => collector.rebuild(format!("Output property '{name}' has been removed for {work}.")),
        KeyedChange::Changed(previous_files, current_files) => {
          for file_change in diff_files(previous_files, current_files) {
            if file_change.kind == FileChangeKind::Added && !include_added_outputs {
              continue;
            }
            collector.rebuild(format!(
              "Output property '{name}' file {} {}.",
              file_change.path, file_change.kind
            ));
          }
        }
      }
    }

    debug!(
      work,
      messages = collector.messages.len(),
      rebuild = collector.rebuild_required,
      "detected execution state changes"
    );

    collector.finish(current, incremental_properties)
  }
}

#[derive(Default)]
struct ChangeCollector {
  messages: Vec<String>,
  rebuild_required: bool,
  file_changes: BTreeMap<String, Vec<FileChange>>,
}

impl ChangeCollector {
  fn rebuild(&mut self, message: String) {
    self.rebuild_required = true;
    self.messages.push(message);
  }

  fn incremental(&mut self, property: &str, change: FileChange, message: String) {
    self.file_changes.entry(property.to_string()).or_default().push(change);
    self.messages.push(message);
  }

  fn finish(self, current: &BeforeExecutionState, properties: IncrementalInputProperties) -> ExecutionStateChanges {
    let input_changes = if self.rebuild_required {
      InputChanges::non_incremental(&current.input_file_properties, properties)
    } else {
      InputChanges::incremental(properties, self.file_changes)
    };
    ExecutionStateChanges::detected(self.messages, input_changes)
  }
}

enum KeyedChange<'a, V> {
  Added,
  Removed,
  Changed(&'a V, &'a V),
}

/// Keys present in only one map, or present in both with different values.
fn diff_keyed<'a, V: PartialEq>(
  previous: &'a BTreeMap<String, V>,
  current: &'a BTreeMap<String, V>,
) -> Vec<(&'a str, KeyedChange<'a, V>)> {
  let mut changes = Vec::new();
  for (name, value) in current {
    match previous.get(name) {
      None => changes.push((name.as_str(), KeyedChange::Added)),
      Some(previous_value) if previous_value != value => {
        changes.push((name.as_str(), KeyedChange::Changed(previous_value, value)))
      }
      Some(_) => {}
    }
  }
  for name in previous.keys() {
    if !current.contains_key(name) {
      changes.push((name.as_str(), KeyedChange::Removed));
    }
  }
  changes
}

fn diff_files(previous: &FileCollectionFingerprint, current: &FileCollectionFingerprint) -> Vec<FileChange> {
  let mut changes = Vec::new();
  for (path, fingerprint) in current.files() {
    match previous.get(path) {
      None => changes.push(FileChange::new(path, FileChangeKind::Added)),
      Some(previous_fingerprint) if previous_fingerprint != fingerprint => {
        changes.push(FileChange::new(path, FileChangeKind::Modified))
      }
      Some(_) => {}
    }
  }
  for path in previous.files().keys() {
    if current.get(path).is_none() {
      changes.push(FileChange::new(path, FileChangeKind::Removed));
    }
  }
  changes
}
