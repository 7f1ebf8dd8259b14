//! The unit of work as seen by the execution core.
//!
//! Units are created by the build definition layer and are read-only while
//! an execution pass is in progress.

/// A declared input file property of a unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputFileProperty<'a> {
  /// Property name, unique within the unit.
  pub name: &'a str,
  /// The declared value, used to look up input changes by value.
  pub value: &'a str,
  /// Whether the unit consumes file-level changes for this property.
  pub incremental: bool,
}

/// One buildable action.
pub trait UnitOfWork: Send + Sync {
  /// Name used in change messages and logs.
  fn display_name(&self) -> String;

  /// Whether the unit consumes input change information at all.
  fn requires_input_changes(&self) -> bool;

  /// Whether the unit uses the legacy contract where every input file
  /// property is incremental.
  fn requires_legacy_input_changes(&self) -> bool;

  /// Whether other units may write into this unit's output locations.
  fn allows_overlapping_outputs(&self) -> bool;

  /// Visits each declared input file property.
  fn visit_input_file_properties(&self, visitor: &mut dyn FnMut(InputFileProperty<'_>));
}
