use thiserror::Error;

/// Errors raised while resolving or querying execution state changes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChangeDetectionError {
  /// No before-execution state was captured for the unit.
  #[error("Cannot query input changes when input tracking is disabled.")]
  InputTrackingDisabled,

  /// The same name or value was declared twice as an incremental property.
  #[error("incremental input property '{name}' is declared more than once (value: {value})")]
  DuplicateIncrementalProperty { name: String, value: String },

  /// Incremental changes were requested for a property that is not incremental.
  #[error("Cannot query incremental changes for property '{property}': property is not incremental.")]
  PropertyNotIncremental { property: String },

  /// No incremental property is registered for the given value.
  #[error("Cannot query incremental changes: no property found for value {value}.")]
  UnknownPropertyValue { value: String },
}
