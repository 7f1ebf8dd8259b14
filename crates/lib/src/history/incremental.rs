//! Selection of input properties taking part in incremental tracking.

use std::collections::BTreeMap;

use super::error::ChangeDetectionError;

/// Which input file properties are tracked incrementally for a unit of work.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum IncrementalInputProperties {
  /// The unit does not consume input changes; any change rebuilds everything.
  #[default]
  None,
  /// Every input file property is incremental (legacy whole-file-set contract).
  All,
  /// Only the named properties are incremental.
  Named(NamedIncrementalProperties),
}

impl IncrementalInputProperties {
  /// Returns true if changes to `property` may be reported incrementally.
  pub fn is_incremental(&self, property: &str) -> bool {
    match self {
      IncrementalInputProperties::None => false,
      IncrementalInputProperties::All => true,
      IncrementalInputProperties::Named(named) => named.value_of(property).is_some(),
    }
  }

  /// Resolves a declared property value back to its property name.
  pub fn property_name_for(&self, value: &str) -> Result<&str, ChangeDetectionError> {
    match self {
      IncrementalInputProperties::Named(named) => {
        named
          .property_for_value(value)
          .ok_or_else(|| ChangeDetectionError::UnknownPropertyValue {
            value: value.to_string(),
          })
      }
      IncrementalInputProperties::None | IncrementalInputProperties::All => {
        Err(ChangeDetectionError::UnknownPropertyValue {
          value: value.to_string(),
        })
      }
    }
  }
}

/// A one-to-one mapping between incremental property names and their values.
///
/// Both names and values are unique, so changes can be queried by either.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamedIncrementalProperties {
  by_name: BTreeMap<String, String>,
  by_value: BTreeMap<String, String>,
}

impl NamedIncrementalProperties {
  pub fn new() -> Self {
    Self::default()
  }

  /// Adds a property, rejecting duplicate names and duplicate values.
  pub fn insert(&mut self, name: &str, value: &str) -> Result<(), ChangeDetectionError> {
    if self.by_name.contains_key(name) || self.by_value.contains_key(value) {
      return Err(ChangeDetectionError::DuplicateIncrementalProperty {
        name: name.to_string(),
        value: value.to_string(),
      });
    }
    self.by_name.insert(name.to_string(), value.to_string());
    self.by_value.insert(value.to_string(), name.to_string());
    Ok(())
  }

  pub fn value_of(&self, name: &str) -> Option<&str> {
    self.by_name.get(name).map(String::as_str)
  }

  pub fn property_for_value(&self, value: &str) -> Option<&str> {
    self.by_value.get(value).map(String::as_str)
  }

  /// Iterates over `(name, value)` pairs ordered by name.
  pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
    self.by_name.iter().map(|(name, value)| (name.as_str(), value.as_str()))
  }

  pub fn len(&self) -> usize {
    self.by_name.len()
  }

  pub fn is_empty(&self) -> bool {
    self.by_name.is_empty()
  }
}
