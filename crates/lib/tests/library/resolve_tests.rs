//! Tests for change resolution through the step pipeline.

use std::sync::{Arc, Mutex};

use kiln_lib::history::{
  ChangeDetectionError, DefaultExecutionStateChangeDetector, ExecutionState, ExecutionStateChanges, FileChange,
  FileChangeKind, FileCollectionFingerprint,
};
use kiln_lib::steps::{IncrementalChangesContext, IncrementalContext, ResolveChangesStep, Step};
use kiln_lib::unit::{InputFileProperty, UnitOfWork};
use kiln_lib::util::hash::Fingerprint;

/// A compile-like unit with incremental `sources` and non-incremental `flags`.
struct Compile {
  overlapping_outputs: bool,
}

impl UnitOfWork for Compile {
  fn display_name(&self) -> String {
    "compile main".to_string()
  }

  fn requires_input_changes(&self) -> bool {
    true
  }

  fn requires_legacy_input_changes(&self) -> bool {
    false
  }

  fn allows_overlapping_outputs(&self) -> bool {
    self.overlapping_outputs
  }

  fn visit_input_file_properties(&self, visitor: &mut dyn FnMut(InputFileProperty<'_>)) {
    visitor(InputFileProperty {
      name: "sources",
      value: "src/main",
      incremental: true,
    });
    visitor(InputFileProperty {
      name: "flags",
      value: "build.flags",
      incremental: false,
    });
  }
}

/// Records what the next step of the pipeline was handed.
#[derive(Default, Clone)]
struct Recorder {
  seen: Arc<Mutex<Vec<Option<ExecutionStateChanges>>>>,
}

impl Step<IncrementalChangesContext> for Recorder {
  type Result = ();

  fn execute(&self, context: IncrementalChangesContext) {
    self.seen.lock().unwrap().push(context.changes);
  }
}

impl Recorder {
  fn last(&self) -> Option<ExecutionStateChanges> {
    self.seen.lock().unwrap().last().cloned().flatten()
  }
}

fn files(entries: &[(&str, &str)]) -> FileCollectionFingerprint {
  FileCollectionFingerprint::from_files(entries.iter().map(|&(path, content)| (path, Fingerprint::of(content.as_bytes()))))
}

fn state(sources: &[(&str, &str)], outputs: &[(&str, &str)]) -> ExecutionState {
  ExecutionState::new()
    .with_implementation(Fingerprint::of(b"compiler 1.0"))
    .with_input_files("sources", files(sources))
    .with_input_files("flags", files(&[("build.flags", "-O2")]))
    .with_output_files("classes", files(outputs))
}

fn pipeline(recorder: &Recorder) -> ResolveChangesStep<Recorder> {
  ResolveChangesStep::new(Arc::new(DefaultExecutionStateChangeDetector), recorder.clone())
}

fn context(overlapping_outputs: bool) -> IncrementalContext {
  IncrementalContext::new(Arc::new(Compile { overlapping_outputs }))
}

#[test]
fn edited_source_is_handed_on_incrementally() -> Result<(), ChangeDetectionError> {
  let recorder = Recorder::default();
  let previous = state(&[("A.src", "a"), ("B.src", "b")], &[("A.out", "a")]);
  let current = state(&[("A.src", "a2"), ("B.src", "b")], &[("A.out", "a")]);

  pipeline(&recorder).execute(
    context(false)
      .with_before_execution_state(current)
      .with_after_previous_execution_state(previous),
  )?;

  let changes = recorder.last().unwrap();
  assert!(changes.is_incremental());
  assert_eq!(
    changes.all_change_messages(),
    ["Input property 'sources' file A.src has changed."]
  );
  let input_changes = changes.create_input_changes()?;
  assert_eq!(
    input_changes.file_changes_for_value("src/main")?,
    [FileChange::new("A.src", FileChangeKind::Modified)]
  );
  assert!(matches!(
    input_changes.file_changes("flags"),
    Err(ChangeDetectionError::PropertyNotIncremental { .. })
  ));
  Ok(())
}

#[test]
fn unchanged_unit_reports_nothing() -> Result<(), ChangeDetectionError> {
  let recorder = Recorder::default();
  let snapshot = state(&[("A.src", "a")], &[("A.out", "a")]);

  pipeline(&recorder).execute(
    context(false)
      .with_before_execution_state(snapshot.clone())
      .with_after_previous_execution_state(snapshot),
  )?;

  assert!(recorder.last().unwrap().is_empty());
  Ok(())
}

#[test]
fn removed_output_forces_full_rebuild() -> Result<(), ChangeDetectionError> {
  let recorder = Recorder::default();
  let previous = state(&[("A.src", "a")], &[("A.out", "a"), ("B.out", "b")]);
  let current = state(&[("A.src", "a")], &[("A.out", "a")]);

  pipeline(&recorder).execute(
    context(false)
      .with_before_execution_state(current)
      .with_after_previous_execution_state(previous),
  )?;

  let changes = recorder.last().unwrap();
  assert!(!changes.is_incremental());
  assert_eq!(
    changes.all_change_messages(),
    ["Output property 'classes' file B.out has been removed."]
  );
  let input_changes = changes.create_input_changes()?;
  assert_eq!(
    input_changes.file_changes("sources")?,
    [FileChange::new("A.src", FileChangeKind::Added)]
  );
  Ok(())
}

#[test]
fn added_outputs_only_count_without_overlap() -> Result<(), ChangeDetectionError> {
  let previous = state(&[("A.src", "a")], &[("A.out", "a")]);
  let current = state(&[("A.src", "a")], &[("A.out", "a"), ("Stray.out", "x")]);

  let exclusive = Recorder::default();
  pipeline(&exclusive).execute(
    context(false)
      .with_before_execution_state(current.clone())
      .with_after_previous_execution_state(previous.clone()),
  )?;
  assert_eq!(
    exclusive.last().unwrap().all_change_messages(),
    ["Output property 'classes' file Stray.out has been added."]
  );

  let shared = Recorder::default();
  pipeline(&shared).execute(
    context(true)
      .with_before_execution_state(current)
      .with_after_previous_execution_state(previous),
  )?;
  assert!(shared.last().unwrap().is_empty());
  Ok(())
}

#[test]
fn first_execution_has_no_history() -> Result<(), ChangeDetectionError> {
  let recorder = Recorder::default();

  pipeline(&recorder).execute(context(false).with_before_execution_state(state(&[("A.src", "a")], &[])))?;

  let changes = recorder.last().unwrap();
  assert_eq!(changes.all_change_messages(), ["No history is available."]);
  assert!(!changes.create_input_changes()?.is_incremental());
  Ok(())
}

#[test]
fn untracked_unit_gets_no_changes() -> Result<(), ChangeDetectionError> {
  let recorder = Recorder::default();

  pipeline(&recorder).execute(context(false).with_rebuild_reason("Forced by user."))?;
  let forced = recorder.last().unwrap();
  assert_eq!(forced.all_change_messages(), ["Forced by user."]);
  assert!(matches!(
    forced.create_input_changes(),
    Err(ChangeDetectionError::InputTrackingDisabled)
  ));

  pipeline(&recorder).execute(context(false))?;
  assert!(recorder.seen.lock().unwrap().last().unwrap().is_none());
  Ok(())
}
