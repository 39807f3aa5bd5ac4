//! Services module - the work behind job steps.
//!
//! Everything here is independent of how a job is presented. Steps built by
//! [`workflows`] call into the other services and report plain
//! `Result<(), StepFailure>` values back to the [`JobTracker`](crate::state::JobTracker).
//!
//! # Components
//!
//! - [`process`]: [`ProcessRunner`] and the [`ToolRunner`] seam. Spawns external tools,
//!   streams their output line by line, enforces timeouts. A nonzero exit is an outcome,
//!   a failed spawn or a timeout is an error.
//! - [`paths`]: [`LauncherPaths`], the directory layout of an installation.
//! - [`tools`]: extractor invocations (extract, decompile, compile), data directory
//!   refresh and translation of tool failures into user-facing messages.
//! - [`requirements`]: host probes (AVX, OpenGL, disk space, runtime, macOS version)
//!   with a three-valued [`CheckOutcome`].
//! - [`mods`]: downloads, mod source indexes and archive unpacking.
//! - [`workflows`]: [`JobKind`] and the step list for each operation.
//!
//! # Extractor Integration
//!
//! The extractor is driven entirely through its command line:
//! 1. `<iso> --extract --validate --game <id> --proj-path <data>` unpacks and checks the disc
//! 2. `<iso_data> --decompile --folder ...` rebuilds game sources
//! 3. `<iso_data> --compile --folder ...` builds the runtime
//!
//! Output is mirrored into `extractor.0.log` in the log directory, older runs rotate
//! to higher suffixes.

pub mod mods;
pub mod paths;
pub mod process;
pub mod requirements;
pub mod tools;
pub mod workflows;

pub use paths::LauncherPaths;
pub use process::{
    Invocation, OutputEvent, OutputSink, ProcessError, ProcessOutcome, ProcessRunner, ToolRunner,
};
pub use requirements::{CheckOutcome, RequirementChecker, RequirementReport};
pub use tools::{DecompileOptions, ExtractorTarget, ExtractorTools};
pub use workflows::{JobKind, WorkflowContext, build_steps};
