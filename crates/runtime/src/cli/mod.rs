//! Runtime CLI invocation: the command catalog, the process runner and progress parsing.

pub mod catalog;
pub mod progress;
pub mod runner;

pub use catalog::{CliCommand, CommandDescriptor, LifecycleCommand, LifecycleCommandKind, Transitions};
pub use progress::{ProgressParser, ProgressScope, ProgressSink};
pub use runner::{CliExecutor, CliOutput, ProcessRunner, build_args, interpret_exit};
