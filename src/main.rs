//! CLI entry point for ytdl-queue.

use std::process::ExitCode;

mod app;
mod cli;

/// Process outcome, mapped to the exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProcessExit {
    /// Everything requested finished.
    Success,
    /// Some downloads failed, some completed.
    Partial,
    /// Nothing completed, or the run was interrupted.
    Failure,
}

impl From<ProcessExit> for ExitCode {
    fn from(exit: ProcessExit) -> Self {
        match exit {
            ProcessExit::Success => ExitCode::SUCCESS,
            ProcessExit::Failure => ExitCode::from(1),
            ProcessExit::Partial => ExitCode::from(2),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    match app::runtime::run_queue().await {
        Ok(exit) => exit.into(),
        Err(error) => {
            eprintln!("Error: {error:#}");
            ExitCode::from(1)
        }
    }
}
