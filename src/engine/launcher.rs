//! Engine process launcher
//!
//! Starts the engine executable with the scenario file as its only argument.
//! The scenario must be readable before anything is spawned.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::process::{Child, Command};

/// Launch errors
#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("The file {} is not readable: {source}", .path.display())]
    ScenarioUnreadable { path: PathBuf, source: io::Error },

    #[error("Failed to spawn {}: {source}", .executable.display())]
    Spawn { executable: PathBuf, source: io::Error },

    #[error("No engine executable configured")]
    NoExecutable,
}

pub type LaunchResult<T> = Result<T, LaunchError>;

/// Spawns the engine executable
#[derive(Debug, Clone)]
pub struct Launcher {
    executable: PathBuf,
}

impl Launcher {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
        }
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// Fail unless the scenario file can be opened for reading
    pub fn check_scenario(scenario: &Path) -> LaunchResult<()> {
        File::open(scenario)
            .map(drop)
            .map_err(|source| LaunchError::ScenarioUnreadable {
                path: scenario.to_path_buf(),
                source,
            })
    }

    /// Spawn the engine with `scenario` as its sole argument
    pub fn spawn(&self, scenario: &Path) -> LaunchResult<Child> {
        Self::check_scenario(scenario)?;

        let child = Command::new(&self.executable)
            .arg(scenario)
            .spawn()
            .map_err(|source| LaunchError::Spawn {
                executable: self.executable.clone(),
                source,
            })?;

        tracing::info!(
            "Launched {} with {} (pid {:?})",
            self.executable.display(),
            scenario.display(),
            child.id()
        );
        Ok(child)
    }
}
