//! Locating and launching controller programs

use crate::types::ControllerType;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;

/// Maps a controller type to the program implementing it.
pub trait ProgramLocator {
    fn locate(&self, controller_type: ControllerType) -> Option<PathBuf>;
}

impl<F> ProgramLocator for F
where
    F: Fn(ControllerType) -> Option<PathBuf>,
{
    fn locate(&self, controller_type: ControllerType) -> Option<PathBuf> {
        self(controller_type)
    }
}

/// Starts a controller process.
///
/// The process receives its shared name and the spawner's address, and is
/// expected to announce itself to the spawner.
pub trait Launcher {
    fn launch(&mut self, program: &Path, shared_name: &str, spawner: &str) -> io::Result<()>;
}

impl<F> Launcher for F
where
    F: FnMut(&Path, &str, &str) -> io::Result<()>,
{
    fn launch(&mut self, program: &Path, shared_name: &str, spawner: &str) -> io::Result<()> {
        self(program, shared_name, spawner)
    }
}

/// Finds programs on explicit directories or on `PATH`.
#[derive(Debug, Clone, Default)]
pub struct SearchPathLocator {
    paths: Vec<PathBuf>,
    overrides: HashMap<ControllerType, PathBuf>,
}

impl SearchPathLocator {
    /// Searches `paths` in order; `PATH` when empty.
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self {
            paths,
            overrides: HashMap::new(),
        }
    }

    /// Uses `program` for `controller_type` without searching.
    pub fn with_program(mut self, controller_type: ControllerType, program: impl Into<PathBuf>) -> Self {
        self.overrides.insert(controller_type, program.into());
        self
    }
}

impl ProgramLocator for SearchPathLocator {
    fn locate(&self, controller_type: ControllerType) -> Option<PathBuf> {
        if let Some(program) = self.overrides.get(&controller_type) {
            return Some(program.clone());
        }
        let program = controller_type.program();
        let found = if self.paths.is_empty() {
            which::which(program)
        } else {
            let paths = std::env::join_paths(&self.paths).ok()?;
            which::which_in(program, Some(paths), ".")
        };
        found.ok()
    }
}

/// Launches controllers as detached OS processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessLauncher;

impl Launcher for ProcessLauncher {
    fn launch(&mut self, program: &Path, shared_name: &str, spawner: &str) -> io::Result<()> {
        let mut child = tokio::process::Command::new(program)
            .arg(shared_name)
            .arg(spawner)
            .stdin(Stdio::null())
            .spawn()?;
        slog::info!(slog_scope::logger(), "controller process launched";
            "program" => %program.display(),
            "controller" => shared_name,
            "pid" => ?child.id()
        );

        let name = shared_name.to_string();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => {
                    slog::debug!(slog_scope::logger(), "controller process exited";
                        "controller" => &name,
                        "status" => %status
                    );
                }
                Err(err) => {
                    slog::warn!(slog_scope::logger(), "failed to reap controller process";
                        "controller" => &name,
                        "error" => %err
                    );
                }
            }
        });
        Ok(())
    }
}
