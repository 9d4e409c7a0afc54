// vigil/src/commands/mod.rs

pub mod admin;
pub mod anomaly;
pub mod apply;
pub mod incident;
pub mod lifecycle;
pub mod monitor;
pub mod pack;
pub mod rule;
pub mod task;

use std::path::PathBuf;

use anyhow::Context;
use serde::Serialize;
use vigil_core::Engine;

use crate::cli::OutputFormat;
use crate::output;

/// Global flags every command receives.
pub struct Session {
    pub project_dir: PathBuf,
    pub actor: String,
    pub format: OutputFormat,
}

impl Session {
    pub fn open(&self) -> anyhow::Result<Engine> {
        Engine::open(&self.project_dir)
            .with_context(|| format!("Failed to open project at {:?}", self.project_dir))
    }

    pub fn persist(&self, engine: &Engine) -> anyhow::Result<()> {
        if let Some(path) = engine.save().context("Failed to save engine state")? {
            tracing::debug!(path = %path.display(), "state saved");
        }
        Ok(())
    }

    /// JSON as-is, or the table rendering.
    pub fn emit<T, F>(&self, value: &T, render: F) -> anyhow::Result<()>
    where
        T: Serialize + ?Sized,
        F: FnOnce(&T),
    {
        match self.format {
            OutputFormat::Json => output::print_json(value),
            OutputFormat::Table => {
                render(value);
                Ok(())
            }
        }
    }
}
