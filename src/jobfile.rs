//! JSON job files accepted by the CLI.
//!
//! - `run`: a single [`OperationSpec`].
//! - `workflow`: a [`WorkflowFile`] (input plus ordered steps).
//! - `batch`: a JSON array of [`OperationSpec`]s.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use cf_core::{Error, Operation, OperationSpec, Result};
use cf_pipeline::Workflow;

/// One workflow step as written in a job file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepEntry {
    pub operation: Operation,
    #[serde(default)]
    pub output: Option<PathBuf>,
}

/// A workflow job file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowFile {
    pub input: PathBuf,
    pub steps: Vec<StepEntry>,
}

impl WorkflowFile {
    /// Build a [`Workflow`], validating each step as it is added.
    pub fn build(&self) -> Result<Workflow> {
        let workflow = Workflow::with_input(&self.input)?;
        for (i, step) in self.steps.iter().enumerate() {
            workflow
                .step(step.operation.clone(), step.output.clone())
                .map_err(|e| Error::validation(format!("step {}: {e}", i + 1)))?;
        }
        Ok(workflow)
    }
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents)
        .map_err(|e| Error::validation(format!("{}: {e}", path.display())))
}

pub fn load_operation(path: &Path) -> Result<OperationSpec> {
    read_json(path)
}

pub fn load_workflow(path: &Path) -> Result<WorkflowFile> {
    read_json(path)
}

pub fn load_batch(path: &Path) -> Result<Vec<OperationSpec>> {
    read_json(path)
}
