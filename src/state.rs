use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};

/// Pipeline stage of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Parsed,
    Categorizing,
    Categorized,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Parsed => "parsed",
            Stage::Categorizing => "categorizing",
            Stage::Categorized => "categorized",
        }
    }
}

/// Persisted progress snapshot, always written as one whole value.
///
/// `processed_count` never exceeds `total_count` and never decreases within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineState {
    pub stage: Stage,
    pub total_count: usize,
    pub processed_count: usize,
}

impl PipelineState {
    pub fn parsed(total_count: usize) -> Self {
        Self {
            stage: Stage::Parsed,
            total_count,
            processed_count: 0,
        }
    }

    /// Record that `processed` records are now categorized
    pub fn advance(&mut self, processed: usize) -> Result<()> {
        ensure!(
            processed >= self.processed_count,
            "progress went backwards: {} -> {}",
            self.processed_count,
            processed
        );
        ensure!(
            processed <= self.total_count,
            "processed count {} exceeds total {}",
            processed,
            self.total_count
        );
        self.processed_count = processed;
        self.stage = Stage::Categorizing;
        Ok(())
    }

    pub fn finish(&mut self) -> Result<()> {
        ensure!(
            self.processed_count == self.total_count,
            "cannot finish with {}/{} processed",
            self.processed_count,
            self.total_count
        );
        self.stage = Stage::Categorized;
        Ok(())
    }

    /// A run that was started but not carried to the end
    pub fn is_resumable(&self) -> bool {
        self.stage != Stage::Categorized
    }
}
