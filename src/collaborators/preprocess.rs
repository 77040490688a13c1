use super::external::{path_arg, ExternalProgram};
use crate::system::Kwargs;
use anyhow::Context;
use async_trait::async_trait;
use std::path::Path;
use tracing::debug;

/// Waveform preprocessing: misfit measurement and gradient conditioning
#[async_trait]
pub trait Preprocessor: Send + Sync {
    /// Measure misfit for one task, writing residuals to `kwargs["residuals"]`
    async fn misfit(&self, task_index: usize, kwargs: &Kwargs) -> anyhow::Result<()>;

    /// Total misfit from every residual file in a directory
    async fn sum_residuals(&self, residuals: &Path) -> anyhow::Result<f64>;

    async fn scale_gradient(
        &self,
        gradient: &Path,
        model: &Path,
        mask: Option<&Path>,
    ) -> anyhow::Result<()>;
}

/// Preprocessor driven through `PREPROCESS_BIN`
///
/// Residual summation happens in process: each residual file holds
/// whitespace-separated values and the misfit is the mean over files of
/// the sum of squared residuals.
#[derive(Debug, Clone)]
pub struct ExternalPreprocessor {
    program: ExternalProgram,
}

impl ExternalPreprocessor {
    pub fn new(program: ExternalProgram) -> Self {
        Self { program }
    }
}

#[async_trait]
impl Preprocessor for ExternalPreprocessor {
    async fn misfit(&self, task_index: usize, kwargs: &Kwargs) -> anyhow::Result<()> {
        self.program
            .invoke("misfit", task_index, kwargs)
            .await
            .map(|_| ())
    }

    async fn sum_residuals(&self, residuals: &Path) -> anyhow::Result<f64> {
        let mut entries = tokio::fs::read_dir(residuals)
            .await
            .with_context(|| format!("failed to list residuals in {}", residuals.display()))?;

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                files.push(entry.path());
            }
        }
        if files.is_empty() {
            anyhow::bail!("no residual files found in {}", residuals.display());
        }
        files.sort();

        let mut total = 0.0;
        for file in &files {
            let content = tokio::fs::read_to_string(file)
                .await
                .with_context(|| format!("failed to read {}", file.display()))?;
            total += sum_of_squares(&content)
                .with_context(|| format!("invalid residual file {}", file.display()))?;
        }

        let misfit = total / files.len() as f64;
        debug!("Summed {} residual file(s): misfit {:e}", files.len(), misfit);
        Ok(misfit)
    }

    async fn scale_gradient(
        &self,
        gradient: &Path,
        model: &Path,
        mask: Option<&Path>,
    ) -> anyhow::Result<()> {
        let mut kwargs = Kwargs::new();
        path_arg(&mut kwargs, "gradient", gradient);
        path_arg(&mut kwargs, "model", model);
        if let Some(mask) = mask {
            path_arg(&mut kwargs, "mask", mask);
        }
        self.program
            .invoke("scale_gradient", 0, &kwargs)
            .await
            .map(|_| ())
    }
}

/// Sum of squared values in a whitespace-separated residual listing
pub fn sum_of_squares(content: &str) -> anyhow::Result<f64> {
    content
        .split_whitespace()
        .map(|token| {
            token
                .parse::<f64>()
                .map(|r| r * r)
                .with_context(|| format!("'{}' is not a number", token))
        })
        .sum()
}
