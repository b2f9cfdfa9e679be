//! Simulated `JobExecutor`: stands in for the real whole-slide-image pipeline
//! (tiling, tissue filtering, InstanSeg cell segmentation, tissue masking).
//! Simulates the same shape of work, tile counts and batched progress
//! reporting, without touching an actual slide, and writes a result JSON file
//! mirroring the real pipeline's output schema.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use scheduler_core::{domain::JobType, ExecutionContext, Job, JobExecutor};
use serde_json::json;
use tracing::{debug, info};

/// Tile side length used to derive a synthetic tile count from an image path.
/// There is no real image on disk to measure, so the simulated tile count is
/// derived deterministically from the path's length and job type, which is
/// enough to exercise batching and progress reporting realistically.
const TILE_SIZE: u32 = 512;
const BATCH_SIZE: usize = 16;
/// Fraction of tiles considered background and skipped, segmentation only.
const TISSUE_FRACTION: f64 = 0.6;

#[derive(Debug, Clone)]
pub struct SimulatedExecutorConfig {
    pub result_dir: PathBuf,
    /// Simulated per-tile processing latency; 0 makes execution effectively instant (for tests).
    pub tile_delay: Duration,
}

impl Default for SimulatedExecutorConfig {
    fn default() -> Self {
        Self {
            result_dir: PathBuf::from("./data/results"),
            tile_delay: Duration::from_millis(5),
        }
    }
}

impl SimulatedExecutorConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let result_dir = std::env::var("RESULT_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.result_dir);
        let tile_delay_ms = std::env::var("SIMULATED_TILE_DELAY_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.tile_delay.as_millis() as u64);
        Self {
            result_dir,
            tile_delay: Duration::from_millis(tile_delay_ms),
        }
    }
}

/// Simulates the whole-slide-image pipeline closely enough to exercise the
/// scheduler end to end: tiling, optional tissue filtering, batched
/// processing with progress reports, and a result file on success.
pub struct SimulatedExecutor {
    config: SimulatedExecutorConfig,
}

impl SimulatedExecutor {
    pub fn new(config: SimulatedExecutorConfig) -> Self {
        Self { config }
    }

    fn total_tiles(path: &str) -> u32 {
        let base = (path.len() as u32).saturating_mul(37) % 400;
        (base + 40).max(TILE_SIZE / 32)
    }
}

#[async_trait]
impl JobExecutor for SimulatedExecutor {
    async fn execute(&self, job: Job, ctx: ExecutionContext) -> anyhow::Result<()> {
        info!(job_id = %job.id, job_type = ?job.job_type, "simulated execution starting");

        let generated_tiles = Self::total_tiles(&job.input_image_path);
        let tiles_to_process = match job.job_type {
            JobType::Segmentation => ((generated_tiles as f64) * TISSUE_FRACTION).round() as u32,
            JobType::TissueMask => generated_tiles,
        };

        let mut processed = 0u32;
        let mut cell_id = 0u64;
        let mut cells = Vec::new();

        while processed < tiles_to_process {
            let batch = BATCH_SIZE.min((tiles_to_process - processed) as usize) as u32;
            if !self.config.tile_delay.is_zero() {
                tokio::time::sleep(self.config.tile_delay).await;
            }

            if matches!(job.job_type, JobType::Segmentation) {
                let mut rng = rand::thread_rng();
                let cells_in_batch = rng.gen_range(0..=(batch * 3));
                for _ in 0..cells_in_batch {
                    cell_id += 1;
                    cells.push(json!({
                        "global_id": cell_id,
                        "area": rng.gen_range(50.0..400.0),
                    }));
                }
            }

            processed += batch;
            let progress_percent = (processed as f64 / tiles_to_process as f64) * 100.0;
            ctx.report_progress(progress_percent, processed as u64, tiles_to_process as u64)
                .await?;
            debug!(job_id = %job.id, processed, tiles_to_process, "batch complete");
        }

        let output_path = self.write_result(&job, &cells, generated_tiles, tiles_to_process).await?;
        ctx.succeed(output_path).await?;
        info!(job_id = %job.id, "simulated execution finished");
        Ok(())
    }
}

impl SimulatedExecutor {
    async fn write_result(
        &self,
        job: &Job,
        cells: &[serde_json::Value],
        total_tiles: u32,
        tissue_tiles: u32,
    ) -> anyhow::Result<String> {
        let dir = self.config.result_dir.join(job.workflow_id.to_string());
        tokio::fs::create_dir_all(&dir).await?;

        let (file_name, body) = match job.job_type {
            JobType::Segmentation => (
                format!("{}_segmentation.json", job.id),
                json!({
                    "job_id": job.id,
                    "workflow_id": job.workflow_id,
                    "branch_id": job.branch_id,
                    "type": "segmentation",
                    "timestamp": Utc::now().to_rfc3339(),
                    "total_cells": cells.len(),
                    "total_tiles": total_tiles,
                    "tissue_tiles": tissue_tiles,
                    "cells": cells,
                }),
            ),
            JobType::TissueMask => (
                format!("{}_tissue_mask.json", job.id),
                json!({
                    "job_id": job.id,
                    "workflow_id": job.workflow_id,
                    "branch_id": job.branch_id,
                    "type": "tissue_mask",
                    "timestamp": Utc::now().to_rfc3339(),
                    "total_tiles": total_tiles,
                }),
            ),
        };

        let output_file = dir.join(file_name);
        tokio::fs::write(&output_file, serde_json::to_vec_pretty(&body)?).await?;
        Ok(output_file.to_string_lossy().into_owned())
    }
}

/// An executor that always fails, useful for exercising the branch-continues
/// / workflow-fails-without-aborting-siblings contract in integration tests
/// outside this crate. Kept here, not behind `#[cfg(test)]`, because other
/// crates' tests need to construct one too.
pub struct AlwaysFailExecutor {
    pub message: String,
}

#[async_trait]
impl JobExecutor for AlwaysFailExecutor {
    async fn execute(&self, _job: Job, _ctx: ExecutionContext) -> anyhow::Result<()> {
        anyhow::bail!("{}", self.message)
    }
}
