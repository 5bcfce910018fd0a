use serde::Serialize;
use tracing::debug;

use crate::config::{
    DEFAULT_MAX_WORKERS, DEFAULT_MIN_PARTITIONS, DEFAULT_MIN_WORKERS, DEFAULT_SF_PER_PARTITION,
    DEFAULT_SF_PER_WORKER,
};
use crate::error::{Error, Result};

/// The cluster service counts instances in a signed 32-bit integer
pub const MAX_INSTANCE_COUNT: u32 = i32::MAX as u32;

/// Limits applied to computed (never to explicit) counts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizingBounds {
    pub min_workers: u32,
    pub max_workers: u32,
    pub min_partitions: u32,
}

impl Default for SizingBounds {
    fn default() -> Self {
        Self {
            min_workers: DEFAULT_MIN_WORKERS,
            max_workers: DEFAULT_MAX_WORKERS,
            min_partitions: DEFAULT_MIN_PARTITIONS,
        }
    }
}

impl SizingBounds {
    pub fn validate(&self) -> Result<()> {
        if self.min_workers == 0 || self.max_workers == 0 || self.min_partitions == 0 {
            return Err(Error::validation(format!(
                "sizing bounds must be positive, got {:?}",
                self
            )));
        }
        if self.min_workers > self.max_workers {
            return Err(Error::validation(format!(
                "min workers ({}) exceeds max workers ({})",
                self.min_workers, self.max_workers
            )));
        }
        if self.max_workers > MAX_INSTANCE_COUNT {
            return Err(Error::validation(format!(
                "max workers ({}) exceeds the instance count limit ({})",
                self.max_workers, MAX_INSTANCE_COUNT
            )));
        }
        Ok(())
    }
}

/// How much scale factor one worker or one partition absorbs
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostAssumptions {
    pub scale_per_worker: f64,
    pub scale_per_partition: f64,
}

impl Default for CostAssumptions {
    fn default() -> Self {
        Self {
            scale_per_worker: DEFAULT_SF_PER_WORKER,
            scale_per_partition: DEFAULT_SF_PER_PARTITION,
        }
    }
}

impl CostAssumptions {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("scale per worker", self.scale_per_worker),
            ("scale per partition", self.scale_per_partition),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(Error::validation(format!(
                    "{} must be a positive number, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResourcePlan {
    worker_count: u32,
    partition_count: u32,
}

impl ResourcePlan {
    pub fn worker_count(&self) -> u32 {
        self.worker_count
    }

    pub fn partition_count(&self) -> u32 {
        self.partition_count
    }
}

/// Size the cluster for a scale factor.
///
/// An explicit count is taken as-is, bounds are only applied to the counts
/// derived from the cost assumptions. Division results are always rounded up
/// so a fractional remainder never leaves the job under-provisioned.
pub fn plan(
    scale_factor: f64,
    cost: &CostAssumptions,
    bounds: &SizingBounds,
    explicit_workers: Option<u32>,
    explicit_partitions: Option<u32>,
) -> Result<ResourcePlan> {
    if !scale_factor.is_finite() || scale_factor <= 0.0 {
        return Err(Error::validation(format!(
            "scale factor must be positive, got {}",
            scale_factor
        )));
    }
    cost.validate()?;
    bounds.validate()?;

    let worker_count = match explicit_workers {
        Some(0) => return Err(Error::validation("explicit worker count must be at least 1")),
        Some(n) if n > MAX_INSTANCE_COUNT => {
            return Err(Error::validation(format!(
                "explicit worker count {} exceeds the instance count limit ({})",
                n, MAX_INSTANCE_COUNT
            )))
        }
        Some(n) => n,
        None => {
            let wanted = (scale_factor / cost.scale_per_worker).ceil();
            wanted.clamp(bounds.min_workers as f64, bounds.max_workers as f64) as u32
        }
    };

    let partition_count = match explicit_partitions {
        Some(0) => {
            return Err(Error::validation(
                "explicit partition count must be at least 1",
            ))
        }
        Some(n) => n,
        None => {
            // float to int casts saturate, so a huge scale factor lands on u32::MAX
            let wanted = (scale_factor / cost.scale_per_partition).ceil() as u32;
            wanted.max(bounds.min_partitions)
        }
    };

    let plan = ResourcePlan {
        worker_count,
        partition_count,
    };
    debug!(
        "Planned {:?} for scale factor {} with {:?}",
        &plan, scale_factor, cost
    );
    Ok(plan)
}
