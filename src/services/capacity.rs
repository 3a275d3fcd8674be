//! Memory and disk checks run before a video job starts

use crate::backends::video::VideoMetadata;
use crate::error::{PipelineError, Result};
use std::path::Path;
use sysinfo::{Disks, System};

/// Copies of each in-flight frame alive at peak (decoded, engine output, composited)
const FRAME_COPIES: u64 = 3;

const MIB: f64 = 1024.0 * 1024.0;

/// Resources a job is expected to need
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityEstimate {
    pub memory_bytes: u64,
    pub disk_bytes: u64,
}

impl CapacityEstimate {
    /// Estimate for a job over `metadata` with `window` frames in flight
    ///
    /// Memory covers every in-flight frame three times over. Disk covers
    /// twice the source size, but never less than one second of raw frames.
    #[must_use]
    pub fn for_job(metadata: &VideoMetadata, window: usize, source_bytes: u64, output_fps: f64) -> Self {
        let frame_bytes = u64::from(metadata.width) * u64::from(metadata.height) * 4;
        let memory_bytes = frame_bytes
            .saturating_mul(window as u64)
            .saturating_mul(FRAME_COPIES);
        let one_second = frame_bytes.saturating_mul(output_fps.ceil().max(1.0) as u64);
        let disk_bytes = source_bytes.saturating_mul(2).max(one_second);
        Self {
            memory_bytes,
            disk_bytes,
        }
    }
}

/// Resources currently available; `None` when the probe cannot tell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AvailableCapacity {
    pub memory_bytes: Option<u64>,
    pub disk_bytes: Option<u64>,
}

/// Source of available-capacity figures
pub trait CapacityProbe: Send + Sync {
    /// Capacity for a job writing into `output_dir`
    fn available(&self, output_dir: &Path) -> AvailableCapacity;
}

/// Probe backed by the operating system
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemCapacityProbe;

impl CapacityProbe for SystemCapacityProbe {
    fn available(&self, output_dir: &Path) -> AvailableCapacity {
        let mut system = System::new();
        system.refresh_memory();
        let memory = system.available_memory();

        let target = output_dir
            .canonicalize()
            .unwrap_or_else(|_| output_dir.to_path_buf());
        let disks = Disks::new_with_refreshed_list();
        let disk = disks
            .list()
            .iter()
            .filter(|disk| target.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().as_os_str().len())
            .map(sysinfo::Disk::available_space);

        AvailableCapacity {
            memory_bytes: (memory > 0).then_some(memory),
            disk_bytes: disk,
        }
    }
}

/// Probe that reports fixed figures
#[derive(Debug, Default, Clone, Copy)]
pub struct FixedCapacity(pub AvailableCapacity);

impl CapacityProbe for FixedCapacity {
    fn available(&self, _output_dir: &Path) -> AvailableCapacity {
        self.0
    }
}

/// Fail with [`PipelineError::Capacity`] when `estimate` does not fit
pub fn check_capacity(estimate: &CapacityEstimate, available: &AvailableCapacity) -> Result<()> {
    if let Some(memory) = available.memory_bytes {
        if estimate.memory_bytes > memory {
            return Err(PipelineError::capacity(format!(
                "need about {:.0} MiB of memory for in-flight frames, {:.0} MiB available; lower the in-flight window",
                estimate.memory_bytes as f64 / MIB,
                memory as f64 / MIB
            )));
        }
    }
    if let Some(disk) = available.disk_bytes {
        if estimate.disk_bytes > disk {
            return Err(PipelineError::capacity(format!(
                "need about {:.0} MiB of disk space for the output, {:.0} MiB free",
                estimate.disk_bytes as f64 / MIB,
                disk as f64 / MIB
            )));
        }
    }
    Ok(())
}

/// Reject files above `limit_mb` megabytes
pub fn check_file_size(path: &Path, limit_mb: u64) -> Result<u64> {
    let size = std::fs::metadata(path)
        .map_err(|e| PipelineError::file_io_error("read metadata of", path, &e))?
        .len();
    let limit = limit_mb.saturating_mul(1024 * 1024);
    if size > limit {
        return Err(PipelineError::capacity(format!(
            "'{}' is {:.1} MB, the limit is {} MB",
            path.display(),
            size as f64 / MIB,
            limit_mb
        )));
    }
    Ok(size)
}
