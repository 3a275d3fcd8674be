//! Services shared by the video pipeline, batch runs and the CLI

pub mod capacity;
pub mod io;
pub mod progress;

pub use capacity::{
    check_capacity, check_file_size, AvailableCapacity, CapacityEstimate, CapacityProbe,
    FixedCapacity, SystemCapacityProbe,
};
pub use io::{image_output_path, video_output_path, ImageIOService};
pub use progress::{
    BatchProcessingStats, BatchProgressUpdate, ChannelObserver, ConsoleProgressReporter, JobEvent,
    JobObserver, JobProgress, LoggingObserver, NoOpObserver, NoOpProgressReporter,
    ProcessingStage, ProgressReporter, ProgressSnapshot, ProgressUpdate, ReporterObserver,
};
