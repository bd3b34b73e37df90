//! Data Module
//!
//! Everything needed to go from the published archive to labelled samples:
//! - HTTP download of the compressed trajectory archive
//! - Pickle decoding of the `dict` of numpy arrays
//! - Trajectories, samples and the label table
//! - One-time shuffling and the validation/test/train split

mod dataset;
mod fetch;
pub mod pickle;
mod trajectory;

pub use dataset::{buffered_shuffle, DatasetSplit, SplitConfig};
pub use fetch::{DatasetClient, DEFAULT_ARCHIVE_PATH, DEFAULT_DATASET_URL};
pub use trajectory::{group_of, load_archive, read_trajectories, Sample, TrajectorySet};
