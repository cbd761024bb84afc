//! Sample storage, subsampling and batch prefetching.

mod loader;
mod samples;
mod split;
mod store;
pub mod synthetic;

pub use loader::{BatchLoader, EpochPlan, LoaderConfig, SampleBatch};
pub use samples::{remove_nans, subsample, SampleRow, ShapeSamples};
pub use split::{read_split, split_names, write_split};
pub use store::{
    read_samples_file, write_samples_file, FileSampleStore, InMemorySampleStore, SampleStore,
    SAMPLES_EXTENSION,
};
