use clap::ValueEnum;

/// What to do when a complete copy of an item already exists on disk.
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DuplicateHandling {
    /// Keep the existing file and skip the transfer
    #[default]
    Skip,
    /// Download again and replace the existing file
    Overwrite,
}

/// How items are fanned out across concurrent transfers.
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Schedule {
    /// Fixed-size batches, each run to completion before the next starts
    #[default]
    Batches,
    /// A pool of workers pulling from one ordered queue
    Pool,
}
