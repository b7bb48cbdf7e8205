pub mod archive;
pub mod classifier;
pub mod fetcher;
pub mod freshness;
pub mod pipeline;
pub mod reconciler;
pub mod sources;
pub mod traits;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use archive::{AccountInfo, ArchiveLoader};
pub use fetcher::{FetchResult, FetchScheduler};
pub use freshness::FreshnessIndex;
pub use pipeline::{MaintenanceRun, RunStats};
pub use traits::{FetchedProfile, InteractionSource, ProfileFetcher, Sleeper, TokioSleeper};
