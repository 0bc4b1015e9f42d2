//! BDT Core: table store access and the data-preparation stages.
//!
//! This crate contains everything up to the model boundary:
//! - Table store configuration, REST provider and query builder
//! - On-disk table cache with atomic writes and quarantine
//! - Cache-first fetcher and the price/macro/technical loaders
//! - Clean, merge, label and temporal split transforms on `polars::DataFrame`

pub mod data;
pub mod prep;

pub use data::{DataError, StoreConfig, TableCache, TableFetcher, TableProvider, TableQuery};
pub use prep::{
    clean, create_target, create_target_with_report, merge, temporal_split, LabelReport,
    MacroKey, MergeOptions, PrepError, SplitRatios, TemporalSplit, DEFAULT_HORIZON,
};

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: everything the runner moves across threads is
    /// Send + Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<TableFetcher>();
        require_sync::<TableFetcher>();
        require_send::<TableCache>();
        require_sync::<TableCache>();
        require_send::<StoreConfig>();
        require_sync::<StoreConfig>();
        require_send::<data::RestTableProvider>();
        require_sync::<data::RestTableProvider>();
        require_send::<MergeOptions>();
        require_sync::<MergeOptions>();
        require_send::<TemporalSplit>();
        require_sync::<TemporalSplit>();
        require_send::<DataError>();
        require_sync::<DataError>();
        require_send::<PrepError>();
        require_sync::<PrepError>();
    }

    /// A provider that is not Send + Sync cannot be handed to the fetcher.
    #[test]
    fn provider_trait_objects_are_thread_safe() {
        fn _check(provider: Box<dyn TableProvider>) -> Box<dyn TableProvider + Send + Sync> {
            provider
        }
    }
}
