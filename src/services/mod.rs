pub mod option_store;
pub mod ratio_catalog;
pub mod ratio_engine;
pub mod ratio_service;

pub use option_store::{HttpRatioStore, RatioStore};
pub use ratio_catalog::FixedRatioTables;
pub use ratio_engine::{EffectiveRatio, PriceInput, PriceView};
pub use ratio_service::{RatioCacheStatus, RatioService};
