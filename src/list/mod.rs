//! Paginated, de-duplicated lists fed by the revalidating loader.

mod controller;
mod merge;
mod state;

pub use controller::{page_results, ListConfig, ListController};
pub use merge::{merge_page, Keyed};
pub use state::{ErrorInfo, ListView, PaginationState, Phase};
