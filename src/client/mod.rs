//! Client-side view of a user's task collections: a query cache keyed by
//! exact query parameterization, optimistic mutations with full-snapshot
//! rollback, and bulk-selection state.

pub mod cache;
pub mod selection;
pub mod tasks;

pub use cache::{CacheSnapshot, QueryCache, QueryKey, TaskPage};
pub use selection::SelectionSet;
pub use tasks::{ClientError, TaskClient};
