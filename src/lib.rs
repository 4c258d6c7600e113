//! A Tokio-based task group that runs fallible futures on a bounded pool of
//! workers, collects their outcomes and aggregates their errors.
//!
//! ```no_run
//! use futures_ensemble::{TaskGroup, TaskOptions};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() {
//! let (group, token) = TaskGroup::<u32, &str>::builder()
//!   .pool_size(4)
//!   .build_with_token(&CancellationToken::new());
//!
//! for id in 0..8 {
//!   let token = token.clone();
//!   group
//!     .submit(TaskOptions::new().id(id), move || async move {
//!       if token.is_cancelled() {
//!         return Err("cancelled".into());
//!       }
//!       Ok::<(), futures_ensemble::BoxError>(())
//!     })
//!     .await
//!     .expect("group is open");
//! }
//!
//! let (results, outcome) = group.join_and_collect().await;
//! assert_eq!(results.len(), 8);
//! assert!(token.is_cancelled());
//! # let _ = outcome;
//! # }
//! ```

mod config;
mod error;
mod gate;
mod group;
mod in_flight;
mod options;
mod results;
mod task;
mod task_queue;

pub use config::{default_parallelism, CancelCallback, ErrorMode, GroupBuilder, ParallelismFn};
pub use error::{BoxError, GroupError, PanicRecovered, TaskCause};
pub use group::TaskGroup;
pub use options::TaskOptions;
pub use results::TaskResults;
pub use task::Task;
