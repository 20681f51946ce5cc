pub mod classify;
pub mod engine;
pub mod events;

pub use classify::{Response, classify};
pub use engine::{SearchEngine, SearchError, SearchOutcome, SearchState};
pub use events::{AttemptStatus, SearchEvent, SearchObserver};
