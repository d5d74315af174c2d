pub mod lock;
pub mod results;

pub use lock::{RunGuard, RunLock};
pub use results::ResultStore;
