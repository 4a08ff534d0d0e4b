// Pool lifecycle - the bb8 pool plus the background work that keeps it healthy
//
// - runner: startup, acquisition, keep-alive loop and ordered shutdown
// - sink: forwards bb8's background connection errors to tracing

mod runner;
mod sink;

pub use bb8::State as PoolState;
pub use runner::{ManagedBackend, PoolRunner};
