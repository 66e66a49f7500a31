//! Worker processes: what to launch ([`ProcessSpec`]) and the supervisor's record of it.

mod handle;
mod spec;

pub(crate) use handle::{HandleState, ProcessHandle, Reaper, Run};
pub use handle::ProcessStatus;
pub use spec::{ProcessSpec, ProcessSpecBuilder};
