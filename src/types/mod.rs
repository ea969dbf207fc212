pub mod holder;
pub mod job;
pub mod states;

pub use holder::{JobHolder, JobSnapshot};
pub use job::{IdAllocator, Job, JobId, Params, SequentialIds};
pub use states::ClaimMarker;
