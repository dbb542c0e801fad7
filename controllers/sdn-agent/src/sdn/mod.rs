//! Local model of the VSD objects owned by the agent.
//!
//! - `cache`: the mutex-guarded state and find-or-create operations
//! - `zone`: namespace zones and their subnet reconciliation
//! - `subnet`: one subnet and its address allocator
//! - `naming`: names shared with the node side

pub mod cache;
pub mod naming;
pub mod subnet;
pub mod zone;

pub use cache::{SdnCache, SdnScope, SdnState};
pub use subnet::PodSubnet;
pub use zone::{AttachmentRecord, NamespaceZone};
