//! Repository contracts consumed by the pipeline and source handlers.
//!
//! Persistence itself lives outside this crate; these traits are the
//! contract an embedding application implements. The in-memory
//! implementation doubles as the test fixture and as a usable store for
//! embedded setups.

pub mod memory;
pub mod traits;

pub use memory::InMemoryRepository;
pub use traits::{
    AssignedFilter, AssignedRule, ChannelRepository, EpgProgramRepository,
    ManualChannelRepository, ProxyConfigRepository,
};
