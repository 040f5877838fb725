pub mod memory;

pub use memory::{MemoryLogBroadcaster, MemoryStore};
