pub mod entity;
pub mod handle;
pub mod memory;
pub mod set;

pub use entity::{Entity, Tracked};
pub use handle::{EntryState, StoreHandle};
pub use memory::{MemoryStore, StoredRecord};
pub use set::EntitySet;
