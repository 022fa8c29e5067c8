//! Entity store abstraction and its in-memory implementation
//!
//! The scheduler only ever reads owners (streams, bindings, algorithms,
//! workflows) and writes tasks and inference results; everything goes
//! through [`EntityStore`].

pub mod memory;
pub mod traits;

pub use memory::{InMemoryStore, StoreSeed};
pub use traits::EntityStore;
