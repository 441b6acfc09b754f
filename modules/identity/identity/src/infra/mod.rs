pub mod memstore;

pub use memstore::{MemIdentityStore, MemMeetingStore};
