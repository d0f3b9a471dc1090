pub mod admission;
pub mod middleware;

pub use admission::{AdmissionGuard, CounterStore, MemoryCounterStore};
pub use middleware::ClientIdentity;
