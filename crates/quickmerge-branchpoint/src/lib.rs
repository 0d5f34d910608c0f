//! "Where did branch B diverge from branch A?", answered cheaply on repeat
//! queries.
//!
//! [`BranchPointResolver`] is a pure function over two ports: a
//! [`CopyPointCache`] (in-memory or persistent) and the VCS history client.

pub mod cache;
pub mod persist;
pub mod resolver;

pub use cache::{CopyPointCache, MemoryCopyPointCache, RootIndex};
pub use persist::PersistentCopyPointCache;
pub use resolver::BranchPointResolver;
