pub mod key;
pub mod memory;

pub use key::CacheKeyBuilder;
pub use memory::{MemoryCacheConfig, ResponseCache};
