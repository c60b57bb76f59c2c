pub mod cache;

pub use cache::{LocalCache, MemoryCache, SqliteCache};
