//! Local persistence: the storage medium, the content store and the hash index.
//!
//! ```text
//!   ContentStore ("assets:{path}", zlib)    HashIndex ("index:hashes", JSON)
//!            \                                  /
//!             └──────── Arc<dyn Storage> ──────┘
//!                    MemoryStorage | DiskStorage
//! ```

mod content;
mod disk;
mod index;
mod memory;
mod traits;

pub use content::{ContentStore, CONTENT_PREFIX};
pub use disk::DiskStorage;
pub use index::{HashIndex, INDEX_KEY};
pub use memory::MemoryStorage;
pub use traits::{BoxFuture, Storage, StorageError};
