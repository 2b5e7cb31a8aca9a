//! Persistence façade (C5): a primary/secondary backend pair behind a
//! single [`Facade`], plus an overflow object store for externalized
//! `output`/`error` fields (§4.5).

mod backend;
mod cache;
mod error;
mod facade;
mod file;
mod memory;
mod object_store;
mod patch;
mod relational;

pub use backend::Backend;
pub use cache::Cache;
pub use error::StoreError;
pub use facade::{Facade, INLINE_THRESHOLD, PREVIEW_SIZE};
pub use file::FileBackend;
pub use memory::MemoryBackend;
pub use object_store::{externalized_key, FileObjectStore, InMemoryObjectStore, ObjectStore};
pub use patch::UpdatePatch;
pub use relational::RelationalBackend;
