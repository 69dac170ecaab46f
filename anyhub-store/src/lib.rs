pub mod fs_store;
pub mod locks;

pub use fs_store::{Entry, FileStore, PutOptions, ReadResult, StoreError};
