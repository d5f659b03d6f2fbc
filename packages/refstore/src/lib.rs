//! refstore - reference data storage over a transactional ordered KV store
//!
//! Stores typed reference data (lookup maps loaded from reference streams)
//! with aggressive deduplication:
//! - keys are encoded inline, or interned behind a UID or content hash
//!   depending on their size
//! - values live once in a reference-counted, content-addressed value store
//! - per-stream ProcessingInfo tracks load state and last access for purging
//!
//! ```no_run
//! use refstore::{CompositeKey, MapDefinition, RefDataStore, RefStreamDefinition, StoreConfig, TypedValue};
//! use refstore::kv::MemoryKvStore;
//!
//! let store = RefDataStore::open(MemoryKvStore::default(), StoreConfig::default())?;
//! let map = MapDefinition::new(RefStreamDefinition::new("pipeline-uuid", "v1", 42), "hosts");
//! store.put(&CompositeKey::new(map.clone(), "web01"), &TypedValue::from("10.0.0.1"))?;
//! assert_eq!(
//!     store.get(&CompositeKey::new(map, "web01"))?,
//!     Some(TypedValue::from("10.0.0.1"))
//! );
//! # Ok::<(), refstore::StoreError>(())
//! ```

pub mod buffer_pool;
pub mod codec;
pub mod config;
pub mod error;
pub mod key;
pub mod kv;
pub mod lookup;
pub mod metrics;
pub mod record;
pub mod schema;
pub mod store;
pub mod value_store;

pub use codec::{RawValue, TypeTag, TypedValue};
pub use config::{HashLength, StoreConfig};
pub use error::{Result, StoreError};
pub use key::{CompositeKey, KeyPrefix, MapDefinition, RefStreamDefinition, Tag, ValueRange};
pub use record::{ProcessingInfo, ProcessingState};
pub use store::{
    LoadSummary, PurgeOldSummary, PurgeSummary, PutOutcome, RefDataLoader, RefDataStore,
    StreamPurgeSummary,
};
