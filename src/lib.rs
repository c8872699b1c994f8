//! Stable-identity structure-of-arrays row store
//!
//! Rows live as one [`Column`](store::Column) per field and can be reordered in O(1)
//! without invalidating the [`RowId`](store::RowId)s held by other code. Client-declared
//! views project a subset of columns per row, either by copy or by reference, and can
//! stage columns onto an accelerator for data-parallel kernels:
//!
//! ```rust
//! use soa_cache::store::SoaStorage;
//!
//! soa_cache::soa_store! {
//!     pub struct SizeCache {
//!         breadth: Breadth => i32,
//!         obj: Obj => u64,
//!     }
//! }
//!
//! soa_cache::soa_view! {
//!     pub struct Entry for SizeCache {
//!         breadth: Breadth,
//!         obj: Obj,
//!     }
//! }
//!
//! let mut cache = SizeCache::from_columns(vec![0, 1, 2, 3], vec![1, 2, 3, 4]);
//! cache.swap(1, 2).unwrap();
//! assert_eq!(cache.fetch::<Entry>(1).unwrap(), Entry { breadth: 2, obj: 3 });
//! assert!(cache.check_invariants());
//! ```

pub mod config;
pub mod error;
pub mod offload;
pub mod store;
pub mod variant;
pub mod view;

pub use config::{OffloadConfig, SoaConfig, StoreConfig};
pub use error::{SoaError, SoaErrorContext, SoaResult};
pub use offload::{
    AccessMode, Accelerator, ColumnState, DeviceElement, DeviceView, ErrorChannel,
    HostAccelerator, HostKernel, OffloadSession, WgpuAccelerator, WgslKernel,
};
pub use store::{Column, ColumnOf, RowId, RowIdx, SoaStorage};
pub use view::{FetchView, RefView};

/// Re-exports used by macro expansions
#[doc(hidden)]
pub mod __private {
    pub use rayon;
}
