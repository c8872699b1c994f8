//! Staged offload of store columns to an accelerator
//!
//! Each column referenced by a device view walks the state machine
//! `Idle -> Loaded -> Accessed -> Idle`:
//!
//! * `load` copies the host column into device storage,
//! * a back-end specific `submit` hands the loaded columns to one data-parallel
//!   dispatch; it returns before the dispatch finishes,
//! * `sync` waits for the dispatch, reconciles device writes into the host column and
//!   releases the device storage.
//!
//! Two back-ends are provided: [`HostAccelerator`] runs Rust kernels on a worker pool
//! and [`WgpuAccelerator`] runs WGSL compute shaders on a caller-supplied wgpu device.

pub mod gpu;
pub mod host;
mod macros;
pub mod session;

pub use gpu::{DispatchGrid, WgpuAccelerator, WgpuBuffer, WgslKernel};
pub use host::{HostAccelerator, HostBuffer, HostKernel};
pub use session::OffloadSession;

use crate::error::{SoaError, SoaResult};
use crate::store::SoaStorage;
use bytemuck::Pod;
use crossbeam_channel::{Receiver, Sender};
use std::any::Any;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// How a dispatch accesses one column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessMode {
    Read,
    Write,
    ReadWrite,
}

impl AccessMode {
    /// Whether `sync` copies device contents back into the host column
    pub fn writes_back(self) -> bool {
        !matches!(self, AccessMode::Read)
    }

    /// Combined mode for a column loaded by one view and accessed by another
    pub fn merge(self, other: AccessMode) -> AccessMode {
        if self == other {
            self
        } else {
            AccessMode::ReadWrite
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnState {
    Idle,
    Loaded,
    Accessed,
}

/// One column referenced by a device view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnBinding {
    pub column: &'static str,
    pub ordinal: usize,
    pub mode: AccessMode,
}

/// Element types that can live in device storage.
///
/// `Repr` is the plain-old-data layout uploaded to GPU buffers. Scalars are their own
/// representation; tagged unions lower to a tag word plus payload.
pub trait DeviceElement: Clone + Send + Sync + 'static {
    type Repr: Pod;

    fn lower(&self) -> Self::Repr;
    fn raise(repr: Self::Repr) -> SoaResult<Self>;
}

macro_rules! impl_scalar_device_element {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl DeviceElement for $ty {
                type Repr = $ty;

                #[inline]
                fn lower(&self) -> $ty {
                    *self
                }

                #[inline]
                fn raise(repr: $ty) -> SoaResult<$ty> {
                    Ok(repr)
                }
            }
        )+
    };
}

// WGSL only has 32-bit scalars; the wider types are usable on the host back-end.
impl_scalar_device_element!(u32, i32, f32, u64, i64, f64);

/// Back-end owned storage for one loaded column, type-erased inside a session
pub type DeviceBuffer = Box<dyn Any + Send>;

/// Error reporting channel of an accelerator execution context.
///
/// Every report is logged and queued; callers drain the queue to observe failures that
/// happened asynchronously (for example inside a dispatch that was already submitted).
#[derive(Debug, Clone)]
pub struct ErrorChannel {
    source: Arc<str>,
    sender: Sender<SoaError>,
    receiver: Receiver<SoaError>,
}

impl ErrorChannel {
    pub fn new(source: impl Into<String>) -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        Self {
            source: Arc::from(source.into()),
            sender,
            receiver,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn report(&self, error: SoaError) {
        log::error!("[{}] {}", self.source, error);
        // Both ends live in `self`, so the channel cannot be disconnected here.
        let _ = self.sender.send(error);
    }

    pub fn try_next(&self) -> Option<SoaError> {
        self.receiver.try_recv().ok()
    }

    pub fn drain(&self) -> Vec<SoaError> {
        self.receiver.try_iter().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

/// Accelerator execution context consumed by [`OffloadSession`].
///
/// The session never constructs a context; callers build one (bootstrapping devices
/// where needed) and share it through an `Arc`.
pub trait Accelerator: Send + Sync + 'static {
    /// Device storage for a column of `T`
    type Buffer<T: DeviceElement>: Send + 'static;

    fn name(&self) -> &str;

    fn errors(&self) -> &ErrorChannel;

    /// Allocate device storage initialised from `values`
    fn allocate<T: DeviceElement>(
        &self,
        column: &'static str,
        values: &[T],
    ) -> SoaResult<Self::Buffer<T>>;

    fn buffer_len<T: DeviceElement>(&self, buffer: &Self::Buffer<T>) -> usize;

    /// Copy device contents into `host`, which has exactly `buffer_len` elements
    fn read_back<T: DeviceElement>(
        &self,
        column: &'static str,
        buffer: &Self::Buffer<T>,
        host: &mut [T],
    ) -> SoaResult<()>;

    /// Block until all submitted work has finished
    fn fence(&self) -> SoaResult<()>;
}

/// A view whose fields are per-row accessor handles for one dispatch.
///
/// Implemented by `soa_view!` for device views on `View<'static>`; `Lane<'s>` is the same
/// struct borrowed for one dispatch.
pub trait DeviceView: Sized + 'static {
    type Store: SoaStorage;
    type Lane<'s>;

    const NAME: &'static str;
    const BINDINGS: &'static [ColumnBinding];

    fn load<A: Accelerator>(
        store: &Self::Store,
        session: &mut OffloadSession<A, Self::Store>,
    ) -> SoaResult<()>;

    fn sync<A: Accelerator>(
        store: &mut Self::Store,
        session: &mut OffloadSession<A, Self::Store>,
    ) -> SoaResult<()>;

    /// Run `kernel` once per row over host buffers given in binding order; returns the
    /// number of rows processed
    fn run_host<K: HostKernel<Self>>(buffers: &mut [DeviceBuffer], kernel: &K)
        -> SoaResult<usize>;
}

/// Read-only accessor for one row of a column
#[derive(Debug)]
pub struct Read<'s, T>(&'s T);

impl<'s, T> Read<'s, T> {
    pub fn new(value: &'s T) -> Self {
        Read(value)
    }

    pub fn get(&self) -> &T {
        self.0
    }
}

impl<T> Deref for Read<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.0
    }
}

/// Write-only accessor for one row of a column
#[derive(Debug)]
pub struct Write<'s, T>(&'s mut T);

impl<'s, T> Write<'s, T> {
    pub fn new(value: &'s mut T) -> Self {
        Write(value)
    }

    pub fn set(self, value: T) {
        *self.0 = value;
    }
}

/// Read-write accessor for one row of a column
#[derive(Debug)]
pub struct ReadWrite<'s, T>(&'s mut T);

impl<'s, T> ReadWrite<'s, T> {
    pub fn new(value: &'s mut T) -> Self {
        ReadWrite(value)
    }
}

impl<T> Deref for ReadWrite<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.0
    }
}

impl<T> DerefMut for ReadWrite<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.0
    }
}
