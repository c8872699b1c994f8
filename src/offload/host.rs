//! Host accelerator: data-parallel dispatch on a dedicated rayon pool

use crate::config::OffloadConfig;
use crate::error::{SoaError, SoaResult};
use crate::offload::session::DispatchCompletion;
use crate::offload::{Accelerator, DeviceBuffer, DeviceElement, DeviceView, ErrorChannel, OffloadSession};
use crate::store::SoaStorage;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

/// Per-row computation run by [`HostAccelerator`].
///
/// `V` is the device view type as implemented by `soa_view!`, i.e. `View<'static>`; the
/// lane is the same view borrowed for one dispatch.
pub trait HostKernel<V: DeviceView>: Send + Sync + 'static {
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn run(&self, row: usize, lane: V::Lane<'_>);
}

/// Device storage of the host back-end: a private copy of the column
#[derive(Debug, Clone)]
pub struct HostBuffer<T> {
    values: Vec<T>,
}

impl<T> HostBuffer<T> {
    pub fn as_slice(&self) -> &[T] {
        &self.values
    }
}

/// Accelerator that executes dispatches on a pool of worker threads.
///
/// Submissions return immediately; the dispatch runs on the pool and its completion is
/// collected by `sync`. Kernel panics are caught and reported as
/// [`SoaError::DispatchFailed`].
pub struct HostAccelerator {
    pool: ThreadPool,
    errors: ErrorChannel,
    name: String,
}

impl HostAccelerator {
    pub fn new(config: &OffloadConfig) -> SoaResult<Self> {
        let prefix = config.thread_name_prefix.clone();
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.worker_threads.max(1))
            .thread_name(move |idx| format!("{}-{}", prefix, idx))
            .build()
            .map_err(|e| SoaError::Device(format!("failed to build worker pool: {}", e)))?;
        let name = format!("{}-host", config.device_label);
        log::debug!(
            "[HostAccelerator] Created {} with {} worker(s)",
            name,
            pool.current_num_threads()
        );
        Ok(Self {
            pool,
            errors: ErrorChannel::new(name.clone()),
            name,
        })
    }

    pub fn worker_count(&self) -> usize {
        self.pool.current_num_threads()
    }
}

impl Accelerator for HostAccelerator {
    type Buffer<T: DeviceElement> = HostBuffer<T>;

    fn name(&self) -> &str {
        &self.name
    }

    fn errors(&self) -> &ErrorChannel {
        &self.errors
    }

    fn allocate<T: DeviceElement>(
        &self,
        _column: &'static str,
        values: &[T],
    ) -> SoaResult<HostBuffer<T>> {
        Ok(HostBuffer {
            values: values.to_vec(),
        })
    }

    fn buffer_len<T: DeviceElement>(&self, buffer: &HostBuffer<T>) -> usize {
        buffer.values.len()
    }

    fn read_back<T: DeviceElement>(
        &self,
        column: &'static str,
        buffer: &HostBuffer<T>,
        host: &mut [T],
    ) -> SoaResult<()> {
        if host.len() != buffer.values.len() {
            return Err(SoaError::DeviceSizeMismatch {
                column,
                device_len: buffer.values.len(),
                host_len: host.len(),
            });
        }
        host.clone_from_slice(&buffer.values);
        Ok(())
    }

    fn fence(&self) -> SoaResult<()> {
        Ok(())
    }
}

impl<S: SoaStorage> OffloadSession<HostAccelerator, S> {
    /// Enqueue `kernel` over every row of `V`'s loaded columns.
    ///
    /// Returns once the dispatch is queued; call `sync` to wait for it and observe its
    /// writes. Fails with [`SoaError::ColumnNotLoaded`] or [`SoaError::ColumnBusy`] if a
    /// column is not in the `Loaded` state.
    pub fn submit<V, K>(&mut self, kernel: K) -> SoaResult<()>
    where
        V: DeviceView<Store = S>,
        K: HostKernel<V>,
    {
        let access = self.begin_access::<V>(true)?;
        let kernel_name = kernel.name().to_string();
        let (sender, receiver) = crossbeam_channel::bounded(1);
        let errors = self.accelerator().errors().clone();
        let name = kernel_name.clone();
        let mut buffers = access.buffers;

        self.accelerator().pool.spawn(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| V::run_host(&mut buffers, &kernel)));
            let result = match outcome {
                Ok(Ok(rows)) => Ok(rows),
                Ok(Err(error)) => Err(SoaError::DispatchFailed {
                    kernel: name.clone(),
                    reason: error.to_string(),
                }),
                Err(payload) => Err(SoaError::DispatchFailed {
                    kernel: name.clone(),
                    reason: panic_message(payload.as_ref()),
                }),
            };
            match &result {
                Ok(rows) => log::trace!("[HostAccelerator] Dispatch '{}' processed {} rows", name, rows),
                Err(error) => errors.report(error.clone()),
            }
            if sender.send(DispatchCompletion { buffers, result }).is_err() {
                log::warn!("[HostAccelerator] Session dropped before dispatch '{}' completed", name);
            }
        });

        log::debug!(
            "[HostAccelerator] Submitted '{}' over {} rows of view {}",
            kernel_name,
            access.rows,
            V::NAME
        );
        self.register_dispatch(kernel_name, access.ordinals, Some(receiver));
        Ok(())
    }
}

/// Downcast one moved-out buffer back to its column slice
#[doc(hidden)]
pub fn claim<'a, T: DeviceElement>(
    buffer: Option<&'a mut DeviceBuffer>,
    column: &'static str,
) -> SoaResult<&'a mut [T]> {
    buffer
        .and_then(|buffer| buffer.downcast_mut::<HostBuffer<T>>())
        .map(|buffer| buffer.values.as_mut_slice())
        .ok_or(SoaError::ColumnNotLoaded { column })
}

/// Row count shared by every bound column
#[doc(hidden)]
pub fn common_len(columns: &[(usize, &'static str)]) -> SoaResult<usize> {
    let Some(&(rows, _)) = columns.first() else {
        return Ok(0);
    };
    for &(len, column) in &columns[1..] {
        if len != rows {
            return Err(SoaError::DeviceSizeMismatch {
                column,
                device_len: len,
                host_len: rows,
            });
        }
    }
    Ok(rows)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("kernel panicked: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("kernel panicked: {}", message)
    } else {
        "kernel panicked".to_string()
    }
}
