//! Per-column Load/Access/Sync state machine

use crate::error::{SoaError, SoaResult};
use crate::offload::{
    AccessMode, Accelerator, ColumnBinding, ColumnState, DeviceBuffer, DeviceElement, DeviceView,
};
use crate::store::{ColumnOf, RowId, SoaStorage};
use crossbeam_channel::Receiver;
use std::marker::PhantomData;
use std::sync::Arc;

/// Device-side state of one store column
#[derive(Debug)]
struct DeviceSlot {
    state: ColumnState,
    mode: AccessMode,
    rows: usize,
    /// Row id held by each device slot at load time
    ids: Vec<RowId>,
    buffer: Option<DeviceBuffer>,
}

impl DeviceSlot {
    fn idle() -> Self {
        Self {
            state: ColumnState::Idle,
            mode: AccessMode::Read,
            rows: 0,
            ids: Vec::new(),
            buffer: None,
        }
    }
}

/// Result a back-end hands back when an asynchronous dispatch finishes
pub(crate) struct DispatchCompletion {
    /// Buffers moved into the dispatch, in binding order
    pub buffers: Vec<DeviceBuffer>,
    pub result: SoaResult<usize>,
}

struct PendingDispatch {
    kernel: String,
    ordinals: Vec<usize>,
    /// `None` when the back-end keeps buffers in place and `fence` is the barrier
    completion: Option<Receiver<DispatchCompletion>>,
}

/// Columns taken out of `Loaded` for one dispatch
pub(crate) struct Access {
    pub ordinals: Vec<usize>,
    pub buffers: Vec<DeviceBuffer>,
    pub rows: usize,
}

/// Offload bookkeeping for one store on one accelerator.
///
/// The session tracks device storage per column; the store itself is only borrowed for
/// `load` (read) and `sync` (write), so host code keeps using the store between the two.
/// Changing the length of a column while it is loaded is not allowed; `sync` refuses to
/// reconcile such a column and reports [`SoaError::DeviceSizeMismatch`].
///
/// Rows may be swapped on the host between `load` and `sync`. Each device slot remembers
/// the row id it was loaded from, and `sync` writes every result back to the slot that
/// id occupies now. If a loaded id is no longer live (a row was removed and another
/// pushed), `sync` fails with [`SoaError::UnknownRow`] and leaves the host column as is.
pub struct OffloadSession<A: Accelerator, S: SoaStorage> {
    accelerator: Arc<A>,
    slots: Vec<DeviceSlot>,
    pending: Vec<PendingDispatch>,
    _store: PhantomData<fn(&S)>,
}

impl<A: Accelerator, S: SoaStorage> OffloadSession<A, S> {
    pub fn new(accelerator: Arc<A>) -> Self {
        Self {
            accelerator,
            slots: S::COLUMN_NAMES.iter().map(|_| DeviceSlot::idle()).collect(),
            pending: Vec::new(),
            _store: PhantomData,
        }
    }

    pub fn accelerator(&self) -> &Arc<A> {
        &self.accelerator
    }

    pub fn state<C: ColumnOf<S>>(&self) -> ColumnState {
        self.slots[C::ORDINAL].state
    }

    pub fn state_of(&self, column: &str) -> Option<ColumnState> {
        let ordinal = S::COLUMN_NAMES.iter().position(|name| *name == column)?;
        Some(self.slots[ordinal].state)
    }

    /// Number of dispatches submitted and not yet synced
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// Allocate device storage for every column `V` references, initialised from the
    /// host columns.
    ///
    /// All columns are checked before anything is allocated: an empty column fails with
    /// [`SoaError::EmptyColumnLoad`] (also reported through the accelerator's error
    /// channel) and a column that is already loaded fails with [`SoaError::ColumnBusy`].
    /// If allocation fails part way, the columns this call already loaded are released.
    pub fn load<V: DeviceView<Store = S>>(&mut self, store: &S) -> SoaResult<()> {
        check_distinct(V::NAME, V::BINDINGS)?;
        let idle = V::BINDINGS
            .iter()
            .map(|binding| binding.ordinal)
            .filter(|&ordinal| self.slots[ordinal].state == ColumnState::Idle)
            .collect::<Vec<_>>();
        if let Err(error) = V::load(store, self) {
            self.release(&idle);
            return Err(error);
        }
        log::debug!(
            "[OffloadSession] Loaded {} column(s) of {} for view {} on {}",
            V::BINDINGS.len(),
            S::NAME,
            V::NAME,
            self.accelerator.name()
        );
        Ok(())
    }

    /// Wait for outstanding dispatches on `V`'s columns, copy device writes back into
    /// the store and release device storage.
    ///
    /// Columns are reconciled one by one; the first failure is returned after every
    /// column has been attempted.
    pub fn sync<V: DeviceView<Store = S>>(&mut self, store: &mut S) -> SoaResult<()> {
        let result = V::sync(store, self);
        log::debug!(
            "[OffloadSession] Synced view {} of {} ({})",
            V::NAME,
            S::NAME,
            if result.is_ok() { "ok" } else { "failed" }
        );
        result
    }

    #[doc(hidden)]
    pub fn check_loadable<C: ColumnOf<S>>(&self, store: &S) -> SoaResult<()> {
        if self.slots[C::ORDINAL].state != ColumnState::Idle {
            return Err(SoaError::ColumnBusy { column: C::NAME });
        }
        if C::column(store).is_empty() {
            let error = SoaError::EmptyColumnLoad {
                column: C::NAME,
                device: self.accelerator.name().to_string(),
            };
            self.accelerator.errors().report(error.clone());
            return Err(error);
        }
        Ok(())
    }

    #[doc(hidden)]
    pub fn load_column<C>(&mut self, store: &S, mode: AccessMode) -> SoaResult<()>
    where
        C: ColumnOf<S>,
        C::Elem: DeviceElement,
    {
        self.check_loadable::<C>(store)?;
        let values = C::column(store).as_slice();
        let buffer = self
            .accelerator
            .allocate(C::NAME, values)
            .map_err(|error| {
                self.accelerator.errors().report(error.clone());
                error
            })?;
        self.slots[C::ORDINAL] = DeviceSlot {
            state: ColumnState::Loaded,
            mode,
            rows: values.len(),
            ids: store.identity().ids().to_vec(),
            buffer: Some(Box::new(buffer)),
        };
        log::trace!(
            "[OffloadSession] Column '{}' loaded ({} rows, {:?})",
            C::NAME,
            values.len(),
            mode
        );
        Ok(())
    }

    #[doc(hidden)]
    pub fn sync_column<C>(&mut self, store: &mut S) -> SoaResult<()>
    where
        C: ColumnOf<S>,
        C::Elem: DeviceElement,
    {
        match self.slots[C::ORDINAL].state {
            ColumnState::Idle => return Err(SoaError::ColumnNotLoaded { column: C::NAME }),
            ColumnState::Accessed => self.wait_for(C::ORDINAL)?,
            ColumnState::Loaded => {}
        }

        let slot = std::mem::replace(&mut self.slots[C::ORDINAL], DeviceSlot::idle());
        let buffer: A::Buffer<C::Elem> = *slot
            .buffer
            .ok_or(SoaError::ColumnNotLoaded { column: C::NAME })?
            .downcast::<A::Buffer<C::Elem>>()
            .map_err(|_| SoaError::Device(format!("unexpected buffer type for '{}'", C::NAME)))?;

        if slot.mode.writes_back() {
            let device_len = self.accelerator.buffer_len(&buffer);
            let host_len = C::column(store).len();
            if device_len != host_len {
                return Err(SoaError::DeviceSizeMismatch {
                    column: C::NAME,
                    device_len,
                    host_len,
                });
            }
            let targets = current_slots(store, &slot.ids)?;
            let host = C::column_mut(store).as_mut_slice();
            match targets {
                None => self.accelerator.read_back(C::NAME, &buffer, host)?,
                Some(targets) => {
                    log::debug!(
                        "[OffloadSession] Rows of '{}' were reordered since load; remapping by id",
                        C::NAME
                    );
                    let mut staged = host.to_vec();
                    self.accelerator.read_back(C::NAME, &buffer, &mut staged)?;
                    for (value, target) in staged.into_iter().zip(targets) {
                        host[target] = value;
                    }
                }
            }
        }
        log::trace!(
            "[OffloadSession] Column '{}' synced ({} rows, {:?})",
            C::NAME,
            slot.rows,
            slot.mode
        );
        Ok(())
    }

    /// Move `V`'s columns from `Loaded` to `Accessed`.
    ///
    /// With `take_buffers` the device buffers are moved out in binding order for a
    /// back-end that runs the dispatch elsewhere; they come back through
    /// [`DispatchCompletion`].
    pub(crate) fn begin_access<V: DeviceView<Store = S>>(
        &mut self,
        take_buffers: bool,
    ) -> SoaResult<Access> {
        check_distinct(V::NAME, V::BINDINGS)?;
        let mut rows = None;
        for binding in V::BINDINGS {
            let slot = &self.slots[binding.ordinal];
            match slot.state {
                ColumnState::Idle => {
                    return Err(SoaError::ColumnNotLoaded {
                        column: binding.column,
                    })
                }
                ColumnState::Accessed => {
                    return Err(SoaError::ColumnBusy {
                        column: binding.column,
                    })
                }
                ColumnState::Loaded => {}
            }
            match rows {
                None => rows = Some(slot.rows),
                Some(expected) if expected != slot.rows => {
                    return Err(SoaError::DeviceSizeMismatch {
                        column: binding.column,
                        device_len: slot.rows,
                        host_len: expected,
                    })
                }
                Some(_) => {}
            }
        }

        let mut access = Access {
            ordinals: Vec::with_capacity(V::BINDINGS.len()),
            buffers: Vec::new(),
            rows: rows.unwrap_or(0),
        };
        for binding in V::BINDINGS {
            let slot = &mut self.slots[binding.ordinal];
            slot.state = ColumnState::Accessed;
            slot.mode = slot.mode.merge(binding.mode);
            if take_buffers {
                if let Some(buffer) = slot.buffer.take() {
                    access.buffers.push(buffer);
                }
            }
            access.ordinals.push(binding.ordinal);
        }
        Ok(access)
    }

    pub(crate) fn device_buffer(&self, ordinal: usize) -> Option<&DeviceBuffer> {
        self.slots.get(ordinal)?.buffer.as_ref()
    }

    pub(crate) fn register_dispatch(
        &mut self,
        kernel: String,
        ordinals: Vec<usize>,
        completion: Option<Receiver<DispatchCompletion>>,
    ) {
        self.pending.push(PendingDispatch {
            kernel,
            ordinals,
            completion,
        });
    }

    /// Drop device storage of a failed dispatch without reconciling it
    pub(crate) fn release(&mut self, ordinals: &[usize]) {
        for &ordinal in ordinals {
            self.slots[ordinal] = DeviceSlot::idle();
        }
    }

    /// Block on the dispatch that holds `ordinal` and return its columns to `Loaded`
    fn wait_for(&mut self, ordinal: usize) -> SoaResult<()> {
        let Some(position) = self
            .pending
            .iter()
            .position(|pending| pending.ordinals.contains(&ordinal))
        else {
            self.slots[ordinal].state = ColumnState::Loaded;
            return Ok(());
        };
        let pending = self.pending.remove(position);
        log::trace!("[OffloadSession] Waiting for dispatch '{}'", pending.kernel);

        let outcome = match pending.completion {
            Some(receiver) => match receiver.recv() {
                Ok(completion) => {
                    for (&slot, buffer) in pending.ordinals.iter().zip(completion.buffers) {
                        self.slots[slot].buffer = Some(buffer);
                    }
                    completion.result.map(|_| ())
                }
                Err(_) => {
                    let error = SoaError::DispatchFailed {
                        kernel: pending.kernel.clone(),
                        reason: "dispatch worker disconnected".to_string(),
                    };
                    self.accelerator.errors().report(error.clone());
                    Err(error)
                }
            },
            None => self.accelerator.fence().map_err(|error| {
                self.accelerator.errors().report(error.clone());
                error
            }),
        };

        match outcome {
            Ok(()) => {
                for &slot in &pending.ordinals {
                    self.slots[slot].state = ColumnState::Loaded;
                }
                Ok(())
            }
            Err(error) => {
                self.release(&pending.ordinals);
                Err(error)
            }
        }
    }
}

impl<A: Accelerator, S: SoaStorage> Drop for OffloadSession<A, S> {
    fn drop(&mut self) {
        let loaded = self
            .slots
            .iter()
            .zip(S::COLUMN_NAMES)
            .filter(|(slot, _)| slot.state != ColumnState::Idle)
            .map(|(_, name)| *name)
            .collect::<Vec<_>>();
        if !loaded.is_empty() {
            log::warn!(
                "[OffloadSession] Dropped with unsynced columns {:?}; device writes are discarded",
                loaded
            );
        }
    }
}

/// Host slot of every device slot, or `None` when no row has moved since load
fn current_slots<S: SoaStorage>(store: &S, loaded: &[RowId]) -> SoaResult<Option<Vec<usize>>> {
    let ids = store.identity().ids();
    if ids == loaded {
        return Ok(None);
    }
    loaded
        .iter()
        .map(|&id| store.idx_of(id).ok_or(SoaError::UnknownRow { id: id.0 }))
        .collect::<SoaResult<Vec<_>>>()
        .map(Some)
}

/// Reject views that bind the same column twice
fn check_distinct(view: &'static str, bindings: &[ColumnBinding]) -> SoaResult<()> {
    for (i, binding) in bindings.iter().enumerate() {
        if bindings[..i].iter().any(|b| b.ordinal == binding.ordinal) {
            return Err(SoaError::ColumnAliased {
                column: binding.column,
                view,
            });
        }
    }
    Ok(())
}
