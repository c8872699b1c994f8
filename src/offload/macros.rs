//! Device view expansion used by `soa_view!`

#[doc(hidden)]
#[macro_export]
macro_rules! __soa_device_view {
    (
        $(#[$meta:meta])*
        $vis:vis struct $view:ident<$lt:lifetime> for $store:ty {
            $( $(#[$fmeta:meta])* $field:ident : $mode:ident $col:ty ),+
        }
    ) => {
        $(#[$meta])*
        $vis struct $view<$lt> {
            $(
                $(#[$fmeta])*
                pub $field: $crate::__soa_lane_type!(
                    $mode, $lt, <$col as $crate::store::ColumnOf<$store>>::Elem
                ),
            )+
        }

        impl $crate::offload::DeviceView for $view<'static> {
            type Store = $store;
            type Lane<$lt> = $view<$lt>;

            const NAME: &'static str = stringify!($view);
            const BINDINGS: &'static [$crate::offload::ColumnBinding] = &[
                $(
                    $crate::offload::ColumnBinding {
                        column: <$col as $crate::store::ColumnOf<$store>>::NAME,
                        ordinal: <$col as $crate::store::ColumnOf<$store>>::ORDINAL,
                        mode: $crate::__soa_access_mode!($mode),
                    },
                )+
            ];

            fn load<A: $crate::offload::Accelerator>(
                store: &$store,
                session: &mut $crate::offload::OffloadSession<A, $store>,
            ) -> $crate::error::SoaResult<()> {
                $( session.check_loadable::<$col>(store)?; )+
                $( session.load_column::<$col>(store, $crate::__soa_access_mode!($mode))?; )+
                Ok(())
            }

            fn sync<A: $crate::offload::Accelerator>(
                store: &mut $store,
                session: &mut $crate::offload::OffloadSession<A, $store>,
            ) -> $crate::error::SoaResult<()> {
                let mut first_error = None;
                $(
                    if let Err(error) = session.sync_column::<$col>(store) {
                        first_error.get_or_insert(error);
                    }
                )+
                first_error.map_or(Ok(()), Err)
            }

            fn run_host<K: $crate::offload::HostKernel<Self>>(
                buffers: &mut [$crate::offload::DeviceBuffer],
                kernel: &K,
            ) -> $crate::error::SoaResult<usize> {
                use $crate::__private::rayon::prelude::*;

                let mut slots = buffers.iter_mut();
                $(
                    let $field = $crate::offload::host::claim::<
                        <$col as $crate::store::ColumnOf<$store>>::Elem,
                    >(slots.next(), <$col as $crate::store::ColumnOf<$store>>::NAME)?;
                )+
                let rows = $crate::offload::host::common_len(&[
                    $( ($field.len(), <$col as $crate::store::ColumnOf<$store>>::NAME), )+
                ])?;

                $crate::__soa_zip!( $( $crate::__soa_lane_iter!($mode, $field) ),+ )
                    .enumerate()
                    .for_each(|(row, $crate::__soa_zip_pat!($( $field ),+))| {
                        kernel.run(row, $view { $( $field ),+ });
                    });
                Ok(rows)
            }
        }
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __soa_lane_type {
    (read, $lt:lifetime, $ty:ty) => { $crate::offload::Read<$lt, $ty> };
    (write, $lt:lifetime, $ty:ty) => { $crate::offload::Write<$lt, $ty> };
    (read_write, $lt:lifetime, $ty:ty) => { $crate::offload::ReadWrite<$lt, $ty> };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __soa_access_mode {
    (read) => { $crate::offload::AccessMode::Read };
    (write) => { $crate::offload::AccessMode::Write };
    (read_write) => { $crate::offload::AccessMode::ReadWrite };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __soa_lane_iter {
    (read, $values:ident) => { $values.par_iter().map($crate::offload::Read::new) };
    (write, $values:ident) => { $values.par_iter_mut().map($crate::offload::Write::new) };
    (read_write, $values:ident) => { $values.par_iter_mut().map($crate::offload::ReadWrite::new) };
}

/// Right-nested zip: `a.zip(b.zip(c))`
#[doc(hidden)]
#[macro_export]
macro_rules! __soa_zip {
    ($only:expr) => { $only };
    ($first:expr, $($rest:expr),+) => {
        $crate::__private::rayon::iter::IndexedParallelIterator::zip(
            $first,
            $crate::__soa_zip!($($rest),+),
        )
    };
}

/// Pattern matching the item shape produced by `__soa_zip!`
#[doc(hidden)]
#[macro_export]
macro_rules! __soa_zip_pat {
    ($only:ident) => { $only };
    ($first:ident, $($rest:ident),+) => { ($first, $crate::__soa_zip_pat!($($rest),+)) };
}
