//! Typed projections of a subset of a store's columns
//!
//! A view is a client-declared record whose fields are each tied to one column at the
//! view's definition. Value views copy a row out ([`SoaStorage::fetch`]); reference
//! views alias the row in place ([`SoaStorage::ref_fetch`]); device views describe the
//! per-row handles a kernel receives (see [`offload`](crate::offload)). All three are
//! declared with [`soa_view!`](crate::soa_view).
//!
//! [`SoaStorage::fetch`]: crate::store::SoaStorage::fetch
//! [`SoaStorage::ref_fetch`]: crate::store::SoaStorage::ref_fetch

use crate::error::SoaResult;
use crate::store::{ColumnBorrows, RowIdx, SoaStorage};

/// A view built by copying values out of the store
pub trait FetchView: Sized {
    type Store: SoaStorage;
    const NAME: &'static str;
    const COLUMNS: &'static [&'static str];

    fn project(store: &Self::Store, idx: RowIdx) -> SoaResult<Self>;
}

/// A view whose fields alias the store's columns for the lifetime `'a`
pub trait RefView<'a>: Sized {
    type Store: SoaStorage;
    const NAME: &'static str;
    const COLUMNS: &'static [&'static str];

    fn project(columns: &mut ColumnBorrows<'a>, idx: RowIdx) -> SoaResult<Self>;
}

/// Declare a view over a store.
///
/// Three forms are accepted:
///
/// * `struct Name for Store { field: Marker, .. }` declares a value view; each field has
///   the column's element type and is filled by copying.
/// * `struct Name<'a> for Store { field: Marker, .. }` declares a reference view; each
///   field is `&'a mut` into its column.
/// * `device struct Name<'s> for Store { field: read Marker, .. }` declares a device view;
///   each field is a per-row accessor handle in `read`, `write` or `read_write` mode.
///
/// # Example
/// ```rust
/// use soa_cache::store::SoaStorage;
///
/// soa_cache::soa_store! {
///     pub struct SizeCache {
///         breadth: Breadth => i32,
///         obj: Obj => u64,
///     }
/// }
///
/// soa_cache::soa_view! {
///     pub struct BreadthOnly for SizeCache {
///         breadth: Breadth,
///     }
/// }
///
/// soa_cache::soa_view! {
///     pub struct BreadthMut<'a> for SizeCache {
///         breadth: Breadth,
///     }
/// }
///
/// let mut cache = SizeCache::from_columns(vec![1, 2], vec![10, 20]);
/// *cache.ref_fetch::<BreadthMut>(1).unwrap().breadth = 5;
/// assert_eq!(cache.fetch::<BreadthOnly>(1).unwrap().breadth, 5);
/// ```
#[macro_export]
macro_rules! soa_view {
    (
        $(#[$meta:meta])*
        $vis:vis device struct $view:ident<$lt:lifetime> for $store:ty {
            $( $(#[$fmeta:meta])* $field:ident : $mode:ident $col:ty ),+ $(,)?
        }
    ) => {
        $crate::__soa_device_view! {
            $(#[$meta])*
            $vis struct $view<$lt> for $store {
                $( $(#[$fmeta])* $field : $mode $col ),+
            }
        }
    };

    (
        $(#[$meta:meta])*
        $vis:vis struct $view:ident<$lt:lifetime> for $store:ty {
            $( $(#[$fmeta:meta])* $field:ident : $col:ty ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        $vis struct $view<$lt> {
            $(
                $(#[$fmeta])*
                pub $field: &$lt mut <$col as $crate::store::ColumnOf<$store>>::Elem,
            )+
        }

        impl<$lt> $crate::view::RefView<$lt> for $view<$lt> {
            type Store = $store;
            const NAME: &'static str = stringify!($view);
            const COLUMNS: &'static [&'static str] =
                &[ $( <$col as $crate::store::ColumnOf<$store>>::NAME, )+ ];

            fn project(
                columns: &mut $crate::store::ColumnBorrows<$lt>,
                idx: $crate::store::RowIdx,
            ) -> $crate::error::SoaResult<Self> {
                Ok(Self {
                    $(
                        $field: <$col as $crate::store::ColumnOf<$store>>::take(columns)?
                            .at_mut(idx)?,
                    )+
                })
            }
        }
    };

    (
        $(#[$meta:meta])*
        $vis:vis struct $view:ident for $store:ty {
            $( $(#[$fmeta:meta])* $field:ident : $col:ty ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq)]
        $vis struct $view {
            $(
                $(#[$fmeta])*
                pub $field: <$col as $crate::store::ColumnOf<$store>>::Elem,
            )+
        }

        impl $crate::view::FetchView for $view {
            type Store = $store;
            const NAME: &'static str = stringify!($view);
            const COLUMNS: &'static [&'static str] =
                &[ $( <$col as $crate::store::ColumnOf<$store>>::NAME, )+ ];

            fn project(
                store: &$store,
                idx: $crate::store::RowIdx,
            ) -> $crate::error::SoaResult<Self> {
                Ok(Self {
                    $(
                        $field: <$col as $crate::store::ColumnOf<$store>>::column(store)
                            .at(idx)?
                            .clone(),
                    )+
                })
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use crate::error::SoaError;
    use crate::store::SoaStorage;

    crate::soa_store! {
        struct Sizes {
            breadth: Breadth => i32,
            height: Height => i32,
            obj: Obj => u64,
        }
    }

    crate::soa_view! {
        struct BreadthObj for Sizes {
            breadth: Breadth,
            obj: Obj,
        }
    }

    crate::soa_view! {
        struct HeightBreadthMut<'a> for Sizes {
            height: Height,
            breadth: Breadth,
        }
    }

    crate::soa_view! {
        struct Twice<'a> for Sizes {
            first: Breadth,
            second: Breadth,
        }
    }

    #[test]
    fn test_fetch_copies_declared_columns() {
        let sizes = Sizes::from_columns(vec![1, 2], vec![3, 4], vec![5, 6]);
        let view = sizes.fetch::<BreadthObj>(1).unwrap();
        assert_eq!(view, BreadthObj { breadth: 2, obj: 6 });
    }

    #[test]
    fn test_fetch_reports_first_violating_column() {
        let mut sizes = Sizes::from_columns(vec![1, 2], vec![3, 4], vec![5, 6]);
        sizes.column_mut::<Obj>().push(7);
        let err = sizes.fetch::<BreadthObj>(2).unwrap_err();
        assert_eq!(
            err,
            SoaError::OutOfRange {
                column: "breadth",
                index: 2,
                len: 2
            }
        );
    }

    #[test]
    fn test_ref_fetch_aliases_in_declaration_order() {
        let mut sizes = Sizes::from_columns(vec![1, 2], vec![3, 4], vec![5, 6]);
        {
            let view = sizes.ref_fetch::<HeightBreadthMut>(0).unwrap();
            *view.height += 10;
            *view.breadth = 9;
        }
        assert_eq!(sizes.column::<Height>().as_slice(), &[13, 4]);
        assert_eq!(sizes.column::<Breadth>().as_slice(), &[9, 2]);
    }

    #[test]
    fn test_ref_view_cannot_alias_one_column_twice() {
        let mut sizes = Sizes::from_columns(vec![1], vec![3], vec![5]);
        let err = sizes.ref_fetch::<Twice>(0).err();
        assert_eq!(
            err,
            Some(SoaError::ColumnAliased {
                column: "breadth",
                view: "Twice"
            })
        );
    }

    #[test]
    fn test_fetch_by_id_follows_swaps() {
        let mut sizes = Sizes::from_columns(vec![1, 2, 3], vec![0; 3], vec![7, 8, 9]);
        let id = sizes.id_at(0).unwrap();
        sizes.swap(0, 2).unwrap();
        assert_eq!(sizes.fetch_id::<BreadthObj>(id).unwrap().obj, 7);
        *sizes.ref_fetch_id::<HeightBreadthMut>(id).unwrap().breadth = 42;
        assert_eq!(sizes.column::<Breadth>().as_slice(), &[3, 2, 42]);
    }
}
