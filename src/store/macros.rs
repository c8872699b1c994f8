//! Store declaration macro

/// Declare a structure-of-arrays store.
///
/// Each field is declared as `name: Marker => ElementType`. The macro generates the
/// store struct, one zero-sized marker type per column (used by views and offload
/// sessions to name columns), the [`SoaStorage`](crate::store::SoaStorage) impl and a
/// row-level constructor API. The field name `identity` is reserved.
///
/// # Example
/// ```rust
/// soa_cache::soa_store! {
///     pub struct SizeCache {
///         breadth: Breadth => i32,
///         obj: Obj => u64,
///     }
/// }
///
/// use soa_cache::store::SoaStorage;
///
/// let mut cache = SizeCache::new();
/// let id = cache.push(6, 0).unwrap();
/// assert_eq!(cache.idx_of(id), Some(0));
/// assert_eq!(cache.column::<Breadth>().as_slice(), &[6]);
/// ```
#[macro_export]
macro_rules! soa_store {
    (
        $(#[$meta:meta])*
        $vis:vis struct $store:ident {
            $( $(#[$fmeta:meta])* $field:ident : $col:ident => $ty:ty ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone)]
        $vis struct $store {
            identity: $crate::store::IdentityTable,
            $( $(#[$fmeta])* $field: $crate::store::Column<$ty>, )+
        }

        $(
            #[doc = concat!("Column marker for `", stringify!($store), "::", stringify!($field), "`")]
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
            $vis struct $col;
        )+

        const _: () = {
            #[allow(non_camel_case_types, dead_code)]
            enum __Ordinal {
                $( $field, )+
            }

            $(
                impl $crate::store::ColumnOf<$store> for $col {
                    type Elem = $ty;
                    const NAME: &'static str = stringify!($field);
                    const ORDINAL: usize = __Ordinal::$field as usize;

                    fn column(store: &$store) -> &$crate::store::Column<$ty> {
                        &store.$field
                    }

                    fn column_mut(store: &mut $store) -> &mut $crate::store::Column<$ty> {
                        &mut store.$field
                    }
                }
            )+

            impl $crate::store::SoaStorage for $store {
                const NAME: &'static str = stringify!($store);
                const COLUMN_NAMES: &'static [&'static str] = &[ $( stringify!($field), )+ ];

                fn identity(&self) -> &$crate::store::IdentityTable {
                    &self.identity
                }

                fn erased_columns(&self) -> ::std::vec::Vec<&dyn $crate::store::ErasedColumn> {
                    ::std::vec![ $( &self.$field as &dyn $crate::store::ErasedColumn, )+ ]
                }

                fn parts_mut(
                    &mut self,
                ) -> (
                    &mut $crate::store::IdentityTable,
                    ::std::vec::Vec<&mut dyn $crate::store::ErasedColumn>,
                ) {
                    (
                        &mut self.identity,
                        ::std::vec![ $( &mut self.$field as &mut dyn $crate::store::ErasedColumn, )+ ],
                    )
                }
            }
        };

        #[allow(dead_code)]
        impl $store {
            pub fn new() -> Self {
                Self::with_capacity(0)
            }

            pub fn with_capacity(capacity: usize) -> Self {
                Self {
                    identity: $crate::store::IdentityTable::with_capacity(capacity),
                    $( $field: $crate::store::Column::with_capacity(stringify!($field), capacity), )+
                }
            }

            pub fn with_config(config: &$crate::config::StoreConfig) -> Self {
                Self::with_capacity(config.initial_capacity)
            }

            /// Assemble a store from raw parts without validation
            pub fn from_parts(
                identity: $crate::store::IdentityTable,
                $( $field: ::std::vec::Vec<$ty>, )+
            ) -> Self {
                Self {
                    identity,
                    $( $field: $crate::store::Column::from_vec(stringify!($field), $field), )+
                }
            }

            /// Identity-seeded store over existing column data; the first column's
            /// length decides the row count
            pub fn from_columns($( $field: ::std::vec::Vec<$ty>, )+) -> Self {
                let rows = [ $( $field.len(), )+ ][0];
                Self::from_parts($crate::store::IdentityTable::seeded(rows), $( $field, )+)
            }

            /// Append a row, returning its stable id
            pub fn push(&mut self, $( $field: $ty, )+) -> $crate::error::SoaResult<$crate::store::RowId> {
                let id = self.identity.issue()?;
                $( self.$field.push($field); )+
                Ok(id)
            }
        }

        impl ::std::default::Default for $store {
            fn default() -> Self {
                Self::new()
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use crate::error::SoaError;
    use crate::store::{RowId, SoaStorage};

    crate::soa_store! {
        struct Pair {
            left: Left => i32,
            right: Right => String,
        }
    }

    #[test]
    fn test_ordinals_follow_declaration_order() {
        use crate::store::ColumnOf;
        assert_eq!(<Left as ColumnOf<Pair>>::ORDINAL, 0);
        assert_eq!(<Right as ColumnOf<Pair>>::ORDINAL, 1);
        assert_eq!(Pair::COLUMN_NAMES, &["left", "right"]);
    }

    #[test]
    fn test_push_and_remove() {
        let mut pair = Pair::new();
        let a = pair.push(1, "a".to_string()).unwrap();
        let b = pair.push(2, "b".to_string()).unwrap();
        let c = pair.push(3, "c".to_string()).unwrap();

        pair.remove(a).unwrap();
        assert_eq!(pair.len(), 2);
        assert_eq!(pair.column::<Left>().as_slice(), &[3, 2]);
        assert_eq!(pair.idx_of(c), Some(0));
        assert_eq!(pair.idx_of(b), Some(1));
        assert!(!pair.contains(a));
        assert!(pair.check_invariants());

        assert_eq!(pair.remove(a), Err(SoaError::UnknownRow { id: a.0 }));
        let d = pair.push(4, "d".to_string()).unwrap();
        assert_eq!(d, RowId(3));
    }

    #[test]
    fn test_remove_last_row() {
        let mut pair = Pair::new();
        let a = pair.push(1, "a".to_string()).unwrap();
        pair.remove(a).unwrap();
        assert!(pair.is_empty());
        assert!(pair.check_invariants());
    }

    #[test]
    fn test_clear_keeps_ids_retired() {
        let mut pair = Pair::with_capacity(4);
        let a = pair.push(1, "a".to_string()).unwrap();
        pair.clear();
        assert!(pair.is_empty());
        assert!(!pair.contains(a));
        assert_eq!(pair.push(2, "b".to_string()).unwrap(), RowId(1));
        assert!(pair.check_invariants());
    }
}
