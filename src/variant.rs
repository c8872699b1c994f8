//! Closed tagged unions as column elements
//!
//! [`tagged_union!`](crate::tagged_union) declares an enum over plain-old-data payloads
//! together with an exhaustive visitor trait. On the host the enum is visited directly.
//! For GPU dispatch it lowers to [`TaggedRepr`], a tag word followed by a fixed payload
//! area, and the generated WGSL prelude provides the matching struct, tag constants and a
//! switch-based visitor function.

use bytemuck::{Pod, Zeroable};

pub const PAYLOAD_WORDS: usize = 7;
pub const PAYLOAD_BYTES: usize = PAYLOAD_WORDS * 4;

/// Device layout of a tagged union element (32 bytes, 4-byte aligned)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct TaggedRepr {
    pub tag: u32,
    pub payload: [u32; PAYLOAD_WORDS],
}

impl TaggedRepr {
    /// Payloads larger than [`PAYLOAD_BYTES`] are rejected at compile time by
    /// `tagged_union!`
    pub fn pack<P: Pod>(tag: u32, payload: &P) -> Self {
        let mut repr = Self {
            tag,
            payload: [0; PAYLOAD_WORDS],
        };
        let bytes = bytemuck::bytes_of(payload);
        let len = bytes.len().min(PAYLOAD_BYTES);
        bytemuck::cast_slice_mut::<u32, u8>(&mut repr.payload)[..len].copy_from_slice(&bytes[..len]);
        repr
    }

    pub fn unpack<P: Pod>(&self) -> P {
        let mut value = P::zeroed();
        let dst = bytemuck::bytes_of_mut(&mut value);
        let len = dst.len().min(PAYLOAD_BYTES);
        dst[..len].copy_from_slice(&bytemuck::cast_slice::<u32, u8>(&self.payload)[..len]);
        value
    }
}

/// One alternative of a tagged union, as seen by shader code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Alternative {
    pub name: &'static str,
    pub tag: u32,
}

/// WGSL struct and tag constants for a union named `union`.
///
/// For `Shape` with alternatives `rectangle = 0` and `circle = 1` this emits
/// `struct Shape`, `SHAPE_RECTANGLE` and `SHAPE_CIRCLE`.
pub fn wgsl_prelude(union: &str, alternatives: &[Alternative]) -> String {
    let prefix = snake_case(union).to_uppercase();
    let mut wgsl = String::new();
    wgsl.push_str(&format!("// Tagged union {}\n", union));
    wgsl.push_str(&format!("struct {} {{\n", union));
    wgsl.push_str("    tag: u32,\n");
    wgsl.push_str(&format!("    payload: array<u32, {}>,\n", PAYLOAD_WORDS));
    wgsl.push_str("}\n");
    for alternative in alternatives {
        wgsl.push_str(&format!(
            "const {}_{}: u32 = {}u;\n",
            prefix,
            alternative.name.to_uppercase(),
            alternative.tag
        ));
    }
    wgsl
}

/// WGSL visitor `fn visit_<union>(value: <union>) -> <output>`.
///
/// The shader supplies one function per alternative, named `<union>_<alternative>`,
/// taking the raw payload words. Every alternative has its own case. WGSL requires a
/// `default` clause; it runs no alternative and returns the zero value of `output`, so
/// an unknown tag never computes a declared alternative.
pub fn wgsl_visitor(union: &str, alternatives: &[Alternative], output: &str) -> String {
    let snake = snake_case(union);
    let mut wgsl = String::new();
    wgsl.push_str(&format!(
        "fn visit_{}(value: {}) -> {} {{\n",
        snake, union, output
    ));
    wgsl.push_str(&format!("    var result: {};\n", output));
    wgsl.push_str("    switch value.tag {\n");
    for alternative in alternatives {
        wgsl.push_str(&format!(
            "        case {}u: {{ result = {}_{}(value.payload); }}\n",
            alternative.tag, snake, alternative.name
        ));
    }
    // Unknown tags keep the zero-initialised result.
    wgsl.push_str("        default: {}\n");
    wgsl.push_str("    }\n");
    wgsl.push_str("    return result;\n");
    wgsl.push_str("}\n");
    wgsl
}

fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, ch) in name.chars().enumerate() {
        if ch.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

/// Declare a closed tagged union usable as a column element.
///
/// ```rust
/// use bytemuck::{Pod, Zeroable};
///
/// #[repr(C)]
/// #[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
/// pub struct Square {
///     pub side: f32,
/// }
///
/// #[repr(C)]
/// #[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
/// pub struct Disc {
///     pub radius: f32,
/// }
///
/// soa_cache::tagged_union! {
///     pub enum Tile visit TileVisitor {
///         Square(Square) = 0 => square,
///         Disc(Disc) = 1 => disc,
///     }
/// }
///
/// struct Perimeter;
///
/// impl TileVisitor for Perimeter {
///     type Output = f32;
///
///     fn square(&self, value: &Square) -> f32 {
///         4.0 * value.side
///     }
///
///     fn disc(&self, value: &Disc) -> f32 {
///         2.0 * std::f32::consts::PI * value.radius
///     }
/// }
///
/// assert_eq!(Tile::Square(Square { side: 2.0 }).visit(&Perimeter), 8.0);
/// ```
///
/// Payloads must be `Pod + PartialEq` and at most
/// [`PAYLOAD_BYTES`](crate::variant::PAYLOAD_BYTES) bytes.
#[macro_export]
macro_rules! tagged_union {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident visit $visitor:ident {
            $( $(#[$vmeta:meta])* $variant:ident($payload:ty) = $tag:literal => $method:ident ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq)]
        $vis enum $name {
            $( $(#[$vmeta])* $variant($payload), )+
        }

        #[doc = concat!("Exhaustive visitor over the alternatives of `", stringify!($name), "`")]
        $vis trait $visitor {
            type Output;
            $( fn $method(&self, value: &$payload) -> Self::Output; )+
        }

        const _: () = {
            $(
                assert!(
                    ::core::mem::size_of::<$payload>() <= $crate::variant::PAYLOAD_BYTES,
                    concat!("payload of ", stringify!($name), "::", stringify!($variant), " is too large")
                );
            )+
        };

        #[allow(dead_code)]
        impl $name {
            pub const ALTERNATIVES: &'static [$crate::variant::Alternative] = &[
                $( $crate::variant::Alternative { name: stringify!($method), tag: $tag }, )+
            ];

            pub fn tag(&self) -> u32 {
                match self {
                    $( $name::$variant(_) => $tag, )+
                }
            }

            pub fn visit<V: $visitor + ?Sized>(&self, visitor: &V) -> V::Output {
                match self {
                    $( $name::$variant(value) => visitor.$method(value), )+
                }
            }

            pub fn wgsl_prelude() -> ::std::string::String {
                $crate::variant::wgsl_prelude(stringify!($name), Self::ALTERNATIVES)
            }

            pub fn wgsl_visitor(output: &str) -> ::std::string::String {
                $crate::variant::wgsl_visitor(stringify!($name), Self::ALTERNATIVES, output)
            }
        }

        impl $crate::offload::DeviceElement for $name {
            type Repr = $crate::variant::TaggedRepr;

            fn lower(&self) -> $crate::variant::TaggedRepr {
                match self {
                    $( $name::$variant(value) => $crate::variant::TaggedRepr::pack($tag, value), )+
                }
            }

            fn raise(repr: $crate::variant::TaggedRepr) -> $crate::error::SoaResult<Self> {
                match repr.tag {
                    $( $tag => Ok($name::$variant(repr.unpack())), )+
                    tag => Err($crate::error::SoaError::InvalidTag {
                        union: stringify!($name),
                        tag,
                    }),
                }
            }
        }
    };
}
