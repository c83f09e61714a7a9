//! Small `bitflags`-style macro shared by the bitfield value types
//! (`TestType`, `Permission`) that spec §3/§4 store as single integer
//! columns. Kept local rather than depending on the `bitflags` crate for
//! two small sets.

macro_rules! bitflags_like {
    (
        $(#[$meta:meta])*
        $name:ident {
            $($variant:ident = $value:expr,)*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        pub struct $name(i32);

        impl $name {
            $(
                #[allow(missing_docs)]
                pub const $variant: $name = $name($value);
            )*

            /// The empty set.
            pub const NONE: $name = $name(0);

            /// Build from a raw bitmask value (as stored in a database column).
            pub fn from_bits(bits: i32) -> Self {
                $name(bits)
            }

            /// The raw bitmask value.
            pub fn bits(self) -> i32 {
                self.0
            }

            /// True if `other`'s bits are a subset of `self`'s.
            pub fn contains(self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }

            /// Union of two sets.
            pub fn union(self, other: Self) -> Self {
                $name(self.0 | other.0)
            }
        }

        impl std::ops::BitOr for $name {
            type Output = Self;
            fn bitor(self, rhs: Self) -> Self {
                self.union(rhs)
            }
        }
    };
}

pub(crate) use bitflags_like;
