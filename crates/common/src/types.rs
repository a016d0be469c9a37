use std::num::TryFromIntError;

use serde::{Deserialize, Serialize};

/// Declares a `u32` surrogate identifier newtype.
///
/// Every service in the platform addresses its rows by unsigned 32-bit
/// ids on the wire, while Postgres stores them as `BIGINT`, so each id
/// converts losslessly to `i64` and fallibly back.
macro_rules! surrogate_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(u32);

        impl $name {
            /// Creates an identifier from its raw value.
            pub const fn new(value: u32) -> Self {
                Self(value)
            }

            /// Returns the raw value.
            pub const fn get(&self) -> u32 {
                self.0
            }

            /// Returns the value widened for database binding.
            pub fn as_i64(&self) -> i64 {
                i64::from(self.0)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u32> for $name {
            fn from(value: u32) -> Self {
                Self(value)
            }
        }

        impl From<$name> for u32 {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl TryFrom<i64> for $name {
            type Error = TryFromIntError;

            fn try_from(value: i64) -> Result<Self, Self::Error> {
                u32::try_from(value).map(Self)
            }
        }
    };
}

surrogate_id!(
    /// Surrogate key of an order row.
    OrderId
);

surrogate_id!(
    /// Surrogate key of a single order line (`order_details.id`).
    OrderItemId
);

surrogate_id!(
    /// Identifier of a user owned by the user service.
    UserId
);

surrogate_id!(
    /// Identifier of a product owned by the product service.
    ProductId
);
