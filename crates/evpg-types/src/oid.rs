//! PostgreSQL type identifiers.

use std::fmt;

/// A PostgreSQL type OID, sent alongside each parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Oid(pub u32);

impl Oid {
    /// `bool`
    pub const BOOL: Self = Self(16);
    /// `bytea`
    pub const BYTEA: Self = Self(17);
    /// `int8`
    pub const INT8: Self = Self(20);
    /// `int2`
    pub const INT2: Self = Self(21);
    /// `int4`
    pub const INT4: Self = Self(23);
    /// `text`
    pub const TEXT: Self = Self(25);
    /// `float4`
    pub const FLOAT4: Self = Self(700);
    /// `float8`
    pub const FLOAT8: Self = Self(701);

    /// Get the raw OID value.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Get the SQL name of a well-known type, if this is one.
    #[must_use]
    pub const fn name(self) -> Option<&'static str> {
        match self.0 {
            16 => Some("bool"),
            17 => Some("bytea"),
            20 => Some("int8"),
            21 => Some("int2"),
            23 => Some("int4"),
            25 => Some("text"),
            700 => Some("float4"),
            701 => Some("float8"),
            _ => None,
        }
    }
}

impl From<u32> for Oid {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "oid({})", self.0),
        }
    }
}
