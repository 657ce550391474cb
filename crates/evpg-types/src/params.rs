//! The encoded parameter array.

use std::ops::Range;

use bytes::BytesMut;

use crate::error::ParamError;
use crate::oid::Oid;
use crate::to_param::{IsNull, ToParam};

/// Largest value length the protocol's `int32` length field can carry.
const MAX_VALUE_LEN: usize = i32::MAX as usize;

/// Largest parameter count the protocol's `int16` count field can carry.
const MAX_PARAMS: usize = u16::MAX as usize;

/// Wire format of a parameter value (or of requested results).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(i16)]
pub enum Format {
    /// Textual representation.
    #[default]
    Text = 0,
    /// Binary representation.
    Binary = 1,
}

impl Format {
    /// Protocol format code.
    #[must_use]
    pub const fn code(self) -> i16 {
        self as i16
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Slot {
    /// Byte range in the scratch buffer, `None` for NULL.
    span: Option<Range<usize>>,
    format: Format,
    oid: Oid,
}

/// An ordered, owned set of encoded query parameters.
///
/// All values live in one growable scratch buffer; each entry records the
/// byte range it occupies. Cloning copies the whole buffer, so a clone never
/// depends on the original's lifetime or later mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParamSet {
    buf: BytesMut,
    slots: Vec<Slot>,
}

impl ParamSet {
    /// Create an empty parameter set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a parameter set with room reserved for `params` entries and
    /// `bytes` bytes of encoded values.
    #[must_use]
    pub fn with_capacity(params: usize, bytes: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(bytes),
            slots: Vec::with_capacity(params),
        }
    }

    /// Reserve room for at least `additional` more entries.
    pub fn reserve(&mut self, additional: usize) {
        self.slots.reserve(additional);
    }

    /// Append one parameter.
    pub fn add<T: ToParam>(&mut self, value: T) -> &mut Self {
        self.buf.reserve(value.size_hint());
        let start = self.buf.len();
        let span = match value.encode(&mut self.buf) {
            IsNull::No => Some(start..self.buf.len()),
            IsNull::Yes => {
                self.buf.truncate(start);
                None
            }
        };
        self.slots.push(Slot {
            span,
            format: T::FORMAT,
            oid: T::OID,
        });
        self
    }

    /// Append a NULL parameter of the given type.
    pub fn add_null(&mut self, oid: Oid) -> &mut Self {
        self.slots.push(Slot {
            span: None,
            format: Format::Text,
            oid,
        });
        self
    }

    /// Number of parameters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the set has no parameters.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Total number of encoded value bytes.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        self.buf.len()
    }

    /// Remove all parameters, keeping allocated storage.
    pub fn clear(&mut self) {
        self.buf.clear();
        self.slots.clear();
    }

    /// Get the parameter at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<ParamRef<'_>> {
        self.slots.get(index).map(|slot| self.view(slot))
    }

    /// Iterate over the parameters in order.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = ParamRef<'_>> + '_ {
        self.slots.iter().map(|slot| self.view(slot))
    }

    /// Parameter values, `None` for NULL.
    #[must_use]
    pub fn values(&self) -> Vec<Option<&[u8]>> {
        self.iter().map(|p| p.value()).collect()
    }

    /// Parameter type ids.
    #[must_use]
    pub fn oids(&self) -> Vec<Oid> {
        self.slots.iter().map(|slot| slot.oid).collect()
    }

    /// Parameter format codes.
    #[must_use]
    pub fn formats(&self) -> Vec<Format> {
        self.slots.iter().map(|slot| slot.format).collect()
    }

    /// Parameter lengths as the protocol transmits them (`-1` for NULL).
    pub fn lengths(&self) -> Result<Vec<i32>, ParamError> {
        self.iter()
            .enumerate()
            .map(|(index, p)| p.wire_length(index))
            .collect()
    }

    /// Parameter count as the protocol transmits it.
    pub fn wire_count(&self) -> Result<i16, ParamError> {
        if self.slots.len() > MAX_PARAMS {
            return Err(ParamError::TooManyParameters {
                count: self.slots.len(),
                max: MAX_PARAMS,
            });
        }
        // The wire field is an unsigned count carried in an int16 slot.
        Ok(self.slots.len() as u16 as i16)
    }

    fn view<'a>(&'a self, slot: &'a Slot) -> ParamRef<'a> {
        ParamRef {
            value: slot.span.clone().map(|span| &self.buf[span]),
            format: slot.format,
            oid: slot.oid,
        }
    }
}

/// A borrowed view of one encoded parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamRef<'a> {
    value: Option<&'a [u8]>,
    format: Format,
    oid: Oid,
}

impl<'a> ParamRef<'a> {
    /// Encoded bytes, `None` for NULL.
    #[must_use]
    pub fn value(&self) -> Option<&'a [u8]> {
        self.value
    }

    /// Value format.
    #[must_use]
    pub fn format(&self) -> Format {
        self.format
    }

    /// Value type id.
    #[must_use]
    pub fn oid(&self) -> Oid {
        self.oid
    }

    /// Byte length of the value, `None` for NULL.
    #[must_use]
    pub fn len(&self) -> Option<usize> {
        self.value.map(<[u8]>::len)
    }

    /// Whether this parameter is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.value.is_none()
    }

    fn wire_length(&self, index: usize) -> Result<i32, ParamError> {
        match self.value {
            None => Ok(-1),
            Some(bytes) => i32::try_from(bytes.len()).map_err(|_| ParamError::ValueTooLarge {
                index,
                length: bytes.len(),
                max: MAX_VALUE_LEN,
            }),
        }
    }
}
