//! Conversion of Rust values into encoded parameters.

use bytes::{BufMut, Bytes, BytesMut};

use crate::oid::Oid;
use crate::params::Format;

/// Whether an encoded parameter is SQL NULL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsNull {
    /// The value was written to the buffer.
    No,
    /// The value is NULL and nothing was written.
    Yes,
}

/// A value that can be appended to a [`ParamSet`](crate::ParamSet).
///
/// Implementations write their wire representation into `buf` and report
/// whether the value is NULL. Binary implementations must write big-endian.
pub trait ToParam {
    /// Type id sent with the parameter.
    const OID: Oid;
    /// Wire format of the encoded bytes.
    const FORMAT: Format;

    /// Append the encoded value to `buf`.
    fn encode(&self, buf: &mut BytesMut) -> IsNull;

    /// Number of bytes [`encode`](ToParam::encode) will write, if known.
    fn size_hint(&self) -> usize {
        0
    }
}

impl<T: ToParam + ?Sized> ToParam for &T {
    const OID: Oid = T::OID;
    const FORMAT: Format = T::FORMAT;

    fn encode(&self, buf: &mut BytesMut) -> IsNull {
        (**self).encode(buf)
    }

    fn size_hint(&self) -> usize {
        (**self).size_hint()
    }
}

impl<T: ToParam> ToParam for Option<T> {
    const OID: Oid = T::OID;
    const FORMAT: Format = T::FORMAT;

    fn encode(&self, buf: &mut BytesMut) -> IsNull {
        match self {
            Some(value) => value.encode(buf),
            None => IsNull::Yes,
        }
    }

    fn size_hint(&self) -> usize {
        self.as_ref().map_or(0, ToParam::size_hint)
    }
}

impl ToParam for str {
    const OID: Oid = Oid::TEXT;
    const FORMAT: Format = Format::Text;

    fn encode(&self, buf: &mut BytesMut) -> IsNull {
        buf.put_slice(self.as_bytes());
        IsNull::No
    }

    fn size_hint(&self) -> usize {
        self.len()
    }
}

impl ToParam for String {
    const OID: Oid = Oid::TEXT;
    const FORMAT: Format = Format::Text;

    fn encode(&self, buf: &mut BytesMut) -> IsNull {
        self.as_str().encode(buf)
    }

    fn size_hint(&self) -> usize {
        self.len()
    }
}

impl ToParam for [u8] {
    const OID: Oid = Oid::BYTEA;
    const FORMAT: Format = Format::Binary;

    fn encode(&self, buf: &mut BytesMut) -> IsNull {
        buf.put_slice(self);
        IsNull::No
    }

    fn size_hint(&self) -> usize {
        self.len()
    }
}

impl ToParam for Vec<u8> {
    const OID: Oid = Oid::BYTEA;
    const FORMAT: Format = Format::Binary;

    fn encode(&self, buf: &mut BytesMut) -> IsNull {
        self.as_slice().encode(buf)
    }

    fn size_hint(&self) -> usize {
        self.len()
    }
}

impl ToParam for Bytes {
    const OID: Oid = Oid::BYTEA;
    const FORMAT: Format = Format::Binary;

    fn encode(&self, buf: &mut BytesMut) -> IsNull {
        self.as_ref().encode(buf)
    }

    fn size_hint(&self) -> usize {
        self.len()
    }
}

impl ToParam for bool {
    const OID: Oid = Oid::BOOL;
    const FORMAT: Format = Format::Binary;

    fn encode(&self, buf: &mut BytesMut) -> IsNull {
        buf.put_u8(u8::from(*self));
        IsNull::No
    }

    fn size_hint(&self) -> usize {
        1
    }
}

macro_rules! impl_binary_scalar {
    ($ty:ty, $oid:expr, $put:ident) => {
        impl ToParam for $ty {
            const OID: Oid = $oid;
            const FORMAT: Format = Format::Binary;

            fn encode(&self, buf: &mut BytesMut) -> IsNull {
                // BufMut::put_* is always big-endian (network order).
                buf.$put(*self);
                IsNull::No
            }

            fn size_hint(&self) -> usize {
                std::mem::size_of::<$ty>()
            }
        }
    };
}

impl_binary_scalar!(i16, Oid::INT2, put_i16);
impl_binary_scalar!(i32, Oid::INT4, put_i32);
impl_binary_scalar!(i64, Oid::INT8, put_i64);
impl_binary_scalar!(f32, Oid::FLOAT4, put_f32);
impl_binary_scalar!(f64, Oid::FLOAT8, put_f64);

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn encoded<T: ToParam>(value: T) -> (IsNull, Vec<u8>) {
        let mut buf = BytesMut::new();
        let is_null = value.encode(&mut buf);
        (is_null, buf.to_vec())
    }

    #[test]
    fn test_integers_are_big_endian() {
        assert_eq!(encoded(0x0102_i16).1, vec![0x01, 0x02]);
        assert_eq!(encoded(0x0102_0304_i32).1, vec![0x01, 0x02, 0x03, 0x04]);
        assert_eq!(
            encoded(0x0102_0304_0506_0708_i64).1,
            vec![0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]
        );
        assert_eq!(encoded(-1_i32).1, vec![0xFF; 4]);
    }

    #[test]
    fn test_floats_use_bit_pattern() {
        assert_eq!(encoded(1.0_f32).1, 1.0_f32.to_bits().to_be_bytes().to_vec());
        assert_eq!(encoded(-2.5_f64).1, (-2.5_f64).to_bits().to_be_bytes().to_vec());
        // 1.0f32 = 0x3F800000
        assert_eq!(encoded(1.0_f32).1, vec![0x3F, 0x80, 0x00, 0x00]);
    }

    #[test]
    fn test_nan_payload_preserved() {
        let nan = f64::from_bits(0x7FF8_0000_0000_1234);
        let bytes = encoded(nan).1;
        let decoded = u64::from_be_bytes(bytes.try_into().unwrap());
        assert_eq!(decoded, 0x7FF8_0000_0000_1234);
    }

    #[test]
    fn test_text_is_raw_utf8() {
        let (is_null, bytes) = encoded("héllo");
        assert_eq!(is_null, IsNull::No);
        assert_eq!(bytes, "héllo".as_bytes());
        assert_eq!(bytes.len(), 6);
    }

    #[test]
    fn test_none_is_null() {
        let (is_null, bytes) = encoded(None::<i32>);
        assert_eq!(is_null, IsNull::Yes);
        assert!(bytes.is_empty());
    }

    #[test]
    fn test_bool_single_byte() {
        assert_eq!(encoded(true).1, vec![1]);
        assert_eq!(encoded(false).1, vec![0]);
    }
}
