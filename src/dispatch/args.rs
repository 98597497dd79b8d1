//! Kernel argument values.

use crate::memory::{Buffer, Image2D};
use crate::program::ParamKind;

/// Type of a by-value kernel parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarType {
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    /// Fixed-size byte array or vector, e.g. `char16` or `float4`.
    Bytes(usize),
}

impl ScalarType {
    pub fn size(self) -> usize {
        match self {
            ScalarType::I32 | ScalarType::U32 | ScalarType::F32 => 4,
            ScalarType::I64 | ScalarType::U64 | ScalarType::F64 => 8,
            ScalarType::Bytes(n) => n,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    Bytes(Vec<u8>),
}

impl ScalarValue {
    pub fn scalar_type(&self) -> ScalarType {
        match self {
            ScalarValue::I32(_) => ScalarType::I32,
            ScalarValue::U32(_) => ScalarType::U32,
            ScalarValue::I64(_) => ScalarType::I64,
            ScalarValue::U64(_) => ScalarType::U64,
            ScalarValue::F32(_) => ScalarType::F32,
            ScalarValue::F64(_) => ScalarType::F64,
            ScalarValue::Bytes(b) => ScalarType::Bytes(b.len()),
        }
    }
}

/// Types a kernel body can read back out of a scalar argument.
pub trait ScalarArg: Sized {
    fn from_value(value: &ScalarValue) -> Option<Self>;
}

macro_rules! scalar_impls {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for ScalarValue {
                fn from(v: $ty) -> Self {
                    ScalarValue::$variant(v)
                }
            }

            impl From<$ty> for KernelArg {
                fn from(v: $ty) -> Self {
                    KernelArg::Scalar(ScalarValue::$variant(v))
                }
            }

            impl ScalarArg for $ty {
                fn from_value(value: &ScalarValue) -> Option<Self> {
                    match value {
                        ScalarValue::$variant(v) => Some(*v),
                        _ => None,
                    }
                }
            }
        )*
    };
}

scalar_impls!(i32 => I32, u32 => U32, i64 => I64, u64 => U64, f32 => F32, f64 => F64);

impl<const N: usize> From<[u8; N]> for ScalarValue {
    fn from(bytes: [u8; N]) -> Self {
        ScalarValue::Bytes(bytes.to_vec())
    }
}

impl From<Vec<u8>> for ScalarValue {
    fn from(bytes: Vec<u8>) -> Self {
        ScalarValue::Bytes(bytes)
    }
}

/// One positional argument.
#[derive(Debug, Clone)]
pub enum KernelArg {
    Scalar(ScalarValue),
    Buffer(Buffer),
    Image(Image2D),
    /// Local memory reservation in bytes, allocated per work-group.
    Local(usize),
}

impl KernelArg {
    pub fn scalar<V: Into<ScalarValue>>(value: V) -> Self {
        KernelArg::Scalar(value.into())
    }

    pub fn buffer(buffer: &Buffer) -> Self {
        KernelArg::Buffer(buffer.clone())
    }

    pub fn image(image: &Image2D) -> Self {
        KernelArg::Image(image.clone())
    }

    /// By-value byte array, e.g. a `char[16]` pattern.
    pub fn bytes(bytes: &[u8]) -> Self {
        KernelArg::Scalar(ScalarValue::Bytes(bytes.to_vec()))
    }

    pub fn local(bytes: usize) -> Self {
        KernelArg::Local(bytes)
    }

    /// Local reservation for `count` elements of `T`.
    pub fn local_array<T>(count: usize) -> Self {
        KernelArg::Local(count * std::mem::size_of::<T>())
    }

    /// Why this argument cannot fill a parameter of kind `kind`, if it can't.
    pub(crate) fn check(&self, kind: ParamKind, context_id: u64) -> Result<(), String> {
        match (kind, self) {
            (ParamKind::Scalar(expected), KernelArg::Scalar(value)) => {
                let actual = value.scalar_type();
                if actual == expected {
                    Ok(())
                } else {
                    Err(format!("expected scalar {:?}, got {:?}", expected, actual))
                }
            }
            (ParamKind::Global, KernelArg::Buffer(buffer)) => {
                if buffer.context_id() == context_id {
                    Ok(())
                } else {
                    Err("buffer belongs to another context".to_string())
                }
            }
            (ParamKind::Image, KernelArg::Image(image)) => {
                if image.context_id() == context_id {
                    Ok(())
                } else {
                    Err("image belongs to another context".to_string())
                }
            }
            (ParamKind::Local, KernelArg::Local(bytes)) => {
                if *bytes > 0 {
                    Ok(())
                } else {
                    Err("local reservation must be > 0 bytes".to_string())
                }
            }
            (expected, got) => Err(format!("expected {:?}, got {}", expected, got.kind_name())),
        }
    }

    fn kind_name(&self) -> &'static str {
        match self {
            KernelArg::Scalar(_) => "scalar",
            KernelArg::Buffer(_) => "buffer",
            KernelArg::Image(_) => "image",
            KernelArg::Local(_) => "local reservation",
        }
    }
}

impl From<&Buffer> for KernelArg {
    fn from(buffer: &Buffer) -> Self {
        KernelArg::Buffer(buffer.clone())
    }
}

impl From<Buffer> for KernelArg {
    fn from(buffer: Buffer) -> Self {
        KernelArg::Buffer(buffer)
    }
}

impl From<&Image2D> for KernelArg {
    fn from(image: &Image2D) -> Self {
        KernelArg::Image(image.clone())
    }
}

impl From<ScalarValue> for KernelArg {
    fn from(value: ScalarValue) -> Self {
        KernelArg::Scalar(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_types() {
        assert_eq!(ScalarValue::from(3i32).scalar_type(), ScalarType::I32);
        assert_eq!(ScalarValue::from(3.0f64).scalar_type(), ScalarType::F64);
        assert_eq!(
            ScalarValue::from(*b"thatwithhavefrom").scalar_type(),
            ScalarType::Bytes(16)
        );
        assert_eq!(ScalarType::Bytes(16).size(), 16);
    }

    #[test]
    fn test_scalar_check() {
        let arg = KernelArg::scalar(2.0f32);
        assert!(arg.check(ParamKind::Scalar(ScalarType::F32), 1).is_ok());
        assert!(arg.check(ParamKind::Scalar(ScalarType::I32), 1).is_err());
        assert!(arg.check(ParamKind::Global, 1).is_err());
        assert!(KernelArg::local(0).check(ParamKind::Local, 1).is_err());
        assert!(KernelArg::local_array::<f32>(64).check(ParamKind::Local, 1).is_ok());
    }

    #[test]
    fn test_scalar_arg_readback() {
        assert_eq!(u32::from_value(&ScalarValue::U32(7)), Some(7));
        assert_eq!(u32::from_value(&ScalarValue::I32(7)), None);
    }
}
