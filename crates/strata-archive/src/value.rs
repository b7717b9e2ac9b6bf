//! Typed field values.
//!
//! Archives move fixed-width scalars, strings, and raw buffers. [`Scalar`]
//! is the type-erased scalar that crosses the object-safe reader/writer
//! traits; [`Primitive`] maps it back onto Rust numeric types.
//! [`ArchiveEnum`] and [`ArchiveFlags`] describe enumerations and flag sets
//! with the name tables used by the structured archive.

use std::fmt;

/// Width and interpretation of a scalar field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
}

impl ScalarKind {
    /// Encoded width in bytes.
    pub const fn width(self) -> usize {
        match self {
            Self::U8 | Self::I8 => 1,
            Self::U16 | Self::I16 => 2,
            Self::U32 | Self::I32 | Self::F32 => 4,
            Self::U64 | Self::I64 | Self::F64 => 8,
        }
    }

    pub const fn is_float(self) -> bool {
        matches!(self, Self::F32 | Self::F64)
    }

    pub const fn is_signed(self) -> bool {
        matches!(self, Self::I8 | Self::I16 | Self::I32 | Self::I64)
    }
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::U8 => "u8",
            Self::U16 => "u16",
            Self::U32 => "u32",
            Self::U64 => "u64",
            Self::I8 => "i8",
            Self::I16 => "i16",
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::F32 => "f32",
            Self::F64 => "f64",
        };
        f.write_str(name)
    }
}

/// A scalar field value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Scalar {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
}

impl Scalar {
    pub fn kind(&self) -> ScalarKind {
        match self {
            Self::U8(_) => ScalarKind::U8,
            Self::U16(_) => ScalarKind::U16,
            Self::U32(_) => ScalarKind::U32,
            Self::U64(_) => ScalarKind::U64,
            Self::I8(_) => ScalarKind::I8,
            Self::I16(_) => ScalarKind::I16,
            Self::I32(_) => ScalarKind::I32,
            Self::I64(_) => ScalarKind::I64,
            Self::F32(_) => ScalarKind::F32,
            Self::F64(_) => ScalarKind::F64,
        }
    }

    /// Append the little-endian encoding to `out`.
    pub fn write_le(&self, out: &mut Vec<u8>) {
        match *self {
            Self::U8(v) => out.push(v),
            Self::U16(v) => out.extend_from_slice(&v.to_le_bytes()),
            Self::U32(v) => out.extend_from_slice(&v.to_le_bytes()),
            Self::U64(v) => out.extend_from_slice(&v.to_le_bytes()),
            Self::I8(v) => out.extend_from_slice(&v.to_le_bytes()),
            Self::I16(v) => out.extend_from_slice(&v.to_le_bytes()),
            Self::I32(v) => out.extend_from_slice(&v.to_le_bytes()),
            Self::I64(v) => out.extend_from_slice(&v.to_le_bytes()),
            Self::F32(v) => out.extend_from_slice(&v.to_le_bytes()),
            Self::F64(v) => out.extend_from_slice(&v.to_le_bytes()),
        }
    }

    /// Decode a little-endian value of `kind`. `bytes` must be exactly
    /// `kind.width()` long.
    pub fn read_le(kind: ScalarKind, bytes: &[u8]) -> Option<Self> {
        Some(match kind {
            ScalarKind::U8 => Self::U8(*bytes.first()?),
            ScalarKind::U16 => Self::U16(u16::from_le_bytes(bytes.try_into().ok()?)),
            ScalarKind::U32 => Self::U32(u32::from_le_bytes(bytes.try_into().ok()?)),
            ScalarKind::U64 => Self::U64(u64::from_le_bytes(bytes.try_into().ok()?)),
            ScalarKind::I8 => Self::I8(i8::from_le_bytes(bytes.try_into().ok()?)),
            ScalarKind::I16 => Self::I16(i16::from_le_bytes(bytes.try_into().ok()?)),
            ScalarKind::I32 => Self::I32(i32::from_le_bytes(bytes.try_into().ok()?)),
            ScalarKind::I64 => Self::I64(i64::from_le_bytes(bytes.try_into().ok()?)),
            ScalarKind::F32 => Self::F32(f32::from_le_bytes(bytes.try_into().ok()?)),
            ScalarKind::F64 => Self::F64(f64::from_le_bytes(bytes.try_into().ok()?)),
        })
    }

    /// Range-checked conversion of an integer into `kind`.
    pub fn from_integer(kind: ScalarKind, value: i128) -> Option<Self> {
        Some(match kind {
            ScalarKind::U8 => Self::U8(value.try_into().ok()?),
            ScalarKind::U16 => Self::U16(value.try_into().ok()?),
            ScalarKind::U32 => Self::U32(value.try_into().ok()?),
            ScalarKind::U64 => Self::U64(value.try_into().ok()?),
            ScalarKind::I8 => Self::I8(value.try_into().ok()?),
            ScalarKind::I16 => Self::I16(value.try_into().ok()?),
            ScalarKind::I32 => Self::I32(value.try_into().ok()?),
            ScalarKind::I64 => Self::I64(value.try_into().ok()?),
            ScalarKind::F32 => Self::F32(value as f32),
            ScalarKind::F64 => Self::F64(value as f64),
        })
    }

    /// Conversion of a float into `kind`. Integer kinds are rejected.
    pub fn from_float(kind: ScalarKind, value: f64) -> Option<Self> {
        match kind {
            ScalarKind::F32 => Some(Self::F32(value as f32)),
            ScalarKind::F64 => Some(Self::F64(value)),
            _ => None,
        }
    }

    /// The value as an integer, if it is one.
    pub fn as_integer(&self) -> Option<i128> {
        Some(match *self {
            Self::U8(v) => v.into(),
            Self::U16(v) => v.into(),
            Self::U32(v) => v.into(),
            Self::U64(v) => v.into(),
            Self::I8(v) => v.into(),
            Self::I16(v) => v.into(),
            Self::I32(v) => v.into(),
            Self::I64(v) => v.into(),
            Self::F32(_) | Self::F64(_) => return None,
        })
    }
}

/// A Rust numeric type that maps onto exactly one [`ScalarKind`].
pub trait Primitive: Copy + Sized + 'static {
    const KIND: ScalarKind;

    fn into_scalar(self) -> Scalar;

    /// Extract from a scalar of exactly [`Self::KIND`].
    fn from_scalar(scalar: Scalar) -> Option<Self>;
}

macro_rules! impl_primitive {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl Primitive for $ty {
                const KIND: ScalarKind = ScalarKind::$variant;

                fn into_scalar(self) -> Scalar {
                    Scalar::$variant(self)
                }

                fn from_scalar(scalar: Scalar) -> Option<Self> {
                    match scalar {
                        Scalar::$variant(v) => Some(v),
                        _ => None,
                    }
                }
            }
        )*
    };
}

impl_primitive! {
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    f32 => F32,
    f64 => F64,
}

/// An enumeration stored as its variant index, or as its variant name in
/// verbose structured archives.
pub trait ArchiveEnum: Copy + Sized {
    /// Variant names, indexed by variant index. The length is the declared
    /// variant count used for range validation.
    const NAMES: &'static [&'static str];

    fn from_index(index: u32) -> Option<Self>;

    fn index(self) -> u32;
}

/// A set of bit flags stored as a raw mask, or as whitespace-separated flag
/// names in verbose structured archives.
pub trait ArchiveFlags: Copy + Sized {
    /// Flag names paired with their bit values.
    const FLAGS: &'static [(&'static str, u64)];

    fn from_bits(bits: u64) -> Self;

    fn bits(self) -> u64;
}

/// Resolve a single flag name or a whitespace-separated list of flag names.
///
/// A name matching one entry exactly wins over tokenizing, so flag names
/// are free to contain spaces as long as they are used alone.
pub fn parse_flag_names(text: &str, flags: &[(&str, u64)]) -> Result<u64, String> {
    if let Some((_, bits)) = flags.iter().find(|(name, _)| *name == text) {
        return Ok(*bits);
    }
    let mut bits = 0u64;
    for token in text.split_whitespace() {
        match flags.iter().find(|(name, _)| *name == token) {
            Some((_, value)) => bits |= value,
            None => return Err(token.to_owned()),
        }
    }
    Ok(bits)
}

/// Render `bits` as whitespace-separated flag names.
///
/// Returns `None` if some set bit has no name, in which case the caller
/// falls back to the numeric mask.
pub fn format_flag_names(bits: u64, flags: &[(&str, u64)]) -> Option<String> {
    let mut covered = 0u64;
    let mut names = Vec::new();
    for (name, value) in flags {
        if *value != 0 && bits & value == *value {
            covered |= value;
            names.push(*name);
        }
    }
    (covered == bits).then(|| names.join(" "))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum Filter {
        Nearest,
        Linear,
        Cubic,
    }

    impl ArchiveEnum for Filter {
        const NAMES: &'static [&'static str] = &["nearest", "linear", "cubic"];

        fn from_index(index: u32) -> Option<Self> {
            match index {
                0 => Some(Self::Nearest),
                1 => Some(Self::Linear),
                2 => Some(Self::Cubic),
                _ => None,
            }
        }

        fn index(self) -> u32 {
            self as u32
        }
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Usage(pub u64);

    impl Usage {
        pub const VERTEX: Self = Self(1);
        pub const INDEX: Self = Self(2);
        pub const UNIFORM: Self = Self(4);
    }

    impl ArchiveFlags for Usage {
        const FLAGS: &'static [(&'static str, u64)] =
            &[("vertex", 1), ("index", 2), ("uniform", 4)];

        fn from_bits(bits: u64) -> Self {
            Self(bits)
        }

        fn bits(self) -> u64 {
            self.0
        }
    }

    #[test]
    fn widths() {
        assert_eq!(ScalarKind::U8.width(), 1);
        assert_eq!(ScalarKind::I16.width(), 2);
        assert_eq!(ScalarKind::F32.width(), 4);
        assert_eq!(ScalarKind::U64.width(), 8);
    }

    #[test]
    fn le_encoding_roundtrip() {
        let mut out = Vec::new();
        Scalar::I32(-5).write_le(&mut out);
        assert_eq!(out, (-5i32).to_le_bytes());
        assert_eq!(Scalar::read_le(ScalarKind::I32, &out), Some(Scalar::I32(-5)));
        assert_eq!(Scalar::read_le(ScalarKind::I64, &out), None);
    }

    #[test]
    fn integer_conversion_is_range_checked() {
        assert_eq!(Scalar::from_integer(ScalarKind::U8, 255), Some(Scalar::U8(255)));
        assert_eq!(Scalar::from_integer(ScalarKind::U8, 256), None);
        assert_eq!(Scalar::from_integer(ScalarKind::U32, -1), None);
        assert_eq!(Scalar::from_integer(ScalarKind::I8, -128), Some(Scalar::I8(-128)));
        assert_eq!(Scalar::from_integer(ScalarKind::F32, 3), Some(Scalar::F32(3.0)));
    }

    #[test]
    fn float_into_integer_kind_is_rejected() {
        assert_eq!(Scalar::from_float(ScalarKind::U16, 1.0), None);
        assert_eq!(Scalar::from_float(ScalarKind::F64, 0.5), Some(Scalar::F64(0.5)));
    }

    #[test]
    fn primitive_requires_exact_kind() {
        assert_eq!(u16::from_scalar(Scalar::U16(7)), Some(7));
        assert_eq!(u16::from_scalar(Scalar::U32(7)), None);
        assert_eq!(f64::KIND, ScalarKind::F64);
    }

    #[test]
    fn parse_single_and_list() {
        assert_eq!(parse_flag_names("index", Usage::FLAGS), Ok(2));
        assert_eq!(parse_flag_names("vertex  uniform", Usage::FLAGS), Ok(5));
        assert_eq!(parse_flag_names("", Usage::FLAGS), Ok(0));
        assert_eq!(parse_flag_names("vertex bogus", Usage::FLAGS), Err("bogus".into()));
    }

    #[test]
    fn format_names() {
        assert_eq!(format_flag_names(5, Usage::FLAGS).as_deref(), Some("vertex uniform"));
        assert_eq!(format_flag_names(0, Usage::FLAGS).as_deref(), Some(""));
        assert_eq!(format_flag_names(8, Usage::FLAGS), None);
    }

    proptest! {
        #[test]
        fn flag_names_roundtrip(bits in 0u64..8) {
            let text = format_flag_names(bits, Usage::FLAGS).unwrap();
            prop_assert_eq!(parse_flag_names(&text, Usage::FLAGS), Ok(bits));
        }
    }
}
