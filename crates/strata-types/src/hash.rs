use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// 64-bit FNV-1a offset basis.
pub const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
/// 64-bit FNV-1a prime.
pub const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// 64-bit FNV-1a over raw bytes: XOR each byte in, then multiply.
///
/// This is a `const fn` so literal names can be hashed at compile time.
/// The run-time path calls the very same function, which is what keeps a
/// field name hashed into the binary bit-identical to the same name typed
/// into a data file and hashed at load time.
pub const fn fnv1a_64(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    let mut i = 0;
    while i < bytes.len() {
        hash ^= bytes[i] as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
        i += 1;
    }
    hash
}

/// Identity of a persistable object.
///
/// A `NameHash` is the FNV-1a hash of the object's name. It is the canonical
/// key of the object table and the only form in which one archived object
/// refers to another. Collisions are not detected.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NameHash(u64);

impl NameHash {
    /// The null hash. Represents "no object".
    pub const NULL: Self = Self(0);

    /// Hash a name. Usable in `const` context.
    pub const fn new(name: &str) -> Self {
        Self(fnv1a_64(name.as_bytes()))
    }

    /// Wrap a pre-computed hash value.
    pub const fn from_raw(value: u64) -> Self {
        Self(value)
    }

    /// The raw 64-bit value.
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Returns `true` if this is the null hash.
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Fixed-width (16 character) hex representation.
    pub fn to_hex(self) -> String {
        hex::encode(self.0.to_be_bytes())
    }

    /// Parse from a 16 character hex string.
    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        parse_hex_u64(s).map(Self)
    }
}

impl fmt::Debug for NameHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NameHash({})", self.to_hex())
    }
}

impl fmt::Display for NameHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl From<u64> for NameHash {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<NameHash> for u64 {
    fn from(hash: NameHash) -> Self {
        hash.0
    }
}

/// Identity of a serializable type, hashed from its fully-qualified type name.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeHash(u64);

impl TypeHash {
    /// Hash a type name. Usable in `const` context.
    pub const fn new(type_name: &str) -> Self {
        Self(fnv1a_64(type_name.as_bytes()))
    }

    /// Wrap a pre-computed hash value.
    pub const fn from_raw(value: u64) -> Self {
        Self(value)
    }

    /// The raw 64-bit value.
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Fixed-width (16 character) hex representation.
    pub fn to_hex(self) -> String {
        hex::encode(self.0.to_be_bytes())
    }

    /// Parse from a 16 character hex string.
    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        parse_hex_u64(s).map(Self)
    }
}

impl fmt::Debug for TypeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeHash({})", self.to_hex())
    }
}

impl fmt::Display for TypeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

fn parse_hex_u64(s: &str) -> Result<u64, TypeError> {
    let bytes = hex::decode(s).map_err(|e| TypeError::InvalidHex(e.to_string()))?;
    let arr: [u8; 8] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| TypeError::InvalidLength {
            expected: 8,
            actual: bytes.len(),
        })?;
    Ok(u64::from_be_bytes(arr))
}
