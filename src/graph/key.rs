use crate::foundation::core::ElemType;
use xxhash_rust::xxh3::Xxh3;

const XXH3_SEED: u64 = 0x5e55_e7a0_c1d2_b3a4;

/// Structural identity of an operation.
///
/// Combines the operation kind, resolved size, output element type, a hash of its own
/// parameters, and the keys of its inputs. Two operations with identical effective behavior
/// produce the same key and therefore share one cache entry.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct OperationKey {
    pub hi: u64,
    pub lo: u64,
}

impl std::fmt::Display for OperationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}{:016x}", self.hi, self.lo)
    }
}

/// Incremental builder for [`OperationKey`].
///
/// Every write is length- or tag-prefixed so adjacent fields cannot alias each other.
pub struct KeyBuilder {
    inner: Xxh3,
}

impl KeyBuilder {
    /// Start a key for an operation of `kind` producing a `width x height` result of `elem`.
    pub fn new(kind: &str, width: u32, height: u32, elem: ElemType) -> Self {
        let mut b = Self {
            inner: Xxh3::with_seed(XXH3_SEED),
        };
        b.write_str(kind);
        b.write_u32(width);
        b.write_u32(height);
        b.write_u8(elem.tag());
        b
    }

    pub fn param_u32(mut self, v: u32) -> Self {
        self.write_u8(b'u');
        self.write_u32(v);
        self
    }

    pub fn param_u64(mut self, v: u64) -> Self {
        self.write_u8(b'U');
        self.write_u64(v);
        self
    }

    /// Floats are hashed by bit pattern, so `-0.0` and `0.0` produce different keys.
    pub fn param_f32(mut self, v: f32) -> Self {
        self.write_u8(b'f');
        self.write_u32(v.to_bits());
        self
    }

    pub fn param_bool(mut self, v: bool) -> Self {
        self.write_u8(b'b');
        self.write_u8(u8::from(v));
        self
    }

    pub fn param_str(mut self, v: &str) -> Self {
        self.write_u8(b's');
        self.write_str(v);
        self
    }

    pub fn param_bytes(mut self, v: &[u8]) -> Self {
        self.write_u8(b'B');
        self.write_u64(v.len() as u64);
        self.inner.update(v);
        self
    }

    /// Fold in the key of an input. Input order matters.
    pub fn input(mut self, key: OperationKey) -> Self {
        self.write_u8(b'i');
        self.write_u64(key.hi);
        self.write_u64(key.lo);
        self
    }

    pub fn finish(self) -> OperationKey {
        let v = self.inner.digest128();
        OperationKey {
            hi: (v >> 64) as u64,
            lo: v as u64,
        }
    }

    fn write_u8(&mut self, v: u8) {
        self.inner.update(&[v]);
    }

    fn write_u32(&mut self, v: u32) {
        self.inner.update(&v.to_le_bytes());
    }

    fn write_u64(&mut self, v: u64) {
        self.inner.update(&v.to_le_bytes());
    }

    fn write_str(&mut self, s: &str) {
        self.write_u64(s.len() as u64);
        self.inner.update(s.as_bytes());
    }
}
