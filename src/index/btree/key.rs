use std::cmp::Ordering;
use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{PageId, Rid};

/// Fixed-width little-endian encoding of the values stored inside node
/// pages. Offsets into the pair array are derived from `ENCODED_LEN`.
pub trait StorageCodec: Copy {
    const ENCODED_LEN: usize;
    fn encode_into(&self, buf: &mut [u8]);
    fn decode_from(buf: &[u8]) -> Self;
}

impl StorageCodec for PageId {
    const ENCODED_LEN: usize = 4;

    fn encode_into(&self, buf: &mut [u8]) {
        LittleEndian::write_i32(buf, *self);
    }

    fn decode_from(buf: &[u8]) -> Self {
        LittleEndian::read_i32(buf)
    }
}

impl StorageCodec for Rid {
    const ENCODED_LEN: usize = 8;

    fn encode_into(&self, buf: &mut [u8]) {
        LittleEndian::write_i32(&mut buf[0..4], self.page_id);
        LittleEndian::write_u32(&mut buf[4..8], self.slot);
    }

    fn decode_from(buf: &[u8]) -> Self {
        Rid::new(
            LittleEndian::read_i32(&buf[0..4]),
            LittleEndian::read_u32(&buf[4..8]),
        )
    }
}

/// Fixed-width index key of N bytes (N in {4, 8, 16, 32, 64}).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GenericKey<const N: usize> {
    pub data: [u8; N],
}

impl<const N: usize> Default for GenericKey<N> {
    fn default() -> Self {
        Self { data: [0; N] }
    }
}

impl<const N: usize> GenericKey<N> {
    /// Build a key from an integer column value.
    pub fn from_i64(value: i64) -> Self {
        let mut key = Self::default();
        if N >= 8 {
            LittleEndian::write_i64(&mut key.data[0..8], value);
        } else {
            LittleEndian::write_i32(&mut key.data[0..4], value as i32);
        }
        key
    }

    pub fn to_i64(&self) -> i64 {
        if N >= 8 {
            LittleEndian::read_i64(&self.data[0..8])
        } else {
            LittleEndian::read_i32(&self.data[0..4]) as i64
        }
    }

    /// Build a key from raw column bytes, zero-padded or truncated to N.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut key = Self::default();
        let len = bytes.len().min(N);
        key.data[..len].copy_from_slice(&bytes[..len]);
        key
    }
}

impl<const N: usize> StorageCodec for GenericKey<N> {
    const ENCODED_LEN: usize = N;

    fn encode_into(&self, buf: &mut [u8]) {
        buf[..N].copy_from_slice(&self.data);
    }

    fn decode_from(buf: &[u8]) -> Self {
        let mut data = [0; N];
        data.copy_from_slice(&buf[..N]);
        Self { data }
    }
}

/// User-supplied key ordering for the tree.
pub trait KeyComparator<K>: Clone + Send + Sync {
    fn compare(&self, a: &K, b: &K) -> Ordering;
}

/// Compares the leading integer column as a signed value, then the trailing
/// bytes lexicographically.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenericComparator<const N: usize>;

impl<const N: usize> KeyComparator<GenericKey<N>> for GenericComparator<N> {
    fn compare(&self, a: &GenericKey<N>, b: &GenericKey<N>) -> Ordering {
        let head = N.min(8);
        let lhs = if head >= 8 {
            LittleEndian::read_i64(&a.data[0..8])
        } else {
            LittleEndian::read_i32(&a.data[0..4]) as i64
        };
        let rhs = if head >= 8 {
            LittleEndian::read_i64(&b.data[0..8])
        } else {
            LittleEndian::read_i32(&b.data[0..4]) as i64
        };
        lhs.cmp(&rhs).then_with(|| a.data[head..].cmp(&b.data[head..]))
    }
}

/// The fixed key widths the catalog instantiates.
pub type Key4 = GenericKey<4>;
pub type Key8 = GenericKey<8>;
pub type Key16 = GenericKey<16>;
pub type Key32 = GenericKey<32>;
pub type Key64 = GenericKey<64>;
