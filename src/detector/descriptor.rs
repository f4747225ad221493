//! Packed binary descriptors and Hamming distance.

use serde::{Deserialize, Serialize};

use super::freak::NUM_COMPARISONS;

/// Bytes per descriptor: the pairwise comparisons packed 8 per byte.
pub const DESCRIPTOR_BYTES: usize = NUM_COMPARISONS.div_ceil(8);

/// Binary descriptor, most significant bit first within each byte.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Descriptor(pub Vec<u8>);

impl Descriptor {
    pub fn zeros() -> Self {
        Self(vec![0u8; DESCRIPTOR_BYTES])
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Set comparison bit `index`.
    #[inline]
    pub fn set_bit(&mut self, index: usize) {
        self.0[index / 8] |= 0x80 >> (index % 8);
    }

    #[inline]
    pub fn bit(&self, index: usize) -> bool {
        self.0[index / 8] & (0x80 >> (index % 8)) != 0
    }

    /// Hamming distance to another descriptor.
    #[inline]
    pub fn distance(&self, other: &Descriptor) -> u32 {
        hamming_distance(&self.0, &other.0)
    }
}

impl AsRef<Descriptor> for Descriptor {
    fn as_ref(&self) -> &Descriptor {
        self
    }
}

/// Number of differing bits. Extra trailing bytes of the longer slice count as differing.
pub fn hamming_distance(a: &[u8], b: &[u8]) -> u32 {
    let common: u32 = a.iter().zip(b).map(|(x, y)| (x ^ y).count_ones()).sum();
    let tail = if a.len() > b.len() { &a[b.len()..] } else { &b[a.len()..] };
    common + tail.iter().map(|x| x.count_ones()).sum::<u32>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_size() {
        assert_eq!(NUM_COMPARISONS, 666);
        assert_eq!(DESCRIPTOR_BYTES, 84);
        assert_eq!(Descriptor::zeros().len(), 84);
    }

    #[test]
    fn test_hamming_distance() {
        let a = Descriptor::zeros();
        let mut c = Descriptor::zeros();
        assert_eq!(a.distance(&c), 0);

        c.0[0] = 0xFF;
        assert_eq!(a.distance(&c), 8);

        c.0[1] = 0x0F;
        assert_eq!(a.distance(&c), 12);
    }

    #[test]
    fn test_hamming_self_and_symmetry() {
        let a = Descriptor((0..84u8).map(|i| i.wrapping_mul(73)).collect());
        let b = Descriptor((0..84u8).map(|i| i.wrapping_mul(29) ^ 0x5A).collect());
        assert_eq!(a.distance(&a), 0);
        assert_eq!(b.distance(&b), 0);
        assert_eq!(a.distance(&b), b.distance(&a));
        assert!(a.distance(&b) > 0);
    }

    #[test]
    fn test_bits_msb_first() {
        let mut d = Descriptor::zeros();
        d.set_bit(0);
        d.set_bit(9);
        assert_eq!(d.0[0], 0x80);
        assert_eq!(d.0[1], 0x40);
        assert!(d.bit(9));
        assert!(!d.bit(8));
    }
}
