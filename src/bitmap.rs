//! Bitmap module: LSB-ordered bitmaps used for selections and validity.

use std::fmt;

/// An LSB ordered bitmap.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Bitmap {
    len: usize,
    data: Vec<u8>,
}

impl Bitmap {
    /// Create a bitmap of `len` bits, all set to `val`.
    pub fn new_with_val(val: bool, len: usize) -> Self {
        let fill = if val { u8::MAX } else { 0 };
        let mut bitmap = Bitmap {
            len,
            data: vec![fill; len.div_ceil(8)],
        };
        bitmap.clear_tail();
        bitmap
    }

    pub fn from_bools(bools: impl IntoIterator<Item = bool>) -> Self {
        let mut bitmap = Bitmap::default();
        for b in bools {
            bitmap.push(b);
        }
        bitmap
    }

    /// Get the number of bits being tracked by this bitmap.
    pub const fn len(&self) -> usize {
        self.len
    }

    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn push(&mut self, val: bool) {
        if self.len == self.data.len() * 8 {
            self.data.push(0);
        }
        let idx = self.len;
        self.len += 1;
        self.set(idx, val);
    }

    /// Get the value at index.
    ///
    /// Panics if index is out of bounds.
    #[inline]
    pub fn value(&self, idx: usize) -> bool {
        assert!(idx < self.len, "bitmap index {idx} out of bounds ({})", self.len);
        let byte = self.data[idx >> 3];
        (byte >> (idx & 7)) & 1 != 0
    }

    #[inline]
    pub fn set(&mut self, idx: usize, val: bool) {
        assert!(idx < self.len, "bitmap index {idx} out of bounds ({})", self.len);
        if val {
            self.data[idx >> 3] |= 1 << (idx & 7);
        } else {
            self.data[idx >> 3] &= !(1 << (idx & 7));
        }
    }

    /// Count the set bits. Bits past `len` are always kept zero.
    pub fn count_trues(&self) -> usize {
        self.data.iter().map(|b| b.count_ones() as usize).sum()
    }

    pub fn any(&self) -> bool {
        self.data.iter().any(|&b| b != 0)
    }

    /// Bitwise AND with another bitmap of the same length.
    pub fn and_with(&mut self, other: &Bitmap) {
        debug_assert_eq!(self.len, other.len);
        self.data.iter_mut().zip(&other.data).for_each(|(a, b)| *a &= *b);
    }

    pub fn or_with(&mut self, other: &Bitmap) {
        debug_assert_eq!(self.len, other.len);
        self.data.iter_mut().zip(&other.data).for_each(|(a, b)| *a |= *b);
    }

    pub fn negate(&mut self) {
        self.data.iter_mut().for_each(|b| *b = !*b);
        self.clear_tail();
    }

    /// Iterate the indices of all set bits in ascending order.
    pub fn iter_set(&self) -> impl Iterator<Item = usize> + '_ {
        self.data.iter().enumerate().flat_map(|(byte_idx, &byte)| {
            let mut bits = byte;
            std::iter::from_fn(move || {
                if bits == 0 {
                    return None;
                }
                let bit = bits.trailing_zeros() as usize;
                bits &= bits - 1;
                Some(byte_idx * 8 + bit)
            })
        })
    }

    fn clear_tail(&mut self) {
        let rem = self.len % 8;
        if rem != 0 {
            if let Some(last) = self.data.last_mut() {
                *last &= (1u8 << rem) - 1;
            }
        }
    }
}

impl fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bitmap")
            .field("len", &self.len)
            .field("trues", &self.count_trues())
            .finish()
    }
}
