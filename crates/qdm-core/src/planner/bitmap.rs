//! Part completion bitmap.

/// One bit per part (LSB of byte 0 = part 0).
///
/// Serializes to/from bytes for the resume DB BLOB; only the first
/// `ceil(len/8)` bytes are significant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartBitmap {
    bytes: Vec<u8>,
    len: usize,
}

impl PartBitmap {
    /// Empty bitmap for `len` parts.
    pub fn new(len: usize) -> Self {
        PartBitmap {
            bytes: vec![0u8; len.div_ceil(8)],
            len,
        }
    }

    /// Deserialize from a DB BLOB. Extra bytes are ignored; missing bytes read as 0.
    /// Bits past `len` in the last byte are cleared.
    pub fn from_bytes(bytes: &[u8], len: usize) -> Self {
        let mut out = PartBitmap::new(len);
        let copy = bytes.len().min(out.bytes.len());
        out.bytes[..copy].copy_from_slice(&bytes[..copy]);
        if len % 8 != 0 {
            if let Some(last) = out.bytes.last_mut() {
                *last &= (1u8 << (len % 8)) - 1;
            }
        }
        out
    }

    pub fn from_flags(flags: &[bool]) -> Self {
        let mut out = PartBitmap::new(flags.len());
        for (i, _) in flags.iter().enumerate().filter(|(_, done)| **done) {
            out.set(i);
        }
        out
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.bytes.clone()
    }

    pub fn to_flags(&self) -> Vec<bool> {
        (0..self.len).map(|i| self.is_set(i)).collect()
    }

    /// Number of parts tracked.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Mark part `index` complete. Out-of-range indices are ignored.
    pub fn set(&mut self, index: usize) {
        if index < self.len {
            self.bytes[index / 8] |= 1 << (index % 8);
        }
    }

    pub fn clear(&mut self, index: usize) {
        if index < self.len {
            self.bytes[index / 8] &= !(1 << (index % 8));
        }
    }

    pub fn is_set(&self, index: usize) -> bool {
        index < self.len && (self.bytes[index / 8] & (1 << (index % 8))) != 0
    }

    pub fn count_set(&self) -> usize {
        self.bytes.iter().map(|b| b.count_ones() as usize).sum()
    }

    /// True when every part in `[0, len)` is complete (vacuously true for 0 parts).
    pub fn all_set(&self) -> bool {
        self.count_set() == self.len
    }

    /// Indices not yet complete, ascending.
    pub fn unset_indices(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.len).filter(move |&i| !self.is_set(i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitmap_new_and_roundtrip() {
        let mut b = PartBitmap::new(10);
        assert!(!b.all_set());
        b.set(0);
        b.set(3);
        b.set(9);
        assert!(b.is_set(0));
        assert!(!b.is_set(1));
        assert!(b.is_set(9));
        assert_eq!(b.count_set(), 3);

        let b2 = PartBitmap::from_bytes(&b.to_bytes(), 10);
        assert_eq!(b2, b);
    }

    #[test]
    fn bitmap_clear_and_unset_indices() {
        let mut b = PartBitmap::new(5);
        for i in 0..5 {
            b.set(i);
        }
        assert!(b.all_set());
        b.clear(2);
        assert!(!b.all_set());
        assert_eq!(b.unset_indices().collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn bitmap_out_of_range_is_ignored() {
        let mut b = PartBitmap::new(3);
        b.set(7);
        assert!(!b.is_set(7));
        assert_eq!(b.count_set(), 0);
    }

    #[test]
    fn bitmap_from_bytes_masks_extra_bits() {
        let b = PartBitmap::from_bytes(&[0xFF, 0xFF], 4);
        assert!(b.all_set());
        assert_eq!(b.count_set(), 4);
        assert_eq!(b.to_bytes(), vec![0x0F]);
    }

    #[test]
    fn bitmap_from_bytes_short() {
        let b = PartBitmap::from_bytes(&[0xFF], 16);
        assert!(b.is_set(7));
        assert!(!b.is_set(8));
    }

    #[test]
    fn flags_roundtrip() {
        let flags = vec![true, false, true, true, false, false, false, false, true];
        let b = PartBitmap::from_flags(&flags);
        assert_eq!(b.len(), 9);
        assert_eq!(b.to_flags(), flags);
    }

    #[test]
    fn empty_bitmap_is_complete() {
        assert!(PartBitmap::new(0).all_set());
    }
}
