//! Fixed-width tree key and its comparison order.

use std::cmp::Ordering;
use std::fmt;

use crate::error::{Result, StorageError};
use crate::types::KEY_SIZE;

/// A fixed 16-byte key. Content is a null-terminated C-string within the
/// buffer; bytes after the first `\0` are ignored by comparison and by
/// [`Key::as_str`].
///
/// # Ordering
///
/// Keys compare **length-then-lexicographic**: the `strlen` of the shorter
/// key decides first, so `"9" < "10"` (length 1 < length 2) even though a
/// byte-for-byte comparison would put `"10"` first. This also means
/// `"b" < "az"` (length 1 < length 2), which is not standard lexicographic
/// order. This is a deliberate, documented choice (see `SPEC_FULL.md`
/// Open Question 1) rather than a silent behavior change; callers that
/// need plain lexicographic order should not rely on `Key`'s `Ord` impl
/// for that.
#[derive(Clone, Copy)]
pub struct Key([u8; KEY_SIZE]);

impl Key {
    /// Build a key from a string, which must fit (with room for the
    /// trailing NUL) in `KEY_SIZE` bytes.
    pub fn new(s: &str) -> Result<Self> {
        let bytes = s.as_bytes();
        if bytes.len() >= KEY_SIZE {
            return Err(StorageError::InvalidArgument(format!(
                "key {:?} exceeds the maximum length of {} bytes",
                s,
                KEY_SIZE - 1
            )));
        }
        let mut buf = [0u8; KEY_SIZE];
        buf[..bytes.len()].copy_from_slice(bytes);
        Ok(Self(buf))
    }

    /// Build a key from raw bytes, which must fit (with room for the
    /// trailing NUL) in `KEY_SIZE` bytes. Unlike [`Key::new`], `bytes` need
    /// not be valid UTF-8 — every byte is stored as given, so two distinct
    /// binary keys never collide the way routing them through a lossy
    /// UTF-8 conversion would.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() >= KEY_SIZE {
            return Err(StorageError::InvalidArgument(format!(
                "key of {} bytes exceeds the maximum length of {} bytes",
                bytes.len(),
                KEY_SIZE - 1
            )));
        }
        let mut buf = [0u8; KEY_SIZE];
        buf[..bytes.len()].copy_from_slice(bytes);
        Ok(Self(buf))
    }

    /// Wrap a raw, already-packed 16-byte buffer (as read from disk).
    pub fn from_raw(buf: [u8; KEY_SIZE]) -> Self {
        Self(buf)
    }

    /// The raw on-disk representation.
    pub fn as_raw(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    fn strlen(&self) -> usize {
        self.0.iter().position(|&b| b == 0).unwrap_or(KEY_SIZE)
    }

    /// The key's content up to its terminating NUL, as a UTF-8 string if
    /// valid.
    pub fn as_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.0[..self.strlen()])
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Key {}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        let (a_len, b_len) = (self.strlen(), other.strlen());
        a_len
            .cmp(&b_len)
            .then_with(|| self.0[..a_len].cmp(&other.0[..b_len]))
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({:?})", self.as_str())
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for Key {
    type Error = StorageError;

    fn try_from(s: &str) -> Result<Self> {
        Key::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_before_lexicographic() {
        let nine = Key::new("9").unwrap();
        let ten = Key::new("10").unwrap();
        assert!(nine < ten, "\"9\" should sort before \"10\"");
    }

    #[test]
    fn shorter_key_is_less_even_if_lexicographically_larger() {
        let b = Key::new("b").unwrap();
        let az = Key::new("az").unwrap();
        assert!(b < az, "\"b\" (len 1) should sort before \"az\" (len 2)");
    }

    #[test]
    fn equal_length_is_lexicographic() {
        let a = Key::new("aa").unwrap();
        let b = Key::new("ab").unwrap();
        assert!(a < b);
    }

    #[test]
    fn rejects_oversized_key() {
        let s = "x".repeat(KEY_SIZE);
        assert!(Key::new(&s).is_err());
    }

    #[test]
    fn roundtrips_through_raw_bytes() {
        let k = Key::new("hello").unwrap();
        let raw = *k.as_raw();
        let k2 = Key::from_raw(raw);
        assert_eq!(k, k2);
        assert_eq!(k2.as_str(), "hello");
    }
}
