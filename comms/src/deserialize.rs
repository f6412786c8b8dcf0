use std::io;

/// Types that can be rebuilt from the body of a received frame.
pub trait Deserialize: Sized {
    /// Parses a value from `buf`.
    ///
    /// # Arguments
    /// * `buf` - The frame body, without the length header.
    ///
    /// # Returns
    /// The parsed value or an `InvalidData` io error.
    fn deserialize(buf: &[u8]) -> io::Result<Self>;
}
