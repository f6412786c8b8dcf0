/// Types that know how to write themselves as the body of a frame.
pub trait Serialize {
    /// Appends the serialized representation of `self` to `buf`.
    ///
    /// # Arguments
    /// * `buf` - The frame buffer, it may already contain the length header.
    fn serialize(&self, buf: &mut Vec<u8>);
}
