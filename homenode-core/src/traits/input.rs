//! Input sampling

/// Source of the raw input vector the interpreter matches against
pub trait InputSource {
    /// Fill `inputs` with the current port levels
    ///
    /// The slice covers every port except the node-flags byte, which the
    /// core fills itself.
    fn sample(&mut self, inputs: &mut [u8]);
}

impl<T: InputSource + ?Sized> InputSource for &mut T {
    fn sample(&mut self, inputs: &mut [u8]) {
        (**self).sample(inputs)
    }
}
