use std::collections::BTreeMap;

use ndarray::ArrayView2;

use crate::{MlErr, Result};

/// A named collection of tensors, the exchange format between trainable state and storage.
pub type StateDict = BTreeMap<String, Tensor>;

/// A dense, row-major `f32` tensor detached from any model.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl Tensor {
    /// Creates a new `Tensor`.
    ///
    /// # Arguments
    /// * `shape` - The size of each dimension.
    /// * `data` - The values, in row-major order.
    ///
    /// # Returns
    /// The tensor or an error if `data` doesn't fit `shape`.
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self> {
        let expected: usize = shape.iter().product();

        if data.len() != expected {
            return Err(MlErr::SizeMismatch {
                what: "tensor data",
                got: data.len(),
                expected,
            });
        }

        Ok(Self { shape, data })
    }

    /// A one dimensional tensor holding a copy of `values`.
    pub fn vector(values: &[f32]) -> Self {
        Self {
            shape: vec![values.len()],
            data: values.to_vec(),
        }
    }

    /// A two dimensional tensor holding a copy of `values`.
    pub fn matrix(values: ArrayView2<f32>) -> Self {
        Self {
            shape: vec![values.nrows(), values.ncols()],
            data: values.iter().copied().collect(),
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn into_data(self) -> Vec<f32> {
        self.data
    }
}

/// Looks up `name` in `state` and checks it has the `expected` shape.
///
/// # Arguments
/// * `state` - The state to look in.
/// * `name` - The tensor's name.
/// * `expected` - The shape the caller will read the tensor as.
///
/// # Returns
/// The tensor's values or an error if it's missing or shaped differently.
pub fn expect_tensor<'a>(state: &'a StateDict, name: &str, expected: &[usize]) -> Result<&'a [f32]> {
    let tensor = state.get(name).ok_or_else(|| MlErr::MissingTensor {
        name: name.to_string(),
    })?;

    if tensor.shape() != expected {
        return Err(MlErr::ShapeMismatch {
            name: name.to_string(),
            got: tensor.shape().to_vec(),
            expected: expected.to_vec(),
        });
    }

    Ok(tensor.data())
}
