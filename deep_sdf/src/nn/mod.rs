//! Neural network components.

mod decoder;

pub use decoder::{DenseLayer, SdfDecoder, SdfForward};
