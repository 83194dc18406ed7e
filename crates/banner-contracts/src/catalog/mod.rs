mod registry;
mod selectors;

pub use registry::{Dimensions, SizeCatalog, SizeSpec, SizeTarget};
pub use selectors::{SizeSelection, NO_SIZE_SELECTED};
