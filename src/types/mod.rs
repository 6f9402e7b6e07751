//! Public types for the Cartographe API.

mod classification;
mod company;

pub use classification::{CATEGORIES, ClassificationResult, Layer, is_known_category};
pub use company::{CompanyRecord, normalize_name};
