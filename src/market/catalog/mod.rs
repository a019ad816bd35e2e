//! Catalog module: product/wood-type/user REST client.

pub mod api;
pub mod models;

pub use api::{CatalogApi, SearchCache};
pub use models::{Buyer, DetectedBoard, Product, Seller, VolumeRequest, VolumeResponse, WoodType};
