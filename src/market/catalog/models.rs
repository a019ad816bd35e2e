//! Catalog data structures: products, wood types, marketplace users, and
//! board volume calculation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One lumber listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Product {
    pub id: String,
    pub seller_id: String,
    pub wood_type_id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Total volume of the listing, cubic meters.
    pub volume: f64,
    /// Price for the whole listing.
    pub price: f64,
    #[serde(default)]
    pub delivery_possible: bool,
    #[serde(default)]
    pub pickup_location: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WoodType {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Buyer {
    pub id: String,
    #[serde(default)]
    pub is_online: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Seller {
    pub id: String,
    #[serde(default)]
    pub is_online: bool,
    pub created_at: DateTime<Utc>,
}

/// Input for the wooden-board volume calculation: a product photo plus the
/// reference dimensions of one board, in millimeters.
#[derive(Debug, Clone, Serialize)]
pub struct VolumeRequest {
    pub image_url: String,
    pub board_height_mm: f64,
    pub board_length_mm: f64,
}

/// One board detected on the photo, with its bounding polygon for overlay
/// rendering and the derived volume.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DetectedBoard {
    /// Cubic meters.
    pub volume: f64,
    pub height_mm: f64,
    pub width_mm: f64,
    pub length_mm: f64,
    /// Polygon vertices in image coordinates, `[x, y]` pairs.
    #[serde(default)]
    pub points: Vec<[f64; 2]>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VolumeResponse {
    pub total_volume: f64,
    pub board_count: usize,
    #[serde(default)]
    pub boards: Vec<DetectedBoard>,
}
