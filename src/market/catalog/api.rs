//! Catalog HTTP API client.
//!
//! Products, wood types, marketplace users, images, and the wooden-board
//! volume calculation. The search endpoint is the single cached call: a
//! short-lived in-memory cache absorbs repeated queries while the user
//! types; everything else always hits the backend.

use crate::market::catalog::models::{
    Buyer, Product, Seller, VolumeRequest, VolumeResponse, WoodType,
};
use crate::market::types::handle_http_response;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

/// TTL-bound query result cache for the product search endpoint.
pub struct SearchCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, (Instant, Vec<Product>)>>,
}

impl SearchCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Cached result for `query`, if it is still fresh. Stale entries are
    /// dropped on access.
    pub fn get(&self, query: &str) -> Option<Vec<Product>> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(query) {
            Some((stored_at, products)) if stored_at.elapsed() < self.ttl => {
                Some(products.clone())
            }
            Some(_) => {
                entries.remove(query);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, query: &str, products: Vec<Product>) {
        self.entries
            .lock()
            .unwrap()
            .insert(query.to_string(), (Instant::now(), products));
    }
}

pub struct CatalogApi {
    client: reqwest::Client,
    api_base_url: String,
    search_cache: SearchCache,
}

impl CatalogApi {
    pub fn new(client: reqwest::Client, api_base_url: String, search_cache_ttl: Duration) -> Self {
        Self {
            client,
            api_base_url,
            search_cache: SearchCache::new(search_cache_ttl),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.api_base_url.trim_end_matches('/'), path)
    }

    /// One catalog page plus the backend's total listing count.
    pub async fn list_products(&self, offset: usize, limit: usize) -> Result<(Vec<Product>, i64)> {
        let url = self.url("/products");
        let response = self
            .client
            .get(&url)
            .query(&[("offset", offset.to_string()), ("limit", limit.to_string())])
            .send()
            .await
            .context("list products request failed")?;
        let resp = handle_http_response::<Vec<Product>>(response, "list products").await?;
        let products = resp.data.unwrap_or_default();
        let total = resp.total.unwrap_or(products.len() as i64);
        Ok((products, total))
    }

    pub async fn get_product(&self, product_id: &str) -> Result<Product> {
        let url = self.url(&format!("/products/{}", product_id));
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("get product request failed")?;
        let resp = handle_http_response::<Product>(response, "get product").await?;
        resp.data
            .ok_or_else(|| anyhow::anyhow!("get product: response carried no data"))
    }

    /// Full-text product search. Results are served from the short-lived
    /// cache when the same query repeats within the TTL.
    pub async fn search_products(&self, query: &str) -> Result<Vec<Product>> {
        if let Some(cached) = self.search_cache.get(query) {
            debug!("[CatalogAPI] search cache hit for {:?}", query);
            return Ok(cached);
        }

        let url = self.url("/products/search");
        let response = self
            .client
            .get(&url)
            .query(&[("q", query)])
            .send()
            .await
            .context("search products request failed")?;
        let resp = handle_http_response::<Vec<Product>>(response, "search products").await?;
        let products = resp.data.unwrap_or_default();
        self.search_cache.put(query, products.clone());
        Ok(products)
    }

    pub async fn list_wood_types(&self) -> Result<Vec<WoodType>> {
        let url = self.url("/wood-types");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("list wood types request failed")?;
        let resp = handle_http_response::<Vec<WoodType>>(response, "list wood types").await?;
        Ok(resp.data.unwrap_or_default())
    }

    pub async fn get_buyer(&self, buyer_id: &str) -> Result<Buyer> {
        let url = self.url(&format!("/buyers/{}", buyer_id));
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("get buyer request failed")?;
        let resp = handle_http_response::<Buyer>(response, "get buyer").await?;
        resp.data
            .ok_or_else(|| anyhow::anyhow!("get buyer: response carried no data"))
    }

    pub async fn get_seller(&self, seller_id: &str) -> Result<Seller> {
        let url = self.url(&format!("/sellers/{}", seller_id));
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("get seller request failed")?;
        let resp = handle_http_response::<Seller>(response, "get seller").await?;
        resp.data
            .ok_or_else(|| anyhow::anyhow!("get seller: response carried no data"))
    }

    /// URL of a product image; the file itself is fetched by the UI layer.
    pub fn image_url(&self, image_id: &str) -> String {
        self.url(&format!("/images/{}/file", image_id))
    }

    /// Board detection + volume calculation for a product photo.
    pub async fn calculate_volume(&self, request: &VolumeRequest) -> Result<VolumeResponse> {
        let url = self.url("/wooden-boards/calculate-volume");
        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .context("volume calculation request failed")?;
        let resp = handle_http_response::<VolumeResponse>(response, "calculate volume").await?;
        resp.data
            .ok_or_else(|| anyhow::anyhow!("calculate volume: response carried no data"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn product(id: &str) -> Product {
        Product {
            id: id.to_string(),
            seller_id: "s1".to_string(),
            wood_type_id: "w1".to_string(),
            title: "Pine boards".to_string(),
            description: None,
            volume: 2.5,
            price: 15000.0,
            delivery_possible: true,
            pickup_location: None,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    #[test]
    fn search_cache_serves_fresh_entries_only() {
        let cache = SearchCache::new(Duration::from_millis(40));
        assert!(cache.get("pine").is_none());

        cache.put("pine", vec![product("p1")]);
        let hit = cache.get("pine").expect("entry is fresh");
        assert_eq!(hit.len(), 1);
        assert_eq!(hit[0].id, "p1");

        std::thread::sleep(Duration::from_millis(60));
        assert!(cache.get("pine").is_none(), "entry expired after the TTL");
        // Expired entries are evicted, not resurrected.
        assert!(cache.get("pine").is_none());
    }

    #[test]
    fn search_cache_keys_by_query() {
        let cache = SearchCache::new(Duration::from_secs(60));
        cache.put("pine", vec![product("p1")]);
        cache.put("oak", vec![product("p2"), product("p3")]);

        assert_eq!(cache.get("pine").unwrap().len(), 1);
        assert_eq!(cache.get("oak").unwrap().len(), 2);
        assert!(cache.get("birch").is_none());
    }
}
