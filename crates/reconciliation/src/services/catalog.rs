//! Authoritative product prices and availability.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use domain::{Money, ProductId};

use super::lock;
use crate::error::{ReconciliationError, Result};

/// What the catalog says about a product right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductQuote {
    pub product_id: ProductId,
    pub name: String,
    pub model: String,
    pub price: Money,
    pub purchasable: bool,
    /// Upper bound on the quantity one order may take.
    pub available_quantity: u32,
}

#[async_trait]
pub trait Catalog: Send + Sync {
    /// `None` when the product does not exist.
    async fn current_price(&self, product_id: &ProductId) -> Result<Option<ProductQuote>>;
}

#[derive(Debug, Default)]
struct CatalogState {
    products: HashMap<ProductId, ProductQuote>,
    lookups: usize,
    fail_on_lookup: bool,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    state: Arc<Mutex<CatalogState>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a purchasable product.
    pub fn add_product(
        &self,
        product_id: impl Into<ProductId>,
        name: &str,
        price: Money,
        available_quantity: u32,
    ) {
        let product_id = product_id.into();
        let quote = ProductQuote {
            model: format!("{product_id}-M"),
            product_id: product_id.clone(),
            name: name.to_string(),
            price,
            purchasable: true,
            available_quantity,
        };
        self.upsert(quote);
    }

    pub fn upsert(&self, quote: ProductQuote) {
        lock(&self.state)
            .products
            .insert(quote.product_id.clone(), quote);
    }

    pub fn set_price(&self, product_id: &ProductId, price: Money) {
        if let Some(quote) = lock(&self.state).products.get_mut(product_id) {
            quote.price = price;
        }
    }

    pub fn set_purchasable(&self, product_id: &ProductId, purchasable: bool) {
        if let Some(quote) = lock(&self.state).products.get_mut(product_id) {
            quote.purchasable = purchasable;
        }
    }

    pub fn set_fail_on_lookup(&self, fail: bool) {
        lock(&self.state).fail_on_lookup = fail;
    }

    pub fn lookup_count(&self) -> usize {
        lock(&self.state).lookups
    }
}

#[async_trait]
impl Catalog for InMemoryCatalog {
    async fn current_price(&self, product_id: &ProductId) -> Result<Option<ProductQuote>> {
        let mut state = lock(&self.state);
        state.lookups += 1;
        if state.fail_on_lookup {
            return Err(ReconciliationError::Catalog("catalog unavailable".to_string()));
        }
        Ok(state.products.get(product_id).cloned())
    }
}
