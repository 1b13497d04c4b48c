//! Order carts keyed explicitly by their owner.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use crate::error::ReservationError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CartKey {
    Customer(i64),
    /// Visitor that has not logged in yet.
    Session(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CartLine {
    pub product_id: i64,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub subtotal: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CartSummary {
    pub lines: Vec<CartLine>,
    pub total: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cart {
    pub key: CartKey,
    lines: BTreeMap<i64, u32>,
}

impl Cart {
    pub fn new(key: CartKey) -> Self {
        Self {
            key,
            lines: BTreeMap::new(),
        }
    }

    pub fn add(&mut self, product_id: i64, quantity: u32) {
        if quantity == 0 {
            return;
        }
        let line = self.lines.entry(product_id).or_insert(0);
        *line = line.saturating_add(quantity);
    }

    pub fn remove(&mut self, product_id: i64) -> bool {
        self.lines.remove(&product_id).is_some()
    }

    pub fn quantity(&self, product_id: i64) -> u32 {
        self.lines.get(&product_id).copied().unwrap_or(0)
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Prices every line against `catalog` (product id -> unit price).
    pub fn price(&self, catalog: &HashMap<i64, Decimal>) -> Result<CartSummary, ReservationError> {
        let mut total = Decimal::ZERO;
        let mut lines = Vec::with_capacity(self.lines.len());
        for (&product_id, &quantity) in &self.lines {
            let unit_price = *catalog
                .get(&product_id)
                .ok_or(ReservationError::UnknownEntity { kind: "product", id: product_id })?;
            let subtotal = unit_price * Decimal::from(quantity);
            total += subtotal;
            lines.push(CartLine {
                product_id,
                quantity,
                unit_price,
                subtotal,
            });
        }
        Ok(CartSummary { lines, total })
    }
}

/// Holds carts between requests. Callers fetch a cart by key, change it and
/// hand it back through `update`; nothing is read from ambient state.
#[derive(Debug, Default)]
pub struct CartRegistry {
    carts: RwLock<HashMap<CartKey, Cart>>,
}

impl CartRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &CartKey) -> Cart {
        self.carts
            .read()
            .await
            .get(key)
            .cloned()
            .unwrap_or_else(|| Cart::new(key.clone()))
    }

    pub async fn update<F>(&self, key: &CartKey, f: F) -> Cart
    where
        F: FnOnce(&mut Cart),
    {
        let mut carts = self.carts.write().await;
        let cart = carts
            .entry(key.clone())
            .or_insert_with(|| Cart::new(key.clone()));
        f(cart);
        let snapshot = cart.clone();
        if snapshot.is_empty() {
            carts.remove(key);
        }
        snapshot
    }

    /// Removes and returns the cart, e.g. when it is turned into an order.
    pub async fn take(&self, key: &CartKey) -> Option<Cart> {
        self.carts.write().await.remove(key)
    }
}
