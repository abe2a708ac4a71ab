//! The user's mutable cart, owned by the conversation layer.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use domain::{CartLine, UserId};

use super::lock;
use crate::error::{ReconciliationError, Result};

#[async_trait]
pub trait CartStore: Send + Sync {
    async fn read_cart(&self, user_id: UserId) -> Result<Vec<CartLine>>;

    /// Empties the cart once its contents are paid for.
    async fn clear_cart(&self, user_id: UserId) -> Result<()>;
}

#[derive(Debug, Default)]
struct CartState {
    carts: HashMap<UserId, Vec<CartLine>>,
    clears: HashMap<UserId, usize>,
    fail_on_clear: bool,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryCartStore {
    state: Arc<Mutex<CartState>>,
}

impl InMemoryCartStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_line(&self, user_id: UserId, line: CartLine) {
        lock(&self.state).carts.entry(user_id).or_default().push(line);
    }

    pub fn lines(&self, user_id: UserId) -> Vec<CartLine> {
        lock(&self.state)
            .carts
            .get(&user_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn clear_count(&self, user_id: UserId) -> usize {
        lock(&self.state).clears.get(&user_id).copied().unwrap_or(0)
    }

    pub fn set_fail_on_clear(&self, fail: bool) {
        lock(&self.state).fail_on_clear = fail;
    }
}

#[async_trait]
impl CartStore for InMemoryCartStore {
    async fn read_cart(&self, user_id: UserId) -> Result<Vec<CartLine>> {
        Ok(self.lines(user_id))
    }

    async fn clear_cart(&self, user_id: UserId) -> Result<()> {
        let mut state = lock(&self.state);
        if state.fail_on_clear {
            return Err(ReconciliationError::CartStore("cart store unavailable".to_string()));
        }
        state.carts.remove(&user_id);
        *state.clears.entry(user_id).or_default() += 1;
        Ok(())
    }
}
