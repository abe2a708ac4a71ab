//! Prices a user's cart into an immutable order snapshot.

use std::time::Duration;

use domain::{CartSnapshot, OrderLine, UserId};

use crate::error::{ReconciliationError, Result, UnavailableLine, UnavailableReason};
use crate::services::{CartStore, Catalog, call_with_timeout};

pub struct CartSnapshotBuilder<C: Catalog, K: CartStore> {
    catalog: C,
    carts: K,
    call_timeout: Duration,
}

impl<C: Catalog, K: CartStore> CartSnapshotBuilder<C, K> {
    pub fn new(catalog: C, carts: K, call_timeout: Duration) -> Self {
        Self {
            catalog,
            carts,
            call_timeout,
        }
    }

    pub fn carts(&self) -> &K {
        &self.carts
    }

    /// Reads the cart and prices every line at the catalog's current price.
    ///
    /// Fails with `UnavailableItem` listing every line that cannot be bought.
    /// The cart itself is left untouched.
    #[tracing::instrument(skip(self))]
    pub async fn build(&self, user_id: UserId) -> Result<CartSnapshot> {
        let cart = call_with_timeout(
            self.call_timeout,
            "read_cart",
            self.carts.read_cart(user_id),
            ReconciliationError::CartStore,
        )
        .await?;
        if cart.is_empty() {
            return Err(ReconciliationError::EmptyCart(user_id));
        }

        let mut lines = Vec::with_capacity(cart.len());
        let mut unavailable = Vec::new();

        for line in cart {
            let quote = call_with_timeout(
                self.call_timeout,
                "current_price",
                self.catalog.current_price(&line.product_id),
                ReconciliationError::Catalog,
            )
            .await?;

            let priced = match quote {
                _ if line.quantity == 0 => Err(UnavailableReason::InvalidQuantity),
                None => Err(UnavailableReason::UnknownProduct),
                Some(q) if !q.purchasable => Err(UnavailableReason::NotPurchasable),
                Some(q) if line.quantity > q.available_quantity => {
                    Err(UnavailableReason::QuantityAboveCap {
                        requested: line.quantity,
                        available: q.available_quantity,
                    })
                }
                Some(q) => Ok(OrderLine {
                    product_id: line.product_id.clone(),
                    name: q.name,
                    model: q.model,
                    quantity: line.quantity,
                    unit_price: q.price,
                    options: line.options,
                }),
            };

            match priced {
                Ok(priced) => lines.push(priced),
                Err(reason) => unavailable.push(UnavailableLine {
                    product_id: line.product_id,
                    reason,
                }),
            }
        }

        if !unavailable.is_empty() {
            tracing::info!(%user_id, count = unavailable.len(), "cart has unavailable lines");
            return Err(ReconciliationError::UnavailableItem { lines: unavailable });
        }

        CartSnapshot::new(user_id, lines).ok_or(ReconciliationError::AmountOverflow)
    }
}

#[cfg(test)]
mod tests {
    use domain::{CartLine, Money, ProductId};

    use super::*;
    use crate::services::{InMemoryCartStore, InMemoryCatalog};

    fn builder() -> (
        CartSnapshotBuilder<InMemoryCatalog, InMemoryCartStore>,
        InMemoryCatalog,
        InMemoryCartStore,
    ) {
        let catalog = InMemoryCatalog::new();
        let carts = InMemoryCartStore::new();
        let builder =
            CartSnapshotBuilder::new(catalog.clone(), carts.clone(), Duration::from_secs(1));
        (builder, catalog, carts)
    }

    #[tokio::test]
    async fn test_prices_lines_at_catalog_price() {
        let (builder, catalog, carts) = builder();
        let user = UserId::new(1);
        catalog.add_product("A", "Tea", Money::from_minor_units(100), 10);
        carts.add_line(user, CartLine::new("A", 2).with_option("size", "L"));

        let snapshot = builder.build(user).await.unwrap();

        assert_eq!(snapshot.total_amount, Money::from_minor_units(200));
        assert_eq!(snapshot.lines[0].name, "Tea");
        assert_eq!(
            snapshot.lines[0].options.get("size").map(String::as_str),
            Some("L")
        );
        assert_eq!(carts.lines(user).len(), 1);
    }

    #[tokio::test]
    async fn test_empty_cart() {
        let (builder, _, _) = builder();
        let result = builder.build(UserId::new(1)).await;
        assert!(matches!(result, Err(ReconciliationError::EmptyCart(_))));
    }

    #[tokio::test]
    async fn test_reports_every_unavailable_line() {
        let (builder, catalog, carts) = builder();
        let user = UserId::new(1);
        catalog.add_product("ok", "Tea", Money::from_minor_units(100), 10);
        catalog.add_product("hidden", "Mug", Money::from_minor_units(300), 10);
        catalog.set_purchasable(&ProductId::new("hidden"), false);
        catalog.add_product("scarce", "Pot", Money::from_minor_units(900), 1);

        carts.add_line(user, CartLine::new("ok", 1));
        carts.add_line(user, CartLine::new("gone", 1));
        carts.add_line(user, CartLine::new("hidden", 1));
        carts.add_line(user, CartLine::new("scarce", 3));

        let lines = match builder.build(user).await {
            Err(ReconciliationError::UnavailableItem { lines }) => lines,
            other => panic!("unexpected {other:?}"),
        };

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].reason, UnavailableReason::UnknownProduct);
        assert_eq!(lines[1].reason, UnavailableReason::NotPurchasable);
        assert_eq!(
            lines[2].reason,
            UnavailableReason::QuantityAboveCap {
                requested: 3,
                available: 1
            }
        );
    }

    #[tokio::test]
    async fn test_overflowing_total_is_an_error() {
        let (builder, catalog, carts) = builder();
        let user = UserId::new(1);
        catalog.add_product("A", "Gold", Money::from_minor_units(i64::MAX / 2), 10);
        carts.add_line(user, CartLine::new("A", 3));

        let result = builder.build(user).await;
        assert!(matches!(result, Err(ReconciliationError::AmountOverflow)));
    }

    #[tokio::test]
    async fn test_catalog_outage_is_retryable() {
        let (builder, catalog, carts) = builder();
        let user = UserId::new(1);
        carts.add_line(user, CartLine::new("A", 1));
        catalog.set_fail_on_lookup(true);

        let err = builder.build(user).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
