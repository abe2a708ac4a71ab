use std::collections::BTreeMap;

use chrono::Duration;
use criterion::{Criterion, criterion_group, criterion_main};
use domain::{
    CartSnapshot, CheckoutToken, DeliveryInfo, Money, OrderLedger, OrderLine, OrderState,
    PaymentLabel, ProductId, Transition, UserId,
};
use event_store::InMemoryEventStore;
use projections::{Projection, ProjectionProcessor, ReconciliationQueue, UserOrdersView};

/// Writes `n` orders awaiting payment, spread over ten users.
async fn populate_store(store: &InMemoryEventStore, n: usize) {
    let ledger = OrderLedger::new(store.clone());
    for i in 0..n {
        let snapshot = CartSnapshot::new(
            UserId::new((i % 10) as i64),
            vec![OrderLine {
                product_id: ProductId::new(format!("SKU-{i}")),
                name: "Widget".to_string(),
                model: "W-1".to_string(),
                quantity: 1,
                unit_price: Money::from_minor_units(500),
                options: BTreeMap::new(),
            }],
        )
        .unwrap();
        let token = CheckoutToken::for_snapshot(&snapshot, Duration::seconds(30));
        let order_id = ledger.create_order(&snapshot, &token).await.unwrap().order_id;
        ledger
            .record_payment_request(
                order_id,
                PaymentLabel::generate(order_id),
                DeliveryInfo {
                    full_name: "Bench User".to_string(),
                    phone: "+10000000000".to_string(),
                    email: None,
                    address: None,
                    comment: None,
                },
            )
            .await
            .unwrap();
        ledger
            .transition(
                order_id,
                OrderState::Pending,
                Transition::AwaitPayment {
                    redirect_url: "https://pay.example".to_string(),
                },
            )
            .await
            .unwrap();
    }
}

fn bench_catch_up(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryEventStore::new();
    rt.block_on(populate_store(&store, 100));

    c.bench_function("projections/catch_up_100_orders", |b| {
        b.iter(|| {
            rt.block_on(async {
                let mut processor = ProjectionProcessor::new(store.clone());
                processor.register(Box::new(ReconciliationQueue::new()) as Box<dyn Projection>);
                processor.register(Box::new(UserOrdersView::new()) as Box<dyn Projection>);
                processor.run_catch_up().await.unwrap();
            });
        });
    });
}

fn bench_queries(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryEventStore::new();
    let queue = ReconciliationQueue::new();
    let orders = UserOrdersView::new();

    rt.block_on(async {
        populate_store(&store, 200).await;
        let mut processor = ProjectionProcessor::new(store);
        processor.register(Box::new(queue.clone()));
        processor.register(Box::new(orders.clone()));
        processor.run_catch_up().await.unwrap();
    });

    c.bench_function("projections/due_orders_200", |b| {
        b.iter(|| rt.block_on(queue.due_orders()));
    });

    c.bench_function("projections/orders_for_user", |b| {
        b.iter(|| rt.block_on(orders.orders_for_user(UserId::new(3), 20)));
    });
}

criterion_group!(benches, bench_catch_up, bench_queries);
criterion_main!(benches);
