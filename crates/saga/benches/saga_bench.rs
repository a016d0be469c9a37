use common::{ProductId, UserId};
use criterion::{Criterion, criterion_group, criterion_main};
use domain::{Money, NewOrderItem};
use order_store::InMemoryOrderStore;
use saga::{InMemoryEventPublisher, InMemoryInventoryClient, InMemoryUserDirectory, OrderSaga};

type BenchSaga = OrderSaga<
    InMemoryOrderStore,
    InMemoryInventoryClient,
    InMemoryEventPublisher,
    InMemoryUserDirectory,
>;

fn make_saga() -> BenchSaga {
    let inventory = InMemoryInventoryClient::with_stock(
        (1..=5).map(|id| (ProductId::new(id), u32::MAX / 2)),
    );
    OrderSaga::new(
        InMemoryOrderStore::new(),
        inventory,
        InMemoryEventPublisher::new(),
        InMemoryUserDirectory::with_fallback("bench@example.com"),
    )
}

fn items() -> Vec<NewOrderItem> {
    (1..=5)
        .map(|id| NewOrderItem::new(id, 2, Money::from_cents(1999)))
        .collect()
}

fn bench_create_order(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let saga = make_saga();

    c.bench_function("saga/create_order", |b| {
        b.iter(|| {
            rt.block_on(async {
                saga.create_order(UserId::new(1), items()).await.unwrap();
            });
        });
    });
}

fn bench_create_and_cancel(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let saga = make_saga();

    c.bench_function("saga/create_and_cancel", |b| {
        b.iter(|| {
            rt.block_on(async {
                let order = saga.create_order(UserId::new(1), items()).await.unwrap();
                saga.cancel_order(order.id).await.unwrap();
            });
        });
    });
}

fn bench_get_orders_by_user(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let saga = make_saga();
    rt.block_on(async {
        for _ in 0..100 {
            saga.create_order(UserId::new(1), items()).await.unwrap();
        }
    });

    c.bench_function("saga/get_orders_by_user_100", |b| {
        b.iter(|| {
            rt.block_on(async {
                saga.get_orders_by_user(UserId::new(1)).await.unwrap();
            });
        });
    });
}

criterion_group!(
    benches,
    bench_create_order,
    bench_create_and_cancel,
    bench_get_orders_by_user,
);
criterion_main!(benches);
