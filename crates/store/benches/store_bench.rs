use chrono::{Duration, Utc};
use common::{OrderId, ProductId};
use criterion::{Criterion, criterion_group, criterion_main};
use domain::{ItemsReserved, OutboxEvent, Reservation, ReservationItem, StockLedgerEntry};
use store::{
    InMemoryInventoryStore, InventoryStore, InventoryTxn, LedgerWrite, ReservationWrite,
};

fn reservation_txn(sku: &str) -> InventoryTxn {
    let entry = StockLedgerEntry::new(ProductId::new(sku), 100);
    let reservation = Reservation::new(
        OrderId::new(),
        vec![ReservationItem::new(sku, 4)],
        Utc::now(),
        Duration::minutes(15),
    );
    let event = ItemsReserved {
        reservation_id: reservation.id(),
        order_id: reservation.order_id(),
        items: reservation.items().to_vec(),
    };
    let outbox = OutboxEvent::new(reservation.id().to_string(), &event, None).unwrap();
    InventoryTxn::new()
        .with_ledger(LedgerWrite::insert(entry))
        .with_reservation(ReservationWrite::insert(reservation))
        .with_outbox(outbox)
}

fn bench_commit_ledger_insert(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("store/commit_ledger_insert", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = InMemoryInventoryStore::new();
                let entry = StockLedgerEntry::new(ProductId::new("SKU-001"), 100);
                store
                    .commit(InventoryTxn::new().with_ledger(LedgerWrite::insert(entry)))
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_commit_full_reservation(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("store/commit_reservation_with_outbox", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = InMemoryInventoryStore::new();
                store.commit(reservation_txn("SKU-001")).await.unwrap();
            });
        });
    });
}

fn bench_cas_update_cycle(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("store/cas_update_cycle", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = InMemoryInventoryStore::new();
                let product_id = ProductId::new("SKU-001");
                store
                    .commit(InventoryTxn::new().with_ledger(LedgerWrite::insert(
                        StockLedgerEntry::new(product_id.clone(), 100),
                    )))
                    .await
                    .unwrap();

                for _ in 0..10 {
                    let entry = store.ledger_entry(&product_id).await.unwrap().unwrap();
                    let read_version = entry.version();
                    let mut entry = entry;
                    entry.reserve(1).unwrap();
                    store
                        .commit(
                            InventoryTxn::new()
                                .with_ledger(LedgerWrite::update(entry, read_version)),
                        )
                        .await
                        .unwrap();
                }
            });
        });
    });
}

criterion_group!(
    benches,
    bench_commit_ledger_insert,
    bench_commit_full_reservation,
    bench_cas_update_cycle
);
criterion_main!(benches);
