use proptest::prelude::*;
use std::sync::Arc;

use storefront_core::application::InventoryLedger;
use storefront_core::domain::value_objects::ProductId;
use storefront_core::infrastructure::memory::InMemoryStore;
use storefront_core::EcommerceError;

fn ledger(stock: u32) -> (Arc<InventoryLedger>, InMemoryStore) {
    let store = InMemoryStore::new();
    store.seed_product(ProductId(1), "Tote", 1500, stock);
    (Arc::new(InventoryLedger::new(Arc::new(store.clone()))), store)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_last_unit_goes_to_exactly_one_buyer() {
    for _ in 0..50 {
        let (ledger, store) = ledger(1);
        let a = tokio::spawn({ let l = ledger.clone(); async move { l.try_decrement(ProductId(1), 1).await } });
        let b = tokio::spawn({ let l = ledger.clone(); async move { l.try_decrement(ProductId(1), 1).await } });
        let results = [a.await.unwrap(), b.await.unwrap()];

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        let loser = results.iter().find_map(|r| r.as_ref().err()).unwrap();
        assert!(matches!(loser, EcommerceError::InsufficientStock { available: 0, .. }));
        assert_eq!(store.stock_of(ProductId(1)), Some(0));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_decrements_never_oversell() {
    let (ledger, store) = ledger(40);
    let tasks: Vec<_> = (0..100)
        .map(|i| {
            let l = ledger.clone();
            tokio::spawn(async move {
                if i % 5 == 0 { l.increment(ProductId(1), 1).await.map(|_| (0, 1)) }
                else { l.try_decrement(ProductId(1), 1).await.map(|_| (1, 0)) }
            })
        })
        .collect();

    let (mut taken, mut returned) = (0u32, 0u32);
    for task in tasks {
        match task.await.unwrap() {
            Ok((t, r)) => { taken += t; returned += r; }
            Err(e) => assert!(matches!(e, EcommerceError::InsufficientStock { .. })),
        }
    }
    assert_eq!(store.stock_of(ProductId(1)), Some(40 + returned - taken));
}

#[derive(Clone, Debug)]
enum Op { Take(u32), Put(u32) }

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![(1u32..6).prop_map(Op::Take), (1u32..4).prop_map(Op::Put)]
}

proptest! {
    #[test]
    fn prop_stock_is_conserved(initial in 0u32..20, ops in prop::collection::vec(op(), 0..40)) {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        rt.block_on(async {
            let (ledger, store) = ledger(initial);
            let mut expected = initial;
            for op in ops {
                match op {
                    Op::Take(q) => match ledger.try_decrement(ProductId(1), q).await {
                        Ok(left) => { expected -= q; prop_assert_eq!(left, expected); }
                        Err(EcommerceError::InsufficientStock { available, .. }) => {
                            prop_assert!(available < q);
                            prop_assert_eq!(available, expected);
                        }
                        Err(e) => prop_assert!(false, "unexpected error {}", e),
                    },
                    Op::Put(q) => { expected += q; prop_assert_eq!(ledger.increment(ProductId(1), q).await.unwrap(), expected); }
                }
            }
            prop_assert_eq!(store.stock_of(ProductId(1)), Some(expected));
            Ok(())
        })?;
    }
}
