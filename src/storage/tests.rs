//! Tests for the repository functions.

use super::*;
use crate::domain::{
    Direction, NegotiationRef, NewTransaction, OfferTerms, OrderStatus, OtcStatus, Party, SyncOp,
};
use crate::testing::{
    OrderSeed, date, dec, seed_actuary, seed_portfolio, seed_security, test_storage,
};

fn terms(quantity: i64) -> OfferTerms {
    OfferTerms {
        quantity,
        price_per_unit: dec("150"),
        premium: dec("10"),
        settlement_date: date("2030-06-30"),
    }
}

fn remote(id: &str) -> Party {
    Party::Remote {
        routing_number: 444,
        id: id.to_string(),
    }
}

fn new_trade(buyer: Party, seller: Party, negotiation: Option<NegotiationRef>) -> otc_trades::NewOtcTrade {
    otc_trades::NewOtcTrade {
        portfolio_id: None,
        security_id: None,
        negotiation,
        ticker: "AAPL".to_string(),
        modified_by: buyer.clone(),
        buyer,
        seller,
        terms: terms(5),
    }
}

fn new_contract(trade_id: i64, portfolio_id: Option<i64>, quantity: i64) -> contracts::NewContract {
    contracts::NewContract {
        otc_trade_id: trade_id,
        remote_contract_id: None,
        buyer: Party::Local(1),
        seller: Party::Local(2),
        portfolio_id,
        security_id: None,
        ticker: "AAPL".to_string(),
        quantity,
        strike_price: dec("150"),
        premium: dec("10"),
        settlement_date: date("2030-06-30"),
    }
}

// ==================== Portfolio tests ====================

#[tokio::test]
async fn test_adjust_creates_averages_and_deletes() {
    let (storage, _dir) = test_storage().await;
    let mut conn = storage.acquire().await.unwrap();

    portfolios::adjust(&mut conn, 1, 7, 10, dec("100")).await.unwrap();
    portfolios::adjust(&mut conn, 1, 7, 10, dec("200")).await.unwrap();
    let holding = portfolios::find_for_user(&mut conn, 1, 7).await.unwrap().unwrap();
    assert_eq!(holding.quantity, 20);
    assert_eq!(holding.purchase_price, dec("150"));
    assert_eq!(holding.public_count, 0);

    portfolios::adjust(&mut conn, 1, 7, -20, dec("300")).await.unwrap();
    assert!(portfolios::find_for_user(&mut conn, 1, 7).await.unwrap().is_none());
}

#[tokio::test]
async fn test_adjust_never_goes_negative() {
    let (storage, _dir) = test_storage().await;
    let security_id = seed_security(&storage, "AAPL", dec("100"), None).await;
    seed_portfolio(&storage, 1, security_id, 5, 5).await;
    let mut conn = storage.acquire().await.unwrap();

    let err = portfolios::adjust(&mut conn, 1, security_id, -6, dec("100"))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Constraint(_)));
    let holding = portfolios::find_for_user(&mut conn, 1, security_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(holding.quantity, 5);

    let err = portfolios::adjust(&mut conn, 2, security_id, -1, dec("100"))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::NotFound(_)));
}

#[tokio::test]
async fn test_selling_clamps_public_count() {
    let (storage, _dir) = test_storage().await;
    let security_id = seed_security(&storage, "AAPL", dec("100"), None).await;
    let portfolio_id = seed_portfolio(&storage, 1, security_id, 10, 8).await;
    let mut conn = storage.acquire().await.unwrap();

    portfolios::adjust(&mut conn, 1, security_id, -4, dec("100")).await.unwrap();
    let holding = portfolios::find(&mut conn, portfolio_id).await.unwrap().unwrap();
    assert_eq!(holding.quantity, 6);
    assert_eq!(holding.public_count, 6);

    portfolios::reduce_public(&mut conn, portfolio_id, 10).await.unwrap();
    let holding = portfolios::find(&mut conn, portfolio_id).await.unwrap().unwrap();
    assert_eq!(holding.public_count, 0);

    let by_ticker = portfolios::find_by_ticker(&mut conn, 1, "AAPL").await.unwrap().unwrap();
    assert_eq!(by_ticker.id, portfolio_id);
    assert!(portfolios::find_by_ticker(&mut conn, 1, "MSFT").await.unwrap().is_none());
}

// ==================== Order tests ====================

#[tokio::test]
async fn test_apply_fill_completes_order_at_zero() {
    let (storage, _dir) = test_storage().await;
    let security_id = seed_security(&storage, "AAPL", dec("100"), None).await;
    let id = OrderSeed::market(1, security_id, Direction::Buy, 10).insert(&storage).await;
    let mut conn = storage.acquire().await.unwrap();

    // Untouched orders fill from their full quantity.
    assert_eq!(orders::apply_fill(&mut conn, id, 4).await.unwrap(), 6);
    let order = orders::find(&mut conn, id).await.unwrap().unwrap();
    assert_eq!(order.remaining_parts, Some(6));
    assert!(!order.is_done);

    let err = orders::apply_fill(&mut conn, id, 7).await.unwrap_err();
    assert!(matches!(err, StorageError::Constraint(_)));

    assert_eq!(orders::apply_fill(&mut conn, id, 6).await.unwrap(), 0);
    let order = orders::find(&mut conn, id).await.unwrap().unwrap();
    assert!(order.is_done);
    assert_eq!(order.status, OrderStatus::Done);
}

#[tokio::test]
async fn test_touch_remaining_only_initialises() {
    let (storage, _dir) = test_storage().await;
    let security_id = seed_security(&storage, "AAPL", dec("100"), None).await;
    let id = OrderSeed::market(1, security_id, Direction::Buy, 10)
        .remaining(3)
        .insert(&storage)
        .await;
    let untouched = OrderSeed::market(1, security_id, Direction::Buy, 10).insert(&storage).await;
    let mut conn = storage.acquire().await.unwrap();

    orders::touch_remaining(&mut conn, id).await.unwrap();
    orders::touch_remaining(&mut conn, untouched).await.unwrap();
    assert_eq!(orders::find(&mut conn, id).await.unwrap().unwrap().remaining_parts, Some(3));
    assert_eq!(
        orders::find(&mut conn, untouched).await.unwrap().unwrap().remaining_parts,
        Some(10)
    );
}

#[tokio::test]
async fn test_counter_orders_are_fifo_and_exclude_own() {
    let (storage, _dir) = test_storage().await;
    let security_id = seed_security(&storage, "AAPL", dec("100"), None).await;
    let buy = OrderSeed::market(1, security_id, Direction::Buy, 10).insert(&storage).await;
    let late = OrderSeed::market(2, security_id, Direction::Sell, 5)
        .modified_at(3_000)
        .insert(&storage)
        .await;
    let early = OrderSeed::market(3, security_id, Direction::Sell, 5)
        .modified_at(2_000)
        .insert(&storage)
        .await;
    OrderSeed::market(1, security_id, Direction::Sell, 5).insert(&storage).await;
    OrderSeed::market(4, security_id, Direction::Sell, 5)
        .status("declined")
        .insert(&storage)
        .await;
    let mut conn = storage.acquire().await.unwrap();

    let order = orders::find(&mut conn, buy).await.unwrap().unwrap();
    let ids: Vec<i64> = orders::counter_orders(&mut conn, &order)
        .await
        .unwrap()
        .iter()
        .map(|o| o.id)
        .collect();
    assert_eq!(ids, vec![early, late]);
}

#[tokio::test]
async fn test_lapsed_orders_and_decline() {
    let (storage, _dir) = test_storage().await;
    let lapsed = seed_security(&storage, "OLD", dec("100"), Some(date("2026-01-01"))).await;
    let live = seed_security(&storage, "NEW", dec("100"), Some(date("2026-12-31"))).await;
    let stale = OrderSeed::market(1, lapsed, Direction::Buy, 10).insert(&storage).await;
    OrderSeed::market(1, live, Direction::Buy, 10).insert(&storage).await;
    let mut conn = storage.acquire().await.unwrap();

    let ids = orders::lapsed_open_orders(&mut conn, date("2026-06-01")).await.unwrap();
    assert_eq!(ids, vec![stale]);

    assert!(orders::decline(&mut conn, stale).await.unwrap());
    assert!(!orders::decline(&mut conn, stale).await.unwrap());
    assert!(orders::lapsed_open_orders(&mut conn, date("2026-06-01")).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_refresh_available_volume_sums_open_sells() {
    let (storage, _dir) = test_storage().await;
    let security_id = seed_security(&storage, "AAPL", dec("100"), None).await;
    OrderSeed::market(2, security_id, Direction::Sell, 10).insert(&storage).await;
    OrderSeed::market(3, security_id, Direction::Sell, 10)
        .remaining(4)
        .insert(&storage)
        .await;
    OrderSeed::market(4, security_id, Direction::Sell, 10)
        .status("done")
        .insert(&storage)
        .await;
    OrderSeed::market(1, security_id, Direction::Buy, 50).insert(&storage).await;
    let mut conn = storage.acquire().await.unwrap();

    assert_eq!(securities::refresh_available_volume(&mut conn, security_id).await.unwrap(), 14);
    let security = securities::find(&mut conn, security_id).await.unwrap().unwrap();
    assert_eq!(security.volume, 14);

    let err = securities::refresh_available_volume(&mut conn, 999).await.unwrap_err();
    assert!(matches!(err, StorageError::NotFound(_)));
}

// ==================== Actuary and transaction tests ====================

#[tokio::test]
async fn test_add_used_limit() {
    let (storage, _dir) = test_storage().await;
    seed_actuary(&storage, 1, "agent", dec("1000")).await;
    let mut conn = storage.acquire().await.unwrap();

    assert!(actuaries::add_used_limit(&mut conn, 1, dec("250.5")).await.unwrap());
    assert!(!actuaries::add_used_limit(&mut conn, 2, dec("1")).await.unwrap());

    let actuary = actuaries::find_by_user(&mut conn, 1).await.unwrap().unwrap();
    assert_eq!(actuary.used_limit, dec("250.5"));
    assert_eq!(actuary.available_limit(), dec("749.5"));
    assert!(actuary.is_agent());
}

#[tokio::test]
async fn test_transaction_total_price() {
    let (storage, _dir) = test_storage().await;
    let mut conn = storage.acquire().await.unwrap();

    transactions::insert(
        &mut conn,
        &NewTransaction {
            order_id: Some(9),
            contract_id: None,
            buyer_id: 1,
            seller_id: 2,
            security_id: 3,
            quantity: 4,
            price_per_unit: dec("12.5"),
            fee: dec("7"),
        },
    )
    .await
    .unwrap();

    let records = transactions::for_order(&mut conn, 9).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].total_price, dec("50"));
    assert_eq!(records[0].fee, dec("7"));
    assert!(!records[0].tax_paid);
}

// ==================== OTC trade tests ====================

#[tokio::test]
async fn test_trade_parties_round_trip() {
    let (storage, _dir) = test_storage().await;
    let negotiation = NegotiationRef {
        routing_number: 444,
        id: "neg-1".to_string(),
    };
    let mut conn = storage.acquire().await.unwrap();

    let id = otc_trades::insert(
        &mut conn,
        &new_trade(Party::Local(1), remote("27"), Some(negotiation.clone())),
    )
    .await
    .unwrap();

    let trade = otc_trades::find_by_negotiation(&mut conn, &negotiation)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(trade.id, id);
    assert_eq!(trade.buyer, Party::Local(1));
    assert_eq!(trade.seller, remote("27"));
    assert_eq!(trade.status, OtcStatus::Pending);
    assert_eq!(trade.terms(), terms(5));

    assert_eq!(otc_trades::pending_for_party(&mut conn, &remote("27")).await.unwrap().len(), 1);
    // Same digits, different bank.
    assert!(otc_trades::pending_for_party(&mut conn, &Party::Local(27)).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_trade_updates_are_compare_and_set() {
    let (storage, _dir) = test_storage().await;
    let mut conn = storage.acquire().await.unwrap();
    let id = otc_trades::insert(&mut conn, &new_trade(Party::Local(1), Party::Local(2), None))
        .await
        .unwrap();

    // Stale previous actor.
    assert!(
        !otc_trades::update_terms(&mut conn, id, &terms(3), &Party::Local(2), &Party::Local(2))
            .await
            .unwrap()
    );
    assert!(
        otc_trades::update_terms(&mut conn, id, &terms(3), &Party::Local(2), &Party::Local(1))
            .await
            .unwrap()
    );
    assert!(
        !otc_trades::transition(
            &mut conn,
            id,
            OtcStatus::Pending,
            OtcStatus::Accepted,
            &Party::Local(1),
            Some(&Party::Local(1)),
        )
        .await
        .unwrap()
    );
    assert!(
        otc_trades::transition(
            &mut conn,
            id,
            OtcStatus::Pending,
            OtcStatus::Accepted,
            &Party::Local(1),
            Some(&Party::Local(2)),
        )
        .await
        .unwrap()
    );

    let trade = otc_trades::find(&mut conn, id).await.unwrap().unwrap();
    assert_eq!(trade.status, OtcStatus::Accepted);
    assert_eq!(trade.quantity, 3);
    assert_eq!(trade.modified_by, Party::Local(1));

    // Settlement moves keep the last actor.
    assert!(otc_trades::set_status(&mut conn, id, OtcStatus::Accepted, OtcStatus::Completed).await.unwrap());
    assert!(!otc_trades::set_status(&mut conn, id, OtcStatus::Accepted, OtcStatus::Completed).await.unwrap());
    let trade = otc_trades::find(&mut conn, id).await.unwrap().unwrap();
    assert_eq!(trade.modified_by, Party::Local(1));
}

#[tokio::test]
async fn test_pending_sync_flag() {
    let (storage, _dir) = test_storage().await;
    let mut conn = storage.acquire().await.unwrap();
    let id = otc_trades::insert(&mut conn, &new_trade(Party::Local(1), remote("27"), None))
        .await
        .unwrap();

    otc_trades::set_pending_sync(&mut conn, id, Some(SyncOp::Accept)).await.unwrap();
    let flagged = otc_trades::out_of_sync(&mut conn).await.unwrap();
    assert_eq!(flagged.len(), 1);
    assert_eq!(flagged[0].pending_sync, Some(SyncOp::Accept));

    otc_trades::apply_remote_state(&mut conn, id, &terms(2), OtcStatus::Rejected, &remote("27"))
        .await
        .unwrap();
    otc_trades::set_pending_sync(&mut conn, id, None).await.unwrap();
    assert!(otc_trades::out_of_sync(&mut conn).await.unwrap().is_empty());

    let trade = otc_trades::find(&mut conn, id).await.unwrap().unwrap();
    assert_eq!(trade.quantity, 2);
    assert_eq!(trade.status, OtcStatus::Rejected);
    assert_eq!(trade.modified_by, remote("27"));
}

// ==================== Option contract tests ====================

#[tokio::test]
async fn test_contract_uid_assignment_and_exposure() {
    let (storage, _dir) = test_storage().await;
    let mut conn = storage.acquire().await.unwrap();
    let first = contracts::insert(&mut conn, &new_contract(1, Some(5), 4)).await.unwrap();
    contracts::insert(&mut conn, &new_contract(2, Some(5), 3)).await.unwrap();

    assert_eq!(contracts::open_exposure(&mut conn, 5).await.unwrap(), 7);

    assert!(contracts::assign_uid(&mut conn, first, "OTC-1-a").await.unwrap());
    assert!(!contracts::assign_uid(&mut conn, first, "OTC-1-b").await.unwrap());
    let found = contracts::find_by_uid(&mut conn, "OTC-1-a").await.unwrap().unwrap();
    assert!(found.exercise_in_flight());

    assert!(contracts::mark_exercised(&mut conn, first).await.unwrap());
    assert!(!contracts::mark_exercised(&mut conn, first).await.unwrap());
    assert_eq!(contracts::open_exposure(&mut conn, 5).await.unwrap(), 3);

    // One contract per offer.
    assert!(contracts::insert(&mut conn, &new_contract(1, Some(5), 1)).await.is_err());
}

#[tokio::test]
async fn test_expire_lapsed_skips_exercise_in_flight() {
    let (storage, _dir) = test_storage().await;
    let mut conn = storage.acquire().await.unwrap();
    let idle = contracts::insert(&mut conn, &new_contract(1, None, 1)).await.unwrap();
    let in_flight = contracts::insert(&mut conn, &new_contract(2, None, 1)).await.unwrap();
    contracts::assign_uid(&mut conn, in_flight, "OTC-2-a").await.unwrap();

    assert_eq!(contracts::expire_lapsed(&mut conn, date("2030-06-30")).await.unwrap(), 0);
    assert_eq!(contracts::expire_lapsed(&mut conn, date("2030-07-01")).await.unwrap(), 1);

    let expired = contracts::find(&mut conn, idle).await.unwrap().unwrap();
    assert_eq!(expired.status, crate::domain::ContractStatus::Expired);
    let kept = contracts::find(&mut conn, in_flight).await.unwrap().unwrap();
    assert_eq!(kept.status, crate::domain::ContractStatus::Active);

    contracts::clear_uid(&mut conn, in_flight).await.unwrap();
    assert_eq!(
        contracts::for_party(&mut conn, &Party::Local(2)).await.unwrap().len(),
        2
    );
}
