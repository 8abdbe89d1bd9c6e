//! Fixtures shared by the unit tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use tempfile::TempDir;

use crate::domain::{Direction, NegotiationRef, OrderType};
use crate::interbank::{
    ContractDescriptor, ForeignBankId, InterbankClient, InterbankError, NegotiationDto, OfferDto,
};
use crate::settlement::{
    Account, AccountDirectory, OrderTransferRequest, OtcTransferRequest, PremiumTransfer,
    SettlementEmitter, SettlementError, TaxCollection,
};
use crate::storage::{SqliteStorage, SqliteStorageConfig};

pub const OWN_ROUTING: u32 = 111;
pub const PARTNER_ROUTING: u32 = 444;

/// Opens a fresh database in a temporary directory. Keep the directory alive
/// for as long as the storage is used.
pub async fn test_storage() -> (SqliteStorage, TempDir) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("trading.db");
    let storage = SqliteStorage::new(SqliteStorageConfig {
        path: path.to_string_lossy().to_string(),
        max_connections: 4,
    })
    .await
    .unwrap();
    (storage, dir)
}

pub fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

pub fn dec(s: &str) -> Decimal {
    s.parse().unwrap()
}

pub async fn seed_security(
    storage: &SqliteStorage,
    ticker: &str,
    last_price: Decimal,
    settlement_date: Option<NaiveDate>,
) -> i64 {
    let mut conn = storage.acquire().await.unwrap();
    sqlx::query(
        "INSERT INTO securities (ticker, name, last_price, volume, settlement_date) VALUES (?, ?, ?, 0, ?)",
    )
    .bind(ticker)
    .bind(format!("{} Inc.", ticker))
    .bind(last_price.to_string())
    .bind(settlement_date.map(|d| d.format("%Y-%m-%d").to_string()))
    .execute(&mut *conn)
    .await
    .unwrap()
    .last_insert_rowid()
}

pub async fn seed_listing(storage: &SqliteStorage, security_id: i64, bid: Decimal, ask: Decimal) {
    let mut conn = storage.acquire().await.unwrap();
    sqlx::query("INSERT OR REPLACE INTO listings (security_id, bid, ask, price) VALUES (?, ?, ?, ?)")
        .bind(security_id)
        .bind(bid.to_string())
        .bind(ask.to_string())
        .bind(((bid + ask) / Decimal::TWO).to_string())
        .execute(&mut *conn)
        .await
        .unwrap();
}

pub async fn seed_portfolio(
    storage: &SqliteStorage,
    user_id: i64,
    security_id: i64,
    quantity: i64,
    public_count: i64,
) -> i64 {
    let mut conn = storage.acquire().await.unwrap();
    sqlx::query(
        "INSERT INTO portfolios (user_id, security_id, quantity, public_count, purchase_price) \
         VALUES (?, ?, ?, ?, '100')",
    )
    .bind(user_id)
    .bind(security_id)
    .bind(quantity)
    .bind(public_count)
    .execute(&mut *conn)
    .await
    .unwrap()
    .last_insert_rowid()
}

pub async fn seed_actuary(
    storage: &SqliteStorage,
    user_id: i64,
    department: &str,
    limit_amount: Decimal,
) -> i64 {
    let mut conn = storage.acquire().await.unwrap();
    sqlx::query(
        "INSERT INTO actuaries (user_id, department, limit_amount, used_limit) VALUES (?, ?, ?, '0')",
    )
    .bind(user_id)
    .bind(department)
    .bind(limit_amount.to_string())
    .execute(&mut *conn)
    .await
    .unwrap()
    .last_insert_rowid()
}

/// Builder for order rows. Orders default to approved, untouched and
/// settled through account `user_id * 10`.
#[derive(Debug, Clone)]
pub struct OrderSeed {
    user_id: i64,
    security_id: i64,
    direction: Direction,
    order_type: OrderType,
    quantity: i64,
    remaining: Option<i64>,
    account_id: Option<i64>,
    limit_price: Option<Decimal>,
    stop_price: Option<Decimal>,
    all_or_none: bool,
    margin: bool,
    status: &'static str,
    last_modified: i64,
}

impl OrderSeed {
    pub fn market(user_id: i64, security_id: i64, direction: Direction, quantity: i64) -> Self {
        Self {
            user_id,
            security_id,
            direction,
            order_type: OrderType::Market,
            quantity,
            remaining: None,
            account_id: Some(user_id * 10),
            limit_price: None,
            stop_price: None,
            all_or_none: false,
            margin: false,
            status: "approved",
            last_modified: 1_000,
        }
    }

    pub fn limit(
        user_id: i64,
        security_id: i64,
        direction: Direction,
        quantity: i64,
        limit_price: Decimal,
    ) -> Self {
        Self {
            order_type: OrderType::Limit,
            limit_price: Some(limit_price),
            ..Self::market(user_id, security_id, direction, quantity)
        }
    }

    pub fn remaining(mut self, remaining: i64) -> Self {
        self.remaining = Some(remaining);
        self
    }

    pub fn no_account(mut self) -> Self {
        self.account_id = None;
        self
    }

    pub fn all_or_none(mut self) -> Self {
        self.all_or_none = true;
        self
    }

    pub fn margin(mut self) -> Self {
        self.margin = true;
        self
    }

    pub fn status(mut self, status: &'static str) -> Self {
        self.status = status;
        self
    }

    pub fn modified_at(mut self, last_modified: i64) -> Self {
        self.last_modified = last_modified;
        self
    }

    pub async fn insert(self, storage: &SqliteStorage) -> i64 {
        let mut conn = storage.acquire().await.unwrap();
        sqlx::query(
            r#"
            INSERT INTO orders (
                user_id, account_id, security_id, direction, order_type, quantity, remaining_parts,
                limit_price, stop_price, all_or_none, margin, after_hours, status, is_done, last_modified
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, 0, ?)
            "#,
        )
        .bind(self.user_id)
        .bind(self.account_id)
        .bind(self.security_id)
        .bind(self.direction.to_string())
        .bind(self.order_type.to_string())
        .bind(self.quantity)
        .bind(self.remaining)
        .bind(self.limit_price.map(|p| p.to_string()))
        .bind(self.stop_price.map(|p| p.to_string()))
        .bind(self.all_or_none)
        .bind(self.margin)
        .bind(self.status)
        .bind(self.last_modified)
        .execute(&mut *conn)
        .await
        .unwrap()
        .last_insert_rowid()
    }
}

/// Settlement and account double that records every request.
#[derive(Default)]
pub struct RecordingSettlement {
    pub transfers: Mutex<Vec<OrderTransferRequest>>,
    pub premiums: Mutex<Vec<PremiumTransfer>>,
    pub otc_transfers: Mutex<Vec<OtcTransferRequest>>,
    pub taxes: Mutex<Vec<TaxCollection>>,
    pub aborted: Mutex<Vec<String>>,
    accounts: Mutex<HashMap<i64, Vec<Account>>>,
    /// Transfers are refused once this many have been accepted.
    transfer_budget: Mutex<Option<usize>>,
    refuse_premium: Mutex<bool>,
    refuse_otc: Mutex<bool>,
}

impl RecordingSettlement {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_account(self, user_id: i64, account_id: i64, currency: &str, balance: Decimal) -> Self {
        self.accounts.lock().unwrap().entry(user_id).or_default().push(Account {
            id: account_id,
            currency: currency.to_string(),
            balance,
        });
        self
    }

    pub fn refuse_transfers_after(&self, accepted: usize) {
        *self.transfer_budget.lock().unwrap() = Some(accepted);
    }

    pub fn refuse_premium(&self) {
        *self.refuse_premium.lock().unwrap() = true;
    }

    pub fn refuse_otc(&self) {
        *self.refuse_otc.lock().unwrap() = true;
    }

    pub fn transfer_count(&self) -> usize {
        self.transfers.lock().unwrap().len()
    }
}

#[async_trait]
impl SettlementEmitter for RecordingSettlement {
    async fn request_transfer(&self, request: &OrderTransferRequest) -> Result<(), SettlementError> {
        let mut transfers = self.transfers.lock().unwrap();
        if let Some(budget) = *self.transfer_budget.lock().unwrap() {
            if transfers.len() >= budget {
                return Err(SettlementError::Rejected("transfer refused".to_string()));
            }
        }
        transfers.push(request.clone());
        Ok(())
    }

    async fn send_premium(&self, transfer: &PremiumTransfer) -> Result<(), SettlementError> {
        if *self.refuse_premium.lock().unwrap() {
            return Err(SettlementError::Rejected("premium refused".to_string()));
        }
        self.premiums.lock().unwrap().push(transfer.clone());
        Ok(())
    }

    async fn request_otc_transfer(&self, request: &OtcTransferRequest) -> Result<(), SettlementError> {
        if *self.refuse_otc.lock().unwrap() {
            return Err(SettlementError::Rejected("otc transfer refused".to_string()));
        }
        self.otc_transfers.lock().unwrap().push(request.clone());
        Ok(())
    }

    async fn collect_tax(&self, collection: &TaxCollection) -> Result<(), SettlementError> {
        self.taxes.lock().unwrap().push(collection.clone());
        Ok(())
    }

    async fn abort_transfer(&self, uid: &str, _reason: &str) -> Result<(), SettlementError> {
        self.aborted.lock().unwrap().push(uid.to_string());
        Ok(())
    }
}

#[async_trait]
impl AccountDirectory for RecordingSettlement {
    async fn accounts_for_user(&self, user_id: i64) -> Result<Vec<Account>, SettlementError> {
        Ok(self
            .accounts
            .lock()
            .unwrap()
            .get(&user_id)
            .cloned()
            .unwrap_or_default())
    }
}

/// Failure the fake partner bank answers with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartnerFailure {
    Turn,
    Unavailable,
}

/// In-memory partner bank.
#[derive(Default)]
pub struct FakeInterbank {
    pub calls: Mutex<Vec<String>>,
    pub offers: Mutex<Vec<OfferDto>>,
    failure: Mutex<Option<PartnerFailure>>,
    snapshot: Mutex<Option<NegotiationDto>>,
    contract: Mutex<Option<ContractDescriptor>>,
    next_id: Mutex<u32>,
}

impl FakeInterbank {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_with(&self, failure: Option<PartnerFailure>) {
        *self.failure.lock().unwrap() = failure;
    }

    pub fn set_snapshot(&self, snapshot: NegotiationDto) {
        *self.snapshot.lock().unwrap() = Some(snapshot);
    }

    pub fn set_contract(&self, contract: ContractDescriptor) {
        *self.contract.lock().unwrap() = Some(contract);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) -> Result<(), InterbankError> {
        self.calls.lock().unwrap().push(call);
        match *self.failure.lock().unwrap() {
            Some(PartnerFailure::Turn) => Err(InterbankError::TurnViolation("not your turn".into())),
            Some(PartnerFailure::Unavailable) => Err(InterbankError::Status {
                status: 503,
                message: "partner unavailable".into(),
            }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl InterbankClient for FakeInterbank {
    fn partner_routing_number(&self) -> u32 {
        PARTNER_ROUTING
    }

    async fn create_negotiation(&self, offer: &OfferDto) -> Result<ForeignBankId, InterbankError> {
        self.record("create".to_string())?;
        self.offers.lock().unwrap().push(offer.clone());
        let mut next_id = self.next_id.lock().unwrap();
        *next_id += 1;
        Ok(ForeignBankId {
            routing_number: PARTNER_ROUTING,
            id: format!("neg-{}", *next_id),
        })
    }

    async fn counter_negotiation(
        &self,
        negotiation: &NegotiationRef,
        offer: &OfferDto,
    ) -> Result<(), InterbankError> {
        self.record(format!("counter:{}", negotiation.id))?;
        self.offers.lock().unwrap().push(offer.clone());
        Ok(())
    }

    async fn accept_negotiation(
        &self,
        negotiation: &NegotiationRef,
    ) -> Result<ContractDescriptor, InterbankError> {
        self.record(format!("accept:{}", negotiation.id))?;
        self.contract.lock().unwrap().clone().ok_or(InterbankError::Status {
            status: 500,
            message: "no contract configured".into(),
        })
    }

    async fn close_negotiation(&self, negotiation: &NegotiationRef) -> Result<(), InterbankError> {
        self.record(format!("close:{}", negotiation.id))
    }

    async fn get_negotiation(
        &self,
        negotiation: &NegotiationRef,
    ) -> Result<NegotiationDto, InterbankError> {
        self.record(format!("get:{}", negotiation.id))?;
        self.snapshot.lock().unwrap().clone().ok_or(InterbankError::Status {
            status: 404,
            message: "no such negotiation".into(),
        })
    }
}
