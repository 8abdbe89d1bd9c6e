//! OTC negotiation and option contracts.
//!
//! Offers alternate between their two parties: whoever changed an offer
//! last may not change it again. The same rule holds for local users and
//! for parties at the partner bank, and it is enforced twice: by the check
//! in front of each operation and by the compare-and-set update that
//! applies it, both under the offer's lock.

mod error;
mod inbound;
mod options;
mod reconcile;
mod requests;

pub use error::{ErrorKind, OtcError, Result};
pub use requests::{CounterOffer, CreateOffer};

use std::sync::Arc;

use sqlx::SqliteConnection;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{
    OfferTerms, OptionContract, OtcStatus, OtcTrade, Party, Portfolio, SyncOp, today,
};
use crate::interbank::{ContractDescriptor, InterbankClient, OfferDto, wire};
use crate::locks::LockRegistry;
use crate::settlement::{Account, AccountDirectory, PremiumTransfer, SettlementEmitter, account_in};
use crate::storage::{
    SqliteStorage, contracts, otc_trades, portfolios, securities,
    contracts::NewContract, otc_trades::NewOtcTrade,
};

/// Bank identity and currency used by the OTC service.
#[derive(Debug, Clone)]
pub struct OtcSettings {
    pub own_routing: u32,
    /// Routing number of the partner bank accepted on inbound calls.
    pub partner_routing: u32,
    pub currency: String,
}

/// OtcService runs the offer state machine and the option contract lifecycle.
pub struct OtcService {
    storage: SqliteStorage,
    settlement: Arc<dyn SettlementEmitter>,
    accounts: Arc<dyn AccountDirectory>,
    interbank: Option<Arc<dyn InterbankClient>>,
    locks: Arc<LockRegistry>,
    settings: OtcSettings,
}

impl OtcService {
    pub fn new(
        storage: SqliteStorage,
        settlement: Arc<dyn SettlementEmitter>,
        accounts: Arc<dyn AccountDirectory>,
        interbank: Option<Arc<dyn InterbankClient>>,
        locks: Arc<LockRegistry>,
        settings: OtcSettings,
    ) -> Self {
        Self {
            storage,
            settlement,
            accounts,
            interbank,
            locks,
            settings,
        }
    }

    /// Creates a pending offer from `requester` as buyer.
    pub async fn create_offer(&self, requester: i64, request: CreateOffer) -> Result<OtcTrade> {
        let terms = request.terms(today())?;
        let buyer = Party::Local(requester);

        let Some(portfolio_id) = request.portfolio_id else {
            return self.create_interbank_offer(buyer, &request, terms).await;
        };

        let mut tx = self.storage.begin().await?;

        let portfolio = portfolios::find(&mut tx, portfolio_id)
            .await?
            .ok_or_else(|| OtcError::NotFound(format!("portfolio {}", portfolio_id)))?;
        if !owner_matches(&request.owner_id, portfolio.user_id, self.settings.own_routing) {
            return Err(OtcError::Validation(format!(
                "portfolio {} does not belong to {}",
                portfolio_id, request.owner_id
            )));
        }
        if portfolio.user_id == requester {
            return Err(OtcError::BusinessRule(
                "cannot make an offer on your own portfolio".into(),
            ));
        }
        if terms.quantity > portfolio.public_count {
            return Err(OtcError::BusinessRule(format!(
                "requested {} units, only {} are publicly offered",
                terms.quantity, portfolio.public_count
            )));
        }

        let security = securities::find(&mut tx, portfolio.security_id)
            .await?
            .ok_or_else(|| OtcError::NotFound(format!("security {}", portfolio.security_id)))?;

        let id = otc_trades::insert(
            &mut tx,
            &NewOtcTrade {
                portfolio_id: Some(portfolio.id),
                security_id: Some(security.id),
                negotiation: None,
                ticker: security.ticker.clone(),
                buyer: buyer.clone(),
                seller: Party::Local(portfolio.user_id),
                terms,
                modified_by: buyer,
            },
        )
        .await?;
        let trade = load_trade(&mut tx, id).await?;
        tx.commit().await?;

        info!(trade_id = id, buyer = requester, seller = portfolio.user_id, ticker = %trade.ticker, "OTC offer created");
        Ok(trade)
    }

    async fn create_interbank_offer(
        &self,
        buyer: Party,
        request: &CreateOffer,
        terms: OfferTerms,
    ) -> Result<OtcTrade> {
        let own = self.settings.own_routing;
        let seller = Party::from_composite(&request.owner_id, own).map_err(OtcError::Validation)?;
        if seller.is_local() {
            return Err(OtcError::Validation(
                "portfolioId is required for offers to local users".into(),
            ));
        }
        let ticker = request
            .ticker
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| OtcError::Validation("ticker is required for interbank offers".into()))?
            .to_string();

        let client = self.interbank()?;
        if seller.routing_number(own) != client.partner_routing_number() {
            return Err(OtcError::Validation(format!(
                "unknown bank {}",
                seller.routing_number(own)
            )));
        }

        let offer = self.offer_dto(&ticker, &terms, &buyer, &seller, &buyer);
        let negotiation = client.create_negotiation(&offer).await?;

        let stored = async {
            let mut tx = self.storage.begin().await?;
            let security_id = securities::find_by_ticker(&mut tx, &ticker)
                .await?
                .map(|s| s.id);
            let id = otc_trades::insert(
                &mut tx,
                &NewOtcTrade {
                    portfolio_id: None,
                    security_id,
                    negotiation: Some(negotiation.clone().into()),
                    ticker: ticker.clone(),
                    buyer: buyer.clone(),
                    seller: seller.clone(),
                    terms,
                    modified_by: buyer.clone(),
                },
            )
            .await?;
            let trade = load_trade(&mut tx, id).await?;
            tx.commit().await?;
            Ok::<OtcTrade, OtcError>(trade)
        }
        .await;

        match stored {
            Ok(trade) => {
                info!(
                    trade_id = trade.id,
                    negotiation_id = %negotiation.id,
                    seller = %seller,
                    ticker = %ticker,
                    "Interbank offer created"
                );
                Ok(trade)
            }
            Err(e) => {
                // The partner already has the negotiation; close it so it does not linger.
                if let Err(close_err) = client.close_negotiation(&negotiation.clone().into()).await {
                    warn!(negotiation_id = %negotiation.id, error = %close_err, "Failed to close orphaned negotiation");
                }
                Err(e)
            }
        }
    }

    /// Replaces the terms of a pending offer.
    pub async fn counter_offer(
        &self,
        requester: i64,
        trade_id: i64,
        request: CounterOffer,
    ) -> Result<OtcTrade> {
        let terms = request.terms(today())?;
        let actor = Party::Local(requester);

        let lock = self.locks.trade(trade_id);
        let _guard = lock.lock().await;

        let trade = {
            let mut conn = self.storage.acquire().await?;
            load_trade(&mut conn, trade_id).await?
        };
        ensure_negotiable(&trade, &actor)?;

        if let Some(negotiation) = &trade.negotiation {
            if let Some(portfolio_id) = local_backing(&trade) {
                let mut conn = self.storage.acquire().await?;
                ensure_public_quantity(&mut conn, portfolio_id, terms.quantity).await?;
            }

            let client = self.interbank()?;
            let offer = self.offer_dto(&trade.ticker, &terms, &trade.buyer, &trade.seller, &actor);
            client.counter_negotiation(negotiation, &offer).await?;

            if let Err(e) = self.store_terms(&trade, &terms, &actor).await {
                self.flag_out_of_sync(trade_id, SyncOp::Counter).await;
                return Err(e);
            }
        } else {
            let portfolio_id = trade
                .portfolio_id
                .ok_or_else(|| OtcError::Conflict("offer has no backing portfolio".into()))?;
            let mut conn = self.storage.acquire().await?;
            ensure_public_quantity(&mut conn, portfolio_id, terms.quantity).await?;
            drop(conn);

            self.store_terms(&trade, &terms, &actor).await?;
        }

        info!(trade_id, actor = %actor, quantity = terms.quantity, price = %terms.price_per_unit, "OTC offer countered");

        let mut conn = self.storage.acquire().await?;
        load_trade(&mut conn, trade_id).await
    }

    async fn store_terms(&self, trade: &OtcTrade, terms: &OfferTerms, actor: &Party) -> Result<()> {
        let mut conn = self.storage.acquire().await?;
        if !otc_trades::update_terms(&mut conn, trade.id, terms, actor, &trade.modified_by).await? {
            return Err(OtcError::Conflict("offer changed concurrently".into()));
        }
        Ok(())
    }

    /// Accepts the current terms and creates the option contract.
    pub async fn accept(&self, requester: i64, trade_id: i64) -> Result<OptionContract> {
        let actor = Party::Local(requester);

        let lock = self.locks.trade(trade_id);
        let _guard = lock.lock().await;

        let trade = {
            let mut conn = self.storage.acquire().await?;
            load_trade(&mut conn, trade_id).await?
        };
        ensure_negotiable(&trade, &actor)?;

        let contract = if trade.is_interbank() {
            self.accept_interbank(&trade, &actor).await?
        } else {
            self.accept_local(&trade, &actor).await?
        };

        info!(
            trade_id,
            contract_id = contract.id,
            actor = %actor,
            quantity = contract.quantity,
            strike = %contract.strike_price,
            "OTC offer accepted"
        );
        Ok(contract)
    }

    async fn accept_local(&self, trade: &OtcTrade, actor: &Party) -> Result<OptionContract> {
        let (Some(buyer_id), Some(seller_id)) = (trade.buyer.local_id(), trade.seller.local_id())
        else {
            return Err(OtcError::Conflict("offer parties are not local".into()));
        };
        let portfolio_id = trade
            .portfolio_id
            .ok_or_else(|| OtcError::Conflict("offer has no backing portfolio".into()))?;

        {
            let mut conn = self.storage.acquire().await?;
            ensure_exposure(&mut conn, portfolio_id, trade.quantity).await?;
        }

        let buyer_account = self.settlement_account(buyer_id, "buyer").await?;
        let seller_account = self.settlement_account(seller_id, "seller").await?;
        if buyer_account.balance < trade.premium {
            return Err(OtcError::BusinessRule(format!(
                "insufficient funds for premium {} {}",
                trade.premium, self.settings.currency
            )));
        }

        let mut tx = self.storage.begin().await?;
        if !otc_trades::transition(
            &mut tx,
            trade.id,
            OtcStatus::Pending,
            OtcStatus::Accepted,
            actor,
            Some(&trade.modified_by),
        )
        .await?
        {
            return Err(OtcError::Conflict("offer changed concurrently".into()));
        }
        let contract_id = contracts::insert(&mut tx, &new_contract(trade, None, trade.terms())).await?;

        let transfer = PremiumTransfer {
            uid: format!("OTC-premium-{}-{}", trade.id, Uuid::new_v4()),
            buyer_account_id: buyer_account.id,
            seller_account_id: seller_account.id,
            amount: trade.premium,
        };
        // Dropping the transaction on failure removes the contract again.
        self.settlement.send_premium(&transfer).await?;

        if let Err(e) = tx.commit().await {
            self.abort_best_effort(&transfer.uid, "offer acceptance not stored").await;
            return Err(e.into());
        }

        info!(trade_id = trade.id, uid = %transfer.uid, premium = %trade.premium, "Premium transfer requested");

        let mut conn = self.storage.acquire().await?;
        load_contract(&mut conn, contract_id).await
    }

    async fn accept_interbank(&self, trade: &OtcTrade, actor: &Party) -> Result<OptionContract> {
        let negotiation = trade
            .negotiation
            .as_ref()
            .ok_or_else(|| OtcError::Conflict("offer has no negotiation".into()))?;

        if let Some(portfolio_id) = local_backing(trade) {
            let mut conn = self.storage.acquire().await?;
            ensure_exposure(&mut conn, portfolio_id, trade.quantity).await?;
        }

        let client = self.interbank()?;
        let descriptor = client.accept_negotiation(negotiation).await?;

        match self.store_acceptance(trade, actor, &descriptor).await {
            Ok(contract) => Ok(contract),
            Err(e) => {
                self.flag_out_of_sync(trade.id, SyncOp::Accept).await;
                Err(e)
            }
        }
    }

    async fn store_acceptance(
        &self,
        trade: &OtcTrade,
        actor: &Party,
        descriptor: &ContractDescriptor,
    ) -> Result<OptionContract> {
        let terms = OfferTerms {
            quantity: descriptor.amount,
            price_per_unit: descriptor.price_per_unit.amount,
            premium: trade.premium,
            settlement_date: wire::parse_settlement_date(&descriptor.settlement_date)
                .unwrap_or(trade.settlement_date),
        };

        let mut tx = self.storage.begin().await?;
        if !otc_trades::transition(
            &mut tx,
            trade.id,
            OtcStatus::Pending,
            OtcStatus::Accepted,
            actor,
            Some(&trade.modified_by),
        )
        .await?
        {
            return Err(OtcError::Conflict("offer changed concurrently".into()));
        }
        let contract_id = contracts::insert(
            &mut tx,
            &new_contract(trade, Some(descriptor.id.id.clone()), terms),
        )
        .await?;
        let contract = load_contract(&mut tx, contract_id).await?;
        tx.commit().await?;

        Ok(contract)
    }

    /// Rejects a pending offer.
    pub async fn reject(&self, requester: i64, trade_id: i64) -> Result<OtcTrade> {
        let actor = Party::Local(requester);

        let lock = self.locks.trade(trade_id);
        let _guard = lock.lock().await;

        let trade = {
            let mut conn = self.storage.acquire().await?;
            load_trade(&mut conn, trade_id).await?
        };
        ensure_negotiable(&trade, &actor)?;

        if let Some(negotiation) = &trade.negotiation {
            self.interbank()?.close_negotiation(negotiation).await?;

            if let Err(e) = self.store_rejection(&trade, &actor).await {
                self.flag_out_of_sync(trade_id, SyncOp::Close).await;
                return Err(e);
            }
        } else {
            self.store_rejection(&trade, &actor).await?;
        }

        info!(trade_id, actor = %actor, "OTC offer rejected");

        let mut conn = self.storage.acquire().await?;
        load_trade(&mut conn, trade_id).await
    }

    async fn store_rejection(&self, trade: &OtcTrade, actor: &Party) -> Result<()> {
        let mut conn = self.storage.acquire().await?;
        if !otc_trades::transition(
            &mut conn,
            trade.id,
            OtcStatus::Pending,
            OtcStatus::Rejected,
            actor,
            Some(&trade.modified_by),
        )
        .await?
        {
            return Err(OtcError::Conflict("offer changed concurrently".into()));
        }
        Ok(())
    }

    /// Returns the pending offers in which `requester` takes part.
    pub async fn list_active_offers(&self, requester: i64) -> Result<Vec<OtcTrade>> {
        let mut conn = self.storage.acquire().await?;
        Ok(otc_trades::pending_for_party(&mut conn, &Party::Local(requester)).await?)
    }

    fn interbank(&self) -> Result<&Arc<dyn InterbankClient>> {
        self.interbank
            .as_ref()
            .ok_or_else(|| OtcError::BusinessRule("interbank trading is disabled".into()))
    }

    fn offer_dto(
        &self,
        ticker: &str,
        terms: &OfferTerms,
        buyer: &Party,
        seller: &Party,
        last_modified_by: &Party,
    ) -> OfferDto {
        OfferDto::new(
            ticker,
            terms,
            buyer,
            seller,
            last_modified_by,
            self.settings.own_routing,
            &self.settings.currency,
        )
    }

    /// Returns the user's account in the settlement currency.
    async fn settlement_account(&self, user_id: i64, role: &str) -> Result<Account> {
        let accounts = self.accounts.accounts_for_user(user_id).await?;
        account_in(&accounts, &self.settings.currency)
            .cloned()
            .ok_or_else(|| {
                OtcError::BusinessRule(format!(
                    "{} has no {} account",
                    role, self.settings.currency
                ))
            })
    }

    async fn abort_best_effort(&self, uid: &str, reason: &str) {
        if let Err(e) = self.settlement.abort_transfer(uid, reason).await {
            warn!(uid = %uid, error = %e, "Failed to abort settlement request");
        }
    }

    /// Records that the partner applied `op` but the local store did not.
    async fn flag_out_of_sync(&self, trade_id: i64, op: SyncOp) {
        let flagged = async {
            let mut conn = self.storage.acquire().await?;
            otc_trades::set_pending_sync(&mut conn, trade_id, Some(op)).await?;
            Ok::<(), OtcError>(())
        }
        .await;

        match flagged {
            Ok(()) => warn!(trade_id, op = %op, "Negotiation out of sync with partner bank"),
            Err(e) => warn!(trade_id, op = %op, error = %e, "Failed to flag negotiation out of sync"),
        }
    }
}

/// Checks the caller may act on a pending offer now.
fn ensure_negotiable(trade: &OtcTrade, actor: &Party) -> Result<()> {
    if !trade.is_participant(actor) {
        return Err(OtcError::Forbidden(format!(
            "not a party to offer {}",
            trade.id
        )));
    }
    if trade.status != OtcStatus::Pending {
        return Err(OtcError::Conflict(format!("offer is {}", trade.status)));
    }
    if !trade.is_turn_of(actor) {
        return Err(OtcError::TurnViolation);
    }
    Ok(())
}

/// Returns the local seller's portfolio backing an offer, if any.
fn local_backing(trade: &OtcTrade) -> Option<i64> {
    trade.portfolio_id.filter(|_| trade.seller.is_local())
}

fn owner_matches(owner_id: &str, user_id: i64, own_routing: u32) -> bool {
    let owner_id = owner_id.trim();
    owner_id == user_id.to_string()
        || Party::from_composite(owner_id, own_routing).is_ok_and(|p| p == Party::Local(user_id))
}

async fn ensure_public_quantity(
    conn: &mut SqliteConnection,
    portfolio_id: i64,
    quantity: i64,
) -> Result<Portfolio> {
    let portfolio = portfolios::find(conn, portfolio_id)
        .await?
        .ok_or_else(|| OtcError::BusinessRule("seller no longer holds the security".into()))?;
    if quantity > portfolio.public_count {
        return Err(OtcError::BusinessRule(format!(
            "requested {} units, only {} are publicly offered",
            quantity, portfolio.public_count
        )));
    }
    Ok(portfolio)
}

/// Checks the seller can cover `quantity` on top of the active contracts
/// already written against the portfolio.
async fn ensure_exposure(
    conn: &mut SqliteConnection,
    portfolio_id: i64,
    quantity: i64,
) -> Result<Portfolio> {
    let portfolio = ensure_public_quantity(conn, portfolio_id, quantity).await?;
    let exposure = contracts::open_exposure(conn, portfolio_id).await?;
    if exposure + quantity > portfolio.public_count {
        return Err(OtcError::BusinessRule(format!(
            "seller has {} units under open contracts, {} publicly offered",
            exposure, portfolio.public_count
        )));
    }
    Ok(portfolio)
}

fn new_contract(trade: &OtcTrade, shared_id: Option<String>, terms: OfferTerms) -> NewContract {
    NewContract {
        otc_trade_id: trade.id,
        remote_contract_id: shared_id,
        buyer: trade.buyer.clone(),
        seller: trade.seller.clone(),
        portfolio_id: local_backing(trade),
        security_id: trade.security_id,
        ticker: trade.ticker.clone(),
        quantity: terms.quantity,
        strike_price: terms.price_per_unit,
        premium: terms.premium,
        settlement_date: terms.settlement_date,
    }
}

async fn load_trade(conn: &mut SqliteConnection, id: i64) -> Result<OtcTrade> {
    otc_trades::find(conn, id)
        .await?
        .ok_or_else(|| OtcError::NotFound(format!("offer {}", id)))
}

async fn load_contract(conn: &mut SqliteConnection, id: i64) -> Result<OptionContract> {
    contracts::find(conn, id)
        .await?
        .ok_or_else(|| OtcError::NotFound(format!("option contract {}", id)))
}
