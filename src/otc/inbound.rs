//! Negotiation calls received from the partner bank.
//!
//! The partner acts for its own clients only: every change arriving here is
//! attributed to the remote participant of the negotiation, never to a
//! local user.

use tracing::info;
use uuid::Uuid;

use super::{
    OtcError, OtcService, Result, ensure_exposure, ensure_public_quantity, load_contract,
    load_trade, new_contract,
};
use crate::domain::{NegotiationRef, OtcStatus, OtcTrade, Party, today};
use crate::interbank::{
    ContractDescriptor, ForeignBankId, MonetaryValue, NegotiationDto, OfferDto, PublicStock,
    SellerStock, StockDescription, wire,
};
use crate::storage::{contracts, otc_trades, otc_trades::NewOtcTrade, portfolios};

impl OtcService {
    /// Opens a negotiation started by a partner-bank client on a local holding.
    pub async fn receive_offer(&self, offer: &OfferDto) -> Result<ForeignBankId> {
        let own = self.settings.own_routing;
        let terms = offer.terms().map_err(OtcError::Validation)?;
        if terms.settlement_date < today() {
            return Err(OtcError::Validation(format!(
                "settlement date {} is in the past",
                terms.settlement_date
            )));
        }
        let parties = offer.parties(own).map_err(OtcError::Validation)?;

        if parties.buyer.routing_number(own) != self.settings.partner_routing {
            return Err(OtcError::Validation(format!(
                "buyer must be a client of bank {}",
                self.settings.partner_routing
            )));
        }
        if parties.last_modified_by != parties.buyer {
            return Err(OtcError::Validation("the offer must be made by its buyer".into()));
        }
        let Party::Local(seller_id) = parties.seller else {
            return Err(OtcError::Validation("seller must be a client of this bank".into()));
        };

        let ticker = offer.stock.ticker.trim();
        let mut tx = self.storage.begin().await?;
        let portfolio = portfolios::find_by_ticker(&mut tx, seller_id, ticker)
            .await?
            .ok_or_else(|| {
                OtcError::BusinessRule(format!("seller holds no {} shares", ticker))
            })?;
        if terms.quantity > portfolio.public_count {
            return Err(OtcError::BusinessRule(format!(
                "requested {} units, only {} are publicly offered",
                terms.quantity, portfolio.public_count
            )));
        }

        let negotiation = NegotiationRef {
            routing_number: own,
            id: Uuid::new_v4().to_string(),
        };
        let id = otc_trades::insert(
            &mut tx,
            &NewOtcTrade {
                portfolio_id: Some(portfolio.id),
                security_id: Some(portfolio.security_id),
                negotiation: Some(negotiation.clone()),
                ticker: ticker.to_string(),
                buyer: parties.buyer.clone(),
                seller: parties.seller,
                terms,
                modified_by: parties.last_modified_by,
            },
        )
        .await?;
        tx.commit().await?;

        info!(trade_id = id, negotiation_id = %negotiation.id, buyer = %parties.buyer, ticker = %ticker, "Negotiation received");
        Ok(ForeignBankId::from(&negotiation))
    }

    /// Applies a counter-offer made by the partner bank's client.
    pub async fn receive_counter(&self, negotiation: &NegotiationRef, offer: &OfferDto) -> Result<()> {
        let own = self.settings.own_routing;
        let terms = offer.terms().map_err(OtcError::Validation)?;
        let parties = offer.parties(own).map_err(OtcError::Validation)?;
        let actor = parties.last_modified_by;

        let trade_id = self.find_negotiation(negotiation).await?.id;
        let lock = self.locks.trade(trade_id);
        let _guard = lock.lock().await;

        let mut conn = self.storage.acquire().await?;
        let trade = load_trade(&mut conn, trade_id).await?;

        if actor.is_local() || !trade.is_participant(&actor) {
            return Err(OtcError::Forbidden(format!(
                "{} may not act on negotiation {}",
                actor, negotiation.id
            )));
        }
        if parties.buyer != trade.buyer || parties.seller != trade.seller {
            return Err(OtcError::Validation("negotiation parties cannot change".into()));
        }
        ensure_open_turn(&trade, &actor)?;

        if let Some(portfolio_id) = trade.portfolio_id.filter(|_| trade.seller.is_local()) {
            ensure_public_quantity(&mut conn, portfolio_id, terms.quantity).await?;
        }

        if !otc_trades::update_terms(&mut conn, trade.id, &terms, &actor, &trade.modified_by).await? {
            return Err(OtcError::Conflict("negotiation changed concurrently".into()));
        }

        info!(trade_id, negotiation_id = %negotiation.id, actor = %actor, quantity = terms.quantity, "Counter-offer received");
        Ok(())
    }

    /// Accepts a negotiation on behalf of the partner bank's client and
    /// issues the contract.
    pub async fn receive_accept(&self, negotiation: &NegotiationRef) -> Result<ContractDescriptor> {
        let trade_id = self.find_negotiation(negotiation).await?.id;
        let lock = self.locks.trade(trade_id);
        let _guard = lock.lock().await;

        let trade = {
            let mut conn = self.storage.acquire().await?;
            load_trade(&mut conn, trade_id).await?
        };
        let actor = remote_actor(&trade)?;
        ensure_open_turn(&trade, &actor)?;

        if let Some(portfolio_id) = trade.portfolio_id.filter(|_| trade.seller.is_local()) {
            let mut conn = self.storage.acquire().await?;
            ensure_exposure(&mut conn, portfolio_id, trade.quantity).await?;
        }

        let contract_uid = Uuid::new_v4().to_string();

        let mut tx = self.storage.begin().await?;
        if !otc_trades::transition(
            &mut tx,
            trade.id,
            OtcStatus::Pending,
            OtcStatus::Accepted,
            &actor,
            Some(&trade.modified_by),
        )
        .await?
        {
            return Err(OtcError::Conflict("negotiation changed concurrently".into()));
        }
        let contract_id = contracts::insert(
            &mut tx,
            &new_contract(&trade, Some(contract_uid.clone()), trade.terms()),
        )
        .await?;
        let contract = load_contract(&mut tx, contract_id).await?;
        tx.commit().await?;

        info!(trade_id, contract_id, negotiation_id = %negotiation.id, actor = %actor, "Negotiation accepted by partner");

        Ok(ContractDescriptor {
            id: ForeignBankId {
                routing_number: self.settings.own_routing,
                id: contract_uid,
            },
            stock: StockDescription {
                ticker: contract.ticker,
            },
            price_per_unit: MonetaryValue::new(&self.settings.currency, contract.strike_price),
            settlement_date: wire::settlement_timestamp(contract.settlement_date),
            amount: contract.quantity,
            negotiation_id: Some(ForeignBankId::from(negotiation)),
        })
    }

    /// Closes a negotiation at the partner's request.
    pub async fn receive_close(&self, negotiation: &NegotiationRef) -> Result<()> {
        let trade_id = self.find_negotiation(negotiation).await?.id;
        let lock = self.locks.trade(trade_id);
        let _guard = lock.lock().await;

        let mut conn = self.storage.acquire().await?;
        let trade = load_trade(&mut conn, trade_id).await?;

        match trade.status {
            OtcStatus::Rejected => return Ok(()),
            OtcStatus::Accepted | OtcStatus::Completed => {
                return Err(OtcError::Conflict(format!("negotiation is {}", trade.status)));
            }
            OtcStatus::Pending => {}
        }

        let actor = remote_actor(&trade)?;
        if !trade.is_turn_of(&actor) {
            return Err(OtcError::TurnViolation);
        }
        if !otc_trades::transition(
            &mut conn,
            trade.id,
            OtcStatus::Pending,
            OtcStatus::Rejected,
            &actor,
            Some(&trade.modified_by),
        )
        .await?
        {
            return Err(OtcError::Conflict("negotiation changed concurrently".into()));
        }

        info!(trade_id, negotiation_id = %negotiation.id, "Negotiation closed by partner");
        Ok(())
    }

    /// Returns the current state of a negotiation.
    pub async fn negotiation_snapshot(&self, negotiation: &NegotiationRef) -> Result<NegotiationDto> {
        let trade = self.find_negotiation(negotiation).await?;
        Ok(NegotiationDto::from_trade(
            &trade,
            self.settings.own_routing,
            &self.settings.currency,
        ))
    }

    /// Lists publicly offered holdings grouped by ticker.
    pub async fn public_stocks(&self) -> Result<Vec<PublicStock>> {
        let holdings = {
            let mut conn = self.storage.acquire().await?;
            portfolios::public_holdings(&mut conn).await?
        };

        let mut stocks: Vec<PublicStock> = Vec::new();
        for holding in holdings {
            let seller = SellerStock {
                seller: ForeignBankId::from_party(
                    &Party::Local(holding.user_id),
                    self.settings.own_routing,
                ),
                amount: holding.public_count,
            };
            match stocks.last_mut() {
                Some(stock) if stock.stock.ticker == holding.ticker => stock.sellers.push(seller),
                _ => stocks.push(PublicStock {
                    stock: StockDescription {
                        ticker: holding.ticker,
                    },
                    sellers: vec![seller],
                }),
            }
        }
        Ok(stocks)
    }

    async fn find_negotiation(&self, negotiation: &NegotiationRef) -> Result<OtcTrade> {
        let mut conn = self.storage.acquire().await?;
        otc_trades::find_by_negotiation(&mut conn, negotiation)
            .await?
            .ok_or_else(|| OtcError::NotFound(format!("negotiation {}", negotiation.id)))
    }
}

/// Returns the partner-bank participant on whose behalf inbound calls act.
fn remote_actor(trade: &OtcTrade) -> Result<Party> {
    trade
        .remote_party()
        .cloned()
        .ok_or_else(|| OtcError::Conflict("negotiation has no partner-bank participant".into()))
}

fn ensure_open_turn(trade: &OtcTrade, actor: &Party) -> Result<()> {
    if trade.status != OtcStatus::Pending {
        return Err(OtcError::Conflict(format!("negotiation is {}", trade.status)));
    }
    if !trade.is_turn_of(actor) {
        return Err(OtcError::TurnViolation);
    }
    Ok(())
}
