//! Option contract exercise, settlement acknowledgements and expiry.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{OtcError, OtcService, Result, ensure_public_quantity, load_contract};
use crate::domain::{ContractStatus, NewTransaction, OptionContract, OtcStatus, Party, today};
use crate::settlement::{OtcTransferRequest, SettlementAck};
use crate::storage::{contracts, otc_trades, portfolios, transactions};

const EXERCISE_UID_PREFIX: &str = "OTC-";
const PREMIUM_UID_PREFIX: &str = "OTC-premium-";
const ORDER_UID_PREFIX: &str = "ORDER-";

impl OtcService {
    /// Exercises an option: assigns the settlement uid, completes the
    /// originating offer and requests the strike payment.
    ///
    /// Shares move when the banking service acknowledges the payment.
    pub async fn execute_option(&self, requester: i64, contract_id: i64) -> Result<OptionContract> {
        let contract = {
            let mut conn = self.storage.acquire().await?;
            load_contract(&mut conn, contract_id).await?
        };

        let lock = self.locks.trade(contract.otc_trade_id);
        let _guard = lock.lock().await;

        let contract = {
            let mut conn = self.storage.acquire().await?;
            load_contract(&mut conn, contract_id).await?
        };

        if contract.buyer != Party::Local(requester) {
            return Err(OtcError::Forbidden(format!(
                "only the buyer may exercise contract {}",
                contract_id
            )));
        }
        let (Some(seller_id), Some(portfolio_id)) = (contract.seller.local_id(), contract.portfolio_id)
        else {
            return Err(OtcError::Forbidden(
                "contracts with a partner-bank seller cannot be exercised here".into(),
            ));
        };
        if contract.is_exercised {
            return Err(OtcError::Conflict("contract already exercised".into()));
        }
        if contract.exercise_in_flight() {
            return Err(OtcError::Conflict("exercise already in progress".into()));
        }
        if contract.status == ContractStatus::Expired
            || contract.is_past_settlement(today())
        {
            return Err(OtcError::BusinessRule(format!(
                "contract expired on {}",
                contract.settlement_date
            )));
        }

        let amount = contract.exercise_amount();
        let buyer_account = self.settlement_account(requester, "buyer").await?;
        let seller_account = self.settlement_account(seller_id, "seller").await?;
        if buyer_account.balance < amount {
            return Err(OtcError::BusinessRule(format!(
                "insufficient funds: exercise costs {} {}",
                amount, self.settings.currency
            )));
        }
        {
            let mut conn = self.storage.acquire().await?;
            ensure_public_quantity(&mut conn, portfolio_id, contract.quantity).await?;
        }

        let uid = format!("{}{}-{}", EXERCISE_UID_PREFIX, contract.id, Uuid::new_v4());

        if let Err(e) = self.assign_exercise(&contract, &uid).await {
            // The banking service may already track the uid; tell it to stop waiting.
            self.abort_best_effort(&uid, "exercise not stored").await;
            return Err(e);
        }

        let request = OtcTransferRequest {
            uid: uid.clone(),
            seller_account_id: seller_account.id,
            buyer_account_id: buyer_account.id,
            amount,
        };
        if let Err(e) = self.settlement.request_otc_transfer(&request).await {
            warn!(contract_id, uid = %uid, error = %e, "Exercise transfer refused");
            self.revert_exercise(&contract).await;
            return Err(e.into());
        }

        info!(contract_id, uid = %uid, amount = %amount, "Option exercise requested");

        let mut conn = self.storage.acquire().await?;
        load_contract(&mut conn, contract_id).await
    }

    async fn assign_exercise(&self, contract: &OptionContract, uid: &str) -> Result<()> {
        let mut tx = self.storage.begin().await?;
        if !contracts::assign_uid(&mut tx, contract.id, uid).await? {
            return Err(OtcError::Conflict("exercise already in progress".into()));
        }
        if !otc_trades::set_status(
            &mut tx,
            contract.otc_trade_id,
            OtcStatus::Accepted,
            OtcStatus::Completed,
        )
        .await?
        {
            return Err(OtcError::Conflict("originating offer is not accepted".into()));
        }
        tx.commit().await?;
        Ok(())
    }

    /// Undoes an exercise whose transfer will not happen.
    async fn revert_exercise(&self, contract: &OptionContract) {
        let reverted = async {
            let mut tx = self.storage.begin().await?;
            contracts::clear_uid(&mut tx, contract.id).await?;
            otc_trades::set_status(
                &mut tx,
                contract.otc_trade_id,
                OtcStatus::Completed,
                OtcStatus::Accepted,
            )
            .await?;
            tx.commit().await?;
            Ok::<(), OtcError>(())
        }
        .await;

        if let Err(e) = reverted {
            warn!(contract_id = contract.id, error = %e, "Failed to revert exercise");
        }
    }

    /// Applies a settlement acknowledgement.
    ///
    /// Repeated acknowledgements are harmless: an exercise already marked
    /// settled is not settled again, and an unknown uid is ignored.
    pub async fn acknowledge(&self, ack: &SettlementAck) -> Result<()> {
        let uid = ack.uid.trim();

        if uid.starts_with(ORDER_UID_PREFIX) || uid.starts_with(PREMIUM_UID_PREFIX) {
            if ack.failure {
                warn!(uid = %uid, message = %ack.message, "Settlement failed");
            } else {
                debug!(uid = %uid, "Settlement completed");
            }
            return Ok(());
        }
        if !uid.starts_with(EXERCISE_UID_PREFIX) {
            return Err(OtcError::Validation(format!("unknown settlement uid: {}", uid)));
        }

        let contract = {
            let mut conn = self.storage.acquire().await?;
            contracts::find_by_uid(&mut conn, uid).await?
        };
        let Some(contract) = contract else {
            warn!(uid = %uid, "Acknowledgement for unknown exercise");
            return Ok(());
        };

        let lock = self.locks.trade(contract.otc_trade_id);
        let _guard = lock.lock().await;

        if ack.failure {
            if contract.is_exercised {
                warn!(uid = %uid, "Failure acknowledged for a settled exercise");
                return Ok(());
            }
            let mut tx = self.storage.begin().await?;
            contracts::clear_uid(&mut tx, contract.id).await?;
            otc_trades::set_status(
                &mut tx,
                contract.otc_trade_id,
                OtcStatus::Completed,
                OtcStatus::Accepted,
            )
            .await?;
            tx.commit().await?;

            warn!(contract_id = contract.id, uid = %uid, message = %ack.message, "Option exercise failed");
            return Ok(());
        }

        self.settle_exercise(&contract).await
    }

    /// Moves the shares of an exercised contract from seller to buyer.
    async fn settle_exercise(&self, contract: &OptionContract) -> Result<()> {
        let (Some(buyer_id), Some(seller_id)) = (contract.buyer.local_id(), contract.seller.local_id())
        else {
            return Err(OtcError::Conflict("contract parties are not local".into()));
        };
        let (Some(portfolio_id), Some(security_id)) = (contract.portfolio_id, contract.security_id)
        else {
            return Err(OtcError::Conflict("contract has no backing portfolio".into()));
        };

        let mut tx = self.storage.begin().await?;
        if !contracts::mark_exercised(&mut tx, contract.id).await? {
            debug!(contract_id = contract.id, "Exercise already settled");
            return Ok(());
        }

        portfolios::reduce_public(&mut tx, portfolio_id, contract.quantity).await?;
        portfolios::adjust(
            &mut tx,
            seller_id,
            security_id,
            -contract.quantity,
            contract.strike_price,
        )
        .await?;
        portfolios::adjust(
            &mut tx,
            buyer_id,
            security_id,
            contract.quantity,
            contract.strike_price,
        )
        .await?;
        transactions::insert(
            &mut tx,
            &NewTransaction {
                order_id: None,
                contract_id: Some(contract.id),
                buyer_id,
                seller_id,
                security_id,
                quantity: contract.quantity,
                price_per_unit: contract.strike_price,
                fee: Decimal::ZERO,
            },
        )
        .await?;
        tx.commit().await?;

        info!(
            contract_id = contract.id,
            buyer = buyer_id,
            seller = seller_id,
            quantity = contract.quantity,
            "Option exercise settled"
        );
        Ok(())
    }

    /// Returns the contracts in which `requester` is buyer or seller.
    pub async fn list_option_contracts(&self, requester: i64) -> Result<Vec<OptionContract>> {
        let mut conn = self.storage.acquire().await?;
        Ok(contracts::for_party(&mut conn, &Party::Local(requester)).await?)
    }

    /// Expires active contracts whose settlement date is before `today`.
    pub async fn expire_contracts(&self, today: NaiveDate) -> Result<u64> {
        let mut conn = self.storage.acquire().await?;
        let expired = contracts::expire_lapsed(&mut conn, today).await?;
        if expired > 0 {
            info!(expired, %today, "Option contracts expired");
        }
        Ok(expired)
    }
}
