//! Repair of negotiations whose remote change was not stored locally.

use tracing::{info, warn};

use super::{OtcError, OtcService, Result, load_trade, new_contract};
use crate::domain::{OtcStatus, OtcTrade, Party, SyncOp};
use crate::interbank::NegotiationDto;
use crate::storage::{contracts, otc_trades};

impl OtcService {
    /// Brings one flagged trade in line with the partner bank's view.
    ///
    /// Returns false when the trade carries no flag. Safe to repeat.
    pub async fn reconcile(&self, trade_id: i64) -> Result<bool> {
        let lock = self.locks.trade(trade_id);
        let _guard = lock.lock().await;

        let trade = {
            let mut conn = self.storage.acquire().await?;
            load_trade(&mut conn, trade_id).await?
        };
        let Some(op) = trade.pending_sync else {
            return Ok(false);
        };
        let Some(negotiation) = &trade.negotiation else {
            let mut conn = self.storage.acquire().await?;
            otc_trades::set_pending_sync(&mut conn, trade_id, None).await?;
            return Ok(false);
        };

        let snapshot = self.interbank()?.get_negotiation(negotiation).await?;

        let mut tx = self.storage.begin().await?;
        match op {
            SyncOp::Counter => {
                let terms = snapshot.offer.terms().map_err(OtcError::Validation)?;
                let parties = snapshot
                    .offer
                    .parties(self.settings.own_routing)
                    .map_err(OtcError::Validation)?;
                otc_trades::apply_remote_state(
                    &mut tx,
                    trade_id,
                    &terms,
                    trade.status,
                    &parties.last_modified_by,
                )
                .await?;
            }
            SyncOp::Close => {
                otc_trades::transition(
                    &mut tx,
                    trade_id,
                    OtcStatus::Pending,
                    OtcStatus::Rejected,
                    local_participant(&trade),
                    None,
                )
                .await?;
            }
            SyncOp::Accept => {
                if !snapshot.is_ongoing {
                    self.mirror_acceptance(&mut tx, &trade, &snapshot).await?;
                }
            }
        }
        otc_trades::set_pending_sync(&mut tx, trade_id, None).await?;
        tx.commit().await?;

        info!(trade_id, op = %op, negotiation_id = %negotiation.id, "Negotiation reconciled");
        Ok(true)
    }

    async fn mirror_acceptance(
        &self,
        conn: &mut sqlx::SqliteConnection,
        trade: &OtcTrade,
        snapshot: &NegotiationDto,
    ) -> Result<()> {
        otc_trades::transition(
            &mut *conn,
            trade.id,
            OtcStatus::Pending,
            OtcStatus::Accepted,
            local_participant(trade),
            None,
        )
        .await?;

        if contracts::find_by_trade(&mut *conn, trade.id).await?.is_none() {
            let terms = snapshot.offer.terms().map_err(OtcError::Validation)?;
            contracts::insert(&mut *conn, &new_contract(trade, None, terms)).await?;
        }
        Ok(())
    }

    /// Reconciles every flagged trade. Returns how many were repaired.
    pub async fn reconcile_pending(&self) -> Result<usize> {
        let flagged = {
            let mut conn = self.storage.acquire().await?;
            otc_trades::out_of_sync(&mut conn).await?
        };

        let mut repaired = 0;
        for trade in flagged {
            match self.reconcile(trade.id).await {
                Ok(true) => repaired += 1,
                Ok(false) => {}
                Err(e) => warn!(trade_id = trade.id, error = %e, "Reconciliation failed"),
            }
        }
        Ok(repaired)
    }
}

/// The participant held at this bank; local users are the only ones whose
/// changes can be left unstored.
fn local_participant(trade: &OtcTrade) -> &Party {
    if trade.buyer.is_local() {
        &trade.buyer
    } else {
        &trade.seller
    }
}
