//! PaymentLedger - The only writer of payment state.
//!
//! Every write runs inside one [`LedgerTransaction`]: the idempotency lookup,
//! the payment write, the invoice paid-status recomputation and the audit
//! entry commit together or not at all.
//!
//! # Idempotency
//!
//! - A second initiation with the same key returns the existing row
//! - A callback for a terminal payment is absorbed as a no-op
//! - A timed-out payment is never overwritten by a late callback

use std::sync::Arc;

use serde_json::{json, Value as JsonValue};

use crate::domain::billing::{BillingError, PaymentGateway};
use crate::domain::foundation::{AuditEntry, CompanyId, ErrorCode, InvoiceId, Money, Timestamp};
use crate::domain::invoice::InvoiceStatus;
use crate::domain::payment::{Payable, Payment, PaymentResult, PaymentStatus};
use crate::ports::{LedgerTransaction, PaymentRepository};

/// Command to open a payment before the gateway is called.
#[derive(Debug, Clone)]
pub struct RecordInitiationCommand {
    pub company_id: CompanyId,
    pub payable: Payable,
    pub amount: Money,
    pub gateway: PaymentGateway,
    pub idempotency_key: String,
}

/// Result of [`PaymentLedger::record_initiation`].
#[derive(Debug, Clone)]
pub struct InitiationRecord {
    pub payment: Payment,
    /// False when the key already had a row; the caller must not charge again.
    pub created: bool,
}

/// Command to apply a normalized gateway outcome.
#[derive(Debug, Clone)]
pub struct RecordPaymentCommand {
    pub idempotency_key: String,
    pub gateway: PaymentGateway,

    /// Attribution, needed only when no payment exists yet.
    pub company_id: Option<CompanyId>,
    pub payable: Option<Payable>,
    pub amount: Option<Money>,

    pub result: PaymentResult,
}

impl RecordPaymentCommand {
    /// Builds the command from a callback outcome. Without a key in the
    /// callback the key is derived from the gateway reference, so replays
    /// of the same callback collapse onto one row.
    pub fn from_result(gateway: PaymentGateway, result: PaymentResult) -> Self {
        let idempotency_key = result
            .idempotency_key
            .clone()
            .unwrap_or_else(|| callback_idempotency_key(gateway, &result.gateway_reference));
        Self {
            idempotency_key,
            gateway,
            company_id: result.company_id,
            payable: result.payable,
            amount: result.amount.clone(),
            result,
        }
    }

    pub fn with_attribution(mut self, company_id: CompanyId, payable: Payable) -> Self {
        self.company_id = Some(company_id);
        self.payable = Some(payable);
        self
    }

    fn attribution(&self) -> Result<(CompanyId, Payable, Money), BillingError> {
        match (self.company_id, self.payable, self.amount.clone()) {
            (Some(company_id), Some(payable), Some(amount)) => Ok((company_id, payable, amount)),
            _ => Err(BillingError::not_found(
                "Payment",
                format!(
                    "{} reference {}",
                    self.gateway, self.result.gateway_reference
                ),
            )),
        }
    }
}

/// Key for a payment first seen through a callback.
pub fn callback_idempotency_key(gateway: PaymentGateway, reference: &str) -> String {
    format!("{}:{}", gateway, reference)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerDisposition {
    /// An INITIATED payment moved to its terminal status.
    Settled,
    /// No payment existed; a terminal one was created from the callback.
    Created,
    /// The payment was already terminal. Nothing was written.
    AlreadyTerminal,
}

#[derive(Debug, Clone)]
pub struct LedgerOutcome {
    pub payment: Payment,
    pub disposition: LedgerDisposition,
    /// True when this write brought the invoice to PAID.
    pub invoice_paid: bool,
}

impl LedgerOutcome {
    pub fn is_duplicate(&self) -> bool {
        self.disposition == LedgerDisposition::AlreadyTerminal
    }
}

pub struct PaymentLedger {
    payments: Arc<dyn PaymentRepository>,
}

impl PaymentLedger {
    pub fn new(payments: Arc<dyn PaymentRepository>) -> Self {
        Self { payments }
    }

    /// Creates the INITIATED row for an outgoing charge.
    pub async fn record_initiation(
        &self,
        cmd: RecordInitiationCommand,
        now: Timestamp,
    ) -> Result<InitiationRecord, BillingError> {
        let mut tx = self.payments.begin().await?;

        if let Some(payment) = tx.payment_by_idempotency_key(&cmd.idempotency_key).await? {
            tracing::debug!(
                idempotency_key = %cmd.idempotency_key,
                status = %payment.status,
                "Initiation already recorded"
            );
            return Ok(InitiationRecord {
                payment,
                created: false,
            });
        }

        let payment = Payment::initiated(
            cmd.company_id,
            cmd.payable,
            cmd.amount,
            cmd.gateway,
            cmd.idempotency_key,
            now,
        );
        match tx.insert_payment(&payment).await {
            Ok(()) => {}
            Err(e) if e.code == ErrorCode::DuplicateIdempotencyKey => {
                drop(tx);
                let payment = self
                    .payments
                    .find_by_idempotency_key(&payment.idempotency_key)
                    .await?
                    .ok_or_else(|| BillingError::conflict(e.message))?;
                return Ok(InitiationRecord {
                    payment,
                    created: false,
                });
            }
            Err(e) => return Err(e.into()),
        }
        tx.append_audit(&payment_audit("payment.initiated", &payment, now))
            .await?;
        tx.commit().await?;

        tracing::info!(
            payment_id = %payment.id,
            company_id = %payment.company_id,
            idempotency_key = %payment.idempotency_key,
            gateway = %payment.gateway,
            payable = %payment.payable,
            "Payment initiated"
        );
        Ok(InitiationRecord {
            payment,
            created: true,
        })
    }

    /// Stores the gateway's transaction id on an open payment. A payment the
    /// callback already settled is returned unchanged.
    pub async fn attach_gateway_reference(
        &self,
        idempotency_key: &str,
        transaction_id: &str,
        metadata: &JsonValue,
        now: Timestamp,
    ) -> Result<Payment, BillingError> {
        let mut tx = self.payments.begin().await?;
        let mut payment = tx
            .payment_by_idempotency_key(idempotency_key)
            .await?
            .ok_or_else(|| BillingError::not_found("Payment", idempotency_key))?;

        match payment.attach_gateway_reference(transaction_id, metadata, now) {
            Ok(()) => {}
            Err(BillingError::IdempotencyConflict { .. }) => return Ok(payment),
            Err(e) => return Err(e),
        }
        tx.update_payment(&payment).await?;
        tx.append_audit(
            &payment_audit("payment.gateway_reference_attached", &payment, now)
                .with_metadata(json!({ "gateway_transaction_id": transaction_id })),
        )
        .await?;
        tx.commit().await?;
        Ok(payment)
    }

    /// Marks a payment whose gateway request never went through.
    pub async fn fail_initiation(
        &self,
        idempotency_key: &str,
        reason: &str,
        now: Timestamp,
    ) -> Result<Payment, BillingError> {
        let mut tx = self.payments.begin().await?;
        let mut payment = tx
            .payment_by_idempotency_key(idempotency_key)
            .await?
            .ok_or_else(|| BillingError::not_found("Payment", idempotency_key))?;

        match payment.fail_initiation(reason, now) {
            Ok(()) => {}
            Err(BillingError::IdempotencyConflict { .. }) => return Ok(payment),
            Err(e) => return Err(e),
        }
        tx.update_payment(&payment).await?;
        tx.append_audit(
            &payment_audit("payment.initiation_failed", &payment, now)
                .with_metadata(json!({ "reason": reason })),
        )
        .await?;
        tx.commit().await?;

        tracing::warn!(
            payment_id = %payment.id,
            idempotency_key = %idempotency_key,
            reason = %reason,
            "Payment initiation failed"
        );
        Ok(payment)
    }

    /// Applies a gateway outcome.
    ///
    /// Finds the payment by idempotency key, then by gateway transaction id.
    /// An INITIATED payment settles; a terminal one is left alone; a missing
    /// one is created terminal from the command's attribution. A successful
    /// invoice payment re-sums the invoice inside the same transaction.
    pub async fn record_or_update(
        &self,
        cmd: RecordPaymentCommand,
        now: Timestamp,
    ) -> Result<LedgerOutcome, BillingError> {
        // A concurrent delivery may insert the same key between our lookup and
        // our insert. The second pass then finds that row.
        for _ in 0..2 {
            if let Some(outcome) = self.try_record(&cmd, now).await? {
                return Ok(outcome);
            }
            tracing::debug!(
                idempotency_key = %cmd.idempotency_key,
                "Lost insert race, retrying lookup"
            );
        }
        Err(BillingError::conflict(format!(
            "payment {} is being written concurrently",
            cmd.idempotency_key
        )))
    }

    async fn try_record(
        &self,
        cmd: &RecordPaymentCommand,
        now: Timestamp,
    ) -> Result<Option<LedgerOutcome>, BillingError> {
        let mut tx = self.payments.begin().await?;

        // 1. Locate the payment
        let existing = match tx.payment_by_idempotency_key(&cmd.idempotency_key).await? {
            Some(payment) => Some(payment),
            None => {
                tx.payment_by_gateway_transaction_id(cmd.gateway, &cmd.result.gateway_reference)
                    .await?
            }
        };

        // 2. Settle, create, or absorb
        let (payment, disposition) = match existing {
            Some(mut payment) => match payment.settle(&cmd.result, now) {
                Ok(()) => {
                    if let Some(amount) = &cmd.amount {
                        if *amount != payment.amount {
                            tracing::warn!(
                                payment_id = %payment.id,
                                expected = %payment.amount,
                                reported = %amount,
                                "Gateway reported a different amount"
                            );
                        }
                    }
                    tx.update_payment(&payment).await?;
                    (payment, LedgerDisposition::Settled)
                }
                Err(BillingError::IdempotencyConflict { .. }) => {
                    tracing::info!(
                        payment_id = %payment.id,
                        idempotency_key = %payment.idempotency_key,
                        status = %payment.status,
                        "Duplicate callback for terminal payment ignored"
                    );
                    return Ok(Some(LedgerOutcome {
                        payment,
                        disposition: LedgerDisposition::AlreadyTerminal,
                        invoice_paid: false,
                    }));
                }
                Err(e) => return Err(e),
            },
            None => {
                let (company_id, payable, amount) = cmd.attribution()?;
                let payment = Payment::from_confirmation(
                    company_id,
                    payable,
                    amount,
                    cmd.gateway,
                    cmd.idempotency_key.clone(),
                    &cmd.result,
                    now,
                )?;
                match tx.insert_payment(&payment).await {
                    Ok(()) => {}
                    Err(e) if e.code == ErrorCode::DuplicateIdempotencyKey => return Ok(None),
                    Err(e) => return Err(e.into()),
                }
                (payment, LedgerDisposition::Created)
            }
        };

        // 3. Recompute the invoice
        let mut invoice_paid = false;
        if payment.status == PaymentStatus::Success {
            if let Payable::Invoice(invoice_id) = payment.payable {
                invoice_paid =
                    settle_invoice(&mut *tx, payment.company_id, invoice_id, now).await?;
            }
        }

        // 4. Audit and commit
        tx.append_audit(&payment_audit("payment.recorded", &payment, now))
            .await?;
        tx.commit().await?;

        tracing::info!(
            payment_id = %payment.id,
            company_id = %payment.company_id,
            idempotency_key = %payment.idempotency_key,
            gateway = %payment.gateway,
            status = %payment.status,
            invoice_paid,
            "Payment recorded"
        );
        Ok(Some(LedgerOutcome {
            payment,
            disposition,
            invoice_paid,
        }))
    }

    /// INITIATED to TIMEOUT for one payment. `None` when the payment is
    /// missing or already terminal.
    pub async fn time_out(
        &self,
        idempotency_key: &str,
        now: Timestamp,
    ) -> Result<Option<Payment>, BillingError> {
        let mut tx = self.payments.begin().await?;
        let Some(mut payment) = tx.payment_by_idempotency_key(idempotency_key).await? else {
            return Ok(None);
        };
        match payment.time_out(now) {
            Ok(()) => {}
            Err(BillingError::IdempotencyConflict { .. }) => return Ok(None),
            Err(e) => return Err(e),
        }
        tx.update_payment(&payment).await?;
        tx.append_audit(&payment_audit("payment.timed_out", &payment, now))
            .await?;
        tx.commit().await?;
        Ok(Some(payment))
    }

    /// Times out every INITIATED payment created before `cutoff`. Each payment
    /// is its own unit; one failure does not stop the rest.
    pub async fn sweep_timed_out(
        &self,
        cutoff: Timestamp,
        now: Timestamp,
    ) -> Result<Vec<Payment>, BillingError> {
        let stale = self.payments.find_stale_initiated(cutoff).await?;
        let mut timed_out = Vec::with_capacity(stale.len());
        for payment in stale {
            match self.time_out(&payment.idempotency_key, now).await {
                Ok(Some(payment)) => {
                    tracing::info!(
                        payment_id = %payment.id,
                        idempotency_key = %payment.idempotency_key,
                        "Payment timed out"
                    );
                    timed_out.push(payment);
                }
                Ok(None) => {}
                Err(e) => tracing::error!(
                    payment_id = %payment.id,
                    error = %e,
                    "Failed to time out payment"
                ),
            }
        }
        Ok(timed_out)
    }

    pub async fn payments_for(
        &self,
        company_id: CompanyId,
        payable: Payable,
    ) -> Result<Vec<Payment>, BillingError> {
        Ok(self.payments.list_for_payable(company_id, payable).await?)
    }
}

/// Marks the invoice PAID once successful payments cover the snapshot total.
async fn settle_invoice(
    tx: &mut dyn LedgerTransaction,
    company_id: CompanyId,
    invoice_id: InvoiceId,
    now: Timestamp,
) -> Result<bool, BillingError> {
    let Some(invoice) = tx.invoice_for_update(company_id, invoice_id).await? else {
        tracing::warn!(invoice_id = %invoice_id, "Payment recorded for unknown invoice");
        return Ok(false);
    };
    if invoice.status != InvoiceStatus::Finalized {
        return Ok(false);
    }
    let Some(snapshot) = tx.invoice_snapshot(company_id, invoice_id).await? else {
        tracing::warn!(invoice_id = %invoice_id, "Finalized invoice has no snapshot");
        return Ok(false);
    };

    let paid_minor = tx.successful_total_for_invoice(company_id, invoice_id).await?;
    let due_minor = snapshot.grand_total().amount_minor();
    if paid_minor < due_minor {
        return Ok(false);
    }

    tx.mark_invoice_paid(company_id, invoice_id, now).await?;
    tx.append_audit(
        &AuditEntry::system("invoice.paid", "invoice", invoice_id, company_id)
            .with_metadata(json!({
                "paid_minor": paid_minor,
                "grand_total_minor": due_minor,
            }))
            .at(now),
    )
    .await?;
    Ok(true)
}

fn payment_audit(action: &str, payment: &Payment, now: Timestamp) -> AuditEntry {
    AuditEntry::system(action, "payment", payment.id, payment.company_id)
        .with_metadata(json!({
            "idempotency_key": payment.idempotency_key,
            "gateway": payment.gateway,
            "status": payment.status,
            "payable_type": payment.payable.payable_type(),
            "payable_id": payment.payable.payable_id(),
            "amount_minor": payment.amount.amount_minor(),
            "currency": payment.amount.currency().as_str(),
            "gateway_transaction_id": payment.gateway_transaction_id,
        }))
        .at(now)
}
