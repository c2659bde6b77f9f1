//! PayInvoiceHandler - Requests payment of an invoice's outstanding balance.
//!
//! The balance is the snapshot grand total minus successful payments, so a
//! partially paid invoice is charged only for what is left. The caller picks
//! the attempt reference; resubmitting the same reference never charges twice.

use std::sync::Arc;

use crate::domain::billing::{BillingError, PaymentGateway};
use crate::domain::foundation::{CompanyId, InvoiceId, Money, PaymentId, Timestamp};
use crate::domain::invoice::InvoiceStatus;
use crate::domain::payment::{Payable, PaymentStatus};
use crate::ports::{InvoiceRepository, PayerContact, PaymentContext};

use super::{GatewayRegistry, PaymentLedger, RecordInitiationCommand};

#[derive(Debug, Clone)]
pub struct PayInvoiceCommand {
    pub company_id: CompanyId,
    pub invoice_id: InvoiceId,
    pub gateway: PaymentGateway,
    /// Caller-chosen reference for this attempt, e.g. a checkout session id.
    pub attempt_reference: String,
    pub contact: PayerContact,
}

#[derive(Debug, Clone)]
pub struct PayInvoiceResult {
    pub payment_id: PaymentId,
    pub amount: Money,
    pub transaction_id: Option<String>,
    pub client_secret: Option<String>,
    /// True when this attempt reference had already been submitted.
    pub existing: bool,
}

/// Idempotency key for one attempt at paying an invoice.
pub fn invoice_payment_key(invoice_id: InvoiceId, attempt_reference: &str) -> String {
    format!("invoice:{}:{}", invoice_id, attempt_reference)
}

pub struct PayInvoiceHandler {
    invoices: Arc<dyn InvoiceRepository>,
    gateways: GatewayRegistry,
    ledger: Arc<PaymentLedger>,
}

impl PayInvoiceHandler {
    pub fn new(
        invoices: Arc<dyn InvoiceRepository>,
        gateways: GatewayRegistry,
        ledger: Arc<PaymentLedger>,
    ) -> Self {
        Self {
            invoices,
            gateways,
            ledger,
        }
    }

    pub async fn handle(
        &self,
        cmd: PayInvoiceCommand,
        now: Timestamp,
    ) -> Result<PayInvoiceResult, BillingError> {
        if cmd.attempt_reference.trim().is_empty() {
            return Err(BillingError::validation(
                "attempt_reference",
                "attempt reference is required",
            ));
        }
        let key = invoice_payment_key(cmd.invoice_id, cmd.attempt_reference.trim());
        let payable = Payable::Invoice(cmd.invoice_id);

        // 1. Replayed attempt: hand back what we already have
        let payments = self.ledger.payments_for(cmd.company_id, payable).await?;
        if let Some(existing) = payments.iter().find(|p| p.idempotency_key == key) {
            return Ok(PayInvoiceResult {
                payment_id: existing.id,
                amount: existing.amount.clone(),
                transaction_id: existing.gateway_transaction_id.clone(),
                client_secret: None,
                existing: true,
            });
        }

        // 2. Only finalized invoices take payments
        let invoice = self
            .invoices
            .find_by_id(cmd.company_id, cmd.invoice_id)
            .await?
            .ok_or_else(|| BillingError::not_found("Invoice", cmd.invoice_id))?;
        match invoice.status {
            InvoiceStatus::Finalized => {}
            InvoiceStatus::Draft => {
                return Err(BillingError::precondition(format!(
                    "invoice {} must be finalized before payment",
                    invoice.number
                )))
            }
            InvoiceStatus::Paid => {
                return Err(BillingError::precondition(format!(
                    "invoice {} is already paid",
                    invoice.number
                )))
            }
        }
        let snapshot = self
            .invoices
            .find_snapshot(cmd.company_id, cmd.invoice_id)
            .await?
            .ok_or_else(|| {
                BillingError::infrastructure(format!(
                    "finalized invoice {} has no snapshot",
                    invoice.id
                ))
            })?;

        // 3. Outstanding balance
        let mut outstanding = snapshot.grand_total().clone();
        for paid in payments.iter().filter(|p| p.status == PaymentStatus::Success) {
            outstanding = outstanding.checked_sub(&paid.amount)?;
        }
        if !outstanding.is_positive() {
            return Err(BillingError::precondition(format!(
                "invoice {} has no outstanding balance",
                invoice.number
            )));
        }

        // 4. Open the payment, then call out
        let adapter = self.gateways.get(cmd.gateway)?;
        let record = self
            .ledger
            .record_initiation(
                RecordInitiationCommand {
                    company_id: cmd.company_id,
                    payable,
                    amount: outstanding.clone(),
                    gateway: cmd.gateway,
                    idempotency_key: key.clone(),
                },
                now,
            )
            .await?;
        if !record.created {
            // Lost a race with an identical submission
            return Ok(PayInvoiceResult {
                payment_id: record.payment.id,
                amount: record.payment.amount,
                transaction_id: record.payment.gateway_transaction_id,
                client_secret: None,
                existing: true,
            });
        }

        let context = PaymentContext {
            company_id: cmd.company_id,
            payable,
            amount: outstanding.clone(),
            reference: invoice.number.clone(),
            description: format!("Invoice {}", invoice.number),
            idempotency_key: key.clone(),
            contact: cmd.contact,
        };
        let response = match adapter.initiate_payment(&context).await {
            Ok(response) => response,
            Err(e) => {
                let err = e.into_billing(cmd.gateway);
                self.ledger
                    .fail_initiation(&key, &err.to_string(), now)
                    .await?;
                return Err(err);
            }
        };
        self.ledger
            .attach_gateway_reference(&key, &response.transaction_id, &response.metadata, now)
            .await?;

        tracing::info!(
            invoice_id = %invoice.id,
            company_id = %cmd.company_id,
            gateway = %cmd.gateway,
            idempotency_key = %key,
            amount_minor = outstanding.amount_minor(),
            "Invoice payment requested"
        );

        Ok(PayInvoiceResult {
            payment_id: record.payment.id,
            amount: outstanding,
            transaction_id: Some(response.transaction_id),
            client_secret: response.client_secret,
            existing: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::handlers::billing::test_support::{at, Fixture};
    use crate::application::handlers::billing::RecordPaymentCommand;
    use crate::domain::foundation::Currency;
    use crate::domain::invoice::{Invoice, Party};
    use crate::domain::payment::PaymentResult;
    use crate::ports::GatewayError;

    fn handler(fx: &Fixture) -> PayInvoiceHandler {
        PayInvoiceHandler::new(Arc::new(fx.store.clone()), fx.registry(), fx.ledger())
    }

    fn command(invoice: &Invoice, attempt: &str) -> PayInvoiceCommand {
        PayInvoiceCommand {
            company_id: invoice.company_id,
            invoice_id: invoice.id,
            gateway: PaymentGateway::MobileMoney,
            attempt_reference: attempt.to_string(),
            contact: PayerContact {
                phone: Some("0712345678".to_string()),
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn charges_full_total_of_unpaid_invoice() {
        let fx = Fixture::new();
        let now = at(2026, 3, 1);
        let invoice = fx.finalized_invoice(CompanyId::new(), now).await;

        let result = handler(&fx).handle(command(&invoice, "a1"), now).await.unwrap();

        assert_eq!(result.amount, Money::new(11_600, Currency::kes()));
        assert!(!result.existing);
        let initiation = &fx.mobile.initiations()[0];
        assert_eq!(initiation.reference, "INV-0042");
        assert_eq!(initiation.idempotency_key, invoice_payment_key(invoice.id, "a1"));
    }

    #[tokio::test]
    async fn charges_only_the_outstanding_balance() {
        let fx = Fixture::new();
        let now = at(2026, 3, 1);
        let invoice = fx.finalized_invoice(CompanyId::new(), now).await;
        let partial = PaymentResult::confirmed("ws_CO_part")
            .with_attribution(invoice.company_id, Payable::Invoice(invoice.id))
            .with_amount(Money::new(6_000, Currency::kes()));
        fx.ledger()
            .record_or_update(
                RecordPaymentCommand::from_result(PaymentGateway::MobileMoney, partial),
                now,
            )
            .await
            .unwrap();

        let result = handler(&fx).handle(command(&invoice, "a2"), now).await.unwrap();

        assert_eq!(result.amount, Money::new(5_600, Currency::kes()));
    }

    #[tokio::test]
    async fn same_attempt_reference_is_not_charged_twice() {
        let fx = Fixture::new();
        let now = at(2026, 3, 1);
        let invoice = fx.finalized_invoice(CompanyId::new(), now).await;
        let handler = handler(&fx);

        let first = handler.handle(command(&invoice, "a1"), now).await.unwrap();
        let second = handler.handle(command(&invoice, "a1"), now).await.unwrap();

        assert!(second.existing);
        assert_eq!(second.payment_id, first.payment_id);
        assert_eq!(fx.mobile.initiations().len(), 1);
    }

    #[tokio::test]
    async fn draft_invoice_is_rejected() {
        let fx = Fixture::new();
        let now = at(2026, 3, 1);
        let invoice = Invoice::draft(
            CompanyId::new(),
            "INV-0001",
            Currency::kes(),
            Party::default(),
            Party::default(),
            now,
        );
        InvoiceRepository::insert(&fx.store, &invoice).await.unwrap();

        let err = handler(&fx).handle(command(&invoice, "a1"), now).await.unwrap_err();

        assert!(matches!(err, BillingError::Precondition(_)));
        assert!(fx.store.all_payments().await.is_empty());
    }

    #[tokio::test]
    async fn gateway_failure_fails_the_attempt() {
        let fx = Fixture::new();
        let now = at(2026, 3, 1);
        let invoice = fx.finalized_invoice(CompanyId::new(), now).await;
        fx.mobile.fail_next_initiation(GatewayError::transport("timeout"));

        let err = handler(&fx).handle(command(&invoice, "a1"), now).await.unwrap_err();

        assert!(matches!(err, BillingError::GatewayTransport { .. }));
        assert_eq!(fx.store.all_payments().await[0].status, PaymentStatus::Failed);
    }

    #[tokio::test]
    async fn blank_attempt_reference_is_invalid() {
        let fx = Fixture::new();
        let now = at(2026, 3, 1);
        let invoice = fx.finalized_invoice(CompanyId::new(), now).await;

        let err = handler(&fx).handle(command(&invoice, "  "), now).await.unwrap_err();

        assert!(matches!(err, BillingError::Validation { .. }));
    }
}
