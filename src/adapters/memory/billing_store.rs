//! In-memory billing store for tests and local runs.
//!
//! One [`InMemoryBillingStore`] backs the subscription, payment and invoice
//! repositories so cross-aggregate units (ledger transactions, finalization)
//! behave atomically the way the PostgreSQL adapters do.
//!
//! A ledger transaction holds the store lock and works on a staged copy;
//! commit swaps the copy in, drop discards it. Other store calls made while a
//! transaction is open wait for it, so callers must not mix the two.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::domain::billing::{PaymentGateway, Subscription, SubscriptionStatus};
use crate::domain::foundation::{
    AuditEntry, CompanyId, DomainError, ErrorCode, InvoiceId, SubscriptionId, Timestamp,
};
use crate::domain::invoice::{Invoice, InvoiceSnapshot, InvoiceStatus};
use crate::domain::payment::{Payable, Payment, PaymentStatus};
use crate::ports::{
    InvoiceRepository, LedgerTransaction, PaymentRepository, SubscriptionRepository,
};

#[derive(Debug, Clone, Default)]
struct StoreState {
    subscriptions: HashMap<SubscriptionId, Subscription>,
    payments: Vec<Payment>,
    invoices: HashMap<InvoiceId, Invoice>,
    snapshots: HashMap<InvoiceId, InvoiceSnapshot>,
    audit: Vec<AuditEntry>,
}

impl StoreState {
    fn open_subscription_for(
        &self,
        company_id: CompanyId,
        except: Option<SubscriptionId>,
    ) -> Option<&Subscription> {
        self.subscriptions.values().find(|s| {
            s.company_id == company_id && s.status.is_open() && Some(s.id) != except
        })
    }

    fn sorted(mut subs: Vec<Subscription>) -> Vec<Subscription> {
        subs.sort_by_key(|s| s.created_at);
        subs
    }

    fn subscriptions_where(&self, pred: impl Fn(&Subscription) -> bool) -> Vec<Subscription> {
        Self::sorted(self.subscriptions.values().filter(|s| pred(s)).cloned().collect())
    }
}

/// Shared in-memory persistence for billing.
///
/// # Example
///
/// ```ignore
/// let store = Arc::new(InMemoryBillingStore::new());
/// let subscriptions: Arc<dyn SubscriptionRepository> = store.clone();
/// let payments: Arc<dyn PaymentRepository> = store.clone();
/// ```
#[derive(Clone, Default)]
pub struct InMemoryBillingStore {
    state: Arc<Mutex<StoreState>>,
    fail_next_commit: Arc<AtomicBool>,
    fail_next_subscription_update: Arc<AtomicBool>,
}

impl InMemoryBillingStore {
    pub fn new() -> Self {
        Self::default()
    }

    // === Test Helpers ===

    /// Makes the next ledger commit fail with a database error, leaving the
    /// store untouched.
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Makes the next subscription update fail with a database error before
    /// anything is written.
    pub fn fail_next_subscription_update(&self) {
        self.fail_next_subscription_update.store(true, Ordering::SeqCst);
    }

    pub async fn audit_entries(&self) -> Vec<AuditEntry> {
        self.state.lock().await.audit.clone()
    }

    pub async fn audit_actions(&self) -> Vec<String> {
        self.state
            .lock()
            .await
            .audit
            .iter()
            .map(|e| e.action.clone())
            .collect()
    }

    pub async fn all_subscriptions(&self) -> Vec<Subscription> {
        StoreState::sorted(self.state.lock().await.subscriptions.values().cloned().collect())
    }

    pub async fn all_payments(&self) -> Vec<Payment> {
        self.state.lock().await.payments.clone()
    }

    /// Writes an invoice row as-is, bypassing every status check.
    pub async fn overwrite_invoice(&self, invoice: Invoice) {
        self.state.lock().await.invoices.insert(invoice.id, invoice);
    }

    /// Writes a snapshot row as-is, bypassing the write-once rule.
    pub async fn overwrite_snapshot(&self, snapshot: InvoiceSnapshot) {
        self.state
            .lock()
            .await
            .snapshots
            .insert(snapshot.invoice_id, snapshot);
    }

    /// Writes a subscription row as-is, bypassing versioning and uniqueness.
    pub async fn overwrite_subscription(&self, subscription: Subscription) {
        self.state
            .lock()
            .await
            .subscriptions
            .insert(subscription.id, subscription);
    }
}

fn not_found(code: ErrorCode, what: &str, id: impl std::fmt::Display) -> DomainError {
    DomainError::new(code, format!("{} {} not found", what, id))
}

// ════════════════════════════════════════════════════════════════════════════════
// Subscriptions
// ════════════════════════════════════════════════════════════════════════════════

#[async_trait]
impl SubscriptionRepository for InMemoryBillingStore {
    async fn insert(
        &self,
        subscription: &Subscription,
        audit: &AuditEntry,
    ) -> Result<(), DomainError> {
        let mut state = self.state.lock().await;
        if state.subscriptions.contains_key(&subscription.id) {
            return Err(DomainError::database(format!(
                "subscription {} already exists",
                subscription.id
            )));
        }
        if subscription.status.is_open() {
            if let Some(open) = state.open_subscription_for(subscription.company_id, None) {
                return Err(DomainError::new(
                    ErrorCode::ActiveSubscriptionExists,
                    format!(
                        "company {} already has open subscription {}",
                        subscription.company_id, open.id
                    ),
                ));
            }
        }
        state.subscriptions.insert(subscription.id, subscription.clone());
        state.audit.push(audit.clone());
        Ok(())
    }

    async fn update(
        &self,
        subscription: &Subscription,
        audit: &AuditEntry,
    ) -> Result<Subscription, DomainError> {
        if self.fail_next_subscription_update.swap(false, Ordering::SeqCst) {
            return Err(DomainError::database("injected subscription update failure"));
        }
        let mut state = self.state.lock().await;
        let stored = state
            .subscriptions
            .get(&subscription.id)
            .ok_or_else(|| {
                not_found(ErrorCode::SubscriptionNotFound, "subscription", subscription.id)
            })?;
        if stored.version != subscription.version {
            return Err(DomainError::new(
                ErrorCode::ConcurrentModification,
                format!(
                    "subscription {} is at version {}, not {}",
                    subscription.id, stored.version, subscription.version
                ),
            ));
        }
        if subscription.status.is_open()
            && state
                .open_subscription_for(subscription.company_id, Some(subscription.id))
                .is_some()
        {
            return Err(DomainError::new(
                ErrorCode::ActiveSubscriptionExists,
                format!("company {} already has an open subscription", subscription.company_id),
            ));
        }

        let mut saved = subscription.clone();
        saved.version += 1;
        state.subscriptions.insert(saved.id, saved.clone());
        state.audit.push(audit.clone());
        Ok(saved)
    }

    async fn replace(
        &self,
        cancelled: &Subscription,
        successor: &Subscription,
        audit: &[AuditEntry],
    ) -> Result<(), DomainError> {
        let mut state = self.state.lock().await;
        let stored = state
            .subscriptions
            .get(&cancelled.id)
            .ok_or_else(|| not_found(ErrorCode::SubscriptionNotFound, "subscription", cancelled.id))?;
        if stored.version != cancelled.version {
            return Err(DomainError::new(
                ErrorCode::ConcurrentModification,
                format!("subscription {} changed during migration", cancelled.id),
            ));
        }
        if state
            .open_subscription_for(successor.company_id, Some(cancelled.id))
            .is_some()
        {
            return Err(DomainError::new(
                ErrorCode::ActiveSubscriptionExists,
                format!("company {} already has an open subscription", successor.company_id),
            ));
        }

        let mut saved = cancelled.clone();
        saved.version += 1;
        state.subscriptions.insert(saved.id, saved);
        state.subscriptions.insert(successor.id, successor.clone());
        state.audit.extend(audit.iter().cloned());
        Ok(())
    }

    async fn find_by_id(
        &self,
        company_id: CompanyId,
        id: SubscriptionId,
    ) -> Result<Option<Subscription>, DomainError> {
        let state = self.state.lock().await;
        Ok(state
            .subscriptions
            .get(&id)
            .filter(|s| s.company_id == company_id)
            .cloned())
    }

    async fn find_by_gateway_subscription_id(
        &self,
        gateway_subscription_id: &str,
    ) -> Result<Option<Subscription>, DomainError> {
        let state = self.state.lock().await;
        Ok(state
            .subscriptions
            .values()
            .find(|s| s.gateway_subscription_id.as_deref() == Some(gateway_subscription_id))
            .cloned())
    }

    async fn find_open_for_company(
        &self,
        company_id: CompanyId,
    ) -> Result<Option<Subscription>, DomainError> {
        let state = self.state.lock().await;
        Ok(state.open_subscription_for(company_id, None).cloned())
    }

    async fn find_due_for_renewal(&self, now: Timestamp) -> Result<Vec<Subscription>, DomainError> {
        let state = self.state.lock().await;
        Ok(state.subscriptions_where(|s| s.is_due_for_renewal(now)))
    }

    async fn find_in_grace(&self) -> Result<Vec<Subscription>, DomainError> {
        let state = self.state.lock().await;
        Ok(state.subscriptions_where(|s| s.status == SubscriptionStatus::Grace))
    }

    async fn find_grace_expired(&self, now: Timestamp) -> Result<Vec<Subscription>, DomainError> {
        let state = self.state.lock().await;
        Ok(state.subscriptions_where(|s| s.is_grace_expired(now)))
    }

    async fn find_billing_between(
        &self,
        now: Timestamp,
        until: Timestamp,
    ) -> Result<Vec<Subscription>, DomainError> {
        let state = self.state.lock().await;
        Ok(state.subscriptions_where(|s| {
            s.status == SubscriptionStatus::Active
                && s.auto_renew
                && s.next_billing_at
                    .map_or(false, |at| at.is_after(&now) && !at.is_after(&until))
        }))
    }

    async fn find_billable(&self) -> Result<Vec<Subscription>, DomainError> {
        let state = self.state.lock().await;
        Ok(state.subscriptions_where(|s| s.status.is_billable()))
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// Payment ledger
// ════════════════════════════════════════════════════════════════════════════════

#[async_trait]
impl PaymentRepository for InMemoryBillingStore {
    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>, DomainError> {
        let guard = self.state.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(InMemoryLedgerTransaction {
            guard,
            staged,
            fail_commit: self.fail_next_commit.clone(),
        }))
    }

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Payment>, DomainError> {
        let state = self.state.lock().await;
        Ok(state
            .payments
            .iter()
            .find(|p| p.idempotency_key == key)
            .cloned())
    }

    async fn find_stale_initiated(&self, cutoff: Timestamp) -> Result<Vec<Payment>, DomainError> {
        let state = self.state.lock().await;
        Ok(state
            .payments
            .iter()
            .filter(|p| p.status == PaymentStatus::Initiated && p.created_at.is_before(&cutoff))
            .cloned()
            .collect())
    }

    async fn list_for_payable(
        &self,
        company_id: CompanyId,
        payable: Payable,
    ) -> Result<Vec<Payment>, DomainError> {
        let state = self.state.lock().await;
        Ok(state
            .payments
            .iter()
            .filter(|p| p.company_id == company_id && p.payable == payable)
            .cloned()
            .collect())
    }
}

/// Staged ledger unit over the locked store.
pub struct InMemoryLedgerTransaction {
    guard: OwnedMutexGuard<StoreState>,
    staged: StoreState,
    fail_commit: Arc<AtomicBool>,
}

#[async_trait]
impl LedgerTransaction for InMemoryLedgerTransaction {
    async fn payment_by_idempotency_key(
        &mut self,
        key: &str,
    ) -> Result<Option<Payment>, DomainError> {
        Ok(self
            .staged
            .payments
            .iter()
            .find(|p| p.idempotency_key == key)
            .cloned())
    }

    async fn payment_by_gateway_transaction_id(
        &mut self,
        gateway: PaymentGateway,
        transaction_id: &str,
    ) -> Result<Option<Payment>, DomainError> {
        Ok(self
            .staged
            .payments
            .iter()
            .find(|p| {
                p.gateway == gateway && p.gateway_transaction_id.as_deref() == Some(transaction_id)
            })
            .cloned())
    }

    async fn insert_payment(&mut self, payment: &Payment) -> Result<(), DomainError> {
        if self
            .staged
            .payments
            .iter()
            .any(|p| p.idempotency_key == payment.idempotency_key)
        {
            return Err(DomainError::new(
                ErrorCode::DuplicateIdempotencyKey,
                format!("idempotency key {} is taken", payment.idempotency_key),
            ));
        }
        self.staged.payments.push(payment.clone());
        Ok(())
    }

    async fn update_payment(&mut self, payment: &Payment) -> Result<(), DomainError> {
        let slot = self
            .staged
            .payments
            .iter_mut()
            .find(|p| p.id == payment.id)
            .ok_or_else(|| not_found(ErrorCode::PaymentNotFound, "payment", payment.id))?;
        *slot = payment.clone();
        Ok(())
    }

    async fn successful_total_for_invoice(
        &mut self,
        company_id: CompanyId,
        invoice_id: InvoiceId,
    ) -> Result<i64, DomainError> {
        Ok(self
            .staged
            .payments
            .iter()
            .filter(|p| {
                p.company_id == company_id
                    && p.payable == Payable::Invoice(invoice_id)
                    && p.status == PaymentStatus::Success
            })
            .map(|p| p.amount.amount_minor())
            .sum())
    }

    async fn invoice_for_update(
        &mut self,
        company_id: CompanyId,
        invoice_id: InvoiceId,
    ) -> Result<Option<Invoice>, DomainError> {
        Ok(self
            .staged
            .invoices
            .get(&invoice_id)
            .filter(|i| i.company_id == company_id)
            .cloned())
    }

    async fn invoice_snapshot(
        &mut self,
        company_id: CompanyId,
        invoice_id: InvoiceId,
    ) -> Result<Option<InvoiceSnapshot>, DomainError> {
        Ok(self
            .staged
            .snapshots
            .get(&invoice_id)
            .filter(|s| s.company_id == company_id)
            .cloned())
    }

    async fn mark_invoice_paid(
        &mut self,
        company_id: CompanyId,
        invoice_id: InvoiceId,
        paid_at: Timestamp,
    ) -> Result<(), DomainError> {
        let invoice = self
            .staged
            .invoices
            .get_mut(&invoice_id)
            .filter(|i| i.company_id == company_id)
            .ok_or_else(|| not_found(ErrorCode::InvoiceNotFound, "invoice", invoice_id))?;
        invoice
            .mark_paid(paid_at)
            .map_err(|e| DomainError::new(ErrorCode::InvalidStateTransition, e.to_string()))
    }

    async fn append_audit(&mut self, entry: &AuditEntry) -> Result<(), DomainError> {
        self.staged.audit.push(entry.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), DomainError> {
        let InMemoryLedgerTransaction {
            mut guard,
            staged,
            fail_commit,
        } = *self;
        if fail_commit.swap(false, Ordering::SeqCst) {
            return Err(DomainError::database("injected commit failure"));
        }
        *guard = staged;
        Ok(())
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// Invoices
// ════════════════════════════════════════════════════════════════════════════════

#[async_trait]
impl InvoiceRepository for InMemoryBillingStore {
    async fn insert(&self, invoice: &Invoice) -> Result<(), DomainError> {
        let mut state = self.state.lock().await;
        if state.invoices.contains_key(&invoice.id) {
            return Err(DomainError::database(format!(
                "invoice {} already exists",
                invoice.id
            )));
        }
        state.invoices.insert(invoice.id, invoice.clone());
        Ok(())
    }

    async fn update_draft(&self, invoice: &Invoice) -> Result<(), DomainError> {
        let mut state = self.state.lock().await;
        let stored = state
            .invoices
            .get(&invoice.id)
            .filter(|i| i.company_id == invoice.company_id)
            .ok_or_else(|| not_found(ErrorCode::InvoiceNotFound, "invoice", invoice.id))?;
        if stored.status != InvoiceStatus::Draft {
            return Err(DomainError::new(
                ErrorCode::InvalidStateTransition,
                format!("invoice {} is {}, not draft", invoice.id, stored.status.as_str()),
            ));
        }
        state.invoices.insert(invoice.id, invoice.clone());
        Ok(())
    }

    async fn find_by_id(
        &self,
        company_id: CompanyId,
        id: InvoiceId,
    ) -> Result<Option<Invoice>, DomainError> {
        let state = self.state.lock().await;
        Ok(state
            .invoices
            .get(&id)
            .filter(|i| i.company_id == company_id)
            .cloned())
    }

    async fn find_snapshot(
        &self,
        company_id: CompanyId,
        invoice_id: InvoiceId,
    ) -> Result<Option<InvoiceSnapshot>, DomainError> {
        let state = self.state.lock().await;
        Ok(state
            .snapshots
            .get(&invoice_id)
            .filter(|s| s.company_id == company_id)
            .cloned())
    }

    async fn finalize(
        &self,
        invoice: &Invoice,
        snapshot: &InvoiceSnapshot,
        audit: &AuditEntry,
    ) -> Result<(), DomainError> {
        let mut state = self.state.lock().await;
        let stored = state
            .invoices
            .get(&invoice.id)
            .filter(|i| i.company_id == invoice.company_id)
            .ok_or_else(|| not_found(ErrorCode::InvoiceNotFound, "invoice", invoice.id))?;
        if stored.status != InvoiceStatus::Draft {
            return Err(DomainError::new(
                ErrorCode::InvalidStateTransition,
                format!("invoice {} is already {}", invoice.id, stored.status.as_str()),
            ));
        }
        if state.snapshots.contains_key(&invoice.id) {
            return Err(DomainError::new(
                ErrorCode::SnapshotExists,
                format!("invoice {} already has a snapshot", invoice.id),
            ));
        }
        state.invoices.insert(invoice.id, invoice.clone());
        state.snapshots.insert(invoice.id, snapshot.clone());
        state.audit.push(audit.clone());
        Ok(())
    }

    async fn save_compliance_reference(
        &self,
        invoice: &Invoice,
        audit: &AuditEntry,
    ) -> Result<(), DomainError> {
        let mut state = self.state.lock().await;
        let stored = state
            .invoices
            .get_mut(&invoice.id)
            .filter(|i| i.company_id == invoice.company_id)
            .ok_or_else(|| not_found(ErrorCode::InvoiceNotFound, "invoice", invoice.id))?;
        stored.compliance_reference = invoice.compliance_reference.clone();
        stored.updated_at = invoice.updated_at;
        state.audit.push(audit.clone());
        Ok(())
    }
}
