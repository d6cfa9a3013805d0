//! PostgreSQL implementation of [`BillingStore`]

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use time::{Date, OffsetDateTime};
use uuid::Uuid;

use super::BillingStore;
use crate::error::{BillingError, BillingResult};
use crate::invoice::{
    Invoice, InvoiceChanges, InvoiceDetail, InvoiceDraft, InvoiceFilter, InvoiceItem,
    InvoiceNumber, InvoiceStatus, NewPayment, Payment, PaymentApplication,
};
use crate::ledger::{
    BillingPeriod, Subscription, SubscriptionActivation, SubscriptionStatus, Tier, TierPurchase,
};
use crate::records::{
    BillableRecord, Booking, Client, Dog, ServicePeriod, ServiceRecord, ServiceType,
};

/// Minutes after which a webhook stuck in `processing` may be claimed again
const PROCESSING_TIMEOUT_MINUTES: i32 = 30;

const INVOICE_COLUMNS: &str = "id, client_id, invoice_number, period_start, period_end, \
     issue_date, due_date, subtotal_cents, tax_cents, total_cents, amount_paid_cents, status, \
     notes, checkout_session_id, paid_at, created_at, updated_at";

const SUBSCRIPTION_COLUMNS: &str = "id, user_id, subscription_type, status, \
     external_subscription_id, current_period_start, current_period_end, cancelled_at, \
     created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
struct ClientRow {
    id: Uuid,
    user_id: Option<Uuid>,
    name: String,
    email: String,
}

impl From<ClientRow> for Client {
    fn from(row: ClientRow) -> Self {
        Client {
            id: row.id,
            user_id: row.user_id,
            name: row.name,
            email: row.email,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct InvoiceRow {
    id: Uuid,
    client_id: Uuid,
    invoice_number: String,
    period_start: Date,
    period_end: Date,
    issue_date: Date,
    due_date: Date,
    subtotal_cents: i64,
    tax_cents: i64,
    total_cents: i64,
    amount_paid_cents: i64,
    status: String,
    notes: Option<String>,
    checkout_session_id: Option<String>,
    paid_at: Option<OffsetDateTime>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl TryFrom<InvoiceRow> for Invoice {
    type Error = BillingError;

    fn try_from(row: InvoiceRow) -> Result<Self, Self::Error> {
        Ok(Invoice {
            id: row.id,
            client_id: row.client_id,
            invoice_number: row.invoice_number,
            period_start: row.period_start,
            period_end: row.period_end,
            issue_date: row.issue_date,
            due_date: row.due_date,
            subtotal_cents: row.subtotal_cents,
            tax_cents: row.tax_cents,
            total_cents: row.total_cents,
            amount_paid_cents: row.amount_paid_cents,
            status: row.status.parse()?,
            notes: row.notes,
            checkout_session_id: row.checkout_session_id,
            paid_at: row.paid_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct InvoiceItemRow {
    id: Uuid,
    invoice_id: Uuid,
    service_record_id: Option<Uuid>,
    description: String,
    quantity: i32,
    unit_price_cents: i64,
    total_cents: i64,
}

impl From<InvoiceItemRow> for InvoiceItem {
    fn from(row: InvoiceItemRow) -> Self {
        InvoiceItem {
            id: row.id,
            invoice_id: row.invoice_id,
            service_record_id: row.service_record_id,
            description: row.description,
            quantity: row.quantity,
            unit_price_cents: row.unit_price_cents,
            total_cents: row.total_cents,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PaymentRow {
    id: Uuid,
    invoice_id: Uuid,
    amount_cents: i64,
    method: String,
    status: String,
    external_transaction_id: Option<String>,
    paid_at: OffsetDateTime,
}

impl From<PaymentRow> for Payment {
    fn from(row: PaymentRow) -> Self {
        Payment {
            id: row.id,
            invoice_id: row.invoice_id,
            amount_cents: row.amount_cents,
            method: row.method,
            status: row.status,
            external_transaction_id: row.external_transaction_id,
            paid_at: row.paid_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct BillableRecordRow {
    id: Uuid,
    service_type_id: Uuid,
    dog_id: Option<Uuid>,
    booking_id: Option<Uuid>,
    service_date: Date,
    duration_minutes: i32,
    unit_price_cents: i64,
    quantity: i32,
    adjustment_cents: i64,
    total_cents: i64,
    notes: Option<String>,
    created_at: OffsetDateTime,
    service_type_name: String,
    dog_name: Option<String>,
}

impl From<BillableRecordRow> for BillableRecord {
    fn from(row: BillableRecordRow) -> Self {
        BillableRecord {
            record: ServiceRecord {
                id: row.id,
                service_type_id: row.service_type_id,
                dog_id: row.dog_id,
                booking_id: row.booking_id,
                service_date: row.service_date,
                duration_minutes: row.duration_minutes,
                unit_price_cents: row.unit_price_cents,
                quantity: row.quantity,
                adjustment_cents: row.adjustment_cents,
                total_cents: row.total_cents,
                notes: row.notes,
                created_at: row.created_at,
            },
            service_type_name: row.service_type_name,
            dog_name: row.dog_name,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TierPurchaseRow {
    id: Uuid,
    user_id: Uuid,
    tier_id: Uuid,
    amount_cents: i64,
    external_transaction_id: Option<String>,
    created_at: OffsetDateTime,
}

impl From<TierPurchaseRow> for TierPurchase {
    fn from(row: TierPurchaseRow) -> Self {
        TierPurchase {
            id: row.id,
            user_id: row.user_id,
            tier_id: row.tier_id,
            amount_cents: row.amount_cents,
            external_transaction_id: row.external_transaction_id,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SubscriptionRow {
    id: Uuid,
    user_id: Uuid,
    subscription_type: String,
    status: String,
    external_subscription_id: Option<String>,
    current_period_start: Option<OffsetDateTime>,
    current_period_end: Option<OffsetDateTime>,
    cancelled_at: Option<OffsetDateTime>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = BillingError;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        Ok(Subscription {
            id: row.id,
            user_id: row.user_id,
            subscription_type: row.subscription_type.parse()?,
            status: row.status.parse()?,
            external_subscription_id: row.external_subscription_id,
            current_period_start: row.current_period_start,
            current_period_end: row.current_period_end,
            cancelled_at: row.cancelled_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// Billing store backed by the shared Postgres schema
#[derive(Clone)]
pub struct PgBillingStore {
    pool: PgPool,
}

impl PgBillingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load_detail(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        invoice: Invoice,
    ) -> BillingResult<InvoiceDetail> {
        let client: ClientRow =
            sqlx::query_as("SELECT id, user_id, name, email FROM clients WHERE id = $1")
                .bind(invoice.client_id)
                .fetch_one(&mut **tx)
                .await?;

        let items: Vec<InvoiceItemRow> = sqlx::query_as(
            r#"
            SELECT id, invoice_id, service_record_id, description, quantity,
                   unit_price_cents, total_cents
            FROM invoice_items
            WHERE invoice_id = $1
            ORDER BY line_no
            "#,
        )
        .bind(invoice.id)
        .fetch_all(&mut **tx)
        .await?;

        Ok(InvoiceDetail {
            invoice,
            client: client.into(),
            items: items.into_iter().map(Into::into).collect(),
        })
    }
}

#[async_trait]
impl BillingStore for PgBillingStore {
    async fn find_client(&self, client_id: Uuid) -> BillingResult<Option<Client>> {
        let row: Option<ClientRow> =
            sqlx::query_as("SELECT id, user_id, name, email FROM clients WHERE id = $1")
                .bind(client_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(Into::into))
    }

    async fn find_client_by_user(&self, user_id: Uuid) -> BillingResult<Option<Client>> {
        let row: Option<ClientRow> =
            sqlx::query_as("SELECT id, user_id, name, email FROM clients WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(Into::into))
    }

    async fn find_dog(&self, dog_id: Uuid) -> BillingResult<Option<Dog>> {
        let row: Option<(Uuid, Uuid, String)> =
            sqlx::query_as("SELECT id, client_id, name FROM dogs WHERE id = $1")
                .bind(dog_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(id, client_id, name)| Dog {
            id,
            client_id,
            name,
        }))
    }

    async fn find_booking(&self, booking_id: Uuid) -> BillingResult<Option<Booking>> {
        let row: Option<(Uuid, Uuid, Option<Uuid>)> =
            sqlx::query_as("SELECT id, client_id, dog_id FROM bookings WHERE id = $1")
                .bind(booking_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(id, client_id, dog_id)| Booking {
            id,
            client_id,
            dog_id,
        }))
    }

    async fn find_service_type(&self, service_type_id: Uuid) -> BillingResult<Option<ServiceType>> {
        let row: Option<(Uuid, String, i64)> = sqlx::query_as(
            "SELECT id, name, default_price_cents FROM service_types WHERE id = $1",
        )
        .bind(service_type_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(id, name, default_price_cents)| ServiceType {
            id,
            name,
            default_price_cents,
        }))
    }

    async fn find_tier(&self, tier_id: Uuid) -> BillingResult<Option<Tier>> {
        let row: Option<(Uuid, String, i64)> =
            sqlx::query_as("SELECT id, name, price_cents FROM tiers WHERE id = $1")
                .bind(tier_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(id, name, price_cents)| Tier {
            id,
            name,
            price_cents,
        }))
    }

    async fn insert_service_record(&self, record: &ServiceRecord) -> BillingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO service_records
                (id, service_type_id, dog_id, booking_id, service_date, duration_minutes,
                 unit_price_cents, quantity, adjustment_cents, total_cents, notes, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(record.id)
        .bind(record.service_type_id)
        .bind(record.dog_id)
        .bind(record.booking_id)
        .bind(record.service_date)
        .bind(record.duration_minutes)
        .bind(record.unit_price_cents)
        .bind(record.quantity)
        .bind(record.adjustment_cents)
        .bind(record.total_cents)
        .bind(&record.notes)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_uninvoiced_records(
        &self,
        client_id: Uuid,
        period: ServicePeriod,
    ) -> BillingResult<Vec<BillableRecord>> {
        let rows: Vec<BillableRecordRow> = sqlx::query_as(
            r#"
            SELECT sr.id, sr.service_type_id, sr.dog_id, sr.booking_id, sr.service_date,
                   sr.duration_minutes, sr.unit_price_cents, sr.quantity, sr.adjustment_cents,
                   sr.total_cents, sr.notes, sr.created_at,
                   st.name AS service_type_name,
                   COALESCE(d.name, bd.name) AS dog_name
            FROM service_records sr
            JOIN service_types st ON st.id = sr.service_type_id
            LEFT JOIN dogs d ON d.id = sr.dog_id
            LEFT JOIN bookings b ON b.id = sr.booking_id
            LEFT JOIN dogs bd ON bd.id = b.dog_id
            WHERE (d.client_id = $1 OR b.client_id = $1)
              AND ($2::DATE IS NULL OR sr.service_date >= $2)
              AND ($3::DATE IS NULL OR sr.service_date <= $3)
              AND NOT EXISTS (
                  SELECT 1 FROM invoice_items ii WHERE ii.service_record_id = sr.id
              )
            ORDER BY sr.service_date, sr.created_at
            "#,
        )
        .bind(client_id)
        .bind(period.start)
        .bind(period.end)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn create_invoice(&self, draft: InvoiceDraft) -> BillingResult<InvoiceDetail> {
        let mut tx = self.pool.begin().await?;

        let (seq,): (i32,) = sqlx::query_as(
            r#"
            INSERT INTO invoice_counters (year, seq) VALUES ($1, 1)
            ON CONFLICT (year) DO UPDATE SET seq = invoice_counters.seq + 1
            RETURNING seq
            "#,
        )
        .bind(draft.year)
        .fetch_one(&mut *tx)
        .await?;

        let row: InvoiceRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO invoices
                (id, client_id, invoice_number, period_start, period_end, issue_date, due_date,
                 subtotal_cents, tax_cents, total_cents, amount_paid_cents, status, notes)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 0, $11, $12)
            RETURNING {}
            "#,
            INVOICE_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(draft.client_id)
        .bind(InvoiceNumber::format(draft.year, seq))
        .bind(draft.period_start)
        .bind(draft.period_end)
        .bind(draft.issue_date)
        .bind(draft.due_date)
        .bind(draft.subtotal_cents)
        .bind(draft.tax_cents)
        .bind(draft.total_cents)
        .bind(InvoiceStatus::Draft.as_str())
        .bind(&draft.notes)
        .fetch_one(&mut *tx)
        .await?;
        let invoice = Invoice::try_from(row)?;

        for (line_no, item) in (0i32..).zip(&draft.items) {
            sqlx::query(
                r#"
                INSERT INTO invoice_items
                    (id, invoice_id, service_record_id, description, quantity,
                     unit_price_cents, total_cents, line_no)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(invoice.id)
            .bind(item.service_record_id)
            .bind(&item.description)
            .bind(item.quantity)
            .bind(item.unit_price_cents)
            .bind(item.total_cents)
            .bind(line_no)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    BillingError::InvalidState(
                        "A service record on this invoice was billed concurrently".to_string(),
                    )
                } else {
                    e.into()
                }
            })?;
        }

        let detail = self.load_detail(&mut tx, invoice).await?;
        tx.commit().await?;
        Ok(detail)
    }

    async fn find_invoice(&self, invoice_id: Uuid) -> BillingResult<Option<InvoiceDetail>> {
        let mut tx = self.pool.begin().await?;
        let row: Option<InvoiceRow> = sqlx::query_as(&format!(
            "SELECT {} FROM invoices WHERE id = $1",
            INVOICE_COLUMNS
        ))
        .bind(invoice_id)
        .fetch_optional(&mut *tx)
        .await?;

        let detail = match row {
            Some(row) => Some(self.load_detail(&mut tx, row.try_into()?).await?),
            None => None,
        };
        tx.commit().await?;
        Ok(detail)
    }

    async fn list_invoices(&self, filter: &InvoiceFilter) -> BillingResult<Vec<Invoice>> {
        let rows: Vec<InvoiceRow> = sqlx::query_as(&format!(
            r#"
            SELECT {} FROM invoices
            WHERE ($1::UUID IS NULL OR client_id = $1)
              AND ($2::TEXT IS NULL OR status = $2)
              AND (NOT $3 OR status <> 'draft')
            ORDER BY created_at DESC
            "#,
            INVOICE_COLUMNS
        ))
        .bind(filter.client_id)
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.exclude_drafts)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Invoice::try_from).collect()
    }

    async fn update_invoice(
        &self,
        invoice_id: Uuid,
        expected_status: InvoiceStatus,
        changes: &InvoiceChanges,
    ) -> BillingResult<Option<Invoice>> {
        let row: Option<InvoiceRow> = sqlx::query_as(&format!(
            r#"
            UPDATE invoices SET
                status = COALESCE($3, status),
                notes = COALESCE($4, notes),
                due_date = COALESCE($5, due_date),
                amount_paid_cents = COALESCE($6, amount_paid_cents),
                paid_at = COALESCE($7, paid_at),
                updated_at = NOW()
            WHERE id = $1 AND status = $2
            RETURNING {}
            "#,
            INVOICE_COLUMNS
        ))
        .bind(invoice_id)
        .bind(expected_status.as_str())
        .bind(changes.status.map(|s| s.as_str()))
        .bind(&changes.notes)
        .bind(changes.due_date)
        .bind(changes.amount_paid_cents)
        .bind(changes.paid_at)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Invoice::try_from).transpose()
    }

    async fn delete_draft_invoice(&self, invoice_id: Uuid) -> BillingResult<bool> {
        let result = sqlx::query("DELETE FROM invoices WHERE id = $1 AND status = 'draft'")
            .bind(invoice_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_invoice_checkout_session(
        &self,
        invoice_id: Uuid,
        session_id: &str,
    ) -> BillingResult<()> {
        sqlx::query(
            "UPDATE invoices SET checkout_session_id = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(invoice_id)
        .bind(session_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_overdue_invoices(&self, today: Date) -> BillingResult<Vec<Invoice>> {
        let rows: Vec<InvoiceRow> = sqlx::query_as(&format!(
            r#"
            UPDATE invoices SET status = 'overdue', updated_at = NOW()
            WHERE status IN ('sent', 'partial') AND due_date < $1
            RETURNING {}
            "#,
            INVOICE_COLUMNS
        ))
        .bind(today)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Invoice::try_from).collect()
    }

    async fn list_payments(&self, invoice_id: Uuid) -> BillingResult<Vec<Payment>> {
        let rows: Vec<PaymentRow> = sqlx::query_as(
            r#"
            SELECT id, invoice_id, amount_cents, method, status, external_transaction_id, paid_at
            FROM payments
            WHERE invoice_id = $1
            ORDER BY paid_at
            "#,
        )
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn apply_invoice_payment(&self, payment: NewPayment) -> BillingResult<PaymentApplication> {
        let mut tx = self.pool.begin().await?;

        let row: Option<InvoiceRow> = sqlx::query_as(&format!(
            "SELECT {} FROM invoices WHERE id = $1 FOR UPDATE",
            INVOICE_COLUMNS
        ))
        .bind(payment.invoice_id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(current) = row.map(Invoice::try_from).transpose()? else {
            return Ok(PaymentApplication::InvoiceMissing);
        };

        let inserted: Option<PaymentRow> = sqlx::query_as(
            r#"
            INSERT INTO payments
                (id, invoice_id, amount_cents, method, status, external_transaction_id, paid_at)
            VALUES ($1, $2, $3, $4, 'succeeded', $5, NOW())
            ON CONFLICT (external_transaction_id) DO NOTHING
            RETURNING id, invoice_id, amount_cents, method, status, external_transaction_id, paid_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(payment.invoice_id)
        .bind(payment.amount_cents)
        .bind(&payment.method)
        .bind(&payment.external_transaction_id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(recorded) = inserted else {
            return Ok(PaymentApplication::Duplicate);
        };

        let amount_paid_cents = current
            .amount_paid_cents
            .saturating_add(payment.amount_cents)
            .min(current.total_cents);
        let status = if current.status == InvoiceStatus::Cancelled {
            InvoiceStatus::Cancelled
        } else {
            InvoiceStatus::after_payment(amount_paid_cents, current.total_cents)
        };

        let updated: InvoiceRow = sqlx::query_as(&format!(
            r#"
            UPDATE invoices SET
                amount_paid_cents = $2,
                status = $3,
                paid_at = CASE WHEN $3 = 'paid' THEN COALESCE(paid_at, NOW()) ELSE paid_at END,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            INVOICE_COLUMNS
        ))
        .bind(current.id)
        .bind(amount_paid_cents)
        .bind(status.as_str())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(PaymentApplication::Applied {
            invoice: updated.try_into()?,
            payment: recorded.into(),
        })
    }

    async fn find_tier_purchase(
        &self,
        user_id: Uuid,
        tier_id: Uuid,
    ) -> BillingResult<Option<TierPurchase>> {
        let row: Option<TierPurchaseRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, tier_id, amount_cents, external_transaction_id, created_at
            FROM tier_purchases
            WHERE user_id = $1 AND tier_id = $2
            "#,
        )
        .bind(user_id)
        .bind(tier_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn record_tier_purchase(&self, purchase: &TierPurchase) -> BillingResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO tier_purchases
                (id, user_id, tier_id, amount_cents, external_transaction_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (user_id, tier_id) DO NOTHING
            "#,
        )
        .bind(purchase.id)
        .bind(purchase.user_id)
        .bind(purchase.tier_id)
        .bind(purchase.amount_cents)
        .bind(&purchase.external_transaction_id)
        .bind(purchase.created_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn latest_subscription(&self, user_id: Uuid) -> BillingResult<Option<Subscription>> {
        let row: Option<SubscriptionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM subscriptions WHERE user_id = $1 ORDER BY created_at DESC LIMIT 1",
            SUBSCRIPTION_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Subscription::try_from).transpose()
    }

    async fn find_subscription_by_external_id(
        &self,
        external_subscription_id: &str,
    ) -> BillingResult<Option<Subscription>> {
        let row: Option<SubscriptionRow> = sqlx::query_as(&format!(
            r#"
            SELECT {} FROM subscriptions
            WHERE external_subscription_id = $1
            ORDER BY created_at DESC
            LIMIT 1
            "#,
            SUBSCRIPTION_COLUMNS
        ))
        .bind(external_subscription_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Subscription::try_from).transpose()
    }

    async fn activate_subscription(
        &self,
        activation: &SubscriptionActivation,
    ) -> BillingResult<Subscription> {
        let mut tx = self.pool.begin().await?;

        // Serialize activations for the same user
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1::TEXT))")
            .bind(activation.user_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = 'cancelled', cancelled_at = NOW(), updated_at = NOW()
            WHERE user_id = $1
              AND status = 'active'
              AND external_subscription_id IS DISTINCT FROM $2
            "#,
        )
        .bind(activation.user_id)
        .bind(&activation.external_subscription_id)
        .execute(&mut *tx)
        .await?;

        let reactivated: Vec<SubscriptionRow> = sqlx::query_as(&format!(
            r#"
            UPDATE subscriptions SET
                status = 'active',
                current_period_start = $2,
                current_period_end = $3,
                cancelled_at = NULL,
                updated_at = NOW()
            WHERE external_subscription_id = $1
            RETURNING {}
            "#,
            SUBSCRIPTION_COLUMNS
        ))
        .bind(&activation.external_subscription_id)
        .bind(activation.period.start)
        .bind(activation.period.end)
        .fetch_all(&mut *tx)
        .await?;

        let row = match reactivated.into_iter().max_by_key(|r| r.created_at) {
            Some(row) => row,
            None => {
                sqlx::query_as(&format!(
                    r#"
                    INSERT INTO subscriptions
                        (id, user_id, subscription_type, status, external_subscription_id,
                         current_period_start, current_period_end)
                    VALUES ($1, $2, $3, 'active', $4, $5, $6)
                    RETURNING {}
                    "#,
                    SUBSCRIPTION_COLUMNS
                ))
                .bind(Uuid::new_v4())
                .bind(activation.user_id)
                .bind(activation.subscription_type.as_str())
                .bind(&activation.external_subscription_id)
                .bind(activation.period.start)
                .bind(activation.period.end)
                .fetch_one(&mut *tx)
                .await?
            }
        };

        tx.commit().await?;
        row.try_into()
    }

    async fn set_subscription_status(
        &self,
        external_subscription_id: &str,
        status: SubscriptionStatus,
        period: Option<BillingPeriod>,
    ) -> BillingResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions SET
                status = $2,
                current_period_start = COALESCE($3, current_period_start),
                current_period_end = COALESCE($4, current_period_end),
                cancelled_at = CASE
                    WHEN $2 = 'active' THEN NULL
                    WHEN $2 = 'cancelled' THEN COALESCE(cancelled_at, NOW())
                    ELSE cancelled_at
                END,
                updated_at = NOW()
            WHERE external_subscription_id = $1
            "#,
        )
        .bind(external_subscription_id)
        .bind(status.as_str())
        .bind(period.map(|p| p.start))
        .bind(period.map(|p| p.end))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn cancel_subscriptions(
        &self,
        external_subscription_id: &str,
        cancelled_at: OffsetDateTime,
    ) -> BillingResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = 'cancelled', cancelled_at = $2, updated_at = $2
            WHERE external_subscription_id = $1
            "#,
        )
        .bind(external_subscription_id)
        .bind(cancelled_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn claim_webhook_event(&self, event_id: &str, event_type: &str) -> BillingResult<bool> {
        // A fresh event, a failed one, or one stuck in `processing` past the
        // timeout can be claimed. Anything else is a duplicate delivery.
        let claimed: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO webhook_events
                (external_event_id, event_type, processing_result, processing_started_at)
            VALUES ($1, $2, 'processing', NOW())
            ON CONFLICT (external_event_id) DO UPDATE SET
                processing_result = 'processing',
                processing_started_at = NOW(),
                error_message = NULL
            WHERE webhook_events.processing_result = 'error'
               OR (webhook_events.processing_result = 'processing'
                   AND webhook_events.processing_started_at
                       < NOW() - make_interval(mins => $3))
            RETURNING id
            "#,
        )
        .bind(event_id)
        .bind(event_type)
        .bind(PROCESSING_TIMEOUT_MINUTES)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(
                event_id = %event_id,
                error = %e,
                "Failed to claim webhook event for processing"
            );
            BillingError::Database(e.to_string())
        })?;

        Ok(claimed.is_some())
    }

    async fn finish_webhook_event(
        &self,
        event_id: &str,
        error_message: Option<&str>,
    ) -> BillingResult<()> {
        let result = if error_message.is_some() { "error" } else { "success" };
        sqlx::query(
            r#"
            UPDATE webhook_events
            SET processing_result = $2, error_message = $3
            WHERE external_event_id = $1
            "#,
        )
        .bind(event_id)
        .bind(result)
        .bind(error_message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
