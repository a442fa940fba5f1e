//! Record store adapter
//!
//! Key-value access over the subscription, user, and receipt tables. Rows
//! keep the partition/row addressing of the previously deployed table
//! storage: the row key is the base64 encoding of the normalized email, and
//! existing stored data is only reachable through that key.
//!
//! Upserts use merge semantics: fields absent from an update never clear
//! stored values. Single-key upserts are atomic; concurrent writers to the
//! same key are last-write-wins per column.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use sqlx::PgPool;
use time::OffsetDateTime;

use karte_shared::SubscriptionStatus;

use crate::error::BillingResult;

pub const SUBSCRIPTION_PARTITION: &str = "Subscription";
pub const USER_PARTITION: &str = "User";
pub const RECEIPT_PARTITION: &str = "Receipt";

/// Normalize a user-supplied email: trimmed and lower-cased.
///
/// Two case-variant spellings of one address must never produce two records.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Row key for a normalized email
pub fn email_row_key(normalized_email: &str) -> String {
    BASE64.encode(normalized_email.as_bytes())
}

/// One subscription record per customer email
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionRecord {
    pub email: String,
    pub status: SubscriptionStatus,
    pub trial_end: Option<OffsetDateTime>,
    pub current_period_end: Option<OffsetDateTime>,
    pub cancel_at_period_end: bool,
    pub canceled_at: Option<OffsetDateTime>,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub plan_id: Option<String>,
    pub plan_name: Option<String>,
    pub last_synced_at: Option<OffsetDateTime>,
    pub created_date: Option<String>,
    pub trial_warning_sent: bool,
}

#[derive(Debug, sqlx::FromRow)]
struct SubscriptionRow {
    email: String,
    status: String,
    trial_end: Option<OffsetDateTime>,
    current_period_end: Option<OffsetDateTime>,
    cancel_at_period_end: bool,
    canceled_at: Option<OffsetDateTime>,
    stripe_customer_id: Option<String>,
    stripe_subscription_id: Option<String>,
    plan_id: Option<String>,
    plan_name: Option<String>,
    last_synced_at: Option<OffsetDateTime>,
    created_date: Option<String>,
    trial_warning_sent: bool,
}

impl From<SubscriptionRow> for SubscriptionRecord {
    fn from(row: SubscriptionRow) -> Self {
        Self {
            email: row.email,
            status: SubscriptionStatus::parse(&row.status),
            trial_end: row.trial_end,
            current_period_end: row.current_period_end,
            cancel_at_period_end: row.cancel_at_period_end,
            canceled_at: row.canceled_at,
            stripe_customer_id: row.stripe_customer_id,
            stripe_subscription_id: row.stripe_subscription_id,
            plan_id: row.plan_id,
            plan_name: row.plan_name,
            last_synced_at: row.last_synced_at,
            created_date: row.created_date,
            trial_warning_sent: row.trial_warning_sent,
        }
    }
}

/// Partial update applied to a subscription record with merge semantics.
///
/// `None` fields leave the stored value untouched; clearing a flag requires
/// an explicit `Some(false)`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubscriptionUpdate {
    pub status: Option<SubscriptionStatus>,
    pub trial_end: Option<OffsetDateTime>,
    pub current_period_end: Option<OffsetDateTime>,
    pub cancel_at_period_end: Option<bool>,
    pub canceled_at: Option<OffsetDateTime>,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub plan_id: Option<String>,
    pub plan_name: Option<String>,
    pub last_synced_at: Option<OffsetDateTime>,
    pub created_date: Option<String>,
    pub trial_warning_sent: Option<bool>,
    pub trial_warning_sent_at: Option<OffsetDateTime>,
}

/// Per-email profile record
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRecord {
    pub email: String,
    pub name: Option<String>,
    pub facility: Option<String>,
    pub agreed_to_terms: Option<bool>,
    pub agreed_to_privacy: Option<bool>,
    pub consent_date: Option<OffsetDateTime>,
    pub terms_version: Option<String>,
    pub contract_status: Option<String>,
    pub cancellation_otp: Option<String>,
    pub cancellation_otp_expires: Option<OffsetDateTime>,
    pub session_token: Option<String>,
}

/// Partial update for a user record, merge semantics as above
#[derive(Debug, Clone, Default)]
pub struct UserUpdate {
    pub name: Option<String>,
    pub facility: Option<String>,
    pub agreed_to_terms: Option<bool>,
    pub agreed_to_privacy: Option<bool>,
    pub consent_date: Option<OffsetDateTime>,
    pub terms_version: Option<String>,
    pub contract_status: Option<String>,
    pub cancellation_otp: Option<String>,
    pub cancellation_otp_expires: Option<OffsetDateTime>,
    pub session_token: Option<String>,
}

/// One receipt per paid invoice
#[derive(Debug, Clone)]
pub struct ReceiptRecord {
    pub receipt_number: String,
    pub email: Option<String>,
    pub amount_minor: i64,
    pub currency: String,
    pub stripe_invoice_id: Option<String>,
    pub stripe_customer_id: Option<String>,
    pub hosted_invoice_url: Option<String>,
    pub invoice_pdf_url: Option<String>,
    pub paid_at: Option<OffsetDateTime>,
}

/// Store adapter over the record tables
#[derive(Clone)]
pub struct RecordStore {
    pool: PgPool,
}

impl RecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Merge-upsert the subscription record for an email
    pub async fn upsert_subscription(
        &self,
        email: &str,
        update: &SubscriptionUpdate,
    ) -> BillingResult<()> {
        let email = normalize_email(email);
        let row_key = email_row_key(&email);

        sqlx::query(
            r#"
            INSERT INTO subscription_records (
                partition_key, row_key, email, status, trial_end, current_period_end,
                cancel_at_period_end, canceled_at, stripe_customer_id, stripe_subscription_id,
                plan_id, plan_name, last_synced_at, created_date,
                trial_warning_sent, trial_warning_sent_at
            ) VALUES (
                $1, $2, $3, COALESCE($4, 'inactive'), $5, $6,
                COALESCE($7, FALSE), $8, $9, $10,
                $11, $12, $13, $14,
                COALESCE($15, FALSE), $16
            )
            ON CONFLICT (partition_key, row_key) DO UPDATE SET
                email = EXCLUDED.email,
                status = COALESCE($4, subscription_records.status),
                trial_end = COALESCE($5, subscription_records.trial_end),
                current_period_end = COALESCE($6, subscription_records.current_period_end),
                cancel_at_period_end = COALESCE($7, subscription_records.cancel_at_period_end),
                canceled_at = COALESCE($8, subscription_records.canceled_at),
                stripe_customer_id = COALESCE($9, subscription_records.stripe_customer_id),
                stripe_subscription_id = COALESCE($10, subscription_records.stripe_subscription_id),
                plan_id = COALESCE($11, subscription_records.plan_id),
                plan_name = COALESCE($12, subscription_records.plan_name),
                last_synced_at = COALESCE($13, subscription_records.last_synced_at),
                created_date = COALESCE($14, subscription_records.created_date),
                trial_warning_sent = COALESCE($15, subscription_records.trial_warning_sent),
                trial_warning_sent_at = COALESCE($16, subscription_records.trial_warning_sent_at),
                updated_at = NOW()
            "#,
        )
        .bind(SUBSCRIPTION_PARTITION)
        .bind(&row_key)
        .bind(&email)
        .bind(update.status.map(|s| s.as_str()))
        .bind(update.trial_end)
        .bind(update.current_period_end)
        .bind(update.cancel_at_period_end)
        .bind(update.canceled_at)
        .bind(update.stripe_customer_id.as_ref())
        .bind(update.stripe_subscription_id.as_ref())
        .bind(update.plan_id.as_ref())
        .bind(update.plan_name.as_ref())
        .bind(update.last_synced_at)
        .bind(update.created_date.as_ref())
        .bind(update.trial_warning_sent)
        .bind(update.trial_warning_sent_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Fetch the subscription record for an email, `None` when absent
    pub async fn get_subscription(&self, email: &str) -> BillingResult<Option<SubscriptionRecord>> {
        let email = normalize_email(email);
        let row_key = email_row_key(&email);

        let row: Option<SubscriptionRow> = sqlx::query_as(
            r#"
            SELECT email, status, trial_end, current_period_end, cancel_at_period_end,
                   canceled_at, stripe_customer_id, stripe_subscription_id,
                   plan_id, plan_name, last_synced_at, created_date, trial_warning_sent
            FROM subscription_records
            WHERE partition_key = $1 AND row_key = $2
            "#,
        )
        .bind(SUBSCRIPTION_PARTITION)
        .bind(&row_key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(SubscriptionRecord::from))
    }

    /// Trialing records registered on `created_date` whose warning has not
    /// been sent yet
    pub async fn list_trial_warning_candidates(
        &self,
        created_date: &str,
    ) -> BillingResult<Vec<SubscriptionRecord>> {
        let rows: Vec<SubscriptionRow> = sqlx::query_as(
            r#"
            SELECT email, status, trial_end, current_period_end, cancel_at_period_end,
                   canceled_at, stripe_customer_id, stripe_subscription_id,
                   plan_id, plan_name, last_synced_at, created_date, trial_warning_sent
            FROM subscription_records
            WHERE partition_key = $1
              AND status = 'trialing'
              AND created_date = $2
              AND trial_warning_sent = FALSE
            "#,
        )
        .bind(SUBSCRIPTION_PARTITION)
        .bind(created_date)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(SubscriptionRecord::from).collect())
    }

    /// Flag a record so the trial warning is only ever sent once
    pub async fn mark_trial_warning_sent(&self, email: &str) -> BillingResult<()> {
        self.upsert_subscription(
            email,
            &SubscriptionUpdate {
                trial_warning_sent: Some(true),
                trial_warning_sent_at: Some(OffsetDateTime::now_utc()),
                ..Default::default()
            },
        )
        .await
    }

    /// Merge-upsert the user record for an email
    pub async fn upsert_user(&self, email: &str, update: &UserUpdate) -> BillingResult<()> {
        let email = normalize_email(email);
        let row_key = email_row_key(&email);

        sqlx::query(
            r#"
            INSERT INTO user_records (
                partition_key, row_key, email, name, facility,
                agreed_to_terms, agreed_to_privacy, consent_date, terms_version,
                contract_status, cancellation_otp, cancellation_otp_expires, session_token
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (partition_key, row_key) DO UPDATE SET
                email = EXCLUDED.email,
                name = COALESCE($4, user_records.name),
                facility = COALESCE($5, user_records.facility),
                agreed_to_terms = COALESCE($6, user_records.agreed_to_terms),
                agreed_to_privacy = COALESCE($7, user_records.agreed_to_privacy),
                consent_date = COALESCE($8, user_records.consent_date),
                terms_version = COALESCE($9, user_records.terms_version),
                contract_status = COALESCE($10, user_records.contract_status),
                cancellation_otp = COALESCE($11, user_records.cancellation_otp),
                cancellation_otp_expires = COALESCE($12, user_records.cancellation_otp_expires),
                session_token = COALESCE($13, user_records.session_token),
                updated_at = NOW()
            "#,
        )
        .bind(USER_PARTITION)
        .bind(&row_key)
        .bind(&email)
        .bind(update.name.as_ref())
        .bind(update.facility.as_ref())
        .bind(update.agreed_to_terms)
        .bind(update.agreed_to_privacy)
        .bind(update.consent_date)
        .bind(update.terms_version.as_ref())
        .bind(update.contract_status.as_ref())
        .bind(update.cancellation_otp.as_ref())
        .bind(update.cancellation_otp_expires)
        .bind(update.session_token.as_ref())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Fetch the user record for an email, `None` when absent
    pub async fn get_user(&self, email: &str) -> BillingResult<Option<UserRecord>> {
        let email = normalize_email(email);
        let row_key = email_row_key(&email);

        let row: Option<UserRecord> = sqlx::query_as(
            r#"
            SELECT email, name, facility, agreed_to_terms, agreed_to_privacy,
                   consent_date, terms_version, contract_status,
                   cancellation_otp, cancellation_otp_expires, session_token
            FROM user_records
            WHERE partition_key = $1 AND row_key = $2
            "#,
        )
        .bind(USER_PARTITION)
        .bind(&row_key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// Remove a consumed or superseded cancellation code
    ///
    /// Merge semantics cannot null a column, so clearing is explicit.
    pub async fn clear_cancellation_otp(&self, email: &str) -> BillingResult<()> {
        let email = normalize_email(email);
        let row_key = email_row_key(&email);

        sqlx::query(
            r#"
            UPDATE user_records
            SET cancellation_otp = NULL, cancellation_otp_expires = NULL, updated_at = NOW()
            WHERE partition_key = $1 AND row_key = $2
            "#,
        )
        .bind(USER_PARTITION)
        .bind(&row_key)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Record a receipt for a paid invoice, keyed by receipt number
    pub async fn upsert_receipt(&self, receipt: &ReceiptRecord) -> BillingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO receipts (
                partition_key, row_key, email, amount_minor, currency,
                stripe_invoice_id, stripe_customer_id, hosted_invoice_url,
                invoice_pdf_url, paid_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (partition_key, row_key) DO UPDATE SET
                email = COALESCE(EXCLUDED.email, receipts.email),
                amount_minor = EXCLUDED.amount_minor,
                currency = EXCLUDED.currency,
                hosted_invoice_url = COALESCE(EXCLUDED.hosted_invoice_url, receipts.hosted_invoice_url),
                invoice_pdf_url = COALESCE(EXCLUDED.invoice_pdf_url, receipts.invoice_pdf_url),
                paid_at = COALESCE(EXCLUDED.paid_at, receipts.paid_at)
            "#,
        )
        .bind(RECEIPT_PARTITION)
        .bind(&receipt.receipt_number)
        .bind(receipt.email.as_ref().map(|e| normalize_email(e)))
        .bind(receipt.amount_minor)
        .bind(&receipt.currency)
        .bind(receipt.stripe_invoice_id.as_ref())
        .bind(receipt.stripe_customer_id.as_ref())
        .bind(receipt.hosted_invoice_url.as_ref())
        .bind(receipt.invoice_pdf_url.as_ref())
        .bind(receipt.paid_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_trims_and_lowercases() {
        assert_eq!(normalize_email("  Test@Example.COM "), "test@example.com");
        assert_eq!(normalize_email("user@example.com"), "user@example.com");
    }

    #[test]
    fn row_key_is_deterministic() {
        let a = email_row_key(&normalize_email("Test@Example.COM"));
        let b = email_row_key(&normalize_email("test@example.com"));
        assert_eq!(a, b);
        assert_eq!(a, email_row_key("test@example.com"));
    }

    #[test]
    fn row_key_distinguishes_addresses() {
        assert_ne!(
            email_row_key("alice@example.com"),
            email_row_key("bob@example.com")
        );
    }

    #[test]
    fn row_key_matches_stored_encoding() {
        // Existing rows were written with standard base64 of the
        // lower-cased address; the key must stay byte-identical.
        assert_eq!(
            email_row_key("test@example.com"),
            "dGVzdEBleGFtcGxlLmNvbQ=="
        );
    }
}
