//! Transactional email service
//!
//! Sends notifications over the Resend HTTP API. Sends never fail the
//! surrounding operation: every call returns an [`EmailOutcome`] so callers
//! log the suppressed-failure path instead of swallowing it.

use std::sync::Arc;

use serde_json::json;
use time::macros::format_description;
use time::OffsetDateTime;

const RESEND_API_URL: &str = "https://api.resend.com/emails";

/// Email configuration, constructed once and injected
#[derive(Debug, Clone)]
pub struct EmailConfig {
    /// Resend API key; `None` disables sending entirely
    pub resend_api_key: Option<String>,
    /// Sender address
    pub sender: String,
}

impl EmailConfig {
    pub fn from_env() -> Self {
        Self {
            resend_api_key: std::env::var("RESEND_API_KEY").ok().filter(|k| !k.is_empty()),
            sender: std::env::var("EMAIL_SENDER")
                .unwrap_or_else(|_| "no-reply@karte-ai-plus.com".to_string()),
        }
    }
}

/// Result of an attempted send
#[derive(Debug, Clone, PartialEq)]
pub enum EmailOutcome {
    Sent,
    /// Not attempted (e.g. sending disabled); carries the reason
    Skipped(&'static str),
    /// Attempted and failed; carries the reason
    Failed(String),
}

impl EmailOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, EmailOutcome::Sent)
    }

    /// Log the outcome with a label for the notification kind
    pub fn log(&self, kind: &str, to: &str) {
        match self {
            EmailOutcome::Sent => tracing::info!(kind = kind, to = to, "Email sent"),
            EmailOutcome::Skipped(reason) => {
                tracing::warn!(kind = kind, to = to, reason = reason, "Email skipped")
            }
            EmailOutcome::Failed(reason) => {
                tracing::error!(kind = kind, to = to, reason = %reason, "Email send failed")
            }
        }
    }
}

/// Billing notification sender
#[derive(Clone)]
pub struct BillingEmailService {
    config: Arc<EmailConfig>,
    http: reqwest::Client,
}

impl BillingEmailService {
    pub fn new(config: EmailConfig) -> Self {
        Self {
            config: Arc::new(config),
            http: reqwest::Client::new(),
        }
    }

    pub fn from_env() -> Self {
        Self::new(EmailConfig::from_env())
    }

    pub fn is_enabled(&self) -> bool {
        self.config.resend_api_key.is_some()
    }

    async fn send(&self, to: &str, subject: &str, text: &str, html: &str) -> EmailOutcome {
        let Some(api_key) = self.config.resend_api_key.as_deref() else {
            return EmailOutcome::Skipped("email sending not configured");
        };

        let body = json!({
            "from": self.config.sender,
            "to": [to],
            "subject": subject,
            "text": text,
            "html": html,
        });

        let response = self
            .http
            .post(RESEND_API_URL)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => EmailOutcome::Sent,
            Ok(resp) => {
                let status = resp.status();
                let detail = resp.text().await.unwrap_or_default();
                EmailOutcome::Failed(format!("resend returned {}: {}", status, detail))
            }
            Err(e) => EmailOutcome::Failed(e.to_string()),
        }
    }

    /// Welcome mail after a completed checkout
    pub async fn send_welcome(&self, to: &str) -> EmailOutcome {
        let subject = "Karte AI+へようこそ";
        let text = "Karte AI+にご登録いただき、誠にありがとうございます。\n\
                    2週間のお試し期間が開始されました。期間中はすべての機能をご利用いただけます。\n\n\
                    ご不明な点がございましたら、お気軽にお問い合わせください。";
        let html = "<p>Karte AI+にご登録いただき、誠にありがとうございます。</p>\
                    <p>2週間のお試し期間が開始されました。期間中はすべての機能をご利用いただけます。</p>\
                    <p>ご不明な点がございましたら、お気軽にお問い合わせください。</p>";
        self.send(to, subject, text, html).await
    }

    /// Trial converted to a paid subscription
    pub async fn send_trial_ended(&self, to: &str) -> EmailOutcome {
        let subject = "お試し期間が終了し、本契約へ移行しました";
        let text = "お試し期間が終了し、有料プランでのご利用が開始されました。\n\
                    引き続きKarte AI+をよろしくお願いいたします。";
        let html = "<p>お試し期間が終了し、有料プランでのご利用が開始されました。</p>\
                    <p>引き続きKarte AI+をよろしくお願いいたします。</p>";
        self.send(to, subject, text, html).await
    }

    /// Cancellation has been scheduled for the period end
    pub async fn send_cancellation_scheduled(
        &self,
        to: &str,
        period_end: Option<OffsetDateTime>,
    ) -> EmailOutcome {
        let end = format_end_date(period_end);
        let subject = "解約のご予約を受け付けました";
        let text = format!(
            "解約のご予約を受け付けました。\n{}まではこれまで通りご利用いただけます。\n\
             期間終了後、ご請求は停止いたします。",
            end
        );
        let html = format!(
            "<p>解約のご予約を受け付けました。</p>\
             <p><b>{}</b>まではこれまで通りご利用いただけます。期間終了後、ご請求は停止いたします。</p>",
            end
        );
        self.send(to, subject, &text, &html).await
    }

    /// Subscription fully canceled on the processor side
    pub async fn send_cancellation(
        &self,
        to: &str,
        period_end: Option<OffsetDateTime>,
    ) -> EmailOutcome {
        let end = format_end_date(period_end);
        let subject = "解約手続きが完了しました";
        let text = format!(
            "Karte AI+の解約手続きが完了しました。\nご利用可能期間: {}まで\n\
             これまでのご利用、誠にありがとうございました。",
            end
        );
        let html = format!(
            "<p>Karte AI+の解約手続きが完了しました。</p>\
             <p>ご利用可能期間: <b>{}</b>まで</p>\
             <p>これまでのご利用、誠にありがとうございました。</p>",
            end
        );
        self.send(to, subject, &text, &html).await
    }

    /// Invoice payment failed
    pub async fn send_payment_failed(
        &self,
        to: &str,
        amount_minor: i64,
        currency: &str,
        invoice_url: Option<&str>,
    ) -> EmailOutcome {
        let amount = format!("{} {}", amount_minor / 100, currency.to_uppercase());
        let subject = "お支払いに失敗しました（Karte AI+）";
        let mut text = format!(
            "お支払いに失敗しました。金額: {}\nご利用を継続するにはお支払い方法の更新が必要です。",
            amount
        );
        let mut html = format!(
            "<p>お支払いに失敗しました。ご利用を継続するにはお支払い方法の更新が必要です。</p>\
             <p>金額: <b>{}</b></p>",
            amount
        );
        if let Some(url) = invoice_url {
            text.push_str(&format!("\nお支払いはこちら: {}", url));
            html.push_str(&format!("<p><a href=\"{}\">お支払い手続きへ</a></p>", url));
        }
        self.send(to, subject, &text, &html).await
    }

    /// Receipt for a paid invoice; content built by [`crate::receipt`]
    pub async fn send_receipt(&self, to: &str, receipt: &crate::receipt::ReceiptEmail) -> EmailOutcome {
        self.send(to, &receipt.subject, &receipt.text, &receipt.html)
            .await
    }

    /// One-time warning before the trial converts to a paid plan
    pub async fn send_trial_warning(&self, to: &str, name: Option<&str>) -> EmailOutcome {
        let display_name = name
            .map(|n| n.to_string())
            .unwrap_or_else(|| to.split('@').next().unwrap_or(to).to_string());
        let subject = "【重要】お試し期間がまもなく終了します";
        let text = format!(
            "{} 様\n\n\
             この度は、Karte AI+をご利用いただき、誠にありがとうございます。\n\n\
             お試し期間（2週間）がまもなく終了いたします。\n\
             このままご利用を継続される場合、お試し期間終了後、自動的に有料プランへ移行いたします。\n\n\
             ご不明な点がございましたら、お気軽にお問い合わせください。",
            display_name
        );
        let html = format!(
            "<p>{} 様</p>\
             <p>この度は、Karte AI+をご利用いただき、誠にありがとうございます。</p>\
             <p><b>【重要】お試し期間（2週間）がまもなく終了いたします。</b></p>\
             <p>このままご利用を継続される場合、お試し期間終了後、自動的に有料プランへ移行いたします。</p>\
             <p>ご不明な点がございましたら、お気軽にお問い合わせください。</p>",
            display_name
        );
        self.send(to, subject, &text, &html).await
    }

    /// Cancellation confirmation code
    pub async fn send_cancellation_otp(&self, to: &str, code: &str) -> EmailOutcome {
        let subject = "Karte AI+ 解約確認コード";
        let text = format!("解約確認コード: {}\n有効期限は10分間です。", code);
        let html = format!(
            "<p>解約確認コード: <strong>{}</strong></p><p>有効期限は10分間です。</p>",
            code
        );
        self.send(to, subject, &text, &html).await
    }

    /// Service agreement copy after consent
    pub async fn send_agreement(&self, to: &str) -> EmailOutcome {
        let subject = "Karte AI+ 利用規約への同意を受け付けました";
        let text = "利用規約およびプライバシーポリシーへのご同意を受け付けました。\n\
                    本メールをもって同意の控えとさせていただきます。";
        let html = "<p>利用規約およびプライバシーポリシーへのご同意を受け付けました。</p>\
                    <p>本メールをもって同意の控えとさせていただきます。</p>";
        self.send(to, subject, text, html).await
    }
}

/// Render a period end for email copy; "近日中" when unknown
fn format_end_date(period_end: Option<OffsetDateTime>) -> String {
    let fmt = format_description!("[year]年[month]月[day]日");
    period_end
        .and_then(|end| end.format(&fmt).ok())
        .unwrap_or_else(|| "近日中".to_string())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use time::macros::datetime;

    #[test]
    fn end_date_formats_japanese_calendar_date() {
        let end = datetime!(2026-03-05 12:00 UTC);
        assert_eq!(format_end_date(Some(end)), "2026年03月05日");
    }

    #[test]
    fn end_date_falls_back_when_unknown() {
        assert_eq!(format_end_date(None), "近日中");
    }

    #[tokio::test]
    async fn unconfigured_service_skips_instead_of_failing() {
        let service = BillingEmailService::new(EmailConfig {
            resend_api_key: None,
            sender: "no-reply@karte-ai-plus.com".to_string(),
        });
        let outcome = service.send_welcome("user@example.com").await;
        assert_eq!(outcome, EmailOutcome::Skipped("email sending not configured"));
        assert!(!outcome.is_sent());
    }
}
