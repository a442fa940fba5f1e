//! Receipt email construction
//!
//! Builds the receipt notification for a paid invoice. Content generation is
//! pure so it can be tested without a Stripe payload.

use time::macros::format_description;
use time::OffsetDateTime;

use crate::store::ReceiptRecord;

/// Rendered receipt email content
#[derive(Debug, Clone)]
pub struct ReceiptEmail {
    pub subject: String,
    pub text: String,
    pub html: String,
}

/// Extract the stored receipt fields from a paid invoice
pub fn receipt_record_from_invoice(
    invoice: &stripe::Invoice,
    email: Option<String>,
) -> ReceiptRecord {
    let receipt_number = invoice
        .number
        .clone()
        .unwrap_or_else(|| invoice.id.to_string());
    let amount_minor = invoice.amount_paid.or(invoice.amount_due).unwrap_or(0);
    let currency = invoice
        .currency
        .as_ref()
        .map(|c| c.to_string())
        .unwrap_or_else(|| "jpy".to_string());
    let paid_at = invoice
        .status_transitions
        .as_ref()
        .and_then(|t| t.paid_at)
        .or(invoice.created)
        .and_then(|ts| OffsetDateTime::from_unix_timestamp(ts).ok());
    let stripe_customer_id = match &invoice.customer {
        Some(stripe::Expandable::Id(id)) => Some(id.to_string()),
        Some(stripe::Expandable::Object(c)) => Some(c.id.to_string()),
        None => None,
    };

    ReceiptRecord {
        receipt_number,
        email,
        amount_minor,
        currency,
        stripe_invoice_id: Some(invoice.id.to_string()),
        stripe_customer_id,
        hosted_invoice_url: invoice.hosted_invoice_url.clone(),
        invoice_pdf_url: invoice.invoice_pdf.clone(),
        paid_at,
    }
}

/// Render the receipt email for a stored receipt
pub fn build_receipt_email(receipt: &ReceiptRecord) -> ReceiptEmail {
    let fmt = format_description!("[year]年[month]月[day]日 [hour]:[minute]");
    let paid_at = receipt
        .paid_at
        .and_then(|t| t.format(&fmt).ok())
        .unwrap_or_else(|| "-".to_string());
    let amount = format_yen(receipt.amount_minor);
    let currency = receipt.currency.to_uppercase();

    let subject = format!("【領収書】#{}", receipt.receipt_number);

    let mut text_lines = vec![
        "領収書（Receipt）".to_string(),
        format!("伝票番号: {}", receipt.receipt_number),
        format!("決済日時: {}", paid_at),
        format!("金額: {} ({})", amount, currency),
        "発行者: Karte AI+".to_string(),
    ];
    if let Some(url) = &receipt.hosted_invoice_url {
        text_lines.push(format!("請求書: {}", url));
    }
    if let Some(url) = &receipt.invoice_pdf_url {
        text_lines.push(format!("PDF: {}", url));
    }
    let text = text_lines.join("\n");

    let mut html = format!(
        "<div><h2>領収書（Receipt）</h2>\
         <p><b>伝票番号:</b> {}</p>\
         <p><b>決済日時:</b> {}</p>\
         <p><b>金額:</b> {} ({})</p>\
         <p><b>発行者:</b> Karte AI+</p>",
        receipt.receipt_number, paid_at, amount, currency
    );
    if let Some(url) = &receipt.hosted_invoice_url {
        html.push_str(&format!("<p><a href=\"{}\">請求書を表示</a></p>", url));
    }
    if let Some(url) = &receipt.invoice_pdf_url {
        html.push_str(&format!("<p><a href=\"{}\">PDFをダウンロード</a></p>", url));
    }
    html.push_str("</div>");

    ReceiptEmail {
        subject,
        text,
        html,
    }
}

/// Format a minor-unit amount as yen with thousands separators
fn format_yen(amount_minor: i64) -> String {
    format!("¥{}", group_thousands(amount_minor / 100))
}

fn group_thousands(n: i64) -> String {
    let digits = n.abs().to_string();
    let mut out = String::new();
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    if n < 0 {
        format!("-{}", out)
    } else {
        out
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use time::macros::datetime;

    fn receipt() -> ReceiptRecord {
        ReceiptRecord {
            receipt_number: "INV-2026-0042".to_string(),
            email: Some("user@example.com".to_string()),
            amount_minor: 298_000,
            currency: "jpy".to_string(),
            stripe_invoice_id: Some("in_123".to_string()),
            stripe_customer_id: Some("cus_123".to_string()),
            hosted_invoice_url: Some("https://invoice.example/abc".to_string()),
            invoice_pdf_url: None,
            paid_at: Some(datetime!(2026-02-01 09:30 UTC)),
        }
    }

    #[test]
    fn yen_formatting_groups_thousands() {
        assert_eq!(format_yen(298_000), "¥2,980");
        assert_eq!(format_yen(100), "¥1");
        assert_eq!(format_yen(0), "¥0");
        assert_eq!(format_yen(123_456_700), "¥1,234,567");
    }

    #[test]
    fn email_carries_number_amount_and_links() {
        let email = build_receipt_email(&receipt());
        assert_eq!(email.subject, "【領収書】#INV-2026-0042");
        assert!(email.text.contains("¥2,980"));
        assert!(email.text.contains("JPY"));
        assert!(email.text.contains("https://invoice.example/abc"));
        assert!(!email.text.contains("PDF:"));
        assert!(email.html.contains("INV-2026-0042"));
    }
}
