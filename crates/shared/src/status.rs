//! Subscription status model
//!
//! The status mirrors the payment processor's last-known value. The store is
//! a cache; it never originates a status on its own. Processor statuses
//! outside the modeled set (incomplete, unpaid, paused) collapse to
//! `Inactive`, which is also the default when no record exists.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Trialing,
    Active,
    PastDue,
    Canceled,
    #[default]
    Inactive,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Trialing => "trialing",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Canceled => "canceled",
            SubscriptionStatus::Inactive => "inactive",
        }
    }

    /// Parse a processor status string, collapsing unknown values to `Inactive`
    pub fn parse(s: &str) -> Self {
        match s {
            "trialing" => SubscriptionStatus::Trialing,
            "active" => SubscriptionStatus::Active,
            "past_due" => SubscriptionStatus::PastDue,
            "canceled" => SubscriptionStatus::Canceled,
            _ => SubscriptionStatus::Inactive,
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_round_trips_known_statuses() {
        for status in [
            SubscriptionStatus::Trialing,
            SubscriptionStatus::Active,
            SubscriptionStatus::PastDue,
            SubscriptionStatus::Canceled,
            SubscriptionStatus::Inactive,
        ] {
            assert_eq!(SubscriptionStatus::parse(status.as_str()), status);
        }
    }

    #[test]
    fn parse_collapses_unknown_to_inactive() {
        assert_eq!(
            SubscriptionStatus::parse("incomplete"),
            SubscriptionStatus::Inactive
        );
        assert_eq!(
            SubscriptionStatus::parse("unpaid"),
            SubscriptionStatus::Inactive
        );
        assert_eq!(SubscriptionStatus::parse(""), SubscriptionStatus::Inactive);
    }
}
