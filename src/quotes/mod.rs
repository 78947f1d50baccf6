//! Fee/policy quotes: identity-scoped, time-bounded fee schedules with
//! optional consolidation-policy overrides.
//!
//! Several quotes may be valid for one identity at once; the submission
//! engine evaluates all of them and keeps the best fee decision.

use crate::rpc::types::NetworkInfo;
use crate::store::Identity;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};

pub const FEE_TYPE_STANDARD: &str = "standard";
pub const FEE_TYPE_DATA: &str = "data";

/// Satoshis per byte-count unit, e.g. 500 satoshis / 1000 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeRate {
    pub satoshis: u64,
    pub bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fee {
    pub fee_type: String,
    pub mining_fee: FeeRate,
    pub relay_fee: FeeRate,
}

/// Consolidation-transaction acceptance thresholds. Defaults mirror the
/// node's; quotes may override individual values through their policies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsolidationParams {
    pub min_consolidation_factor: u64,
    pub max_consolidation_input_script_size: u64,
    pub min_conf_consolidation_input: u64,
    pub accept_non_std_consolidation_input: bool,
}

impl From<&NetworkInfo> for ConsolidationParams {
    fn from(info: &NetworkInfo) -> Self {
        ConsolidationParams {
            min_consolidation_factor: info.min_consolidation_factor,
            max_consolidation_input_script_size: info.max_consolidation_input_script_size,
            min_conf_consolidation_input: info.min_conf_consolidation_input,
            accept_non_std_consolidation_input: info.accept_non_std_consolidation_input,
        }
    }
}

mod policy_keys {
    pub const MIN_CONSOLIDATION_FACTOR: &str = "minconsolidationfactor";
    pub const MAX_CONSOLIDATION_INPUT_SCRIPT_SIZE: &str = "maxconsolidationinputscriptsize";
    pub const MIN_CONF_CONSOLIDATION_INPUT: &str = "minconfconsolidationinput";
    pub const ACCEPT_NON_STD_CONSOLIDATION_INPUT: &str = "acceptnonstdconsolidationinput";
}

#[derive(Debug, Clone)]
pub struct PolicyQuote {
    pub id: u64,
    pub created_at: SystemTime,
    pub valid_from: SystemTime,
    /// None for anonymous quotes usable by unauthenticated callers.
    pub identity: Option<Identity>,
    pub fees: Vec<Fee>,
    /// JSON object with node policy overrides, forwarded to the node on
    /// submission and consulted for consolidation thresholds.
    pub policies: Option<String>,
}

impl PolicyQuote {
    pub fn policies_map(&self) -> Option<serde_json::Map<String, serde_json::Value>> {
        self.policies
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
    }

    fn policy_u64(&self, key: &str) -> Option<u64> {
        self.policies_map()?.get(key)?.as_u64()
    }

    fn policy_bool(&self, key: &str) -> Option<bool> {
        self.policies_map()?.get(key)?.as_bool()
    }

    /// Node consolidation parameters with this quote's overrides applied.
    /// A zero confirmation override is ignored: the node treats zero as
    /// "use the default" and requires confirmed inputs.
    pub fn merged_consolidation_params(&self, base: &ConsolidationParams) -> ConsolidationParams {
        ConsolidationParams {
            min_consolidation_factor: self
                .policy_u64(policy_keys::MIN_CONSOLIDATION_FACTOR)
                .unwrap_or(base.min_consolidation_factor),
            max_consolidation_input_script_size: self
                .policy_u64(policy_keys::MAX_CONSOLIDATION_INPUT_SCRIPT_SIZE)
                .unwrap_or(base.max_consolidation_input_script_size),
            min_conf_consolidation_input: match self
                .policy_u64(policy_keys::MIN_CONF_CONSOLIDATION_INPUT)
            {
                Some(0) | None => base.min_conf_consolidation_input,
                Some(v) => v,
            },
            accept_non_std_consolidation_input: self
                .policy_bool(policy_keys::ACCEPT_NON_STD_CONSOLIDATION_INPUT)
                .unwrap_or(base.accept_non_std_consolidation_input),
        }
    }
}

/// Source of valid quotes for an identity. The quote catalogue itself is
/// managed outside the core.
pub trait QuoteProvider: Send + Sync {
    fn valid_quotes(&self, identity: Option<&Identity>) -> Vec<PolicyQuote>;
}

/// In-memory quote catalogue for dev/tests.
pub struct InMemQuoteProvider {
    quotes: RwLock<Vec<PolicyQuote>>,
    quote_validity: Duration,
}

impl InMemQuoteProvider {
    pub fn new(quote_validity: Duration) -> Self {
        Self {
            quotes: RwLock::new(Vec::new()),
            quote_validity,
        }
    }

    pub fn add(&self, quote: PolicyQuote) {
        self.quotes.write().push(quote);
    }
}

impl QuoteProvider for InMemQuoteProvider {
    fn valid_quotes(&self, identity: Option<&Identity>) -> Vec<PolicyQuote> {
        let now = SystemTime::now();
        self.quotes
            .read()
            .iter()
            .filter(|q| q.identity.as_ref() == identity)
            .filter(|q| {
                q.valid_from <= now
                    && now
                        .duration_since(q.valid_from)
                        .map(|age| age < self.quote_validity)
                        .unwrap_or(false)
            })
            .cloned()
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;

    /// Quote with one standard and one data fee, both satoshis/1000 bytes.
    pub fn quote(id: u64, standard: u64, data: u64) -> PolicyQuote {
        PolicyQuote {
            id,
            created_at: SystemTime::now(),
            valid_from: SystemTime::now(),
            identity: None,
            fees: vec![
                Fee {
                    fee_type: FEE_TYPE_STANDARD.into(),
                    mining_fee: FeeRate {
                        satoshis: standard,
                        bytes: 1000,
                    },
                    relay_fee: FeeRate {
                        satoshis: standard / 2,
                        bytes: 1000,
                    },
                },
                Fee {
                    fee_type: FEE_TYPE_DATA.into(),
                    mining_fee: FeeRate {
                        satoshis: data,
                        bytes: 1000,
                    },
                    relay_fee: FeeRate {
                        satoshis: data / 2,
                        bytes: 1000,
                    },
                },
            ],
            policies: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_params() -> ConsolidationParams {
        ConsolidationParams {
            min_consolidation_factor: 20,
            max_consolidation_input_script_size: 150,
            min_conf_consolidation_input: 6,
            accept_non_std_consolidation_input: false,
        }
    }

    #[test]
    fn policies_override_consolidation_params() {
        let mut quote = testutil::quote(1, 500, 250);
        quote.policies =
            Some(r#"{"minconsolidationfactor": 10, "minconfconsolidationinput": 0}"#.into());
        let merged = quote.merged_consolidation_params(&base_params());
        assert_eq!(merged.min_consolidation_factor, 10);
        // zero override falls back to the node default
        assert_eq!(merged.min_conf_consolidation_input, 6);
        assert_eq!(merged.max_consolidation_input_script_size, 150);
    }

    #[test]
    fn provider_filters_by_identity_and_validity() {
        let provider = InMemQuoteProvider::new(Duration::from_secs(600));
        let mut anonymous = testutil::quote(1, 500, 250);
        anonymous.valid_from = SystemTime::now() - Duration::from_secs(10);
        provider.add(anonymous);

        let mut scoped = testutil::quote(2, 300, 150);
        scoped.identity = Some(Identity {
            name: "merchant".into(),
            provider: "issuer".into(),
        });
        scoped.valid_from = SystemTime::now() - Duration::from_secs(10);
        provider.add(scoped);

        let mut expired = testutil::quote(3, 100, 50);
        expired.valid_from = SystemTime::now() - Duration::from_secs(3600);
        provider.add(expired);

        let anon = provider.valid_quotes(None);
        assert_eq!(anon.len(), 1);
        assert_eq!(anon[0].id, 1);

        let identity = Identity {
            name: "merchant".into(),
            provider: "issuer".into(),
        };
        let scoped = provider.valid_quotes(Some(&identity));
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].id, 2);
    }

    #[test]
    fn future_quotes_are_not_valid_yet() {
        let provider = InMemQuoteProvider::new(Duration::from_secs(600));
        let mut future = testutil::quote(1, 500, 250);
        future.valid_from = SystemTime::now() + Duration::from_secs(60);
        provider.add(future);
        assert!(provider.valid_quotes(None).is_empty());
    }
}
