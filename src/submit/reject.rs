//! Node reject-code policy: which rejections count as success, which are
//! retryable mempool conditions, and the client-facing descriptions built
//! from them.

/// Node reject code for "transaction already known".
pub const REJECT_ALREADY_KNOWN: i32 = 257;
/// Node reject code for "conflicting transaction already in mempool".
pub const REJECT_MEMPOOL_CONFLICT: i32 = 258;
/// Node reject code for a detected double spend.
pub const REJECT_DOUBLE_SPEND: i32 = 18;
/// Node reject code family for non-standard transactions.
pub const REJECT_NONSTANDARD: i32 = 64;
/// Node reject code family for insufficient fee/priority.
pub const REJECT_INSUFFICIENT_FEE: i32 = 66;

/// Reject codes that mean the node already has the transaction; a submit
/// that hits one of these is a success from the client's point of view.
pub const SUCCESS_CODES: &[i32] = &[REJECT_ALREADY_KNOWN, REJECT_MEMPOOL_CONFLICT];

/// Combined code+reason prefixes for transient mempool conditions. A
/// rejection matching one of these should clear on resubmission, so it is
/// reported as a retryable mempool error instead of a hard failure.
pub const RETRYABLE_PREFIXES: &[&str] = &[
    "64 too-long-mempool-chain",
    "66 insufficient priority",
    "mempool full",
    "non-final-pool-full",
];

pub const RESULT_ALREADY_KNOWN: &str = "Transaction already known";
pub const MEMPOOL_ERROR: &str = "Mempool error";
pub const EVICTED: &str = "evicted";
pub const MISSING_INPUTS: &str = "Missing inputs";
pub const NOT_ENOUGH_FEES: &str = "Not enough fees";
pub const UNCONFIRMED_ANCESTORS_ERROR: &str = "Error fetching unconfirmed ancestors";

/// "64 too-long-mempool-chain", "66", "mempool full", ...
pub fn combine_code_and_reason(code: Option<i32>, reason: Option<&str>) -> String {
    match (code, reason) {
        (Some(code), Some(reason)) if !reason.is_empty() => format!("{} {}", code, reason),
        (Some(code), _) => code.to_string(),
        (None, Some(reason)) => reason.to_string(),
        (None, None) => String::new(),
    }
}

pub fn is_success_code(code: Option<i32>) -> bool {
    matches!(code, Some(c) if SUCCESS_CODES.contains(&c))
}

pub fn is_retryable(combined: &str) -> bool {
    RETRYABLE_PREFIXES.iter().any(|p| combined.starts_with(p))
}

/// Client-facing description for a retryable mempool condition.
pub fn mempool_error_with(details: &str) -> String {
    format!("{} ({})", MEMPOOL_ERROR, details)
}

/// Matches both the engine's own description and the node reject reason.
pub fn is_missing_inputs(description: &str) -> bool {
    description.starts_with(MISSING_INPUTS) || description.contains("missing-inputs")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combine_variants() {
        assert_eq!(
            combine_code_and_reason(Some(64), Some("too-long-mempool-chain")),
            "64 too-long-mempool-chain"
        );
        assert_eq!(combine_code_and_reason(Some(16), None), "16");
        assert_eq!(combine_code_and_reason(None, Some("mempool full")), "mempool full");
        assert_eq!(combine_code_and_reason(None, None), "");
    }

    #[test]
    fn retryable_matches_prefix_only() {
        assert!(is_retryable("mempool full"));
        assert!(is_retryable("64 too-long-mempool-chain: 25 ancestors"));
        assert!(!is_retryable("16 bad-txns-inputs-spent"));
        assert!(!is_retryable("64 scriptsig-not-pushonly"));
    }

    #[test]
    fn success_codes() {
        assert!(is_success_code(Some(257)));
        assert!(is_success_code(Some(258)));
        assert!(!is_success_code(Some(16)));
        assert!(!is_success_code(None));
    }

    #[test]
    fn missing_inputs_detection() {
        assert!(is_missing_inputs("Missing inputs"));
        assert!(is_missing_inputs("Missing inputs - invalid output index"));
        assert!(is_missing_inputs("16 missing-inputs"));
        assert!(!is_missing_inputs("Not enough fees"));
    }
}
