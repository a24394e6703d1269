use std::env;
use std::sync::OnceLock;

static GRAPH_FUSER_MAX_PASSES: OnceLock<Option<usize>> = OnceLock::new();
static GRAPH_FUSER_VERIFY: OnceLock<bool> = OnceLock::new();

pub(crate) fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

pub(crate) fn parse_pass_cap(value: &str) -> Option<usize> {
    match value.trim().parse::<usize>() {
        Ok(0) | Err(_) => None,
        Ok(cap) => Some(cap),
    }
}

/// Cap on fixed-point passes, `None` when unset or not a positive integer.
pub(crate) fn max_passes() -> Option<usize> {
    *GRAPH_FUSER_MAX_PASSES.get_or_init(|| match env::var("GRAPH_FUSER_MAX_PASSES") {
        Ok(value) => parse_pass_cap(&value),
        Err(_) => None,
    })
}

pub(crate) fn verify_enabled() -> bool {
    *GRAPH_FUSER_VERIFY.get_or_init(|| match env::var("GRAPH_FUSER_VERIFY") {
        Ok(value) if !value.trim().is_empty() => parse_bool(&value),
        _ => false,
    })
}
