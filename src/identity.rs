//! Identity resolution
//!
//! Turns whatever a source gives us for "who was paid" into a wallet address plus, when one can
//! be found, a human display name. Inputs seen in practice:
//!
//! - plain addresses (`0x45334f41...`)
//! - ENS names (`alice.eth`, sometimes with a trailing `streams` / `wallet` token)
//! - spreadsheet hyperlink formulas:
//!   `=HYPERLINK("https://optimistic.etherscan.io/address/0x4533...","alice.eth streams")`
//!
//! [`resolve`] never fails. A record with no extractable address gets an empty
//! [`ResolvedIdentity::address`] and is dropped by the aggregator.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

static PREFIXED_ADDRESS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"0[xX]([0-9a-fA-F]{40})").expect("valid address regex"));
static BARE_ADDRESS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([0-9a-fA-F]{40})\b").expect("valid bare address regex"));
static HYPERLINK_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)=HYPERLINK\(".*?","(.*)"\)"#).expect("valid hyperlink regex"));
static LABEL_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\s+(streams?|cohorts?|wallet)$").expect("valid suffix regex"));

/// Longest display name accepted before falling back to the short address.
pub const MAX_DISPLAY_NAME_LEN: usize = 50;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolvedIdentity {
    /// Lowercase `0x`-prefixed 40-hex address, or empty.
    pub address: String,
    pub display_name: String,
}

impl ResolvedIdentity {
    pub fn has_address(&self) -> bool {
        !self.address.is_empty()
    }

    /// Display name if it is presentable, otherwise the shortened address.
    pub fn display_or_short(&self) -> String {
        display_or_short(&self.display_name, &self.address)
    }
}

pub fn resolve(raw: &str) -> ResolvedIdentity {
    ResolvedIdentity {
        address: extract_address(raw).unwrap_or_default(),
        display_name: parse_display_name(raw),
    }
}

/// Find the first wallet address in `raw` and return it lowercased with its `0x` prefix.
pub fn extract_address(raw: &str) -> Option<String> {
    if let Some(caps) = PREFIXED_ADDRESS.captures(raw) {
        return Some(format!("0x{}", caps[1].to_ascii_lowercase()));
    }
    BARE_ADDRESS
        .captures(raw)
        .map(|caps| format!("0x{}", caps[1].to_ascii_lowercase()))
}

/// Display name carried by a hyperlink label or ENS string; empty when there is none.
pub fn parse_display_name(raw: &str) -> String {
    if raw.is_empty() {
        return String::new();
    }

    if let Some(caps) = HYPERLINK_LABEL.captures(raw) {
        let label = strip_label_suffix(caps[1].trim());
        if label.contains(".eth") {
            return label;
        }
        let len = label.chars().count();
        if !label.is_empty()
            && !label.starts_with("0x")
            && !label.contains("http")
            && len > 2
            && len < 30
        {
            return label;
        }
    }

    if raw.contains(".eth") && !raw.contains('=') {
        return strip_label_suffix(raw.trim());
    }

    // Plain addresses, leftover hyperlink artifacts and anything else fall back to the
    // shortened address at render time.
    String::new()
}

fn strip_label_suffix(label: &str) -> String {
    LABEL_SUFFIX.replace(label, "").trim().to_string()
}

/// Whether a display name can be shown as-is.
pub fn is_presentable(name: &str) -> bool {
    !name.is_empty()
        && !name.to_ascii_uppercase().contains("=HYPERLINK")
        && !name.contains("https://")
        && name.chars().count() <= MAX_DISPLAY_NAME_LEN
}

/// `0x1234...abcd` style rendering of an address.
pub fn short_address(address: &str) -> String {
    let chars: Vec<char> = address.chars().collect();
    if chars.len() <= 10 {
        return address.to_string();
    }
    let head: String = chars[..6].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}

pub fn display_or_short(display_name: &str, address: &str) -> String {
    if is_presentable(display_name) {
        display_name.to_string()
    } else {
        short_address(address)
    }
}
