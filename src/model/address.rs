//! Email address extraction from header values.

use std::sync::LazyLock;

use regex::Regex;

/// Loose `local@domain` matcher. Dotless domains (`user@localhost`) are
/// accepted, since internal relays use them.
static ADDRESS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z0-9_.+\-]+@[A-Za-z0-9\-]+(?:\.[A-Za-z0-9\-]+)*")
        .expect("address pattern is valid")
});

/// Return every address found in a header value, in order of appearance.
///
/// # Examples
/// - `"Data string name@mail.mil and some more."` → `["name@mail.mil"]`
/// - `"Juan <juan@ejemplo.com>, ana@b.org"` → `["juan@ejemplo.com", "ana@b.org"]`
pub fn find_addresses(raw: &str) -> Vec<String> {
    ADDRESS_RE
        .find_iter(raw)
        .map(|m| trim_address(m.as_str()).to_string())
        .filter(|a| is_well_formed(a))
        .collect()
}

/// Return the first well-formed address in a header value, if any.
pub fn first_address(raw: &str) -> Option<String> {
    find_addresses(raw).into_iter().next()
}

/// Dots are legal inside the match but never at either end of an address.
fn trim_address(addr: &str) -> &str {
    addr.trim_matches('.')
}

fn is_well_formed(addr: &str) -> bool {
    match addr.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.is_empty()
                && !domain.starts_with('-')
                && !domain.contains("..")
        }
        None => false,
    }
}
