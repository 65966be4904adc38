use crate::error::{Error, Result};

/// Normalizes a domain name to its lowercase ASCII (punycode) form for use
/// as a storage key and in ACME orders.
pub fn normalize_domain(input: &str) -> Result<String> {
    let trimmed = input.trim().trim_end_matches('.');
    if trimmed.is_empty() {
        return Err(Error::InvalidDomain("domain name is required".into()));
    }
    if trimmed.starts_with("*.") {
        return Err(Error::InvalidDomain(
            "wildcard domains are not supported".into(),
        ));
    }
    let ascii =
        idna::domain_to_ascii(trimmed).map_err(|err| Error::InvalidDomain(err.to_string()))?;
    Ok(ascii.to_lowercase())
}

/// Normalizes a zone name the same way, stripping any leading label dots.
pub fn normalize_zone(raw: &str) -> Result<String> {
    let stripped = raw.trim().trim_start_matches('.').trim_end_matches('.');
    if stripped.is_empty() {
        return Err(Error::InvalidDomain("zone name is required".into()));
    }
    normalize_domain(stripped)
}

/// Derives the registrable zone from a hostname when no explicit zone is
/// configured. Last two labels only; multi-label public suffixes need an
/// explicit zone in the challenge config.
pub fn derive_zone(hostname: &str) -> String {
    let parts: Vec<&str> = hostname.trim_end_matches('.').split('.').collect();
    if parts.len() >= 2 {
        format!("{}.{}", parts[parts.len() - 2], parts[parts.len() - 1])
    } else {
        hostname.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_case_and_trailing_dot() {
        assert_eq!(normalize_domain("Example.COM.").unwrap(), "example.com");
    }

    #[test]
    fn normalizes_idn_to_punycode() {
        assert_eq!(normalize_domain("testé.fr").unwrap(), "xn--test-epa.fr");
    }

    #[test]
    fn rejects_empty_domain() {
        assert!(matches!(normalize_domain("  "), Err(Error::InvalidDomain(_))));
    }

    #[test]
    fn rejects_wildcard() {
        assert!(matches!(
            normalize_domain("*.example.com"),
            Err(Error::InvalidDomain(_))
        ));
    }

    #[test]
    fn derives_two_label_zone() {
        assert_eq!(derive_zone("www.example.com"), "example.com");
        assert_eq!(derive_zone("example.com"), "example.com");
        assert_eq!(derive_zone("localhost"), "localhost");
    }
}
