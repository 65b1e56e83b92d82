/// Input sanitization utilities every handler runs on user-supplied
/// strings before they reach the data model.

/// Accepts a hostname (RFC 1123 labels) or a bare IPv4/IPv6 literal.
pub fn is_valid_host_or_ip(value: &str) -> bool {
    let value = value.trim();
    if value.is_empty() || value.len() > 255 {
        return false;
    }
    if value.parse::<std::net::IpAddr>().is_ok() {
        return true;
    }
    value.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && label.chars().next().map(|c| c.is_ascii_alphanumeric()).unwrap_or(false)
            && label.chars().last().map(|c| c.is_ascii_alphanumeric()).unwrap_or(false)
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    })
}

pub fn is_valid_port(port: i64) -> bool {
    (1..=65535).contains(&port)
}

/// Trims whitespace, strips embedded NUL bytes, and caps length. Returns
/// `None` if the result is empty when `allow_empty` is false.
pub fn sanitize_string(value: &str, max_len: usize, allow_empty: bool) -> Option<String> {
    let cleaned: String = value.chars().filter(|c| *c != '\0').collect();
    let trimmed = cleaned.trim();
    if trimmed.is_empty() && !allow_empty {
        return None;
    }
    Some(trimmed.chars().take(max_len).collect())
}

/// Strips HTML tags from a string, keeping their text content -- a
/// conservative defusal for fields later rendered by a browser-based
/// frontend, not a full HTML parser.
pub fn strip_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut in_tag = false;
    for c in value.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_hostnames_and_ip_literals() {
        assert!(is_valid_host_or_ip("web1.example.com"));
        assert!(is_valid_host_or_ip("10.0.0.5"));
        assert!(is_valid_host_or_ip("::1"));
        assert!(!is_valid_host_or_ip(""));
        assert!(!is_valid_host_or_ip("-bad-.com"));
    }

    #[test]
    fn port_range_is_enforced() {
        assert!(is_valid_port(22));
        assert!(is_valid_port(65535));
        assert!(!is_valid_port(0));
        assert!(!is_valid_port(70000));
    }

    #[test]
    fn sanitize_string_strips_nul_and_trims_and_caps_length() {
        let out = sanitize_string("  hi\0 there  ", 5, false).unwrap();
        assert_eq!(out, "hi th");
    }

    #[test]
    fn sanitize_string_rejects_empty_unless_allowed() {
        assert!(sanitize_string("   ", 10, false).is_none());
        assert_eq!(sanitize_string("   ", 10, true).unwrap(), "");
    }

    #[test]
    fn strip_html_removes_tags_but_keeps_text() {
        assert_eq!(strip_html("<b>hello</b> <script>evil()</script>world"), "hello world");
    }
}
