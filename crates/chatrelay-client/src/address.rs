//! Recipient addressing — phone numbers to protocol addresses
//!
//! Addresses take the form `<user>@<server>`, with an optional `:<device>`
//! suffix on the user part for multi-device senders.

/// Server suffix for individual users
pub const USER_SERVER: &str = "s.whatsapp.net";

/// Legacy server suffix some clients still report for individual users
const LEGACY_USER_SERVER: &str = "c.us";

/// Whether `to` already looks like `<digits>@<server>`.
///
/// The user part may contain `-` (group ids are `<digits>-<digits>`).
pub fn is_address(to: &str) -> bool {
    match to.split_once('@') {
        Some((user, server)) => {
            !user.is_empty()
                && !server.is_empty()
                && user.chars().any(|c| c.is_ascii_digit())
                && user.chars().all(|c| c.is_ascii_digit() || c == '-')
        }
        None => false,
    }
}

/// Turn a user-supplied recipient into a protocol address.
///
/// Anything that already looks like an address passes through untouched.
/// Otherwise every non-digit is stripped and the user server is appended.
/// Returns `None` when no digits are left.
pub fn normalize_recipient(to: &str) -> Option<String> {
    let to = to.trim();
    if is_address(to) {
        return Some(to.to_string());
    }
    let digits: String = to.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    Some(format!("{}@{}", digits, USER_SERVER))
}

/// Reduce a sender address to its bare user form.
///
/// Drops the `:<device>` suffix and rewrites the legacy user server.
/// Inputs without `@` are returned unchanged.
pub fn normalize_user(address: &str) -> String {
    let Some((user, server)) = address.split_once('@') else {
        return address.to_string();
    };
    let user = user.split_once(':').map(|(u, _)| u).unwrap_or(user);
    let server = if server == LEGACY_USER_SERVER {
        USER_SERVER
    } else {
        server
    };
    format!("{}@{}", user, server)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_bare_number() {
        assert_eq!(
            normalize_recipient("5511999999999").as_deref(),
            Some("5511999999999@s.whatsapp.net")
        );
    }

    #[test]
    fn test_normalize_strips_formatting() {
        assert_eq!(
            normalize_recipient("+55 (11) 99999-9999").as_deref(),
            Some("5511999999999@s.whatsapp.net")
        );
    }

    #[test]
    fn test_normalize_passes_address_through() {
        assert_eq!(
            normalize_recipient("5511999999999@s.whatsapp.net").as_deref(),
            Some("5511999999999@s.whatsapp.net")
        );
        assert_eq!(
            normalize_recipient("120363-1675@g.us").as_deref(),
            Some("120363-1675@g.us")
        );
    }

    #[test]
    fn test_normalize_no_digits() {
        assert_eq!(normalize_recipient("x"), None);
        assert_eq!(normalize_recipient("   "), None);
    }

    #[test]
    fn test_is_address() {
        assert!(is_address("123@s.whatsapp.net"));
        assert!(!is_address("123@"));
        assert!(!is_address("@s.whatsapp.net"));
        assert!(!is_address("alice@example.com"));
        assert!(!is_address("12345"));
    }

    #[test]
    fn test_normalize_user() {
        assert_eq!(
            normalize_user("5511999999999:12@s.whatsapp.net"),
            "5511999999999@s.whatsapp.net"
        );
        assert_eq!(normalize_user("5511999999999@c.us"), "5511999999999@s.whatsapp.net");
        assert_eq!(normalize_user("120363-1675@g.us"), "120363-1675@g.us");
        assert_eq!(normalize_user("status"), "status");
    }
}
