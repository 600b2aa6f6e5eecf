//! Identifier case conversions used when deriving routes.

/// `GetUserProfile` / `get_user_profile` -> `get-user-profile`.
///
/// Acronym runs stay together: `FetchHTTPStatus` -> `fetch-http-status`.
pub fn kebab_case(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if c == '_' || c == '-' || c == ' ' {
            if !out.is_empty() && !out.ends_with('-') {
                out.push('-');
            }
            continue;
        }
        if c.is_uppercase() && i > 0 {
            let prev = chars[i - 1];
            let next_is_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            let boundary = prev.is_lowercase()
                || prev.is_ascii_digit()
                || (prev.is_uppercase() && next_is_lower);
            if boundary && !out.is_empty() && !out.ends_with('-') {
                out.push('-');
            }
        }
        out.extend(c.to_lowercase());
    }
    out.trim_end_matches('-').to_string()
}

/// `get_user` -> `GetUser`. Names already in PascalCase are returned as is.
pub fn pascal_case(name: &str) -> String {
    if !name.contains('_') && name.chars().next().is_some_and(char::is_uppercase) {
        return name.to_string();
    }
    name.split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kebab() {
        assert_eq!(kebab_case("SendMessage"), "send-message");
        assert_eq!(kebab_case("send_message"), "send-message");
        assert_eq!(kebab_case("Ping"), "ping");
        assert_eq!(kebab_case("FetchHTTPStatus"), "fetch-http-status");
        assert_eq!(kebab_case("Resize2Fit"), "resize2-fit");
    }

    #[test]
    fn pascal() {
        assert_eq!(pascal_case("get_user"), "GetUser");
        assert_eq!(pascal_case("GetUser"), "GetUser");
        assert_eq!(pascal_case("watch"), "Watch");
        assert_eq!(pascal_case("list_users_v2"), "ListUsersV2");
    }
}
