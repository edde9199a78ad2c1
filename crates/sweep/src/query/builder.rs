//! Gmail search-string builder

use super::filter::{Filter, present};

/// Build a Gmail search query from filter criteria
///
/// Each present field becomes one token; tokens are space-joined, which
/// Gmail treats as AND. An empty filter yields an empty string.
pub fn build_query(filter: &Filter) -> String {
    let mut tokens: Vec<String> = Vec::new();

    if let Some(age) = present(&filter.older_than) {
        tokens.push(format!("older_than:{}", age));
    }
    if let Some(age) = present(&filter.newer_than) {
        tokens.push(format!("newer_than:{}", age));
    }
    if let Some(size) = present(&filter.larger_than) {
        tokens.push(format!("larger:{}", size));
    }
    if let Some(size) = present(&filter.smaller_than) {
        tokens.push(format!("smaller:{}", size));
    }
    if let Some(category) = filter.category {
        tokens.push(format!("category:{}", category.as_str()));
    }
    if let Some(label) = present(&filter.label).and_then(quote_value) {
        tokens.push(format!("label:{}", label));
    }
    if let Some(sender) = present(&filter.sender).and_then(quote_value) {
        tokens.push(format!("from:{}", sender));
    }
    if filter.unread_only {
        tokens.push("is:unread".to_string());
    }
    if filter.inbox_only {
        tokens.push("in:inbox".to_string());
    }

    tokens.join(" ")
}

/// Quote a free-text value for use as an operator argument
///
/// Control characters are dropped, backslashes and double quotes are
/// backslash-escaped, and the result is wrapped in double quotes.
/// Returns `None` when nothing is left to match on.
pub fn quote_value(value: &str) -> Option<String> {
    let cleaned: String = value.chars().filter(|c| !c.is_control()).collect();
    if cleaned.trim().is_empty() {
        return None;
    }

    let mut quoted = String::with_capacity(cleaned.len() + 2);
    quoted.push('"');
    for c in cleaned.chars() {
        if c == '"' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    Some(quoted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Category;

    /// Split a query into (operator, value) pairs the way Gmail reads it,
    /// undoing backslash escapes inside quoted values.
    fn tokenize(query: &str) -> Vec<(String, String)> {
        let chars: Vec<char> = query.chars().collect();
        let mut tokens = Vec::new();
        let mut i = 0;

        while i < chars.len() {
            while i < chars.len() && chars[i].is_whitespace() {
                i += 1;
            }
            if i >= chars.len() {
                break;
            }

            let mut key = String::new();
            while i < chars.len() && chars[i] != ':' && !chars[i].is_whitespace() {
                key.push(chars[i]);
                i += 1;
            }
            if i < chars.len() && chars[i] == ':' {
                i += 1;
            }

            let mut value = String::new();
            if i < chars.len() && chars[i] == '"' {
                i += 1;
                while i < chars.len() && chars[i] != '"' {
                    if chars[i] == '\\' && i + 1 < chars.len() {
                        i += 1;
                    }
                    value.push(chars[i]);
                    i += 1;
                }
                i += 1;
            } else {
                while i < chars.len() && !chars[i].is_whitespace() {
                    value.push(chars[i]);
                    i += 1;
                }
            }
            tokens.push((key, value));
        }

        tokens
    }

    #[test]
    fn test_empty_filter_is_unconstrained() {
        assert_eq!(build_query(&Filter::default()), "");
    }

    #[test]
    fn test_label_is_quoted() {
        let filter = Filter {
            label: Some("promotions".to_string()),
            ..Filter::default()
        };
        assert_eq!(build_query(&filter), r#"label:"promotions""#);
    }

    #[test]
    fn test_sender_quote_is_escaped() {
        let filter = Filter::from_sender(r#"bad"sender@x.com"#);
        assert_eq!(build_query(&filter), r#"from:"bad\"sender@x.com""#);
    }

    #[test]
    fn test_quote_value_escapes_backslashes() {
        assert_eq!(
            quote_value(r"user\test@example.com").as_deref(),
            Some(r#""user\\test@example.com""#)
        );
        assert_eq!(
            quote_value(r#"test\"value@example.com"#).as_deref(),
            Some(r#""test\\\"value@example.com""#)
        );
    }

    #[test]
    fn test_quote_value_strips_control_characters() {
        assert_eq!(
            quote_value("news\n@exa\u{0}mple.com").as_deref(),
            Some(r#""news@example.com""#)
        );
        assert_eq!(quote_value("\r\n"), None);
        assert_eq!(quote_value(""), None);
    }

    #[test]
    fn test_injection_stays_inside_one_token() {
        let filter = Filter::from_sender(r#"evil@test.com" OR from:admin@company.com OR ""#);
        let query = build_query(&filter);
        let tokens = tokenize(&query);
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].0, "from");
        assert_eq!(tokens[0].1, r#"evil@test.com" OR from:admin@company.com OR ""#);
    }

    #[test]
    fn test_escaping_round_trips() {
        let values = [
            "plain@example.com",
            r#"a"b"c"#,
            r"back\slash",
            r#"mixed\"both"#,
            "-important@example.com",
            "user@example.com) OR (from:admin",
            "trailing\\",
        ];
        for value in values {
            let filter = Filter {
                label: Some(value.to_string()),
                ..Filter::default()
            };
            let tokens = tokenize(&build_query(&filter));
            assert_eq!(tokens, vec![("label".to_string(), value.to_string())]);
        }
    }

    #[test]
    fn test_all_fields_combine() {
        let filter = Filter {
            older_than: Some("30d".to_string()),
            newer_than: Some("1y".to_string()),
            larger_than: Some("5M".to_string()),
            smaller_than: Some("20M".to_string()),
            category: Some(Category::Promotions),
            label: Some("news".to_string()),
            sender: Some("a@b.com".to_string()),
            unread_only: true,
            inbox_only: true,
        };
        assert_eq!(
            build_query(&filter),
            r#"older_than:30d newer_than:1y larger:5M smaller:20M category:promotions label:"news" from:"a@b.com" is:unread in:inbox"#
        );
    }

    #[test]
    fn test_blank_values_are_skipped() {
        let filter = Filter {
            older_than: Some(String::new()),
            larger_than: Some("5M".to_string()),
            sender: Some("  ".to_string()),
            ..Filter::default()
        };
        assert_eq!(build_query(&filter), "larger:5M");
    }
}
