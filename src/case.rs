//! Case conversion between schema names and SQL identifiers: model and field names are
//! camelCase/PascalCase in the schema, tables and columns are snake_case in the database,
//! and output records use lowerCamelCase keys again.

/// Convert a single identifier from snake_case to lowerCamelCase.
/// e.g. "parent_id" -> "parentId", "product_1_id" -> "product1Id"
pub fn to_camel_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut capitalize_next = false;
    for c in s.chars() {
        if c == '_' {
            capitalize_next = !out.is_empty();
        } else if capitalize_next {
            out.extend(c.to_uppercase());
            capitalize_next = false;
        } else {
            out.push(c);
        }
    }
    out
}

/// Convert a camelCase or PascalCase identifier to snake_case.
/// A boundary is inserted before an uppercase letter that follows a lowercase letter or digit,
/// before the last capital of an acronym run, and between a letter and a following digit.
/// e.g. "isActive" -> "is_active", "OrderItem" -> "order_item", "product1Id" -> "product_1_id"
pub fn to_snake_case(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::with_capacity(s.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if i > 0 {
            let prev = chars[i - 1];
            let next_is_lower = chars.get(i + 1).map(|n| n.is_lowercase()).unwrap_or(false);
            let boundary = (c.is_uppercase()
                && (prev.is_lowercase() || prev.is_ascii_digit() || (prev.is_uppercase() && next_is_lower)))
                || (c.is_ascii_digit() && prev.is_alphabetic());
            if boundary && !out.ends_with('_') {
                out.push('_');
            }
        }
        out.extend(c.to_lowercase());
    }
    out
}

/// Lower the first character only: "OrderItem" -> "orderItem". Expression roots name the
/// action's model this way.
pub fn to_lower_camel(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case("name", "name")]
    #[case("isActive", "is_active")]
    #[case("OrderItem", "order_item")]
    #[case("parentId", "parent_id")]
    #[case("product1Id", "product_1_id")]
    #[case("repeatedThings", "repeated_things")]
    #[case("HTTPHeader", "http_header")]
    fn snake_case_matches_column_naming(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(to_snake_case(input), expected);
    }

    #[rstest]
    #[case("is_active", "isActive")]
    #[case("product_1_id", "product1Id")]
    #[case("created_at", "createdAt")]
    #[case("id", "id")]
    fn camel_case_round_trips_columns(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(to_camel_case(input), expected);
    }

    #[test]
    fn lower_camel_lowers_only_first_letter() {
        assert_eq!(to_lower_camel("OrderItem"), "orderItem");
        assert_eq!(to_lower_camel(""), "");
    }
}
