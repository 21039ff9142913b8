//!
//! Field name normalization
//!

/// Convert a CloudWatch name to snake case.
///
/// Acronyms are lowercased and separated from the surrounding words,
/// `SnakeIDGoogle` becomes `snake_id_google` while `OMGWTFBBQ` stays one word.
#[must_use]
pub fn to_snake_case(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);

    for (i, &c) in chars.iter().enumerate() {
        // a separator already written before this char is not doubled
        if i > 0 && c.is_uppercase() && !out.ends_with('_') {
            let prev_lower = chars[i - 1].is_lowercase();
            let next_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            if prev_lower || next_lower {
                out.push('_');
            }
        }
        out.extend(c.to_lowercase());
    }

    out
}
