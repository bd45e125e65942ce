/// Canonical form used for merchant matching and rule patterns:
/// uppercased, surrounding whitespace trimmed, inner runs collapsed to one space.
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uppercases_and_collapses() {
        assert_eq!(normalize("  Uber   Eats\t#4522 "), "UBER EATS #4522");
    }

    #[test]
    fn empty_stays_empty() {
        assert_eq!(normalize("   "), "");
    }

    #[test]
    fn idempotent() {
        let once = normalize("acme  payroll");
        assert_eq!(normalize(&once), once);
    }
}
