/// Parse a human-abbreviated count as rendered on profile pages:
/// "1,234", "1.2K", "3.4M", "12B", "987". Returns `None` for text that
/// doesn't look like a count at all.
pub fn parse_approx_count(raw: &str) -> Option<i64> {
    let s = raw.trim().replace(',', "");
    if s.is_empty() {
        return None;
    }

    let (digits, multiplier) = match s.chars().last() {
        Some('K') | Some('k') => (&s[..s.len() - 1], 1_000f64),
        Some('M') | Some('m') => (&s[..s.len() - 1], 1_000_000f64),
        Some('B') | Some('b') => (&s[..s.len() - 1], 1_000_000_000f64),
        _ => (s.as_str(), 1f64),
    };

    let value: f64 = digits.parse().ok()?;
    if value < 0.0 {
        return None;
    }
    Some((value * multiplier).round() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_numbers() {
        assert_eq!(parse_approx_count("987"), Some(987));
        assert_eq!(parse_approx_count("1,234"), Some(1234));
        assert_eq!(parse_approx_count("0"), Some(0));
    }

    #[test]
    fn abbreviated_counts() {
        assert_eq!(parse_approx_count("1.2K"), Some(1200));
        assert_eq!(parse_approx_count("3.4M"), Some(3_400_000));
        assert_eq!(parse_approx_count("12B"), Some(12_000_000_000));
        assert_eq!(parse_approx_count("5k"), Some(5000));
    }

    #[test]
    fn junk_is_none() {
        assert_eq!(parse_approx_count(""), None);
        assert_eq!(parse_approx_count("Followers"), None);
        assert_eq!(parse_approx_count("-3"), None);
    }

    #[test]
    fn whitespace_tolerated() {
        assert_eq!(parse_approx_count(" 1.5K "), Some(1500));
    }
}
