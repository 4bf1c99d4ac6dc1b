//! Kubernetes quantity parsing.
//!
//! Quantities are strings such as `250m`, `1.5`, `128Mi`, `2G` or `1e3`.
//! Only the subset needed for scheduling pressure is supported: a decimal
//! number with an optional binary, decimal-SI or exponent suffix.

const BINARY_SUFFIXES: [(&str, f64); 6] = [
    ("Ki", 1024.0),
    ("Mi", 1024.0 * 1024.0),
    ("Gi", 1024.0 * 1024.0 * 1024.0),
    ("Ti", 1024.0 * 1024.0 * 1024.0 * 1024.0),
    ("Pi", 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0),
    ("Ei", 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0),
];

const DECIMAL_SUFFIXES: [(char, f64); 9] = [
    ('n', 1e-9),
    ('u', 1e-6),
    ('m', 1e-3),
    ('k', 1e3),
    ('M', 1e6),
    ('G', 1e9),
    ('T', 1e12),
    ('P', 1e15),
    ('E', 1e18),
];

const MIB: f64 = 1024.0 * 1024.0;

/// Parse a quantity into its base unit value.
///
/// Returns `None` for empty or malformed input.
#[must_use]
pub fn parse_quantity(raw: &str) -> Option<f64> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    for (suffix, factor) in BINARY_SUFFIXES {
        if let Some(number) = s.strip_suffix(suffix) {
            return parse_number(number).map(|n| n * factor);
        }
    }

    if let Some(last) = s.chars().last() {
        if let Some((_, factor)) = DECIMAL_SUFFIXES.iter().find(|(c, _)| *c == last) {
            let number = &s[..s.len() - last.len_utf8()];
            return parse_number(number).map(|n| n * factor);
        }
    }

    parse_number(s)
}

/// Parse a cpu quantity into cores.
#[must_use]
pub fn parse_cpu_cores(raw: &str) -> Option<f64> {
    parse_quantity(raw)
}

/// Parse a memory quantity into MiB.
#[must_use]
pub fn parse_memory_mib(raw: &str) -> Option<f64> {
    parse_quantity(raw).map(|bytes| bytes / MIB)
}

fn parse_number(s: &str) -> Option<f64> {
    if s.is_empty() {
        return None;
    }
    s.parse::<f64>().ok().filter(|n| n.is_finite() && *n >= 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn cpu_quantities() {
        assert!(approx(parse_cpu_cores("250m").unwrap(), 0.25));
        assert!(approx(parse_cpu_cores("2").unwrap(), 2.0));
        assert!(approx(parse_cpu_cores("0.5").unwrap(), 0.5));
        assert!(approx(parse_cpu_cores("100000u").unwrap(), 0.1));
    }

    #[test]
    fn memory_quantities() {
        assert!(approx(parse_memory_mib("128Mi").unwrap(), 128.0));
        assert!(approx(parse_memory_mib("1Gi").unwrap(), 1024.0));
        assert!(approx(parse_memory_mib("1048576").unwrap(), 1.0));
        assert!(approx(parse_memory_mib("1M").unwrap(), 1e6 / MIB));
    }

    #[test]
    fn exponent_notation() {
        assert!(approx(parse_quantity("2e3").unwrap(), 2000.0));
        assert!(approx(parse_quantity("1E").unwrap(), 1e18));
    }

    #[test]
    fn malformed_quantities() {
        assert_eq!(parse_quantity(""), None);
        assert_eq!(parse_quantity("Mi"), None);
        assert_eq!(parse_quantity("lots"), None);
        assert_eq!(parse_quantity("-1"), None);
    }
}
