//! Trust verification for gateway-injected identity.
//!
//! A candidate (shared secret or peer address) is trusted when it equals one
//! of the expected values, or when an expected value of the form
//! `a.b.c.d/prefix` contains it as an IPv4 address.

/// Verifies a trust signal against a fixed list of accepted values.
///
/// An empty list rejects every candidate.
#[derive(Debug, Clone, Default)]
pub struct TrustVerifier {
    expected: Vec<String>,
}

impl TrustVerifier {
    pub fn new<I, S>(expected: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            expected: expected.into_iter().map(Into::into).collect(),
        }
    }

    pub fn expected(&self) -> &[String] {
        &self.expected
    }

    pub fn is_trusted(&self, candidate: &str) -> bool {
        is_trusted(candidate, &self.expected)
    }
}

/// Returns whether `candidate` matches any expected value.
///
/// Exact equality is tried for every value before any CIDR range is considered.
pub fn is_trusted<S: AsRef<str>>(candidate: &str, expected: &[S]) -> bool {
    if expected.iter().any(|value| value.as_ref() == candidate) {
        return true;
    }
    expected
        .iter()
        .filter(|value| value.as_ref().contains('/'))
        .any(|range| cidr_contains(range.as_ref(), candidate))
}

fn cidr_contains(range: &str, candidate: &str) -> bool {
    let Some((network, prefix)) = range.split_once('/') else {
        return false;
    };
    let Some(prefix) = parse_prefix(prefix) else {
        return false;
    };
    let (Some(network), Some(address)) = (parse_ipv4(network), parse_ipv4(candidate)) else {
        return false;
    };
    let mask = if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - prefix)
    };
    network & mask == address & mask
}

fn parse_prefix(value: &str) -> Option<u32> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    value.parse::<u32>().ok().filter(|prefix| *prefix <= 32)
}

fn parse_ipv4(value: &str) -> Option<u32> {
    let mut result: u32 = 0;
    let mut count = 0;
    for octet in value.split('.') {
        if octet.is_empty() || octet.len() > 3 || !octet.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let octet: u32 = octet.parse().ok()?;
        if octet > 255 {
            return None;
        }
        result = (result << 8) | octet;
        count += 1;
        if count > 4 {
            return None;
        }
    }
    (count == 4).then_some(result)
}
