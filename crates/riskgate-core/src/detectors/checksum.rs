//! Checksum validation for numeric identifiers.

use moka::policy::EvictionPolicy;
use moka::sync::Cache;

/// Luhn (mod 10) check over a string of ASCII digits.
pub fn luhn_valid(digits: &str) -> bool {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    let sum: u32 = digits
        .bytes()
        .rev()
        .enumerate()
        .map(|(i, b)| {
            let d = u32::from(b - b'0');
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}

/// ISO 13616 IBAN check (ISO 7064 mod 97-10). Spaces are ignored.
pub fn iban_valid(candidate: &str) -> bool {
    let compact: String = candidate
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_ascii_uppercase())
        .collect();
    if !(15..=34).contains(&compact.len()) || !compact.chars().all(|c| c.is_ascii_alphanumeric()) {
        return false;
    }
    let (head, tail) = compact.split_at(4);
    let mut remainder: u32 = 0;
    for c in tail.chars().chain(head.chars()) {
        let value = match c.to_digit(36) {
            Some(v) => v,
            None => return false,
        };
        // letters expand to two digits (A=10 .. Z=35)
        remainder = if value >= 10 {
            (remainder * 100 + value) % 97
        } else {
            (remainder * 10 + value) % 97
        };
    }
    remainder == 1
}

/// Keep only ASCII digits.
pub fn normalize_digits(candidate: &str) -> String {
    candidate.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Bounded LRU memo of Luhn results keyed by the normalized digit string.
///
/// Safe to share across threads. Hits and misses always agree with
/// [`luhn_valid`].
#[derive(Clone)]
pub struct LuhnCache {
    cache: Cache<String, bool>,
}

impl LuhnCache {
    pub fn new(capacity: u64) -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(capacity)
                .eviction_policy(EvictionPolicy::lru())
                .build(),
        }
    }

    /// Whether `candidate` is a plausible card number (13-19 digits) passing Luhn.
    pub fn check(&self, candidate: &str) -> bool {
        let digits = normalize_digits(candidate);
        if !(13..=19).contains(&digits.len()) {
            return false;
        }
        self.cache.get_with(digits.clone(), || luhn_valid(&digits))
    }

    pub fn contains(&self, digits: &str) -> bool {
        self.cache.contains_key(digits)
    }

    /// Approximate number of memoized entries.
    pub fn len(&self) -> u64 {
        self.cache.run_pending_tasks();
        self.cache.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for LuhnCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LuhnCache")
            .field("entries", &self.cache.entry_count())
            .finish()
    }
}

impl Default for LuhnCache {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_luhn_known_values() {
        assert!(luhn_valid("4111111111111111"));
        assert!(luhn_valid("5500005555555559"));
        assert!(luhn_valid("378282246310005"));
        assert!(!luhn_valid("4111111111111112"));
        assert!(!luhn_valid(""));
        assert!(!luhn_valid("4111-1111"));
    }

    #[test]
    fn test_iban_known_values() {
        assert!(iban_valid("GB82 WEST 1234 5698 7654 32"));
        assert!(iban_valid("DE89370400440532013000"));
        assert!(!iban_valid("GB82 WEST 1234 5698 7654 33"));
        assert!(!iban_valid("GB82"));
    }

    #[test]
    fn test_cache_memoizes_normalized_digits() {
        let cache = LuhnCache::new(16);
        assert!(cache.check("4111 1111 1111 1111"));
        assert!(cache.contains("4111111111111111"));
        assert!(cache.check("4111-1111-1111-1111"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_cache_rejects_wrong_lengths_without_caching() {
        let cache = LuhnCache::new(16);
        assert!(!cache.check("4242"));
        assert!(cache.is_empty());
    }

    proptest! {
        #[test]
        fn prop_cache_agrees_with_direct_check(digits in "[0-9]{13,19}") {
            let cache = LuhnCache::new(4);
            let direct = luhn_valid(&digits);
            prop_assert_eq!(cache.check(&digits), direct);
            // second lookup is served from the memo
            prop_assert_eq!(cache.check(&digits), direct);
        }
    }
}
