use regex::Regex;
use std::net::IpAddr;

use crate::error::{DiscoveryError, Result};

/// Addresses and hostnames that must never be probed or logged into.
#[derive(Debug, Clone, Default)]
pub struct ExcludeFilter {
    patterns: Vec<Regex>,
}

impl ExcludeFilter {
    pub fn new(patterns: &[String]) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| {
                    DiscoveryError::validation(format!("invalid exclude pattern '{}': {}", p, e))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn excludes_name(&self, name: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(name))
    }

    pub fn excludes_ip(&self, ip: &IpAddr) -> bool {
        !self.patterns.is_empty() && self.excludes_name(&ip.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_addresses_and_names() {
        let filter =
            ExcludeFilter::new(&[r"^10\.0\.9\.".to_string(), "(?i)^phone-".to_string()]).unwrap();
        assert!(filter.excludes_ip(&"10.0.9.4".parse().unwrap()));
        assert!(!filter.excludes_ip(&"10.0.1.4".parse().unwrap()));
        assert!(filter.excludes_name("PHONE-12"));
    }

    #[test]
    fn test_invalid_pattern_is_validation_error() {
        let err = ExcludeFilter::new(&["(".to_string()]).unwrap_err();
        assert!(matches!(err, DiscoveryError::Validation(_)));
    }

    #[test]
    fn test_empty_filter_excludes_nothing() {
        let filter = ExcludeFilter::default();
        assert!(filter.is_empty());
        assert!(!filter.excludes_ip(&"10.0.0.1".parse().unwrap()));
    }
}
