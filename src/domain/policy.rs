//! Connection Policy Gate
//!
//! Decides whether a discovered peripheral should be connected, from the
//! configured white/black lists.

use crate::domain::settings::BleSettings;
use std::collections::HashSet;

#[derive(Debug, Clone, Default)]
pub struct ConnectionPolicy {
    whitelist: HashSet<String>,
    blacklist: HashSet<String>,
}

/// Uppercase, separator-free form so `aa:bb:..` and `AABB..` compare equal.
fn normalize(address: &str) -> String {
    address
        .chars()
        .filter(|c| *c != ':')
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

impl ConnectionPolicy {
    pub fn new<W, B>(whitelist: W, blacklist: B) -> Self
    where
        W: IntoIterator,
        W::Item: AsRef<str>,
        B: IntoIterator,
        B::Item: AsRef<str>,
    {
        Self {
            whitelist: whitelist.into_iter().map(|a| normalize(a.as_ref())).collect(),
            blacklist: blacklist.into_iter().map(|a| normalize(a.as_ref())).collect(),
        }
    }

    pub fn from_settings(settings: &BleSettings) -> Self {
        Self::new(&settings.whitelist, &settings.blacklist)
    }

    /// A non-empty whitelist admits only its members; otherwise everything
    /// not on the blacklist is admitted.
    pub fn should_connect(&self, address: &str) -> bool {
        let address = normalize(address);

        if !self.whitelist.is_empty() {
            return self.whitelist.contains(&address);
        }

        !self.blacklist.contains(&address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_connects_everything() {
        let policy = ConnectionPolicy::default();
        assert!(policy.should_connect("AABBCCDDEEFF"));
        assert!(policy.should_connect("11:22:33:44:55:66"));
    }

    #[test]
    fn test_whitelist_admits_only_members() {
        let policy = ConnectionPolicy::new(["aa:bb:cc:dd:ee:ff"], ["AABBCCDDEEFF"]);
        assert!(policy.should_connect("AABBCCDDEEFF"));
        assert!(!policy.should_connect("112233445566"));
    }

    #[test]
    fn test_blacklist_rejects_members() {
        let settings = BleSettings {
            whitelist: Vec::new(),
            blacklist: vec!["11:22:33:44:55:66".to_string()],
            ..Default::default()
        };
        let policy = ConnectionPolicy::from_settings(&settings);
        assert!(!policy.should_connect("112233445566"));
        assert!(policy.should_connect("AABBCCDDEEFF"));
    }
}
