// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Identity sanitization.
//!
//! Backend identities must start with a letter, contain only ASCII letters,
//! digits and underscores, and end with a letter or digit. [`IdSanitizer`]
//! maps arbitrary strings into that shape:
//!
//! 1. a configured namespace prefix (e.g. `mqtt:`) is stripped and remembered
//! 2. every character outside `[A-Za-z0-9_]` becomes `_`
//! 3. trailing underscores are removed
//! 4. an empty result becomes the configured fallback
//! 5. otherwise the canonical prefix is prepended when the result does not
//!    start with a letter or a namespace prefix was stripped
//!
//! The configuration is checked by [`IdSanitizer::new`] so that the mapping is
//! idempotent.

use crate::config::IdentityConfig;

/// Identity sanitizer built from [`IdentityConfig`].
#[derive(Debug, Clone)]
pub struct IdSanitizer {
    canonical_prefix: String,
    namespace_prefixes: Vec<String>,
    fallback: String,
}

fn is_id_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Whether `s` already has the backend identity shape.
pub fn is_valid_id(s: &str) -> bool {
    let mut chars = s.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !first.is_ascii_alphabetic() {
        return false;
    }
    if !s.chars().all(is_id_char) {
        return false;
    }
    s.chars().last().is_some_and(|c| c.is_ascii_alphanumeric())
}

impl IdSanitizer {
    /// Build a sanitizer, rejecting settings that would break idempotence.
    pub fn new(config: &IdentityConfig) -> Result<Self, String> {
        let prefix = &config.canonical_prefix;
        match prefix.chars().next() {
            Some(c) if c.is_ascii_alphabetic() => {}
            _ => {
                return Err(format!(
                    "canonical_prefix '{}' must start with an ASCII letter",
                    prefix
                ))
            }
        }
        if !prefix.chars().all(is_id_char) {
            return Err(format!(
                "canonical_prefix '{}' may only contain letters, digits and '_'",
                prefix
            ));
        }
        if !is_valid_id(&config.fallback) {
            return Err(format!(
                "fallback '{}' is not a valid identity",
                config.fallback
            ));
        }
        for ns in &config.namespace_prefixes {
            if ns.chars().all(is_id_char) {
                return Err(format!(
                    "namespace prefix '{}' must contain a separator outside [A-Za-z0-9_]",
                    ns
                ));
            }
        }

        Ok(Self {
            canonical_prefix: prefix.clone(),
            namespace_prefixes: config.namespace_prefixes.clone(),
            fallback: config.fallback.clone(),
        })
    }

    /// Sanitize one identity.
    pub fn sanitize(&self, raw: &str) -> String {
        let (rest, namespaced) = match self
            .namespace_prefixes
            .iter()
            .find(|ns| raw.starts_with(ns.as_str()))
        {
            Some(ns) => (&raw[ns.len()..], true),
            None => (raw, false),
        };

        let replaced: String = rest
            .chars()
            .map(|c| if is_id_char(c) { c } else { '_' })
            .collect();
        let trimmed = replaced.trim_end_matches('_');

        if trimmed.is_empty() {
            return self.fallback.clone();
        }

        let starts_with_letter = trimmed
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic());
        if namespaced || !starts_with_letter {
            format!("{}{}", self.canonical_prefix, trimmed)
        } else {
            trimmed.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;

    fn sanitizer() -> IdSanitizer {
        IdSanitizer::new(&IdentityConfig::default()).expect("default identity config")
    }

    #[test]
    fn test_sanitize_plain() {
        let s = sanitizer();
        assert_eq!(s.sanitize("pump1"), "pump1");
        assert_eq!(s.sanitize("pump-1.a"), "pump_1_a");
        assert_eq!(s.sanitize("pump__"), "pump");
    }

    #[test]
    fn test_sanitize_leading_digit() {
        let s = sanitizer();
        assert_eq!(s.sanitize("123abc"), "id_123abc");
        assert_eq!(s.sanitize("_x"), "id__x");
    }

    #[test]
    fn test_sanitize_namespace_prefix() {
        let s = sanitizer();
        assert_eq!(s.sanitize("mqtt:sensor/1"), "id_sensor_1");
        assert_eq!(s.sanitize("mqtt:"), "unknown");
    }

    #[test]
    fn test_sanitize_empty_uses_fallback() {
        let s = sanitizer();
        assert_eq!(s.sanitize(""), "unknown");
        assert_eq!(s.sanitize("///"), "unknown");
        assert_eq!(s.sanitize("ééé"), "unknown");
    }

    #[test]
    fn test_sanitize_idempotent_and_shaped() {
        let s = sanitizer();
        let shape = Regex::new(r"^[A-Za-z][A-Za-z0-9_]*[A-Za-z0-9]$|^[A-Za-z]$").expect("regex");
        let inputs = [
            "",
            "a",
            "A_",
            "9",
            "_",
            "__a__",
            "123abc",
            "mqtt:42",
            "mqtt:mqtt:x",
            "site/area-1/pump #3",
            "ünïcode",
            "id_123abc",
            "x y z",
            "-",
            "a-",
        ];
        for input in inputs {
            let once = s.sanitize(input);
            assert!(shape.is_match(&once), "{:?} -> {:?}", input, once);
            assert_eq!(s.sanitize(&once), once, "not idempotent for {:?}", input);
        }
    }

    #[test]
    fn test_rejects_bad_settings() {
        let mut config = IdentityConfig::default();
        config.canonical_prefix = "1_".into();
        assert!(IdSanitizer::new(&config).is_err());

        let mut config = IdentityConfig::default();
        config.namespace_prefixes = vec!["ns_".into()];
        assert!(IdSanitizer::new(&config).is_err());

        let mut config = IdentityConfig::default();
        config.fallback = "_".into();
        assert!(IdSanitizer::new(&config).is_err());
    }

    #[test]
    fn test_is_valid_id() {
        assert!(is_valid_id("a"));
        assert!(is_valid_id("a_1"));
        assert!(!is_valid_id("a_"));
        assert!(!is_valid_id("1a"));
        assert!(!is_valid_id(""));
    }
}
