//! Flattened (platform, device) choices and strict resolution of a typed
//! selection.

use super::{Device, Platform};
use crate::error::{Error, Result};
use std::fmt;
use tracing::{debug, info};

/// One selectable (platform, device) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionChoice {
    pub ordinal: usize,
    pub platform_index: usize,
    pub device_index: usize,
    pub platform_vendor: String,
    pub device_name: String,
}

impl fmt::Display for SelectionChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Option {}: Platform - {}, Device - {}",
            self.ordinal, self.platform_vendor, self.device_name
        )
    }
}

/// Owns the mapping from ordinal to concrete platform and device.
#[derive(Debug, Clone)]
pub struct Selector {
    choices: Vec<SelectionChoice>,
    pairs: Vec<(Platform, Device)>,
}

impl Selector {
    pub fn new(platforms: &[Platform]) -> Self {
        let mut choices = Vec::new();
        let mut pairs = Vec::new();

        for (p, platform) in platforms.iter().enumerate() {
            for (d, device) in platform.devices().iter().enumerate() {
                choices.push(SelectionChoice {
                    ordinal: choices.len(),
                    platform_index: p,
                    device_index: d,
                    platform_vendor: platform.vendor().to_string(),
                    device_name: device.name(),
                });
                pairs.push((platform.clone(), device.clone()));
            }
        }

        Self { choices, pairs }
    }

    pub fn options(&self) -> &[SelectionChoice] {
        &self.choices
    }

    pub fn len(&self) -> usize {
        self.choices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.choices.is_empty()
    }

    /// Resolve one line of user input.
    ///
    /// The line must be a non-negative decimal integer, optionally surrounded
    /// by whitespace, that indexes the option list. Anything else is
    /// [`Error::InvalidOption`]. With no options at all the result is
    /// [`Error::NoDeviceSelected`].
    pub fn resolve(&self, raw: &str) -> Result<(Platform, Device)> {
        if self.pairs.is_empty() {
            return Err(Error::NoDeviceSelected);
        }

        let index = parse_ordinal(raw).ok_or_else(|| Error::invalid_option(raw))?;
        let (platform, device) = self
            .pairs
            .get(index)
            .cloned()
            .ok_or_else(|| Error::invalid_option(raw))?;

        info!(option = index, device = %device.name(), "device selected");
        Ok((platform, device))
    }
}

fn parse_ordinal(raw: &str) -> Option<usize> {
    let digits = raw.trim();
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        debug!(input = raw, "rejected selection input");
        return None;
    }
    digits.parse().ok()
}

/// All (platform, device) pairs, flattened in enumeration order.
pub fn present_options(platforms: &[Platform]) -> Vec<SelectionChoice> {
    Selector::new(platforms).choices
}

pub fn resolve_selection(platforms: &[Platform], raw: &str) -> Result<(Platform, Device)> {
    Selector::new(platforms).resolve(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ordinal() {
        assert_eq!(parse_ordinal("0"), Some(0));
        assert_eq!(parse_ordinal("  12\n"), Some(12));
        assert_eq!(parse_ordinal(""), None);
        assert_eq!(parse_ordinal("   "), None);
        assert_eq!(parse_ordinal("-1"), None);
        assert_eq!(parse_ordinal("+1"), None);
        assert_eq!(parse_ordinal("1x"), None);
        assert_eq!(parse_ordinal("1 2"), None);
        assert_eq!(parse_ordinal("1.0"), None);
        assert_eq!(parse_ordinal("99999999999999999999999999"), None);
    }

    #[test]
    fn test_choice_display() {
        let choice = SelectionChoice {
            ordinal: 2,
            platform_index: 1,
            device_index: 0,
            platform_vendor: "Acme".to_string(),
            device_name: "R9".to_string(),
        };
        assert_eq!(choice.to_string(), "Option 2: Platform - Acme, Device - R9");
    }

    #[test]
    fn test_empty_selector() {
        let selector = Selector::new(&[]);
        assert!(selector.is_empty());
        assert!(matches!(selector.resolve("0"), Err(Error::NoDeviceSelected)));
    }
}
