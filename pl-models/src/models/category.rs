//! Message content categories and category filters.
//!
//! A category is a bit set. Bits are hierarchical where the content is:
//! a GIF is always also an image, a link is always also text.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::str::FromStr;

use pl_core::error::PlError;
use serde::{Deserialize, Serialize};

/// Integer-encoded set of content category bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageCategory(u32);

impl MessageCategory {
    pub const NONE: Self = Self(0);
    pub const TEXT: Self = Self(1 << 0);
    pub const LINK: Self = Self(1 << 1);
    pub const IMAGE: Self = Self(1 << 2);
    pub const GIF: Self = Self(1 << 3);
    pub const FILE: Self = Self(1 << 4);
    pub const AUDIO: Self = Self(1 << 5);
    pub const VIDEO: Self = Self(1 << 6);
    pub const LOCATION: Self = Self(1 << 7);
    pub const LINK_PREVIEW: Self = Self(1 << 8);
    pub const KNOCK: Self = Self(1 << 9);
    pub const SYSTEM_MESSAGE: Self = Self(1 << 10);
    pub const EXCLUDED_FROM_COLLECTION: Self = Self(1 << 11);

    const NAMES: &'static [(&'static str, MessageCategory)] = &[
        ("text", Self::TEXT),
        ("link", Self::LINK),
        ("image", Self::IMAGE),
        ("gif", Self::GIF),
        ("file", Self::FILE),
        ("audio", Self::AUDIO),
        ("video", Self::VIDEO),
        ("location", Self::LOCATION),
        ("link_preview", Self::LINK_PREVIEW),
        ("knock", Self::KNOCK),
        ("system", Self::SYSTEM_MESSAGE),
        ("excluded", Self::EXCLUDED_FROM_COLLECTION),
    ];

    /// Raw bit value, as stored in `messages.cached_category`.
    pub fn bits(&self) -> u32 {
        self.0
    }

    /// Rebuild from a stored value. Unknown high bits are kept.
    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// True if every bit of `other` is set in `self`. Always true for NONE.
    pub fn contains(&self, other: MessageCategory) -> bool {
        self.0 & other.0 == other.0
    }

    /// True if `self` and `other` share at least one bit.
    pub fn intersects(&self, other: MessageCategory) -> bool {
        self.0 & other.0 != 0
    }

    /// Look up a single category by name.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_lowercase();
        Self::NAMES
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, c)| *c)
    }

    /// Names of the set bits, in bit order.
    pub fn names(&self) -> Vec<&'static str> {
        Self::NAMES
            .iter()
            .filter(|(_, c)| self.contains(*c))
            .map(|(n, _)| *n)
            .collect()
    }
}

impl BitOr for MessageCategory {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for MessageCategory {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for MessageCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        f.write_str(&self.names().join("|"))
    }
}

/// Parses a comma or pipe separated list of names: `"image,gif"`.
/// An empty string or `"none"` parses to NONE.
impl FromStr for MessageCategory {
    type Err = PlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut category = MessageCategory::NONE;
        for part in s.split([',', '|']).map(str::trim).filter(|p| !p.is_empty()) {
            if part.eq_ignore_ascii_case("none") {
                continue;
            }
            category |= MessageCategory::from_name(part)
                .ok_or_else(|| PlError::InvalidCategory(part.to_string()))?;
        }
        Ok(category)
    }
}

/// An immutable category filter.
///
/// A message matches when its category has every `including` bit and none
/// of the `excluding` bits. Used as the key of per-filter result maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CategoryMatch {
    pub including: MessageCategory,
    pub excluding: MessageCategory,
}

impl CategoryMatch {
    pub fn new(including: MessageCategory, excluding: MessageCategory) -> Self {
        Self {
            including,
            excluding,
        }
    }

    /// Filter with no exclusions.
    pub fn including(including: MessageCategory) -> Self {
        Self::new(including, MessageCategory::NONE)
    }

    pub fn matches(&self, category: MessageCategory) -> bool {
        category.contains(self.including) && !category.intersects(self.excluding)
    }
}

impl fmt::Display for CategoryMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.excluding.is_empty() {
            write!(f, "{}", self.including)
        } else {
            write!(f, "{} -{}", self.including, self.excluding)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_gif_filters() {
        let gif = MessageCategory::IMAGE | MessageCategory::GIF;

        assert!(CategoryMatch::including(MessageCategory::IMAGE).matches(gif));
        assert!(CategoryMatch::including(MessageCategory::GIF).matches(gif));
        assert!(!CategoryMatch::new(MessageCategory::IMAGE, MessageCategory::GIF).matches(gif));
        assert!(
            CategoryMatch::new(MessageCategory::IMAGE, MessageCategory::GIF)
                .matches(MessageCategory::IMAGE)
        );
    }

    #[test]
    fn test_excluded_bit_blocks_match() {
        let filter = CategoryMatch::new(
            MessageCategory::TEXT,
            MessageCategory::EXCLUDED_FROM_COLLECTION,
        );
        assert!(filter.matches(MessageCategory::TEXT | MessageCategory::LINK));
        assert!(!filter.matches(MessageCategory::TEXT | MessageCategory::EXCLUDED_FROM_COLLECTION));
    }

    #[test]
    fn test_match_is_usable_as_key() {
        let mut buckets = HashMap::new();
        buckets.insert(CategoryMatch::including(MessageCategory::IMAGE), 1);
        buckets.insert(CategoryMatch::including(MessageCategory::IMAGE), 2);
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[&CategoryMatch::including(MessageCategory::IMAGE)], 2);
    }

    #[test]
    fn test_parse_and_display() {
        let parsed: MessageCategory = "image, gif".parse().unwrap();
        assert_eq!(parsed, MessageCategory::IMAGE | MessageCategory::GIF);
        assert_eq!(parsed.to_string(), "image|gif");
        assert_eq!("".parse::<MessageCategory>().unwrap(), MessageCategory::NONE);
        assert!("sticker".parse::<MessageCategory>().is_err());
    }

    #[test]
    fn test_bits_round_trip() {
        let c = MessageCategory::FILE | MessageCategory::AUDIO;
        assert_eq!(MessageCategory::from_bits(c.bits()), c);
    }
}
