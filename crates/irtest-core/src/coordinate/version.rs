//! Release ordering for repository version strings.
//!
//! Follows the repository's own rules. A version is a list of items split at
//! `.` and at digit/letter transitions; `-` and every transition open a
//! nested sublist, so `1.20-46.0` is `[1, 20, [46]]` and ranks below
//! `1.20.1`. Trailing null items (`0`, release qualifiers, empty sublists)
//! are dropped from each list, so `1.0` and `1.0.0` rank equally.
//!
//! Across item kinds a number outranks a sublist, which outranks a
//! qualifier. Qualifiers compare by their well-known rank
//! (`alpha < beta < milestone < rc < snapshot < release < sp`); unknown
//! qualifiers sort after every known one, alphabetically.
//!
//! Equal ranks fall back to the raw string so the ordering stays total and
//! agrees with equality.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A version string with release-order comparison.
#[derive(Debug, Clone)]
pub struct ComparableVersion {
    raw: String,
    items: Vec<Item>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Item {
    /// Digits with leading zeros stripped (`"0"` for zero).
    Number(String),
    /// Lower-cased, alias-normalized qualifier (`""` for release).
    Qualifier(String),
    /// Everything after a `-` or a digit/letter transition.
    List(Vec<Item>),
}

const QUALIFIERS: [&str; 7] = ["alpha", "beta", "milestone", "rc", "snapshot", "", "sp"];

/// Rank of the empty (release) qualifier within [`QUALIFIERS`].
const RELEASE_RANK: usize = 5;

impl ComparableVersion {
    /// Wraps `raw` for comparison.
    #[must_use]
    pub fn new(raw: &str) -> Self {
        Self {
            raw: raw.to_string(),
            items: parse(raw),
        }
    }

    /// The version string as written.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether the version carries a `SNAPSHOT` qualifier.
    #[must_use]
    pub fn is_snapshot(&self) -> bool {
        fn contains_snapshot(items: &[Item]) -> bool {
            items.iter().any(|item| match item {
                Item::Qualifier(q) => q == "snapshot",
                Item::List(list) => contains_snapshot(list),
                Item::Number(_) => false,
            })
        }
        contains_snapshot(&self.items)
    }
}

fn parse(raw: &str) -> Vec<Item> {
    let version = raw.to_ascii_lowercase();
    // Innermost list last; each list belongs at the end of the one before it.
    let mut stack: Vec<Vec<Item>> = vec![Vec::new()];
    let mut digits = false;
    let mut start = 0;

    for (index, ch) in version.char_indices() {
        match ch {
            '.' | '-' => {
                let item = if index == start {
                    Item::Number("0".to_string())
                } else {
                    token(&version[start..index], digits, false)
                };
                push(&mut stack, item);
                start = index + 1;
                if ch == '-' {
                    stack.push(Vec::new());
                }
            },
            _ if ch.is_ascii_digit() => {
                if !digits && index > start {
                    push(&mut stack, token(&version[start..index], false, true));
                    start = index;
                    stack.push(Vec::new());
                }
                digits = true;
            },
            _ => {
                if digits && index > start {
                    push(&mut stack, token(&version[start..index], true, false));
                    start = index;
                    stack.push(Vec::new());
                }
                digits = false;
            },
        }
    }
    if version.len() > start {
        push(&mut stack, token(&version[start..], digits, false));
    }

    loop {
        let Some(mut list) = stack.pop() else {
            return Vec::new();
        };
        normalize(&mut list);
        match stack.last_mut() {
            Some(parent) => parent.push(Item::List(list)),
            None => return list,
        }
    }
}

fn push(stack: &mut [Vec<Item>], item: Item) {
    if let Some(list) = stack.last_mut() {
        list.push(item);
    }
}

fn token(text: &str, digits: bool, followed_by_digit: bool) -> Item {
    if digits {
        let trimmed = text.trim_start_matches('0');
        let value = if trimmed.is_empty() { "0" } else { trimmed };
        return Item::Number(value.to_string());
    }
    // Single letter shorthands only count when a number follows: `1.0a1`.
    let alias = match text {
        "a" if followed_by_digit => "alpha",
        "b" if followed_by_digit => "beta",
        "m" if followed_by_digit => "milestone",
        "cr" => "rc",
        "ga" | "final" | "release" => "",
        other => other,
    };
    Item::Qualifier(alias.to_string())
}

/// Drops trailing null items, looking through sublists for nulls before them.
fn normalize(list: &mut Vec<Item>) {
    let mut index = list.len();
    while index > 0 {
        index -= 1;
        if list[index].is_null() {
            list.remove(index);
        } else if !matches!(list[index], Item::List(_)) {
            break;
        }
    }
}

/// Sort key of a qualifier: its rank, unknown qualifiers after every rank.
fn qualifier_key(qualifier: &str) -> (usize, &str) {
    match QUALIFIERS.iter().position(|known| *known == qualifier) {
        Some(rank) => (rank, ""),
        None => (QUALIFIERS.len(), qualifier),
    }
}

impl Item {
    fn is_null(&self) -> bool {
        match self {
            Self::Number(n) => n == "0",
            Self::Qualifier(q) => q.is_empty(),
            Self::List(list) => list.is_empty(),
        }
    }

    /// Compares against `other`, where `None` is an absent (padding) item.
    fn compare(&self, other: Option<&Item>) -> Ordering {
        match (self, other) {
            (Self::Number(n), None) => {
                if n == "0" {
                    Ordering::Equal
                } else {
                    Ordering::Greater
                }
            },
            (Self::Number(a), Some(Self::Number(b))) => {
                a.len().cmp(&b.len()).then_with(|| a.cmp(b))
            },
            (Self::Number(_), Some(_)) => Ordering::Greater,
            (Self::Qualifier(q), None) => qualifier_key(q).cmp(&(RELEASE_RANK, "")),
            (Self::Qualifier(a), Some(Self::Qualifier(b))) => {
                qualifier_key(a).cmp(&qualifier_key(b))
            },
            (Self::Qualifier(_), Some(_)) => Ordering::Less,
            (Self::List(list), None) => list
                .first()
                .map_or(Ordering::Equal, |first| first.compare(None)),
            (Self::List(_), Some(Self::Number(_))) => Ordering::Less,
            (Self::List(_), Some(Self::Qualifier(_))) => Ordering::Greater,
            (Self::List(a), Some(Self::List(b))) => compare_items(a, b),
        }
    }
}

fn compare_items(left: &[Item], right: &[Item]) -> Ordering {
    let len = left.len().max(right.len());
    (0..len)
        .map(|index| match (left.get(index), right.get(index)) {
            (Some(l), r) => l.compare(r),
            (None, Some(r)) => r.compare(None).reverse(),
            (None, None) => Ordering::Equal,
        })
        .find(|ordering| ordering.is_ne())
        .unwrap_or(Ordering::Equal)
}

impl Ord for ComparableVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_items(&self.items, &other.items).then_with(|| self.raw.cmp(&other.raw))
    }
}

impl PartialOrd for ComparableVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for ComparableVersion {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for ComparableVersion {}

impl Hash for ComparableVersion {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl fmt::Display for ComparableVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl From<&str> for ComparableVersion {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl Serialize for ComparableVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for ComparableVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(|raw| Self::new(&raw))
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn v(raw: &str) -> ComparableVersion {
        ComparableVersion::new(raw)
    }

    #[test]
    fn numeric_items_compare_by_value() {
        assert!(v("1.9") < v("1.10"));
        assert!(v("1.2.10") > v("1.2.9"));
        assert!(v("10") > v("9"));
        assert!(v("1.007") > v("1.6"));
    }

    #[test]
    fn trailing_zeros_rank_equal_but_stay_distinct() {
        assert_eq!(compare_items(&v("1.0").items, &v("1").items), Ordering::Equal);
        assert_ne!(v("1.0"), v("1"));
        assert_ne!(v("1.0").cmp(&v("1")), Ordering::Equal);
    }

    #[test]
    fn qualifiers_follow_release_ladder() {
        let ladder = [
            "1.0-alpha1",
            "1.0-beta1",
            "1.0-m1",
            "1.0-rc1",
            "1.0-SNAPSHOT",
            "1.0",
            "1.0-sp1",
            "1.0-zeta",
        ];
        for pair in ladder.windows(2) {
            assert!(v(pair[0]) < v(pair[1]), "{} < {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn release_aliases_match_plain_release() {
        assert_eq!(
            compare_items(&v("1.0-final").items, &v("1.0").items),
            Ordering::Equal
        );
        assert_eq!(compare_items(&v("1.0.GA").items, &v("1").items), Ordering::Equal);
    }

    #[test]
    fn forge_style_versions_sort_by_minecraft_then_build() {
        let mut versions = vec![
            v("1.12.2-14.23.5.2860"),
            v("1.7.10-10.13.4.1614-1.7.10"),
            v("1.12.2-14.23.5.2859"),
            v("1.20.1-47.1.0"),
            v("1.5.2-7.8.1.738"),
        ];
        versions.sort();
        let raw: Vec<_> = versions.iter().map(ComparableVersion::as_str).collect();
        assert_eq!(
            raw,
            [
                "1.5.2-7.8.1.738",
                "1.7.10-10.13.4.1614-1.7.10",
                "1.12.2-14.23.5.2859",
                "1.12.2-14.23.5.2860",
                "1.20.1-47.1.0",
            ]
        );
    }

    #[test]
    fn dash_opens_a_sublist_below_further_release_numbers() {
        assert!(v("1.20-46.0.14") < v("1.20.1-47.1.0"));
        assert!(v("1.12-14.21.1.2443") < v("1.12.2-14.23.5.2860"));
        assert!(v("1.7-10.12.2.1161") < v("1.7.2-10.12.0.967"));
        assert!(v("1.5-7.7.0.598") < v("1.5.2"));
        assert!(v("1.5.2-7.8.1.738") > v("1.5.2"));
    }

    #[test]
    fn release_line_prefix_bounds_its_builds() {
        let mut versions = vec![
            v("1.20.1-47.1.0"),
            v("1.20-46.0.14"),
            v("1.20.2-48.0.1"),
            v("1.19.4-45.1.0"),
        ];
        versions.sort();
        let raw: Vec<_> = versions.iter().map(ComparableVersion::as_str).collect();
        assert_eq!(
            raw,
            ["1.19.4-45.1.0", "1.20-46.0.14", "1.20.1-47.1.0", "1.20.2-48.0.1"]
        );
        assert!(v("1.20-46.0.14") > v("1.20"));
        assert!(v("1.20-46.0.14") < v("1.20.1"));
    }

    #[test]
    fn number_outranks_sublist_outranks_qualifier() {
        assert!(v("1.1") > v("1-1"));
        assert!(v("1-1") > v("1-sp"));
        assert!(v("1.0a1") < v("1.0"));
        assert!(v("1.0-rc1") < v("1.0-rc2"));
    }

    #[test]
    fn unknown_qualifiers_sort_alphabetically() {
        assert!(v("1.0-abc") < v("1.0-xyz"));
        assert!(v("1.0-sp") < v("1.0-abc"));
    }

    #[test]
    fn detects_snapshots() {
        assert!(v("1.0-SNAPSHOT").is_snapshot());
        assert!(!v("1.0").is_snapshot());
    }

    proptest! {
        #[test]
        fn ordering_is_total_and_antisymmetric(a in "[0-9a-z.\\-]{0,12}", b in "[0-9a-z.\\-]{0,12}") {
            let (a, b) = (v(&a), v(&b));
            prop_assert_eq!(a.cmp(&b), b.cmp(&a).reverse());
            prop_assert_eq!(a.cmp(&b) == Ordering::Equal, a == b);
        }

        #[test]
        fn ordering_is_transitive(
            a in "[0-9]{1,2}(\\.[0-9]{1,2}){0,2}(-(rc|alpha|beta|sp)[0-9])?",
            b in "[0-9]{1,2}(\\.[0-9]{1,2}){0,2}(-(rc|alpha|beta|sp)[0-9])?",
            c in "[0-9]{1,2}(\\.[0-9]{1,2}){0,2}(-(rc|alpha|beta|sp)[0-9])?",
        ) {
            let (a, b, c) = (v(&a), v(&b), v(&c));
            if a <= b && b <= c {
                prop_assert!(a <= c);
            }
        }
    }
}
