//! CPU-set algebra over range-list strings.
//!
//! The canonical text form is the one used by cgroups and by the hypervisor
//! CLI: ascending comma-separated singletons and inclusive ranges, e.g.
//! `0-3,6,8-9`. The empty string is the empty set.
//!
//! ```text
//!   "3,0-2,9"  ──parse──►  {0,1,2,3,9}  ──format──►  "0-3,9"
//! ```

use crate::constants::MAX_CPU_INDEX;
use crate::error::{Error, Result};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// A set of CPU indices.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct CpuSet {
    cpus: BTreeSet<u32>,
}

impl CpuSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the set `0..count`.
    #[must_use]
    pub fn first_n(count: u32) -> Self {
        (0..count).collect()
    }

    /// Parses a range-list string.
    ///
    /// Rejects negative numbers, reversed ranges, empty groups, stray commas
    /// and indices above [`MAX_CPU_INDEX`]. Whitespace around groups is
    /// ignored.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        let mut cpus = BTreeSet::new();
        if trimmed.is_empty() {
            return Ok(Self { cpus });
        }

        for group in trimmed.split(',') {
            let group = group.trim();
            if group.is_empty() {
                return Err(invalid(input, "empty group"));
            }
            match group.split_once('-') {
                Some((start, end)) => {
                    let start = parse_index(input, start)?;
                    let end = parse_index(input, end)?;
                    if start > end {
                        return Err(invalid(input, &format!("reversed range {}-{}", start, end)));
                    }
                    cpus.extend(start..=end);
                }
                None => {
                    cpus.insert(parse_index(input, group)?);
                }
            }
        }
        Ok(Self { cpus })
    }

    /// Number of CPUs in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cpus.len()
    }

    /// Returns true if the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cpus.is_empty()
    }

    /// Returns true if `cpu` is a member.
    #[must_use]
    pub fn contains(&self, cpu: u32) -> bool {
        self.cpus.contains(&cpu)
    }

    /// Returns true if every member of `self` is in `other`.
    #[must_use]
    pub fn is_subset(&self, other: &CpuSet) -> bool {
        self.cpus.is_subset(&other.cpus)
    }

    #[must_use]
    pub fn union(&self, other: &CpuSet) -> CpuSet {
        self.cpus.union(&other.cpus).copied().collect()
    }

    #[must_use]
    pub fn intersection(&self, other: &CpuSet) -> CpuSet {
        self.cpus.intersection(&other.cpus).copied().collect()
    }

    /// Members of `self` that are not in `other`.
    #[must_use]
    pub fn difference(&self, other: &CpuSet) -> CpuSet {
        self.cpus.difference(&other.cpus).copied().collect()
    }

    /// Iterates members in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.cpus.iter().copied()
    }

    /// Canonical range-list form (`""` for the empty set).
    #[must_use]
    pub fn format(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for CpuSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut iter = self.cpus.iter().copied().peekable();
        let mut first = true;
        while let Some(start) = iter.next() {
            let mut end = start;
            while let Some(&next) = iter.peek() {
                if next != end + 1 {
                    break;
                }
                end = next;
                iter.next();
            }
            if !first {
                write!(f, ",")?;
            }
            first = false;
            if start == end {
                write!(f, "{}", start)?;
            } else {
                write!(f, "{}-{}", start, end)?;
            }
        }
        Ok(())
    }
}

impl FromStr for CpuSet {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl FromIterator<u32> for CpuSet {
    fn from_iter<I: IntoIterator<Item = u32>>(iter: I) -> Self {
        Self {
            cpus: iter.into_iter().collect(),
        }
    }
}

fn parse_index(input: &str, token: &str) -> Result<u32> {
    let token = token.trim();
    if token.is_empty() {
        return Err(invalid(input, "missing range bound"));
    }
    if !token.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid(input, &format!("'{}' is not a CPU index", token)));
    }
    let index = token
        .parse::<u32>()
        .map_err(|e| invalid(input, &format!("'{}': {}", token, e)))?;
    if index > MAX_CPU_INDEX {
        return Err(invalid(
            input,
            &format!("CPU index {} exceeds maximum {}", index, MAX_CPU_INDEX),
        ));
    }
    Ok(index)
}

fn invalid(input: &str, reason: &str) -> Error {
    Error::InvalidCpuSet {
        input: input.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_format() {
        let set = CpuSet::parse("3,0-2,9").unwrap();
        assert_eq!(set.len(), 5);
        assert_eq!(set.format(), "0-3,9");
        assert_eq!(CpuSet::parse("").unwrap().format(), "");
        assert_eq!(CpuSet::parse(" 1 , 2 ").unwrap().format(), "1-2");
        assert_eq!(CpuSet::parse("5-5").unwrap().format(), "5");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in ["3-1", "-1", ",1", "1,", "1-", "a", "1,,2", "1-2-3", "+1"] {
            assert!(CpuSet::parse(bad).is_err(), "should reject {:?}", bad);
        }
    }

    #[test]
    fn test_parse_rejects_index_above_max() {
        let top = format!("0-{}", MAX_CPU_INDEX);
        assert_eq!(CpuSet::parse(&top).unwrap().len(), MAX_CPU_INDEX as usize + 1);

        for bad in [
            format!("0-{}", MAX_CPU_INDEX + 1),
            format!("{}", MAX_CPU_INDEX + 1),
            "0-4294967295".to_string(),
            "1,20000000".to_string(),
        ] {
            let err = CpuSet::parse(&bad).unwrap_err();
            assert!(
                matches!(err, Error::InvalidCpuSet { .. }),
                "{:?} should be rejected as an invalid set, got {:?}",
                bad,
                err
            );
        }
    }

    #[test]
    fn test_round_trip() {
        for text in ["", "0", "0-7", "1,3,5", "0-1,4-6,10"] {
            let once = CpuSet::parse(text).unwrap().format();
            let twice = CpuSet::parse(&once).unwrap().format();
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn test_algebra() {
        let a = CpuSet::parse("0-3").unwrap();
        let b = CpuSet::parse("2-5").unwrap();
        assert_eq!(a.union(&b).format(), "0-5");
        assert_eq!(a.intersection(&b).format(), "2-3");
        assert_eq!(a.difference(&b).format(), "0-1");
        assert!(a.contains(3));
        assert!(!a.contains(4));
        assert!(CpuSet::parse("1-2").unwrap().is_subset(&a));
    }

    #[test]
    fn test_equality_is_membership() {
        assert_eq!(CpuSet::parse("0,1,2").unwrap(), CpuSet::parse("0-2").unwrap());
        assert_eq!(CpuSet::first_n(4).format(), "0-3");
    }
}
