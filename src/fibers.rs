//! Fiber selection
//!
//! A selection is a comma separated list of fibers or of `first:last` ranges
//! with `last` excluded, e.g. `50:60,4` selects fiber 4 and fibers 50 to 59.

use itertools::Itertools;
use std::str::FromStr;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum FibersError {
    #[error("invalid fiber number {0:?}")]
    Fiber(String),
    #[error("invalid fiber range {0:?}")]
    Range(String),
}

/// Ordered list of unique fibers
#[derive(Debug, Clone, PartialEq)]
pub struct Fibers(Vec<usize>);
impl Fibers {
    /// The first `n` fibers
    pub fn all(n: usize) -> Self {
        Self((0..n).collect())
    }
    pub fn len(&self) -> usize {
        self.0.len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.iter().copied()
    }
    pub fn as_slice(&self) -> &[usize] {
        &self.0
    }
}
impl FromStr for Fibers {
    type Err = FibersError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse = |v: &str| {
            v.trim()
                .parse::<usize>()
                .map_err(|_| FibersError::Fiber(v.to_string()))
        };
        let mut fibers = vec![];
        for item in s.split(',').map(str::trim).filter(|item| !item.is_empty()) {
            match item.split_once(':') {
                Some((first, last)) => {
                    let (first, last) = (parse(first)?, parse(last)?);
                    if last < first {
                        return Err(FibersError::Range(item.to_string()));
                    }
                    fibers.extend(first..last);
                }
                None => fibers.push(parse(item)?),
            }
        }
        Ok(Self(fibers.into_iter().unique().collect()))
    }
}

/// Resolves an optional selection against the number of fibers in the data
pub fn select(selection: Option<&Fibers>, nspec: usize) -> Fibers {
    selection.cloned().unwrap_or_else(|| Fibers::all(nspec))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranges_and_singles() {
        let fibers: Fibers = "50:53,4".parse().unwrap();
        assert_eq!(fibers.as_slice(), &[50, 51, 52, 4]);
    }

    #[test]
    fn duplicates_removed() {
        let fibers: Fibers = "1,0:3, 2,".parse().unwrap();
        assert_eq!(fibers.as_slice(), &[1, 0, 2]);
    }

    #[test]
    fn malformed() {
        assert_eq!(
            "a".parse::<Fibers>(),
            Err(FibersError::Fiber("a".to_string()))
        );
        assert_eq!(
            "5:2".parse::<Fibers>(),
            Err(FibersError::Range("5:2".to_string()))
        );
    }

    #[test]
    fn default_to_all() {
        assert_eq!(select(None, 3).as_slice(), &[0, 1, 2]);
    }
}
