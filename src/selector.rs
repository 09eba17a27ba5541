//! Episode selection expressions.
//!
//! Accepted forms:
//! - `all` (any case): every episode the show knows about
//! - `N`: a single episode number
//! - a comma separated list of numbers and inclusive `A-B` ranges, e.g. `1-5,10,15-20`
//!
//! Parsing is strict: the first token that is neither a number nor a well-formed
//! range aborts with [`Error::MalformedSelector`] naming that token. Numbers the
//! show does not have are kept; the orchestrator reports them individually.

use crate::error::{Error, Result};
use std::collections::BTreeSet;

/// Largest span a single `A-B` range may cover
pub const MAX_RANGE_SPAN: u32 = 100_000;

/// A parsed episode selection
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EpisodeSelector {
    /// Every known episode
    All,
    /// Explicit episode numbers, ascending and de-duplicated
    Numbers(BTreeSet<u32>),
}

impl EpisodeSelector {
    /// Parse a selection expression
    pub fn parse(expr: &str) -> Result<Self> {
        let trimmed = expr.trim();
        if trimmed.eq_ignore_ascii_case("all") {
            return Ok(EpisodeSelector::All);
        }

        let mut numbers = BTreeSet::new();
        for raw in trimmed.split(',') {
            let token = raw.trim();
            if token.is_empty() {
                return Err(malformed(token, "empty selection"));
            }

            match token.split_once('-') {
                Some((start, end)) => {
                    let start = parse_number(start.trim(), token)?;
                    let end = parse_number(end.trim(), token)?;
                    if start > end {
                        return Err(malformed(token, "range start is greater than its end"));
                    }
                    if end - start >= MAX_RANGE_SPAN {
                        return Err(malformed(
                            token,
                            &format!("range covers more than {} episodes", MAX_RANGE_SPAN),
                        ));
                    }
                    numbers.extend(start..=end);
                }
                None => {
                    numbers.insert(parse_number(token, token)?);
                }
            }
        }

        Ok(EpisodeSelector::Numbers(numbers))
    }

    /// Concrete episode numbers for a show whose known numbers are `known`
    ///
    /// `All` expands to the known set. Explicit numbers are returned whether or
    /// not the show has them. The result is ascending without duplicates.
    pub fn resolve(&self, known: &[u32]) -> Vec<u32> {
        match self {
            EpisodeSelector::All => {
                let set: BTreeSet<u32> = known.iter().copied().collect();
                set.into_iter().collect()
            }
            EpisodeSelector::Numbers(numbers) => numbers.iter().copied().collect(),
        }
    }

    /// Human readable summary used in logs and command output
    pub fn describe(&self) -> String {
        let numbers = match self {
            EpisodeSelector::All => return "all episodes".to_string(),
            EpisodeSelector::Numbers(numbers) => numbers,
        };

        let runs = collapse_runs(numbers);
        match runs.as_slice() {
            [] => "no episodes".to_string(),
            [(start, end)] if start == end => format!("episode {}", start),
            _ => {
                let parts: Vec<String> = runs
                    .iter()
                    .map(|(start, end)| {
                        if start == end {
                            start.to_string()
                        } else {
                            format!("{}-{}", start, end)
                        }
                    })
                    .collect();
                format!("episodes {}", parts.join(", "))
            }
        }
    }
}

impl std::str::FromStr for EpisodeSelector {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Parse `expr` and resolve it against `known` in one step
pub fn select(expr: &str, known: &[u32]) -> Result<Vec<u32>> {
    Ok(EpisodeSelector::parse(expr)?.resolve(known))
}

fn parse_number(part: &str, token: &str) -> Result<u32> {
    if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed(token, "expected an episode number or A-B range"));
    }
    part.parse::<u32>()
        .map_err(|_| malformed(token, "episode number is too large"))
}

fn malformed(token: &str, reason: &str) -> Error {
    Error::MalformedSelector {
        token: token.to_string(),
        reason: reason.to_string(),
    }
}

fn collapse_runs(numbers: &BTreeSet<u32>) -> Vec<(u32, u32)> {
    let mut runs: Vec<(u32, u32)> = Vec::new();
    for &n in numbers {
        match runs.last_mut() {
            Some((_, end)) if end.checked_add(1) == Some(n) => *end = n,
            _ => runs.push((n, n)),
        }
    }
    runs
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn malformed_token(expr: &str) -> String {
        match EpisodeSelector::parse(expr) {
            Err(Error::MalformedSelector { token, .. }) => token,
            other => panic!("expected MalformedSelector for {expr:?}, got {other:?}"),
        }
    }

    #[test]
    fn list_of_ranges_and_numbers() {
        let known: Vec<u32> = (1..=30).collect();
        let selected = select("1-5,10,15-20", &known).unwrap();
        assert_eq!(
            selected,
            vec![1, 2, 3, 4, 5, 10, 15, 16, 17, 18, 19, 20]
        );
    }

    #[test]
    fn all_expands_to_known_numbers_ascending() {
        assert_eq!(select("all", &[5, 1, 3]).unwrap(), vec![1, 3, 5]);
        assert_eq!(select("ALL", &[2]).unwrap(), vec![2]);
        assert_eq!(select(" All ", &[]).unwrap(), Vec::<u32>::new());
    }

    #[test]
    fn overlapping_ranges_collapse() {
        assert_eq!(select("3-6,1-4,5", &[]).unwrap(), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn unknown_numbers_are_kept_for_reporting() {
        assert_eq!(select("2,99", &[1, 2, 3]).unwrap(), vec![2, 99]);
    }

    #[test]
    fn whitespace_around_tokens_is_ignored() {
        assert_eq!(select(" 1 - 3 , 7 ", &[]).unwrap(), vec![1, 2, 3, 7]);
    }

    #[test]
    fn reversed_range_is_malformed() {
        assert_eq!(malformed_token("5-1"), "5-1");
    }

    #[test]
    fn non_numeric_tokens_are_malformed() {
        assert_eq!(malformed_token("abc"), "abc");
        assert_eq!(malformed_token("1,two,3"), "two");
        assert_eq!(malformed_token("+4"), "+4");
        assert_eq!(malformed_token("-3"), "-3");
        assert_eq!(malformed_token("1-2-3"), "1-2-3");
    }

    #[test]
    fn empty_tokens_are_malformed() {
        assert_eq!(malformed_token(""), "");
        assert_eq!(malformed_token("1,,2"), "");
        assert_eq!(malformed_token("4,"), "");
    }

    #[test]
    fn oversized_range_is_rejected() {
        assert_eq!(malformed_token("1-4000000000"), "1-4000000000");
        assert_eq!(malformed_token("99999999999"), "99999999999");
    }

    #[test]
    fn describe_summaries() {
        let describe = |expr: &str| EpisodeSelector::parse(expr).unwrap().describe();
        assert_eq!(describe("all"), "all episodes");
        assert_eq!(describe("7"), "episode 7");
        assert_eq!(describe("1-5"), "episodes 1-5");
        assert_eq!(describe("1,3,9"), "episodes 1, 3, 9");
        assert_eq!(describe("1-3,4,10"), "episodes 1-4, 10");
    }

    #[test]
    fn from_str_matches_parse() {
        let parsed: EpisodeSelector = "2-3".parse().unwrap();
        assert_eq!(parsed, EpisodeSelector::Numbers(BTreeSet::from([2, 3])));
    }
}
