//! Pool-spec grammar: `<N>,<size>:<count>:<cache>{,<size>:<count>:<cache>}`. Grounded on
//! `original_source/src/platform/components/startup/command_line.c`'s `ParsePoolConfig` /
//! `ParseSubpoolConfig`, which parse every numeric token with `strtol` and reject any
//! leftover or non-digit character as fatal — reproduced here as a hard parse error rather
//! than a silent truncation.

use std::str::FromStr;

/// The original's `SPoolConfig.Subpools` is a fixed-size array; its exact bound isn't named
/// in the retrieved headers, but `SetDefaultPoolConfig` always populates exactly four
/// subpools, so four is taken as the limit (documented in DESIGN.md).
pub const MAX_SUBPOOLS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubpoolSpec {
    pub buffer_size: u32,
    pub num_buffers: u32,
    pub cache_size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSpec {
    pub subpools: Vec<SubpoolSpec>,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum PoolSpecError {
    #[error("pool spec '{0}' is malformed")]
    Malformed(String),
    #[error("subpool count {0} is out of range [1, {MAX_SUBPOOLS}]")]
    SubpoolCountOutOfRange(usize),
    #[error("declared subpool count {expected} does not match {found} entries")]
    CountMismatch { expected: usize, found: usize },
    #[error("'{0}' is not a valid base-10 unsigned integer")]
    InvalidNumber(String),
}

/// Reject anything `strtol` plus an `endptr` check would reject: empty strings, a leading
/// sign, or any non-digit character.
fn parse_strict_u32(token: &str) -> Result<u32, PoolSpecError> {
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return Err(PoolSpecError::InvalidNumber(token.to_string()));
    }
    token
        .parse::<u32>()
        .map_err(|_| PoolSpecError::InvalidNumber(token.to_string()))
}

impl FromStr for PoolSpec {
    type Err = PoolSpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut top = s.splitn(2, ',');
        let count_token = top.next().filter(|t| !t.is_empty()).ok_or_else(|| PoolSpecError::Malformed(s.to_string()))?;
        let rest = top.next().ok_or_else(|| PoolSpecError::Malformed(s.to_string()))?;

        let count = parse_strict_u32(count_token)? as usize;
        if count == 0 || count > MAX_SUBPOOLS {
            return Err(PoolSpecError::SubpoolCountOutOfRange(count));
        }

        let entries: Vec<&str> = rest.split(',').collect();
        if entries.len() != count {
            return Err(PoolSpecError::CountMismatch {
                expected: count,
                found: entries.len(),
            });
        }

        let mut subpools = Vec::with_capacity(count);
        for entry in entries {
            let fields: Vec<&str> = entry.split(':').collect();
            let [size, num, cache] = fields[..] else {
                return Err(PoolSpecError::Malformed(entry.to_string()));
            };
            subpools.push(SubpoolSpec {
                buffer_size: parse_strict_u32(size)?,
                num_buffers: parse_strict_u32(num)?,
                cache_size: parse_strict_u32(cache)?,
            });
        }

        Ok(PoolSpec { subpools })
    }
}

impl Default for PoolSpec {
    /// `SetDefaultPoolConfig`'s literal defaults: four subpools of sizes 256/512/1024/2048,
    /// counts 16384/1024/1024/1024, caches 64/32/16/8.
    fn default() -> Self {
        PoolSpec {
            subpools: vec![
                SubpoolSpec { buffer_size: 256, num_buffers: 16384, cache_size: 64 },
                SubpoolSpec { buffer_size: 512, num_buffers: 1024, cache_size: 32 },
                SubpoolSpec { buffer_size: 1024, num_buffers: 1024, cache_size: 16 },
                SubpoolSpec { buffer_size: 2048, num_buffers: 1024, cache_size: 8 },
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn default_pool_spec_matches_the_original_literal_defaults() {
        let spec = PoolSpec::default();
        assert_eq!(spec.subpools.len(), 4);
        assert_eq!(spec.subpools[0], SubpoolSpec { buffer_size: 256, num_buffers: 16384, cache_size: 64 });
        assert_eq!(spec.subpools[3], SubpoolSpec { buffer_size: 2048, num_buffers: 1024, cache_size: 8 });
    }

    #[test]
    fn parses_a_well_formed_spec() {
        let spec: PoolSpec = "2,256:16384:64,512:1024:32".parse().unwrap();
        assert_eq!(spec.subpools.len(), 2);
        assert_eq!(spec.subpools[1].num_buffers, 1024);
    }

    #[test_case("0,1:1:1" ; "zero subpools is rejected")]
    #[test_case("5,1:1:1,1:1:1,1:1:1,1:1:1,1:1:1" ; "more than MAX_SUBPOOLS is rejected")]
    #[test_case("2,1:1:1" ; "declared count does not match entry count")]
    #[test_case("1,1:1" ; "missing a field is malformed")]
    #[test_case("1,1:1:1x" ; "a trailing non-digit character is fatal")]
    #[test_case("1,-1:1:1" ; "a leading sign is fatal")]
    fn rejects_malformed_specs(input: &str) {
        assert!(input.parse::<PoolSpec>().is_err());
    }
}
