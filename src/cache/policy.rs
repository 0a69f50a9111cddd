//! Cursor allocation policies
//!
//! A policy turns the skip of a request into a list of slice targets: skip
//! positions at which the pool should hold pre-positioned cursors, and how
//! many.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::CursorPoolConfig;

/// How the pool is populated after a read
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllocationPolicy {
    /// No pooling
    #[default]
    None,
    /// Several cursors just before the requested slice and the next ones,
    /// suited to clients paging forward
    Linear,
    /// One cursor per evenly spaced slice across the whole result set,
    /// suited to clients jumping around
    Random,
}

/// Desired cursors at one skip position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceTarget {
    pub skip: u64,
    /// Number of cursors the pool should hold at `skip`
    pub height: usize,
}

impl AllocationPolicy {
    /// True when `plan` needs the size of the result set
    pub fn needs_collection_size(&self) -> bool {
        matches!(self, AllocationPolicy::Random)
    }

    /// Slice targets for a request at `skipped`.
    ///
    /// `collection_size` is only read by `Random`; without it the plan is
    /// empty.
    pub fn plan(
        &self,
        config: &CursorPoolConfig,
        skipped: u64,
        collection_size: Option<u64>,
    ) -> Vec<SliceTarget> {
        match self {
            AllocationPolicy::None => Vec::new(),
            AllocationPolicy::Linear => Self::plan_linear(config, skipped),
            AllocationPolicy::Random => collection_size
                .map(|size| Self::plan_random(config, size))
                .unwrap_or_default(),
        }
    }

    fn plan_linear(config: &CursorPoolConfig, skipped: u64) -> Vec<SliceTarget> {
        let width = config.slice_width;
        if width == 0 || skipped < width {
            return Vec::new();
        }

        let anchor = skipped / width;

        config
            .linear_heights
            .iter()
            .enumerate()
            .map(|(offset, &height)| SliceTarget {
                skip: ((anchor + offset as u64) * width).saturating_sub(config.linear_delta),
                height,
            })
            .collect()
    }

    fn plan_random(config: &CursorPoolConfig, collection_size: u64) -> Vec<SliceTarget> {
        if config.rnd_min_width == 0 || config.rnd_max_cursors == 0 {
            return Vec::new();
        }

        let total_slices = collection_size / config.rnd_min_width + 1;

        let (slices, width) = if total_slices <= config.rnd_max_cursors {
            (total_slices, config.rnd_min_width)
        } else {
            (
                config.rnd_max_cursors,
                collection_size / config.rnd_max_cursors,
            )
        };

        (1..slices)
            .map(|slice| SliceTarget {
                skip: slice * width,
                height: 1,
            })
            .collect()
    }
}

impl FromStr for AllocationPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(AllocationPolicy::None),
            "linear" => Ok(AllocationPolicy::Linear),
            "random" => Ok(AllocationPolicy::Random),
            other => Err(format!("unknown allocation policy: {}", other)),
        }
    }
}

impl fmt::Display for AllocationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AllocationPolicy::None => "none",
            AllocationPolicy::Linear => "linear",
            AllocationPolicy::Random => "random",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn skips(targets: &[SliceTarget]) -> Vec<u64> {
        targets.iter().map(|t| t.skip).collect()
    }

    #[test]
    fn test_linear_below_width_is_empty() {
        let config = CursorPoolConfig::default();
        assert!(AllocationPolicy::Linear.plan(&config, 999, None).is_empty());
    }

    #[test]
    fn test_linear_plan() {
        let config = CursorPoolConfig::default();
        let plan = AllocationPolicy::Linear.plan(&config, 5_250, None);

        assert_eq!(skips(&plan), vec![4_900, 5_900, 6_900]);
        let heights: Vec<usize> = plan.iter().map(|t| t.height).collect();
        assert_eq!(heights, vec![4, 2, 1]);
    }

    #[test]
    fn test_random_plan_small_collection() {
        let config = CursorPoolConfig::default();
        let plan = AllocationPolicy::Random.plan(&config, 0, Some(3_500));

        // 3500 / 1000 + 1 = 4 slices, the first one is skip 0
        assert_eq!(skips(&plan), vec![1_000, 2_000, 3_000]);
        assert!(plan.iter().all(|t| t.height == 1));
    }

    #[test]
    fn test_random_plan_caps_slices() {
        let config = CursorPoolConfig::default();
        let plan = AllocationPolicy::Random.plan(&config, 0, Some(100_000));

        // 101 slices wanted, capped at 50 of width 2000
        assert_eq!(plan.len(), 49);
        assert_eq!(plan[0].skip, 2_000);
        assert_eq!(plan[48].skip, 98_000);
    }

    #[test]
    fn test_random_without_size_is_empty() {
        let config = CursorPoolConfig::default();
        assert!(AllocationPolicy::Random.plan(&config, 0, None).is_empty());
        assert!(AllocationPolicy::Random.needs_collection_size());
        assert!(!AllocationPolicy::Linear.needs_collection_size());
    }

    #[test]
    fn test_none_plan_is_empty() {
        let config = CursorPoolConfig::default();
        assert!(AllocationPolicy::None.plan(&config, 50_000, Some(100_000)).is_empty());
    }

    #[test]
    fn test_parse_policy() {
        assert_eq!("LINEAR".parse::<AllocationPolicy>(), Ok(AllocationPolicy::Linear));
        assert_eq!("random".parse::<AllocationPolicy>(), Ok(AllocationPolicy::Random));
        assert!("spiral".parse::<AllocationPolicy>().is_err());
        assert_eq!(AllocationPolicy::default().to_string(), "none");
    }
}
