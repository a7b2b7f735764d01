//! Collective buffering hints.
//!
//! This module provides the `Hints` struct, which carries the tuning knobs of a collective
//! write. Hints can be set through the builder-style setters or parsed from MPI-Info style
//! `key=value` pairs. The recognised keys are:
//!
//! - `cb_buffer_size`: bytes per exchange window (the bound on aggregator scratch memory)
//! - `romio_cb_write`: `enable`, `disable` or `automatic` collective buffering
//! - `cb_nodes`: number of aggregator ranks
//! - `romio_min_fdomain_size`: lower bound on the size of a file domain
//! - `striping_unit`: align file-domain boundaries to this many bytes (0 = off)

use crate::error::{Result, TpError};

/// Default window size, 16 MiB.
pub const DEFAULT_CB_BUFFER_SIZE: usize = 16 * 1024 * 1024;

/// Tri-state switch for collective buffering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HintMode {
    /// Always run the two-phase exchange.
    Enable,
    /// Always write independently.
    Disable,
    /// Run the exchange only when accesses of different ranks interleave.
    #[default]
    Automatic,
}

impl std::str::FromStr for HintMode {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, ()> {
        match s.to_ascii_lowercase().as_str() {
            "enable" => Ok(HintMode::Enable),
            "disable" => Ok(HintMode::Disable),
            "automatic" => Ok(HintMode::Automatic),
            _ => Err(()),
        }
    }
}

/// Collective-write tuning parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hints {
    /// Size of one exchange window in bytes.
    pub cb_buffer_size: usize,
    /// Collective buffering policy.
    pub cb_write: HintMode,
    /// Number of aggregators; `None` means every rank aggregates.
    pub cb_nodes: Option<usize>,
    /// Minimum file-domain size in bytes.
    pub min_fdomain_size: u64,
    /// File-domain alignment in bytes (0 disables alignment).
    pub striping_unit: u64,
}

impl Default for Hints {
    fn default() -> Self {
        Self {
            cb_buffer_size: DEFAULT_CB_BUFFER_SIZE,
            cb_write: HintMode::Automatic,
            cb_nodes: None,
            min_fdomain_size: 0,
            striping_unit: 0,
        }
    }
}

impl Hints {
    /// Parse hints from `key=value` pairs on top of the defaults. Unknown keys are ignored,
    /// as MPI implementations do with foreign info keys.
    pub fn from_pairs<'a, I>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut hints = Hints::default();
        for (k, v) in pairs {
            hints.set(k, v)?;
        }
        Ok(hints)
    }

    /// Set a single hint by key.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let invalid = |reason| TpError::InvalidHint {
            key: key.to_string(),
            value: value.to_string(),
            reason,
        };
        match key {
            "cb_buffer_size" => {
                let n: usize = value.trim().parse().map_err(|_| invalid("not an integer"))?;
                if n == 0 {
                    return Err(invalid("must be positive"));
                }
                self.cb_buffer_size = n;
            }
            "romio_cb_write" => {
                self.cb_write = value
                    .trim()
                    .parse()
                    .map_err(|_| invalid("expected enable, disable or automatic"))?;
            }
            "cb_nodes" => {
                let n: usize = value.trim().parse().map_err(|_| invalid("not an integer"))?;
                if n == 0 {
                    return Err(invalid("must be positive"));
                }
                self.cb_nodes = Some(n);
            }
            "romio_min_fdomain_size" => {
                self.min_fdomain_size =
                    value.trim().parse().map_err(|_| invalid("not an integer"))?;
            }
            "striping_unit" => {
                self.striping_unit = value.trim().parse().map_err(|_| invalid("not an integer"))?;
            }
            _ => {}
        }
        Ok(())
    }

    pub fn with_cb_buffer_size(mut self, n: usize) -> Self {
        self.cb_buffer_size = n.max(1);
        self
    }
    pub fn with_cb_write(mut self, mode: HintMode) -> Self {
        self.cb_write = mode;
        self
    }
    pub fn with_cb_nodes(mut self, n: usize) -> Self {
        self.cb_nodes = Some(n.max(1));
        self
    }
    pub fn with_min_fdomain_size(mut self, n: u64) -> Self {
        self.min_fdomain_size = n;
        self
    }
    pub fn with_striping_unit(mut self, n: u64) -> Self {
        self.striping_unit = n;
        self
    }

    /// Aggregator count for a group of `nprocs` ranks.
    pub fn aggregators(&self, nprocs: usize) -> usize {
        self.cb_nodes.unwrap_or(nprocs).clamp(1, nprocs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_keys() {
        let h = Hints::from_pairs([
            ("cb_buffer_size", "4096"),
            ("romio_cb_write", "Enable"),
            ("cb_nodes", "2"),
            ("romio_min_fdomain_size", "512"),
            ("striping_unit", "1024"),
            ("some_other_key", "whatever"),
        ])
        .unwrap();
        assert_eq!(h.cb_buffer_size, 4096);
        assert_eq!(h.cb_write, HintMode::Enable);
        assert_eq!(h.cb_nodes, Some(2));
        assert_eq!(h.min_fdomain_size, 512);
        assert_eq!(h.striping_unit, 1024);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            Hints::from_pairs([("cb_buffer_size", "0")]),
            Err(TpError::InvalidHint { .. })
        ));
        assert!(matches!(
            Hints::from_pairs([("romio_cb_write", "sometimes")]),
            Err(TpError::InvalidHint { .. })
        ));
        assert!(Hints::from_pairs([("cb_nodes", "two")]).is_err());
    }

    #[test]
    fn aggregator_count_is_clamped_to_group() {
        assert_eq!(Hints::default().aggregators(6), 6);
        assert_eq!(Hints::default().with_cb_nodes(10).aggregators(4), 4);
        assert_eq!(Hints::default().with_cb_nodes(2).aggregators(4), 2);
    }
}
