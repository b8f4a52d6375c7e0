//! Feasible region of the allocation: budget, per-instrument bounds and
//! group limits.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use ks_types::OptimizerError;

const FEASIBILITY_SLACK: f64 = 1e-9;

/// Limit on the summed weight of a set of instruments (e.g. a sector cap).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupConstraint {
    pub name: String,
    /// Indices into the weight vector.
    pub members: Vec<usize>,
    pub min_weight: Option<f64>,
    pub max_weight: Option<f64>,
}

impl GroupConstraint {
    pub fn new(name: &str, members: Vec<usize>) -> Self {
        Self {
            name: name.to_string(),
            members,
            min_weight: None,
            max_weight: None,
        }
    }

    /// Group whose total weight may not exceed `max`.
    pub fn cap(name: &str, members: Vec<usize>, max: f64) -> Self {
        Self::new(name, members).with_max(max)
    }

    pub fn with_min(mut self, min: f64) -> Self {
        self.min_weight = Some(min);
        self
    }

    pub fn with_max(mut self, max: f64) -> Self {
        self.max_weight = Some(max);
        self
    }

    pub(crate) fn lower(&self) -> f64 {
        self.min_weight.unwrap_or(f64::NEG_INFINITY)
    }

    pub(crate) fn upper(&self) -> f64 {
        self.max_weight.unwrap_or(f64::INFINITY)
    }
}

/// Constraint set; weights always sum to one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraints {
    /// Default box is `[0, 1]` when false and `[-1, 1]` when true.
    pub allow_short: bool,
    /// Per-instrument `(min, max)`, replacing the default box.
    pub bounds: Option<Vec<(f64, f64)>>,
    pub groups: Vec<GroupConstraint>,
}

impl Default for Constraints {
    fn default() -> Self {
        Self::long_only()
    }
}

impl Constraints {
    pub fn long_only() -> Self {
        Self {
            allow_short: false,
            bounds: None,
            groups: Vec::new(),
        }
    }

    pub fn with_short() -> Self {
        Self {
            allow_short: true,
            ..Self::long_only()
        }
    }

    pub fn with_bounds(mut self, bounds: Vec<(f64, f64)>) -> Self {
        self.bounds = Some(bounds);
        self
    }

    pub fn with_group(mut self, group: GroupConstraint) -> Self {
        self.groups.push(group);
        self
    }

    pub fn default_bounds(&self) -> (f64, f64) {
        if self.allow_short {
            (-1.0, 1.0)
        } else {
            (0.0, 1.0)
        }
    }

    /// Validated per-instrument bounds for `n` instruments.
    pub(crate) fn resolve(&self, n: usize) -> Result<Vec<(f64, f64)>, OptimizerError> {
        let bounds = match &self.bounds {
            Some(bounds) => {
                if bounds.len() != n {
                    return Err(OptimizerError::invalid(
                        "bounds",
                        format!("{} bounds for {n} instruments", bounds.len()),
                    ));
                }
                bounds.clone()
            }
            None => vec![self.default_bounds(); n],
        };
        for (i, &(lo, hi)) in bounds.iter().enumerate() {
            if !lo.is_finite() || !hi.is_finite() || lo > hi {
                return Err(OptimizerError::invalid(
                    "bounds",
                    format!("instrument {i} has invalid bounds [{lo}, {hi}]"),
                ));
            }
            if !self.allow_short && lo < 0.0 {
                return Err(OptimizerError::invalid(
                    "bounds",
                    format!("instrument {i} has a negative lower bound but shorts are disabled"),
                ));
            }
        }

        for group in &self.groups {
            if group.members.is_empty() {
                return Err(OptimizerError::invalid(
                    "groups",
                    format!("group {} has no members", group.name),
                ));
            }
            if let Some(&bad) = group.members.iter().find(|&&i| i >= n) {
                return Err(OptimizerError::invalid(
                    "groups",
                    format!("group {} references instrument {bad} of {n}", group.name),
                ));
            }
            let mut seen = HashSet::new();
            if group.members.iter().any(|i| !seen.insert(*i)) {
                return Err(OptimizerError::invalid(
                    "groups",
                    format!("group {} lists a member twice", group.name),
                ));
            }
            if group.min_weight.is_some_and(|v| !v.is_finite())
                || group.max_weight.is_some_and(|v| !v.is_finite())
            {
                return Err(OptimizerError::invalid(
                    "groups",
                    format!("group {} has a non-finite limit", group.name),
                ));
            }
            if group.lower() > group.upper() {
                return Err(OptimizerError::invalid(
                    "groups",
                    format!("group {} minimum exceeds its maximum", group.name),
                ));
            }
        }
        Ok(bounds)
    }

    /// Reason the region is provably empty, from bound arithmetic alone.
    ///
    /// Catches budget against bounds, each group against its members' bounds
    /// and, when groups are disjoint, budget against the group limits. Other
    /// empty regions are left to the solver's infeasibility certificate.
    pub(crate) fn infeasibility(&self, bounds: &[(f64, f64)]) -> Option<String> {
        let min_total: f64 = bounds.iter().map(|b| b.0).sum();
        let max_total: f64 = bounds.iter().map(|b| b.1).sum();
        if min_total > 1.0 + FEASIBILITY_SLACK {
            return Some(format!("lower bounds sum to {min_total:.6} > 1"));
        }
        if max_total < 1.0 - FEASIBILITY_SLACK {
            return Some(format!("upper bounds sum to {max_total:.6} < 1"));
        }

        for group in &self.groups {
            let lo: f64 = group.members.iter().map(|&i| bounds[i].0).sum();
            let hi: f64 = group.members.iter().map(|&i| bounds[i].1).sum();
            if group.lower() > hi + FEASIBILITY_SLACK {
                return Some(format!(
                    "group {} minimum {} exceeds its members' capacity {hi:.6}",
                    group.name,
                    group.lower()
                ));
            }
            if group.upper() < lo - FEASIBILITY_SLACK {
                return Some(format!(
                    "group {} maximum {} is below its members' floor {lo:.6}",
                    group.name,
                    group.upper()
                ));
            }
        }

        let mut grouped = HashSet::new();
        let disjoint = self
            .groups
            .iter()
            .flat_map(|g| g.members.iter())
            .all(|i| grouped.insert(*i));
        if !disjoint {
            return None;
        }
        let (mut reach_lo, mut reach_hi) = (0.0, 0.0);
        for (i, &(lo, hi)) in bounds.iter().enumerate() {
            if !grouped.contains(&i) {
                reach_lo += lo;
                reach_hi += hi;
            }
        }
        for group in &self.groups {
            let lo: f64 = group.members.iter().map(|&i| bounds[i].0).sum();
            let hi: f64 = group.members.iter().map(|&i| bounds[i].1).sum();
            reach_lo += lo.max(group.lower());
            reach_hi += hi.min(group.upper());
        }
        if reach_hi < 1.0 - FEASIBILITY_SLACK {
            return Some(format!("group caps allow at most {reach_hi:.6} of the budget"));
        }
        if reach_lo > 1.0 + FEASIBILITY_SLACK {
            return Some(format!("group floors require at least {reach_lo:.6} of the budget"));
        }
        None
    }
}
