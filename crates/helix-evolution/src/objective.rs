//! Optimization objectives.
//!
//! An objective is written `<direction>_<metric>` (`minimize_duration`,
//! `maximize_success_rate`) and paired with a target. The metric names the
//! evaluator score it reads.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{OptimizerError, Result};

/// Whether larger or smaller metric values are better.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Smaller is better.
    Minimize,
    /// Larger is better.
    Maximize,
}

/// One parsed objective.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Objective {
    /// Name as given, e.g. `minimize_duration`.
    pub name: String,
    /// Evaluator score key, e.g. `duration`.
    pub metric: String,
    /// Optimization direction.
    pub direction: Direction,
    /// Reference value the metric is normalized against.
    pub target: f64,
}

impl Objective {
    /// Parses `minimize_<metric>` or `maximize_<metric>`.
    ///
    /// # Errors
    /// [`OptimizerError::InvalidObjective`] for an unknown prefix, an empty
    /// metric or a target that is negative or not finite.
    pub fn parse(name: &str, target: f64) -> Result<Self> {
        let invalid = |reason: &str| OptimizerError::InvalidObjective {
            name: name.to_string(),
            reason: reason.to_string(),
        };
        let (prefix, metric) =
            name.split_once('_').ok_or_else(|| invalid("expected <direction>_<metric>"))?;
        let direction = match prefix {
            "minimize" => Direction::Minimize,
            "maximize" => Direction::Maximize,
            _ => return Err(invalid("direction must be 'minimize' or 'maximize'")),
        };
        if metric.is_empty() {
            return Err(invalid("metric name is empty"));
        }
        if !target.is_finite() {
            return Err(invalid("target must be finite"));
        }
        // Dividing by a negative target would flip the direction.
        if target < 0.0 {
            return Err(invalid("target must not be negative"));
        }
        Ok(Self { name: name.to_string(), metric: metric.to_string(), direction, target })
    }

    /// Parses a request's objectives map, in key order.
    ///
    /// # Errors
    /// [`OptimizerError::NoObjectives`] for an empty map, otherwise the first
    /// parse failure.
    pub fn parse_all(objectives: &BTreeMap<String, f64>) -> Result<Vec<Self>> {
        if objectives.is_empty() {
            return Err(OptimizerError::NoObjectives);
        }
        objectives.iter().map(|(name, target)| Self::parse(name, *target)).collect()
    }

    /// Maps a raw metric to a score where higher is always better.
    ///
    /// Maximized metrics score `raw / target`, minimized ones the negation.
    /// A zero target leaves the raw value unscaled.
    pub fn normalize(&self, raw: f64) -> f64 {
        let ratio = if self.target == 0.0 { raw } else { raw / self.target };
        match self.direction {
            Direction::Maximize => ratio,
            Direction::Minimize => -ratio,
        }
    }

    /// How close `raw` comes to the target, clamped to `[0, 1]`.
    ///
    /// Used as the behaviour descriptor of the elite grid.
    pub fn attainment(&self, raw: f64) -> f64 {
        if !raw.is_finite() {
            return 0.0;
        }
        let value = match self.direction {
            Direction::Maximize if self.target <= 0.0 => 1.0,
            Direction::Maximize => raw / self.target,
            Direction::Minimize if raw <= 0.0 => 1.0,
            Direction::Minimize => self.target / raw,
        };
        value.clamp(0.0, 1.0)
    }
}

impl fmt::Display for Objective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (target {})", self.name, self.target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let objective = Objective::parse("minimize_duration", 1000.0).unwrap();
        assert_eq!(objective.metric, "duration");
        assert_eq!(objective.direction, Direction::Minimize);

        let objective = Objective::parse("maximize_success_rate", 1.0).unwrap();
        assert_eq!(objective.metric, "success_rate");
        assert_eq!(objective.direction, Direction::Maximize);
    }

    #[test]
    fn test_parse_rejects_bad_names() {
        for name in ["duration", "shrink_duration", "minimize_"] {
            assert!(matches!(
                Objective::parse(name, 1.0),
                Err(OptimizerError::InvalidObjective { .. })
            ));
        }
        assert!(Objective::parse("minimize_duration", f64::INFINITY).is_err());
    }

    #[test]
    fn test_negative_target_is_rejected() {
        for name in ["minimize_duration", "maximize_success_rate"] {
            let err = Objective::parse(name, -1000.0).unwrap_err();
            assert!(matches!(err, OptimizerError::InvalidObjective { .. }));
            assert!(err.to_string().contains("negative"));
        }
        let zero = Objective::parse("minimize_duration", 0.0).unwrap();
        assert!(zero.normalize(100.0) > zero.normalize(5000.0));
    }

    #[test]
    fn test_parse_all_requires_objectives() {
        assert_eq!(Objective::parse_all(&BTreeMap::new()), Err(OptimizerError::NoObjectives));
    }

    #[test]
    fn test_normalize_orders_by_preference() {
        let duration = Objective::parse("minimize_duration", 1000.0).unwrap();
        assert!(duration.normalize(500.0) > duration.normalize(2000.0));
        assert_eq!(duration.normalize(500.0), -0.5);

        let success = Objective::parse("maximize_success_rate", 1.0).unwrap();
        assert!(success.normalize(1.0) > success.normalize(0.5));
    }

    #[test]
    fn test_attainment_is_clamped() {
        let duration = Objective::parse("minimize_duration", 1000.0).unwrap();
        assert_eq!(duration.attainment(500.0), 1.0);
        assert_eq!(duration.attainment(2000.0), 0.5);
        assert_eq!(duration.attainment(f64::NAN), 0.0);

        let success = Objective::parse("maximize_success_rate", 1.0).unwrap();
        assert_eq!(success.attainment(0.25), 0.25);
        assert_eq!(success.attainment(3.0), 1.0);
    }
}
