//! Optimization methods (tabs) and their parameter contracts.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Method parameters as sent to the backend.
pub type MethodParams = BTreeMap<String, f64>;

/// One optimization method, shown as its own tab. Each tab owns one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MethodTab {
    /// Biogeography-based optimization.
    Bbo,
    /// Cultural algorithm.
    Cultural,
    /// Harmony search.
    Harmony,
    /// Genetic algorithm.
    Ga,
    /// Differential evolution.
    De,
    /// Particle swarm optimization.
    Pso,
}

impl MethodTab {
    /// Every supported method, in display order.
    pub const ALL: [MethodTab; 6] = [
        MethodTab::Bbo,
        MethodTab::Cultural,
        MethodTab::Harmony,
        MethodTab::Ga,
        MethodTab::De,
        MethodTab::Pso,
    ];

    /// Wire identifier (`method_id`).
    pub fn as_str(self) -> &'static str {
        match self {
            MethodTab::Bbo => "bbo",
            MethodTab::Cultural => "cultural",
            MethodTab::Harmony => "harmony",
            MethodTab::Ga => "ga",
            MethodTab::De => "de",
            MethodTab::Pso => "pso",
        }
    }

    /// Position in [`MethodTab::ALL`].
    pub fn index(self) -> usize {
        match self {
            MethodTab::Bbo => 0,
            MethodTab::Cultural => 1,
            MethodTab::Harmony => 2,
            MethodTab::Ga => 3,
            MethodTab::De => 4,
            MethodTab::Pso => 5,
        }
    }

    /// Parameter contracts for this method.
    pub fn param_specs(self) -> &'static [ParamSpec] {
        match self {
            MethodTab::Bbo => BBO_PARAMS,
            MethodTab::Cultural => CULTURAL_PARAMS,
            MethodTab::Harmony => HARMONY_PARAMS,
            MethodTab::Ga => GA_PARAMS,
            MethodTab::De => DE_PARAMS,
            MethodTab::Pso => PSO_PARAMS,
        }
    }

    /// Parameters filled with their defaults.
    pub fn default_params(self) -> MethodParams {
        self.param_specs()
            .iter()
            .map(|spec| (spec.name.to_string(), spec.default))
            .collect()
    }
}

impl fmt::Display for MethodTab {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MethodTab {
    type Err = ParamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MethodTab::ALL
            .into_iter()
            .find(|tab| tab.as_str() == s)
            .ok_or_else(|| ParamError::UnknownMethod(s.to_string()))
    }
}

/// Accepted range and default of a single method parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub min: f64,
    pub max: f64,
    /// Whether `min` itself is excluded.
    pub min_exclusive: bool,
    /// Whether the value must be a whole number.
    pub integer: bool,
    pub default: f64,
}

impl ParamSpec {
    const fn unit(name: &'static str, default: f64) -> Self {
        Self {
            name,
            min: 0.0,
            max: 1.0,
            min_exclusive: false,
            integer: false,
            default,
        }
    }

    const fn count(name: &'static str, default: f64) -> Self {
        Self {
            name,
            min: 0.0,
            max: f64::INFINITY,
            min_exclusive: false,
            integer: true,
            default,
        }
    }

    fn check(&self, value: f64) -> Result<(), ParamError> {
        if !value.is_finite() {
            return Err(ParamError::NonFinite(self.name.to_string()));
        }
        let below = if self.min_exclusive {
            value <= self.min
        } else {
            value < self.min
        };
        if below || value > self.max {
            return Err(ParamError::OutOfRange {
                name: self.name.to_string(),
                value,
                min: self.min,
                max: self.max,
            });
        }
        if self.integer && value.fract() != 0.0 {
            return Err(ParamError::NotInteger {
                name: self.name.to_string(),
                value,
            });
        }
        Ok(())
    }
}

const BBO_PARAMS: &[ParamSpec] = &[
    ParamSpec::unit("mutation_probability", 0.04),
    ParamSpec::unit("blending_rate", 0.5),
    ParamSpec::count("elite_count", 2.0),
];

const CULTURAL_PARAMS: &[ParamSpec] = &[
    ParamSpec {
        min_exclusive: true,
        ..ParamSpec::unit("accepted_ratio", 0.2)
    },
    ParamSpec::unit("influence_rate", 0.5),
    ParamSpec::count("elite_count", 2.0),
];

const HARMONY_PARAMS: &[ParamSpec] = &[
    ParamSpec::unit("hmcr", 0.9),
    ParamSpec::unit("par", 0.3),
    ParamSpec {
        name: "bandwidth",
        min: 0.0,
        max: f64::INFINITY,
        min_exclusive: true,
        integer: false,
        default: 0.1,
    },
];

const GA_PARAMS: &[ParamSpec] = &[
    ParamSpec::unit("crossover_rate", 0.8),
    ParamSpec::unit("mutation_rate", 0.1),
    ParamSpec::unit("mutation_strength", 0.1),
    ParamSpec::count("elite_count", 2.0),
];

const DE_PARAMS: &[ParamSpec] = &[
    ParamSpec {
        max: 2.0,
        ..ParamSpec::unit("differential_weight", 0.8)
    },
    ParamSpec::unit("crossover_probability", 0.9),
];

const PSO_PARAMS: &[ParamSpec] = &[
    ParamSpec::unit("inertia", 0.7),
    ParamSpec {
        max: 4.0,
        ..ParamSpec::unit("cognitive", 1.5)
    },
    ParamSpec {
        max: 4.0,
        ..ParamSpec::unit("social", 1.5)
    },
];

/// Iteration budget and population size of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSettings {
    pub iterations_count: u32,
    pub population_size: u32,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            iterations_count: 10,
            population_size: 50,
        }
    }
}

impl RunSettings {
    pub fn validate(&self) -> Result<(), ParamError> {
        if self.iterations_count == 0 {
            return Err(ParamError::InvalidIterations);
        }
        if self.population_size < 2 {
            return Err(ParamError::PopulationTooSmall(self.population_size));
        }
        Ok(())
    }
}

/// Method parameter validation errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParamError {
    #[error("Unknown method '{0}'")]
    UnknownMethod(String),
    #[error("Method '{method}' has no parameter '{name}'")]
    Unknown { method: MethodTab, name: String },
    #[error("Parameter '{0}' must be a finite number")]
    NonFinite(String),
    #[error("Parameter '{name}' = {value} is outside [{min}, {max}]")]
    OutOfRange {
        name: String,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("Parameter '{name}' must be a whole number, got {value}")]
    NotInteger { name: String, value: f64 },
    #[error("Elite count {elite} must be smaller than population size {population}")]
    EliteCount { elite: u32, population: u32 },
    #[error("Iteration count must be positive")]
    InvalidIterations,
    #[error("Population size must be at least 2, got {0}")]
    PopulationTooSmall(u32),
}

/// Check `params` against the contracts of `tab`, filling in defaults for
/// missing entries.
pub fn validate_params(
    tab: MethodTab,
    params: &MethodParams,
    settings: &RunSettings,
) -> Result<MethodParams, ParamError> {
    settings.validate()?;
    let specs = tab.param_specs();

    if let Some(name) = params
        .keys()
        .find(|name| !specs.iter().any(|spec| spec.name == name.as_str()))
    {
        return Err(ParamError::Unknown {
            method: tab,
            name: name.clone(),
        });
    }

    let mut resolved = tab.default_params();
    for spec in specs {
        if let Some(&value) = params.get(spec.name) {
            spec.check(value)?;
            resolved.insert(spec.name.to_string(), value);
        }
    }

    if let Some(&elite) = resolved.get("elite_count") {
        let elite = elite as u32;
        if elite >= settings.population_size {
            return Err(ParamError::EliteCount {
                elite,
                population: settings.population_size,
            });
        }
    }

    Ok(resolved)
}
