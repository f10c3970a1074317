//! Constraint-aware parameter space model.
//!
//! A [`ParameterSpace`] is the Cartesian product of parameter domains cut
//! down by constraints. [`Configuration`]s are only produced by
//! [`ParameterSpace::validate`], so every configuration handed to the
//! transformation engine satisfies all constraints.

pub mod eval;
pub mod value;

pub use eval::{evaluate, evaluate_bool, EvalError};
pub use value::Value;

use crate::frontend::ast::Expr;
use crate::utils::errors::SpaceError;
use log::{debug, warn};
use rand::Rng;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// How a parameter is used by the directives that reference it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ParamRole {
    /// Tile size of a tiling level
    TileSize,
    /// Unroll factor
    UnrollFactor,
    /// On/off switch of a transformation
    Toggle,
    /// Thread, block or stream count of a device kernel
    DeviceGeometry,
    /// Substituted into the build command as `@NAME`
    BuildFlag,
    /// Declared but only used by constraints
    Free,
}

impl fmt::Display for ParamRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ParamRole::TileSize => "tile size",
            ParamRole::UnrollFactor => "unroll factor",
            ParamRole::Toggle => "toggle",
            ParamRole::DeviceGeometry => "device geometry",
            ParamRole::BuildFlag => "build flag",
            ParamRole::Free => "free",
        };
        write!(f, "{}", s)
    }
}

/// A tuning parameter with its finite domain.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Parameter {
    /// Parameter name
    pub name: String,
    /// Values in declaration order
    pub domain: Vec<Value>,
    /// Inferred role
    pub role: ParamRole,
}

impl Parameter {
    /// Create a new parameter.
    pub fn new(name: impl Into<String>, domain: Vec<Value>, role: ParamRole) -> Self {
        Self { name: name.into(), domain, role }
    }

    fn index_of(&self, value: &Value) -> Option<usize> {
        self.domain.iter().position(|v| v == value)
    }
}

/// A named predicate over parameter bindings.
#[derive(Debug, Clone, PartialEq)]
pub struct Constraint {
    /// Constraint name
    pub name: String,
    /// Predicate expression
    pub expr: Expr,
}

impl Constraint {
    /// Create a new constraint.
    pub fn new(name: impl Into<String>, expr: Expr) -> Self {
        Self { name: name.into(), expr }
    }
}

/// A complete, constraint-satisfying assignment of every parameter.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(transparent)]
pub struct Configuration {
    values: BTreeMap<String, Value>,
}

impl Configuration {
    /// Value bound to `name`.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Bindings in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    /// Number of bound parameters.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check whether no parameter is bound.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Copy of the bindings, e.g. as a base for a new candidate.
    pub fn to_bindings(&self) -> BTreeMap<String, Value> {
        self.values.clone()
    }
}

impl fmt::Display for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (k, v)) in self.values.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}={}", k, v)?;
        }
        Ok(())
    }
}

/// Parameters, constraints and the constants constraints may read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterSpace {
    params: Vec<Parameter>,
    constraints: Vec<Constraint>,
    constants: BTreeMap<String, Value>,
}

impl ParameterSpace {
    /// Build a space, checking names and collapsing duplicate constraints.
    pub fn new(
        params: Vec<Parameter>,
        constraints: Vec<Constraint>,
        constants: BTreeMap<String, Value>,
    ) -> Result<Self, SpaceError> {
        let mut seen = BTreeSet::new();
        for p in &params {
            if !seen.insert(p.name.as_str()) {
                return Err(SpaceError::DuplicateParameter(p.name.clone()));
            }
            if p.domain.is_empty() {
                return Err(SpaceError::EmptyDomain(p.name.clone()));
            }
        }

        let mut kept: Vec<Constraint> = Vec::with_capacity(constraints.len());
        for c in constraints {
            for name in c.expr.names() {
                if !seen.contains(name.as_str()) && !constants.contains_key(&name) {
                    return Err(SpaceError::UnknownParameter(name));
                }
            }
            let text = c.expr.to_string();
            if let Some(prev) = kept.iter().find(|k| k.expr.to_string() == text) {
                warn!("constraint '{}' duplicates '{}' ({}); keeping one copy", c.name, prev.name, text);
                continue;
            }
            if kept.iter().any(|k| k.name == c.name) {
                warn!("constraint name '{}' is used for two different predicates; both are enforced", c.name);
            }
            kept.push(c);
        }

        debug!("parameter space: {} parameters, {} constraints", params.len(), kept.len());
        Ok(Self { params, constraints: kept, constants })
    }

    /// Space with no parameters and no constraints.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parameters in declaration order.
    pub fn params(&self) -> &[Parameter] {
        &self.params
    }

    /// Constraints after deduplication.
    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    /// Look up a parameter.
    pub fn param(&self, name: &str) -> Option<&Parameter> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Domain of `name` in declaration order.
    pub fn enumerate_domain(&self, name: &str) -> Result<impl Iterator<Item = &Value> + Clone, SpaceError> {
        self.param(name)
            .map(|p| p.domain.iter())
            .ok_or_else(|| SpaceError::UnknownParameter(name.to_string()))
    }

    /// Raw Cartesian size, ignoring constraints.
    pub fn size(&self) -> u128 {
        self.params.iter().map(|p| p.domain.len() as u128).product()
    }

    /// Check whether a configuration satisfies every constraint.
    pub fn is_valid(&self, config: &Configuration) -> bool {
        self.check_constraints(&config.values).is_ok()
    }

    /// Turn bindings into a configuration.
    ///
    /// Every parameter must be bound to a member of its domain and every
    /// constraint must hold; the error names the first failing check.
    pub fn validate(&self, bindings: &BTreeMap<String, Value>) -> Result<Configuration, SpaceError> {
        for name in bindings.keys() {
            if self.param(name).is_none() {
                return Err(SpaceError::UnknownParameter(name.clone()));
            }
        }
        for p in &self.params {
            let value = bindings
                .get(&p.name)
                .ok_or_else(|| SpaceError::MissingParameter(p.name.clone()))?;
            if p.index_of(value).is_none() {
                return Err(SpaceError::OutOfDomain { name: p.name.clone(), value: value.to_string() });
            }
        }
        self.check_constraints(bindings)?;
        Ok(Configuration { values: bindings.clone() })
    }

    fn check_constraints(&self, bindings: &BTreeMap<String, Value>) -> Result<(), SpaceError> {
        let env = |name: &str| bindings.get(name).or_else(|| self.constants.get(name)).cloned();
        for c in &self.constraints {
            let holds = evaluate_bool(&c.expr, &env)
                .map_err(|e| SpaceError::Evaluation { name: c.name.clone(), message: e.message })?;
            if !holds {
                return Err(SpaceError::ConstraintViolation {
                    name: c.name.clone(),
                    config: Configuration { values: bindings.clone() }.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Draw a valid configuration by rejection sampling.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R, max_attempts: usize) -> Result<Configuration, SpaceError> {
        for _ in 0..max_attempts {
            let bindings: BTreeMap<String, Value> = self
                .params
                .iter()
                .map(|p| (p.name.clone(), p.domain[rng.gen_range(0..p.domain.len())].clone()))
                .collect();
            match self.validate(&bindings) {
                Ok(config) => return Ok(config),
                Err(SpaceError::ConstraintViolation { .. }) | Err(SpaceError::Evaluation { .. }) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(SpaceError::SpaceExhausted { attempts: max_attempts })
    }

    /// Move one parameter of `base` to an adjacent domain value.
    ///
    /// Falls back to [`ParameterSpace::sample`] when no valid neighbor is
    /// found within `max_attempts` draws.
    pub fn perturb<R: Rng + ?Sized>(
        &self,
        base: &Configuration,
        rng: &mut R,
        max_attempts: usize,
    ) -> Result<Configuration, SpaceError> {
        let movable: Vec<&Parameter> = self.params.iter().filter(|p| p.domain.len() > 1).collect();
        if !movable.is_empty() {
            for _ in 0..max_attempts {
                let p = movable[rng.gen_range(0..movable.len())];
                let Some(current) = base.get(&p.name).and_then(|v| p.index_of(v)) else {
                    continue;
                };
                let next = match (current, rng.gen_bool(0.5)) {
                    (0, _) => 1,
                    (i, _) if i + 1 == p.domain.len() => i - 1,
                    (i, true) => i + 1,
                    (i, false) => i - 1,
                };
                let mut bindings = base.to_bindings();
                bindings.insert(p.name.clone(), p.domain[next].clone());
                if let Ok(config) = self.validate(&bindings) {
                    return Ok(config);
                }
            }
        }
        debug!("no valid neighbor of [{}]; drawing a fresh sample", base);
        self.sample(rng, max_attempts)
    }

    /// Lazily enumerate valid configurations in lexicographic domain order.
    pub fn configurations(&self) -> Configurations<'_> {
        Configurations { space: self, indices: vec![0; self.params.len()], done: false }
    }
}

/// Iterator over the valid configurations of a space.
#[derive(Debug, Clone)]
pub struct Configurations<'a> {
    space: &'a ParameterSpace,
    indices: Vec<usize>,
    done: bool,
}

impl Configurations<'_> {
    fn advance(&mut self) {
        for pos in (0..self.indices.len()).rev() {
            self.indices[pos] += 1;
            if self.indices[pos] < self.space.params[pos].domain.len() {
                return;
            }
            self.indices[pos] = 0;
        }
        self.done = true;
    }
}

impl Iterator for Configurations<'_> {
    type Item = Configuration;

    fn next(&mut self) -> Option<Configuration> {
        while !self.done {
            let bindings: BTreeMap<String, Value> = self
                .space
                .params
                .iter()
                .zip(&self.indices)
                .map(|(p, &i)| (p.name.clone(), p.domain[i].clone()))
                .collect();
            self.advance();
            if self.space.check_constraints(&bindings).is_ok() {
                return Some(Configuration { values: bindings });
            }
        }
        None
    }
}

/// Configuration bound to fixed values, for unit tests of other modules.
#[cfg(test)]
pub(crate) fn fixed_config(pairs: &[(&str, Value)]) -> Configuration {
    Configuration { values: pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect() }
}
