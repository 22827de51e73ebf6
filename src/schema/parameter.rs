//! Parameter schema: the bounded search space explored by evolution.
//!
//! A schema is an ordered list of [`ParameterSpec`]s plus the run-wide
//! [`FitnessDirection`]. Genomes store their values positionally in schema
//! order, so the schema is the only place parameter names live.

use std::cmp::Ordering;
use std::collections::HashSet;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Largest magnitude below which every integer is exact in `f64` (2^53).
pub const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_992.0;

/// Whether sampled values are continuous or rounded to integers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ParameterKind {
    #[default]
    Continuous,
    Integer,
}

/// A single tunable parameter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParameterSpec {
    /// Parameter name, as passed to the evaluator.
    pub name: String,
    /// Inclusive lower bound.
    pub minimum: f64,
    /// Inclusive upper bound.
    pub maximum: f64,
    /// Sampling rule.
    #[serde(default)]
    pub kind: ParameterKind,
}

impl ParameterSpec {
    /// Continuous parameter in `[minimum, maximum]`.
    pub fn continuous(name: impl Into<String>, minimum: f64, maximum: f64) -> Self {
        Self {
            name: name.into(),
            minimum,
            maximum,
            kind: ParameterKind::Continuous,
        }
    }

    /// Integer parameter in `[minimum, maximum]`.
    pub fn integer(name: impl Into<String>, minimum: f64, maximum: f64) -> Self {
        Self {
            name: name.into(),
            minimum,
            maximum,
            kind: ParameterKind::Integer,
        }
    }

    /// Width of the range.
    pub fn range(&self) -> f64 {
        self.maximum - self.minimum
    }

    /// Integer sub-range `[ceil(min), floor(max)]`.
    fn integer_bounds(&self) -> (f64, f64) {
        (self.minimum.ceil(), self.maximum.floor())
    }

    /// Draw a value uniformly from the parameter's range.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        match self.kind {
            ParameterKind::Continuous => {
                if self.minimum == self.maximum {
                    self.minimum
                } else {
                    self.clamp(rng.gen_range(self.minimum..=self.maximum))
                }
            }
            ParameterKind::Integer => {
                let (lo, hi) = self.integer_bounds();
                rng.gen_range(lo as i64..=hi as i64) as f64
            }
        }
    }

    /// Bring a value back into bounds, rounding integer parameters.
    pub fn clamp(&self, value: f64) -> f64 {
        if value.is_nan() {
            return self.clamp(self.minimum);
        }
        match self.kind {
            ParameterKind::Continuous => value.clamp(self.minimum, self.maximum),
            ParameterKind::Integer => {
                let (lo, hi) = self.integer_bounds();
                value.round().clamp(lo, hi)
            }
        }
    }

    /// Whether a value lies inside the bounds (and is integral for integer specs).
    pub fn contains(&self, value: f64) -> bool {
        let in_range = value >= self.minimum && value <= self.maximum;
        match self.kind {
            ParameterKind::Continuous => in_range,
            ParameterKind::Integer => in_range && value.fract() == 0.0,
        }
    }

    fn validate(&self) -> Result<(), SchemaError> {
        if self.name.trim().is_empty() {
            return Err(SchemaError::EmptyName);
        }
        if !self.minimum.is_finite() || !self.maximum.is_finite() {
            return Err(SchemaError::NonFiniteBound {
                name: self.name.clone(),
            });
        }
        if self.minimum > self.maximum {
            return Err(SchemaError::InvalidBounds {
                name: self.name.clone(),
                minimum: self.minimum,
                maximum: self.maximum,
            });
        }
        if !self.range().is_finite() {
            return Err(SchemaError::UnboundedRange {
                name: self.name.clone(),
            });
        }
        if self.kind == ParameterKind::Integer {
            if self.minimum.abs() > MAX_EXACT_INTEGER || self.maximum.abs() > MAX_EXACT_INTEGER {
                return Err(SchemaError::IntegerOutOfRange {
                    name: self.name.clone(),
                    minimum: self.minimum,
                    maximum: self.maximum,
                });
            }
            let (lo, hi) = self.integer_bounds();
            if lo > hi {
                return Err(SchemaError::NoIntegerInRange {
                    name: self.name.clone(),
                    minimum: self.minimum,
                    maximum: self.maximum,
                });
            }
        }
        Ok(())
    }
}

/// Whether larger or smaller fitness values are better.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FitnessDirection {
    Maximize,
    Minimize,
}

impl FitnessDirection {
    /// Order two fitness values so that `Greater` means `a` is better.
    pub fn compare(self, a: f64, b: f64) -> Ordering {
        let ord = a.total_cmp(&b);
        match self {
            Self::Maximize => ord,
            Self::Minimize => ord.reverse(),
        }
    }

    /// Strictly better.
    pub fn is_better(self, a: f64, b: f64) -> bool {
        self.compare(a, b) == Ordering::Greater
    }

    /// Signed improvement from `from` to `to` (positive when `to` is better).
    pub fn improvement(self, from: f64, to: f64) -> f64 {
        match self {
            Self::Maximize => to - from,
            Self::Minimize => from - to,
        }
    }

    /// Value every real fitness beats.
    pub fn worst_value(self) -> f64 {
        match self {
            Self::Maximize => f64::NEG_INFINITY,
            Self::Minimize => f64::INFINITY,
        }
    }
}

/// Ordered, validated set of parameters.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ParameterSchema {
    parameters: Vec<ParameterSpec>,
    direction: FitnessDirection,
}

impl ParameterSchema {
    /// Build and validate a schema.
    pub fn new(
        parameters: Vec<ParameterSpec>,
        direction: FitnessDirection,
    ) -> Result<Self, SchemaError> {
        let schema = Self {
            parameters,
            direction,
        };
        schema.validate()?;
        Ok(schema)
    }

    /// Check every spec and name uniqueness.
    pub fn validate(&self) -> Result<(), SchemaError> {
        if self.parameters.is_empty() {
            return Err(SchemaError::Empty);
        }
        let mut seen = HashSet::with_capacity(self.parameters.len());
        for spec in &self.parameters {
            spec.validate()?;
            if !seen.insert(spec.name.as_str()) {
                return Err(SchemaError::DuplicateName(spec.name.clone()));
            }
        }
        Ok(())
    }

    pub fn parameters(&self) -> &[ParameterSpec] {
        &self.parameters
    }

    pub fn direction(&self) -> FitnessDirection {
        self.direction
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ParameterSpec> {
        self.parameters.get(index)
    }

    /// Position of a parameter by name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.parameters.iter().position(|p| p.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ParameterSpec> {
        self.parameters.iter()
    }

    /// Whether `values` has one in-bounds entry per parameter.
    pub fn accepts(&self, values: &[f64]) -> bool {
        values.len() == self.parameters.len()
            && self
                .parameters
                .iter()
                .zip(values)
                .all(|(spec, &v)| spec.contains(v))
    }
}

// Deserialization goes through `new` so a schema read from config is always valid.
#[derive(Deserialize)]
struct ParameterSchemaRepr {
    parameters: Vec<ParameterSpec>,
    direction: FitnessDirection,
}

impl<'de> Deserialize<'de> for ParameterSchema {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let repr = ParameterSchemaRepr::deserialize(deserializer)?;
        ParameterSchema::new(repr.parameters, repr.direction).map_err(serde::de::Error::custom)
    }
}

/// Borrowed name/value view of one genome, handed to evaluators.
#[derive(Debug, Clone, Copy)]
pub struct ParameterView<'a> {
    schema: &'a ParameterSchema,
    values: &'a [f64],
}

impl<'a> ParameterView<'a> {
    pub fn new(schema: &'a ParameterSchema, values: &'a [f64]) -> Self {
        debug_assert_eq!(schema.len(), values.len());
        Self { schema, values }
    }

    /// Values in schema order.
    pub fn values(&self) -> &'a [f64] {
        self.values
    }

    pub fn schema(&self) -> &'a ParameterSchema {
        self.schema
    }

    /// Look up a value by parameter name.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.schema.index_of(name).map(|i| self.values[i])
    }

    /// `(spec, value)` pairs in schema order.
    pub fn iter(&self) -> impl Iterator<Item = (&'a ParameterSpec, f64)> + 'a {
        self.schema.parameters.iter().zip(self.values.iter().copied())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Parameter schema validation errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchemaError {
    #[error("Schema must declare at least one parameter")]
    Empty,
    #[error("Parameter name must not be empty")]
    EmptyName,
    #[error("Duplicate parameter name: {0}")]
    DuplicateName(String),
    #[error("Parameter {name} has non-finite bounds")]
    NonFiniteBound { name: String },
    #[error("Parameter {name}: minimum ({minimum}) > maximum ({maximum})")]
    InvalidBounds {
        name: String,
        minimum: f64,
        maximum: f64,
    },
    #[error("Parameter {name} spans a range too wide to represent")]
    UnboundedRange { name: String },
    #[error("Integer parameter {name} bounds [{minimum}, {maximum}] exceed ±2^53")]
    IntegerOutOfRange {
        name: String,
        minimum: f64,
        maximum: f64,
    },
    #[error("Integer parameter {name} has no integer in [{minimum}, {maximum}]")]
    NoIntegerInRange {
        name: String,
        minimum: f64,
        maximum: f64,
    },
}
