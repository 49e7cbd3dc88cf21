//! Export to the T4 auto-tuning results format
//!
//! A one-way projection of a latest-version cache document: one T4 result
//! per cache line. T4 documents are never converted back.

use crate::document::{FailureKind, Header, Line, Runtime};
use crate::error::{CacheError, CacheResult};
use crate::schema::{SchemaValidator, T4_SCHEMA_VERSION};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Unit of every T4 timing field
pub const T4_TIME_UNIT: &str = "milliseconds";

/// Objective every exported result is ranked by
pub const T4_OBJECTIVE: &str = "time";

/// T4 results document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct T4Document {
    /// T4 format version
    pub schema_version: String,
    /// Document-wide metadata
    pub metadata: T4Metadata,
    /// One entry per benchmarked configuration
    pub results: Vec<T4Result>,
}

/// T4 metadata block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct T4Metadata {
    /// Unit of timing fields
    pub timeunit: String,
}

/// Validity classification of a T4 result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Invalidity {
    /// Run exceeded its time budget
    Timeout,
    /// Kernel failed to compile
    Compile,
    /// Kernel failed at runtime
    Runtime,
    /// Output failed verification
    Correctness,
    /// Configuration violates constraints
    Constraints,
    /// Valid result
    Correct,
}

impl From<FailureKind> for Invalidity {
    fn from(kind: FailureKind) -> Self {
        match kind {
            FailureKind::InvalidConfig => Self::Constraints,
            FailureKind::CompilationFailedConfig => Self::Compile,
            FailureKind::RuntimeFailedConfig => Self::Runtime,
        }
    }
}

/// One benchmarked configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct T4Result {
    /// Measurement time
    pub timestamp: String,
    /// Tune parameter values
    pub configuration: Map<String, Value>,
    /// Timing breakdown
    pub times: T4Times,
    /// Validity
    pub invalidity: Invalidity,
    /// 1 for valid results, 0 otherwise
    pub correctness: u8,
    /// Measured quantities
    pub measurements: Vec<T4Measurement>,
    /// Names of measurements used as objectives
    pub objectives: Vec<String>,
}

/// T4 timing breakdown
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct T4Times {
    /// Compile time
    pub compilation_time: f64,
    /// Framework overhead
    pub framework: f64,
    /// Search strategy overhead
    pub search_algorithm: f64,
    /// Verification time
    pub validation: f64,
    /// Individual benchmark runtimes
    pub runtimes: Vec<f64>,
}

/// Named measurement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct T4Measurement {
    /// Quantity name
    pub name: String,
    /// Value
    pub value: f64,
    /// Unit
    pub unit: String,
}

impl T4Document {
    /// Serialize to JSON value
    ///
    /// # Errors
    /// Fails only on non-finite numbers.
    pub fn to_value(&self) -> CacheResult<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Project a latest-version cache document into T4
///
/// Checks shape only; migrate older documents first.
///
/// # Errors
/// Returns [`CacheError::InvalidHeader`] or [`CacheError::MalformedDocument`]
/// if a field the projection reads is missing or mistyped.
pub fn to_t4(document: &Value) -> CacheResult<T4Document> {
    let header = Header::from_document(document)?;
    let cache = document
        .get("cache")
        .and_then(Value::as_object)
        .ok_or_else(|| CacheError::MalformedDocument("'cache' must be an object".to_string()))?;

    let results = cache
        .iter()
        .map(|(key, entry)| {
            let entry = entry.as_object().ok_or_else(|| {
                CacheError::MalformedDocument(format!("line '{key}' is not an object"))
            })?;
            to_result(&header, Line::new(key, entry))
        })
        .collect::<CacheResult<Vec<_>>>()?;

    Ok(T4Document {
        schema_version: T4_SCHEMA_VERSION.to_string(),
        metadata: T4Metadata {
            timeunit: T4_TIME_UNIT.to_string(),
        },
        results,
    })
}

fn to_result(header: &Header, line: Line<'_>) -> CacheResult<T4Result> {
    let mut configuration = Map::new();
    for key in &header.tune_params_keys {
        let value = line.param(key).ok_or_else(|| {
            CacheError::MalformedDocument(format!("line '{}' has no value for '{key}'", line.key()))
        })?;
        configuration.insert(key.clone(), value.clone());
    }

    let mut measurements = Vec::new();
    let (invalidity, correctness) = match line.time()? {
        Runtime::Measured(t) => {
            measurements.push(T4Measurement {
                name: "time".to_string(),
                value: t,
                unit: "ms".to_string(),
            });
            (Invalidity::Correct, 1)
        }
        Runtime::Failed(kind) => (Invalidity::from(kind), 0),
    };
    if let Some(gflops) = line.gflops() {
        measurements.push(T4Measurement {
            name: "GFLOP/s".to_string(),
            value: gflops,
            unit: "GFLOP/s".to_string(),
        });
    }

    Ok(T4Result {
        timestamp: line.timestamp_str()?.to_string(),
        configuration,
        times: T4Times {
            compilation_time: line.compile_time()?,
            framework: line.framework_time()?,
            search_algorithm: line.strategy_time()?,
            validation: line.verification_time()?,
            runtimes: line.times()?,
        },
        invalidity,
        correctness,
        measurements,
        objectives: vec![T4_OBJECTIVE.to_string()],
    })
}

/// Export and validate against the T4 results schema
///
/// # Errors
/// Projection errors from [`to_t4`], or [`CacheError::SchemaViolation`] if
/// the output does not conform.
pub fn to_t4_validated(document: &Value, validator: &SchemaValidator) -> CacheResult<Value> {
    let t4 = to_t4(document)?.to_value()?;
    validator.validate_t4(&t4)?;
    Ok(t4)
}
