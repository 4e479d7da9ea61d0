use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// OpenAPI coverage criteria
///
/// Closed set: a new criterion is added here and in the computation table in
/// `coverage::criteria`, nowhere else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OpenApiCriterion {
    PathCoverage,
    HttpMethodCoverage,
    ResponseCodeCoverage,
    ErrorResponseCodeCoverage,
    RequiredParameterCoverage,
    ParameterCoverage,
    RequiredErrorFields,
}

impl OpenApiCriterion {
    pub const ALL: [OpenApiCriterion; 7] = [
        OpenApiCriterion::PathCoverage,
        OpenApiCriterion::HttpMethodCoverage,
        OpenApiCriterion::ResponseCodeCoverage,
        OpenApiCriterion::ErrorResponseCodeCoverage,
        OpenApiCriterion::RequiredParameterCoverage,
        OpenApiCriterion::ParameterCoverage,
        OpenApiCriterion::RequiredErrorFields,
    ];

    /// The criterion whose measured items are a superset of this one's
    pub fn parent(self) -> Option<OpenApiCriterion> {
        match self {
            Self::PathCoverage => None,
            Self::HttpMethodCoverage => Some(Self::PathCoverage),
            Self::ResponseCodeCoverage => Some(Self::HttpMethodCoverage),
            Self::ErrorResponseCodeCoverage => Some(Self::ResponseCodeCoverage),
            Self::ParameterCoverage => Some(Self::HttpMethodCoverage),
            Self::RequiredParameterCoverage => Some(Self::ParameterCoverage),
            Self::RequiredErrorFields => Some(Self::ErrorResponseCodeCoverage),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::PathCoverage => "PATH_COVERAGE",
            Self::HttpMethodCoverage => "HTTP_METHOD_COVERAGE",
            Self::ResponseCodeCoverage => "RESPONSE_CODE_COVERAGE",
            Self::ErrorResponseCodeCoverage => "ERROR_RESPONSE_CODE_COVERAGE",
            Self::RequiredParameterCoverage => "REQUIRED_PARAMETER_COVERAGE",
            Self::ParameterCoverage => "PARAMETER_COVERAGE",
            Self::RequiredErrorFields => "REQUIRED_ERROR_FIELDS",
        }
    }
}

impl fmt::Display for OpenApiCriterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OpenApiCriterion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|criterion| criterion.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("Unknown OpenAPI criterion: {}", s))
    }
}

/// Result of computing one criterion for one API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenApiTestResult {
    pub criterion: OpenApiCriterion,
    /// Ratio in `[0, 1]`
    pub coverage: f64,
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "info")]
    pub additional_info: Option<String>,
}

impl OpenApiTestResult {
    /// Build a result from covered/declared counts.
    ///
    /// Nothing declared counts as fully covered.
    pub fn from_counts(
        criterion: OpenApiCriterion,
        covered: usize,
        declared: usize,
        duration: Duration,
        additional_info: Option<String>,
    ) -> Self {
        let coverage = if declared == 0 || covered >= declared {
            1.0
        } else {
            covered as f64 / declared as f64
        };
        Self {
            criterion,
            coverage,
            duration,
            additional_info,
        }
    }
}
