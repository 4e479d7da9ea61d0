pub mod api;
pub mod criterion;
pub mod messages;
pub mod report;
pub mod telemetry;

pub use api::{ApiIdentity, ApiType, AttributeFilter, FilterOperator};
pub use criterion::{OpenApiCriterion, OpenApiTestResult};
pub use messages::{CoverageRequest, CoverageResponse};
pub use report::{ApiTest, ApiTestResult, QualityGateReport, ReportParameters, ReportStatus};
pub use telemetry::TracesData;
