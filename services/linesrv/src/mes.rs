//! MES synchronization
//!
//! One upload per inspected request. The MES answers `{code, message}`;
//! `code == 0` is the only success.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{MesConfig, ParameterSpec, StationIdentity};
use crate::error::{LineSrvError, MesError, Result};
use crate::validator::{Limit, TestResult, ValidationReport};

/// Upload body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRequest {
    pub sn: String,
    pub resource: String,
    pub station_code: String,
    pub work_order_code: String,
    pub test_result: TestResult,
    pub test_data: Vec<TestDataItem>,
}

/// One parameter line of the upload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestDataItem {
    pub parametric_key: String,
    pub test_value: f64,
    pub units: String,
    pub upperlimit: f64,
    pub lowerlimit: f64,
    pub test_result: TestResult,
    #[serde(default)]
    pub remark: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResponse {
    pub code: i32,
    #[serde(default)]
    pub message: String,
}

/// Per-parameter line of an [`UploadResult`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterResult {
    pub name: String,
    pub value: f64,
    pub lower: f64,
    pub upper: f64,
    pub result: TestResult,
}

/// Record of one inspected request, handed to the result repository
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadResult {
    pub sn: String,
    pub station: String,
    pub aggregate: TestResult,
    pub parameters: Vec<ParameterResult>,
    /// `None` when the MES could not be reached
    pub mes_code: Option<i32>,
    pub mes_message: String,
    pub finished_at: DateTime<Utc>,
}

impl UploadResult {
    pub fn accepted(&self) -> bool {
        self.mes_code == Some(0)
    }
}

/// MES endpoint
#[async_trait]
pub trait MesClient: Send + Sync {
    async fn upload(&self, request: &UploadRequest) -> std::result::Result<UploadResponse, MesError>;
}

/// JSON-over-HTTP MES client
#[derive(Debug, Clone)]
pub struct HttpMesClient {
    url: String,
    client: Client,
}

impl HttpMesClient {
    pub fn new(config: &MesConfig) -> Result<Self> {
        if config.base_url.is_empty() {
            return Err(LineSrvError::config("MES base_url is empty"));
        }

        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| LineSrvError::config(format!("MES client: {e}")))?;

        Ok(Self {
            url: config.upload_url(),
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl MesClient for HttpMesClient {
    async fn upload(&self, request: &UploadRequest) -> std::result::Result<UploadResponse, MesError> {
        debug!("POST {} sn={}", self.url, request.sn);
        let response = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(|e| MesError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(MesError::Transport(format!("HTTP {status}")));
        }

        response
            .json::<UploadResponse>()
            .await
            .map_err(|e| MesError::Decode(e.to_string()))
    }
}

/// Builds uploads and interprets the MES answer
pub struct MesSync {
    client: Arc<dyn MesClient>,
}

impl MesSync {
    pub fn new(client: Arc<dyn MesClient>) -> Self {
        Self { client }
    }

    /// Pair parameters, measured values and limits by position
    pub fn build_request(
        identity: &StationIdentity,
        sn: &str,
        parameters: &[ParameterSpec],
        measured: &[f64],
        limits: &[Limit],
        report: &ValidationReport,
    ) -> UploadRequest {
        let test_data = parameters
            .iter()
            .zip(measured)
            .zip(limits)
            .zip(&report.per_parameter)
            .map(|(((spec, value), limit), result)| TestDataItem {
                parametric_key: spec.name.clone(),
                test_value: *value,
                units: spec.unit.clone(),
                upperlimit: limit.upper,
                lowerlimit: limit.lower,
                test_result: *result,
                remark: String::new(),
            })
            .collect();

        UploadRequest {
            sn: sn.to_string(),
            resource: identity.resource_code.clone(),
            station_code: identity.station_code.clone(),
            work_order_code: identity.work_order_code.clone(),
            test_result: report.aggregate,
            test_data,
        }
    }

    /// Send one upload. A non-zero code comes back as [`MesError::Rejected`].
    ///
    /// Failures are not retried here; the next rising request edge is the retry.
    pub async fn upload(
        &self,
        request: &UploadRequest,
    ) -> std::result::Result<UploadResponse, MesError> {
        let response = self.client.upload(request).await?;
        if response.code != 0 {
            return Err(MesError::Rejected {
                code: response.code,
                message: response.message,
            });
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct FixedMes {
        code: i32,
        calls: Mutex<u32>,
    }

    #[async_trait]
    impl MesClient for FixedMes {
        async fn upload(
            &self,
            _request: &UploadRequest,
        ) -> std::result::Result<UploadResponse, MesError> {
            *self.calls.lock() += 1;
            Ok(UploadResponse {
                code: self.code,
                message: "route check failed".to_string(),
            })
        }
    }

    fn request() -> UploadRequest {
        let identity = StationIdentity {
            resource_code: "R01".to_string(),
            station_code: "OP40".to_string(),
            work_order_code: "WO-001".to_string(),
        };
        let parameters = vec![ParameterSpec {
            name: "resistance".to_string(),
            unit: "ohm".to_string(),
            address: "HR120".to_string(),
            lower: Some(5.0),
            upper: Some(15.0),
            lower_address: None,
            upper_address: None,
        }];
        let report = ValidationReport {
            per_parameter: vec![TestResult::Pass],
            aggregate: TestResult::Pass,
        };
        MesSync::build_request(
            &identity,
            "SN-1",
            &parameters,
            &[10.0],
            &[Limit::new(5.0, 15.0)],
            &report,
        )
    }

    #[test]
    fn test_request_wire_format() {
        let json = serde_json::to_value(request()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "sn": "SN-1",
                "resource": "R01",
                "stationCode": "OP40",
                "workOrderCode": "WO-001",
                "testResult": "PASS",
                "testData": [{
                    "parametricKey": "resistance",
                    "testValue": 10.0,
                    "units": "ohm",
                    "upperlimit": 15.0,
                    "lowerlimit": 5.0,
                    "testResult": "PASS",
                    "remark": ""
                }]
            })
        );
    }

    #[test]
    fn test_response_message_optional() {
        let response: UploadResponse = serde_json::from_str(r#"{"code":0}"#).unwrap();
        assert_eq!(response.code, 0);
        assert!(response.message.is_empty());
    }

    #[tokio::test]
    async fn test_non_zero_code_is_rejection() {
        let client = Arc::new(FixedMes {
            code: 7,
            calls: Mutex::new(0),
        });
        let sync = MesSync::new(client.clone());
        let err = sync.upload(&request()).await.unwrap_err();
        assert_eq!(
            err,
            MesError::Rejected {
                code: 7,
                message: "route check failed".to_string()
            }
        );
        assert_eq!(*client.calls.lock(), 1);
    }

    #[tokio::test]
    async fn test_zero_code_is_success() {
        let sync = MesSync::new(Arc::new(FixedMes {
            code: 0,
            calls: Mutex::new(0),
        }));
        assert_eq!(sync.upload(&request()).await.unwrap().code, 0);
    }
}
