use std::str::FromStr;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use flux_types::{PipelineRun, PipelineSpec, PipelineVars};
use tracing::instrument;

use crate::apis::{PipelineError, PipelineRunner};

/// Fetches a JSON document, reads one number out of it and optionally scales it.
///
/// Failing to observe is not an execution error, it yields an errored run so
/// the coordinator can record it and retry.
#[derive(Clone, Debug)]
pub struct HttpJsonRunner {
    client: reqwest::Client,
    path: String,
    multiply: Option<BigDecimal>,
}

impl HttpJsonRunner {
    pub fn new(client: reqwest::Client, path: impl ToString, multiply: Option<BigDecimal>) -> Self {
        Self {
            client,
            path: path.to_string(),
            multiply,
        }
    }

    async fn observe(&self, url: &str) -> Result<BigDecimal, String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|res| res.error_for_status())
            .map_err(|e| format!("request to {url} failed: {e}"))?;

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| format!("response from {url} is not json: {e}"))?;

        let value = extract(&body, &self.path)?;

        Ok(match &self.multiply {
            Some(multiply) => value * multiply,
            None => value,
        })
    }
}

/// Reads the number at the JSON pointer `path`, accepting numbers and numeric strings
pub fn extract(body: &serde_json::Value, path: &str) -> Result<BigDecimal, String> {
    let value = body
        .pointer(path)
        .ok_or_else(|| format!("nothing found at {path}"))?;

    let raw = match value {
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) => s.trim().to_string(),
        other => return Err(format!("value at {path} is not a number: {other}")),
    };

    BigDecimal::from_str(&raw).map_err(|e| format!("value at {path} ({raw}): {e}"))
}

#[async_trait]
impl PipelineRunner for HttpJsonRunner {
    #[instrument(skip(self, vars), fields(subsys = "Pipeline", job_id = spec.job_id))]
    async fn execute_run(
        &self,
        spec: &PipelineSpec,
        vars: &PipelineVars,
    ) -> Result<PipelineRun, PipelineError> {
        tracing::debug!(
            latest_answer = ?vars.latest_answer,
            updated_at = ?vars.updated_at,
            "executing run"
        );

        Ok(match self.observe(&spec.source).await {
            Ok(answer) => PipelineRun::completed(spec.job_id, answer),
            Err(err) => {
                tracing::warn!(source = %spec.source, "observation failed: {}", err);
                PipelineRun::errored(spec.job_id, err)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_numbers_and_numeric_strings() {
        let body = json!({ "data": { "usd": 1234.5, "eur": "1100.25" }, "list": [1, 2] });

        assert_eq!(
            extract(&body, "/data/usd").unwrap(),
            BigDecimal::from_str("1234.5").unwrap()
        );
        assert_eq!(
            extract(&body, "/data/eur").unwrap(),
            BigDecimal::from_str("1100.25").unwrap()
        );
        assert_eq!(extract(&body, "/list/1").unwrap(), BigDecimal::from(2));
    }

    #[test]
    fn rejects_missing_and_non_numeric_values() {
        let body = json!({ "data": { "usd": true, "name": "dollar" } });

        assert!(extract(&body, "/data/eur").is_err());
        assert!(extract(&body, "/data/usd").is_err());
        assert!(extract(&body, "/data/name").is_err());
        assert!(extract(&body, "/data").is_err());
    }

    #[test]
    fn whole_document_when_path_is_empty() {
        assert_eq!(extract(&json!(42), "").unwrap(), BigDecimal::from(42));
    }

    #[tokio::test]
    async fn unreachable_source_is_an_errored_run() {
        let runner = HttpJsonRunner::new(reqwest::Client::new(), "/usd", None);
        let spec = PipelineSpec {
            job_id: 3,
            job_name: "unreachable".to_string(),
            source: "not a url".to_string(),
        };
        let vars = PipelineVars {
            job_id: 3,
            job_name: "unreachable".to_string(),
            latest_answer: None,
            updated_at: None,
        };

        let run = runner.execute_run(&spec, &vars).await.unwrap();
        assert!(run.status.errored());
        assert!(run.answer().is_err());
    }
}
