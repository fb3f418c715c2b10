//! JSON-RPC 2.0 and REST transport over an injected HTTP client.

use chainpump_telemetry::{with_timing, Timing};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::trace;

use crate::error::PumpError;

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcErrorBody>,
    id: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcErrorBody {
    code: i64,
    message: String,
}

impl JsonRpcErrorBody {
    fn into_error(self, method: &str) -> PumpError {
        PumpError::Rpc {
            method: method.to_string(),
            code: self.code,
            message: self.message,
        }
    }
}

/// Transport shared by the family clients.
pub struct JsonRpcTransport {
    client: Client,
    endpoint: String,
    timing: Arc<dyn Timing>,
}

impl JsonRpcTransport {
    /// `client` is shared and pooled; `endpoint` is the node base URL.
    pub fn new(client: Client, endpoint: &str, timing: Arc<dyn Timing>) -> Self {
        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            timing,
        }
    }

    pub fn timing(&self) -> &dyn Timing {
        self.timing.as_ref()
    }

    /// Call `method`; `Ok(None)` when the node answered with a null result.
    ///
    /// A non-null `error` always fails the call, whatever `result` holds.
    pub async fn call<T>(&self, method: &str, params: Value) -> Result<Option<T>, PumpError>
    where
        T: DeserializeOwned,
    {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: 1,
            method,
            params,
        };

        let response: JsonRpcResponse<T> =
            with_timing(self.timing(), method, self.post(method, &request)).await?;

        if let Some(error) = response.error {
            return Err(error.into_error(method));
        }
        Ok(response.result)
    }

    /// Call `method` once per params entry in a single batch request.
    ///
    /// Results come back in params order; any element with an error or a
    /// null result fails the whole batch.
    pub async fn call_batch<T>(&self, method: &str, params: Vec<Value>) -> Result<Vec<T>, PumpError>
    where
        T: DeserializeOwned,
    {
        if params.is_empty() {
            return Ok(Vec::new());
        }

        let expected = params.len();
        let requests: Vec<JsonRpcRequest<'_>> = params
            .into_iter()
            .enumerate()
            .map(|(index, params)| JsonRpcRequest {
                jsonrpc: "2.0",
                id: index as u64,
                method,
                params,
            })
            .collect();

        let timer_name = format!("{}_batch", method);
        let mut responses: Vec<JsonRpcResponse<T>> =
            with_timing(self.timing(), &timer_name, self.post(method, &requests)).await?;

        if responses.len() != expected {
            return Err(PumpError::communication(
                method,
                format!("batch returned {} responses for {} requests", responses.len(), expected),
            ));
        }

        // Servers may answer batch elements in any order.
        responses.sort_by_key(|response| {
            response
                .id
                .as_ref()
                .and_then(Value::as_u64)
                .unwrap_or(u64::MAX)
        });

        let mut results = Vec::with_capacity(expected);
        for response in responses {
            if let Some(error) = response.error {
                return Err(error.into_error(method));
            }
            let result = response.result.ok_or_else(|| {
                PumpError::communication(method, "batch element returned a null result")
            })?;
            results.push(result);
        }
        Ok(results)
    }

    /// GET `<endpoint><path>`; `Ok(None)` on 404.
    pub async fn get_rest<T>(&self, timer_name: &str, path: &str) -> Result<Option<T>, PumpError>
    where
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.endpoint, path);
        trace!("Querying {}", url);

        with_timing(self.timing(), timer_name, async {
            let response = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(|e| PumpError::communication(path, e))?;

            let status = response.status();
            if status == StatusCode::NOT_FOUND {
                return Ok(None);
            }
            if !status.is_success() {
                return Err(PumpError::communication(path, format!("HTTP status {}", status)));
            }

            let body = response
                .bytes()
                .await
                .map_err(|e| PumpError::communication(path, e))?;
            serde_json::from_slice(&body)
                .map(Some)
                .map_err(|e| PumpError::communication(path, format!("undecodable body: {}", e)))
        })
        .await
    }

    async fn post<B, R>(&self, method: &str, body: &B) -> Result<R, PumpError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let response = self
            .client
            .post(&self.endpoint)
            .json(body)
            .send()
            .await
            .map_err(|e| PumpError::communication(method, e))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| PumpError::communication(method, e))?;

        if !status.is_success() {
            // Some nodes answer RPC errors with a non-2xx status and an error envelope.
            if let Ok(JsonRpcResponse::<Value> {
                error: Some(error), ..
            }) = serde_json::from_slice(&body)
            {
                return Err(error.into_error(method));
            }
            return Err(PumpError::communication(method, format!("HTTP status {}", status)));
        }

        serde_json::from_slice(&body)
            .map_err(|e| PumpError::communication(method, format!("undecodable body: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainpump_telemetry::NoopTiming;
    use mockito::Matcher;
    use serde_json::json;

    fn transport(url: &str) -> JsonRpcTransport {
        JsonRpcTransport::new(Client::new(), url, Arc::new(NoopTiming))
    }

    #[tokio::test]
    async fn error_field_wins_over_result() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({"method": "getblockcount"})))
            .with_status(200)
            .with_body(r#"{"result": 12, "error": {"code": -1, "message": "warming up"}, "id": 1}"#)
            .create_async()
            .await;

        let result = transport(&server.url())
            .call::<u64>("getblockcount", json!([]))
            .await;

        match result {
            Err(PumpError::Rpc { code, message, .. }) => {
                assert_eq!(code, -1);
                assert_eq!(message, "warming up");
            }
            other => panic!("expected rpc error, got {:?}", other),
        }
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn null_result_is_none() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .with_status(200)
            .with_body(r#"{"result": null, "error": null, "id": 1}"#)
            .create_async()
            .await;

        let result = transport(&server.url())
            .call::<String>("eth_getBlockByNumber", json!(["0x10", false]))
            .await
            .unwrap();
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn error_envelope_behind_http_500_is_an_rpc_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .with_status(500)
            .with_body(r#"{"result": null, "error": {"code": -8, "message": "Block height out of range"}, "id": 1}"#)
            .create_async()
            .await;

        let result = transport(&server.url())
            .call::<String>("getblockhash", json!([99]))
            .await;
        assert!(matches!(result, Err(PumpError::Rpc { code: -8, .. })));
    }

    #[tokio::test]
    async fn plain_server_error_is_communication_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .with_status(503)
            .with_body("service unavailable")
            .create_async()
            .await;

        let result = transport(&server.url())
            .call::<u64>("getblockcount", json!([]))
            .await;
        assert!(matches!(result, Err(PumpError::Communication { .. })));
    }

    #[tokio::test]
    async fn batch_is_reordered_and_fails_on_any_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .with_status(200)
            .with_body(r#"[{"result": "b", "error": null, "id": 1}, {"result": "a", "error": null, "id": 0}]"#)
            .create_async()
            .await;

        let results: Vec<String> = transport(&server.url())
            .call_batch("getrawtransaction", vec![json!(["a", true]), json!(["b", true])])
            .await
            .unwrap();
        assert_eq!(results, vec!["a", "b"]);

        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .with_status(200)
            .with_body(r#"[{"result": "a", "error": null, "id": 0}, {"result": null, "error": {"code": -5, "message": "No such mempool or blockchain transaction"}, "id": 1}]"#)
            .create_async()
            .await;

        let result = transport(&server.url())
            .call_batch::<String>("getrawtransaction", vec![json!(["a", true]), json!(["b", true])])
            .await;
        assert!(matches!(result, Err(PumpError::Rpc { code: -5, .. })));
    }

    #[tokio::test]
    async fn rest_not_found_is_none() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/rest/block/00ff.json")
            .with_status(404)
            .create_async()
            .await;

        let result = transport(&server.url())
            .get_rest::<Value>("rest_block", "/rest/block/00ff.json")
            .await
            .unwrap();
        assert!(result.is_none());
    }
}
