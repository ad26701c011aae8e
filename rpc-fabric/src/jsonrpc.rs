//! JSON-RPC 2.0 request/response envelopes. The core does not interpret
//! method semantics beyond the quorum and cacheability tables elsewhere in
//! this crate; this module only knows how to wrap a (method, params) pair
//! for the wire and unwrap whatever comes back.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest<'a> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    pub params: &'a Value,
}

impl<'a> JsonRpcRequest<'a> {
    pub fn new(id: u64, method: &'a str, params: &'a Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcErrorData {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcErrorData>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test_log::test]
    fn request_serializes_as_jsonrpc_2() {
        let params = json!(["0x1", false]);
        let req = JsonRpcRequest::new(7, "eth_getBlockByNumber", &params);

        let value = serde_json::to_value(&req).unwrap();

        assert_eq!(value["jsonrpc"], "2.0");
        assert_eq!(value["id"], 7);
        assert_eq!(value["method"], "eth_getBlockByNumber");
        assert_eq!(value["params"], params);
    }

    #[test_log::test]
    fn response_with_error_has_no_result() {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": {"code": -32000, "message": "execution reverted"}
        });

        let resp: JsonRpcResponse = serde_json::from_value(body).unwrap();

        assert!(resp.result.is_none());
        assert_eq!(resp.error.unwrap().code, -32000);
    }
}
