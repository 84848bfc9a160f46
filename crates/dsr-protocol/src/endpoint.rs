/// HTTP endpoint paths for the dsrpc protocol.
pub mod endpoints {
    pub const PUT: &str = "/v1/put";
    pub const DELETE: &str = "/v1/delete";
    pub const GET: &str = "/v1/get";
    pub const HAS: &str = "/v1/has";
    pub const SIZE: &str = "/v1/size";
    pub const QUERY: &str = "/v1/query";
    pub const HEALTH: &str = "/v1/health";
    pub const INFO: &str = "/v1/info";
}

/// Content type of framed request and reply bodies.
pub const FRAME_CONTENT_TYPE: &str = "application/octet-stream";

/// Health check response.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub protocol_version: u32,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "ok".into(),
            version: env!("CARGO_PKG_VERSION").into(),
            protocol_version: super::message::PROTOCOL_VERSION,
        }
    }
}

/// Server description returned by the info endpoint.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct InfoResponse {
    pub version: String,
    pub protocol_version: u32,
    /// `dedup` or `pass_through`.
    pub store_mode: String,
    pub backend: String,
    pub digest: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_response_defaults() {
        let h = HealthResponse::default();
        assert_eq!(h.status, "ok");
        assert_eq!(h.protocol_version, 1);
    }

    #[test]
    fn endpoint_paths() {
        assert_eq!(endpoints::PUT, "/v1/put");
        assert_eq!(endpoints::QUERY, "/v1/query");
        assert_eq!(endpoints::HEALTH, "/v1/health");
    }

    #[test]
    fn health_response_json() {
        let json = serde_json::to_value(HealthResponse::default()).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["protocol_version"], 1);
    }
}
