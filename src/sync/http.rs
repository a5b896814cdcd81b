//! HTTP 同步传输
//!
//! `SyncTransport` 的 reqwest 实现：推送与拉取各对应一个 JSON POST 端点，
//! 携带 Bearer 认证。401/403 视为服务端拒绝（暂停同步，等待认证恢复），
//! 其余非 2xx（含 408/429 与 5xx）与网络错误视为瞬时故障，退避后重试。

use reqwest::{Client, StatusCode};
use std::time::Duration;

use crate::error::{SrsError, SrsResult};
use crate::sync::transport::{PullRequest, PullResponse, PushAck, PushBatch, SyncTransport};

/// HTTP 同步传输配置
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    /// API 基础 URL
    pub api_base_url: String,
    /// 认证令牌
    pub auth_token: String,
    /// 请求超时（秒）
    pub timeout_secs: u64,
}

/// 基于 reqwest 的同步传输
pub struct HttpTransport {
    config: HttpTransportConfig,
    client: Client,
}

impl HttpTransport {
    /// 创建 HTTP 传输
    pub fn new(config: HttpTransportConfig) -> SrsResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SrsError::SyncNetworkFailure(format!("创建 HTTP 客户端失败: {}", e)))?;

        Ok(Self { config, client })
    }

    fn classify_status(status: StatusCode, body: String) -> SrsError {
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            SrsError::SyncAuthorityRejected(format!("HTTP {}: {}", status, body))
        } else {
            SrsError::SyncNetworkFailure(format!("HTTP {}: {}", status, body))
        }
    }

    async fn post_json<Req, Resp>(&self, path: &str, request: &Req) -> SrsResult<Resp>
    where
        Req: serde::Serialize,
        Resp: serde::de::DeserializeOwned,
    {
        let url = format!("{}{}", self.config.api_base_url, path);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.auth_token)
            .json(request)
            .send()
            .await
            .map_err(|e| SrsError::SyncNetworkFailure(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, body));
        }

        response
            .json::<Resp>()
            .await
            .map_err(|e| SrsError::Serialization(e.to_string()))
    }
}

impl SyncTransport for HttpTransport {
    async fn push(&self, batch: PushBatch) -> SrsResult<PushAck> {
        log::debug!(
            "推送批次: {} 条事件, {} 条状态",
            batch.events.len(),
            batch.states.len()
        );
        self.post_json("/api/sync/push", &batch).await
    }

    async fn pull(&self, request: PullRequest) -> SrsResult<PullResponse> {
        log::debug!("拉取变更: 水位线 > {}", request.since_watermark);
        self.post_json("/api/sync/pull", &request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_errors_are_rejection() {
        for status in [StatusCode::UNAUTHORIZED, StatusCode::FORBIDDEN] {
            let err = HttpTransport::classify_status(status, String::new());
            assert!(matches!(err, SrsError::SyncAuthorityRejected(_)));
            assert!(!err.is_transient());
        }
    }

    #[test]
    fn test_retryable_client_errors_are_transient() {
        // 请求超时与限流应当退避重试，不能暂停同步
        for status in [StatusCode::REQUEST_TIMEOUT, StatusCode::TOO_MANY_REQUESTS] {
            let err = HttpTransport::classify_status(status, String::new());
            assert!(matches!(err, SrsError::SyncNetworkFailure(_)));
            assert!(err.is_transient());
        }
    }

    #[test]
    fn test_server_error_is_transient() {
        let err = HttpTransport::classify_status(StatusCode::BAD_GATEWAY, "upstream".to_string());
        assert!(matches!(err, SrsError::SyncNetworkFailure(_)));
        assert!(err.is_transient());
    }
}
