use anyhow::{Context, Result};
use base64::Engine;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// 描述对象类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptionKind {
    /// 单张关键帧
    Image,
    /// 单个场景视频片段
    Video,
}

/// 一次描述请求
#[derive(Debug, Clone, PartialEq)]
pub struct CaptionRequest {
    pub kind: CaptionKind,
    pub path: PathBuf,
    pub prompt: String,
    pub max_length: usize,
    /// 视频抽帧参数，图片请求为 `None`
    pub sampling: Option<FrameSampling>,
}

/// 视频描述时的抽帧方式
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameSampling {
    /// 抽帧间隔（秒）
    pub interval_secs: f64,
    /// 最多抽取的帧数
    pub max_frames: usize,
}

impl CaptionRequest {
    pub fn image(path: impl Into<PathBuf>, max_length: usize) -> Self {
        Self {
            kind: CaptionKind::Image,
            path: path.into(),
            prompt: "Describe this image in detail.".to_string(),
            max_length,
            sampling: None,
        }
    }

    pub fn video(path: impl Into<PathBuf>, max_length: usize, sampling: FrameSampling) -> Self {
        Self {
            kind: CaptionKind::Video,
            path: path.into(),
            prompt: "Describe what happens in this video scene.".to_string(),
            max_length,
            sampling: Some(sampling),
        }
    }
}

/// 外部视觉描述服务
pub trait Captioner: Send + Sync {
    /// 写入元数据的模型名称
    fn model_name(&self) -> &str;

    fn caption(&self, request: &CaptionRequest) -> impl Future<Output = Result<String>> + Send;
}

#[derive(Debug, Serialize)]
struct CaptionPayload<'a> {
    kind: CaptionKind,
    path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_base64: Option<String>,
    prompt: &'a str,
    max_length: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    sampling_interval: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_frames: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct CaptionReply {
    caption: String,
}

/// 通过 HTTP 调用的描述服务
///
/// 请求体 `{kind, path, image_base64?, prompt, max_length, sampling_interval?, max_frames?}`，响应体 `{caption}`。
#[derive(Debug, Clone)]
pub struct HttpCaptioner {
    url: String,
    model: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpCaptioner {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            model: "http-captioner".to_string(),
            client: reqwest::Client::new(),
            timeout,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    fn payload<'a>(&self, request: &'a CaptionRequest) -> Result<CaptionPayload<'a>> {
        let image_base64 = match request.kind {
            CaptionKind::Image => {
                let bytes = std::fs::read(&request.path)
                    .with_context(|| format!("读取关键帧失败: {}", request.path.display()))?;
                Some(base64::engine::general_purpose::STANDARD.encode(bytes))
            }
            CaptionKind::Video => None,
        };
        Ok(CaptionPayload {
            kind: request.kind,
            path: request.path.to_string_lossy().to_string(),
            image_base64,
            prompt: &request.prompt,
            max_length: request.max_length,
            sampling_interval: request.sampling.map(|s| s.interval_secs),
            max_frames: request.sampling.map(|s| s.max_frames),
        })
    }
}

impl Captioner for HttpCaptioner {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn caption(&self, request: &CaptionRequest) -> Result<String> {
        let payload = self.payload(request)?;
        debug!("请求描述服务: {} ({:?})", request.path.display(), request.kind);

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .timeout(self.timeout)
            .send()
            .await
            .context("描述服务请求失败")?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("描述服务返回错误状态: {} - {}", status, error_text));
        }

        let reply: CaptionReply = response.json().await.context("描述服务响应格式错误")?;
        let caption = reply.caption.trim().to_string();
        if caption.is_empty() {
            return Err(anyhow::anyhow!("描述服务返回了空描述"));
        }
        Ok(caption)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::post, Json, Router};
    use serde_json::{json, Value};

    async fn spawn_service(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}/caption", addr)
    }

    #[tokio::test]
    async fn test_http_captioner_sends_image_and_reads_caption() {
        let router = Router::new().route(
            "/caption",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["kind"], "image");
                assert_eq!(body["image_base64"], "cG5n");
                assert_eq!(body["max_length"], 50);
                assert!(body.get("max_frames").is_none());
                Json(json!({"caption": "  a red car  "}))
            }),
        );
        let url = spawn_service(router).await;

        let temp = tempfile::tempdir().unwrap();
        let image = temp.path().join("scene_001.png");
        std::fs::write(&image, "png").unwrap();

        let captioner = HttpCaptioner::new(url, Duration::from_secs(5));
        let caption = captioner.caption(&CaptionRequest::image(&image, 50)).await.unwrap();
        assert_eq!(caption, "a red car");
    }

    #[tokio::test]
    async fn test_http_captioner_error_status() {
        let router = Router::new().route(
            "/caption",
            post(|| async { (axum::http::StatusCode::SERVICE_UNAVAILABLE, "busy") }),
        );
        let url = spawn_service(router).await;

        let captioner = HttpCaptioner::new(url, Duration::from_secs(5));
        let sampling = FrameSampling { interval_secs: 1.0, max_frames: 8 };
        let result = captioner.caption(&CaptionRequest::video("/v/scene_1.mp4", 50, sampling)).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_video_payload_has_no_image() {
        let captioner = HttpCaptioner::new("http://127.0.0.1:1/caption", Duration::from_secs(1));
        let sampling = FrameSampling { interval_secs: 0.5, max_frames: 16 };
        let request = CaptionRequest::video("/v/scene_1.mp4", 80, sampling);
        let payload = serde_json::to_value(captioner.payload(&request).unwrap()).unwrap();
        assert_eq!(payload["kind"], "video");
        assert!(payload.get("image_base64").is_none());
        assert_eq!(payload["sampling_interval"], 0.5);
        assert_eq!(payload["max_frames"], 16);
    }

    #[tokio::test]
    async fn test_http_captioner_sends_video_sampling() {
        let router = Router::new().route(
            "/caption",
            post(|Json(body): Json<Value>| async move {
                let caption = format!(
                    "{} every {}s up to {} frames",
                    body["kind"].as_str().unwrap_or_default(),
                    body["sampling_interval"],
                    body["max_frames"]
                );
                Json(json!({ "caption": caption }))
            }),
        );
        let url = spawn_service(router).await;

        let captioner = HttpCaptioner::new(url, Duration::from_secs(5));
        let sampling = FrameSampling { interval_secs: 2.5, max_frames: 12 };
        let caption = captioner
            .caption(&CaptionRequest::video("/v/scene_1.mp4", 80, sampling))
            .await
            .unwrap();
        assert_eq!(caption, "video every 2.5s up to 12 frames");
    }
}
