use axum::{
    body::{Body, Bytes},
    extract::{DefaultBodyLimit, Query, Request, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json as ResponseJson, Response},
    routing::{get, post},
    Router,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use serde::{Deserialize, Serialize};
use tower::ServiceExt;
use tower_http::{cors::CorsLayer, services::ServeFile};
use tracing::{debug, info};

use crate::access::{AccessGate, AccessVerdict, DenyKind, PathCheck};
use crate::artifact;
use crate::caption::is_video_file;
use crate::config::ServerConfig;
use crate::error::SceneError;
use crate::prompts::load_scene_prompt;
use crate::resolver::{output_root, resolve_content_dir};
use crate::scene_files::{SceneDirectory, ScenePair};

/// 场景提示词接口允许的图片格式
const SCENE_IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];
/// 查看器允许的图片格式
const VIEWER_IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "webp"];
/// 请求体除正文外的余量
const BODY_OVERHEAD_BYTES: usize = 64 * 1024;

type HandlerError = (StatusCode, String);

/// 所有 handler 共享的进程级状态
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub gate: Arc<AccessGate>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        let gate = AccessGate::new(config.root_sources());
        Self {
            config: Arc::new(config),
            gate: Arc::new(gate),
        }
    }

    /// 检查路径，拒绝时转换为 HTTP 错误
    fn allow(&self, raw: &str, check: PathCheck) -> Result<PathBuf, HandlerError> {
        match self.gate.check(raw, check) {
            AccessVerdict::Allowed(path) => Ok(path),
            AccessVerdict::Denied { kind, reason } => Err((kind.status_code(), reason)),
        }
    }
}

/// 构建路由
pub fn build_router(state: AppState) -> Router {
    let save_limit = state.config.limits.max_text_write_bytes + BODY_OVERHEAD_BYTES;

    Router::new()
        .route("/", get(health_check))
        .route("/health", get(health_check))
        .route("/scene_prompt/read", get(read_scene_prompt))
        .route("/scene_prompt/image", get(serve_scene_image))
        .route("/video_scene/viewer/read_image", get(read_image))
        .route("/video_scene/viewer/read_description", get(read_description))
        .route(
            "/video_scene/viewer/save_description",
            post(save_description).layer(DefaultBodyLimit::max(save_limit)),
        )
        .route("/video_scene/viewer/check_directory", get(check_directory))
        .route("/video_scene/viewer/read_video", get(read_video))
        .route("/video_scene/viewer/list_scenes", get(list_scenes))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// 健康检查
pub async fn health_check() -> &'static str {
    "OK"
}

fn has_extension(path: &Path, allowed: &[&str]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| allowed.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn required(value: Option<String>, name: &str) -> Result<String, HandlerError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| (StatusCode::BAD_REQUEST, format!("缺少参数: {}", name)))
}

fn check_size(path: &Path, max_bytes: u64) -> Result<u64, HandlerError> {
    let size = std::fs::metadata(path)
        .map_err(|e| SceneError::from(e).into_http())?
        .len();
    if size > max_bytes {
        return Err((
            StatusCode::BAD_REQUEST,
            format!("文件过大: {} 字节，上限 {} 字节", size, max_bytes),
        ));
    }
    Ok(size)
}

async fn read_bytes(path: &Path) -> Result<Vec<u8>, HandlerError> {
    tokio::fs::read(path)
        .await
        .map_err(|e| SceneError::from(e).into_http())
}

/// 场景提示词查询参数
#[derive(Debug, Deserialize)]
pub struct ScenePromptQuery {
    pub keyframes_path: Option<String>,
    pub scene_number: Option<String>,
}

/// 场景提示词响应
#[derive(Debug, Serialize, Deserialize)]
pub struct ScenePromptResponse {
    pub prompt: String,
    pub has_image: bool,
    pub total_scenes: usize,
    pub scene_number: usize,
}

/// 场景提示词错误响应
#[derive(Debug, Serialize, Deserialize)]
pub struct ScenePromptError {
    pub error: String,
    pub prompt: String,
    pub has_image: bool,
}

fn prompt_error(status: StatusCode, error: impl Into<String>) -> (StatusCode, ResponseJson<ScenePromptError>) {
    (
        status,
        ResponseJson(ScenePromptError {
            error: error.into(),
            prompt: String::new(),
            has_image: false,
        }),
    )
}

/// 读取场景提示词并检查关键帧是否存在
pub async fn read_scene_prompt(
    State(state): State<AppState>,
    Query(query): Query<ScenePromptQuery>,
) -> Result<ResponseJson<ScenePromptResponse>, (StatusCode, ResponseJson<ScenePromptError>)> {
    let raw = query
        .keyframes_path
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| prompt_error(StatusCode::BAD_REQUEST, "No keyframes path provided"))?;
    let scene_number = match query.scene_number.as_deref().map(str::trim) {
        None | Some("") => 1,
        Some(value) => value
            .parse::<usize>()
            .ok()
            .filter(|n| *n >= 1)
            .ok_or_else(|| prompt_error(StatusCode::BAD_REQUEST, "Invalid scene number"))?,
    };

    let base = match state.gate.check(&raw, PathCheck::Directory) {
        AccessVerdict::Allowed(path) => path,
        AccessVerdict::Denied { kind: DenyKind::NotFound, .. } => {
            return Err(prompt_error(
                StatusCode::NOT_FOUND,
                format!("Keyframes path does not exist: {}", raw),
            ))
        }
        AccessVerdict::Denied { kind, reason } => return Err(prompt_error(kind.status_code(), reason)),
    };

    let content_dir = resolve_content_dir(&base)
        .map_err(|e| prompt_error(e.status_code(), e.to_string()))?;
    let snapshot = SceneDirectory::scan(&content_dir);
    let has_image = snapshot.find_scene_files(scene_number).image().is_some();
    let prompt = load_scene_prompt(&output_root(&content_dir), &snapshot, scene_number);
    let total_scenes = snapshot.count_scenes();
    debug!("场景 {}/{}，关键帧存在: {}", scene_number, total_scenes, has_image);

    Ok(ResponseJson(ScenePromptResponse {
        prompt,
        has_image,
        total_scenes,
        scene_number,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ImagePathQuery {
    pub path: Option<String>,
}

/// 返回场景关键帧图片
pub async fn serve_scene_image(
    State(state): State<AppState>,
    Query(query): Query<ImagePathQuery>,
) -> Result<Response, HandlerError> {
    let raw = required(query.path, "path")?;
    let path = state.allow(&raw, PathCheck::File)?;
    if !has_extension(&path, SCENE_IMAGE_EXTENSIONS) {
        return Err((StatusCode::BAD_REQUEST, "Invalid image format".to_string()));
    }
    check_size(&path, state.config.limits.max_image_bytes)?;
    image_response(&path).await
}

#[derive(Debug, Deserialize)]
pub struct FilePathQuery {
    pub filepath: Option<String>,
}

/// 查看器读取图片
pub async fn read_image(
    State(state): State<AppState>,
    Query(query): Query<FilePathQuery>,
) -> Result<Response, HandlerError> {
    let raw = required(query.filepath, "filepath")?;
    let path = state.allow(&raw, PathCheck::File)?;
    if !has_extension(&path, VIEWER_IMAGE_EXTENSIONS) {
        return Err((StatusCode::BAD_REQUEST, format!("不支持的图片格式: {}", path.display())));
    }
    check_size(&path, state.config.limits.max_image_bytes)?;
    image_response(&path).await
}

async fn image_response(path: &Path) -> Result<Response, HandlerError> {
    let bytes = read_bytes(path).await?;
    let content_type = artifact::image_content_type(path, &bytes);
    Ok(([(header::CONTENT_TYPE, content_type)], bytes).into_response())
}

/// 查看器读取描述文本
pub async fn read_description(
    State(state): State<AppState>,
    Query(query): Query<FilePathQuery>,
) -> Result<String, HandlerError> {
    let raw = required(query.filepath, "filepath")?;
    let path = state.allow(&raw, PathCheck::File)?;
    if !has_extension(&path, &["txt"]) {
        return Err((StatusCode::BAD_REQUEST, "只能读取 .txt 文件".to_string()));
    }
    check_size(&path, state.config.limits.max_text_read_bytes)?;
    artifact::read_text(&path).map_err(SceneError::into_http)
}

/// 保存描述请求体
#[derive(Debug, Deserialize)]
pub struct SaveDescriptionRequest {
    pub filepath: String,
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SaveDescriptionResponse {
    pub message: String,
    pub filepath: String,
}

/// 保存编辑后的描述
///
/// 请求体手动解析，格式错误统一返回 400。
pub async fn save_description(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<ResponseJson<SaveDescriptionResponse>, HandlerError> {
    let request: SaveDescriptionRequest = serde_json::from_slice(&body)
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("请求体格式错误: {}", e)))?;
    if request.filepath.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "缺少参数: filepath".to_string()));
    }
    if !has_extension(Path::new(request.filepath.trim()), &["txt"]) {
        return Err((StatusCode::BAD_REQUEST, "只能保存 .txt 文件".to_string()));
    }

    let path = match state.gate.check(&request.filepath, PathCheck::WriteTarget) {
        AccessVerdict::Allowed(path) => path,
        AccessVerdict::Denied { kind: DenyKind::OutsideRoots, reason } => {
            return Err((StatusCode::FORBIDDEN, reason))
        }
        AccessVerdict::Denied { reason, .. } => return Err((StatusCode::BAD_REQUEST, reason)),
    };

    artifact::write_text(&path, &request.content, state.config.limits.max_text_write_bytes)
        .map_err(SceneError::into_http)?;
    info!("💾 [查看器] 已保存描述: {}", path.display());

    Ok(ResponseJson(SaveDescriptionResponse {
        message: "Description saved successfully".to_string(),
        filepath: path.to_string_lossy().to_string(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct DirectoryQuery {
    pub directory: Option<String>,
}

/// 目录诊断结果
#[derive(Debug, Serialize, Deserialize)]
pub struct DirectoryStatus {
    pub exists: bool,
    pub allowed: bool,
    pub readable: bool,
    pub message: String,
}

/// 检查目录状态，始终返回 200
///
/// 允许范围之外的目录不报告是否存在。
pub async fn check_directory(
    State(state): State<AppState>,
    Query(query): Query<DirectoryQuery>,
) -> ResponseJson<DirectoryStatus> {
    let Some(raw) = query.directory.filter(|d| !d.trim().is_empty()) else {
        return ResponseJson(DirectoryStatus {
            exists: false,
            allowed: false,
            readable: false,
            message: "No directory provided".to_string(),
        });
    };

    let status = match state.gate.check(&raw, PathCheck::Directory) {
        AccessVerdict::Allowed(path) => {
            let readable = std::fs::read_dir(&path).is_ok();
            DirectoryStatus {
                exists: true,
                allowed: true,
                readable,
                message: if readable {
                    "Directory is accessible".to_string()
                } else {
                    "Directory exists but is not readable".to_string()
                },
            }
        }
        AccessVerdict::Denied { kind: DenyKind::OutsideRoots | DenyKind::Invalid, reason } => DirectoryStatus {
            exists: false,
            allowed: false,
            readable: false,
            message: reason,
        },
        AccessVerdict::Denied { kind, reason } => DirectoryStatus {
            exists: kind == DenyKind::WrongType,
            allowed: true,
            readable: false,
            message: reason,
        },
    };
    ResponseJson(status)
}

/// 以流的方式返回视频，支持 Range 请求
pub async fn read_video(
    State(state): State<AppState>,
    Query(query): Query<FilePathQuery>,
    request: Request,
) -> Result<Response, HandlerError> {
    let raw = required(query.filepath, "filepath")?;
    let path = state.allow(&raw, PathCheck::File)?;
    if !is_video_file(&path) {
        return Err((StatusCode::BAD_REQUEST, format!("不是视频文件: {}", path.display())));
    }
    let size = check_size(&path, state.config.limits.max_video_bytes)?;
    debug!("播放视频: {} ({} 字节)", path.display(), size);

    let response = match ServeFile::new(&path).oneshot(request).await {
        Ok(response) => response,
        Err(never) => match never {},
    };
    Ok(response.map(Body::new))
}

/// 查看器场景列表
#[derive(Debug, Serialize, Deserialize)]
pub struct SceneListResponse {
    pub directory: String,
    pub total_scenes: usize,
    pub scenes: Vec<ScenePairView>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ScenePairView {
    pub filename: String,
    pub path: String,
    pub basename: String,
    pub txt_path: String,
}

impl From<ScenePair> for ScenePairView {
    fn from(pair: ScenePair) -> Self {
        Self {
            filename: pair.filename,
            path: pair.path.to_string_lossy().to_string(),
            basename: pair.basename,
            txt_path: pair.txt_path.to_string_lossy().to_string(),
        }
    }
}

/// 列出目录中的图片/描述配对
pub async fn list_scenes(
    State(state): State<AppState>,
    Query(query): Query<DirectoryQuery>,
) -> Result<ResponseJson<SceneListResponse>, HandlerError> {
    let raw = required(query.directory, "directory")?;
    let path = state.allow(&raw, PathCheck::Directory)?;
    let scenes: Vec<ScenePairView> = SceneDirectory::scan(&path)
        .image_text_pairs()
        .into_iter()
        .map(ScenePairView::from)
        .collect();

    Ok(ResponseJson(SceneListResponse {
        directory: path.to_string_lossy().to_string(),
        total_scenes: scenes.len(),
        scenes,
    }))
}
