use axum::http::StatusCode;
use thiserror::Error;

/// 场景目录相关操作的错误分类
///
/// 预期内的负面结果（文件缺失、缓存未命中、路径不在白名单）由各模块以普通返回值表达，
/// 只有需要调用方处理的情况才会落到这里。
#[derive(Debug, Error)]
pub enum SceneError {
    /// 路径、文件或场景不存在
    #[error("未找到: {0}")]
    NotFound(String),
    /// 参数缺失或格式错误、扩展名不支持、内容超出上限
    #[error("参数无效: {0}")]
    InvalidInput(String),
    /// 路径不在允许的根目录内，或存在目录穿越
    #[error("拒绝访问: {0}")]
    AccessDenied(String),
    /// 磁盘 I/O 错误（磁盘已满、写权限不足等）
    #[error("I/O 错误: {0}")]
    Io(#[from] std::io::Error),
    /// JSON 序列化/反序列化失败
    #[error("JSON 错误: {0}")]
    Json(#[from] serde_json::Error),
}

impl SceneError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            SceneError::NotFound(_) => StatusCode::NOT_FOUND,
            SceneError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            SceneError::AccessDenied(_) => StatusCode::FORBIDDEN,
            SceneError::Io(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                StatusCode::FORBIDDEN
            }
            SceneError::Io(_) | SceneError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// 转换为 HTTP handler 使用的错误元组
    ///
    /// 500 类错误只返回通用信息，具体原因写入服务端日志。
    pub fn into_http(self) -> (StatusCode, String) {
        let status = self.status_code();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("❌ [服务] 内部错误: {}", self);
            (status, "服务器内部错误".to_string())
        } else {
            (status, self.to_string())
        }
    }
}

pub type SceneResult<T> = std::result::Result<T, SceneError>;
