use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, RwLock};
use axum::http::StatusCode;
use tracing::{info, warn};

use crate::error::{SceneError, SceneResult};

/// 对目标路径的类型要求
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathCheck {
    /// 已存在的普通文件
    File,
    /// 已存在的目录
    Directory,
    /// 写入目标：父目录必须存在，目标若已存在必须是文件
    WriteTarget,
    /// 只要求存在
    Any,
}

/// 拒绝原因分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyKind {
    /// 路径为空或包含非法字符
    Invalid,
    /// 不在任何允许的根目录内（含目录穿越、符号链接逃逸）
    OutsideRoots,
    /// 路径不存在
    NotFound,
    /// 类型不符（要求文件却是目录等）
    WrongType,
}

impl DenyKind {
    pub fn status_code(&self) -> StatusCode {
        match self {
            DenyKind::Invalid | DenyKind::WrongType => StatusCode::BAD_REQUEST,
            DenyKind::OutsideRoots => StatusCode::FORBIDDEN,
            DenyKind::NotFound => StatusCode::NOT_FOUND,
        }
    }
}

/// 访问检查结果；“不允许”不是错误，而是带原因的结论
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessVerdict {
    /// 允许访问，携带规范化后的路径
    Allowed(PathBuf),
    Denied { kind: DenyKind, reason: String },
}

impl AccessVerdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AccessVerdict::Allowed(_))
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            AccessVerdict::Allowed(_) => None,
            AccessVerdict::Denied { reason, .. } => Some(reason),
        }
    }

    /// 转换为错误类型，供需要 `?` 传播的调用方使用
    pub fn into_result(self) -> SceneResult<PathBuf> {
        match self {
            AccessVerdict::Allowed(path) => Ok(path),
            AccessVerdict::Denied { kind, reason } => Err(match kind {
                DenyKind::Invalid | DenyKind::WrongType => SceneError::InvalidInput(reason),
                DenyKind::OutsideRoots => SceneError::AccessDenied(reason),
                DenyKind::NotFound => SceneError::NotFound(reason),
            }),
        }
    }

    fn denied(kind: DenyKind, reason: impl Into<String>) -> Self {
        AccessVerdict::Denied {
            kind,
            reason: reason.into(),
        }
    }
}

/// 展开 `~` 并转为绝对路径，按字面折叠 `.` 与 `..`（不访问文件系统）
pub fn normalize_path(raw: &Path) -> Option<PathBuf> {
    let expanded = expand_home(raw)?;
    let absolute = if expanded.is_absolute() {
        expanded
    } else {
        std::env::current_dir().ok()?.join(expanded)
    };

    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => normalized.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                // 根目录之上没有可弹出的部分
                normalized.pop();
            }
            Component::Normal(part) => normalized.push(part),
        }
    }
    Some(normalized)
}

fn expand_home(raw: &Path) -> Option<PathBuf> {
    match raw.strip_prefix("~") {
        Ok(rest) => Some(dirs::home_dir()?.join(rest)),
        Err(_) => Some(raw.to_path_buf()),
    }
}

/// 检查外部传入的路径是否位于允许的根目录内
///
/// 检查顺序：格式 → 规范化后是否在根目录内 → 是否存在及类型 → 解析符号链接后是否仍在根目录内。
/// 根目录外的路径不会暴露其是否存在。
pub fn is_allowed(raw: &str, roots: &[PathBuf], check: PathCheck) -> AccessVerdict {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return AccessVerdict::denied(DenyKind::Invalid, "路径为空");
    }
    if trimmed.contains('\0') {
        return AccessVerdict::denied(DenyKind::Invalid, "路径包含非法字符");
    }

    let path = match normalize_path(Path::new(trimmed)) {
        Some(path) => path,
        None => return AccessVerdict::denied(DenyKind::Invalid, format!("无法解析路径: {}", trimmed)),
    };

    let normalized_roots: Vec<PathBuf> = roots.iter().filter_map(|r| normalize_path(r)).collect();
    if !normalized_roots.iter().any(|root| path.starts_with(root)) {
        return AccessVerdict::denied(
            DenyKind::OutsideRoots,
            format!("路径不在允许的目录内: {}", path.display()),
        );
    }

    // 符号链接解析的锚点：写入目标取父目录，其余取目标本身
    let anchor = match check {
        PathCheck::WriteTarget => {
            let parent = match path.parent() {
                Some(parent) if parent.is_dir() => parent.to_path_buf(),
                _ => {
                    return AccessVerdict::denied(
                        DenyKind::NotFound,
                        format!("父目录不存在: {}", path.display()),
                    )
                }
            };
            if path.is_dir() {
                return AccessVerdict::denied(
                    DenyKind::WrongType,
                    format!("目标是目录，不能写入: {}", path.display()),
                );
            }
            if path.exists() {
                path.clone()
            } else {
                parent
            }
        }
        PathCheck::File | PathCheck::Directory | PathCheck::Any => {
            if !path.exists() {
                return AccessVerdict::denied(DenyKind::NotFound, format!("路径不存在: {}", path.display()));
            }
            if check == PathCheck::File && !path.is_file() {
                return AccessVerdict::denied(DenyKind::WrongType, format!("不是文件: {}", path.display()));
            }
            if check == PathCheck::Directory && !path.is_dir() {
                return AccessVerdict::denied(DenyKind::WrongType, format!("不是目录: {}", path.display()));
            }
            path.clone()
        }
    };

    let resolved = match anchor.canonicalize() {
        Ok(resolved) => resolved,
        Err(e) => {
            return AccessVerdict::denied(DenyKind::NotFound, format!("无法解析路径 {}: {}", anchor.display(), e))
        }
    };
    let canonical_roots: Vec<PathBuf> = normalized_roots
        .iter()
        .filter_map(|root| root.canonicalize().ok())
        .collect();
    if !canonical_roots.iter().any(|root| resolved.starts_with(root)) {
        return AccessVerdict::denied(
            DenyKind::OutsideRoots,
            format!("符号链接指向允许的目录之外: {}", path.display()),
        );
    }

    AccessVerdict::Allowed(path)
}

/// 解析白名单文件：每行一个目录，忽略空行和 `#` 注释
pub fn parse_allowlist(text: &str) -> Vec<PathBuf> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| normalize_path(Path::new(line)))
        .collect()
}

/// 允许根目录的来源
#[derive(Debug, Clone, Default)]
pub struct RootSources {
    /// 配置中的输出、输入目录
    pub dirs: Vec<PathBuf>,
    /// 额外的白名单文件
    pub allowlist_file: Option<PathBuf>,
}

impl RootSources {
    fn build(&self) -> Vec<PathBuf> {
        let mut roots: Vec<PathBuf> = self.dirs.iter().filter_map(|d| normalize_path(d)).collect();
        if let Some(file) = &self.allowlist_file {
            match std::fs::read_to_string(file) {
                Ok(text) => roots.extend(parse_allowlist(&text)),
                Err(e) => warn!("⚠️  [访问控制] 读取白名单文件失败 {}: {}", file.display(), e),
            }
        }
        roots.sort();
        roots.dedup();
        roots
    }
}

/// 进程级访问控制：启动时构建一次根目录列表，可通过 `reload` 整体替换
#[derive(Debug)]
pub struct AccessGate {
    sources: RootSources,
    roots: RwLock<Arc<Vec<PathBuf>>>,
}

impl AccessGate {
    pub fn new(sources: RootSources) -> Self {
        let roots = sources.build();
        info!("🔒 [访问控制] 允许的根目录: {:?}", roots);
        Self {
            sources,
            roots: RwLock::new(Arc::new(roots)),
        }
    }

    /// 重新读取配置目录和白名单文件，返回新的根目录数量
    pub fn reload(&self) -> usize {
        let roots = self.sources.build();
        let count = roots.len();
        let mut guard = self.roots.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(roots);
        info!("🔄 [访问控制] 已重新加载 {} 个根目录", count);
        count
    }

    pub fn roots(&self) -> Arc<Vec<PathBuf>> {
        self.roots.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// 检查路径；拒绝时记录警告日志
    pub fn check(&self, raw: &str, check: PathCheck) -> AccessVerdict {
        let roots = self.roots();
        let verdict = is_allowed(raw, &roots, check);
        if let AccessVerdict::Denied { kind, reason } = &verdict {
            warn!("⚠️  [访问控制] 拒绝 {:?} ({:?}): {}", raw, kind, reason);
        }
        verdict
    }
}
