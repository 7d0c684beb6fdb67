use anyhow::Result;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::access::RootSources;

const DEFAULT_BIND: &str = "0.0.0.0:8188";
const DEFAULT_CONFIG_NAME: &str = "video-scene.ini";

/// 读写大小上限（字节）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    /// 保存描述时的写入上限
    pub max_text_write_bytes: usize,
    /// 读取描述文件的上限
    pub max_text_read_bytes: u64,
    /// 图片大小上限
    pub max_image_bytes: u64,
    /// 视频大小上限
    pub max_video_bytes: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_text_write_bytes: 5 * 1024 * 1024,
            max_text_read_bytes: 10 * 1024 * 1024,
            max_image_bytes: 50 * 1024 * 1024,
            max_video_bytes: 2 * 1024 * 1024 * 1024,
        }
    }
}

/// 服务配置
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// 监听地址
    pub bind: String,
    /// 场景产物输出目录（始终是允许的根目录）
    pub output_dir: PathBuf,
    /// 输入目录（可选，同样作为允许的根目录）
    pub input_dir: Option<PathBuf>,
    /// 额外的白名单文件
    pub allowlist_file: Option<PathBuf>,
    pub limits: Limits,
    /// 描述服务地址
    pub captioner_url: Option<String>,
    /// 描述服务超时（秒）
    pub captioner_timeout_secs: u64,
    /// 日志级别（trace, debug, info, warn, error）
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            output_dir: PathBuf::from("output"),
            input_dir: None,
            allowlist_file: None,
            limits: Limits::default(),
            captioner_url: None,
            captioner_timeout_secs: 60,
            log_level: "info".to_string(),
        }
    }
}

impl ServerConfig {
    /// 访问控制的根目录来源
    pub fn root_sources(&self) -> RootSources {
        let mut dirs = vec![self.output_dir.clone()];
        dirs.extend(self.input_dir.clone());
        RootSources {
            dirs,
            allowlist_file: self.allowlist_file.clone(),
        }
    }

    pub fn captioner_timeout(&self) -> Duration {
        Duration::from_secs(self.captioner_timeout_secs)
    }
}

/// 命令行参数中可覆盖的配置项
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub config_file: Option<PathBuf>,
    pub bind: Option<String>,
    pub output_dir: Option<PathBuf>,
    pub input_dir: Option<PathBuf>,
    pub allowlist_file: Option<PathBuf>,
    pub captioner_url: Option<String>,
    pub log_level: Option<String>,
}

/// 配置文件中读到的值，缺失的项为 `None`
#[derive(Debug, Clone, Default)]
struct FileConfig {
    bind: Option<String>,
    output_dir: Option<PathBuf>,
    input_dir: Option<PathBuf>,
    allowlist_file: Option<PathBuf>,
    max_text_write_bytes: Option<usize>,
    max_text_read_bytes: Option<u64>,
    max_image_bytes: Option<u64>,
    max_video_bytes: Option<u64>,
    captioner_url: Option<String>,
    captioner_timeout_secs: Option<u64>,
    log_level: Option<String>,
}

/// 环境变量中读到的值
#[derive(Debug, Clone, Default)]
struct EnvConfig {
    bind: Option<String>,
    output_dir: Option<PathBuf>,
    input_dir: Option<PathBuf>,
    allowlist_file: Option<PathBuf>,
    captioner_url: Option<String>,
    log_level: Option<String>,
}

/// 配置加载器
pub struct ConfigLoader;

impl ConfigLoader {
    /// 从多个源加载配置，优先级：命令行参数 > 环境变量 > 配置文件 > 默认值
    pub fn load(overrides: &ConfigOverrides) -> Result<ServerConfig> {
        // 1. 配置文件：显式指定时必须能读取，默认位置找不到则忽略
        let file_config = match overrides.config_file.as_deref() {
            Some(path) => Self::load_from_file(path)?,
            None => Self::load_from_default_locations().unwrap_or_default(),
        };

        // 2. 环境变量
        let env_config = Self::load_from_env();

        // 3. 合并
        Ok(Self::merge(overrides, env_config, file_config))
    }

    fn merge(overrides: &ConfigOverrides, env_config: EnvConfig, file_config: FileConfig) -> ServerConfig {
        let defaults = ServerConfig::default();
        let default_limits = defaults.limits.clone();
        ServerConfig {
            bind: overrides
                .bind
                .clone()
                .or(env_config.bind)
                .or(file_config.bind)
                .unwrap_or(defaults.bind),
            output_dir: overrides
                .output_dir
                .clone()
                .or(env_config.output_dir)
                .or(file_config.output_dir)
                .unwrap_or(defaults.output_dir),
            input_dir: overrides
                .input_dir
                .clone()
                .or(env_config.input_dir)
                .or(file_config.input_dir),
            allowlist_file: overrides
                .allowlist_file
                .clone()
                .or(env_config.allowlist_file)
                .or(file_config.allowlist_file),
            limits: Limits {
                max_text_write_bytes: file_config
                    .max_text_write_bytes
                    .unwrap_or(default_limits.max_text_write_bytes),
                max_text_read_bytes: file_config
                    .max_text_read_bytes
                    .unwrap_or(default_limits.max_text_read_bytes),
                max_image_bytes: file_config
                    .max_image_bytes
                    .unwrap_or(default_limits.max_image_bytes),
                max_video_bytes: file_config
                    .max_video_bytes
                    .unwrap_or(default_limits.max_video_bytes),
            },
            captioner_url: overrides
                .captioner_url
                .clone()
                .or(env_config.captioner_url)
                .or(file_config.captioner_url),
            captioner_timeout_secs: file_config
                .captioner_timeout_secs
                .unwrap_or(defaults.captioner_timeout_secs),
            log_level: overrides
                .log_level
                .clone()
                .or(env_config.log_level)
                .or(file_config.log_level)
                .unwrap_or(defaults.log_level),
        }
    }

    /// 从环境变量加载配置
    ///
    /// `VIDEO_SCENE_BIND` 优先于 `VIDEO_SCENE_PORT`；后者只给出端口时监听所有地址。
    fn load_from_env() -> EnvConfig {
        let non_empty = |key: &str| env::var(key).ok().filter(|v| !v.trim().is_empty());
        EnvConfig {
            bind: non_empty("VIDEO_SCENE_BIND")
                .or_else(|| non_empty("VIDEO_SCENE_PORT").map(|port| format!("0.0.0.0:{}", port))),
            output_dir: non_empty("VIDEO_SCENE_OUTPUT_DIR").map(PathBuf::from),
            input_dir: non_empty("VIDEO_SCENE_INPUT_DIR").map(PathBuf::from),
            allowlist_file: non_empty("VIDEO_SCENE_ALLOWLIST").map(PathBuf::from),
            captioner_url: non_empty("VIDEO_SCENE_CAPTIONER_URL"),
            log_level: non_empty("LOG_LEVEL"),
        }
    }

    /// 从INI配置文件加载配置
    fn load_from_file(config_path: &Path) -> Result<FileConfig> {
        if !config_path.exists() {
            return Err(anyhow::anyhow!("配置文件不存在: {}", config_path.display()));
        }

        let mut config_parser = configparser::ini::Ini::new();
        config_parser.load(config_path)
            .map_err(|e| anyhow::anyhow!("读取配置文件失败: {}: {}", config_path.display(), e))?;

        let text = |section: &str, key: &str| config_parser.get(section, key).filter(|v| !v.trim().is_empty());
        let number = |section: &str, key: &str| text(section, key).and_then(|v| v.trim().parse::<u64>().ok());

        Ok(FileConfig {
            bind: text("server", "bind"),
            output_dir: text("paths", "output_dir").map(PathBuf::from),
            input_dir: text("paths", "input_dir").map(PathBuf::from),
            allowlist_file: text("paths", "allowlist_file").map(PathBuf::from),
            max_text_write_bytes: number("limits", "max_text_write_bytes").map(|v| v as usize),
            max_text_read_bytes: number("limits", "max_text_read_bytes"),
            max_image_bytes: number("limits", "max_image_bytes"),
            max_video_bytes: number("limits", "max_video_bytes"),
            captioner_url: text("captioner", "url"),
            captioner_timeout_secs: number("captioner", "timeout_secs"),
            log_level: text("logging", "level"),
        })
    }

    /// 默认配置文件位置，按优先级排列
    fn default_locations() -> Vec<PathBuf> {
        let mut locations = vec![
            PathBuf::from(DEFAULT_CONFIG_NAME),
            PathBuf::from(format!(".{}", DEFAULT_CONFIG_NAME)),
        ];
        if let Some(home) = dirs::home_dir() {
            locations.push(home.join(format!(".{}", DEFAULT_CONFIG_NAME)));
        }
        locations.push(PathBuf::from("/etc").join(DEFAULT_CONFIG_NAME));
        locations
    }

    /// 从默认位置加载配置文件
    fn load_from_default_locations() -> Result<FileConfig> {
        for location in Self::default_locations() {
            if location.exists() {
                return Self::load_from_file(&location);
            }
        }
        Err(anyhow::anyhow!("未找到配置文件"))
    }

    /// 创建默认配置文件
    pub fn create_default_config(config_path: &Path) -> Result<()> {
        let defaults = ServerConfig::default();
        let limits = &defaults.limits;

        let mut config_parser = configparser::ini::Ini::new();
        config_parser.set("server", "bind", Some(defaults.bind.clone()));
        config_parser.set("paths", "output_dir", Some(defaults.output_dir.display().to_string()));
        config_parser.set("paths", "input_dir", Some("".to_string()));
        config_parser.set("paths", "allowlist_file", Some("".to_string()));
        config_parser.set("limits", "max_text_write_bytes", Some(limits.max_text_write_bytes.to_string()));
        config_parser.set("limits", "max_text_read_bytes", Some(limits.max_text_read_bytes.to_string()));
        config_parser.set("limits", "max_image_bytes", Some(limits.max_image_bytes.to_string()));
        config_parser.set("limits", "max_video_bytes", Some(limits.max_video_bytes.to_string()));
        config_parser.set("captioner", "url", Some("".to_string()));
        config_parser.set("captioner", "timeout_secs", Some(defaults.captioner_timeout_secs.to_string()));
        config_parser.set("logging", "level", Some(defaults.log_level.clone()));

        config_parser.write(config_path)
            .map_err(|e| anyhow::anyhow!("写入配置文件失败: {}: {}", config_path.display(), e))?;

        Ok(())
    }
}
