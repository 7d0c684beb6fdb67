use clap::{Parser, Subcommand};
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use video_scene::{
    config::{ConfigLoader, ConfigOverrides, ServerConfig},
    caption_scene_videos, process_scene_directory, AppState, CaptionConfig, DescribeConfig, HttpCaptioner,
    SceneDirectory,
};

/// 视频场景工具 - 读取、描述和浏览场景拆分产物
#[derive(Parser, Debug)]
#[command(name = "video-scene")]
#[command(about = "视频场景工具：场景目录解析、关键帧描述、字幕生成与查看器服务", long_about = None)]
struct Args {
    /// 配置文件路径（可选，支持 .ini 格式）
    /// 优先级：命令行参数 > 环境变量 > 配置文件 > 默认值
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// 场景产物输出目录，可通过环境变量 VIDEO_SCENE_OUTPUT_DIR 设置
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,

    /// 日志级别（trace, debug, info, warn, error）
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Web 服务模式：启动查看器 HTTP 服务
    Serve {
        /// 监听地址，可通过环境变量 VIDEO_SCENE_BIND / VIDEO_SCENE_PORT 设置
        #[arg(short, long)]
        bind: Option<String>,

        /// 输入目录（同样加入允许访问的根目录）
        #[arg(long)]
        input_dir: Option<PathBuf>,

        /// 白名单文件，每行一个允许访问的目录
        #[arg(long)]
        allowlist: Option<PathBuf>,
    },
    /// 查看场景目录：场景数量和指定场景的文件
    Inspect {
        /// 场景目录（包含 keyframes 子目录或直接包含关键帧）
        path: PathBuf,

        /// 场景编号（从 1 开始）
        #[arg(short, long, default_value_t = 1)]
        scene: usize,
    },
    /// 为关键帧生成描述，写出 scene_prompts.txt 和 metadata.json
    Describe {
        /// 场景目录
        path: PathBuf,

        /// 描述服务地址，可通过环境变量 VIDEO_SCENE_CAPTIONER_URL 设置
        #[arg(long)]
        captioner_url: Option<String>,

        /// 描述最大长度（字符）
        #[arg(long, default_value_t = 200)]
        max_length: usize,

        /// 忽略缓存和已有描述，全部重新生成
        #[arg(long)]
        regenerate: bool,
    },
    /// 为场景视频生成字幕
    Caption {
        /// 场景视频文件；为空时在输出目录中查找
        videos: Vec<PathBuf>,

        /// 场景提取的输出目录
        #[arg(long)]
        scenes_output: Option<PathBuf>,

        /// 描述服务地址
        #[arg(long)]
        captioner_url: Option<String>,

        /// 描述最大长度（字符）
        #[arg(long, default_value_t = 200)]
        max_length: usize,

        /// 选中的场景（从 1 开始）
        #[arg(long, default_value_t = 1)]
        scene: usize,

        /// 不使用缓存
        #[arg(long)]
        no_cache: bool,
    },
    /// 生成默认配置文件
    InitConfig {
        /// 配置文件路径
        #[arg(default_value = "video-scene.ini")]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if let Commands::InitConfig { path } = &args.command {
        ConfigLoader::create_default_config(path)
            .context("生成配置文件失败")?;
        println!("已生成配置文件: {}", path.display());
        return Ok(());
    }

    let mut overrides = ConfigOverrides {
        config_file: args.config.clone(),
        output_dir: args.output_dir.clone(),
        log_level: args.log_level.clone(),
        ..ConfigOverrides::default()
    };
    match &args.command {
        Commands::Serve { bind, input_dir, allowlist } => {
            overrides.bind = bind.clone();
            overrides.input_dir = input_dir.clone();
            overrides.allowlist_file = allowlist.clone();
        }
        Commands::Describe { captioner_url, .. } | Commands::Caption { captioner_url, .. } => {
            overrides.captioner_url = captioner_url.clone();
        }
        _ => {}
    }
    let config = ConfigLoader::load(&overrides).context("加载配置失败")?;

    // 初始化日志
    let level = config
        .log_level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);
    tracing_subscriber::fmt().with_max_level(level).init();

    match args.command {
        Commands::Serve { .. } => {
            start_web_server(config).await?;
        }
        Commands::Inspect { path, scene } => {
            inspect(&path, scene)?;
        }
        Commands::Describe { path, max_length, regenerate, .. } => {
            let captioner = captioner_for(&config)?;
            let describe_config = DescribeConfig {
                max_description_length: max_length,
                regenerate,
                max_text_bytes: config.limits.max_text_write_bytes,
                ..DescribeConfig::default()
            };
            let output = process_scene_directory(&path, &captioner, &describe_config)
                .await
                .context("生成场景描述失败")?;
            println!("{}", serde_json::to_string_pretty(&output.metadata)?);
        }
        Commands::Caption { videos, scenes_output, max_length, scene, no_cache, .. } => {
            let captioner = captioner_for(&config)?;
            let caption_config = CaptionConfig {
                output_root: config.output_dir.clone(),
                scenes_output,
                max_description_length: max_length,
                selected_scene: scene,
                use_cache: !no_cache,
                max_text_bytes: config.limits.max_text_write_bytes,
                ..CaptionConfig::default()
            };
            let output = caption_scene_videos(&videos, &captioner, &caption_config)
                .await
                .context("生成场景字幕失败")?;
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Commands::InitConfig { .. } => {}
    }

    Ok(())
}

fn captioner_for(config: &ServerConfig) -> Result<HttpCaptioner> {
    let url = config
        .captioner_url
        .clone()
        .context("未配置描述服务地址（--captioner-url 或 VIDEO_SCENE_CAPTIONER_URL）")?;
    Ok(HttpCaptioner::new(url, config.captioner_timeout()))
}

fn inspect(path: &std::path::Path, scene: usize) -> Result<()> {
    let content_dir = video_scene::resolve_content_dir(path)
        .with_context(|| format!("无法定位场景目录: {}", path.display()))?;
    let snapshot = SceneDirectory::scan(&content_dir);
    let files = snapshot.find_scene_files(scene);
    let prompt = video_scene::prompts::load_scene_prompt(
        &video_scene::resolver::output_root(&content_dir),
        &snapshot,
        scene,
    );

    println!("场景目录: {}", content_dir.display());
    println!("场景数量: {}", snapshot.count_scenes());
    println!("场景 {}:", scene);
    for image in &files.images {
        println!("  • 图片: {}", image.display());
    }
    for text in &files.texts {
        println!("  • 文本: {}", text.display());
    }
    println!("  • 提示词: {}", prompt);
    Ok(())
}

async fn start_web_server(config: ServerConfig) -> Result<()> {
    let bind = config.bind.clone();
    let state = AppState::new(config);
    let app = video_scene::build_router(state.clone());

    #[cfg(unix)]
    spawn_reload_on_sighup(Arc::clone(&state.gate));

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .context(format!("绑定地址失败: {}", bind))?;

    tracing::info!("Web 服务器启动在: http://{}", bind);
    tracing::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    tracing::info!("可用端点:");
    tracing::info!("  • 健康检查: GET  http://{}/health", bind);
    tracing::info!("  • 场景提示词: GET  http://{}/scene_prompt/read?keyframes_path=<dir>&scene_number=<n>", bind);
    tracing::info!("  • 场景图片: GET  http://{}/scene_prompt/image?path=<file>", bind);
    tracing::info!("  • 读取图片: GET  http://{}/video_scene/viewer/read_image?filepath=<file>", bind);
    tracing::info!("  • 读取描述: GET  http://{}/video_scene/viewer/read_description?filepath=<file>", bind);
    tracing::info!("  • 保存描述: POST http://{}/video_scene/viewer/save_description", bind);
    tracing::info!("  • 目录检查: GET  http://{}/video_scene/viewer/check_directory?directory=<dir>", bind);
    tracing::info!("  • 播放视频: GET  http://{}/video_scene/viewer/read_video?filepath=<file>", bind);
    tracing::info!("  • 场景列表: GET  http://{}/video_scene/viewer/list_scenes?directory=<dir>", bind);
    tracing::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    axum::serve(listener, app)
        .await
        .context("启动服务器失败")?;

    Ok(())
}

/// 收到 SIGHUP 时重新加载允许的根目录
#[cfg(unix)]
fn spawn_reload_on_sighup(gate: Arc<video_scene::AccessGate>) {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async move {
        let mut hangup = match signal(SignalKind::hangup()) {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!("⚠️  [访问控制] 无法监听 SIGHUP: {}", e);
                return;
            }
        };
        while hangup.recv().await.is_some() {
            gate.reload();
        }
    });
}
