pub mod error;
pub mod resolver;
pub mod scene_files;
pub mod artifact;
pub mod metadata;
pub mod cache;
pub mod access;
pub mod prompts;
pub mod selector;
pub mod captioner;
pub mod processor;
pub mod caption;
pub mod config;
pub mod handler;

pub use error::{SceneError, SceneResult};
pub use resolver::resolve_content_dir;
pub use scene_files::{count_scenes, find_scene_files, SceneDirectory, SceneFiles, ScenePair};
pub use metadata::{CaptionMetadata, SceneMetadata, SceneRecord, SceneSet, VideoMetadata};
pub use cache::{CacheEntry, CacheKey, CacheLookup, CacheManager, CaptionParams, DescribeParams, Fingerprint};
pub use access::{is_allowed, AccessGate, AccessVerdict, DenyKind, PathCheck};
pub use captioner::{CaptionKind, CaptionRequest, Captioner, FrameSampling, HttpCaptioner};
pub use processor::{process_scene_directory, DescribeConfig, ProcessOutput};
pub use caption::{caption_scene_videos, CaptionConfig, CaptionOutput};
pub use config::{ConfigLoader, ConfigOverrides, Limits, ServerConfig};
pub use handler::{build_router, AppState};
