use std::path::{Path, PathBuf};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::artifact;
use crate::metadata::SceneSet;
use crate::prompts::{load_scene_prompt, parse_prompts};
use crate::resolver::{output_root, resolve_content_dir};
use crate::scene_files::{SceneDirectory, ScenePair};

/// 提示词选择结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SceneSelection {
    pub prompt: String,
    /// 选中场景的关键帧
    pub image_path: Option<PathBuf>,
    pub total_scenes: usize,
    /// 钳制后的场景编号（从 1 开始），没有场景时为 0
    pub scene_number: usize,
}

/// 把 1 起始的编号钳制到 `[1, total]`
fn clamp_scene_number(scene_number: usize, total: usize) -> usize {
    scene_number.clamp(1, total.max(1))
}

fn scan_keyframes_dir(keyframes_path: &Path) -> Option<(PathBuf, SceneDirectory)> {
    if keyframes_path.as_os_str().is_empty() {
        return None;
    }
    let content_dir = resolve_content_dir(keyframes_path).ok()?;
    let snapshot = SceneDirectory::scan(&content_dir);
    Some((output_root(&content_dir), snapshot))
}

/// 选择某个场景的提示词
///
/// 用户编辑过的提示词优先；否则有 `prompts_text` 时从中取，再否则从关键帧目录读取。
pub fn select_scene_prompt(
    keyframes_path: &Path,
    scene_number: usize,
    prompts_text: Option<&str>,
    edited_prompt: Option<&str>,
) -> SceneSelection {
    let scanned = scan_keyframes_dir(keyframes_path);
    // 场景总数按文件名中的最大编号计算，缺失关键帧的编号也占位
    let scene_total = scanned
        .as_ref()
        .map(|(_, s)| SceneSet::from_directory(s).len())
        .unwrap_or(0);
    let image_for = |n: usize| {
        scanned
            .as_ref()
            .and_then(|(_, s)| s.find_scene_files(n).image().map(Path::to_path_buf))
    };

    if let Some(edited) = edited_prompt.filter(|p| !p.trim().is_empty()) {
        debug!("使用界面中编辑过的提示词");
        let scene_number = scene_number.max(1);
        return SceneSelection {
            prompt: edited.to_string(),
            image_path: image_for(scene_number),
            total_scenes: scene_total,
            scene_number,
        };
    }

    if let Some(text) = prompts_text.filter(|t| !t.trim().is_empty()) {
        let prompts = parse_prompts(text);
        if prompts.is_empty() {
            return SceneSelection::empty("No prompts found");
        }
        let scene_number = clamp_scene_number(scene_number, prompts.len());
        info!("📝 [提示词] 选择场景 {}/{}", scene_number, prompts.len());
        return SceneSelection {
            prompt: prompts[scene_number - 1].clone(),
            image_path: image_for(scene_number),
            total_scenes: prompts.len(),
            scene_number,
        };
    }

    let Some((root, snapshot)) = scanned.as_ref() else {
        return SceneSelection::empty("No keyframes found");
    };
    if scene_total == 0 {
        return SceneSelection::empty("No keyframes found");
    }
    let scene_number = clamp_scene_number(scene_number, scene_total);
    info!("📝 [提示词] 选择场景 {}/{}", scene_number, scene_total);
    SceneSelection {
        prompt: load_scene_prompt(root, snapshot, scene_number),
        image_path: image_for(scene_number),
        total_scenes: scene_total,
        scene_number,
    }
}

impl SceneSelection {
    fn empty(message: &str) -> Self {
        Self {
            prompt: message.to_string(),
            image_path: None,
            total_scenes: 0,
            scene_number: 0,
        }
    }
}

/// 查看器上一次展示的场景
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ViewerSnapshot {
    pub directory: PathBuf,
    /// 场景编号（从 1 开始）
    pub index: usize,
}

/// 查看器输出
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SceneView {
    pub image_path: PathBuf,
    pub description: String,
    pub pairs: Vec<ScenePair>,
    pub total_scenes: usize,
    /// 本次展示的场景，作为下一次调用的 `previous`
    pub snapshot: ViewerSnapshot,
    /// 本次是否把编辑内容写回了描述文件
    pub saved: bool,
}

/// 查看某个目录中的场景，并在用户编辑当前场景时保存描述
///
/// 只有 `previous` 与本次的目录和编号都相同（即用户在编辑已展示的场景）时才写回；
/// 否则重新从文件读取描述。目录中没有图片/文本配对时返回 `None`。
pub fn view_scene(
    directory: &Path,
    scene_number: usize,
    edited_description: Option<&str>,
    previous: Option<&ViewerSnapshot>,
    max_text_bytes: usize,
) -> Option<SceneView> {
    if directory.as_os_str().is_empty() || !directory.exists() {
        return None;
    }
    let pairs = SceneDirectory::scan(directory).image_text_pairs();
    if pairs.is_empty() {
        return None;
    }

    let total_scenes = pairs.len();
    let index = clamp_scene_number(scene_number, total_scenes);
    let selected = &pairs[index - 1];
    let snapshot = ViewerSnapshot {
        directory: directory.to_path_buf(),
        index,
    };

    let editing_current = previous == Some(&snapshot);
    let edit = edited_description.filter(|d| !d.trim().is_empty());

    let (description, saved) = match edit {
        Some(text) if editing_current => match artifact::write_text(&selected.txt_path, text, max_text_bytes) {
            Ok(()) => {
                info!("💾 [查看器] 已保存场景 {} 的描述", index);
                (text.to_string(), true)
            }
            Err(e) => {
                warn!("⚠️  [查看器] 保存描述失败 {}: {}", selected.txt_path.display(), e);
                (text.to_string(), false)
            }
        },
        _ => {
            let loaded = artifact::read_text(&selected.txt_path)
                .map(|t| t.trim().to_string())
                .unwrap_or_default();
            (loaded, false)
        }
    };

    Some(SceneView {
        image_path: selected.path.clone(),
        description,
        total_scenes,
        snapshot,
        saved,
        pairs,
    })
}

/// 场景步进方向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepDirection {
    Increment,
    Decrement,
}

/// 在 `start` 与 `end` 之间逐次步进的计数器
///
/// `end` 或方向变化时从 `start` 重新开始；到达 `end` 后保持不变。
#[derive(Debug, Clone, Default)]
pub struct SceneStepper {
    current: Option<i64>,
    last_end: Option<i64>,
    last_direction: Option<StepDirection>,
}

impl SceneStepper {
    pub fn new() -> Self {
        Self::default()
    }

    /// 前进一步并返回新值；`reset` 时直接返回 `start`
    pub fn step(&mut self, start: i64, end: i64, direction: StepDirection, reset: bool) -> i64 {
        let changed = self.last_end != Some(end) || self.last_direction != Some(direction);
        self.last_end = Some(end);
        self.last_direction = Some(direction);

        if reset {
            self.current = Some(start);
            return start;
        }

        let base = match self.current {
            Some(current) if !changed => current,
            _ => start,
        };
        let next = match direction {
            StepDirection::Increment => (base + 1).min(end),
            StepDirection::Decrement => (base - 1).max(end),
        };
        self.current = Some(next);
        next
    }

    pub fn current(&self) -> Option<i64> {
        self.current
    }
}
