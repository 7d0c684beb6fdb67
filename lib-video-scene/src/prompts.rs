use std::path::Path;
use tracing::{debug, warn};

use crate::artifact::{self, PROMPTS_TEXT_FILE, SCENE_PROMPTS_FILE};
use crate::metadata::placeholder_description;
use crate::scene_files::SceneDirectory;

/// 修改器中表示“不修改”的选项
pub const KEEP_ORIGINAL: &str = "keep original";

/// 解析汇总提示词：按空行分段，去掉 `Scene N:` 前缀，丢弃空段
pub fn parse_prompts(text: &str) -> Vec<String> {
    text.trim()
        .split("\n\n")
        .map(str::trim)
        .filter(|block| !block.is_empty())
        .map(|block| strip_scene_label(block).to_string())
        .collect()
}

/// 格式化为 `Scene N: text`，段落之间以空行分隔
pub fn format_prompts(prompts: &[String]) -> String {
    prompts
        .iter()
        .enumerate()
        .map(|(i, prompt)| format!("Scene {}: {}", i + 1, prompt))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// 去掉 `Scene <数字>:` 前缀；前缀后没有内容时保留原文
fn strip_scene_label(block: &str) -> &str {
    let Some(rest) = block.strip_prefix("Scene") else {
        return block;
    };
    let after_space = rest.trim_start();
    if after_space.len() == rest.len() {
        return block;
    }
    let digits = after_space.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return block;
    }
    match after_space[digits..].strip_prefix(':') {
        Some(text) if !text.trim().is_empty() => text.trim(),
        _ => block,
    }
}

/// 按回退链读取某个场景的提示词
///
/// 依次尝试：匹配到的场景文本文件、匹配图片的同名 `.txt`、内容目录中的
/// `prompts_text.txt`、运行目录中的 `scene_prompts.txt`，最后是 `Scene {n}`。
/// 读取失败同样回退到占位文本。
pub fn load_scene_prompt(output_root: &Path, snapshot: &SceneDirectory, scene_number: usize) -> String {
    let files = snapshot.find_scene_files(scene_number);

    if let Some(text_path) = files.text() {
        return read_or_placeholder(text_path, scene_number);
    }

    if let Some(image) = files.image() {
        let sibling = artifact::description_path_for(image);
        if sibling.is_file() {
            return read_or_placeholder(&sibling, scene_number);
        }
    }

    let aggregates = [
        snapshot.path().join(PROMPTS_TEXT_FILE),
        output_root.join(SCENE_PROMPTS_FILE),
    ];
    if let Some(aggregate) = aggregates.iter().find(|p| p.is_file()) {
        return match artifact::read_text(aggregate) {
            Ok(text) => scene_number
                .checked_sub(1)
                .and_then(|i| parse_prompts(&text).into_iter().nth(i))
                .unwrap_or_else(|| placeholder_description(scene_number)),
            Err(e) => {
                warn!("⚠️  [提示词] 读取 {} 失败: {}", aggregate.display(), e);
                placeholder_description(scene_number)
            }
        };
    }

    debug!("场景 {} 没有任何提示词文件，使用占位文本", scene_number);
    placeholder_description(scene_number)
}

fn read_or_placeholder(path: &Path, scene_number: usize) -> String {
    match artifact::read_text(path) {
        Ok(text) => text.trim().to_string(),
        Err(e) => {
            warn!("⚠️  [提示词] 读取 {} 失败: {}", path.display(), e);
            placeholder_description(scene_number)
        }
    }
}

/// 替换或补充提示词中的画面风格与光线描述
pub fn modify_prompt(prompt: &str, style: &str, lighting: &str) -> String {
    let mut modified = prompt.to_string();

    if style != KEEP_ORIGINAL {
        modified = replace_section(&modified, "Image style:", &format!("Image style: {}.", style));
    }
    if lighting != KEEP_ORIGINAL {
        modified = replace_section(&modified, "Image lighting:", &format!("Image lighting: {}.", lighting));
    }

    if style != KEEP_ORIGINAL && !modified.contains("Image style:") {
        modified = format!("Image style: {}. {}", style, modified);
    }
    if lighting != KEEP_ORIGINAL && !modified.contains("Image lighting:") {
        modified = format!("Image lighting: {}. {}", lighting, modified);
    }
    modified
}

/// 替换第一个 `<label> ... .` 句子；标签后到句号之间至少要有一个字符
fn replace_section(text: &str, label: &str, replacement: &str) -> String {
    for (start, _) in text.match_indices(label) {
        let body_start = start + label.len();
        if let Some(offset) = text[body_start..].find('.') {
            if offset > 0 {
                let end = body_start + offset + 1;
                return format!("{}{}{}", &text[..start], replacement, &text[end..]);
            }
        }
    }
    text.to_string()
}

/// 截断描述：超出 `max_length` 个字符时优先在句末截断，否则在词边界截断并追加 `...`
pub fn truncate_description(text: &str, max_length: usize) -> String {
    if text.chars().count() <= max_length {
        return text.to_string();
    }
    let cut = text
        .char_indices()
        .nth(max_length)
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    let head = &text[..cut];

    let min_sentence = max_length * 7 / 10;
    for end_char in ['.', '!', '?'] {
        if let Some(pos) = head.rfind(end_char) {
            if head[..pos].chars().count() > min_sentence {
                return head[..pos + end_char.len_utf8()].to_string();
            }
        }
    }

    let word = match head.rfind(' ') {
        Some(pos) => &head[..pos],
        None => head,
    };
    format!("{}...", word)
}
