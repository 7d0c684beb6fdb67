use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde_json::Value;
use std::fs;
use std::path::Path;
use tempfile::TempDir;
use tower::ServiceExt;
use video_scene::{build_router, AppState, ServerConfig};

const PNG_HEADER: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

fn app_for(root: &Path) -> Router {
    let config = ServerConfig {
        output_dir: root.to_path_buf(),
        ..ServerConfig::default()
    };
    build_router(AppState::new(config))
}

fn encode(path: &Path) -> String {
    utf8_percent_encode(&path.to_string_lossy(), NON_ALPHANUMERIC).to_string()
}

async fn get(app: Router, uri: String) -> (StatusCode, Vec<u8>) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, body.to_vec())
}

async fn post_json(app: Router, uri: &str, body: String) -> (StatusCode, Vec<u8>) {
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, body.to_vec())
}

fn save_body(path: &Path, content: &str) -> String {
    serde_json::json!({
        "filepath": path.to_string_lossy(),
        "content": content,
    })
    .to_string()
}

#[tokio::test]
async fn test_health_check() {
    let root = TempDir::new().unwrap();
    let (status, body) = get(app_for(root.path()), "/health".to_string()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"OK");
}

#[tokio::test]
async fn test_scene_prompt_placeholder_for_empty_directory() {
    let root = TempDir::new().unwrap();
    let uri = format!("/scene_prompt/read?keyframes_path={}&scene_number=1", encode(root.path()));
    let (status, body) = get(app_for(root.path()), uri).await;

    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["prompt"], "Scene 1");
    assert_eq!(json["has_image"], false);
    assert_eq!(json["total_scenes"], 0);
}

#[tokio::test]
async fn test_scene_prompt_reads_keyframes_subdirectory() {
    let root = TempDir::new().unwrap();
    let keyframes = root.path().join("keyframes");
    fs::create_dir(&keyframes).unwrap();
    fs::write(keyframes.join("scene_001_5.00s.png"), PNG_HEADER).unwrap();
    fs::write(keyframes.join("scene_001_5.00s.txt"), "A quiet harbor at dawn").unwrap();
    fs::write(keyframes.join("scene_002_9.50s.png"), PNG_HEADER).unwrap();

    let uri = format!("/scene_prompt/read?keyframes_path={}&scene_number=1", encode(root.path()));
    let (status, body) = get(app_for(root.path()), uri).await;

    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["prompt"], "A quiet harbor at dawn");
    assert_eq!(json["has_image"], true);
    assert_eq!(json["total_scenes"], 2);
    assert_eq!(json["scene_number"], 1);
}

#[tokio::test]
async fn test_scene_prompt_missing_path_returns_json_error() {
    let root = TempDir::new().unwrap();
    let (status, body) = get(app_for(root.path()), "/scene_prompt/read".to_string()).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["error"], "No keyframes path provided");
    assert_eq!(json["prompt"], "");
    assert_eq!(json["has_image"], false);
}

#[tokio::test]
async fn test_scene_prompt_rejects_scene_zero() {
    let root = TempDir::new().unwrap();
    let uri = format!("/scene_prompt/read?keyframes_path={}&scene_number=0", encode(root.path()));
    let (status, _) = get(app_for(root.path()), uri).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_save_description_outside_roots_is_forbidden() {
    let root = TempDir::new().unwrap();
    let outside = TempDir::new().unwrap();
    let target = outside.path().join("scene_001.txt");

    let (status, _) = post_json(
        app_for(root.path()),
        "/video_scene/viewer/save_description",
        save_body(&target, "hijacked"),
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(!target.exists());
}

#[tokio::test]
async fn test_save_description_traversal_is_forbidden() {
    let root = TempDir::new().unwrap();
    let outside = TempDir::new().unwrap();
    let name = outside.path().file_name().unwrap().to_string_lossy().to_string();
    // 通过 .. 跳出根目录
    let sneaky = root.path().join("..").join(&name).join("escape.txt");

    let (status, _) = post_json(
        app_for(root.path()),
        "/video_scene/viewer/save_description",
        save_body(&sneaky, "escape"),
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(!outside.path().join("escape.txt").exists());
}

#[tokio::test]
async fn test_save_description_inside_roots_writes_file() {
    let root = TempDir::new().unwrap();
    let target = root.path().join("scene_001_5.00s.txt");

    let (status, body) = post_json(
        app_for(root.path()),
        "/video_scene/viewer/save_description",
        save_body(&target, "Edited description"),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["message"], "Description saved successfully");
    assert_eq!(fs::read_to_string(&target).unwrap(), "Edited description");
}

#[tokio::test]
async fn test_save_description_rejects_invalid_input() {
    let root = TempDir::new().unwrap();
    let app = app_for(root.path());

    let (status, _) = post_json(app.clone(), "/video_scene/viewer/save_description", "{not json".to_string()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // 只能写 .txt
    let target = root.path().join("scene_001.png");
    let (status, _) = post_json(
        app.clone(),
        "/video_scene/viewer/save_description",
        save_body(&target, "x"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(!target.exists());

    // 父目录不存在
    let target = root.path().join("missing").join("scene_001.txt");
    let (status, _) = post_json(app, "/video_scene/viewer/save_description", save_body(&target, "x")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_read_description_access_rules() {
    let root = TempDir::new().unwrap();
    let outside = TempDir::new().unwrap();
    let inside_txt = root.path().join("scene_001.txt");
    let outside_txt = outside.path().join("secret.txt");
    let inside_png = root.path().join("scene_001.png");
    fs::write(&inside_txt, "Sunlit forest").unwrap();
    fs::write(&outside_txt, "secret").unwrap();
    fs::write(&inside_png, PNG_HEADER).unwrap();
    let app = app_for(root.path());

    let (status, body) = get(
        app.clone(),
        format!("/video_scene/viewer/read_description?filepath={}", encode(&inside_txt)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"Sunlit forest");

    let (status, _) = get(
        app.clone(),
        format!("/video_scene/viewer/read_description?filepath={}", encode(&outside_txt)),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = get(
        app.clone(),
        format!("/video_scene/viewer/read_description?filepath={}", encode(&inside_png)),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = get(
        app,
        format!(
            "/video_scene/viewer/read_description?filepath={}",
            encode(&root.path().join("absent.txt"))
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_read_image_sets_content_type() {
    let root = TempDir::new().unwrap();
    let image = root.path().join("scene_001_1.00s.png");
    fs::write(&image, PNG_HEADER).unwrap();

    let response = app_for(root.path())
        .oneshot(
            Request::builder()
                .uri(format!("/video_scene/viewer/read_image?filepath={}", encode(&image)))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
}

#[tokio::test]
async fn test_scene_image_rejects_unsupported_format() {
    let root = TempDir::new().unwrap();
    let gif = root.path().join("scene_001.gif");
    fs::write(&gif, b"GIF89a").unwrap();

    let (status, _) = get(
        app_for(root.path()),
        format!("/scene_prompt/image?path={}", encode(&gif)),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_check_directory_always_ok() {
    let root = TempDir::new().unwrap();
    let outside = TempDir::new().unwrap();
    let app = app_for(root.path());

    let (status, body) = get(
        app.clone(),
        format!("/video_scene/viewer/check_directory?directory={}", encode(root.path())),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["exists"], true);
    assert_eq!(json["allowed"], true);
    assert_eq!(json["readable"], true);

    // 根目录之外不暴露是否存在
    let (status, body) = get(
        app.clone(),
        format!("/video_scene/viewer/check_directory?directory={}", encode(outside.path())),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["exists"], false);
    assert_eq!(json["allowed"], false);

    let (status, body) = get(app, "/video_scene/viewer/check_directory".to_string()).await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["message"], "No directory provided");
}

#[tokio::test]
async fn test_list_scenes_only_paired_images() {
    let root = TempDir::new().unwrap();
    fs::write(root.path().join("scene_001_1.00s.png"), PNG_HEADER).unwrap();
    fs::write(root.path().join("scene_001_1.00s.txt"), "first").unwrap();
    fs::write(root.path().join("scene_002_4.00s.jpg"), b"\xFF\xD8\xFF").unwrap();
    fs::write(root.path().join("notes.md"), "ignored").unwrap();

    let (status, body) = get(
        app_for(root.path()),
        format!("/video_scene/viewer/list_scenes?directory={}", encode(root.path())),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    // 没有描述文件的图片不列出
    assert_eq!(json["total_scenes"], 1);
    assert_eq!(json["scenes"][0]["basename"], "scene_001_1.00s");
    assert!(json["scenes"][0]["txt_path"]
        .as_str()
        .unwrap()
        .ends_with("scene_001_1.00s.txt"));
}

#[tokio::test]
async fn test_read_video_supports_range_requests() {
    let root = TempDir::new().unwrap();
    let video = root.path().join("scene_001.mp4");
    fs::write(&video, b"0123456789").unwrap();

    let response = app_for(root.path())
        .oneshot(
            Request::builder()
                .uri(format!("/video_scene/viewer/read_video?filepath={}", encode(&video)))
                .header(header::RANGE, "bytes=0-3")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes 0-3/10");
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"0123");
}

#[tokio::test]
async fn test_read_video_rejects_non_video() {
    let root = TempDir::new().unwrap();
    let text = root.path().join("scene_001.txt");
    fs::write(&text, "not a video").unwrap();

    let (status, _) = get(
        app_for(root.path()),
        format!("/video_scene/viewer/read_video?filepath={}", encode(&text)),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

/// 根目录外的文件，以及经 `..` 指向它的路径
fn escape_paths(root: &Path, outside: &Path, file_name: &str) -> [std::path::PathBuf; 2] {
    let outside_name = outside.file_name().unwrap().to_string_lossy().to_string();
    [
        outside.join(file_name),
        root.join("..").join(outside_name).join(file_name),
    ]
}

#[tokio::test]
async fn test_file_routes_forbid_paths_outside_roots() {
    let root = TempDir::new().unwrap();
    let outside = TempDir::new().unwrap();
    fs::write(outside.path().join("scene_001.png"), PNG_HEADER).unwrap();
    fs::write(outside.path().join("scene_001.mp4"), b"0123456789").unwrap();
    let app = app_for(root.path());

    let cases = [
        ("/scene_prompt/image?path=", "scene_001.png"),
        ("/video_scene/viewer/read_image?filepath=", "scene_001.png"),
        ("/video_scene/viewer/read_video?filepath=", "scene_001.mp4"),
    ];
    for (route, file_name) in cases {
        for target in escape_paths(root.path(), outside.path(), file_name) {
            let (status, body) = get(app.clone(), format!("{}{}", route, encode(&target))).await;
            assert_eq!(status, StatusCode::FORBIDDEN, "{} {}", route, target.display());
            assert!(!body.starts_with(b"\x89PNG"));
        }
    }
}

#[tokio::test]
async fn test_scene_prompt_forbids_directories_outside_roots() {
    let root = TempDir::new().unwrap();
    let outside = TempDir::new().unwrap();
    let keyframes = outside.path().join("keyframes");
    fs::create_dir(&keyframes).unwrap();
    fs::write(keyframes.join("scene_001_0.00s.txt"), "secret prompt").unwrap();
    let app = app_for(root.path());

    for target in escape_paths(root.path(), outside.path(), "keyframes") {
        let uri = format!("/scene_prompt/read?keyframes_path={}&scene_number=1", encode(&target));
        let (status, body) = get(app.clone(), uri).await;
        assert_eq!(status, StatusCode::FORBIDDEN, "{}", target.display());
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["prompt"], "");
        assert_eq!(json["has_image"], false);
    }
}

#[tokio::test]
async fn test_scene_prompt_missing_directory_is_not_found() {
    let root = TempDir::new().unwrap();
    let missing = root.path().join("never_extracted");
    let uri = format!("/scene_prompt/read?keyframes_path={}&scene_number=1", encode(&missing));
    let (status, body) = get(app_for(root.path()), uri).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert!(json["error"].as_str().unwrap().contains("does not exist"));
}

#[tokio::test]
async fn test_scene_prompt_rejects_regular_file() {
    let root = TempDir::new().unwrap();
    let file = root.path().join("scene_prompts.txt");
    fs::write(&file, "Scene 1: a").unwrap();
    let uri = format!("/scene_prompt/read?keyframes_path={}&scene_number=1", encode(&file));
    let (status, body) = get(app_for(root.path()), uri).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["prompt"], "");
}

#[tokio::test]
async fn test_scene_prompt_uses_file_numbers_when_keyframe_missing() {
    let root = TempDir::new().unwrap();
    let keyframes = root.path().join("keyframes");
    fs::create_dir(&keyframes).unwrap();
    fs::write(keyframes.join("scene_001_00m00s000ms.png"), PNG_HEADER).unwrap();
    fs::write(keyframes.join("scene_003_00m09s000ms.png"), PNG_HEADER).unwrap();
    fs::write(keyframes.join("scene_003_00m09s000ms.txt"), "third scene").unwrap();
    let app = app_for(root.path());

    let uri = format!("/scene_prompt/read?keyframes_path={}&scene_number=3", encode(root.path()));
    let (status, body) = get(app.clone(), uri).await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["prompt"], "third scene");
    assert_eq!(json["has_image"], true);

    let uri = format!("/scene_prompt/read?keyframes_path={}&scene_number=2", encode(root.path()));
    let (status, body) = get(app, uri).await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["prompt"], "Scene 2");
    assert_eq!(json["has_image"], false);
}
