//! End-to-end runs of the orchestrator with shell-script encoders.

#![cfg(unix)]

use image_squisher::encode::{EncodeError, Encoder};
use image_squisher::scan::is_temp_artifact;
use image_squisher::{
    CandidateStatus, Config, Decision, EncoderSlot, ImageFormat, NullSink, Orchestrator,
    SourceInfo,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::process::Command;

/// `$1` is the source, `$2` the output.
struct ShellEncoder {
    format: ImageFormat,
    script: String,
}

impl Encoder for ShellEncoder {
    fn format(&self) -> ImageFormat {
        self.format
    }

    fn supports_animation(&self) -> bool {
        true
    }

    fn build_command(
        &self,
        source: &Path,
        output: &Path,
        _info: &SourceInfo,
    ) -> Result<Command, EncodeError> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(&self.script).arg("sh").arg(source).arg(output);
        Ok(cmd)
    }
}

fn shell(format: ImageFormat, script: impl Into<String>) -> EncoderSlot {
    EncoderSlot::Ready(Arc::new(ShellEncoder {
        format,
        script: script.into(),
    }))
}

fn jxl_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0xFF, 0x0A];
    bytes.resize(len, 0);
    bytes
}

/// Lossless WebP container of `payload + 20` bytes. `payload` must be even.
fn webp_bytes(payload: usize) -> Vec<u8> {
    let mut out = b"RIFF".to_vec();
    out.extend_from_slice(&((payload + 12) as u32).to_le_bytes());
    out.extend_from_slice(b"WEBP");
    out.extend_from_slice(b"VP8L");
    out.extend_from_slice(&(payload as u32).to_le_bytes());
    out.resize(payload + 20, 0);
    out
}

/// Script that copies a prepared fixture to the output path.
fn copy_of(fixtures: &Path, name: &str, bytes: &[u8]) -> String {
    let path = fixtures.join(name);
    fs::write(&path, bytes).unwrap();
    format!("cp '{}' \"$2\"", path.display())
}

fn config(threads: u32) -> Config {
    let mut config = Config::default();
    config.processing.threads = Some(threads);
    config.processing.conversion_timeout_secs = 1;
    config.notifications.enabled = false;
    config
}

fn orchestrator(config: Config, slots: Vec<EncoderSlot>) -> Orchestrator {
    Orchestrator::with_encoders(config, slots).with_alert_sink(Arc::new(NullSink))
}

fn temp_artifacts(dir: &Path) -> Vec<PathBuf> {
    walk(dir).into_iter().filter(|p| is_temp_artifact(p)).collect()
}

fn walk(dir: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    for entry in fs::read_dir(dir).unwrap().filter_map(|e| e.ok()) {
        let path = entry.path();
        if path.is_dir() {
            out.extend(walk(&path));
        } else {
            out.push(path);
        }
    }
    out
}

struct Workspace {
    images: TempDir,
    fixtures: TempDir,
}

impl Workspace {
    fn new() -> Self {
        Self {
            images: TempDir::new().unwrap(),
            fixtures: TempDir::new().unwrap(),
        }
    }

    fn image(&self, name: &str, bytes: &[u8]) -> PathBuf {
        let path = self.images.path().join(name);
        fs::write(&path, bytes).unwrap();
        path
    }

    fn copy_of(&self, name: &str, bytes: &[u8]) -> String {
        copy_of(self.fixtures.path(), name, bytes)
    }
}

#[tokio::test]
async fn test_smallest_verified_candidate_is_adopted() {
    let ws = Workspace::new();
    let source = ws.image("big.png", &vec![9u8; 10_000_000]);
    let slots = vec![
        shell(ImageFormat::Jxl, ws.copy_of("a.jxl", &jxl_bytes(6_000_000))),
        shell(ImageFormat::Webp, ws.copy_of("b.webp", &webp_bytes(6_499_980))),
    ];

    let summary = orchestrator(config(1), slots).run(vec![source.clone()]).await;

    let outcome = &summary.outcomes[0];
    assert_eq!(outcome.decision, Decision::Adopt(ImageFormat::Jxl));
    assert_eq!(outcome.final_size, 6_000_000);
    assert!(!source.exists());
    let final_path = ws.images.path().join("big.jxl");
    assert_eq!(outcome.final_path, final_path);
    assert_eq!(fs::metadata(&final_path).unwrap().len(), 6_000_000);
    assert_eq!(summary.bytes_saved(), 4_000_000);
    assert!(temp_artifacts(ws.images.path()).is_empty());
}

#[tokio::test]
async fn test_small_gain_and_bad_candidate_keep_original() {
    let ws = Workspace::new();
    let original = vec![5u8; 1_000];
    let source = ws.image("icon.png", &original);
    let slots = vec![
        shell(ImageFormat::Jxl, ws.copy_of("a.jxl", &jxl_bytes(980))),
        shell(ImageFormat::Webp, ws.copy_of("b.webp", b"not a webp file at all")),
    ];

    let summary = orchestrator(config(1), slots).run(vec![source.clone()]).await;

    let outcome = &summary.outcomes[0];
    assert_eq!(outcome.decision, Decision::KeepOriginal);
    assert!(outcome.is_success());
    assert_eq!(fs::read(&source).unwrap(), original);
    assert!(!ws.images.path().join("icon.jxl").exists());
    assert!(temp_artifacts(ws.images.path()).is_empty());
}

#[tokio::test]
async fn test_timed_out_candidate_loses_to_sibling() {
    let ws = Workspace::new();
    let source = ws.image("slow.png", &vec![1u8; 10_000]);
    let slots = vec![
        shell(ImageFormat::Jxl, "printf x > \"$2\"; exec sleep 30"),
        shell(ImageFormat::Webp, ws.copy_of("b.webp", &webp_bytes(5_980))),
    ];

    let started = Instant::now();
    let summary = orchestrator(config(1), slots).run(vec![source.clone()]).await;

    assert!(started.elapsed() < Duration::from_secs(10));
    let outcome = &summary.outcomes[0];
    assert_eq!(outcome.decision, Decision::Adopt(ImageFormat::Webp));
    assert_eq!(outcome.final_size, 6_000);
    let jxl = outcome
        .candidates
        .iter()
        .find(|c| c.format == ImageFormat::Jxl)
        .unwrap();
    assert_eq!(jxl.status, CandidateStatus::TimedOut);
    assert!(ws.images.path().join("slow.webp").exists());
    assert!(temp_artifacts(ws.images.path()).is_empty());
}

#[tokio::test]
async fn test_failed_jobs_never_touch_originals() {
    let ws = Workspace::new();
    let mut sources = Vec::new();
    for i in 0..6 {
        let bytes: Vec<u8> = (0..2_000u32).map(|b| (b * (i + 1)) as u8).collect();
        sources.push((ws.image(&format!("img{}.png", i), &bytes), bytes));
    }
    let slots = vec![
        shell(ImageFormat::Jxl, "printf garbage > \"$2\""),
        shell(ImageFormat::Webp, "echo broken >&2; exit 3"),
    ];

    let paths = sources.iter().map(|(p, _)| p.clone()).collect();
    let summary = orchestrator(config(3), slots).run(paths).await;

    assert_eq!(summary.processed, 6);
    assert_eq!(summary.kept_original, 6);
    for (path, bytes) in &sources {
        assert_eq!(&fs::read(path).unwrap(), bytes);
    }
    for outcome in &summary.outcomes {
        assert!(outcome
            .candidates
            .iter()
            .all(|c| matches!(c.status, CandidateStatus::Failed(_))));
    }
    assert!(temp_artifacts(ws.images.path()).is_empty());
}

#[tokio::test]
async fn test_second_run_is_idempotent() {
    let ws = Workspace::new();
    let source = ws.image("photo.bmp", &vec![2u8; 4_000]);
    let slots = vec![
        shell(ImageFormat::Jxl, ws.copy_of("a.jxl", &jxl_bytes(1_000))),
        shell(ImageFormat::Webp, ws.copy_of("b.webp", &webp_bytes(1_980))),
    ];
    let orchestrator = orchestrator(config(1), slots);

    let first = orchestrator.run(vec![source]).await;
    let converted = first.outcomes[0].final_path.clone();
    assert_eq!(first.outcomes[0].decision, Decision::Adopt(ImageFormat::Jxl));

    let second = orchestrator.run(vec![converted.clone()]).await;

    let outcome = &second.outcomes[0];
    assert_eq!(outcome.decision, Decision::KeepOriginal);
    assert!(outcome.candidates.is_empty());
    assert_eq!(fs::metadata(&converted).unwrap().len(), 1_000);
}

#[tokio::test]
async fn test_outcomes_cover_every_source_across_workers() {
    let ws = Workspace::new();
    let sub = ws.images.path().join("nested");
    fs::create_dir_all(&sub).unwrap();
    let mut sources = Vec::new();
    for i in 0..8 {
        let dir = if i % 2 == 0 { ws.images.path() } else { sub.as_path() };
        let path = dir.join(format!("p{}.png", i));
        fs::write(&path, vec![7u8; 3_000]).unwrap();
        sources.push(path);
    }
    let slots = vec![
        shell(ImageFormat::Jxl, ws.copy_of("a.jxl", &jxl_bytes(1_500))),
        EncoderSlot::Unavailable {
            format: ImageFormat::Webp,
            reason: "cwebp is not installed or not on PATH".to_string(),
        },
    ];

    let summary = orchestrator(config(4), slots).run(sources.clone()).await;

    assert_eq!(summary.processed, 8);
    assert_eq!(summary.adopted.get(&ImageFormat::Jxl), Some(&8));
    let mut seen: Vec<_> = summary.outcomes.iter().map(|o| o.source_path.clone()).collect();
    seen.sort();
    let mut expected = sources.clone();
    expected.sort();
    assert_eq!(seen, expected);
    assert!(temp_artifacts(ws.images.path()).is_empty());
}

#[tokio::test]
async fn test_stop_mid_run_drains_and_returns() {
    let ws = Workspace::new();
    let mut sources = Vec::new();
    for i in 0..10 {
        sources.push(ws.image(&format!("s{:02}.png", i), &vec![4u8; 2_000]));
    }
    let fixture = ws.fixtures.path().join("a.jxl");
    fs::write(&fixture, jxl_bytes(500)).unwrap();
    let slots = vec![
        shell(
            ImageFormat::Jxl,
            format!("sleep 0.3; cp '{}' \"$2\"", fixture.display()),
        ),
        EncoderSlot::Unavailable {
            format: ImageFormat::Webp,
            reason: "not installed".to_string(),
        },
    ];
    let orchestrator = orchestrator(config(1), slots);
    let stop = orchestrator.stop_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        stop.stop();
    });

    let summary = tokio::time::timeout(Duration::from_secs(5), orchestrator.run(sources.clone()))
        .await
        .expect("stopped run must return");

    assert!(summary.processed >= 1 && summary.processed < 10);
    assert_eq!(summary.processed + summary.not_started, 10);
    assert!(summary.outcomes.iter().all(|o| o.is_success()));
    for source in &sources {
        let adopted = summary
            .outcomes
            .iter()
            .any(|o| &o.source_path == source && o.decision != Decision::KeepOriginal);
        if adopted {
            assert!(!source.exists());
        } else {
            assert_eq!(fs::read(source).unwrap(), vec![4u8; 2_000]);
        }
    }
    assert!(temp_artifacts(ws.images.path()).is_empty());
}

#[tokio::test]
async fn test_same_stem_sources_never_share_a_final_name() {
    let ws = Workspace::new();
    let png = ws.image("photo.png", &vec![1u8; 4_000]);
    let jpg = ws.image("photo.jpg", &vec![2u8; 5_000]);
    let slots = vec![
        shell(ImageFormat::Jxl, ws.copy_of("a.jxl", &jxl_bytes(1_000))),
        EncoderSlot::Unavailable {
            format: ImageFormat::Webp,
            reason: "not installed".to_string(),
        },
    ];

    let summary = orchestrator(config(2), slots)
        .run(vec![jpg.clone(), png.clone()])
        .await;

    assert_eq!(summary.processed, 2);
    assert_eq!(summary.adopted.get(&ImageFormat::Jxl), Some(&1));
    assert_eq!(summary.errors, 1);
    let loser = summary.outcomes.iter().find(|o| !o.is_success()).unwrap();
    assert!(loser.error.as_deref().unwrap().contains("refusing to overwrite"));
    let expected = if loser.source_path == png {
        vec![1u8; 4_000]
    } else {
        vec![2u8; 5_000]
    };
    assert_eq!(fs::read(&loser.source_path).unwrap(), expected);
    assert_eq!(fs::read(ws.images.path().join("photo.jxl")).unwrap(), jxl_bytes(1_000));
    assert!(temp_artifacts(ws.images.path()).is_empty());
}

#[test]
fn test_sweep_removes_crash_leftovers_before_scan() {
    let dir = TempDir::new().unwrap();
    let leftover = dir.path().join(".a.png.0a1b2c3d.jxl.squish-tmp");
    fs::write(&leftover, b"partial").unwrap();
    fs::write(dir.path().join("a.png"), b"png").unwrap();

    let removed = image_squisher::sweep_orphans(dir.path(), true);
    let found = image_squisher::scan_folder(dir.path(), true, &[]);

    assert_eq!(removed, vec![leftover.clone()]);
    assert!(!leftover.exists());
    assert_eq!(found.len(), 1);
}
