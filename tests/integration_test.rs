use std::fs;

use image::{Rgb, RgbImage};
use tempfile::TempDir;

use contam_seg_rs::analyzer::FrameAnalyzer;
use contam_seg_rs::grid::{PatchGrid, CATEGORY_CLEAN, CATEGORY_RAIN_BLOCK, CATEGORY_RAIN_BLUR, GRID_CELLS, GRID_DIM};
use contam_seg_rs::mocks::{MockFrameSink, MockFrameSource, MockPatchClassifier};
use contam_seg_rs::playback::{PlaybackController, TickOutcome};
use contam_seg_rs::recorder::RecordingSink;
use contam_seg_rs::session::PlaybackState;
use contam_seg_rs::sources::ImageSequenceSource;
use contam_seg_rs::SessionRunner;

// 16 セル汚損（1/16 = 6.25%）のグリッド
fn dirty_grid() -> PatchGrid {
    let mut labels = vec![CATEGORY_CLEAN; GRID_CELLS];
    for col in 0..GRID_DIM {
        labels[col] = if col % 2 == 0 {
            CATEGORY_RAIN_BLUR
        } else {
            CATEGORY_RAIN_BLOCK
        };
    }
    PatchGrid::from_labels(&labels).unwrap()
}

fn write_frame_dir(temp_dir: &TempDir, count: usize) -> std::path::PathBuf {
    let input_dir = temp_dir.path().join("clip");
    fs::create_dir_all(&input_dir).unwrap();
    for i in 0..count {
        RgbImage::from_pixel(64, 64, Rgb([i as u8, 0, 0]))
            .save(input_dir.join(format!("frame_{i:03}.png")))
            .unwrap();
    }
    input_dir
}

#[test]
fn test_end_to_end_directory_session_export() {
    let temp_dir = TempDir::new().unwrap();
    let input_dir = write_frame_dir(&temp_dir, 6);
    let output_dir = temp_dir.path().join("output");

    let mut controller =
        PlaybackController::new(FrameAnalyzer::new(MockPatchClassifier::new(64, dirty_grid())));
    controller.select_source(Box::new(ImageSequenceSource::open(&input_dir).unwrap()));

    let mut runner = SessionRunner::new(controller, output_dir);
    let artifacts = runner.run().unwrap();

    // ストライド 2、フレーム 0,2,4 の 3 サンプル
    assert_eq!(runner.controller().session().len(), 3);
    assert_eq!(runner.controller().state(), PlaybackState::Finished);

    // JSON: レコード配列。各レコードは 4 キーで、patch_array は 16x16
    let json: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&artifacts.json_path).unwrap()).unwrap();
    let records = json.as_array().unwrap();
    assert_eq!(records.len(), 3);
    for record in records {
        let object = record.as_object().unwrap();
        assert_eq!(object.len(), 4);
        assert!(object.contains_key("time"));
        assert!(object.contains_key("contamination_level"));
        assert!(object.contains_key("patch_counts"));
        let rows = object["patch_array"].as_array().unwrap();
        assert_eq!(rows.len(), GRID_DIM);
        assert_eq!(rows[0].as_array().unwrap().len(), GRID_DIM);

        let level = object["contamination_level"].as_f64().unwrap();
        assert!((level - 16.0 / 256.0).abs() < 1e-9);
    }

    // CSV: ヘッダ + サンプル行
    let csv = fs::read_to_string(&artifacts.csv_path).unwrap();
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines[0], "Time (s), Contamination Level (%), Frame Number");
    assert_eq!(lines.len(), 4);
    assert!(lines[1].ends_with(", 0"));

    // TXT: レコードごとのブロック
    let txt = fs::read_to_string(&artifacts.txt_path).unwrap();
    assert_eq!(txt.matches("Contamination Level: 6.25%").count(), 3);
    assert!(txt.contains("rain_blur: 8"));
    assert!(txt.contains("rain_block: 8"));

    // グラフ PNG が生成されている
    assert!(artifacts.graph_path.exists());
    let graph = image::open(&artifacts.graph_path).unwrap();
    assert_eq!(graph.width(), 900);

    assert!(artifacts.video_path.is_none());
}

#[test]
fn test_seek_then_export_keeps_full_session_log() {
    let temp_dir = TempDir::new().unwrap();
    let input_dir = write_frame_dir(&temp_dir, 10);
    let output_dir = temp_dir.path().join("output");

    let mut controller =
        PlaybackController::new(FrameAnalyzer::new(MockPatchClassifier::new(64, dirty_grid())));
    controller.select_source(Box::new(ImageSequenceSource::open(&input_dir).unwrap()));
    controller.play();

    for _ in 0..6 {
        controller.tick().unwrap();
    }
    assert_eq!(controller.tracker().len(), 3);

    // 手動シークでプロットは 1 点に戻るが、完全ログは残る
    match controller.seek(8).unwrap() {
        TickOutcome::Analyzed { frame_index, .. } => assert_eq!(frame_index, 8),
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(controller.tracker().len(), 1);
    assert_eq!(controller.session().len(), 4);

    let runner = SessionRunner::new(controller, output_dir);
    let artifacts = runner.export(None).unwrap();

    let json: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&artifacts.json_path).unwrap()).unwrap();
    assert_eq!(json.as_array().unwrap().len(), 4);

    // CSV はプロット側なのでシーク後の 1 点だけ
    let csv = fs::read_to_string(&artifacts.csv_path).unwrap();
    assert_eq!(csv.lines().count(), 2);
}

#[test]
fn test_live_session_with_recording_export() {
    let temp_dir = TempDir::new().unwrap();
    let output_dir = temp_dir.path().join("output");

    let frames: Vec<RgbImage> = (0..4)
        .map(|i| RgbImage::from_pixel(64, 64, Rgb([i as u8, 0, 0])))
        .collect();

    let mut controller =
        PlaybackController::new(FrameAnalyzer::new(MockPatchClassifier::new(64, dirty_grid())));
    controller.select_source(Box::new(MockFrameSource::live(frames)));

    let (sink, handle) = MockFrameSink::with_path(temp_dir.path().join("mock_recording.mp4"));
    controller.attach_recorder(RecordingSink::start(sink).unwrap());
    controller.set_process_enabled(true);
    controller.play();

    for _ in 0..8 {
        controller.tick().unwrap();
    }
    controller.pause();

    // 録画停止 → 動画移動込みのエクスポート
    let mut recorder = controller.take_recorder().unwrap();
    let video_src = recorder.output_path().to_path_buf();
    recorder.stop().unwrap();
    assert_eq!(handle.written_frames().len(), 8);
    assert!(handle.is_finished());

    // MockFrameSink はファイルを作らないので、移動対象を実体化する
    fs::write(&video_src, b"mp4").unwrap();

    let runner = SessionRunner::new(controller, output_dir);
    let artifacts = runner.export(Some(&video_src)).unwrap();

    let video_path = artifacts.video_path.unwrap();
    assert!(video_path.exists());
    let name = video_path.file_name().unwrap().to_str().unwrap();
    // ライブセッションの成果物は live_capture ステムで揃う
    assert!(name.starts_with("live_capture_"), "unexpected name: {name}");
    assert!(artifacts
        .json_path
        .file_name()
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("live_capture_"));
}

#[test]
fn test_export_with_no_samples_creates_nothing() {
    let temp_dir = TempDir::new().unwrap();
    let output_dir = temp_dir.path().join("output");

    let mut controller =
        PlaybackController::new(FrameAnalyzer::new(MockPatchClassifier::clean(64)));
    controller.select_source(Box::new(MockFrameSource::finite(vec![], 30.0)));

    let runner = SessionRunner::new(controller, output_dir.clone());
    assert!(runner.export(None).is_err());

    // 失敗時はデータファイルを一切残さない
    let leftovers = fs::read_dir(&output_dir)
        .map(|entries| entries.count())
        .unwrap_or(0);
    assert_eq!(leftovers, 0);
}
