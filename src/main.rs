use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, ensure, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use contam_seg_rs::analyzer::FrameAnalyzer;
use contam_seg_rs::config::Config;
use contam_seg_rs::exporter::ExportArtifacts;
use contam_seg_rs::grid::category_label;
use contam_seg_rs::model::OnnxPatchClassifier;
use contam_seg_rs::oneshot::OneShotWorker;
use contam_seg_rs::playback::PlaybackController;
use contam_seg_rs::sources::ImageSequenceSource;
use contam_seg_rs::traits::FrameSource;
use contam_seg_rs::SessionRunner;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::parse();

    ensure!(config.model_path.exists(), "Model path does not exist");

    let classifier = OnnxPatchClassifier::new(&config.model_path, config.device_id)?;
    let analyzer = FrameAnalyzer::new(classifier);

    match &config.input {
        Some(path) => {
            ensure!(path.exists(), "Input path does not exist");
            if path.is_dir() && config.batch {
                let processor = contam_seg_rs::BatchOverlayProcessor::new(analyzer);
                let processed = processor.process_directory(path, &config.output_dir)?;
                println!("{processed} 枚を処理しました");
            } else if path.is_dir() {
                let source = ImageSequenceSource::open(path)?;
                let artifacts = run_finite(analyzer, Box::new(source), &config)?;
                report_artifacts(&artifacts);
            } else if image::ImageFormat::from_path(path).is_ok() {
                run_one_shot(analyzer, path, &config)?;
            } else {
                let artifacts = run_video_file(analyzer, path, &config)?;
                report_artifacts(&artifacts);
            }
        }
        None => {
            let artifacts = run_live(analyzer, &config)?;
            report_artifacts(&artifacts);
        }
    }

    Ok(())
}

fn build_controller(
    analyzer: FrameAnalyzer<OnnxPatchClassifier>,
    source: Box<dyn FrameSource>,
    config: &Config,
) -> PlaybackController<OnnxPatchClassifier> {
    let mut controller = PlaybackController::new(analyzer)
        .with_stride(config.stride)
        .with_fallback_fps(config.fallback_fps)
        .with_retention(config.retention);
    controller.select_source(source);
    controller
}

fn run_finite(
    analyzer: FrameAnalyzer<OnnxPatchClassifier>,
    source: Box<dyn FrameSource>,
    config: &Config,
) -> Result<ExportArtifacts> {
    let controller = build_controller(analyzer, source, config);
    let mut runner = SessionRunner::new(controller, config.output_dir.clone());
    Ok(runner.run()?)
}

/// 静止画 1 枚の単発解析
fn run_one_shot(
    analyzer: FrameAnalyzer<OnnxPatchClassifier>,
    path: &Path,
    config: &Config,
) -> Result<()> {
    let mut worker = OneShotWorker::new(Arc::new(analyzer));
    worker.request(path, &config.output_dir)?;
    let report = worker.wait()?;

    println!(
        "Contamination Level: {:.2}%",
        report.contamination_ratio * 100.0
    );
    for (category, count) in report.histogram.iter() {
        println!("  {}: {}", category_label(category), count);
    }
    println!("Overlay: {}", report.overlay_path.display());
    Ok(())
}

fn report_artifacts(artifacts: &ExportArtifacts) {
    println!("Exported:");
    println!("  {}", artifacts.json_path.display());
    println!("  {}", artifacts.txt_path.display());
    println!("  {}", artifacts.csv_path.display());
    println!("  {}", artifacts.graph_path.display());
    if let Some(video) = &artifacts.video_path {
        println!("  {}", video.display());
    }
}

#[cfg(feature = "video")]
fn run_video_file(
    analyzer: FrameAnalyzer<OnnxPatchClassifier>,
    path: &Path,
    config: &Config,
) -> Result<ExportArtifacts> {
    let source = contam_seg_rs::sources::VideoFileSource::open(path)?;
    run_finite(analyzer, Box::new(source), config)
}

#[cfg(not(feature = "video"))]
fn run_video_file(
    _analyzer: FrameAnalyzer<OnnxPatchClassifier>,
    path: &Path,
    _config: &Config,
) -> Result<ExportArtifacts> {
    bail!(
        "{} is not a supported image, and video input requires the `video` feature",
        path.display()
    );
}

/// ライブキャプチャを指定時間だけ回してエクスポートする
///
/// 録画シンクは最初のフレームでサイズが判明してから接続するため、
/// 先頭 1 フレームは録画に含まれない。
#[cfg(feature = "video")]
fn run_live(
    analyzer: FrameAnalyzer<OnnxPatchClassifier>,
    config: &Config,
) -> Result<ExportArtifacts> {
    use std::time::Instant;

    use tracing::info;

    use contam_seg_rs::playback::TickOutcome;
    use contam_seg_rs::recorder::RecordingSink;
    use contam_seg_rs::sources::{LiveCaptureSource, Mp4Sink};

    let duration_secs = match config.duration_secs {
        Some(secs) => secs,
        None => bail!("live capture requires --duration-secs"),
    };

    let source = LiveCaptureSource::open(config.device)?;
    let mut controller = build_controller(analyzer, Box::new(source), config);
    controller.play();

    let started = Instant::now();
    let mut attached_recorder = false;
    while started.elapsed().as_secs() < duration_secs {
        let outcome = controller.tick()?;

        // 最初のフレームで録画シンクを接続し、以降は解析を有効化
        if !controller.process_enabled() {
            if let TickOutcome::Displayed { frame, .. } = &outcome {
                if config.record && !attached_recorder {
                    std::fs::create_dir_all(&config.output_dir)?;
                    let video_path = config.output_dir.join("live_capture.mp4");
                    // ライターが開けなければ録画は諦めて再生を続ける
                    match Mp4Sink::create(
                        &video_path,
                        controller.fps(),
                        frame.width(),
                        frame.height(),
                    )
                    .and_then(RecordingSink::start)
                    {
                        Ok(recorder) => controller.attach_recorder(recorder),
                        Err(err) => tracing::warn!("recording disabled: {err}"),
                    }
                    attached_recorder = true;
                }
                controller.set_process_enabled(true);
            }
        }

        std::thread::sleep(controller.tick_period());
    }
    controller.pause();
    info!("live capture finished after {:?}", started.elapsed());

    let recorded_video = match controller.take_recorder() {
        Some(mut recorder) => Some(recorder.stop()?),
        None => None,
    };

    let runner = SessionRunner::new(controller, config.output_dir.clone());
    Ok(runner.export(recorded_video.as_deref())?)
}

#[cfg(not(feature = "video"))]
fn run_live(
    _analyzer: FrameAnalyzer<OnnxPatchClassifier>,
    _config: &Config,
) -> Result<ExportArtifacts> {
    bail!("live capture requires the `video` feature");
}
