pub mod analyzer;
pub mod config;
pub mod errors;
pub mod exporter;
pub mod grid;
pub mod model;
pub mod oneshot;
pub mod playback;
pub mod recorder;
pub mod session;
pub mod sources;
pub mod tracker;
pub mod traits;

pub mod mocks;

use std::fs;
use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use walkdir::WalkDir;

pub use analyzer::{AnalysisResult, FrameAnalyzer};
pub use config::Config;
pub use errors::{ContamSegError, Result};
pub use exporter::{ExportArtifacts, SessionExporter};
pub use grid::{CategoryHistogram, PatchGrid};
pub use model::OnnxPatchClassifier;
pub use playback::{PlaybackController, TickOutcome};
pub use session::PlaybackState;
pub use traits::*;

#[cfg(test)]
pub use mocks::*;

/// 有限ソースを終端まで走らせてエクスポートする一括実行
///
/// CLI のバッチモード用。tick を進捗バー付きで回し、Finished に
/// 達したらセッション一式を出力ディレクトリへ書き出す。
pub struct SessionRunner<C: PatchClassifier> {
    controller: PlaybackController<C>,
    output_dir: PathBuf,
}

impl<C: PatchClassifier> SessionRunner<C> {
    pub const fn new(controller: PlaybackController<C>, output_dir: PathBuf) -> Self {
        Self {
            controller,
            output_dir,
        }
    }

    pub fn run(&mut self) -> Result<ExportArtifacts> {
        let pb = match self.controller.frame_count() {
            Some(total) => ProgressBar::new(total),
            None => ProgressBar::new_spinner(),
        };
        pb.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
                )
                .map_err(|e| ContamSegError::Configuration {
                    message: format!("invalid progress template: {e}"),
                })?
                .progress_chars("#>-"),
        );

        self.controller.play();
        loop {
            match self.controller.tick()? {
                TickOutcome::Finished => break,
                TickOutcome::NotPlaying => {
                    return Err(ContamSegError::Configuration {
                        message: "no playable source selected".to_string(),
                    });
                }
                _ => pb.inc(1),
            }
        }
        pb.finish_with_message("解析完了");

        self.export(None)
    }

    /// 蓄積済みセッションを書き出す（録画動画があれば一緒に移動）
    pub fn export(&self, recorded_video: Option<&Path>) -> Result<ExportArtifacts> {
        SessionExporter::new().export(
            self.controller.session(),
            self.controller.tracker(),
            &self.output_dir,
            recorded_video,
        )
    }

    pub fn controller_mut(&mut self) -> &mut PlaybackController<C> {
        &mut self.controller
    }

    pub const fn controller(&self) -> &PlaybackController<C> {
        &self.controller
    }
}

/// ディレクトリ内の静止画を独立に一括解析する
///
/// 時系列セッションとは別のモードで、画像ごとにオーバーレイを
/// 保存するだけ。フレーム間に順序がないので並列に回す。
pub struct BatchOverlayProcessor<C: PatchClassifier> {
    analyzer: FrameAnalyzer<C>,
}

impl<C: PatchClassifier> BatchOverlayProcessor<C> {
    pub const fn new(analyzer: FrameAnalyzer<C>) -> Self {
        Self { analyzer }
    }

    /// 処理した画像数を返す（対象なしは 0）
    pub fn process_directory(&self, input_dir: &Path, output_dir: &Path) -> Result<usize> {
        if !input_dir.exists() {
            return Err(ContamSegError::FileSystem {
                path: input_dir.to_path_buf(),
                operation: "ディレクトリ存在確認".to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "入力ディレクトリが存在しません",
                ),
            });
        }

        let image_files: Vec<PathBuf> = WalkDir::new(input_dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| image::ImageFormat::from_path(e.path()).is_ok())
            .map(|e| e.into_path())
            .collect();

        if image_files.is_empty() {
            println!("処理対象の画像ファイルが見つかりません");
            return Ok(0);
        }

        fs::create_dir_all(output_dir).map_err(|e| ContamSegError::FileSystem {
            path: output_dir.to_path_buf(),
            operation: "ディレクトリ作成".to_string(),
            source: e,
        })?;

        let pb = ProgressBar::new(image_files.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
                )
                .map_err(|e| ContamSegError::Configuration {
                    message: format!("invalid progress template: {e}"),
                })?
                .progress_chars("#>-"),
        );

        image_files.par_iter().try_for_each(|input_file| {
            self.process_single_image(input_file, output_dir)?;
            pb.inc(1);
            Ok::<(), ContamSegError>(())
        })?;

        pb.finish_with_message("処理完了");
        Ok(image_files.len())
    }

    fn process_single_image(&self, input_file: &Path, output_dir: &Path) -> Result<()> {
        let frame = image::open(input_file)
            .map_err(|e| ContamSegError::Source {
                name: input_file.display().to_string(),
                operation: "画像読み込み".to_string(),
                source: Box::new(e),
            })?
            .into_rgb8();

        let result = self.analyzer.analyze(&frame)?;

        let stem = input_file
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("image");
        let output_file = output_dir.join(format!("{stem}_overlay.png"));
        result
            .overlay
            .save(&output_file)
            .map_err(|e| ContamSegError::Export {
                path: output_file.clone(),
                reason: format!("オーバーレイ保存に失敗: {e}"),
            })
    }
}
