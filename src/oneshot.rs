use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::analyzer::FrameAnalyzer;
use crate::errors::{ContamSegError, Result};
use crate::grid::CategoryHistogram;
use crate::traits::PatchClassifier;

/// 単発解析の結果
#[derive(Debug)]
pub struct OneShotReport {
    pub source_path: PathBuf,
    pub overlay_path: PathBuf,
    pub histogram: CategoryHistogram,
    pub contamination_ratio: f64,
}

/// 静止画 1 枚を別スレッドで解析するワーカー
///
/// スロットは同時に 1 件のみ。前の解析が終わる前の request は
/// 受け付けず、実行中の解析には影響しない。
pub struct OneShotWorker<C: PatchClassifier + 'static> {
    analyzer: Arc<FrameAnalyzer<C>>,
    running: Option<JoinHandle<Result<OneShotReport>>>,
}

impl<C: PatchClassifier + 'static> OneShotWorker<C> {
    pub fn new(analyzer: Arc<FrameAnalyzer<C>>) -> Self {
        Self {
            analyzer,
            running: None,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|join| !join.is_finished())
    }

    /// 解析を依頼する
    ///
    /// 先行リクエストが走っている間は拒否する。完了済みの結果が
    /// 未回収の場合も、まず wait で回収してからでないと依頼できない。
    pub fn request(&mut self, image_path: &Path, output_dir: &Path) -> Result<()> {
        if self.running.is_some() {
            return Err(ContamSegError::Configuration {
                message: "one-shot analysis already in progress".to_string(),
            });
        }

        let analyzer = Arc::clone(&self.analyzer);
        let image_path = image_path.to_path_buf();
        let output_dir = output_dir.to_path_buf();

        let join = thread::Builder::new()
            .name("oneshot-analysis".into())
            .spawn(move || run_one_shot(&analyzer, &image_path, &output_dir))
            .map_err(|e| ContamSegError::Configuration {
                message: format!("failed to spawn one-shot thread: {e}"),
            })?;

        self.running = Some(join);
        Ok(())
    }

    /// 結果を待って回収する
    pub fn wait(&mut self) -> Result<OneShotReport> {
        let join = self.running.take().ok_or_else(|| ContamSegError::Configuration {
            message: "no one-shot analysis in progress".to_string(),
        })?;
        join.join().map_err(|_| ContamSegError::Configuration {
            message: "one-shot thread panicked".to_string(),
        })?
    }

    /// 完了していれば結果を回収する（未完了なら None）
    pub fn try_take(&mut self) -> Option<Result<OneShotReport>> {
        if self.running.as_ref().is_some_and(|j| j.is_finished()) {
            return Some(self.wait());
        }
        None
    }
}

fn run_one_shot<C: PatchClassifier>(
    analyzer: &FrameAnalyzer<C>,
    image_path: &Path,
    output_dir: &Path,
) -> Result<OneShotReport> {
    let frame = image::open(image_path)
        .map_err(|e| ContamSegError::Source {
            name: image_path.display().to_string(),
            operation: "画像読み込み".to_string(),
            source: Box::new(e),
        })?
        .into_rgb8();

    let result = analyzer.analyze(&frame)?;

    std::fs::create_dir_all(output_dir).map_err(|e| ContamSegError::FileSystem {
        path: output_dir.to_path_buf(),
        operation: "出力ディレクトリ作成".to_string(),
        source: e,
    })?;

    let stem = image_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("image");
    let overlay_path = output_dir.join(format!("{stem}_overlay.png"));
    result
        .overlay
        .save(&overlay_path)
        .map_err(|e| ContamSegError::Export {
            path: overlay_path.clone(),
            reason: format!("オーバーレイ保存に失敗: {e}"),
        })?;

    Ok(OneShotReport {
        source_path: image_path.to_path_buf(),
        overlay_path,
        histogram: result.histogram,
        contamination_ratio: result.ratio,
    })
}
