use std::time::Duration;

use image::RgbImage;
use tracing::warn;

use crate::analyzer::{AnalysisResult, FrameAnalyzer};
use crate::errors::{ContamSegError, Result};
use crate::recorder::RecordingSink;
use crate::session::{FrameRecord, PlaybackState, Session};
use crate::tracker::{Sample, TimeSeriesTracker};
use crate::traits::{FrameSource, PatchClassifier};

/// 有限ソースの既定サンプリングストライド（2 フレームに 1 回解析）
pub const DEFAULT_STRIDE: u64 = 2;
/// ソースが FPS を報告しないときの既定値
pub const DEFAULT_FALLBACK_FPS: f64 = 30.0;

/// tick 1 回の結果
///
/// 呼び出し側（描画層）はこれを見てオーバーレイ・プロットを更新する。
#[derive(Debug)]
pub enum TickOutcome {
    /// 解析済み。オーバーレイとプロットを更新する
    Analyzed {
        frame_index: u64,
        time: f64,
        result: AnalysisResult,
    },
    /// 表示のみ（ストライド外、またはライブのプレビュー中）
    Displayed { frame_index: u64, frame: RgbImage },
    /// 分類失敗によりこのフレームの解析出力をスキップ（警告済み）
    Skipped { frame_index: u64 },
    /// 有限ソースの終端に到達
    Finished,
    /// Playing でないため何も起きない
    NotPlaying,
}

/// 再生制御の状態機械
///
/// 外部のスケジューラ（UI タイマーや CLI のループ）が `tick` を
/// 周期的に呼ぶ前提の協調駆動。中断点はフレーム境界のみで、
/// フレーム処理の途中で止まることはない。
pub struct PlaybackController<C: PatchClassifier> {
    analyzer: FrameAnalyzer<C>,
    source: Option<Box<dyn FrameSource>>,
    state: PlaybackState,
    tracker: TimeSeriesTracker,
    session: Session,
    recorder: Option<RecordingSink>,
    stride: u64,
    fallback_fps: f64,
    process_enabled: bool,
    next_frame_index: u64,
}

impl<C: PatchClassifier> PlaybackController<C> {
    pub fn new(analyzer: FrameAnalyzer<C>) -> Self {
        Self {
            analyzer,
            source: None,
            state: PlaybackState::Idle,
            tracker: TimeSeriesTracker::default(),
            session: Session::default(),
            recorder: None,
            stride: DEFAULT_STRIDE,
            fallback_fps: DEFAULT_FALLBACK_FPS,
            process_enabled: false,
            next_frame_index: 0,
        }
    }

    pub fn with_stride(mut self, stride: u64) -> Self {
        self.stride = stride.max(1);
        self
    }

    pub fn with_fallback_fps(mut self, fps: f64) -> Self {
        self.fallback_fps = fps;
        self
    }

    /// プロットの保持サンプル数を変更する
    pub fn with_retention(mut self, capacity: usize) -> Self {
        self.tracker = TimeSeriesTracker::new(capacity.max(1));
        self
    }

    /// ソースを差し替えて Idle へ
    ///
    /// トラッカーとセッションはここでリセットされる。開けないソースは
    /// コンストラクタ側で Source エラーになるため、ここに来た時点で
    /// 読める状態にある。
    pub fn select_source(&mut self, source: Box<dyn FrameSource>) {
        self.session = Session::new(source.name(), source.is_live());
        self.tracker.reset();
        self.next_frame_index = 0;
        self.process_enabled = false;
        self.source = Some(source);
        self.state = PlaybackState::Idle;
    }

    /// Idle/Paused → Playing。有限ソースは前回位置から再開する
    pub fn play(&mut self) {
        if matches!(self.state, PlaybackState::Idle | PlaybackState::Paused)
            && self.source.is_some()
        {
            self.state = PlaybackState::Playing;
        }
    }

    /// Playing → Paused（位置は保持）
    pub fn pause(&mut self) {
        if self.state == PlaybackState::Playing {
            self.state = PlaybackState::Paused;
        }
    }

    /// ライブソースの解析有効フラグ（プレビューと推論の分離）
    pub fn set_process_enabled(&mut self, enabled: bool) {
        self.process_enabled = enabled;
    }

    /// ライブ録画シンクを接続する
    pub fn attach_recorder(&mut self, recorder: RecordingSink) {
        self.recorder = Some(recorder);
    }

    /// 録画シンクを取り外す（tick 停止 → stop → エクスポートの順序用）
    pub fn take_recorder(&mut self) -> Option<RecordingSink> {
        self.recorder.take()
    }

    /// 選択中ソースの総フレーム数（ライブや未選択は None）
    pub fn frame_count(&self) -> Option<u64> {
        self.source.as_ref().and_then(|s| s.frame_count())
    }

    /// 実効フレームレート（ソースが報告しなければ既定値）
    pub fn fps(&self) -> f64 {
        self.source
            .as_ref()
            .and_then(|s| s.fps())
            .filter(|fps| *fps > 0.0)
            .unwrap_or(self.fallback_fps)
    }

    /// スケジューリング周期 = 1000ms / フレームレート
    pub fn tick_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps())
    }

    /// 1 tick ぶんの前進
    ///
    /// 有限ソース: ストライド上のフレームだけ解析する（推論コストの上限）。
    /// ライブソース: 毎 tick 読むが、解析は process フラグが立っている間だけ。
    /// 生フレームは解析の成否に関わらず録画シンクへ送る。
    pub fn tick(&mut self) -> Result<TickOutcome> {
        if self.state != PlaybackState::Playing {
            return Ok(TickOutcome::NotPlaying);
        }
        let Some(source) = self.source.as_mut() else {
            return Ok(TickOutcome::NotPlaying);
        };
        let live = source.is_live();

        let Some(frame) = source.read_frame()? else {
            // ライブソースは終端を持たないため、ここに来るのは有限ソースのみ
            self.state = PlaybackState::Finished;
            return Ok(TickOutcome::Finished);
        };

        let frame_index = self.next_frame_index;
        self.next_frame_index += 1;
        let time = frame_index as f64 / self.fps();

        if live {
            if let Some(recorder) = &self.recorder {
                if let Err(err) = recorder.submit(&frame) {
                    // 録画は失敗しても再生を止めない
                    warn!("recording submit failed at frame {frame_index}: {err}");
                }
            }
        }

        let should_analyze = if live {
            self.process_enabled
        } else {
            frame_index % self.stride == 0
        };
        if !should_analyze {
            return Ok(TickOutcome::Displayed { frame_index, frame });
        }

        self.analyze_frame(frame_index, time, &frame, false)
    }

    /// 明示的なフレームジャンプ（先頭・末尾・スライダ操作）
    ///
    /// ストライドを無視して着地フレームを必ず解析し、プロットを
    /// そのフレームだけの 1 サンプルに置き直す。セッションの完全ログは
    /// 消さないので、エクスポートには全履歴が残る。
    pub fn seek(&mut self, frame_index: u64) -> Result<TickOutcome> {
        let Some(source) = self.source.as_mut() else {
            return Err(ContamSegError::Configuration {
                message: "no source selected".to_string(),
            });
        };
        if source.is_live() {
            return Err(ContamSegError::Source {
                name: source.name(),
                operation: "seek".to_string(),
                source: Box::new(std::io::Error::other("live sources cannot seek")),
            });
        }

        source.seek(frame_index)?;
        let Some(frame) = source.read_frame()? else {
            let name = source.name();
            return Err(ContamSegError::Source {
                name,
                operation: "seek".to_string(),
                source: Box::new(std::io::Error::other(format!(
                    "frame {frame_index} out of range"
                ))),
            });
        };
        self.next_frame_index = frame_index + 1;
        if self.state == PlaybackState::Finished {
            self.state = PlaybackState::Paused;
        }

        let time = frame_index as f64 / self.fps();
        self.analyze_frame(frame_index, time, &frame, true)
    }

    fn analyze_frame(
        &mut self,
        frame_index: u64,
        time: f64,
        frame: &RgbImage,
        reset_plot: bool,
    ) -> Result<TickOutcome> {
        match self.analyzer.analyze(frame) {
            Ok(result) => {
                if reset_plot {
                    self.tracker.reset();
                }
                self.tracker.append(Sample {
                    time,
                    ratio: result.ratio,
                    frame_index,
                });
                self.session.push(FrameRecord {
                    time,
                    contamination_level: result.ratio,
                    patch_counts: result.histogram.clone(),
                    patch_array: result.grid,
                    frame_index,
                });
                Ok(TickOutcome::Analyzed {
                    frame_index,
                    time,
                    result,
                })
            }
            Err(err) if err.is_frame_local() => {
                // 分類失敗はフレーム単位で握りつぶし、セッションは続行
                warn!("classifier failed at frame {frame_index}: {err}");
                Ok(TickOutcome::Skipped { frame_index })
            }
            Err(err) => Err(err),
        }
    }

    pub const fn state(&self) -> PlaybackState {
        self.state
    }

    pub const fn tracker(&self) -> &TimeSeriesTracker {
        &self.tracker
    }

    pub const fn session(&self) -> &Session {
        &self.session
    }

    pub const fn stride(&self) -> u64 {
        self.stride
    }

    pub const fn process_enabled(&self) -> bool {
        self.process_enabled
    }
}
