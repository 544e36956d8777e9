use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::RgbImage;
use parking_lot::Mutex;

use crate::errors::{ContamSegError, Result};
use crate::grid::{PatchGrid, CATEGORY_CLEAN};
use crate::traits::{FrameSink, FrameSource, PatchClassifier};

/// テスト用のモック分類器
///
/// 常に同じグリッドを返す決定的な実装。failing で生成すると
/// フレーム単位の Classifier エラーを再現する。
#[derive(Debug, Clone)]
pub struct MockPatchClassifier {
    input_size: u32,
    grid: PatchGrid,
    fail: bool,
}

impl MockPatchClassifier {
    pub const fn new(input_size: u32, grid: PatchGrid) -> Self {
        Self {
            input_size,
            grid,
            fail: false,
        }
    }

    /// 全セル clean のモック
    pub const fn clean(input_size: u32) -> Self {
        Self::new(input_size, PatchGrid::uniform(CATEGORY_CLEAN))
    }

    /// 常に分類失敗するモック
    pub const fn failing(input_size: u32) -> Self {
        Self {
            input_size,
            grid: PatchGrid::uniform(CATEGORY_CLEAN),
            fail: true,
        }
    }
}

impl PatchClassifier for MockPatchClassifier {
    fn classify(&self, _img: &RgbImage) -> Result<PatchGrid> {
        if self.fail {
            return Err(ContamSegError::Classifier {
                operation: "mock inference".to_string(),
                source: Box::new(std::io::Error::other("mock classifier failure")),
            });
        }
        Ok(self.grid)
    }

    fn input_size(&self) -> u32 {
        self.input_size
    }
}

/// テスト用のモックフレームソース
///
/// 用意したフレーム列を逐次返す有限ソース。live を立てると
/// フレーム列をリングとして無限に返すライブキャプチャ相当になる。
pub struct MockFrameSource {
    frames: Vec<RgbImage>,
    position: usize,
    fps: Option<f64>,
    live: bool,
    name: String,
}

impl MockFrameSource {
    pub fn finite(frames: Vec<RgbImage>, fps: f64) -> Self {
        Self {
            frames,
            position: 0,
            fps: Some(fps),
            live: false,
            name: "mock_video".to_string(),
        }
    }

    pub fn live(frames: Vec<RgbImage>) -> Self {
        Self {
            frames,
            position: 0,
            // ライブデバイスは FPS を報告しないことがある
            fps: None,
            live: true,
            name: "live_capture".to_string(),
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }
}

impl FrameSource for MockFrameSource {
    fn read_frame(&mut self) -> Result<Option<RgbImage>> {
        if self.live {
            let frame = self.frames[self.position % self.frames.len()].clone();
            self.position += 1;
            return Ok(Some(frame));
        }
        match self.frames.get(self.position) {
            Some(frame) => {
                self.position += 1;
                Ok(Some(frame.clone()))
            }
            None => Ok(None),
        }
    }

    fn seek(&mut self, frame_index: u64) -> Result<()> {
        if self.live {
            return Err(ContamSegError::Source {
                name: self.name.clone(),
                operation: "seek".to_string(),
                source: Box::new(std::io::Error::other("live sources cannot seek")),
            });
        }
        self.position = frame_index as usize;
        Ok(())
    }

    fn fps(&self) -> Option<f64> {
        self.fps
    }

    fn frame_count(&self) -> Option<u64> {
        if self.live {
            None
        } else {
            Some(self.frames.len() as u64)
        }
    }

    fn is_live(&self) -> bool {
        self.live
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}

/// テスト用のモックフレームシンク
///
/// 書き込まれたフレームを共有バッファへ溜める。RecordingSink の
/// 消費スレッドがシンクを所有するため、検証用に Arc のハンドルを分ける。
pub struct MockFrameSink {
    frames: Arc<Mutex<Vec<RgbImage>>>,
    finished: Arc<Mutex<bool>>,
    path: PathBuf,
}

/// stop 後の検証に使う読み取りハンドル
#[derive(Clone)]
pub struct MockSinkHandle {
    frames: Arc<Mutex<Vec<RgbImage>>>,
    finished: Arc<Mutex<bool>>,
}

impl MockFrameSink {
    pub fn new() -> (Self, MockSinkHandle) {
        Self::with_path(PathBuf::from("mock_recording.mp4"))
    }

    pub fn with_path(path: PathBuf) -> (Self, MockSinkHandle) {
        let frames = Arc::new(Mutex::new(Vec::new()));
        let finished = Arc::new(Mutex::new(false));
        let sink = Self {
            frames: Arc::clone(&frames),
            finished: Arc::clone(&finished),
            path,
        };
        (sink, MockSinkHandle { frames, finished })
    }
}

impl MockSinkHandle {
    pub fn written_frames(&self) -> Vec<RgbImage> {
        self.frames.lock().clone()
    }

    pub fn is_finished(&self) -> bool {
        *self.finished.lock()
    }
}

impl FrameSink for MockFrameSink {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()> {
        self.frames.lock().push(frame.clone());
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        *self.finished.lock() = true;
        Ok(())
    }

    fn path(&self) -> &Path {
        &self.path
    }
}
