use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Sender, TrySendError};
use image::RgbImage;
use parking_lot::Mutex;
use tracing::warn;

use crate::errors::{ContamSegError, Result};
use crate::traits::FrameSink;

/// 提出キューの既定容量
///
/// submit は非ブロッキングなので、満杯時はフレームを受け付けず
/// Recording エラーとして報告する（再生ループを止めないため）。
const QUEUE_CAPACITY: usize = 256;

/// ライブキャプチャの録画シンク
///
/// 提出されたフレームを有界キュー経由で 1 本の消費スレッドへ渡し、
/// FrameSink へ書き出す。スレッド間で共有するのはこのキューだけで、
/// 書き込み先のハンドルへ生産側から触れることはない。
///
/// stop は「チャネルを閉じる → 消費スレッドが残りを書き切る → join」
/// の順で、受理済みフレームがすべて提出順で書かれ、ファイルが閉じて
/// から戻ることを保証する。
pub struct RecordingSink {
    tx: Option<Sender<RgbImage>>,
    join: Option<JoinHandle<()>>,
    error: Arc<Mutex<Option<ContamSegError>>>,
    output_path: PathBuf,
}

impl RecordingSink {
    pub fn start<W: FrameSink + 'static>(sink: W) -> Result<Self> {
        Self::start_with_capacity(sink, QUEUE_CAPACITY)
    }

    pub fn start_with_capacity<W: FrameSink + 'static>(
        mut sink: W,
        capacity: usize,
    ) -> Result<Self> {
        let (tx, rx) = bounded::<RgbImage>(capacity);
        let error = Arc::new(Mutex::new(None));
        let thread_error = Arc::clone(&error);
        let output_path = sink.path().to_path_buf();

        let join = thread::Builder::new()
            .name("recording-sink".into())
            .spawn(move || {
                // 全送信側が閉じるまでキューを排出する
                for frame in rx {
                    if let Err(err) = sink.write_frame(&frame) {
                        warn!("recording sink write failed: {err}");
                        *thread_error.lock() = Some(err);
                        break;
                    }
                }
                if let Err(err) = sink.finish() {
                    let mut guard = thread_error.lock();
                    if guard.is_none() {
                        *guard = Some(err);
                    }
                }
            })
            .map_err(|e| ContamSegError::Recording {
                operation: "spawn consumer thread".to_string(),
                source: Box::new(e),
            })?;

        Ok(Self {
            tx: Some(tx),
            join: Some(join),
            error,
            output_path,
        })
    }

    /// フレームを提出する（エンキューのみ、ブロックしない）
    pub fn submit(&self, frame: &RgbImage) -> Result<()> {
        let tx = self.tx.as_ref().ok_or_else(|| ContamSegError::Recording {
            operation: "submit frame".to_string(),
            source: Box::new(std::io::Error::other("recording already stopped")),
        })?;

        tx.try_send(frame.clone()).map_err(|e| {
            let reason = match e {
                TrySendError::Full(_) => "submission queue full",
                TrySendError::Disconnected(_) => "consumer thread exited",
            };
            ContamSegError::Recording {
                operation: "submit frame".to_string(),
                source: Box::new(std::io::Error::other(reason)),
            }
        })
    }

    /// 消費スレッドに残りを書き切らせてから join する
    ///
    /// 戻った時点で受理済みフレームはすべて書き込まれ、ファイルは
    /// 完結している。書き込み側で起きていたエラーはここで表面化する。
    pub fn stop(&mut self) -> Result<PathBuf> {
        // チャネルを閉じると消費スレッドのループが排出後に終わる
        self.tx.take();

        if let Some(join) = self.join.take() {
            join.join().map_err(|_| ContamSegError::Recording {
                operation: "join consumer thread".to_string(),
                source: Box::new(std::io::Error::other("consumer thread panicked")),
            })?;
        }

        if let Some(err) = self.error.lock().take() {
            return Err(err);
        }
        Ok(self.output_path.clone())
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }
}

impl Drop for RecordingSink {
    fn drop(&mut self) {
        if self.join.is_some() {
            if let Err(err) = self.stop() {
                warn!("recording sink shutdown failed: {err}");
            }
        }
    }
}
