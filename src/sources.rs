use std::path::{Path, PathBuf};

use image::RgbImage;
use walkdir::WalkDir;

use crate::errors::{ContamSegError, Result};
use crate::traits::FrameSource;

fn source_error(
    name: &str,
    operation: &str,
    source: Box<dyn std::error::Error + Send + Sync>,
) -> ContamSegError {
    ContamSegError::Source {
        name: name.to_string(),
        operation: operation.to_string(),
        source,
    }
}

fn stem_of(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("source")
        .to_string()
}

/// 静止画 1 枚のソース
///
/// 最初の read で画像を 1 フレーム返し、以降は終端。開けないファイルは
/// 選択時点の Source エラーとして報告され、再生状態は変わらない。
#[derive(Debug)]
pub struct StillImageSource {
    frame: RgbImage,
    name: String,
    emitted: bool,
}

impl StillImageSource {
    pub fn open(path: &Path) -> Result<Self> {
        let name = stem_of(path);
        let frame = image::open(path)
            .map_err(|e| source_error(&name, "画像読み込み", Box::new(e)))?
            .into_rgb8();
        Ok(Self {
            frame,
            name,
            emitted: false,
        })
    }
}

impl FrameSource for StillImageSource {
    fn read_frame(&mut self) -> Result<Option<RgbImage>> {
        if self.emitted {
            return Ok(None);
        }
        self.emitted = true;
        Ok(Some(self.frame.clone()))
    }

    fn seek(&mut self, frame_index: u64) -> Result<()> {
        if frame_index > 0 {
            return Err(source_error(
                &self.name,
                "seek",
                Box::new(std::io::Error::other("still image has a single frame")),
            ));
        }
        self.emitted = false;
        Ok(())
    }

    fn fps(&self) -> Option<f64> {
        None
    }

    fn frame_count(&self) -> Option<u64> {
        Some(1)
    }

    fn is_live(&self) -> bool {
        false
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}

/// 静止画ディレクトリを有限フレーム列として扱うソース
///
/// 対応フォーマットのファイルをパス順に集めて逐次デコードする。
/// フレームは read のたびに読むので、巨大なディレクトリでも
/// メモリに全展開しない。
#[derive(Debug)]
pub struct ImageSequenceSource {
    paths: Vec<PathBuf>,
    position: usize,
    name: String,
    fps: Option<f64>,
}

impl ImageSequenceSource {
    pub fn open(dir: &Path) -> Result<Self> {
        let name = stem_of(dir);
        let mut paths: Vec<PathBuf> = WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| image::ImageFormat::from_path(e.path()).is_ok())
            .map(|e| e.into_path())
            .collect();
        paths.sort();

        if paths.is_empty() {
            return Err(source_error(
                &name,
                "ディレクトリ走査",
                Box::new(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "no supported images in directory",
                )),
            ));
        }

        Ok(Self {
            paths,
            position: 0,
            name,
            fps: None,
        })
    }

    /// フレーム列を動画相当として扱うときの公称レート
    pub fn with_fps(mut self, fps: f64) -> Self {
        self.fps = Some(fps);
        self
    }
}

impl FrameSource for ImageSequenceSource {
    fn read_frame(&mut self) -> Result<Option<RgbImage>> {
        let Some(path) = self.paths.get(self.position) else {
            return Ok(None);
        };
        let frame = image::open(path)
            .map_err(|e| source_error(&self.name, "画像読み込み", Box::new(e)))?
            .into_rgb8();
        self.position += 1;
        Ok(Some(frame))
    }

    fn seek(&mut self, frame_index: u64) -> Result<()> {
        self.position = frame_index as usize;
        Ok(())
    }

    fn fps(&self) -> Option<f64> {
        self.fps
    }

    fn frame_count(&self) -> Option<u64> {
        Some(self.paths.len() as u64)
    }

    fn is_live(&self) -> bool {
        false
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}

#[cfg(feature = "video")]
mod video {
    use std::path::{Path, PathBuf};

    use image::RgbImage;
    use opencv::{
        core::{self, Mat},
        imgproc,
        prelude::*,
        videoio::{self, VideoCapture, VideoWriter},
    };

    use super::{source_error, stem_of};
    use crate::errors::{ContamSegError, Result};
    use crate::traits::{FrameSink, FrameSource};

    fn mat_to_rgb(mat: &Mat) -> Result<RgbImage> {
        let mut rgb = Mat::default();
        imgproc::cvt_color(mat, &mut rgb, imgproc::COLOR_BGR2RGB, 0)
            .map_err(|e| source_error("frame", "色空間変換", Box::new(e)))?;
        let width = rgb.cols() as u32;
        let height = rgb.rows() as u32;
        let data = rgb
            .data_bytes()
            .map_err(|e| source_error("frame", "フレーム取り出し", Box::new(e)))?
            .to_vec();
        RgbImage::from_raw(width, height, data).ok_or_else(|| {
            source_error(
                "frame",
                "フレーム取り出し",
                Box::new(std::io::Error::other("frame buffer size mismatch")),
            )
        })
    }

    /// 有限の動画ファイルソース（opencv videoio）
    pub struct VideoFileSource {
        cap: VideoCapture,
        fps: f64,
        total_frames: u64,
        name: String,
    }

    impl VideoFileSource {
        pub fn open(path: &Path) -> Result<Self> {
            let name = stem_of(path);
            let path_str = path.to_str().ok_or_else(|| {
                source_error(
                    &name,
                    "パス変換",
                    Box::new(std::io::Error::other("non-UTF-8 path")),
                )
            })?;

            let cap = VideoCapture::from_file(path_str, videoio::CAP_ANY)
                .map_err(|e| source_error(&name, "動画オープン", Box::new(e)))?;
            let opened = cap
                .is_opened()
                .map_err(|e| source_error(&name, "動画オープン", Box::new(e)))?;
            if !opened {
                return Err(source_error(
                    &name,
                    "動画オープン",
                    Box::new(std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        "cannot open video file",
                    )),
                ));
            }

            let fps = cap.get(videoio::CAP_PROP_FPS).unwrap_or(0.0);
            let total_frames = cap.get(videoio::CAP_PROP_FRAME_COUNT).unwrap_or(0.0) as u64;

            Ok(Self {
                cap,
                fps,
                total_frames,
                name,
            })
        }
    }

    impl FrameSource for VideoFileSource {
        fn read_frame(&mut self) -> Result<Option<RgbImage>> {
            let mut mat = Mat::default();
            let ok = self
                .cap
                .read(&mut mat)
                .map_err(|e| source_error(&self.name, "フレーム読み込み", Box::new(e)))?;
            if !ok || mat.empty() {
                return Ok(None);
            }
            mat_to_rgb(&mat).map(Some)
        }

        fn seek(&mut self, frame_index: u64) -> Result<()> {
            self.cap
                .set(videoio::CAP_PROP_POS_FRAMES, frame_index as f64)
                .map_err(|e| source_error(&self.name, "seek", Box::new(e)))?;
            Ok(())
        }

        fn fps(&self) -> Option<f64> {
            (self.fps > 0.0).then_some(self.fps)
        }

        fn frame_count(&self) -> Option<u64> {
            Some(self.total_frames)
        }

        fn is_live(&self) -> bool {
            false
        }

        fn name(&self) -> String {
            self.name.clone()
        }
    }

    /// ライブキャプチャデバイスのソース
    ///
    /// 終端を持たず、シーク不可。FPS を報告しないデバイスでは
    /// 呼び出し側の既定レートが使われる。
    pub struct LiveCaptureSource {
        cap: VideoCapture,
        fps: f64,
        name: String,
    }

    impl LiveCaptureSource {
        pub fn open(device_index: i32) -> Result<Self> {
            let name = format!("device{device_index}");
            let cap = VideoCapture::new(device_index, videoio::CAP_ANY)
                .map_err(|e| source_error(&name, "デバイスオープン", Box::new(e)))?;
            let opened = cap
                .is_opened()
                .map_err(|e| source_error(&name, "デバイスオープン", Box::new(e)))?;
            if !opened {
                return Err(source_error(
                    &name,
                    "デバイスオープン",
                    Box::new(std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        "cannot open capture device",
                    )),
                ));
            }

            let fps = cap.get(videoio::CAP_PROP_FPS).unwrap_or(0.0);
            Ok(Self { cap, fps, name })
        }
    }

    impl FrameSource for LiveCaptureSource {
        fn read_frame(&mut self) -> Result<Option<RgbImage>> {
            let mut mat = Mat::default();
            let ok = self
                .cap
                .read(&mut mat)
                .map_err(|e| source_error(&self.name, "フレーム読み込み", Box::new(e)))?;
            if !ok || mat.empty() {
                return Err(source_error(
                    &self.name,
                    "フレーム読み込み",
                    Box::new(std::io::Error::other("capture device returned no frame")),
                ));
            }
            mat_to_rgb(&mat).map(Some)
        }

        fn seek(&mut self, _frame_index: u64) -> Result<()> {
            Err(source_error(
                &self.name,
                "seek",
                Box::new(std::io::Error::other("live sources cannot seek")),
            ))
        }

        fn fps(&self) -> Option<f64> {
            (self.fps > 0.0).then_some(self.fps)
        }

        fn frame_count(&self) -> Option<u64> {
            None
        }

        fn is_live(&self) -> bool {
            true
        }

        fn name(&self) -> String {
            self.name.clone()
        }
    }

    /// MP4 書き出しシンク（RecordingSink の消費スレッドが所有する）
    pub struct Mp4Sink {
        writer: VideoWriter,
        path: PathBuf,
    }

    impl Mp4Sink {
        pub fn create(path: &Path, fps: f64, width: u32, height: u32) -> Result<Self> {
            let recording_error = |operation: &str, e: opencv::Error| ContamSegError::Recording {
                operation: operation.to_string(),
                source: Box::new(e),
            };

            let path_str = path.to_str().ok_or_else(|| ContamSegError::Recording {
                operation: "パス変換".to_string(),
                source: Box::new(std::io::Error::other("non-UTF-8 path")),
            })?;
            let fourcc = VideoWriter::fourcc('m', 'p', '4', 'v')
                .map_err(|e| recording_error("fourcc", e))?;
            let writer = VideoWriter::new(
                path_str,
                fourcc,
                fps,
                core::Size::new(width as i32, height as i32),
                true,
            )
            .map_err(|e| recording_error("ライター作成", e))?;
            let opened = writer
                .is_opened()
                .map_err(|e| recording_error("ライター作成", e))?;
            if !opened {
                // ライターが開けなければ録画は無効化され、再生は続行する
                return Err(ContamSegError::Recording {
                    operation: "ライター作成".to_string(),
                    source: Box::new(std::io::Error::other("cannot open video writer")),
                });
            }

            Ok(Self {
                writer,
                path: path.to_path_buf(),
            })
        }
    }

    impl FrameSink for Mp4Sink {
        fn write_frame(&mut self, frame: &RgbImage) -> Result<()> {
            let recording_error = |operation: &str, e: opencv::Error| ContamSegError::Recording {
                operation: operation.to_string(),
                source: Box::new(e),
            };

            let mat = Mat::from_slice(frame.as_raw())
                .map_err(|e| recording_error("フレーム変換", e))?;
            let mat = mat
                .reshape(3, frame.height() as i32)
                .map_err(|e| recording_error("フレーム変換", e))?;
            let mut bgr = Mat::default();
            imgproc::cvt_color(&mat, &mut bgr, imgproc::COLOR_RGB2BGR, 0)
                .map_err(|e| recording_error("色空間変換", e))?;
            self.writer
                .write(&bgr)
                .map_err(|e| recording_error("フレーム書き込み", e))
        }

        fn finish(&mut self) -> Result<()> {
            self.writer.release().map_err(|e| ContamSegError::Recording {
                operation: "ライタークローズ".to_string(),
                source: Box::new(e),
            })
        }

        fn path(&self) -> &Path {
            &self.path
        }
    }
}

#[cfg(feature = "video")]
pub use video::{LiveCaptureSource, Mp4Sink, VideoFileSource};
