use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use plotters::prelude::*;
use tracing::info;

use crate::errors::{ContamSegError, Result};
use crate::grid::category_label;
use crate::session::Session;
use crate::tracker::TimeSeriesTracker;

/// グラフ画像の出力サイズ
const GRAPH_SIZE: (u32, u32) = (900, 500);

/// エクスポートで生成される成果物一式
#[derive(Debug, Clone)]
pub struct ExportArtifacts {
    pub json_path: PathBuf,
    pub txt_path: PathBuf,
    pub csv_path: PathBuf,
    pub graph_path: PathBuf,
    pub video_path: Option<PathBuf>,
}

/// セッションの成果物書き出し
///
/// 1 回の呼び出しで JSON / TXT / CSV / グラフ PNG を生成し、ライブ録画が
/// あれば出力ディレクトリへ移動する。ファイル名は
/// `{stem}_{開始HH:MM:SS}_{終了HH:MM:SS}` で揃える。
/// サンプル 0 件は Export エラーで、データファイルは一切作らない。
#[derive(Debug, Default)]
pub struct SessionExporter;

impl SessionExporter {
    pub const fn new() -> Self {
        Self
    }

    pub fn export(
        &self,
        session: &Session,
        tracker: &TimeSeriesTracker,
        dest_dir: &Path,
        recorded_video: Option<&Path>,
    ) -> Result<ExportArtifacts> {
        if session.is_empty() {
            return Err(ContamSegError::Export {
                path: dest_dir.to_path_buf(),
                reason: "session has no samples".to_string(),
            });
        }

        fs::create_dir_all(dest_dir).map_err(|e| ContamSegError::Export {
            path: dest_dir.to_path_buf(),
            reason: format!("cannot create destination: {e}"),
        })?;

        let start = format_hms(session.first_time().unwrap_or(0.0));
        let end = format_hms(session.last_time().unwrap_or(0.0));
        let base = format!("{}_{}_{}", session.stem(), start, end);

        let json_path = dest_dir.join(format!("{base}.json"));
        self.write_json(session, &json_path)?;

        let txt_path = dest_dir.join(format!("{base}.txt"));
        self.write_txt(session, &txt_path)?;

        let csv_path = dest_dir.join(format!("{base}.csv"));
        self.write_csv(tracker, &csv_path)?;

        let graph_path = dest_dir.join(format!("{base}.png"));
        self.write_graph(tracker, &graph_path)?;

        let video_path = match recorded_video {
            Some(src) => Some(self.move_video(src, dest_dir, &base)?),
            None => None,
        };

        info!("session exported to {}", dest_dir.display());
        Ok(ExportArtifacts {
            json_path,
            txt_path,
            csv_path,
            graph_path,
            video_path,
        })
    }

    /// 解析済みフレーム全件の構造化レコード
    fn write_json(&self, session: &Session, path: &Path) -> Result<()> {
        let file = File::create(path).map_err(|e| fs_error(path, "JSON 作成", e))?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, session.records()).map_err(|e| {
            ContamSegError::Export {
                path: path.to_path_buf(),
                reason: format!("JSON serialization failed: {e}"),
            }
        })
    }

    /// フレームごとの可読サマリ（区切り線で区切った 1 ブロック/フレーム）
    fn write_txt(&self, session: &Session, path: &Path) -> Result<()> {
        let file = File::create(path).map_err(|e| fs_error(path, "TXT 作成", e))?;
        let mut writer = BufWriter::new(file);

        for (i, record) in session.records().iter().enumerate() {
            if i > 0 {
                writeln!(writer, "{}", "-".repeat(40)).map_err(|e| fs_error(path, "TXT 書き込み", e))?;
            }
            let counts = record
                .patch_counts
                .iter()
                .map(|(category, count)| format!("{}: {}", category_label(category), count))
                .collect::<Vec<_>>()
                .join(", ");
            writeln!(
                writer,
                "Time: {}, Contamination Level: {:.2}%, Patch Counts: {}",
                format_hms(record.time),
                record.contamination_level * 100.0,
                counts,
            )
            .map_err(|e| fs_error(path, "TXT 書き込み", e))?;
        }
        Ok(())
    }

    /// トラッカーの保持サンプルをそのまま表形式に
    fn write_csv(&self, tracker: &TimeSeriesTracker, path: &Path) -> Result<()> {
        let file = File::create(path).map_err(|e| fs_error(path, "CSV 作成", e))?;
        let mut writer = BufWriter::new(file);

        writeln!(writer, "Time (s), Contamination Level (%), Frame Number")
            .map_err(|e| fs_error(path, "CSV 書き込み", e))?;
        for sample in tracker.iter() {
            writeln!(
                writer,
                "{:.3}, {:.2}, {}",
                sample.time,
                sample.ratio * 100.0,
                sample.frame_index,
            )
            .map_err(|e| fs_error(path, "CSV 書き込み", e))?;
        }
        Ok(())
    }

    /// 汚損率の時系列プロットのスナップショット
    fn write_graph(&self, tracker: &TimeSeriesTracker, path: &Path) -> Result<()> {
        let points: Vec<(f64, f64)> = tracker
            .iter()
            .map(|s| (s.time, s.ratio * 100.0))
            .collect();

        let (mut t0, mut t1) = match (points.first(), points.last()) {
            (Some(first), Some(last)) => (first.0, last.0),
            _ => (0.0, 1.0),
        };
        // 1 点だけでも描画できるよう軸を広げる
        if (t1 - t0).abs() < 0.5 {
            t0 -= 0.5;
            t1 += 0.5;
        }

        let root = BitMapBackend::new(path, GRAPH_SIZE).into_drawing_area();
        draw_ratio_chart(&root, &points, t0, t1).map_err(|e| ContamSegError::Export {
            path: path.to_path_buf(),
            reason: format!("graph rendering failed: {e}"),
        })
    }

    /// 録画済み動画を成果物名に揃えて移動（rename 不可ならコピー）
    fn move_video(&self, src: &Path, dest_dir: &Path, base: &str) -> Result<PathBuf> {
        let ext = src
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("mp4");
        let dest = dest_dir.join(format!("{base}.{ext}"));

        fs::rename(src, &dest)
            .or_else(|_| {
                fs::copy(src, &dest)?;
                fs::remove_file(src)?;
                Ok(())
            })
            .map_err(|e: std::io::Error| fs_error(&dest, "動画移動", e))?;
        Ok(dest)
    }
}

fn draw_ratio_chart(
    root: &DrawingArea<BitMapBackend, plotters::coord::Shift>,
    points: &[(f64, f64)],
    t0: f64,
    t1: f64,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(root)
        .margin(12)
        .x_label_area_size(24)
        .y_label_area_size(36)
        .build_cartesian_2d(t0..t1, 0.0..100.0_f64)?;

    // フォントバックエンド無しでも描けるようラベルは打たない
    chart
        .configure_mesh()
        .x_labels(0)
        .y_labels(0)
        .axis_style(&RGBColor(60, 60, 60))
        .light_line_style(&RGBColor(230, 230, 230))
        .draw()?;

    chart.draw_series(LineSeries::new(
        points.iter().copied(),
        ShapeStyle::from(&RGBColor(200, 40, 40)).stroke_width(2),
    ))?;
    chart.draw_series(
        points
            .iter()
            .map(|(x, y)| Circle::new((*x, *y), 3, RGBColor(200, 40, 40).filled())),
    )?;

    root.present()?;
    Ok(())
}

fn fs_error(path: &Path, operation: &str, source: std::io::Error) -> ContamSegError {
    ContamSegError::FileSystem {
        path: path.to_path_buf(),
        operation: operation.to_string(),
        source,
    }
}

/// 秒を HH:MM:SS（秒未満切り捨て）へ
fn format_hms(time: f64) -> String {
    let total = time.max(0.0) as u64;
    format!(
        "{:02}:{:02}:{:02}",
        total / 3600,
        (total % 3600) / 60,
        total % 60
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{CategoryHistogram, PatchGrid, CATEGORY_CLEAN, CATEGORY_RAIN_BLUR, GRID_CELLS};
    use crate::session::FrameRecord;
    use crate::tracker::Sample;
    use tempfile::TempDir;

    fn record(time: f64, frame_index: u64) -> FrameRecord {
        let mut labels = vec![CATEGORY_CLEAN; GRID_CELLS];
        labels[0] = CATEGORY_RAIN_BLUR;
        let grid = PatchGrid::from_labels(&labels).unwrap();
        let patch_counts = CategoryHistogram::from_grid(&grid);
        FrameRecord {
            time,
            contamination_level: patch_counts.contamination_ratio(),
            patch_counts,
            patch_array: grid,
            frame_index,
        }
    }

    fn populated(n: usize) -> (Session, TimeSeriesTracker) {
        let mut session = Session::new("test_clip".to_string(), false);
        let mut tracker = TimeSeriesTracker::default();
        for i in 0..n {
            let rec = record(i as f64 * 0.5, i as u64 * 2);
            tracker.append(Sample {
                time: rec.time,
                ratio: rec.contamination_level,
                frame_index: rec.frame_index,
            });
            session.push(rec);
        }
        (session, tracker)
    }

    #[test]
    fn test_export_artifact_counts() {
        let temp_dir = TempDir::new().unwrap();
        let (session, tracker) = populated(5);

        let artifacts = SessionExporter::new()
            .export(&session, &tracker, temp_dir.path(), None)
            .unwrap();

        // JSON: N 要素の配列
        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&artifacts.json_path).unwrap()).unwrap();
        assert_eq!(json.as_array().unwrap().len(), 5);

        // CSV: ヘッダ + N 行
        let csv = fs::read_to_string(&artifacts.csv_path).unwrap();
        assert_eq!(csv.lines().count(), 6);
        assert!(csv.starts_with("Time (s), Contamination Level (%), Frame Number"));

        // TXT: N ブロック（区切り線は N-1 本）
        let txt = fs::read_to_string(&artifacts.txt_path).unwrap();
        let blocks: Vec<_> = txt
            .split(&"-".repeat(40))
            .filter(|b| !b.trim().is_empty())
            .collect();
        assert_eq!(blocks.len(), 5);
        assert!(blocks[0].contains("Contamination Level: 0.39%"));
        assert!(blocks[0].contains("rain_blur: 1"));

        // グラフ PNG が生成されている
        assert!(artifacts.graph_path.exists());
        assert!(fs::metadata(&artifacts.graph_path).unwrap().len() > 0);
        assert!(artifacts.video_path.is_none());
    }

    #[test]
    fn test_artifact_names_carry_time_range() {
        let temp_dir = TempDir::new().unwrap();
        let (session, tracker) = populated(3);

        let artifacts = SessionExporter::new()
            .export(&session, &tracker, temp_dir.path(), None)
            .unwrap();

        let name = artifacts.json_path.file_name().unwrap().to_str().unwrap();
        // 0.0s〜1.0s → 00:00:00 と 00:00:01
        assert_eq!(name, "test_clip_00:00:00_00:00:01.json");
    }

    #[test]
    fn test_empty_session_fails_without_artifacts() {
        let temp_dir = TempDir::new().unwrap();
        let session = Session::new("empty".to_string(), false);
        let tracker = TimeSeriesTracker::default();

        let err = SessionExporter::new()
            .export(&session, &tracker, temp_dir.path(), None)
            .unwrap_err();
        assert!(matches!(err, ContamSegError::Export { .. }));

        // データファイルは一切作られない
        assert_eq!(fs::read_dir(temp_dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_live_recording_moved_into_export_dir() {
        let temp_dir = TempDir::new().unwrap();
        let raw = temp_dir.path().join("raw_recording.mp4");
        fs::write(&raw, b"fake mp4 payload").unwrap();

        let mut session = Session::new("camera0".to_string(), true);
        let mut tracker = TimeSeriesTracker::default();
        let rec = record(0.0, 0);
        tracker.append(Sample {
            time: 0.0,
            ratio: rec.contamination_level,
            frame_index: 0,
        });
        session.push(rec);

        let out_dir = temp_dir.path().join("export");
        let artifacts = SessionExporter::new()
            .export(&session, &tracker, &out_dir, Some(&raw))
            .unwrap();

        let video = artifacts.video_path.unwrap();
        assert!(video.exists());
        assert!(!raw.exists());
        // ライブセッションは固定 stem
        assert!(video
            .file_name()
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("live_capture_"));
    }

    #[test]
    fn test_format_hms_truncates_to_whole_seconds() {
        assert_eq!(format_hms(0.0), "00:00:00");
        assert_eq!(format_hms(59.99), "00:00:59");
        assert_eq!(format_hms(3661.5), "01:01:01");
    }
}
