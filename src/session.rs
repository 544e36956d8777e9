use serde::Serialize;

use crate::grid::{CategoryHistogram, PatchGrid};

/// 再生状態。常にちょうど 1 つ
///
/// Idle: ソース選択直後で未読。Playing: tick 駆動の前進ループが有効。
/// Paused: ユーザ操作で停止（位置は保持）。Finished: 有限ソースの終端。
/// ライブソースは Finished に到達しない。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Playing,
    Paused,
    Finished,
}

/// 解析済みフレーム 1 件の完全な記録
///
/// JSON エクスポートの 1 要素にそのまま対応する。frame_index は
/// CSV 側で使うためシリアライズ対象から外している。
#[derive(Debug, Clone, Serialize)]
pub struct FrameRecord {
    pub time: f64,
    pub contamination_level: f64,
    pub patch_counts: CategoryHistogram,
    pub patch_array: PatchGrid,
    #[serde(skip_serializing)]
    pub frame_index: u64,
}

/// 1 ソースぶんの解析ログ
///
/// ソースの（再）選択からの全 FrameRecord を順序どおり保持する。
/// TimeSeriesTracker の保持ウィンドウとは独立で、エクスポートは
/// こちらの完全ログを使う。アクティブな PlaybackController が
/// 排他的に所有し、ソース切り替えで破棄・再生成される。
#[derive(Debug, Clone, Default)]
pub struct Session {
    stem: String,
    live: bool,
    records: Vec<FrameRecord>,
}

impl Session {
    pub fn new(stem: String, live: bool) -> Self {
        Self {
            stem,
            live,
            records: Vec::new(),
        }
    }

    /// エクスポートのファイル名 stem（ライブは固定で "live_capture"）
    pub fn stem(&self) -> &str {
        if self.live {
            "live_capture"
        } else {
            &self.stem
        }
    }

    pub const fn is_live(&self) -> bool {
        self.live
    }

    pub fn push(&mut self, record: FrameRecord) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[FrameRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn first_time(&self) -> Option<f64> {
        self.records.first().map(|r| r.time)
    }

    pub fn last_time(&self) -> Option<f64> {
        self.records.last().map(|r| r.time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{CategoryHistogram, PatchGrid, CATEGORY_CLEAN};

    fn record(time: f64, frame_index: u64) -> FrameRecord {
        let grid = PatchGrid::uniform(CATEGORY_CLEAN);
        FrameRecord {
            time,
            contamination_level: 0.0,
            patch_counts: CategoryHistogram::from_grid(&grid),
            patch_array: grid,
            frame_index,
        }
    }

    #[test]
    fn test_live_session_uses_fixed_stem() {
        let session = Session::new("camera0".to_string(), true);
        assert_eq!(session.stem(), "live_capture");

        let file_session = Session::new("dashcam_clip".to_string(), false);
        assert_eq!(file_session.stem(), "dashcam_clip");
    }

    #[test]
    fn test_records_keep_append_order() {
        let mut session = Session::new("clip".to_string(), false);
        session.push(record(0.0, 0));
        session.push(record(0.5, 2));
        session.push(record(1.0, 4));

        assert_eq!(session.len(), 3);
        assert_eq!(session.first_time(), Some(0.0));
        assert_eq!(session.last_time(), Some(1.0));
    }

    #[test]
    fn test_frame_record_json_shape() {
        // JSON には time / contamination_level / patch_counts / patch_array のみ
        let json = serde_json::to_value(record(1.5, 3)).unwrap();
        let obj = json.as_object().unwrap();
        assert_eq!(obj.len(), 4);
        assert!(obj.contains_key("time"));
        assert!(obj.contains_key("contamination_level"));
        assert!(obj.contains_key("patch_counts"));
        assert!(obj.contains_key("patch_array"));
    }
}
