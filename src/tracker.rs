use std::collections::VecDeque;

/// ライブプロットが保持するサンプル数の上限
pub const RETENTION_LIMIT: usize = 1000;

/// プロット用の 1 サンプル
///
/// time は再生位置（秒）。追記は再生順なので時刻は単調増加する。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub time: f64,
    pub ratio: f64,
    pub frame_index: u64,
}

/// 汚損率の移動時系列
///
/// プロット表示とクリックシークのための直近ウィンドウ。上限を超えたら
/// 先頭（最古）から FIFO で捨てる。エクスポート用の完全ログは Session 側が
/// 独立に保持するので、ここの欠落はエクスポートに影響しない。
#[derive(Debug, Clone)]
pub struct TimeSeriesTracker {
    samples: VecDeque<Sample>,
    capacity: usize,
}

impl Default for TimeSeriesTracker {
    fn default() -> Self {
        Self::new(RETENTION_LIMIT)
    }
}

impl TimeSeriesTracker {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity.min(RETENTION_LIMIT)),
            capacity,
        }
    }

    /// サンプルを追記して現在の汚損率を返す
    ///
    /// 呼び出し側（PlaybackController）が逐次再生で駆動するため
    /// 時刻の単調性はここでは検査しない。
    pub fn append(&mut self, sample: Sample) -> f64 {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
        sample.ratio
    }

    /// ソース切り替え・先頭巻き戻し時に全サンプルを破棄
    pub fn reset(&mut self) {
        self.samples.clear();
    }

    /// クリックシーク用: 指定時刻に最も近いサンプル
    ///
    /// 時刻は単調なので二分探索。距離が同じ場合は先に追記された方を返す。
    pub fn nearest(&self, time: f64) -> Option<Sample> {
        if self.samples.is_empty() {
            return None;
        }

        let idx = self.samples.partition_point(|s| s.time < time);
        let after = self.samples.get(idx);
        let before = idx.checked_sub(1).and_then(|i| self.samples.get(i));

        match (before, after) {
            (Some(b), Some(a)) => {
                // 同距離なら earlier（before）を選ぶ
                if (time - b.time).abs() <= (a.time - time).abs() {
                    Some(*b)
                } else {
                    Some(*a)
                }
            }
            (Some(b), None) => Some(*b),
            (None, Some(a)) => Some(*a),
            (None, None) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }

    pub fn first(&self) -> Option<&Sample> {
        self.samples.front()
    }

    pub fn last(&self) -> Option<&Sample> {
        self.samples.back()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(time: f64, frame_index: u64) -> Sample {
        Sample {
            time,
            ratio: 0.5,
            frame_index,
        }
    }

    #[test]
    fn test_retention_limit_enforced_fifo() {
        let mut tracker = TimeSeriesTracker::default();
        for i in 0..1500u64 {
            tracker.append(sample(i as f64, i));
        }

        // 上限 1000、最古から捨てられる
        assert_eq!(tracker.len(), RETENTION_LIMIT);
        assert_eq!(tracker.first().unwrap().frame_index, 500);
        assert_eq!(tracker.last().unwrap().frame_index, 1499);
    }

    #[test]
    fn test_append_returns_current_ratio() {
        let mut tracker = TimeSeriesTracker::default();
        let ratio = tracker.append(Sample {
            time: 0.0,
            ratio: 0.25,
            frame_index: 0,
        });
        assert_eq!(ratio, 0.25);
    }

    #[test]
    fn test_nearest_binary_search() {
        let mut tracker = TimeSeriesTracker::default();
        for i in 0..10u64 {
            tracker.append(sample(i as f64, i));
        }

        assert_eq!(tracker.nearest(3.2).unwrap().frame_index, 3);
        assert_eq!(tracker.nearest(3.8).unwrap().frame_index, 4);
        // 範囲外は端のサンプル
        assert_eq!(tracker.nearest(-5.0).unwrap().frame_index, 0);
        assert_eq!(tracker.nearest(100.0).unwrap().frame_index, 9);
    }

    #[test]
    fn test_nearest_tie_resolves_to_earlier_sample() {
        let mut tracker = TimeSeriesTracker::default();
        tracker.append(sample(1.0, 1));
        tracker.append(sample(3.0, 3));

        // 2.0 は両方から距離 1.0 → 先に追記された方
        assert_eq!(tracker.nearest(2.0).unwrap().frame_index, 1);
    }

    #[test]
    fn test_nearest_on_empty_tracker() {
        let tracker = TimeSeriesTracker::default();
        assert!(tracker.nearest(1.0).is_none());
    }

    #[test]
    fn test_reset_clears_all_samples() {
        let mut tracker = TimeSeriesTracker::default();
        tracker.append(sample(0.0, 0));
        tracker.append(sample(1.0, 1));

        tracker.reset();
        assert!(tracker.is_empty());
    }
}
