use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::errors::{ContamSegError, Result};

/// パッチグリッドの一辺のセル数（モデル出力は常に 16x16）
pub const GRID_DIM: usize = 16;
/// グリッドの総セル数
pub const GRID_CELLS: usize = GRID_DIM * GRID_DIM;

/// パッチカテゴリのラベル値
pub type Category = u8;

/// 汚損なし
pub const CATEGORY_CLEAN: Category = 0;
/// 雨滴によるぼやけ
pub const CATEGORY_RAIN_BLUR: Category = 1;
/// 雨滴による遮蔽
pub const CATEGORY_RAIN_BLOCK: Category = 2;
/// 粉塵
pub const CATEGORY_DUST: Category = 3;
/// 雪
pub const CATEGORY_SNOW: Category = 4;

/// カテゴリの表示ラベル（TXT エクスポートと結果テーブルで使用）
pub const fn category_label(category: Category) -> &'static str {
    match category {
        CATEGORY_CLEAN => "clean",
        CATEGORY_RAIN_BLUR => "rain_blur",
        CATEGORY_RAIN_BLOCK => "rain_block",
        CATEGORY_DUST => "dust",
        CATEGORY_SNOW => "snow",
        _ => "unknown",
    }
}

/// 16x16 のカテゴリラベル配列
///
/// PatchClassifier が 1 フレームにつき 1 回生成する。生成後は不変。
/// 入力画像の解像度に関係なく常に 256 セル。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatchGrid {
    rows: [[Category; GRID_DIM]; GRID_DIM],
}

impl PatchGrid {
    /// 全セルが同一カテゴリのグリッドを生成
    pub const fn uniform(category: Category) -> Self {
        Self {
            rows: [[category; GRID_DIM]; GRID_DIM],
        }
    }

    /// 行優先のフラットなラベル列からグリッドを構築
    ///
    /// 256 要素以外は Classifier エラー（モデル出力の形状不一致として扱う）。
    pub fn from_labels(labels: &[Category]) -> Result<Self> {
        if labels.len() != GRID_CELLS {
            return Err(ContamSegError::Classifier {
                operation: "patch grid construction".to_string(),
                source: Box::new(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("expected {} cells, got {}", GRID_CELLS, labels.len()),
                )),
            });
        }

        let mut rows = [[CATEGORY_CLEAN; GRID_DIM]; GRID_DIM];
        for (i, label) in labels.iter().enumerate() {
            rows[i / GRID_DIM][i % GRID_DIM] = *label;
        }
        Ok(Self { rows })
    }

    pub const fn get(&self, row: usize, col: usize) -> Category {
        self.rows[row][col]
    }

    /// (row, col, category) を行優先で列挙
    pub fn cells(&self) -> impl Iterator<Item = (usize, usize, Category)> + '_ {
        self.rows.iter().enumerate().flat_map(|(i, row)| {
            row.iter()
                .enumerate()
                .map(move |(j, category)| (i, j, *category))
        })
    }
}

/// カテゴリごとのパッチ数
///
/// 1 フレームごとに 256 セルの全走査で再計算される派生データ。
/// 汚損率はここから常に計算し直し、独立にキャッシュしない。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CategoryHistogram {
    counts: BTreeMap<Category, u32>,
}

impl CategoryHistogram {
    pub fn from_grid(grid: &PatchGrid) -> Self {
        let mut counts = BTreeMap::new();
        for (_, _, category) in grid.cells() {
            *counts.entry(category).or_insert(0) += 1;
        }
        Self { counts }
    }

    pub fn count(&self, category: Category) -> u32 {
        self.counts.get(&category).copied().unwrap_or(0)
    }

    /// 総パッチ数（常に 256）
    pub fn total(&self) -> u32 {
        self.counts.values().sum()
    }

    /// 非 clean のパッチ数
    pub fn contaminated(&self) -> u32 {
        self.counts
            .iter()
            .filter(|(category, _)| **category != CATEGORY_CLEAN)
            .map(|(_, count)| count)
            .sum()
    }

    /// 汚損率 = 非 clean セル数 / 256、常に [0, 1]
    pub fn contamination_ratio(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        f64::from(self.contaminated()) / f64::from(total)
    }

    /// (category, count) を昇順で列挙
    pub fn iter(&self) -> impl Iterator<Item = (Category, u32)> + '_ {
        self.counts.iter().map(|(category, count)| (*category, *count))
    }
}
