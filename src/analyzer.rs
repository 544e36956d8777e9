use std::collections::BTreeMap;

use image::{imageops, imageops::FilterType, Rgb, RgbImage};

use crate::errors::Result;
use crate::grid::{
    Category, CategoryHistogram, PatchGrid, CATEGORY_RAIN_BLOCK, CATEGORY_RAIN_BLUR, GRID_DIM,
};
use crate::traits::PatchClassifier;

/// カテゴリごとのオーバーレイ描画スタイル
///
/// alpha はカテゴリ固有の固定値。blur 系は薄く、block 系は濃く重ねる。
#[derive(Debug, Clone, Copy)]
pub struct CategoryStyle {
    pub color: Rgb<u8>,
    pub alpha: f32,
}

/// 既定のカテゴリ別カラーマップ
///
/// スタイル未設定のカテゴリはオーバーレイに描画しない。
pub fn default_palette() -> BTreeMap<Category, CategoryStyle> {
    BTreeMap::from([
        (
            CATEGORY_RAIN_BLUR,
            CategoryStyle {
                color: Rgb([0, 98, 180]),
                alpha: 0.5,
            },
        ),
        (
            CATEGORY_RAIN_BLOCK,
            CategoryStyle {
                color: Rgb([0, 44, 95]),
                alpha: 0.7,
            },
        ),
    ])
}

/// 1 フレーム分の解析結果
#[derive(Debug, Clone)]
pub struct AnalysisResult {
    pub overlay: RgbImage,
    pub histogram: CategoryHistogram,
    pub ratio: f64,
    pub grid: PatchGrid,
}

/// フレーム解析器
///
/// 入力フレームをモデル入力解像度へリサイズして PatchClassifier に渡し、
/// カテゴリ別パッチ数・汚損率・オーバーレイ画像を生成する。
pub struct FrameAnalyzer<C: PatchClassifier> {
    classifier: C,
    palette: BTreeMap<Category, CategoryStyle>,
}

impl<C: PatchClassifier> FrameAnalyzer<C> {
    pub fn new(classifier: C) -> Self {
        Self {
            classifier,
            palette: default_palette(),
        }
    }

    pub fn with_palette(mut self, palette: BTreeMap<Category, CategoryStyle>) -> Self {
        self.palette = palette;
        self
    }

    pub fn classifier(&self) -> &C {
        &self.classifier
    }

    /// フレームを分類してオーバーレイと統計を生成
    ///
    /// 分類は失敗し得る（フレーム単位の Classifier エラー）。その場合
    /// 呼び出し側は当該フレームの表示・プロット更新をスキップする。
    pub fn analyze(&self, frame: &RgbImage) -> Result<AnalysisResult> {
        let size = self.classifier.input_size();
        let resized = imageops::resize(frame, size, size, FilterType::Lanczos3);

        let grid = self.classifier.classify(&resized)?;
        let histogram = CategoryHistogram::from_grid(&grid);
        let ratio = histogram.contamination_ratio();
        let overlay = self.render_overlay(frame, &grid);

        Ok(AnalysisResult {
            overlay,
            histogram,
            ratio,
            grid,
        })
    }

    /// グリッドを元解像度のセル矩形へ写像してアルファ合成
    ///
    /// patch_h = height / 16, patch_w = width / 16 の整数除算。右端・下端の
    /// 端数ピクセルはどのセルにも属さず、元画像のまま残る。
    fn render_overlay(&self, frame: &RgbImage, grid: &PatchGrid) -> RgbImage {
        let mut overlay = frame.clone();
        let patch_h = frame.height() / GRID_DIM as u32;
        let patch_w = frame.width() / GRID_DIM as u32;
        if patch_h == 0 || patch_w == 0 {
            return overlay;
        }

        for (row, col, category) in grid.cells() {
            let Some(style) = self.palette.get(&category) else {
                continue;
            };

            let y_start = row as u32 * patch_h;
            let x_start = col as u32 * patch_w;
            for y in y_start..y_start + patch_h {
                for x in x_start..x_start + patch_w {
                    let pixel = overlay.get_pixel_mut(x, y);
                    *pixel = blend(*pixel, style.color, style.alpha);
                }
            }
        }

        overlay
    }
}

fn blend(base: Rgb<u8>, color: Rgb<u8>, alpha: f32) -> Rgb<u8> {
    let mut out = [0u8; 3];
    for ch in 0..3 {
        let mixed = alpha * f32::from(color[ch]) + (1.0 - alpha) * f32::from(base[ch]);
        out[ch] = mixed.round().clamp(0.0, 255.0) as u8;
    }
    Rgb(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{CATEGORY_CLEAN, GRID_CELLS};
    use crate::mocks::MockPatchClassifier;

    fn single_cell_grid(row: usize, col: usize, category: Category) -> PatchGrid {
        let mut labels = vec![CATEGORY_CLEAN; GRID_CELLS];
        labels[row * GRID_DIM + col] = category;
        PatchGrid::from_labels(&labels).unwrap()
    }

    #[test]
    fn test_single_contaminated_cell_on_512px_source() {
        // 512px 入力・セル (0,0) のみカテゴリ 1 → パッチは 32x32
        let classifier =
            MockPatchClassifier::new(512, single_cell_grid(0, 0, CATEGORY_RAIN_BLUR));
        let analyzer = FrameAnalyzer::new(classifier);

        let frame = RgbImage::from_pixel(512, 512, Rgb([200, 200, 200]));
        let result = analyzer.analyze(&frame).unwrap();

        assert_eq!(result.histogram.count(CATEGORY_CLEAN), 255);
        assert_eq!(result.histogram.count(CATEGORY_RAIN_BLUR), 1);
        assert!((result.ratio - 1.0 / 256.0).abs() < 1e-9);

        // 差分は [0:32, 0:32] の矩形内に限られる
        for (x, y, pixel) in result.overlay.enumerate_pixels() {
            let original = frame.get_pixel(x, y);
            if x < 32 && y < 32 {
                assert_ne!(pixel, original, "pixel ({}, {}) should be blended", x, y);
            } else {
                assert_eq!(pixel, original, "pixel ({}, {}) should be untouched", x, y);
            }
        }
    }

    #[test]
    fn test_remainder_pixels_left_unmodified() {
        // 100px → パッチ 6px、16*6=96。右端・下端の 4px は端数として残る
        let classifier =
            MockPatchClassifier::new(512, PatchGrid::uniform(CATEGORY_RAIN_BLOCK));
        let analyzer = FrameAnalyzer::new(classifier);

        let frame = RgbImage::from_pixel(100, 100, Rgb([10, 10, 10]));
        let result = analyzer.analyze(&frame).unwrap();

        for (x, y, pixel) in result.overlay.enumerate_pixels() {
            let original = frame.get_pixel(x, y);
            if x >= 96 || y >= 96 {
                assert_eq!(pixel, original);
            } else {
                assert_ne!(pixel, original);
            }
        }
    }

    #[test]
    fn test_unstyled_categories_not_drawn() {
        // dust にはスタイルが無いのでオーバーレイは元画像と一致する
        let classifier =
            MockPatchClassifier::new(512, PatchGrid::uniform(crate::grid::CATEGORY_DUST));
        let analyzer = FrameAnalyzer::new(classifier);

        let frame = RgbImage::from_pixel(64, 64, Rgb([33, 66, 99]));
        let result = analyzer.analyze(&frame).unwrap();

        assert_eq!(result.overlay, frame);
        assert_eq!(result.ratio, 1.0);
    }

    #[test]
    fn test_blend_math() {
        let base = Rgb([100, 100, 100]);
        let color = Rgb([0, 98, 180]);
        let mixed = blend(base, color, 0.5);
        assert_eq!(mixed, Rgb([50, 99, 140]));
    }

    #[test]
    fn test_classifier_failure_propagates_as_frame_error() {
        let classifier = MockPatchClassifier::failing(512);
        let analyzer = FrameAnalyzer::new(classifier);

        let frame = RgbImage::from_pixel(32, 32, Rgb([0, 0, 0]));
        let err = analyzer.analyze(&frame).unwrap_err();
        assert!(err.is_frame_local());
    }
}
