use std::path::Path;

use image::{imageops, imageops::FilterType, RgbImage};
use ndarray::prelude::*;
use nshare::AsNdarray3;
use ort::value::TensorRef;
use ort::{
    execution_providers::{CUDAExecutionProvider, TensorRTExecutionProvider},
    session::{builder::SessionBuilder, Session},
};
use parking_lot::Mutex;

use crate::errors::{ContamSegError, Result};
use crate::grid::{Category, PatchGrid, GRID_DIM};
use crate::traits::PatchClassifier;

/// ONNX 形式の学習済みパッチ分類モデル
///
/// モデル内部は完全にブラックボックス。入力は正方形のカラー画像、
/// 出力は [1, クラス数, 16, 16] のロジットで、クラス軸の argmax を
/// カテゴリグリッドとして扱う。
pub struct OnnxPatchClassifier {
    input_size: u32,
    input_name: String,
    output_name: String,
    session: Mutex<Session>,
}

impl OnnxPatchClassifier {
    pub fn new(model_path: &Path, device_id: i32) -> Result<Self> {
        let mut session = SessionBuilder::new()
            .map_err(|e| ContamSegError::Classifier {
                operation: "セッションビルダー初期化".to_string(),
                source: Box::new(e),
            })?
            .with_execution_providers([
                TensorRTExecutionProvider::default()
                    .with_device_id(device_id)
                    .build(),
                CUDAExecutionProvider::default()
                    .with_device_id(device_id)
                    .build(),
            ])
            .map_err(|e| ContamSegError::Classifier {
                operation: "実行プロバイダー設定".to_string(),
                source: Box::new(e),
            })?
            .with_memory_pattern(true)
            .map_err(|e| ContamSegError::Classifier {
                operation: "メモリパターン設定".to_string(),
                source: Box::new(e),
            })?
            .commit_from_file(model_path)
            .map_err(|e| ContamSegError::Classifier {
                operation: format!("モデルファイル読み込み: {}", model_path.display()),
                source: Box::new(e),
            })?;

        let input_name = session.inputs[0].name.clone();
        let output_name = session.outputs[0].name.clone();
        let input_size =
            session.inputs[0]
                .input_type
                .tensor_shape()
                .ok_or_else(|| ContamSegError::Classifier {
                    operation: "モデル入力形状取得".to_string(),
                    source: Box::new(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        "テンソル形状が取得できません",
                    )),
                })?[2] as u32;

        // initialize model
        let data = Array4::<f32>::zeros((1, 3, input_size as usize, input_size as usize));
        session
            .run(ort::inputs![input_name.as_str() => TensorRef::from_array_view(&data)
                .map_err(|e| ContamSegError::Classifier {
                    operation: "初期化テンソル作成".to_string(),
                    source: Box::new(e),
                })?])
            .map_err(|e| ContamSegError::Classifier {
                operation: "モデル初期化実行".to_string(),
                source: Box::new(e),
            })?;

        Ok(Self {
            input_size,
            input_name,
            output_name,
            session: Mutex::new(session),
        })
    }

    fn predict(&self, tensor: ArrayView4<f32>) -> Result<Array4<f32>> {
        let mut binding = self.session.lock();
        let outputs = binding.run(
            ort::inputs![self.input_name.as_str() => TensorRef::from_array_view(&tensor.as_standard_layout())?],
        )?;
        Ok(outputs[self.output_name.as_str()]
            .try_extract_array::<f32>()?
            .into_dimensionality::<Ix4>()?
            .to_owned())
    }

    /// 画像を [1, 3, H, W] の f32 テンソルへ
    ///
    /// モデルは BGR 順のフレームで学習されているため、チャネルを反転して渡す。
    fn preprocess(&self, image: &RgbImage) -> Array4<f32> {
        let image = if image.dimensions() == (self.input_size, self.input_size) {
            image.clone()
        } else {
            imageops::resize(
                image,
                self.input_size,
                self.input_size,
                FilterType::Lanczos3,
            )
        };

        image
            .as_ndarray3()
            .slice_move(s![NewAxis, ..;-1, .., ..])
            .map(|v| f32::from(*v) / 255.0)
    }
}

impl PatchClassifier for OnnxPatchClassifier {
    fn classify(&self, img: &RgbImage) -> Result<PatchGrid> {
        let tensor = self.preprocess(img);
        let logits = self.predict(tensor.view())?;
        argmax_to_grid(&logits)
    }

    fn input_size(&self) -> u32 {
        self.input_size
    }
}

/// クラス軸の argmax で 16x16 グリッドへ
///
/// 空間形状が 16x16 でない出力はフレーム単位の Classifier エラー。
fn argmax_to_grid(logits: &Array4<f32>) -> Result<PatchGrid> {
    let shape = logits.shape();
    if shape[0] != 1 || shape[2] != GRID_DIM || shape[3] != GRID_DIM {
        return Err(ContamSegError::Classifier {
            operation: "モデル出力形状検証".to_string(),
            source: Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!(
                    "expected [1, C, {GRID_DIM}, {GRID_DIM}] logits, got {:?}",
                    shape
                ),
            )),
        });
    }

    let mut labels = Vec::with_capacity(GRID_DIM * GRID_DIM);
    for row in 0..GRID_DIM {
        for col in 0..GRID_DIM {
            let mut best = 0usize;
            let mut best_score = f32::NEG_INFINITY;
            for class in 0..shape[1] {
                let score = logits[[0, class, row, col]];
                if score > best_score {
                    best_score = score;
                    best = class;
                }
            }
            labels.push(best as Category);
        }
    }
    PatchGrid::from_labels(&labels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{CATEGORY_CLEAN, CATEGORY_RAIN_BLOCK};

    #[test]
    fn test_argmax_selects_highest_logit_per_cell() {
        // 3 クラス。セル (0, 1) のみクラス 2 が最大
        let mut logits = Array4::<f32>::zeros((1, 3, GRID_DIM, GRID_DIM));
        logits.slice_mut(s![0, 0, .., ..]).fill(1.0);
        logits[[0, 2, 0, 1]] = 5.0;

        let grid = argmax_to_grid(&logits).unwrap();
        assert_eq!(grid.get(0, 1), CATEGORY_RAIN_BLOCK);
        assert_eq!(grid.get(0, 0), CATEGORY_CLEAN);
        assert_eq!(grid.get(15, 15), CATEGORY_CLEAN);
    }

    #[test]
    fn test_non_grid_output_shape_rejected() {
        // 16x16 以外の空間形状はフレーム単位のエラー
        let logits = Array4::<f32>::zeros((1, 3, 32, 32));
        let err = argmax_to_grid(&logits).unwrap_err();
        assert!(err.is_frame_local());
    }
}
