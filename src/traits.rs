use std::path::Path;

use image::RgbImage;

use crate::errors::Result;
use crate::grid::PatchGrid;

/// パッチ分類モデルの抽象化
///
/// 依存関係逆転原則（DIP）に従い、具象クラスではなく抽象に依存する。
/// モデル本体（学習済みのセグメンテーションネットワーク）は完全に
/// ブラックボックスとして扱い、テストでは決定的なグリッドを返す
/// モックに差し替える。
pub trait PatchClassifier: Send + Sync {
    /// 1 フレームを 16x16 のカテゴリグリッドへ分類
    ///
    /// 失敗はフレーム単位の Classifier エラーであり、セッションは継続する。
    fn classify(&self, img: &RgbImage) -> Result<PatchGrid>;

    /// モデルの入力画像サイズ（正方形の一辺）を取得
    fn input_size(&self) -> u32;
}

/// フレーム供給源の抽象化
///
/// 有限の動画ファイル・静止画・ライブキャプチャデバイスを同じ
/// インタフェースで扱う。read は「(成功, フレーム)」の逐次読みに相当し、
/// 有限ソースのみフレーム番号でのシークに対応する。
pub trait FrameSource {
    /// 次のフレームを読む。有限ソースの終端では Ok(None)
    fn read_frame(&mut self) -> Result<Option<RgbImage>>;

    /// 指定フレーム番号へシーク（有限ソースのみ）
    fn seek(&mut self, frame_index: u64) -> Result<()>;

    /// ソースのフレームレート。不明なら None（呼び出し側が既定値を使う）
    fn fps(&self) -> Option<f64>;

    /// 総フレーム数。ライブソースでは None
    fn frame_count(&self) -> Option<u64>;

    /// 終端のないライブキャプチャかどうか
    fn is_live(&self) -> bool;

    /// エクスポートのファイル名 stem に使うソース名
    fn name(&self) -> String;
}

/// フレーム書き出し先の抽象化
///
/// RecordingSink の消費スレッドが所有する。finish まで呼んで初めて
/// ファイルとして完結する。
pub trait FrameSink: Send {
    /// 1 フレームを書き込む（提出順で呼ばれる）
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()>;

    /// 残りを書き切ってファイルを閉じる
    fn finish(&mut self) -> Result<()>;

    /// 完成した成果物のパス
    fn path(&self) -> &Path;
}
