use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Clone)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// 入力（動画ファイル・静止画・静止画ディレクトリ）
    ///
    /// 省略時は --device のライブキャプチャを開く。
    pub input: Option<PathBuf>,

    #[arg(default_value = "output")]
    pub output_dir: PathBuf,

    #[arg(short, long)]
    pub model_path: PathBuf,

    /// ライブキャプチャのデバイス番号（input 省略時に使用）
    #[arg(long, default_value_t = 0)]
    pub device: i32,

    #[arg(short, long, default_value_t = 0)]
    pub device_id: i32,

    /// 有限ソースで解析するフレーム間隔
    #[arg(short, long, default_value_t = 2, value_parser = check_stride)]
    pub stride: u64,

    /// ソースが FPS を報告しないときの表示レート
    #[arg(long, default_value_t = 30.0, value_parser = check_fps)]
    pub fallback_fps: f64,

    /// ライブプロットが保持するサンプル数
    #[arg(long, default_value_t = 1000)]
    pub retention: usize,

    /// ディレクトリ入力を時系列でなく独立画像として一括解析する
    #[arg(short, long, default_value_t = false)]
    pub batch: bool,

    /// ライブキャプチャを MP4 に録画する
    #[arg(long, default_value_t = false)]
    pub record: bool,

    /// ライブキャプチャの収録時間（秒）
    #[arg(long)]
    pub duration_secs: Option<u64>,
}

impl Config {
    /// ライブソースの既定ティック周期
    pub fn fallback_tick_period(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(1.0 / self.fallback_fps)
    }
}

fn check_stride(s: &str) -> Result<u64, String> {
    let stride: u64 = s.parse().map_err(|e| format!("{e}"))?;
    if stride == 0 {
        return Err("stride must be at least 1".to_string());
    }
    Ok(stride)
}

fn check_fps(s: &str) -> Result<f64, String> {
    let fps: f64 = s.parse().map_err(|e| format!("{e}"))?;
    if !fps.is_finite() || fps <= 0.0 {
        return Err("fps must be a positive number".to_string());
    }
    Ok(fps)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_stride_rejected() {
        assert!(check_stride("0").is_err());
        assert_eq!(check_stride("2"), Ok(2));
    }

    #[test]
    fn test_fps_must_be_positive_and_finite() {
        assert!(check_fps("0").is_err());
        assert!(check_fps("-5").is_err());
        assert!(check_fps("inf").is_err());
        assert_eq!(check_fps("29.97"), Ok(29.97));
    }
}
