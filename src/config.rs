use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;

use clap::{Parser, Subcommand};
use directories::ProjectDirs;

use crate::cli::*;

static DATA_DIR: LazyLock<DataDir> = LazyLock::new(|| {
    let proj_dirs = ProjectDirs::from("", "rollcall", "rollcall").expect("failed to get project dir");
    DataDir { path: proj_dirs.data_dir().to_path_buf() }
});

fn default_data_dir() -> &'static str {
    DATA_DIR.path().to_str().unwrap()
}

#[derive(Parser, Debug, Clone)]
pub struct FaceOptions {
    /// YuNet 人脸检测模型路径
    #[arg(
        long,
        value_name = "FILE",
        env = "ROLLCALL_DETECTOR_MODEL",
        default_value = "models/face_detection_yunet_2023mar.onnx"
    )]
    pub detector_model: PathBuf,
    /// SFace 人脸特征模型路径
    #[arg(
        long,
        value_name = "FILE",
        env = "ROLLCALL_RECOGNIZER_MODEL",
        default_value = "models/face_recognition_sface_2021dec.onnx"
    )]
    pub recognizer_model: PathBuf,
    /// 人脸检测置信度阈值
    #[arg(long, value_name = "SCORE", env = "ROLLCALL_SCORE_THRESHOLD", default_value_t = 0.9)]
    pub score_threshold: f32,
    /// 人脸检测 NMS 阈值
    #[arg(long, value_name = "IOU", default_value_t = 0.3)]
    pub nms_threshold: f32,
    /// 两个人脸特征被视为同一人的最大欧氏距离
    #[arg(long, value_name = "DISTANCE", env = "ROLLCALL_TOLERANCE", default_value_t = 1.128)]
    pub tolerance: f32,
}

#[derive(Parser, Debug, Clone)]
pub struct CameraOptions {
    /// 摄像头设备编号
    #[arg(long, value_name = "INDEX", env = "ROLLCALL_CAMERA", default_value_t = 0)]
    pub camera_index: i32,
    /// 画面推送间隔，单位为毫秒
    #[arg(long, value_name = "MS", default_value_t = 100)]
    pub frame_interval: u64,
    /// 人脸识别间隔，单位为毫秒
    #[arg(long, value_name = "MS", default_value_t = 333)]
    pub recognition_interval: u64,
    /// 推送画面的 JPEG 质量
    #[arg(long, value_name = "QUALITY", default_value_t = 80, value_parser = clap::value_parser!(i32).range(1..=100))]
    pub jpeg_quality: i32,
    /// 后台循环连续失败多少次后进入降级状态
    #[arg(long, value_name = "N", default_value_t = 30)]
    pub max_failures: u32,
    /// 停止后台循环时的最长等待时间，单位为毫秒
    #[arg(long, value_name = "MS", default_value_t = 5000)]
    pub stop_timeout: u64,
}

impl CameraOptions {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval)
    }

    pub fn recognition_interval(&self) -> Duration {
        Duration::from_millis(self.recognition_interval)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout)
    }
}

impl Default for CameraOptions {
    fn default() -> Self {
        Self {
            camera_index: 0,
            frame_interval: 100,
            recognition_interval: 333,
            jpeg_quality: 80,
            max_failures: 30,
            stop_timeout: 5000,
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(name = "rollcall", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    /// 数据目录，保存数据库、人脸图库和上传的文件
    #[arg(short, long, env = "ROLLCALL_DATA_DIR", default_value = default_data_dir())]
    pub data_dir: DataDir,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 启动 HTTP 与 WebSocket 服务
    Server(ServerCommand),
    /// 加载人脸图库，列出已录入和未录入的学生
    Gallery(GalleryCommand),
}

#[derive(Debug, Clone)]
pub struct DataDir {
    path: PathBuf,
}

impl DataDir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// 返回数据库文件的路径
    pub fn database(&self) -> PathBuf {
        self.path.join("rollcall.db")
    }

    /// 返回人脸图库目录
    pub fn gallery(&self) -> PathBuf {
        self.path.join("gallery")
    }

    /// 返回上传文件目录
    pub fn uploads(&self) -> PathBuf {
        self.path.join("uploads")
    }

    /// 创建所有需要的目录
    pub fn ensure(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.gallery())?;
        std::fs::create_dir_all(self.uploads())?;
        Ok(())
    }
}

impl FromStr for DataDir {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self { path: PathBuf::from(s) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_dir_layout() {
        let dir = DataDir::from_str("/var/lib/rollcall").unwrap();
        assert_eq!(dir.database(), Path::new("/var/lib/rollcall/rollcall.db"));
        assert_eq!(dir.gallery(), Path::new("/var/lib/rollcall/gallery"));
        assert_eq!(dir.uploads(), Path::new("/var/lib/rollcall/uploads"));
    }

    #[test]
    fn test_parse_server_defaults() {
        let opts = Opts::parse_from(["rollcall", "-d", "/tmp/rc", "server"]);
        assert_eq!(opts.data_dir.path(), Path::new("/tmp/rc"));
        match opts.subcmd {
            SubCommand::Server(cmd) => {
                assert_eq!(cmd.camera.frame_interval(), Duration::from_millis(100));
                assert_eq!(cmd.camera.recognition_interval(), Duration::from_millis(333));
                assert!((cmd.face.tolerance - 1.128).abs() < f32::EPSILON);
            }
            _ => panic!("expected server subcommand"),
        }
    }
}
