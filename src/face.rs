use std::sync::{Arc, Mutex, MutexGuard};

use log::debug;
use opencv::Result;
use opencv::core::{Mat, Ptr, Size};
use opencv::objdetect::{FaceDetectorYN, FaceRecognizerSF};
use opencv::prelude::*;

use crate::config::FaceOptions;

/// 人脸特征向量
pub type Encoding = Vec<f32>;

/// 人脸检测与特征提取
pub trait FaceEngine: Send {
    /// 检测图片中的所有人脸并计算特征，按检测置信度从高到低排列
    ///
    /// 没有检测到人脸时返回空列表
    fn encode(&mut self, image: &Mat) -> Result<Vec<Encoding>>;
}

/// 多个线程共享的人脸引擎，只能在阻塞上下文中使用
pub type SharedEngine = Arc<Mutex<Box<dyn FaceEngine>>>;

pub fn shared(engine: impl FaceEngine + 'static) -> SharedEngine {
    Arc::new(Mutex::new(Box::new(engine)))
}

pub fn lock_engine(engine: &SharedEngine) -> MutexGuard<'_, Box<dyn FaceEngine>> {
    // 引擎本身没有需要恢复的不变量，被毒化的锁可以继续使用
    engine.lock().unwrap_or_else(|e| e.into_inner())
}

/// 两个特征之间的欧氏距离
pub fn face_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum::<f32>().sqrt()
}

fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0. {
        v.iter_mut().for_each(|x| *x /= norm);
    }
}

/// 基于 OpenCV YuNet + SFace 的人脸引擎
pub struct OpencvFaceEngine {
    detector: Ptr<FaceDetectorYN>,
    recognizer: Ptr<FaceRecognizerSF>,
}

// 引擎总是在 Mutex 中使用，同一时刻只有一个线程访问
unsafe impl Send for OpencvFaceEngine {}

impl OpencvFaceEngine {
    pub fn create(opts: &FaceOptions) -> Result<Self> {
        debug!("加载人脸检测模型: {}", opts.detector_model.display());
        let detector = FaceDetectorYN::create(
            &opts.detector_model.to_string_lossy(),
            "",
            Size::new(320, 320),
            opts.score_threshold,
            opts.nms_threshold,
            5000,
            0,
            0,
        )?;
        debug!("加载人脸特征模型: {}", opts.recognizer_model.display());
        let recognizer =
            FaceRecognizerSF::create(&opts.recognizer_model.to_string_lossy(), "", 0, 0)?;
        Ok(Self { detector, recognizer })
    }
}

impl FaceEngine for OpencvFaceEngine {
    fn encode(&mut self, image: &Mat) -> Result<Vec<Encoding>> {
        self.detector.set_input_size(image.size()?)?;
        let mut faces = Mat::default();
        self.detector.detect(image, &mut faces)?;

        // 每行是一个人脸：边框、5 个关键点和置信度，共 15 列
        let mut detections = Vec::with_capacity(faces.rows().max(0) as usize);
        for i in 0..faces.rows() {
            let score = *faces.at_2d::<f32>(i, 14)?;
            detections.push((score, faces.row(i)?.try_clone()?));
        }
        detections.sort_by(|a, b| b.0.total_cmp(&a.0));

        let mut encodings = Vec::with_capacity(detections.len());
        for (_, face) in detections {
            let mut aligned = Mat::default();
            self.recognizer.align_crop(image, &face, &mut aligned)?;
            let mut feature = Mat::default();
            self.recognizer.feature(&aligned, &mut feature)?;
            let mut encoding = feature.data_typed::<f32>()?.to_vec();
            l2_normalize(&mut encoding);
            encodings.push(encoding);
        }
        Ok(encodings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_face_distance() {
        assert_eq!(face_distance(&[0., 0.], &[3., 4.]), 5.);
        assert_eq!(face_distance(&[1., 2., 3.], &[1., 2., 3.]), 0.);
    }

    #[test]
    fn test_l2_normalize() {
        let mut v = vec![3., 4.];
        l2_normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);

        let mut zero = vec![0., 0.];
        l2_normalize(&mut zero);
        assert_eq!(zero, vec![0., 0.]);
    }
}
