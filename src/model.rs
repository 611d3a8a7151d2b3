// 该文件是 Zuokan （坐看云起） 项目的一部分。
// src/model.rs - 检测模型
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use image::RgbImage;
use thiserror::Error;

/// COCO 数据集类别名称
#[rustfmt::skip]
pub const COCO_CLASSES: [&str; 80] = [
  "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck",
  "boat", "traffic light", "fire hydrant", "stop sign", "parking meter", "bench",
  "bird", "cat", "dog", "horse", "sheep", "cow", "elephant", "bear", "zebra",
  "giraffe", "backpack", "umbrella", "handbag", "tie", "suitcase", "frisbee",
  "skis", "snowboard", "sports ball", "kite", "baseball bat", "baseball glove",
  "skateboard", "surfboard", "tennis racket", "bottle", "wine glass", "cup",
  "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich", "orange",
  "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch",
  "potted plant", "bed", "dining table", "toilet", "tv", "laptop", "mouse",
  "remote", "keyboard", "cell phone", "microwave", "oven", "toaster", "sink",
  "refrigerator", "book", "clock", "vase", "scissors", "teddy bear",
  "hair drier", "toothbrush",
];

/// 检测模型错误类型
#[derive(Error, Debug)]
pub enum DetectError {
  #[cfg(feature = "model_yolov8")]
  #[error(transparent)]
  InferenceError(#[from] tract_onnx::prelude::TractError),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("模型输出格式不符: {0}")]
  OutputShapeError(String),
}

/// 单个检测结果
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
  /// 边界框 [x_min, y_min, x_max, y_max]，原图像素坐标
  pub bbox: [f32; 4],
  /// 置信度
  pub confidence: f32,
  /// 类别索引
  pub class_id: usize,
}

impl Detection {
  /// 边界框中心点（像素）
  pub fn center(&self) -> (i32, i32) {
    (
      ((self.bbox[0] + self.bbox[2]) / 2.0) as i32,
      ((self.bbox[1] + self.bbox[3]) / 2.0) as i32,
    )
  }

  /// 类别名称
  pub fn class_name(&self) -> &'static str {
    COCO_CLASSES.get(self.class_id).copied().unwrap_or("unknown")
  }
}

/// 检测模型 trait
///
/// 实现必须是同步且跨调用无状态的：同一帧在任意时刻推理
/// 得到相同结果，实例可在多个会话间只读共享。
pub trait Detector {
  /// 对一帧图像运行检测，过滤掉低于 `confidence_threshold` 的结果
  fn detect(
    &self,
    image: &RgbImage,
    confidence_threshold: f32,
  ) -> Result<Vec<Detection>, DetectError>;
}

#[cfg(feature = "model_yolov8")]
mod yolov8;
#[cfg(feature = "model_yolov8")]
pub use self::yolov8::{Yolov8, Yolov8Builder};
