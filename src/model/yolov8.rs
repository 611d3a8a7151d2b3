// 该文件是 Zuokan （坐看云起） 项目的一部分。
// src/model/yolov8.rs - YOLOv8 检测模型
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use image::RgbImage;
use tract_onnx::prelude::*;
use tracing::{debug, info};
use url::Url;

use crate::model::{DetectError, Detection, Detector};
use crate::{FromUrl, FromUrlWithScheme};

const YOLOV8_DEFAULT_INPUT_W: u32 = 640;
const YOLOV8_DEFAULT_INPUT_H: u32 = 640;
const YOLOV8_DEFAULT_IOU_THRESH: f32 = 0.45;
const YOLOV8_CLASS_NUM: usize = 80;
/// letterbox 填充灰度（YOLO 惯例 114/255）
const LETTERBOX_FILL: f32 = 114.0 / 255.0;

const YOLOV8_SCHEME: &str = "yolov8";

/// YOLOv8 模型构建器
///
/// 从 `yolov8:///path/to/model.onnx?width=640&height=640&iou=0.45` 构建。
pub struct Yolov8Builder {
  model_path: String,
  input_width: u32,
  input_height: u32,
  iou_threshold: f32,
}

impl FromUrlWithScheme for Yolov8Builder {
  const SCHEME: &'static str = YOLOV8_SCHEME;
}

impl FromUrl for Yolov8Builder {
  type Error = DetectError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != YOLOV8_SCHEME {
      return Err(DetectError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        YOLOV8_SCHEME
      )));
    }

    let mut builder = Yolov8Builder {
      model_path: url.path().to_string(),
      input_width: YOLOV8_DEFAULT_INPUT_W,
      input_height: YOLOV8_DEFAULT_INPUT_H,
      iou_threshold: YOLOV8_DEFAULT_IOU_THRESH,
    };

    for (key, value) in url.query_pairs() {
      match key.as_ref() {
        "width" => {
          if let Ok(v) = value.parse() {
            builder.input_width = v;
          }
        }
        "height" => {
          if let Ok(v) = value.parse() {
            builder.input_height = v;
          }
        }
        "iou" => {
          if let Ok(v) = value.parse() {
            builder.iou_threshold = v;
          }
        }
        _ => {}
      }
    }

    Ok(builder)
  }
}

impl Yolov8Builder {
  pub fn iou_threshold(mut self, threshold: f32) -> Self {
    self.iou_threshold = threshold;
    self
  }

  pub fn build(self) -> Result<Yolov8, DetectError> {
    info!("加载模型文件: {}", self.model_path);
    let model = tract_onnx::onnx()
      .model_for_path(&self.model_path)?
      .with_input_fact(
        0,
        InferenceFact::dt_shape(
          f32::datum_type(),
          tvec!(
            1,
            3,
            self.input_height as usize,
            self.input_width as usize
          ),
        ),
      )?
      .into_optimized()?
      .into_runnable()?;
    info!("模型加载完成");

    Ok(Yolov8 {
      model,
      input_width: self.input_width,
      input_height: self.input_height,
      iou_threshold: self.iou_threshold,
    })
  }
}

/// YOLOv8 目标检测模型（tract-onnx 推理）
pub struct Yolov8 {
  model: TypedSimplePlan<TypedModel>,
  input_width: u32,
  input_height: u32,
  iou_threshold: f32,
}

impl Yolov8 {
  /// letterbox 缩放比例：保持宽高比缩入模型输入尺寸
  fn scale_ratio(&self, width: u32, height: u32) -> f32 {
    (self.input_width as f32 / width as f32).min(self.input_height as f32 / height as f32)
  }

  /// 预处理：按比例缩放后置于灰色画布左上角，输出 NCHW f32 张量
  fn preprocess(&self, image: &RgbImage) -> Tensor {
    let ratio = self.scale_ratio(image.width(), image.height());
    let scaled_w = ((image.width() as f32) * ratio).round() as u32;
    let scaled_h = ((image.height() as f32) * ratio).round() as u32;
    let resized = image::imageops::resize(
      image,
      scaled_w.max(1),
      scaled_h.max(1),
      image::imageops::FilterType::Triangle,
    );

    let mut input = tract_ndarray::Array4::<f32>::from_elem(
      (
        1,
        3,
        self.input_height as usize,
        self.input_width as usize,
      ),
      LETTERBOX_FILL,
    );
    for (x, y, pixel) in resized.enumerate_pixels() {
      let x = x as usize;
      let y = y as usize;
      input[[0, 0, y, x]] = pixel[0] as f32 / 255.0;
      input[[0, 1, y, x]] = pixel[1] as f32 / 255.0;
      input[[0, 2, y, x]] = pixel[2] as f32 / 255.0;
    }

    input.into_tensor()
  }
}

impl Detector for Yolov8 {
  fn detect(
    &self,
    image: &RgbImage,
    confidence_threshold: f32,
  ) -> Result<Vec<Detection>, DetectError> {
    let input = self.preprocess(image);

    debug!("执行模型推理");
    let outputs = self.model.run(tvec!(input.into()))?;
    let output = outputs
      .first()
      .ok_or_else(|| DetectError::OutputShapeError("模型没有输出".to_string()))?;
    let view = output.to_array_view::<f32>()?;

    let ratio = self.scale_ratio(image.width(), image.height());
    let detections = postprocess(
      &view,
      confidence_threshold,
      ratio,
      image.width() as f32,
      image.height() as f32,
    )?;
    let detections = nms(detections, self.iou_threshold);

    debug!("检测到 {} 个物体", detections.len());
    Ok(detections)
  }
}

/// 解码 YOLOv8 输出 `[1, 4 + 类别数, N]`
///
/// 每列为一个候选框：前 4 行是中心点坐标与宽高（模型输入坐标系），
/// 其余行是各类别分数（无独立 objectness）。
fn postprocess(
  output: &tract_ndarray::ArrayViewD<f32>,
  confidence_threshold: f32,
  ratio: f32,
  original_width: f32,
  original_height: f32,
) -> Result<Vec<Detection>, DetectError> {
  let shape = output.shape();
  if shape.len() != 3 || shape[1] < 4 + 1 {
    return Err(DetectError::OutputShapeError(format!(
      "期望 [1, 4+类别数, N]，实际 {:?}",
      shape
    )));
  }

  let num_classes = (shape[1] - 4).min(YOLOV8_CLASS_NUM);
  let anchors = shape[2];
  let mut detections = Vec::new();

  for i in 0..anchors {
    // 找到最高类别分数
    let mut max_score = 0.0f32;
    let mut max_class_id = 0usize;
    for class_id in 0..num_classes {
      let score = output[[0, 4 + class_id, i]];
      if score > max_score {
        max_score = score;
        max_class_id = class_id;
      }
    }

    if max_score < confidence_threshold {
      continue;
    }

    let cx = output[[0, 0, i]];
    let cy = output[[0, 1, i]];
    let w = output[[0, 2, i]];
    let h = output[[0, 3, i]];

    // 从 letterbox 坐标系换回原图像素坐标
    let x_min = ((cx - w / 2.0) / ratio).clamp(0.0, original_width);
    let y_min = ((cy - h / 2.0) / ratio).clamp(0.0, original_height);
    let x_max = ((cx + w / 2.0) / ratio).clamp(0.0, original_width);
    let y_max = ((cy + h / 2.0) / ratio).clamp(0.0, original_height);

    if x_min >= x_max || y_min >= y_max {
      continue;
    }

    detections.push(Detection {
      bbox: [x_min, y_min, x_max, y_max],
      confidence: max_score,
      class_id: max_class_id,
    });
  }

  Ok(detections)
}

/// 非极大值抑制（按类别）
fn nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
  // 按置信度降序排序
  detections.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap());

  let mut result: Vec<Detection> = Vec::new();

  while !detections.is_empty() {
    let best = detections.remove(0);

    detections.retain(|det| {
      if det.class_id != best.class_id {
        return true;
      }
      iou(&best, det) < iou_threshold
    });

    result.push(best);
  }

  result
}

/// 计算两个边界框的 IoU
fn iou(a: &Detection, b: &Detection) -> f32 {
  let x1 = a.bbox[0].max(b.bbox[0]);
  let y1 = a.bbox[1].max(b.bbox[1]);
  let x2 = a.bbox[2].min(b.bbox[2]);
  let y2 = a.bbox[3].min(b.bbox[3]);

  let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
  let area_a = (a.bbox[2] - a.bbox[0]) * (a.bbox[3] - a.bbox[1]);
  let area_b = (b.bbox[2] - b.bbox[0]) * (b.bbox[3] - b.bbox[1]);
  let union = area_a + area_b - intersection;

  if union > 0.0 { intersection / union } else { 0.0 }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn det(bbox: [f32; 4], confidence: f32, class_id: usize) -> Detection {
    Detection {
      bbox,
      confidence,
      class_id,
    }
  }

  #[test]
  fn iou_of_identical_boxes_is_one() {
    let a = det([0.0, 0.0, 10.0, 10.0], 0.9, 0);
    assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
  }

  #[test]
  fn iou_of_disjoint_boxes_is_zero() {
    let a = det([0.0, 0.0, 10.0, 10.0], 0.9, 0);
    let b = det([20.0, 20.0, 30.0, 30.0], 0.9, 0);
    assert_eq!(iou(&a, &b), 0.0);
  }

  #[test]
  fn nms_keeps_highest_confidence_per_overlap() {
    let kept = nms(
      vec![
        det([0.0, 0.0, 10.0, 10.0], 0.6, 0),
        det([1.0, 1.0, 11.0, 11.0], 0.9, 0),
        det([50.0, 50.0, 60.0, 60.0], 0.5, 0),
      ],
      0.45,
    );
    assert_eq!(kept.len(), 2);
    assert_eq!(kept[0].confidence, 0.9);
  }

  #[test]
  fn nms_never_suppresses_across_classes() {
    let kept = nms(
      vec![
        det([0.0, 0.0, 10.0, 10.0], 0.9, 0),
        det([0.0, 0.0, 10.0, 10.0], 0.8, 1),
      ],
      0.45,
    );
    assert_eq!(kept.len(), 2);
  }

  #[test]
  fn postprocess_decodes_and_scales_back() {
    // 单候选框：中心 (320, 320)，宽高 160，类别 2 分数 0.8
    let mut raw = tract_ndarray::Array3::<f32>::zeros((1, 84, 1));
    raw[[0, 0, 0]] = 320.0;
    raw[[0, 1, 0]] = 320.0;
    raw[[0, 2, 0]] = 160.0;
    raw[[0, 3, 0]] = 160.0;
    raw[[0, 4 + 2, 0]] = 0.8;
    let view = raw.view().into_dyn();

    // 原图 1280x1280，letterbox 比例 0.5
    let detections = postprocess(&view, 0.25, 0.5, 1280.0, 1280.0).unwrap();
    assert_eq!(detections.len(), 1);
    let d = &detections[0];
    assert_eq!(d.class_id, 2);
    assert_eq!(d.bbox, [480.0, 480.0, 800.0, 800.0]);
    assert_eq!(d.center(), (640, 640));
  }

  #[test]
  fn postprocess_filters_below_threshold() {
    let mut raw = tract_ndarray::Array3::<f32>::zeros((1, 84, 1));
    raw[[0, 0, 0]] = 100.0;
    raw[[0, 1, 0]] = 100.0;
    raw[[0, 2, 0]] = 50.0;
    raw[[0, 3, 0]] = 50.0;
    raw[[0, 4, 0]] = 0.2;
    let view = raw.view().into_dyn();

    let detections = postprocess(&view, 0.25, 1.0, 640.0, 640.0).unwrap();
    assert!(detections.is_empty());
  }

  #[test]
  fn postprocess_rejects_bad_shape() {
    let raw = tract_ndarray::Array2::<f32>::zeros((84, 10));
    let view = raw.view().into_dyn();
    assert!(postprocess(&view, 0.25, 1.0, 640.0, 640.0).is_err());
  }
}
