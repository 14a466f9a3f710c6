//! Geometry of the media source and the chat overlay
//!
//! The chat overlay is a full-height column glued to the right edge of the
//! canvas. While it is shown, the media source is scaled down uniformly so
//! its width ends where the chat begins and centered vertically.

use serde::Serialize;

/// Position refers to the item's top-left corner
pub const ALIGN_TOP_LEFT: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Canvas {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BoundsType {
    #[serde(rename = "OBS_BOUNDS_NONE")]
    None,
    #[serde(rename = "OBS_BOUNDS_SCALE_INNER")]
    ScaleInner,
}

/// Body of `SetSceneItemTransform`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneItemTransform {
    pub position_x: f64,
    pub position_y: f64,
    pub scale_x: f64,
    pub scale_y: f64,
    pub rotation: f64,
    pub alignment: u32,
    pub crop_left: u32,
    pub crop_right: u32,
    pub crop_top: u32,
    pub crop_bottom: u32,
    pub bounds_type: BoundsType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounds_alignment: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounds_width: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounds_height: Option<f64>,
}

impl SceneItemTransform {
    fn placed(x: f64, y: f64, scale: f64) -> Self {
        Self {
            position_x: x,
            position_y: y,
            scale_x: scale,
            scale_y: scale,
            rotation: 0.0,
            alignment: ALIGN_TOP_LEFT,
            crop_left: 0,
            crop_right: 0,
            crop_top: 0,
            crop_bottom: 0,
            bounds_type: BoundsType::None,
            bounds_alignment: None,
            bounds_width: None,
            bounds_height: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChatLayout {
    pub width: u32,
    pub height: u32,
    pub x: u32,
}

impl ChatLayout {
    #[must_use]
    pub fn transform(&self) -> SceneItemTransform {
        SceneItemTransform::placed(f64::from(self.x), 0.0, 1.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MediaLayout {
    /// Fit inside the whole canvas
    FullCanvas { width: u32, height: u32 },
    /// Uniformly scaled beside the chat column
    BesideChat { x: f64, y: f64, scale: f64 },
}

impl MediaLayout {
    #[must_use]
    pub fn transform(&self) -> SceneItemTransform {
        match *self {
            Self::FullCanvas { width, height } => SceneItemTransform {
                bounds_type: BoundsType::ScaleInner,
                bounds_alignment: Some(ALIGN_TOP_LEFT),
                bounds_width: Some(f64::from(width)),
                bounds_height: Some(f64::from(height)),
                ..SceneItemTransform::placed(0.0, 0.0, 1.0)
            },
            Self::BesideChat { x, y, scale } => SceneItemTransform::placed(x, y, scale),
        }
    }
}

/// Chat column width for a canvas width: a resolution-dependent share of
/// the canvas with a floor so small canvases keep a readable chat.
#[must_use]
pub fn chat_width(canvas_width: u32) -> u32 {
    let share = |ratio: f64| (f64::from(canvas_width) * ratio).floor() as u32;
    if canvas_width >= 1920 {
        share(0.18).max(300)
    } else if canvas_width >= 1280 {
        share(0.22).max(250)
    } else {
        share(0.25).max(200)
    }
}

#[must_use]
pub fn chat_layout(canvas: Canvas) -> ChatLayout {
    let width = chat_width(canvas.width);
    ChatLayout {
        width,
        height: canvas.height,
        x: canvas.width.saturating_sub(width),
    }
}

#[must_use]
pub fn media_layout(canvas: Canvas, chat_active: bool) -> MediaLayout {
    if !chat_active || canvas.width == 0 {
        return MediaLayout::FullCanvas {
            width: canvas.width,
            height: canvas.height,
        };
    }

    let width = f64::from(canvas.width);
    let height = f64::from(canvas.height);
    let chat = f64::from(chat_width(canvas.width).min(canvas.width));
    let scale = (width - chat) / width;
    MediaLayout::BesideChat {
        x: 0.0,
        y: (height - height * scale) / 2.0,
        scale,
    }
}
