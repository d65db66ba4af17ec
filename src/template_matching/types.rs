/// Template matching data types
use image::RgbImage;
use serde::{Deserialize, Serialize};

/// Search rectangle in capture-pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// True when the region is non-empty and lies entirely inside an image
    /// of the given size.
    pub fn fits_within(&self, image_width: u32, image_height: u32) -> bool {
        self.width > 0
            && self.height > 0
            && self
                .x
                .checked_add(self.width)
                .is_some_and(|right| right <= image_width)
            && self
                .y
                .checked_add(self.height)
                .is_some_and(|bottom| bottom <= image_height)
    }

    /// Parse `x,y,width,height`.
    pub fn parse(text: &str) -> Option<Self> {
        let parts: Vec<&str> = text.split(',').collect();
        if parts.len() == 4
            && let (Ok(x), Ok(y), Ok(width), Ok(height)) = (
                parts[0].trim().parse::<u32>(),
                parts[1].trim().parse::<u32>(),
                parts[2].trim().parse::<u32>(),
                parts[3].trim().parse::<u32>(),
            )
        {
            return Some(Region::new(x, y, width, height));
        }
        None
    }
}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{},{},{},{}", self.x, self.y, self.width, self.height)
    }
}

/// A decoded reference image, keyed by its file name. Kept in colour so a
/// greyed-out copy of a button does not match the live one.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pub name: String,
    pub image: RgbImage,
}

impl Template {
    pub fn new(name: impl Into<String>, image: RgbImage) -> Self {
        Self {
            name: name.into(),
            image,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// What to look for in a capture.
#[derive(Debug, Clone, Copy)]
pub struct MatchRequest<'a> {
    pub template: &'a str,
    pub threshold: f32,
    pub region: Option<Region>,
}

impl<'a> MatchRequest<'a> {
    pub fn new(template: &'a str, threshold: f32) -> Self {
        Self {
            template,
            threshold,
            region: None,
        }
    }

    pub fn in_region(mut self, region: Region) -> Self {
        self.region = Some(region);
        self
    }
}

/// Best location found for a request.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MatchResult {
    pub success: bool,
    /// Top-left of the best match, in full-capture coordinates.
    pub x: u32,
    pub y: u32,
    /// Correlation score in [-1, 1]
    pub score: f32,
}

impl MatchResult {
    /// Unconditional failure (unknown template, template larger than area).
    pub fn miss() -> Self {
        Self {
            success: false,
            x: 0,
            y: 0,
            score: 0.0,
        }
    }

    pub fn location(&self) -> (u32, u32) {
        (self.x, self.y)
    }
}
