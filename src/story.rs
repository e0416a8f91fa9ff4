//! Input data model: an ordered storyboard of shots.
//!
//! Shots are produced upstream (script analysis is out of scope for this
//! crate) and are immutable for the duration of an export; the engine only
//! ever borrows a `Storyboard`.

/// Camera framing category for a shot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShotKind {
    CloseUp,
    Medium,
    Wide,
    ExtremeWide,
    OverShoulder,
    PointOfView,
}

impl ShotKind {
    pub fn label(&self) -> &'static str {
        match self {
            ShotKind::CloseUp => "Close-up",
            ShotKind::Medium => "Medium Shot",
            ShotKind::Wide => "Wide Shot",
            ShotKind::ExtremeWide => "Extreme Wide",
            ShotKind::OverShoulder => "Over-the-shoulder",
            ShotKind::PointOfView => "POV",
        }
    }
}

/// Declared aspect ratio of a shot's frame.
///
/// Layout derives the image frame inside the slot from this tag alone, so
/// page geometry never depends on the image payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AspectRatio {
    SixteenNine,
    OneOne,
    NineSixteen,
    FourThree,
}

impl AspectRatio {
    pub fn as_str(&self) -> &'static str {
        match self {
            AspectRatio::SixteenNine => "16:9",
            AspectRatio::OneOne => "1:1",
            AspectRatio::NineSixteen => "9:16",
            AspectRatio::FourThree => "4:3",
        }
    }

    /// Width and height proportions of the tag.
    pub fn ratio(&self) -> (i32, i32) {
        match self {
            AspectRatio::SixteenNine => (16, 9),
            AspectRatio::OneOne => (1, 1),
            AspectRatio::NineSixteen => (9, 16),
            AspectRatio::FourThree => (4, 3),
        }
    }
}

/// One storyboard unit: a single camera shot with text fields and an
/// optional already-rendered raster image (`data:` URI or file path).
#[derive(Debug, Clone)]
pub struct Shot {
    pub index: u32,
    pub kind: ShotKind,
    pub duration_secs: f32,
    pub aspect: AspectRatio,
    pub description: String,
    pub prompt: Option<String>,
    pub image: Option<String>,
    pub scene_label: Option<String>,
}

impl Shot {
    pub fn new(index: u32, kind: ShotKind) -> Self {
        Self {
            index,
            kind,
            duration_secs: 0.0,
            aspect: AspectRatio::SixteenNine,
            description: String::new(),
            prompt: None,
            image: None,
            scene_label: None,
        }
    }

    pub fn with_duration(mut self, secs: f32) -> Self {
        self.duration_secs = secs;
        self
    }

    pub fn with_aspect(mut self, aspect: AspectRatio) -> Self {
        self.aspect = aspect;
        self
    }

    pub fn with_description(mut self, text: impl Into<String>) -> Self {
        self.description = text.into();
        self
    }

    pub fn with_prompt(mut self, text: impl Into<String>) -> Self {
        self.prompt = Some(text.into());
        self
    }

    pub fn with_image(mut self, source: impl Into<String>) -> Self {
        self.image = Some(source.into());
        self
    }

    pub fn with_scene_label(mut self, label: impl Into<String>) -> Self {
        self.scene_label = Some(label.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct Storyboard {
    pub title: String,
    pub summary: String,
    pub shots: Vec<Shot>,
}

impl Storyboard {
    pub fn new(title: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            summary: summary.into(),
            shots: Vec::new(),
        }
    }

    pub fn with_shots(mut self, shots: Vec<Shot>) -> Self {
        self.shots = shots;
        self
    }

    pub fn push_shot(&mut self, shot: Shot) {
        self.shots.push(shot);
    }

    /// Sum of shot durations, rounded to whole seconds for display.
    pub fn total_duration_secs(&self) -> u64 {
        let total: f64 = self
            .shots
            .iter()
            .map(|shot| shot.duration_secs.max(0.0) as f64)
            .sum();
        total.round() as u64
    }
}
