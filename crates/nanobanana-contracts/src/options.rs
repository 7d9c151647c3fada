use serde::{Deserialize, Serialize};

pub const SEED_RANDOM: i64 = -1;
pub const SEED_MAX: i64 = 999_999;
pub const STEPS_MIN: u32 = 10;
pub const STEPS_MAX: u32 = 50;
pub const GUIDANCE_MIN: f64 = 1.0;
pub const GUIDANCE_MAX: f64 = 20.0;

/// Output shape requested from the backend.
///
/// Each tag maps to the fixed pixel dimensions the image API produces for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AspectRatio {
    Square,
    Portrait2x3,
    Landscape3x2,
    Portrait3x4,
    Landscape4x3,
    Portrait4x5,
    Landscape5x4,
    Vertical9x16,
    Widescreen16x9,
    UltraWide21x9,
}

impl AspectRatio {
    pub const ALL: [AspectRatio; 10] = [
        AspectRatio::Square,
        AspectRatio::Portrait2x3,
        AspectRatio::Landscape3x2,
        AspectRatio::Portrait3x4,
        AspectRatio::Landscape4x3,
        AspectRatio::Portrait4x5,
        AspectRatio::Landscape5x4,
        AspectRatio::Vertical9x16,
        AspectRatio::Widescreen16x9,
        AspectRatio::UltraWide21x9,
    ];

    pub const DEFAULT: AspectRatio = AspectRatio::Square;

    pub fn tag(self) -> &'static str {
        match self {
            AspectRatio::Square => "1:1",
            AspectRatio::Portrait2x3 => "2:3",
            AspectRatio::Landscape3x2 => "3:2",
            AspectRatio::Portrait3x4 => "3:4",
            AspectRatio::Landscape4x3 => "4:3",
            AspectRatio::Portrait4x5 => "4:5",
            AspectRatio::Landscape5x4 => "5:4",
            AspectRatio::Vertical9x16 => "9:16",
            AspectRatio::Widescreen16x9 => "16:9",
            AspectRatio::UltraWide21x9 => "21:9",
        }
    }

    pub fn dimensions(self) -> (u32, u32) {
        match self {
            AspectRatio::Square => (1024, 1024),
            AspectRatio::Portrait2x3 => (832, 1248),
            AspectRatio::Landscape3x2 => (1248, 832),
            AspectRatio::Portrait3x4 => (864, 1184),
            AspectRatio::Landscape4x3 => (1184, 864),
            AspectRatio::Portrait4x5 => (896, 1152),
            AspectRatio::Landscape5x4 => (1152, 896),
            AspectRatio::Vertical9x16 => (768, 1344),
            AspectRatio::Widescreen16x9 => (1344, 768),
            AspectRatio::UltraWide21x9 => (1536, 672),
        }
    }

    pub fn from_tag(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        Self::ALL.into_iter().find(|ratio| ratio.tag() == trimmed)
    }
}

/// Template wrapped around the subject text. `Custom` leaves it untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptStyle {
    Custom,
    Photorealistic,
    Artistic,
    Product,
    Minimalist,
    Comic,
}

impl PromptStyle {
    pub const ALL: [PromptStyle; 6] = [
        PromptStyle::Custom,
        PromptStyle::Photorealistic,
        PromptStyle::Artistic,
        PromptStyle::Product,
        PromptStyle::Minimalist,
        PromptStyle::Comic,
    ];

    pub fn tag(self) -> &'static str {
        match self {
            PromptStyle::Custom => "CUSTOM",
            PromptStyle::Photorealistic => "PHOTOREALISTIC",
            PromptStyle::Artistic => "ARTISTIC",
            PromptStyle::Product => "PRODUCT",
            PromptStyle::Minimalist => "MINIMALIST",
            PromptStyle::Comic => "COMIC",
        }
    }

    pub fn from_tag(raw: &str) -> Option<Self> {
        find_by_tag(&Self::ALL, raw, |style| style.tag())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lighting {
    Auto,
    Natural,
    Studio,
    Cinematic,
    GoldenHour,
    BlueHour,
    LowKey,
    HighKey,
}

impl Lighting {
    pub const ALL: [Lighting; 8] = [
        Lighting::Auto,
        Lighting::Natural,
        Lighting::Studio,
        Lighting::Cinematic,
        Lighting::GoldenHour,
        Lighting::BlueHour,
        Lighting::LowKey,
        Lighting::HighKey,
    ];

    pub fn tag(self) -> &'static str {
        match self {
            Lighting::Auto => "AUTO",
            Lighting::Natural => "NATURAL",
            Lighting::Studio => "STUDIO",
            Lighting::Cinematic => "CINEMATIC",
            Lighting::GoldenHour => "GOLDEN_HOUR",
            Lighting::BlueHour => "BLUE_HOUR",
            Lighting::LowKey => "LOW_KEY",
            Lighting::HighKey => "HIGH_KEY",
        }
    }

    pub fn from_tag(raw: &str) -> Option<Self> {
        find_by_tag(&Self::ALL, raw, |lighting| lighting.tag())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CameraAngle {
    Auto,
    EyeLevel,
    LowAngle,
    HighAngle,
    BirdsEye,
    WormsEye,
    CloseUp,
    WideShot,
}

impl CameraAngle {
    pub const ALL: [CameraAngle; 8] = [
        CameraAngle::Auto,
        CameraAngle::EyeLevel,
        CameraAngle::LowAngle,
        CameraAngle::HighAngle,
        CameraAngle::BirdsEye,
        CameraAngle::WormsEye,
        CameraAngle::CloseUp,
        CameraAngle::WideShot,
    ];

    pub fn tag(self) -> &'static str {
        match self {
            CameraAngle::Auto => "AUTO",
            CameraAngle::EyeLevel => "EYE_LEVEL",
            CameraAngle::LowAngle => "LOW_ANGLE",
            CameraAngle::HighAngle => "HIGH_ANGLE",
            CameraAngle::BirdsEye => "BIRDS_EYE",
            CameraAngle::WormsEye => "WORMS_EYE",
            CameraAngle::CloseUp => "CLOSE_UP",
            CameraAngle::WideShot => "WIDE_SHOT",
        }
    }

    pub fn from_tag(raw: &str) -> Option<Self> {
        find_by_tag(&Self::ALL, raw, |angle| angle.tag())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Quality {
    Low,
    Medium,
    High,
}

impl Quality {
    pub const ALL: [Quality; 3] = [Quality::Low, Quality::Medium, Quality::High];

    pub fn tag(self) -> &'static str {
        match self {
            Quality::Low => "LOW",
            Quality::Medium => "MEDIUM",
            Quality::High => "HIGH",
        }
    }

    pub fn from_tag(raw: &str) -> Option<Self> {
        find_by_tag(&Self::ALL, raw, |quality| quality.tag())
    }
}

/// Which request(s) a render trigger sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ServiceMode {
    #[default]
    Generate,
    Analyze,
    Both,
}

impl ServiceMode {
    pub fn tag(self) -> &'static str {
        match self {
            ServiceMode::Generate => "IMAGE_TO_IMAGE",
            ServiceMode::Analyze => "ANALYSIS",
            ServiceMode::Both => "BOTH",
        }
    }

    pub fn from_tag(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "IMAGE_TO_IMAGE" | "GENERATE" => Some(ServiceMode::Generate),
            "ANALYSIS" | "ANALYZE" => Some(ServiceMode::Analyze),
            "BOTH" => Some(ServiceMode::Both),
            _ => None,
        }
    }

    pub fn wants_analysis(self) -> bool {
        matches!(self, ServiceMode::Analyze | ServiceMode::Both)
    }

    pub fn wants_image(self) -> bool {
        matches!(self, ServiceMode::Generate | ServiceMode::Both)
    }
}

/// Everything the caller chose for one render trigger.
///
/// Tags are kept as the raw strings the host hands over; unknown tags are
/// tolerated and simply contribute nothing to the prompt or request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub legacy_prompt: String,
    #[serde(default)]
    pub style: String,
    #[serde(default = "default_aspect_ratio")]
    pub aspect_ratio: String,
    #[serde(default = "default_prompt_style")]
    pub prompt_style: String,
    #[serde(default = "default_auto")]
    pub lighting: String,
    #[serde(default = "default_auto")]
    pub camera: String,
    #[serde(default = "default_quality")]
    pub quality: String,
    #[serde(default = "default_true")]
    pub include_scene_context: bool,
    #[serde(default = "default_seed")]
    pub seed: i64,
    #[serde(default = "default_steps")]
    pub steps: u32,
    #[serde(default = "default_guidance_scale")]
    pub guidance_scale: f64,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            legacy_prompt: String::new(),
            style: String::new(),
            aspect_ratio: default_aspect_ratio(),
            prompt_style: default_prompt_style(),
            lighting: default_auto(),
            camera: default_auto(),
            quality: default_quality(),
            include_scene_context: true,
            seed: default_seed(),
            steps: default_steps(),
            guidance_scale: default_guidance_scale(),
        }
    }
}

impl GenerationOptions {
    pub fn aspect_ratio(&self) -> Option<AspectRatio> {
        AspectRatio::from_tag(&self.aspect_ratio)
    }

    pub fn prompt_style(&self) -> PromptStyle {
        PromptStyle::from_tag(&self.prompt_style).unwrap_or(PromptStyle::Custom)
    }

    pub fn lighting(&self) -> Option<Lighting> {
        Lighting::from_tag(&self.lighting)
    }

    pub fn camera(&self) -> Option<CameraAngle> {
        CameraAngle::from_tag(&self.camera)
    }

    pub fn quality(&self) -> Option<Quality> {
        Quality::from_tag(&self.quality)
    }

    /// Seed forwarded to the backend, `None` when a random seed is requested.
    pub fn explicit_seed(&self) -> Option<i64> {
        (self.seed >= 0).then_some(self.seed)
    }

    /// Clamps the advisory numeric fields into range and reports every
    /// adjustment or unrecognized tag.
    pub fn sanitized(mut self, warnings: &mut Vec<String>) -> Self {
        let seed = self.seed.clamp(SEED_RANDOM, SEED_MAX);
        if seed != self.seed {
            push_unique_warning(warnings, format!("seed clamped to {seed}."));
            self.seed = seed;
        }
        let steps = self.steps.clamp(STEPS_MIN, STEPS_MAX);
        if steps != self.steps {
            push_unique_warning(warnings, format!("steps clamped to {steps}."));
            self.steps = steps;
        }
        let guidance = if self.guidance_scale.is_finite() {
            self.guidance_scale.clamp(GUIDANCE_MIN, GUIDANCE_MAX)
        } else {
            default_guidance_scale()
        };
        if guidance != self.guidance_scale {
            push_unique_warning(warnings, format!("guidance_scale clamped to {guidance}."));
            self.guidance_scale = guidance;
        }

        if self.aspect_ratio().is_none() {
            push_unique_warning(
                warnings,
                format!("Unknown aspect ratio '{}' ignored.", self.aspect_ratio),
            );
        }
        if PromptStyle::from_tag(&self.prompt_style).is_none() {
            push_unique_warning(
                warnings,
                format!(
                    "Unknown prompt style '{}'; using CUSTOM.",
                    self.prompt_style
                ),
            );
        }
        if self.lighting().is_none() {
            push_unique_warning(
                warnings,
                format!("Unknown lighting '{}' ignored.", self.lighting),
            );
        }
        if self.camera().is_none() {
            push_unique_warning(
                warnings,
                format!("Unknown camera angle '{}' ignored.", self.camera),
            );
        }
        if self.quality().is_none() {
            push_unique_warning(
                warnings,
                format!("Unknown quality '{}' ignored.", self.quality),
            );
        }
        self
    }
}

pub fn push_unique_warning(warnings: &mut Vec<String>, message: String) {
    if message.trim().is_empty() {
        return;
    }
    if warnings.iter().any(|existing| existing == &message) {
        return;
    }
    warnings.push(message);
}

fn find_by_tag<T: Copy>(all: &[T], raw: &str, tag: impl Fn(T) -> &'static str) -> Option<T> {
    let normalized = raw.trim().to_ascii_uppercase().replace([' ', '-'], "_");
    all.iter().copied().find(|value| tag(*value) == normalized)
}

fn default_aspect_ratio() -> String {
    AspectRatio::DEFAULT.tag().to_string()
}

fn default_prompt_style() -> String {
    PromptStyle::Custom.tag().to_string()
}

fn default_auto() -> String {
    "AUTO".to_string()
}

fn default_quality() -> String {
    Quality::Medium.tag().to_string()
}

fn default_true() -> bool {
    true
}

fn default_seed() -> i64 {
    SEED_RANDOM
}

fn default_steps() -> u32 {
    20
}

fn default_guidance_scale() -> f64 {
    7.5
}
