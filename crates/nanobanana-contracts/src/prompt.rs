use crate::options::{AspectRatio, CameraAngle, GenerationOptions, Lighting, PromptStyle, Quality};

pub const CLAUSE_SEPARATOR: &str = " | ";
pub const DEFAULT_SUBJECT: &str = "generate a high quality image";

/// Composes the generation instruction from the option tables.
///
/// Segments are emitted in a fixed order: styled subject, lighting, camera,
/// scene context, quality, composition. A segment with nothing to say is
/// dropped entirely, so the separator never dangles.
pub fn build_prompt(options: &GenerationOptions, scene_context: Option<&str>) -> String {
    let mut segments = vec![apply_style_template(
        options.prompt_style(),
        &subject_text(options),
    )];

    if let Some(text) = options.lighting().and_then(lighting_clause) {
        segments.push(format!("Lighting: {text}"));
    }
    if let Some(text) = options.camera().and_then(camera_clause) {
        segments.push(format!("Camera: {text}"));
    }
    if options.include_scene_context {
        if let Some(context) = scene_context
            .map(str::trim)
            .filter(|value| !value.is_empty())
        {
            segments.push(format!("Scene context: {context}"));
        }
    }
    if let Some(quality) = options.quality() {
        segments.push(format!("Quality: {}", quality_clause(quality)));
    }
    if let Some(ratio) = options.aspect_ratio() {
        segments.push(format!("Composition: {}", composition_clause(ratio)));
    }

    segments.join(CLAUSE_SEPARATOR)
}

/// Primary prompt, then the legacy prompt field, then a fixed default.
pub fn subject_text(options: &GenerationOptions) -> String {
    [options.prompt.as_str(), options.legacy_prompt.as_str()]
        .into_iter()
        .map(str::trim)
        .find(|value| !value.is_empty())
        .unwrap_or(DEFAULT_SUBJECT)
        .to_string()
}

pub fn apply_style_template(style: PromptStyle, subject: &str) -> String {
    match style {
        PromptStyle::Custom => subject.to_string(),
        PromptStyle::Photorealistic => format!(
            "A photorealistic scene of {subject}, captured with professional camera equipment, emphasizing natural lighting and fine details"
        ),
        PromptStyle::Artistic => format!(
            "A stylized artistic illustration of {subject}, featuring creative interpretation and enhanced visual appeal"
        ),
        PromptStyle::Product => format!(
            "A high-resolution, studio-lit product photograph of {subject}, with clean background and professional lighting setup to showcase key features"
        ),
        PromptStyle::Minimalist => format!(
            "A minimalist composition featuring {subject}, with significant negative space, clean lines, and subtle lighting"
        ),
        PromptStyle::Comic => format!(
            "A comic book style panel showing {subject}, with bold lines, dynamic composition and vivid colors"
        ),
    }
}

pub fn lighting_clause(lighting: Lighting) -> Option<&'static str> {
    match lighting {
        Lighting::Auto => None,
        Lighting::Natural => Some("natural sunlight, soft daylight illumination"),
        Lighting::Studio => Some("professional studio lighting, three-point lighting setup"),
        Lighting::Cinematic => Some("dramatic cinematic lighting with strong contrast"),
        Lighting::GoldenHour => Some("warm golden hour lighting, soft sunset glow"),
        Lighting::BlueHour => Some("cool blue hour atmosphere, twilight ambiance"),
        Lighting::LowKey => Some("low key lighting, dramatic shadows and highlights"),
        Lighting::HighKey => Some("high key lighting, bright and evenly illuminated"),
    }
}

pub fn camera_clause(angle: CameraAngle) -> Option<&'static str> {
    match angle {
        CameraAngle::Auto => None,
        CameraAngle::EyeLevel => Some("eye-level perspective, natural human viewpoint"),
        CameraAngle::LowAngle => Some("low angle shot, looking up from below"),
        CameraAngle::HighAngle => Some("high angle shot, looking down from above"),
        CameraAngle::BirdsEye => Some("bird's eye view, top-down aerial perspective"),
        CameraAngle::WormsEye => Some("worm's eye view, extreme low angle upward"),
        CameraAngle::CloseUp => Some("close-up shot, detailed macro perspective"),
        CameraAngle::WideShot => Some("wide shot, expansive environmental view"),
    }
}

pub fn quality_clause(quality: Quality) -> &'static str {
    match quality {
        Quality::Low => "quick generation, basic quality",
        Quality::Medium => "balanced quality and detail, photorealistic",
        Quality::High => "high quality, ultra-detailed, professional photography, 8K resolution",
    }
}

pub fn composition_clause(ratio: AspectRatio) -> &'static str {
    match ratio {
        AspectRatio::Square => "square composition",
        AspectRatio::Portrait2x3 => "vertical portrait composition",
        AspectRatio::Landscape3x2 => "horizontal landscape composition",
        AspectRatio::Portrait3x4 => "portrait orientation",
        AspectRatio::Landscape4x3 => "landscape orientation",
        AspectRatio::Portrait4x5 => "portrait format",
        AspectRatio::Landscape5x4 => "landscape format",
        AspectRatio::Vertical9x16 => "vertical mobile format",
        AspectRatio::Widescreen16x9 => "widescreen cinematic format",
        AspectRatio::UltraWide21x9 => "ultra-wide cinematic format",
    }
}
