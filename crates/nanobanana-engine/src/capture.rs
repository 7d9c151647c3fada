use std::path::{Path, PathBuf};

use anyhow::{bail, Context};

use crate::codec;
use crate::error::{error_chain_text, Failure, Result};
use crate::raster::{ImageOrigin, RasterImage};
use crate::renderer::{ConfigGuard, ObjectKind, Renderer};

pub const DEFAULT_CAPTURE_SIZE: u32 = 512;
const SLOW_ENGINE: &str = "CYCLES";
const FAST_ENGINE: &str = "BLENDER_EEVEE";
const CAPTURE_FILE_NAME: &str = "capture.png";

/// One way of producing the input image.
///
/// The chain hands each attempt a [`ConfigGuard`]; whatever the strategy
/// changes is reverted before the next strategy runs.
pub trait CaptureStrategy {
    fn name(&self) -> &str;
    fn attempt(&self, guard: &mut ConfigGuard<'_>, scratch: &Path) -> anyhow::Result<RasterImage>;
}

/// Rasterizes the current camera view into a scratch PNG and reads it back.
#[derive(Debug, Clone)]
pub struct RenderToFile {
    pub width: u32,
    pub height: u32,
}

impl Default for RenderToFile {
    fn default() -> Self {
        Self {
            width: DEFAULT_CAPTURE_SIZE,
            height: DEFAULT_CAPTURE_SIZE,
        }
    }
}

impl CaptureStrategy for RenderToFile {
    fn name(&self) -> &str {
        "render-to-file"
    }

    fn attempt(&self, guard: &mut ConfigGuard<'_>, scratch: &Path) -> anyhow::Result<RasterImage> {
        let path = scratch.join(CAPTURE_FILE_NAME);
        let mut config = guard.snapshot().clone();
        config.resolution_x = self.width;
        config.resolution_y = self.height;
        config.resolution_percentage = 100;
        config.output_path = Some(path.clone());
        config.file_format = "PNG".to_string();
        if config.engine.eq_ignore_ascii_case(SLOW_ENGINE) {
            config.engine = FAST_ENGINE.to_string();
        }

        match std::fs::remove_file(&path) {
            Ok(()) => tracing::debug!("removed stale capture {}", path.display()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(err).with_context(|| format!("stale capture {} is in the way", path.display()));
            }
        }
        guard
            .renderer()
            .set_config(&config)
            .context("failed to apply capture settings")?;
        guard
            .renderer()
            .render_to_file(&path, self.width, self.height)
            .context("renderer failed to write capture file")?;
        if !path.is_file() {
            bail!("renderer did not write {}", path.display());
        }
        let image = codec::load_file(&path)?;
        if let Err(err) = std::fs::remove_file(&path) {
            tracing::debug!("left scratch capture {} behind: {err}", path.display());
        }
        Ok(image.with_origin(ImageOrigin::Render))
    }
}

/// Copies the renderer's last in-memory result without touching disk.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCopy;

impl CaptureStrategy for InMemoryCopy {
    fn name(&self) -> &str {
        "in-memory-copy"
    }

    fn attempt(&self, guard: &mut ConfigGuard<'_>, _scratch: &Path) -> anyhow::Result<RasterImage> {
        let Some(result) = guard.renderer().in_memory_result() else {
            bail!("renderer holds no in-memory result");
        };
        let copy = RasterImage::from_rgba(
            result.width(),
            result.height(),
            result.pixels().to_vec(),
            ImageOrigin::Render,
        )?;
        Ok(copy)
    }
}

/// Deterministic gradient keyed on scene content. Always succeeds, so the
/// pipeline has something to send even for a misconfigured scene.
#[derive(Debug, Clone)]
pub struct SyntheticPattern {
    pub width: u32,
    pub height: u32,
}

impl Default for SyntheticPattern {
    fn default() -> Self {
        Self {
            width: DEFAULT_CAPTURE_SIZE,
            height: DEFAULT_CAPTURE_SIZE,
        }
    }
}

impl CaptureStrategy for SyntheticPattern {
    fn name(&self) -> &str {
        "synthetic-pattern"
    }

    fn attempt(&self, guard: &mut ConfigGuard<'_>, _scratch: &Path) -> anyhow::Result<RasterImage> {
        let meshes = guard.renderer().count_objects(ObjectKind::Mesh);
        let lights = guard.renderer().count_objects(ObjectKind::Light);
        Ok(synthetic_pattern(self.width, self.height, meshes, lights)?)
    }
}

pub fn synthetic_pattern(width: u32, height: u32, meshes: usize, lights: usize) -> Result<RasterImage> {
    let mesh_factor = (meshes as f32 / 5.0).min(1.0);
    let light_factor = (lights as f32 / 3.0).min(1.0);
    let mut channels = Vec::with_capacity(width as usize * height as usize * 4);
    for y in 0..height {
        for x in 0..width {
            let r = 0.4 + mesh_factor * 0.4 + (x as f32 / width as f32) * 0.2;
            let g = 0.3 + light_factor * 0.4 + (y as f32 / height as f32) * 0.3;
            let b = 0.5 + ((x + y) % 20) as f32 / 20.0 * 0.2;
            channels.extend_from_slice(&[r, g, b, 1.0]);
        }
    }
    RasterImage::from_normalized(width, height, &channels, ImageOrigin::FallbackPattern)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyFailure {
    pub strategy: String,
    pub message: String,
}

/// How the input image was obtained. `degraded` marks a synthetic stand-in
/// rather than actual renderer output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureReport {
    pub strategy: String,
    pub origin: ImageOrigin,
    pub degraded: bool,
    pub failed_attempts: Vec<StrategyFailure>,
}

#[derive(Debug, Clone)]
pub struct Capture {
    pub image: RasterImage,
    pub report: CaptureReport,
}

/// Ordered list of strategies; the first success wins.
pub struct CaptureChain {
    strategies: Vec<Box<dyn CaptureStrategy>>,
}

impl Default for CaptureChain {
    fn default() -> Self {
        Self::standard(DEFAULT_CAPTURE_SIZE, DEFAULT_CAPTURE_SIZE)
    }
}

impl CaptureChain {
    pub fn new(strategies: Vec<Box<dyn CaptureStrategy>>) -> Self {
        Self { strategies }
    }

    pub fn standard(width: u32, height: u32) -> Self {
        Self::new(vec![
            Box::new(RenderToFile { width, height }),
            Box::new(InMemoryCopy),
            Box::new(SyntheticPattern { width, height }),
        ])
    }

    pub fn strategy_names(&self) -> Vec<String> {
        self.strategies
            .iter()
            .map(|strategy| strategy.name().to_string())
            .collect()
    }

    pub fn capture(&self, renderer: &mut dyn Renderer) -> Result<Capture> {
        let scratch_dir = tempfile::Builder::new()
            .prefix("nanobanana-capture-")
            .tempdir();
        let scratch: PathBuf = match &scratch_dir {
            Ok(dir) => dir.path().to_path_buf(),
            Err(err) => {
                tracing::warn!("no private scratch directory for capture: {err}");
                std::env::temp_dir()
            }
        };

        let mut failed_attempts = Vec::new();
        for strategy in &self.strategies {
            let name = strategy.name().to_string();
            let mut guard = ConfigGuard::acquire(&mut *renderer);
            let outcome = strategy.attempt(&mut guard, &scratch);
            guard.release().map_err(|err| {
                Failure::capture(format!(
                    "renderer configuration could not be restored after {name}: {}",
                    error_chain_text(&err, 400)
                ))
            })?;

            match outcome {
                Ok(image) => {
                    let origin = image.origin();
                    tracing::info!(
                        strategy = %name,
                        width = image.width(),
                        height = image.height(),
                        origin = %origin,
                        "capture succeeded"
                    );
                    if origin == ImageOrigin::FallbackPattern {
                        tracing::warn!("input image is a synthetic fallback, not a real render");
                    }
                    return Ok(Capture {
                        image,
                        report: CaptureReport {
                            strategy: name,
                            origin,
                            degraded: origin == ImageOrigin::FallbackPattern,
                            failed_attempts,
                        },
                    });
                }
                Err(err) => {
                    let message = error_chain_text(&err, 400);
                    tracing::warn!(strategy = %name, "capture strategy failed: {message}");
                    failed_attempts.push(StrategyFailure {
                        strategy: name,
                        message,
                    });
                }
            }
        }

        let summary = failed_attempts
            .iter()
            .map(|failure| format!("{}: {}", failure.strategy, failure.message))
            .collect::<Vec<String>>()
            .join("; ");
        Err(Failure::capture(format!(
            "all {} capture strategies failed ({summary})",
            self.strategies.len()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::{
        synthetic_pattern, CaptureChain, CaptureStrategy, InMemoryCopy, RenderToFile,
        SyntheticPattern, CAPTURE_FILE_NAME,
    };
    use crate::error::ErrorKind;
    use crate::raster::{ImageOrigin, RasterImage};
    use crate::codec;
    use crate::renderer::{ConfigGuard, Renderer, RendererConfig};
    use crate::test_support::{solid_image, FakeRenderOutput, FakeRenderer};

    fn cycles_renderer() -> FakeRenderer {
        FakeRenderer {
            config: RendererConfig {
                resolution_x: 1920,
                resolution_y: 1080,
                resolution_percentage: 50,
                engine: "CYCLES".to_string(),
                output_path: Some("/renders/final.exr".into()),
                file_format: "OPEN_EXR".to_string(),
            },
            ..FakeRenderer::default()
        }
    }

    #[test]
    fn render_to_file_wins_and_restores_config() -> anyhow::Result<()> {
        let mut renderer = cycles_renderer();
        renderer.render_output = FakeRenderOutput::Write(solid_image(512, 512, [10, 20, 30, 255])?);
        let before = renderer.config();

        let capture = CaptureChain::default().capture(&mut renderer)?;

        assert_eq!(capture.report.strategy, "render-to-file");
        assert_eq!(capture.report.origin, ImageOrigin::Render);
        assert!(!capture.report.degraded);
        assert!(capture.report.failed_attempts.is_empty());
        assert_eq!(capture.image.pixel(0, 0), Some([10, 20, 30, 255]));

        let during = &renderer.render_calls[0];
        assert_eq!((during.resolution_x, during.resolution_y), (512, 512));
        assert_eq!(during.resolution_percentage, 100);
        assert_eq!(during.engine, "BLENDER_EEVEE");
        assert_eq!(during.file_format, "PNG");
        assert_eq!(renderer.config(), before);
        Ok(())
    }

    #[test]
    fn render_failure_falls_through_to_in_memory_copy() -> anyhow::Result<()> {
        let mut renderer = cycles_renderer();
        renderer.render_output = FakeRenderOutput::Fail("no camera".to_string());
        renderer.in_memory = Some(solid_image(4, 3, [1, 2, 3, 4])?);
        let before = renderer.config();

        let capture = CaptureChain::default().capture(&mut renderer)?;

        assert_eq!(capture.report.strategy, "in-memory-copy");
        assert_eq!(capture.report.failed_attempts.len(), 1);
        assert!(capture.report.failed_attempts[0].message.contains("no camera"));
        assert_eq!((capture.image.width(), capture.image.height()), (4, 3));
        assert_eq!(renderer.config(), before);
        assert_eq!(renderer.render_calls.len(), 1);
        Ok(())
    }

    #[test]
    fn missing_file_counts_as_failure() -> anyhow::Result<()> {
        let mut renderer = cycles_renderer();
        renderer.render_output = FakeRenderOutput::Skip;
        let before = renderer.config();

        let capture = CaptureChain::default().capture(&mut renderer)?;

        assert_eq!(capture.report.strategy, "synthetic-pattern");
        assert!(capture.report.degraded);
        assert_eq!(capture.report.failed_attempts.len(), 2);
        assert!(capture.report.failed_attempts[0].message.contains("did not write"));
        assert_eq!(renderer.config(), before);
        Ok(())
    }

    #[test]
    fn leftover_scratch_file_is_not_mistaken_for_a_render() -> anyhow::Result<()> {
        let scratch = tempfile::tempdir()?;
        let leftover = scratch.path().join(CAPTURE_FILE_NAME);
        std::fs::write(&leftover, codec::encode_png(&solid_image(2, 2, [7, 7, 7, 255])?)?)?;
        let mut renderer = cycles_renderer();
        renderer.render_output = FakeRenderOutput::Skip;

        let mut guard = ConfigGuard::acquire(&mut renderer);
        let outcome = RenderToFile::default().attempt(&mut guard, scratch.path());
        guard.release()?;

        let err = outcome.expect_err("nothing was rendered this time");
        assert!(err.to_string().contains("did not write"));
        assert!(!leftover.exists());
        Ok(())
    }

    #[test]
    fn exhausted_chain_is_a_capture_failure() -> anyhow::Result<()> {
        let mut renderer = cycles_renderer();
        renderer.render_output = FakeRenderOutput::Fail("boom".to_string());
        let before = renderer.config();
        let chain = CaptureChain::new(vec![Box::new(RenderToFile::default()), Box::new(InMemoryCopy)]);

        let err = chain.capture(&mut renderer).expect_err("no strategy can succeed");

        assert_eq!(err.kind, ErrorKind::Capture);
        assert!(err.message.contains("render-to-file"));
        assert!(err.message.contains("in-memory-copy"));
        assert_eq!(renderer.config(), before);
        Ok(())
    }

    #[test]
    fn unrestorable_config_aborts_the_chain() {
        let mut renderer = cycles_renderer();
        renderer.render_output = FakeRenderOutput::Fail("boom".to_string());
        renderer.fail_set_config_from = Some(2);

        let err = CaptureChain::default()
            .capture(&mut renderer)
            .expect_err("restore failure is terminal");

        assert_eq!(err.kind, ErrorKind::Capture);
        assert!(err.message.contains("could not be restored"));
    }

    #[test]
    fn synthetic_pattern_tracks_scene_counts() -> anyhow::Result<()> {
        let empty = synthetic_pattern(20, 20, 0, 0)?;
        let busy = synthetic_pattern(20, 20, 10, 6)?;
        assert_eq!(empty.origin(), ImageOrigin::FallbackPattern);
        // r = 0.4 at x=0 for an empty scene, 0.8 with five or more meshes
        assert_eq!(empty.pixel(0, 0).map(|px| px[0]), Some(102));
        assert_eq!(busy.pixel(0, 0).map(|px| px[0]), Some(204));
        assert!(busy.pixel(0, 0).map(|px| px[1]) > empty.pixel(0, 0).map(|px| px[1]));
        assert_eq!(empty.pixel(19, 19).map(|px| px[3]), Some(255));
        assert_eq!(synthetic_pattern(20, 20, 0, 0)?, empty);
        Ok(())
    }

    #[test]
    fn chain_order_is_inspectable() {
        assert_eq!(
            CaptureChain::default().strategy_names(),
            vec!["render-to-file", "in-memory-copy", "synthetic-pattern"]
        );
        let custom = CaptureChain::new(vec![Box::new(SyntheticPattern { width: 8, height: 8 })]);
        assert_eq!(custom.strategy_names(), vec!["synthetic-pattern"]);
    }

    #[test]
    fn in_memory_copy_is_independent_of_source() -> anyhow::Result<()> {
        let source = solid_image(2, 2, [9, 9, 9, 9])?;
        let mut renderer = FakeRenderer {
            in_memory: Some(source.clone()),
            render_output: FakeRenderOutput::Fail("off".to_string()),
            ..FakeRenderer::default()
        };
        let capture = CaptureChain::new(vec![Box::new(InMemoryCopy)]).capture(&mut renderer)?;
        assert_eq!(capture.image.pixels(), source.pixels());
        assert_eq!(
            renderer.in_memory.as_ref().map(RasterImage::pixels),
            Some(source.pixels())
        );
        Ok(())
    }
}
