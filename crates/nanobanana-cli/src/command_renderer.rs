use std::path::Path;
use std::process::Command;

use anyhow::{bail, Context, Result};
use nanobanana_engine::codec;
use nanobanana_engine::raster::RasterImage;
use nanobanana_engine::renderer::{ObjectKind, Renderer, RendererConfig};

/// Renderer backed by an external command that writes a PNG.
///
/// The command template may reference `{output}`, `{width}`, `{height}` and
/// `{engine}`; each word is substituted after shell-style splitting, so paths
/// with spaces survive intact.
#[derive(Debug)]
pub struct CommandRenderer {
    template: Option<Vec<String>>,
    config: RendererConfig,
    in_memory: Option<RasterImage>,
    meshes: usize,
    lights: usize,
    cameras: usize,
    world_lighting: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SceneCounts {
    pub meshes: usize,
    pub lights: usize,
    pub cameras: usize,
    pub world_lighting: bool,
}

impl CommandRenderer {
    pub fn new(
        render_cmd: Option<&str>,
        input: Option<&Path>,
        engine: Option<&str>,
        counts: SceneCounts,
    ) -> Result<Self> {
        let template = match render_cmd.map(str::trim).filter(|raw| !raw.is_empty()) {
            Some(raw) => {
                let words = shell_words::split(raw)
                    .with_context(|| format!("could not parse render command: {raw}"))?;
                if words.is_empty() {
                    bail!("render command is empty");
                }
                Some(words)
            }
            None => None,
        };
        let in_memory = match input {
            Some(path) => Some(
                codec::load_file(path)
                    .with_context(|| format!("failed to load input image {}", path.display()))?,
            ),
            None => None,
        };
        let mut config = RendererConfig::default();
        if let Some(engine) = engine.map(str::trim).filter(|value| !value.is_empty()) {
            config.engine = engine.to_ascii_uppercase();
        }
        Ok(Self {
            template,
            config,
            in_memory,
            meshes: counts.meshes,
            lights: counts.lights,
            cameras: counts.cameras,
            world_lighting: counts.world_lighting,
        })
    }

    fn command_words(&self, output: &Path, width: u32, height: u32) -> Option<Vec<String>> {
        let template = self.template.as_ref()?;
        let output = output.to_string_lossy();
        Some(
            template
                .iter()
                .map(|word| {
                    word.replace("{output}", &output)
                        .replace("{width}", &width.to_string())
                        .replace("{height}", &height.to_string())
                        .replace("{engine}", &self.config.engine)
                })
                .collect(),
        )
    }
}

impl Renderer for CommandRenderer {
    fn config(&self) -> RendererConfig {
        self.config.clone()
    }

    fn set_config(&mut self, config: &RendererConfig) -> Result<()> {
        self.config = config.clone();
        Ok(())
    }

    fn render_to_file(&mut self, path: &Path, width: u32, height: u32) -> Result<()> {
        let Some(words) = self.command_words(path, width, height) else {
            bail!("no render command configured");
        };
        let (program, args) = words
            .split_first()
            .context("render command is empty")?;
        tracing::info!(program = %program, "running render command");
        let output = Command::new(program)
            .args(args)
            .output()
            .with_context(|| format!("failed to launch {program}"))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "render command exited with {}: {}",
                output.status,
                stderr.trim()
            );
        }
        Ok(())
    }

    fn in_memory_result(&self) -> Option<&RasterImage> {
        self.in_memory.as_ref()
    }

    fn count_objects(&self, kind: ObjectKind) -> usize {
        match kind {
            ObjectKind::Mesh => self.meshes,
            ObjectKind::Light => self.lights,
            ObjectKind::Camera => self.cameras,
        }
    }

    fn has_world_lighting(&self) -> bool {
        self.world_lighting
    }
}
