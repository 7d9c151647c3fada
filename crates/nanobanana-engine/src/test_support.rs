use std::path::Path;

use anyhow::{bail, Context};
use serde_json::Value;
use tokio::runtime::Runtime;
use wiremock::matchers::{method, path_regex};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

use crate::codec;
use crate::raster::{ImageOrigin, RasterImage};
use crate::renderer::{ObjectKind, Renderer, RendererConfig};

pub fn solid_image(width: u32, height: u32, rgba: [u8; 4]) -> crate::error::Result<RasterImage> {
    let pixels = rgba
        .iter()
        .copied()
        .cycle()
        .take(width as usize * height as usize * 4)
        .collect();
    RasterImage::from_rgba(width, height, pixels, ImageOrigin::Render)
}

#[derive(Debug, Clone)]
pub enum FakeRenderOutput {
    Write(RasterImage),
    Fail(String),
    /// Reports success without writing anything.
    Skip,
}

#[derive(Debug)]
pub struct FakeRenderer {
    pub config: RendererConfig,
    pub meshes: usize,
    pub lights: usize,
    pub cameras: usize,
    pub world_lighting: bool,
    pub in_memory: Option<RasterImage>,
    pub render_output: FakeRenderOutput,
    /// `set_config` calls numbered from this value on fail.
    pub fail_set_config_from: Option<usize>,
    pub set_config_calls: usize,
    pub render_calls: Vec<RendererConfig>,
}

impl Default for FakeRenderer {
    fn default() -> Self {
        Self {
            config: RendererConfig::default(),
            meshes: 0,
            lights: 0,
            cameras: 0,
            world_lighting: false,
            in_memory: None,
            render_output: FakeRenderOutput::Fail("fake renderer has no camera".to_string()),
            fail_set_config_from: None,
            set_config_calls: 0,
            render_calls: Vec::new(),
        }
    }
}

impl Renderer for FakeRenderer {
    fn config(&self) -> RendererConfig {
        self.config.clone()
    }

    fn set_config(&mut self, config: &RendererConfig) -> anyhow::Result<()> {
        self.set_config_calls += 1;
        if self
            .fail_set_config_from
            .is_some_and(|from| self.set_config_calls >= from)
        {
            bail!("renderer rejected configuration change");
        }
        self.config = config.clone();
        Ok(())
    }

    fn render_to_file(&mut self, path: &Path, _width: u32, _height: u32) -> anyhow::Result<()> {
        self.render_calls.push(self.config.clone());
        match &self.render_output {
            FakeRenderOutput::Write(image) => {
                std::fs::write(path, codec::encode_png(image)?)?;
                Ok(())
            }
            FakeRenderOutput::Fail(message) => bail!("{message}"),
            FakeRenderOutput::Skip => Ok(()),
        }
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

/// Gemini stand-in served by `wiremock`. The runtime only drives setup and
/// inspection; requests come from the blocking client on the test thread.
pub struct MockApi {
    server: MockServer,
    runtime: Runtime,
}

impl MockApi {
    pub fn start(response: ResponseTemplate) -> anyhow::Result<Self> {
        Self::start_sequence(vec![response])
    }

    /// Each response answers exactly one `generateContent` call, in order.
    pub fn start_sequence(responses: Vec<ResponseTemplate>) -> anyhow::Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()?;
        let server = runtime.block_on(async {
            let server = MockServer::start().await;
            for response in responses {
                Mock::given(method("POST"))
                    .and(path_regex(r":generateContent$"))
                    .respond_with(response)
                    .up_to_n_times(1)
                    .mount(&server)
                    .await;
            }
            server
        });
        Ok(Self { server, runtime })
    }

    pub fn base_url(&self) -> String {
        format!("{}/v1beta", self.server.uri())
    }

    pub fn received(&self) -> anyhow::Result<Vec<Request>> {
        self.runtime
            .block_on(self.server.received_requests())
            .context("request recording is disabled")
    }

    pub fn only_request(&self) -> anyhow::Result<Request> {
        let mut requests = self.received()?;
        if requests.len() != 1 {
            bail!("expected one request, saw {}", requests.len());
        }
        requests.pop().context("mock server saw no request")
    }
}

pub fn json_response(status: u16, body: Value) -> ResponseTemplate {
    ResponseTemplate::new(status).set_body_json(body)
}

pub fn query_value(request: &Request, name: &str) -> Option<String> {
    request
        .url
        .query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}
