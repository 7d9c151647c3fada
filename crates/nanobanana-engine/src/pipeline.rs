use std::path::PathBuf;

use nanobanana_contracts::artifacts::{ArtifactKind, ArtifactRecord};
use nanobanana_contracts::events::{payload, EventLog};
use nanobanana_contracts::options::{push_unique_warning, GenerationOptions, ServiceMode};
use serde_json::{json, Value};

use crate::cancel::CancelToken;
use crate::capture::{CaptureChain, CaptureReport};
use crate::client::{Exchange, GeneratedImage, GenerationClient, GenerationRequest, GenerationResult};
use crate::config::{Credentials, EngineConfig};
use crate::error::{ErrorKind, Failure, Result};
use crate::raster::RasterImage;
use crate::renderer::{Renderer, SceneSummary};
use crate::store::ArtifactStore;

pub const EVENTS_FILE_NAME: &str = "events.jsonl";

#[derive(Debug, Clone)]
pub enum GenerationOutput {
    Image {
        image: GeneratedImage,
        artifact: Option<ArtifactRecord>,
    },
    /// Description returned in place of pixels; the raw response is kept as a
    /// debug artifact when it could be written.
    Text {
        text: String,
        debug_artifact: Option<ArtifactRecord>,
    },
}

impl GenerationOutput {
    pub fn kind(&self) -> &'static str {
        match self {
            GenerationOutput::Image { .. } => "image",
            GenerationOutput::Text { .. } => "text",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnalysisOutput {
    pub text: String,
    pub artifact: Option<ArtifactRecord>,
}

/// Everything one successful run produced. Non-fatal problems end up in
/// `warnings`.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub run_id: String,
    pub mode: ServiceMode,
    pub capture: CaptureReport,
    pub input_artifact: Option<ArtifactRecord>,
    pub prompt: Option<String>,
    pub generation: Option<GenerationOutput>,
    pub analysis: Option<AnalysisOutput>,
    pub warnings: Vec<String>,
}

/// capture → encode → prompt → request → decode → persist, once per call.
pub struct Pipeline {
    client: GenerationClient,
    capture: CaptureChain,
    store: ArtifactStore,
    events: EventLog,
}

impl Pipeline {
    pub fn new(config: &EngineConfig, output_dir: impl Into<PathBuf>) -> Result<Self> {
        let store = ArtifactStore::new(output_dir);
        let events = EventLog::new(store.dir().join(EVENTS_FILE_NAME));
        Ok(Self {
            client: GenerationClient::new(config)?,
            capture: CaptureChain::standard(config.capture_width, config.capture_height),
            store,
            events,
        })
    }

    pub fn with_capture_chain(mut self, capture: CaptureChain) -> Self {
        self.capture = capture;
        self
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn run(
        &self,
        renderer: &mut dyn Renderer,
        options: &GenerationOptions,
        mode: ServiceMode,
        credentials: Option<&Credentials>,
        cancel: &CancelToken,
    ) -> Result<PipelineOutcome> {
        let run = RunContext {
            events: self.events.for_run(nanobanana_contracts::events::new_run_id()),
        };
        let mut warnings = Vec::new();
        let options = options.clone().sanitized(&mut warnings);
        run.events.record(
            "run_started",
            payload(json!({
                "mode": mode.tag(),
                "aspect_ratio": options.aspect_ratio,
                "prompt_style": options.prompt_style,
                "lighting": options.lighting,
                "camera": options.camera,
                "quality": options.quality,
                "seed": options.seed,
                "steps": options.steps,
                "guidance_scale": options.guidance_scale,
                "include_scene_context": options.include_scene_context,
                "warnings": warnings,
            })),
        );

        let Some(credentials) = credentials else {
            return Err(run.fail(Failure::missing_credential()));
        };
        cancel.check().map_err(|failure| run.fail(failure))?;

        let capture = self.capture.capture(renderer).map_err(|failure| run.fail(failure))?;
        for attempt in &capture.report.failed_attempts {
            run.events.record(
                "capture_attempt_failed",
                payload(json!({"strategy": attempt.strategy, "error": attempt.message})),
            );
        }
        run.events.record(
            "capture_completed",
            payload(json!({
                "strategy": capture.report.strategy,
                "origin": capture.image.origin().as_str(),
                "degraded": capture.report.degraded,
                "width": capture.image.width(),
                "height": capture.image.height(),
            })),
        );
        if capture.report.degraded {
            push_unique_warning(
                &mut warnings,
                "Renderer capture failed; a synthetic placeholder image was sent instead of the scene."
                    .to_string(),
            );
        }

        let scene_context = options
            .include_scene_context
            .then(|| SceneSummary::from_renderer(&*renderer).describe());
        let input_artifact = self.persist_non_fatal(&run, &mut warnings, ArtifactKind::Input, || {
            self.store.persist(&capture.image, ArtifactKind::Input)
        });

        let analysis = if mode.wants_analysis() {
            cancel.check().map_err(|failure| run.fail(failure))?;
            match self.analyze(&run, &mut warnings, &capture.image, scene_context.as_deref(), credentials, cancel) {
                Ok(output) => Some(output),
                Err(failure) if mode == ServiceMode::Both && failure.kind != ErrorKind::Cancelled => {
                    tracing::warn!("analysis failed, continuing with generation: {failure}");
                    push_unique_warning(&mut warnings, format!("Analysis skipped: {failure}"));
                    None
                }
                Err(failure) => return Err(run.fail(failure)),
            }
        } else {
            None
        };

        let (prompt, generation) = if mode.wants_image() {
            cancel.check().map_err(|failure| run.fail(failure))?;
            let request = GenerationRequest::new(&capture.image, &options, scene_context.as_deref())
                .map_err(|failure| run.fail(failure))?;
            run.events.record(
                "prompt_built",
                payload(json!({"prompt": request.prompt, "chars": request.prompt.chars().count()})),
            );
            let output = self
                .generate(&run, &mut warnings, &request, credentials, cancel)
                .map_err(|failure| run.fail(failure))?;
            (Some(request.prompt), Some(output))
        } else {
            (None, None)
        };

        let generation_kind = generation.as_ref().map(GenerationOutput::kind);
        run.events.record(
            "run_finished",
            payload(json!({
                "degraded_capture": capture.report.degraded,
                "generation": generation_kind,
                "analysis": analysis.is_some(),
                "warnings": warnings,
            })),
        );

        Ok(PipelineOutcome {
            run_id: run.events.run_id().to_string(),
            mode,
            capture: capture.report,
            input_artifact,
            prompt,
            generation,
            analysis,
            warnings,
        })
    }

    fn generate(
        &self,
        run: &RunContext,
        warnings: &mut Vec<String>,
        request: &GenerationRequest,
        credentials: &Credentials,
        cancel: &CancelToken,
    ) -> Result<GenerationOutput> {
        run.events.record(
            "request_sent",
            payload(json!({
                "purpose": "generate",
                "endpoint": self.client.endpoint(),
                "timeout_s": self.client.timeout().as_secs_f64(),
                "image_base64_chars": request.encoded_image.len(),
            })),
        );
        let exchange = self.client.send(&self.client.build_payload(request), credentials, cancel);
        record_response(run, "generate", &exchange);
        cancel.check()?;

        let Exchange {
            result,
            raw_response,
            ..
        } = exchange;
        match result {
            GenerationResult::Image(image) => {
                let artifact = self.persist_non_fatal(run, warnings, ArtifactKind::Result, || {
                    self.store.persist(&image.image, ArtifactKind::Result)
                });
                Ok(GenerationOutput::Image { image, artifact })
            }
            GenerationResult::Text(text) => {
                tracing::warn!("generation returned text instead of an image");
                let debug_artifact = self.persist_debug(run, warnings, raw_response.as_ref());
                Ok(GenerationOutput::Text { text, debug_artifact })
            }
            GenerationResult::Failure(failure) => {
                self.persist_debug(run, warnings, raw_response.as_ref());
                Err(failure)
            }
        }
    }

    fn analyze(
        &self,
        run: &RunContext,
        warnings: &mut Vec<String>,
        image: &RasterImage,
        scene_context: Option<&str>,
        credentials: &Credentials,
        cancel: &CancelToken,
    ) -> Result<AnalysisOutput> {
        run.events.record(
            "request_sent",
            payload(json!({
                "purpose": "analyze",
                "endpoint": self.client.endpoint(),
                "timeout_s": self.client.timeout().as_secs_f64(),
            })),
        );
        let exchange = self.client.analyze_exchange(image, scene_context, credentials, cancel);
        record_response(run, "analyze", &exchange);
        cancel.check()?;

        match exchange.result {
            GenerationResult::Text(text) => {
                let artifact = self.persist_non_fatal(run, warnings, ArtifactKind::Analysis, || {
                    self.store.persist_analysis(&text)
                });
                Ok(AnalysisOutput { text, artifact })
            }
            GenerationResult::Image(_) => {
                self.persist_debug(run, warnings, exchange.raw_response.as_ref());
                Err(Failure::new(
                    ErrorKind::NoContent,
                    "analysis response carried an image but no text",
                ))
            }
            GenerationResult::Failure(failure) => {
                self.persist_debug(run, warnings, exchange.raw_response.as_ref());
                Err(failure)
            }
        }
    }

    fn persist_debug(
        &self,
        run: &RunContext,
        warnings: &mut Vec<String>,
        raw_response: Option<&Value>,
    ) -> Option<ArtifactRecord> {
        let raw = raw_response?;
        self.persist_non_fatal(run, warnings, ArtifactKind::DebugResponse, || {
            self.store.persist_debug_payload(raw)
        })
    }

    fn persist_non_fatal(
        &self,
        run: &RunContext,
        warnings: &mut Vec<String>,
        kind: ArtifactKind,
        write: impl FnOnce() -> Result<ArtifactRecord>,
    ) -> Option<ArtifactRecord> {
        match write() {
            Ok(record) => {
                tracing::info!(kind = %kind, path = %record.path.display(), "artifact saved");
                run.events.record(
                    "artifact_saved",
                    payload(json!({
                        "kind": kind.as_str(),
                        "path": record.path.to_string_lossy(),
                        "sha256": record.sha256,
                        "bytes": record.bytes,
                    })),
                );
                Some(record)
            }
            Err(failure) => {
                tracing::warn!(kind = %kind, "artifact not saved: {failure}");
                run.events.record(
                    "artifact_save_failed",
                    payload(json!({"kind": kind.as_str(), "error": failure.to_string()})),
                );
                push_unique_warning(warnings, format!("Could not save {kind} artifact: {failure}"));
                None
            }
        }
    }
}

struct RunContext {
    events: EventLog,
}

impl RunContext {
    fn fail(&self, failure: Failure) -> Failure {
        tracing::error!(kind = %failure.kind, "run failed: {}", failure.message);
        self.events.record(
            "run_failed",
            payload(json!({
                "kind": failure.kind.as_str(),
                "http_status": failure.kind.http_status(),
                "error": failure.message,
            })),
        );
        failure
    }
}

fn record_response(run: &RunContext, purpose: &str, exchange: &Exchange) {
    let mut event = json!({
        "purpose": purpose,
        "status": exchange.status,
        "result": exchange.result.kind(),
    });
    if let GenerationResult::Failure(failure) = &exchange.result {
        event["error_kind"] = Value::String(failure.kind.as_str().to_string());
    }
    run.events.record("response_received", payload(event));
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::time::Duration;

    use nanobanana_contracts::options::{GenerationOptions, ServiceMode};
    use serde_json::{json, Value};

    use super::{GenerationOutput, Pipeline, EVENTS_FILE_NAME};
    use crate::cancel::CancelToken;
    use crate::codec;
    use crate::config::{Credentials, EngineConfig};
    use crate::error::ErrorKind;
    use crate::renderer::Renderer;
    use crate::test_support::{
        json_response, query_value, solid_image, FakeRenderOutput, FakeRenderer, MockApi,
    };
    use wiremock::ResponseTemplate;

    fn pipeline_for(server: &MockApi, out_dir: &std::path::Path) -> anyhow::Result<Pipeline> {
        let config = EngineConfig {
            api_base: server.base_url(),
            ..EngineConfig::default()
        }
        .with_timeout(Duration::from_secs(10));
        Ok(Pipeline::new(&config, out_dir)?)
    }

    fn working_renderer() -> anyhow::Result<FakeRenderer> {
        Ok(FakeRenderer {
            meshes: 2,
            lights: 1,
            cameras: 1,
            render_output: FakeRenderOutput::Write(solid_image(8, 8, [40, 80, 120, 255])?),
            ..FakeRenderer::default()
        })
    }

    fn image_response() -> anyhow::Result<ResponseTemplate> {
        let png = codec::encode_png(&solid_image(4, 4, [250, 10, 10, 255])?)?;
        Ok(json_response(
            200,
            json!({"candidates": [{"content": {"parts": [
                {"inlineData": {"mimeType": "image/png", "data": codec::encode_base64(&png)}}
            ]}}]}),
        ))
    }

    fn event_types(out_dir: &std::path::Path) -> anyhow::Result<Vec<String>> {
        let text = fs::read_to_string(out_dir.join(EVENTS_FILE_NAME))?;
        let mut types = Vec::new();
        for line in text.lines() {
            let event: Value = serde_json::from_str(line)?;
            types.push(event["type"].as_str().unwrap_or_default().to_string());
        }
        Ok(types)
    }

    fn credentials() -> Credentials {
        Credentials::new("pipeline-key").expect("non-empty key")
    }

    #[test]
    fn generate_run_persists_input_and_result() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let out_dir = temp.path().join("NanoBanana");
        let server = MockApi::start(image_response()?)?;
        let pipeline = pipeline_for(&server, &out_dir)?;
        let mut renderer = working_renderer()?;
        let before = renderer.config();
        let options = GenerationOptions {
            prompt: "a red cube".to_string(),
            ..GenerationOptions::default()
        };

        let outcome = pipeline.run(
            &mut renderer,
            &options,
            ServiceMode::Generate,
            Some(&credentials()),
            &CancelToken::new(),
        )?;

        assert!(!outcome.capture.degraded);
        assert_eq!(renderer.config(), before);
        let prompt = outcome.prompt.clone().unwrap_or_default();
        assert!(prompt.contains("Scene context: Scene with 2 meshes, 1 lights, 1 cameras"));
        let Some(GenerationOutput::Image { image, artifact }) = outcome.generation else {
            panic!("expected an image result");
        };
        assert_eq!(image.image.pixel(0, 0), Some([250, 10, 10, 255]));
        let artifact = artifact.expect("result persisted");
        assert!(artifact.path.starts_with(&out_dir));
        assert_eq!(codec::load_file(&artifact.path)?.pixel(3, 3), Some([250, 10, 10, 255]));
        assert!(outcome.input_artifact.is_some());

        let types = event_types(&out_dir)?;
        assert_eq!(types.first().map(String::as_str), Some("run_started"));
        assert_eq!(types.last().map(String::as_str), Some("run_finished"));
        assert!(types.iter().any(|kind| kind == "prompt_built"));

        let captured = server.only_request()?;
        assert!(!fs::read_to_string(out_dir.join(EVENTS_FILE_NAME))?.contains("pipeline-key"));
        assert_eq!(query_value(&captured, "key").as_deref(), Some("pipeline-key"));
        Ok(())
    }

    #[test]
    fn missing_credential_fails_before_capture() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let server = MockApi::start(image_response()?)?;
        let pipeline = pipeline_for(&server, temp.path())?;
        let mut renderer = working_renderer()?;

        let err = pipeline
            .run(
                &mut renderer,
                &GenerationOptions::default(),
                ServiceMode::Generate,
                None,
                &CancelToken::new(),
            )
            .expect_err("no credentials");

        assert_eq!(err.kind, ErrorKind::MissingCredential);
        assert!(renderer.render_calls.is_empty());
        assert!(event_types(temp.path())?.contains(&"run_failed".to_string()));
        Ok(())
    }

    #[test]
    fn degraded_capture_is_reported() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let server = MockApi::start(image_response()?)?;
        let pipeline = pipeline_for(&server, temp.path())?;
        let mut renderer = FakeRenderer::default();

        let outcome = pipeline.run(
            &mut renderer,
            &GenerationOptions::default(),
            ServiceMode::Generate,
            Some(&credentials()),
            &CancelToken::new(),
        )?;

        assert!(outcome.capture.degraded);
        assert_eq!(outcome.capture.strategy, "synthetic-pattern");
        assert!(outcome.warnings.iter().any(|warning| warning.contains("synthetic placeholder")));
        server.only_request()?;
        Ok(())
    }

    #[test]
    fn text_response_keeps_debug_payload() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let server = MockApi::start(json_response(
            200,
            json!({"candidates": [{"content": {"parts": [{"text": "I can only describe it."}]}}]}),
        ))?;
        let pipeline = pipeline_for(&server, temp.path())?;
        let mut renderer = working_renderer()?;

        let outcome = pipeline.run(
            &mut renderer,
            &GenerationOptions::default(),
            ServiceMode::Generate,
            Some(&credentials()),
            &CancelToken::new(),
        )?;

        match outcome.generation {
            Some(GenerationOutput::Text { text, debug_artifact }) => {
                assert_eq!(text, "I can only describe it.");
                let path = debug_artifact.expect("debug payload persisted").path;
                assert!(fs::read_to_string(path)?.contains("I can only describe it."));
            }
            other => panic!("expected text output, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn http_error_fails_the_run_without_result_artifact() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let server = MockApi::start(json_response(
            503,
            json!({"error": {"code": 503, "message": "overloaded"}}),
        ))?;
        let pipeline = pipeline_for(&server, temp.path())?;
        let mut renderer = working_renderer()?;

        let err = pipeline
            .run(
                &mut renderer,
                &GenerationOptions::default(),
                ServiceMode::Generate,
                Some(&credentials()),
                &CancelToken::new(),
            )
            .expect_err("server error is terminal");

        assert_eq!(err.kind, ErrorKind::Http(503));
        let names: Vec<String> = fs::read_dir(temp.path())?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().to_string())
            .collect();
        assert!(!names.iter().any(|name| name.starts_with("result_")));
        assert!(names.iter().any(|name| name.starts_with("debug-response_")));
        Ok(())
    }

    #[test]
    fn cancelled_token_stops_before_capture() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let server = MockApi::start(image_response()?)?;
        let pipeline = pipeline_for(&server, temp.path())?;
        let mut renderer = working_renderer()?;
        let cancel = CancelToken::new();
        cancel.cancel();

        let err = pipeline
            .run(
                &mut renderer,
                &GenerationOptions::default(),
                ServiceMode::Generate,
                Some(&credentials()),
                &cancel,
            )
            .expect_err("cancelled");

        assert_eq!(err.kind, ErrorKind::Cancelled);
        assert!(renderer.render_calls.is_empty());
        Ok(())
    }

    #[test]
    fn both_mode_runs_analysis_then_generation() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let server = MockApi::start_sequence(vec![
            json_response(
                200,
                json!({"candidates": [{"content": {"parts": [{"text": "Add a warm key light."}]}}]}),
            ),
            image_response()?,
        ])?;
        let pipeline = pipeline_for(&server, temp.path())?;
        let mut renderer = working_renderer()?;

        let outcome = pipeline.run(
            &mut renderer,
            &GenerationOptions::default(),
            ServiceMode::Both,
            Some(&credentials()),
            &CancelToken::new(),
        )?;

        let analysis = outcome.analysis.expect("analysis text");
        assert_eq!(analysis.text, "Add a warm key light.");
        assert!(analysis.artifact.is_some_and(|record| record.path.extension().is_some_and(|ext| ext == "md")));
        assert!(matches!(outcome.generation, Some(GenerationOutput::Image { .. })));

        let requests = server.received()?;
        assert_eq!(requests.len(), 2);
        let first: Value = serde_json::from_slice(&requests[0].body)?;
        let second: Value = serde_json::from_slice(&requests[1].body)?;
        assert_eq!(first["generationConfig"]["response_modalities"], json!(["Text"]));
        assert_eq!(second["generationConfig"]["response_modalities"], json!(["Image"]));
        Ok(())
    }

    #[test]
    fn analyze_only_failure_is_terminal() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let server = MockApi::start(json_response(200, json!({"candidates": []})))?;
        let pipeline = pipeline_for(&server, temp.path())?;
        let mut renderer = working_renderer()?;

        let err = pipeline
            .run(
                &mut renderer,
                &GenerationOptions::default(),
                ServiceMode::Analyze,
                Some(&credentials()),
                &CancelToken::new(),
            )
            .expect_err("no content");

        assert_eq!(err.kind, ErrorKind::NoContent);
        Ok(())
    }

    #[test]
    fn unwritable_output_dir_keeps_the_in_memory_result() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let blocker = temp.path().join("not-a-dir");
        fs::write(&blocker, "plain file")?;
        let server = MockApi::start(image_response()?)?;
        let pipeline = pipeline_for(&server, &blocker.join("out"))?;
        let mut renderer = working_renderer()?;

        let outcome = pipeline.run(
            &mut renderer,
            &GenerationOptions::default(),
            ServiceMode::Generate,
            Some(&credentials()),
            &CancelToken::new(),
        )?;

        let Some(GenerationOutput::Image { image, artifact }) = outcome.generation else {
            panic!("expected an image result");
        };
        assert!(artifact.is_none());
        assert_eq!(image.image.pixel(0, 0), Some([250, 10, 10, 255]));
        assert!(outcome.input_artifact.is_none());
        assert!(outcome
            .warnings
            .iter()
            .any(|warning| warning.starts_with("Could not save result artifact")));
        assert!(outcome
            .warnings
            .iter()
            .any(|warning| warning.starts_with("Could not save input artifact")));
        assert!(!blocker.join("out").exists());
        Ok(())
    }
}
