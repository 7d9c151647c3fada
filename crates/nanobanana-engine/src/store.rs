use std::fs::{self, OpenOptions};
use std::io::{ErrorKind as IoErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use nanobanana_contracts::artifacts::{
    artifact_file_name, format_analysis_report, sanitize_payload, ArtifactKind, ArtifactRecord,
};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::codec;
use crate::error::{Failure, Result};
use crate::raster::RasterImage;

const MAX_VERSION: u32 = 999;

/// Writes artifacts into one output directory. Existing files are never
/// replaced; a name collision bumps the version suffix instead.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn persist(&self, image: &RasterImage, kind: ArtifactKind) -> Result<ArtifactRecord> {
        self.persist_at(image, kind, Local::now())
    }

    pub fn persist_at(
        &self,
        image: &RasterImage,
        kind: ArtifactKind,
        stamp: DateTime<Local>,
    ) -> Result<ArtifactRecord> {
        let bytes = codec::encode_png(image)?;
        self.write_new(kind, stamp, &bytes)
    }

    /// Pretty-printed JSON with inline binary fields elided.
    pub fn persist_debug_payload(&self, raw_response: &Value) -> Result<ArtifactRecord> {
        let text = serde_json::to_string_pretty(&sanitize_payload(raw_response))
            .map_err(|err| Failure::persist(format!("debug payload serialization failed: {err}")))?;
        self.write_new(ArtifactKind::DebugResponse, Local::now(), text.as_bytes())
    }

    pub fn persist_analysis(&self, analysis: &str) -> Result<ArtifactRecord> {
        let stamp = Local::now();
        let report = format_analysis_report(analysis, &stamp);
        self.write_new(ArtifactKind::Analysis, stamp, report.as_bytes())
    }

    fn write_new(&self, kind: ArtifactKind, stamp: DateTime<Local>, bytes: &[u8]) -> Result<ArtifactRecord> {
        fs::create_dir_all(&self.dir).map_err(|err| {
            Failure::persist(format!("failed to create {}: {err}", self.dir.display()))
        })?;

        let mut version = None;
        loop {
            let path = self.dir.join(artifact_file_name(kind, &stamp, version));
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(bytes).and_then(|_| file.flush()).map_err(|err| {
                        Failure::persist(format!("failed to write {}: {err}", path.display()))
                    })?;
                    tracing::debug!(path = %path.display(), kind = %kind, "artifact written");
                    return Ok(ArtifactRecord {
                        path,
                        kind,
                        created_at: stamp,
                        version,
                        sha256: hex::encode(Sha256::digest(bytes)),
                        bytes: bytes.len() as u64,
                    });
                }
                Err(err) if err.kind() == IoErrorKind::AlreadyExists => {
                    let next = version.map_or(1, |current| current + 1);
                    if next > MAX_VERSION {
                        return Err(Failure::persist(format!(
                            "no free version left for {kind} artifacts at {}",
                            stamp.format("%Y%m%d_%H%M%S")
                        )));
                    }
                    version = Some(next);
                }
                Err(err) => {
                    return Err(Failure::persist(format!(
                        "failed to create {}: {err}",
                        path.display()
                    )))
                }
            }
        }
    }
}
