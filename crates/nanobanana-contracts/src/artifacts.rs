use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Local};
use serde::Serialize;
use serde_json::{Map, Value};

pub const ARTIFACT_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactKind {
    Input,
    Result,
    DebugResponse,
    Analysis,
}

impl ArtifactKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ArtifactKind::Input => "input",
            ArtifactKind::Result => "result",
            ArtifactKind::DebugResponse => "debug-response",
            ArtifactKind::Analysis => "analysis",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ArtifactKind::Input | ArtifactKind::Result => "png",
            ArtifactKind::DebugResponse => "json",
            ArtifactKind::Analysis => "md",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A file written by the artifact store. Never rewritten once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactRecord {
    pub path: PathBuf,
    pub kind: ArtifactKind,
    pub created_at: DateTime<Local>,
    pub version: Option<u32>,
    pub sha256: String,
    pub bytes: u64,
}

/// `{kind}_{timestamp}.{ext}` for the first file, `{kind}_{timestamp}.{NNN}.{ext}`
/// for every later collision.
pub fn artifact_file_name(kind: ArtifactKind, stamp: &DateTime<Local>, version: Option<u32>) -> String {
    let base = format!("{}_{}", kind.as_str(), stamp.format(ARTIFACT_TIMESTAMP_FORMAT));
    match version {
        None => format!("{base}.{}", kind.extension()),
        Some(version) => format!("{base}.{version:03}.{}", kind.extension()),
    }
}

/// Replaces inline binary payloads with a short marker so debug dumps stay
/// readable. Keys are matched case-insensitively.
pub fn sanitize_payload(value: &Value) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::Bool(_) | Value::Number(_) | Value::String(_) => value.clone(),
        Value::Array(rows) => Value::Array(rows.iter().map(sanitize_payload).collect()),
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, row) in map {
                let lowered = key.to_ascii_lowercase();
                if matches!(lowered.as_str(), "data" | "b64_json" | "image_bytes") {
                    let marker = match row {
                        Value::String(raw) => format!("<omitted {} chars>", raw.len()),
                        _ => "<omitted>".to_string(),
                    };
                    out.insert(key.clone(), Value::String(marker));
                    continue;
                }
                out.insert(key.clone(), sanitize_payload(row));
            }
            Value::Object(out)
        }
    }
}

pub fn format_analysis_report(analysis: &str, generated_at: &DateTime<Local>) -> String {
    format!(
        "# NanoBanana Render Analysis\n\n**Generated:** {}\n\n## Analysis and suggestions\n\n{}\n",
        generated_at.format("%Y-%m-%d %H:%M:%S"),
        analysis.trim()
    )
}

#[cfg(test)]
mod tests {
    use chrono::{Local, TimeZone};
    use serde_json::json;

    use super::{artifact_file_name, format_analysis_report, sanitize_payload, ArtifactKind};

    #[test]
    fn file_names_follow_kind_timestamp_version_shape() {
        let stamp = Local
            .with_ymd_and_hms(2026, 3, 4, 5, 6, 7)
            .single()
            .expect("valid local time");
        assert_eq!(
            artifact_file_name(ArtifactKind::Input, &stamp, None),
            "input_20260304_050607.png"
        );
        assert_eq!(
            artifact_file_name(ArtifactKind::Result, &stamp, Some(2)),
            "result_20260304_050607.002.png"
        );
        assert_eq!(
            artifact_file_name(ArtifactKind::DebugResponse, &stamp, None),
            "debug-response_20260304_050607.json"
        );
    }

    #[test]
    fn sanitize_replaces_inline_data_recursively() {
        let payload = json!({
            "candidates": [{
                "content": {"parts": [
                    {"inlineData": {"mimeType": "image/png", "data": "QUJD"}},
                    {"text": "hello"}
                ]}
            }]
        });
        let cleaned = sanitize_payload(&payload);
        assert_eq!(
            cleaned["candidates"][0]["content"]["parts"][0]["inlineData"]["data"],
            json!("<omitted 4 chars>")
        );
        assert_eq!(
            cleaned["candidates"][0]["content"]["parts"][0]["inlineData"]["mimeType"],
            json!("image/png")
        );
        assert_eq!(
            cleaned["candidates"][0]["content"]["parts"][1]["text"],
            json!("hello")
        );
    }

    #[test]
    fn analysis_report_embeds_text() {
        let stamp = Local
            .with_ymd_and_hms(2026, 1, 2, 3, 4, 5)
            .single()
            .expect("valid local time");
        let report = format_analysis_report("  add a rim light \n", &stamp);
        assert!(report.starts_with("# NanoBanana Render Analysis"));
        assert!(report.contains("2026-01-02 03:04:05"));
        assert!(report.contains("add a rim light\n"));
    }
}
