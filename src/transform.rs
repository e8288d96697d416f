//! Clip transformation workflow against the RAVE server
//!
//! Strictly ordered, never retried: select the model, upload the source
//! clip, prepare the output directory, download the transformed result.
//! Each failure aborts the remaining steps and lands the job in `Error`;
//! a failed run must be explicitly re-triggered.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use reqwest::multipart::{Form, Part};
use tokio::sync::watch;

use crate::paths;
use crate::probe::http_client;
use crate::store::{Clip, ServerEndpoint};

/// The fixed set of server-side transformation styles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaveModel {
    Cats,
    Dabourka,
    Dogs,
    Jazz,
    Speech,
}

/// All selectable models, in display order.
pub const MODELS: [RaveModel; 5] = [
    RaveModel::Cats,
    RaveModel::Dabourka,
    RaveModel::Dogs,
    RaveModel::Jazz,
    RaveModel::Speech,
];

impl RaveModel {
    /// Server-side identifier, as used in the `/selectModel/{name}` path.
    pub fn as_str(&self) -> &'static str {
        match self {
            RaveModel::Cats => "cats",
            RaveModel::Dabourka => "dabourka",
            RaveModel::Dogs => "dogs",
            RaveModel::Jazz => "jazz",
            RaveModel::Speech => "speech",
        }
    }
}

impl std::fmt::Display for RaveModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RaveModel {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MODELS
            .iter()
            .find(|m| m.as_str() == s.trim().to_lowercase())
            .copied()
            .ok_or(())
    }
}

/// Observable state of one transform job.
#[derive(Debug, Clone, PartialEq)]
pub enum TransformState {
    Idle,
    Uploading,
    ServerProcessing,
    Downloading,
    Ready { result: PathBuf },
    Error { message: String },
}

#[derive(Debug)]
pub enum TransformError {
    /// `/selectModel` failed, by transport or by status.
    ModelSelection(String),
    /// The upload step failed: reading the source clip, transport, or a
    /// non-success status.
    Upload(String),
    /// Preparing the output location or fetching `/download` failed.
    Download(String),
}

impl std::fmt::Display for TransformError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransformError::ModelSelection(e) => write!(f, "Model selection failed: {}", e),
            TransformError::Upload(e) => write!(f, "Upload failed: {}", e),
            TransformError::Download(e) => write!(f, "Download failed: {}", e),
        }
    }
}

impl std::error::Error for TransformError {}

/// Run one transform job, publishing progress on `progress`. The final state
/// is always `Ready` or `Error`; intermediate states arrive in order and are
/// never revisited within one run.
pub async fn run_transform(
    endpoint: &ServerEndpoint,
    clip: &Clip,
    model: RaveModel,
    output_dir: &Path,
    progress: &watch::Sender<TransformState>,
) -> Result<PathBuf, TransformError> {
    match drive(endpoint, clip, model, output_dir, progress).await {
        Ok(result) => {
            log::info!("Transform ready: {:?}", result);
            let _ = progress.send(TransformState::Ready {
                result: result.clone(),
            });
            Ok(result)
        }
        Err(e) => {
            log::error!("Transform failed: {}", e);
            let _ = progress.send(TransformState::Error {
                message: e.to_string(),
            });
            Err(e)
        }
    }
}

async fn drive(
    endpoint: &ServerEndpoint,
    clip: &Clip,
    model: RaveModel,
    output_dir: &Path,
    progress: &watch::Sender<TransformState>,
) -> Result<PathBuf, TransformError> {
    let base = endpoint.base_url();
    let _ = progress.send(TransformState::Uploading);

    // Step 1: choose the active model on the server.
    let select_url = format!("{}/selectModel/{}", base, model.as_str());
    let response = http_client()
        .get(&select_url)
        .send()
        .await
        .map_err(|e| TransformError::ModelSelection(e.to_string()))?;
    if !response.status().is_success() {
        return Err(TransformError::ModelSelection(format!(
            "server returned HTTP {}",
            response.status().as_u16()
        )));
    }
    log::info!("Model selected: {}", model);

    // Step 2: upload the source clip, original filename as metadata.
    let file_bytes = tokio::fs::read(&clip.uri)
        .await
        .map_err(|e| TransformError::Upload(e.to_string()))?;
    let filename = clip
        .uri
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("recording.wav")
        .to_string();

    log::info!("Uploading {} ({} bytes)", filename, file_bytes.len());

    let file_part = Part::bytes(file_bytes)
        .file_name(filename.clone())
        .mime_str("audio/wav")
        .map_err(|e| TransformError::Upload(e.to_string()))?;
    let form = Form::new().part("file", file_part);

    let response = http_client()
        .post(format!("{}/upload", base))
        .header("filename", &filename)
        .multipart(form)
        .send()
        .await
        .map_err(|e| TransformError::Upload(e.to_string()))?;
    if !response.status().is_success() {
        return Err(TransformError::Upload(format!(
            "server returned HTTP {}",
            response.status().as_u16()
        )));
    }

    let _ = progress.send(TransformState::ServerProcessing);

    // Step 3: make sure the output directory exists (idempotent).
    tokio::fs::create_dir_all(output_dir)
        .await
        .map_err(|e| TransformError::Download(e.to_string()))?;

    // Step 4: fetch the transformed result into a freshly named file.
    let _ = progress.send(TransformState::Downloading);
    let response = http_client()
        .get(format!("{}/download", base))
        .send()
        .await
        .map_err(|e| TransformError::Download(e.to_string()))?;
    if !response.status().is_success() {
        return Err(TransformError::Download(format!(
            "server returned HTTP {}",
            response.status().as_u16()
        )));
    }
    let body = response
        .bytes()
        .await
        .map_err(|e| TransformError::Download(e.to_string()))?;

    let out_path = paths::generate_output_path(output_dir);
    tokio::fs::write(&out_path, &body)
        .await
        .map_err(|e| TransformError::Download(e.to_string()))?;

    Ok(out_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_names_match_the_server_contract() {
        let names: Vec<_> = MODELS.iter().map(|m| m.as_str()).collect();
        assert_eq!(names, vec!["cats", "dabourka", "dogs", "jazz", "speech"]);
    }

    #[test]
    fn model_parsing_is_case_insensitive_and_trimmed() {
        assert_eq!("Jazz".parse::<RaveModel>(), Ok(RaveModel::Jazz));
        assert_eq!(" cats ".parse::<RaveModel>(), Ok(RaveModel::Cats));
        assert!("techno".parse::<RaveModel>().is_err());
    }

    #[test]
    fn error_display_names_the_failed_step() {
        assert!(TransformError::ModelSelection("HTTP 404".into())
            .to_string()
            .contains("Model selection"));
        assert!(TransformError::Upload("HTTP 500".into())
            .to_string()
            .contains("Upload"));
        assert!(TransformError::Download("refused".into())
            .to_string()
            .contains("Download"));
    }
}
