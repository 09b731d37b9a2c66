//! Image rendering through an external program.
//!
//! The program receives a JSON [`RenderRequest`] on stdin and the output
//! image path as its last argument.

use super::ArtifactKind;
use async_trait::async_trait;
use pairwatch_core::domain::PricePoint;
use serde::Serialize;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to start renderer '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("renderer i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("renderer exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("renderer timed out after {0:?}")]
    Timeout(Duration),

    #[error("renderer produced no image")]
    NoOutput,

    #[error("encoding render request: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Everything the renderer needs to draw one image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderRequest {
    pub kind: ArtifactKind,
    pub pair: String,
    pub window_days: u32,
    pub prices: Vec<PricePoint>,
    /// Forecast payload from the model service, passed through as-is.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forecast: Option<serde_json::Value>,
}

#[async_trait]
pub trait ArtifactRenderer: Send + Sync {
    /// Write an image for `request` to `output`.
    async fn render(&self, request: &RenderRequest, output: &Path) -> Result<(), RenderError>;
}

pub struct CommandRenderer {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandRenderer {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    async fn run(&self, input: Vec<u8>, output: &Path) -> Result<(), RenderError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(output)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| RenderError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        // A renderer that exits without reading stdin is judged by its status.
        if let Some(mut stdin) = child.stdin.take() {
            let written = match stdin.write_all(&input).await {
                Ok(()) => stdin.shutdown().await,
                Err(e) => Err(e),
            };
            if let Err(e) = written {
                if e.kind() != std::io::ErrorKind::BrokenPipe {
                    return Err(e.into());
                }
            }
        }

        let result = child.wait_with_output().await?;
        if !result.status.success() {
            return Err(RenderError::Failed {
                status: result.status.to_string(),
                stderr: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ArtifactRenderer for CommandRenderer {
    async fn render(&self, request: &RenderRequest, output: &Path) -> Result<(), RenderError> {
        let input = serde_json::to_vec(request)?;
        tokio::time::timeout(self.timeout, self.run(input, output))
            .await
            .map_err(|_| RenderError::Timeout(self.timeout))??;

        let size = tokio::fs::metadata(output).await.map(|m| m.len()).unwrap_or(0);
        if size == 0 {
            return Err(RenderError::NoOutput);
        }
        debug!(pair = %request.pair, kind = ?request.kind, bytes = size, "artifact rendered");
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn request() -> RenderRequest {
        RenderRequest {
            kind: ArtifactKind::Chart,
            pair: "bitcoin-usd".into(),
            window_days: 7,
            prices: vec![PricePoint(1, 2.0)],
            forecast: None,
        }
    }

    #[tokio::test]
    async fn copies_stdin_into_output() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("chart.png");
        let renderer = CommandRenderer::new(
            "sh",
            vec!["-c".into(), "cat > \"$0\"".into()],
            Duration::from_secs(10),
        );

        renderer.render(&request(), &output).await.unwrap();

        let written = std::fs::read_to_string(&output).unwrap();
        let json: serde_json::Value = serde_json::from_str(&written).unwrap();
        assert_eq!(json["pair"], "bitcoin-usd");
        assert_eq!(json["kind"], "chart");
        assert_eq!(json["prices"][0][1], 2.0);
    }

    #[tokio::test]
    async fn non_zero_exit_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = CommandRenderer::new(
            "sh",
            vec!["-c".into(), "echo boom >&2; exit 3".into()],
            Duration::from_secs(10),
        );
        let err = renderer
            .render(&request(), &dir.path().join("x.png"))
            .await
            .unwrap_err();
        assert!(matches!(err, RenderError::Failed { ref stderr, .. } if stderr == "boom"));
    }

    #[tokio::test]
    async fn missing_image_is_no_output() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = CommandRenderer::new("true", Vec::new(), Duration::from_secs(10));
        let err = renderer
            .render(&request(), &dir.path().join("x.png"))
            .await
            .unwrap_err();
        assert!(matches!(err, RenderError::NoOutput));
    }

    #[tokio::test]
    async fn unknown_program_is_spawn_error() {
        let renderer =
            CommandRenderer::new("/nonexistent/renderer", Vec::new(), Duration::from_secs(10));
        let err = renderer
            .render(&request(), Path::new("/tmp/never.png"))
            .await
            .unwrap_err();
        assert!(matches!(err, RenderError::Spawn { .. }));
    }
}
