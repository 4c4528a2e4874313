//! Encodeur de production : un sous-processus ffmpeg par piste.
//!
//! ffmpeg lit le fichier source au rythme réel (`-re`), le réencode en MP3
//! aux réglages de la station et écrit le flux sur sa sortie standard, lue
//! par blocs de `chunk_size` octets.

use crate::pipeline::{ChunkWriter, Encoder, PipelineError};
use crate::settings::EncoderSettings;
use async_trait::async_trait;
use bytes::Bytes;
use pmometadata::TrackDescriptor;
use std::collections::VecDeque;
use std::ffi::OsString;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Lignes de stderr conservées pour qualifier un échec.
const STDERR_TAIL: usize = 20;

/// Messages ffmpeg qui désignent un fichier source illisible plutôt qu'un
/// problème d'encodeur.
const DECODE_MARKERS: &[&str] = &[
    "invalid data found",
    "could not find codec parameters",
    "error while decoding",
    "no such file or directory",
    "header missing",
    "moov atom not found",
    "does not contain any stream",
    "matches no streams",
];

#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    settings: EncoderSettings,
}

impl FfmpegEncoder {
    pub fn new(settings: EncoderSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &EncoderSettings {
        &self.settings
    }

    /// Arguments de la ligne de commande pour `input`.
    pub(crate) fn command_args(&self, input: &Path) -> Vec<OsString> {
        let s = &self.settings;
        let mut args: Vec<OsString> = [
            "-hide_banner",
            "-nostdin",
            "-loglevel",
            "error",
            "-re",
            "-i",
        ]
        .iter()
        .map(OsString::from)
        .collect();
        args.push(input.as_os_str().to_owned());
        args.extend(
            [
                "-vn".to_string(),
                "-map".to_string(),
                "0:a:0".to_string(),
                "-c:a".to_string(),
                "libmp3lame".to_string(),
                "-b:a".to_string(),
                format!("{}k", s.bitrate_kbps),
                "-ar".to_string(),
                s.sample_rate.to_string(),
                "-ac".to_string(),
                s.channels.to_string(),
                "-f".to_string(),
                "mp3".to_string(),
                "pipe:1".to_string(),
            ]
            .into_iter()
            .map(OsString::from),
        );
        args
    }

    fn spawn(&self, input: &Path) -> Result<Child, PipelineError> {
        Command::new(&self.settings.ffmpeg_path)
            .args(self.command_args(input))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                PipelineError::Process(format!(
                    "failed to spawn {}: {}",
                    self.settings.ffmpeg_path.display(),
                    e
                ))
            })
    }
}

#[async_trait]
impl Encoder for FfmpegEncoder {
    async fn encode(
        &self,
        track: &TrackDescriptor,
        out: &mut ChunkWriter,
        cancel: CancellationToken,
    ) -> Result<(), PipelineError> {
        // Un fichier absent ou illisible est une erreur de décodage, pas de processus
        if let Err(e) = tokio::fs::File::open(&track.path).await {
            return Err(PipelineError::Decode {
                path: track.path.clone(),
                reason: e.to_string(),
            });
        }

        let mut child = self.spawn(&track.path)?;
        debug!(track = %track.path.display(), pid = ?child.id(), "ffmpeg started");

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| PipelineError::Process("ffmpeg stdout not captured".into()))?;
        let stderr_task = child.stderr.take().map(|stderr| tokio::spawn(stderr_tail(stderr)));

        let pumped = pump_stdout(&mut stdout, out, &cancel, self.settings.chunk_size).await;
        drop(stdout);

        let status = match pumped {
            Ok(()) => tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(PipelineError::Cancelled),
                status = child.wait() => status
                    .map_err(|e| PipelineError::Process(format!("cannot wait for ffmpeg: {e}"))),
            },
            Err(e) => Err(e),
        };

        let status = match status {
            Ok(status) => status,
            Err(e) => {
                stop_child(&mut child).await;
                if let Some(task) = stderr_task {
                    task.abort();
                }
                return Err(e);
            }
        };

        let stderr_lines = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => Vec::new(),
        };

        if status.success() {
            trace!(track = %track.filename, chunks = out.chunks_written(), "ffmpeg finished");
            Ok(())
        } else {
            Err(classify_failure(&track.path, status, &stderr_lines))
        }
    }
}

/// Copie la sortie de ffmpeg vers le pipeline jusqu'à EOF ou annulation.
async fn pump_stdout<R>(
    stdout: &mut R,
    out: &mut ChunkWriter,
    cancel: &CancellationToken,
    chunk_size: usize,
) -> Result<(), PipelineError>
where
    R: AsyncRead + Unpin,
{
    let mut buffer = vec![0u8; chunk_size.max(1)];
    loop {
        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            read = stdout.read(&mut buffer) => read,
        };

        match read {
            Ok(0) => return Ok(()),
            Ok(n) => out.write(Bytes::copy_from_slice(&buffer[..n])).await?,
            Err(e) => return Err(PipelineError::Process(format!("ffmpeg stdout: {e}"))),
        }
    }
}

async fn stop_child(child: &mut Child) {
    if let Err(e) = child.kill().await {
        // le processus a pu se terminer entre-temps
        debug!("ffmpeg kill: {}", e);
    }
}

/// Garde les dernières lignes de stderr.
async fn stderr_tail<R>(stderr: R) -> Vec<String>
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stderr).lines();
    let mut tail = VecDeque::with_capacity(STDERR_TAIL);
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(target: "pmobroadcast::ffmpeg", "{}", line);
        if tail.len() == STDERR_TAIL {
            tail.pop_front();
        }
        tail.push_back(line);
    }
    tail.into()
}

/// Distingue un fichier source corrompu d'une panne de l'encodeur.
pub(crate) fn classify_failure(path: &Path, status: ExitStatus, stderr: &[String]) -> PipelineError {
    let last = stderr
        .iter()
        .rev()
        .find(|l| !l.trim().is_empty())
        .map(|l| l.trim().to_string())
        .unwrap_or_else(|| status.to_string());

    let decode = stderr.iter().any(|line| {
        let line = line.to_ascii_lowercase();
        DECODE_MARKERS.iter().any(|marker| line.contains(marker))
    });

    if decode {
        PipelineError::Decode {
            path: path.to_path_buf(),
            reason: last,
        }
    } else {
        PipelineError::Process(format!("ffmpeg exited with {status}: {last}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{PipelineEvent, PipelineHandle, PipelineOutcome};
    use std::path::PathBuf;
    use std::sync::Arc;

    #[cfg(unix)]
    fn exit_status(code: i32) -> ExitStatus {
        use std::os::unix::process::ExitStatusExt;
        ExitStatus::from_raw(code << 8)
    }

    fn args_as_strings(encoder: &FfmpegEncoder, input: &str) -> Vec<String> {
        encoder
            .command_args(Path::new(input))
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_command_args_follow_settings() {
        let encoder = FfmpegEncoder::new(EncoderSettings {
            bitrate_kbps: 192,
            sample_rate: 48_000,
            channels: 1,
            ..Default::default()
        });
        let args = args_as_strings(&encoder, "/music/Blue in Green.flac");

        let input = args.iter().position(|a| a == "-i").unwrap();
        assert_eq!(args[input + 1], "/music/Blue in Green.flac");
        assert!(args.contains(&"-re".to_string()));
        assert!(args.windows(2).any(|w| w == ["-b:a", "192k"]));
        assert!(args.windows(2).any(|w| w == ["-ar", "48000"]));
        assert!(args.windows(2).any(|w| w == ["-ac", "1"]));
        assert_eq!(args.last().map(String::as_str), Some("pipe:1"));
    }

    #[cfg(unix)]
    #[test]
    fn test_classify_corrupt_input_as_decode_error() {
        let stderr = vec![
            "[mp3 @ 0x55d] Header missing".to_string(),
            "/music/broken.mp3: Invalid data found when processing input".to_string(),
        ];
        let err = classify_failure(Path::new("/music/broken.mp3"), exit_status(1), &stderr);
        match err {
            PipelineError::Decode { reason, .. } => {
                assert!(reason.contains("Invalid data found"))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_classify_unknown_failure_as_process_error() {
        let stderr = vec!["Unknown encoder 'libmp3lame'".to_string()];
        let err = classify_failure(Path::new("/music/a.mp3"), exit_status(1), &stderr);
        assert!(matches!(err, PipelineError::Process(msg) if msg.contains("libmp3lame")));

        let err = classify_failure(Path::new("/music/a.mp3"), exit_status(1), &[]);
        assert!(matches!(err, PipelineError::Process(_)));
    }

    #[tokio::test]
    async fn test_missing_source_is_decode_error() {
        let encoder = Arc::new(FfmpegEncoder::new(EncoderSettings::default()));
        let track = TrackDescriptor::untagged(PathBuf::from("/nonexistent/pmoradio/x.mp3")).unwrap();
        let mut handle = PipelineHandle::start(encoder, track, 4);
        assert_eq!(
            handle.next_event().await,
            PipelineEvent::Finished(PipelineOutcome::DecodeError)
        );
    }

    /// ffmpeg du système, s'il sait produire du MP3.
    fn system_ffmpeg() -> Option<PathBuf> {
        let output = std::process::Command::new("ffmpeg")
            .args(["-hide_banner", "-encoders"])
            .output()
            .ok()?;
        let encoders = String::from_utf8_lossy(&output.stdout);
        (output.status.success() && encoders.contains("libmp3lame")).then(|| PathBuf::from("ffmpeg"))
    }

    #[tokio::test]
    async fn test_corrupt_source_is_decode_error_with_real_ffmpeg() {
        let Some(ffmpeg) = system_ffmpeg() else {
            eprintln!("ffmpeg with libmp3lame not available, skipping");
            return;
        };
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("corrupt.mp3");
        std::fs::write(&source, b"\x00\x01 definitely not mpeg audio").unwrap();

        let encoder = Arc::new(FfmpegEncoder::new(EncoderSettings {
            ffmpeg_path: ffmpeg,
            ..Default::default()
        }));
        let track = TrackDescriptor::untagged(source).unwrap();
        let mut handle = PipelineHandle::start(encoder, track, 4);
        let event = tokio::time::timeout(std::time::Duration::from_secs(10), handle.next_event())
            .await
            .expect("ffmpeg gives up on a corrupt file");
        assert_eq!(event, PipelineEvent::Finished(PipelineOutcome::DecodeError));
    }

    #[tokio::test]
    async fn test_missing_encoder_binary_is_process_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("track.mp3");
        std::fs::write(&source, b"not really audio").unwrap();

        let encoder = Arc::new(FfmpegEncoder::new(EncoderSettings {
            ffmpeg_path: dir.path().join("no-such-ffmpeg"),
            ..Default::default()
        }));
        let track = TrackDescriptor::untagged(source).unwrap();
        let mut handle = PipelineHandle::start(encoder, track, 4);
        assert_eq!(
            handle.next_event().await,
            PipelineEvent::Finished(PipelineOutcome::ProcessError)
        );
    }
}
