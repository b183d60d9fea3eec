//! Subprocess-backed audio acquisition (`yt-dlp` by default).
//!
//! One `acquire` spawns one child and three tasks:
//! - the reaper owns the `Child`, waits for it or kills it on request,
//!   and publishes the exit outcome on a watch channel;
//! - the pump copies stdout into the `SourceStream`;
//! - the stderr collector logs diagnostics and keeps a bounded tail for
//!   error messages.

use std::{
    collections::VecDeque,
    fmt::Display,
    process::{ExitStatus, Stdio},
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, BufReader},
    process::{Child, ChildStderr, ChildStdout, Command},
    sync::{oneshot, watch},
    task::JoinHandle,
};
use tracing::{debug, warn};

use super::{AcquiredSource, AudioSource, Chunk, SourceDescriptor, SourceProcess, SourceStream, TrackMetadata};
use crate::{
    audio::constants::{READ_CHUNK_SIZE, STREAM_CHANNEL_CAPACITY},
    common::{PlaybackError, PlaybackResult},
    configs::ExtractorConfig,
};

/// How long a failed read waits for stderr before reporting.
const DIAGNOSTIC_WAIT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ExitOutcome {
    code: Option<i32>,
    success: bool,
    /// We asked for the kill; the exit status says nothing about the source.
    killed: bool,
}

impl From<ExitStatus> for ExitOutcome {
    fn from(status: ExitStatus) -> Self {
        Self {
            code: status.code(),
            success: status.success(),
            killed: false,
        }
    }
}

pub struct Extractor {
    config: ExtractorConfig,
}

impl Extractor {
    pub fn new(config: ExtractorConfig) -> Self {
        Self { config }
    }

    fn command(&self, args: &[String], descriptor: &SourceDescriptor) -> Command {
        let mut cmd = Command::new(&self.config.program);
        cmd.args(args)
            .arg(descriptor.as_str())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl AudioSource for Extractor {
    fn name(&self) -> &'static str {
        "extractor"
    }

    async fn acquire(&self, descriptor: &SourceDescriptor) -> PlaybackResult<AcquiredSource> {
        let mut child = self
            .command(&self.config.args, descriptor)
            .spawn()
            .map_err(|source| PlaybackError::ProcessSpawn {
                program: self.config.program.clone(),
                source,
            })?;

        let pid = child.id();
        let label = format!("{}:{}", self.config.program, pid.unwrap_or_default());
        debug!("[{}] spawned for {}", label, descriptor);

        // Dropping `child` here kills it (kill_on_drop).
        let stdout = child.stdout.take().ok_or_else(|| {
            PlaybackError::Io(std::io::Error::other("extractor stdout was not captured"))
        })?;
        let stderr = child.stderr.take();

        let (exit_tx, exit_rx) = watch::channel(None);
        let (kill_tx, kill_rx) = oneshot::channel();
        tokio::spawn(reap(child, kill_rx, exit_tx, label.clone()));

        let diagnostics = tokio::spawn(collect_stderr(
            stderr,
            self.config.max_diagnostic_bytes,
            label.clone(),
        ));

        let (chunk_tx, stream) = SourceStream::channel(STREAM_CHANNEL_CAPACITY);
        tokio::spawn(pump(stdout, chunk_tx, exit_rx.clone(), diagnostics, label.clone()));

        Ok(AcquiredSource {
            stream,
            process: Box::new(ExtractorProcess {
                pid,
                label,
                kill_tx: Mutex::new(Some(kill_tx)),
                exit_rx,
                terminated: AtomicBool::new(false),
                grace: Duration::from_millis(self.config.kill_grace_ms),
            }),
        })
    }

    async fn metadata(&self, descriptor: &SourceDescriptor) -> Option<TrackMetadata> {
        let budget = Duration::from_millis(self.config.metadata_timeout_ms);
        let output = self.command(&self.config.metadata_args, descriptor).output();

        // On timeout the future is dropped, which kills the child.
        let output = match tokio::time::timeout(budget, output).await {
            Ok(Ok(output)) if output.status.success() => output,
            Ok(Ok(output)) => {
                debug!(
                    "metadata lookup for {} exited with {:?}",
                    descriptor,
                    output.status.code()
                );
                return None;
            }
            Ok(Err(e)) => {
                debug!("metadata lookup for {} failed to start: {}", descriptor, e);
                return None;
            }
            Err(_) => {
                debug!("metadata lookup for {} timed out", descriptor);
                return None;
            }
        };

        parse_metadata(&output.stdout)
    }
}

fn parse_metadata(raw: &[u8]) -> Option<TrackMetadata> {
    let json: serde_json::Value = serde_json::from_slice(raw).ok()?;
    let title = json.get("title")?.as_str()?.to_string();
    Some(TrackMetadata {
        title,
        duration_secs: json.get("duration").and_then(|d| d.as_f64()),
        uploader: json
            .get("uploader")
            .and_then(|u| u.as_str())
            .map(str::to_string),
    })
}

async fn reap(
    mut child: Child,
    kill_rx: oneshot::Receiver<()>,
    exit_tx: watch::Sender<Option<ExitOutcome>>,
    label: String,
) {
    // A dropped sender counts as a kill request.
    let outcome = tokio::select! {
        status = child.wait() => match status {
            Ok(status) => ExitOutcome::from(status),
            Err(e) => {
                warn!("[{}] failed to wait for extractor: {}", label, e);
                ExitOutcome { code: None, success: false, killed: false }
            }
        },
        _ = kill_rx => {
            if let Err(e) = child.kill().await {
                warn!("[{}] failed to kill extractor: {}", label, e);
            }
            ExitOutcome { code: None, success: false, killed: true }
        }
    };

    debug!("[{}] exited: {:?}", label, outcome);
    let _ = exit_tx.send(Some(outcome));
}

/// The last lines of stderr, at most `max_bytes` of text. yt-dlp prints its
/// `ERROR:` line last, so the oldest lines are the ones dropped.
struct DiagnosticTail {
    lines: VecDeque<String>,
    bytes: usize,
    max_bytes: usize,
}

impl DiagnosticTail {
    fn new(max_bytes: usize) -> Self {
        Self {
            lines: VecDeque::new(),
            bytes: 0,
            max_bytes,
        }
    }

    fn push(&mut self, mut line: String) {
        if line.len() > self.max_bytes {
            let mut end = self.max_bytes;
            while !line.is_char_boundary(end) {
                end -= 1;
            }
            line.truncate(end);
        }
        self.bytes += line.len();
        self.lines.push_back(line);
        while self.bytes > self.max_bytes {
            match self.lines.pop_front() {
                Some(old) => self.bytes -= old.len(),
                None => break,
            }
        }
    }

    fn into_text(self) -> String {
        Vec::from(self.lines).join("\n")
    }
}

async fn collect_stderr(stderr: Option<ChildStderr>, max_bytes: usize, label: String) -> String {
    let Some(stderr) = stderr else {
        return String::new();
    };

    let mut tail = DiagnosticTail::new(max_bytes);
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                debug!("[{}] stderr: {}", label, line);
                tail.push(line);
            }
            Ok(None) => break,
            Err(e) => {
                debug!("[{}] stderr read failed: {}", label, e);
                break;
            }
        }
    }
    tail.into_text()
}

fn unavailable(code: Option<i32>, captured: String, fallback: impl Display) -> PlaybackError {
    let diagnostics = match (captured.is_empty(), fallback.to_string()) {
        (true, fallback) => fallback,
        (false, fallback) if fallback.is_empty() => captured,
        (false, fallback) => format!("{}\n{}", captured, fallback),
    };
    PlaybackError::SourceUnavailable { code, diagnostics }
}

async fn pump(
    mut stdout: ChildStdout,
    tx: flume::Sender<Chunk>,
    mut exit_rx: watch::Receiver<Option<ExitOutcome>>,
    mut diagnostics: JoinHandle<String>,
    label: String,
) {
    let mut delivered: u64 = 0;
    let mut buf = vec![0u8; READ_CHUNK_SIZE];

    loop {
        match stdout.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                delivered += n as u64;
                let chunk = Bytes::copy_from_slice(&buf[..n]);
                if tx.send_async(Ok(chunk)).await.is_err() {
                    debug!("[{}] consumer dropped after {} bytes", label, delivered);
                    diagnostics.abort();
                    return;
                }
            }
            Err(e) => {
                if delivered == 0 {
                    // The child may still hold stderr open, so wait only briefly.
                    let captured = tokio::time::timeout(DIAGNOSTIC_WAIT, &mut diagnostics)
                        .await
                        .ok()
                        .and_then(Result::ok)
                        .unwrap_or_default();
                    let error = unavailable(None, captured, format!("stdout read failed: {}", e));
                    let _ = tx.send_async(Err(error)).await;
                } else {
                    warn!("[{}] stdout read failed after {} bytes: {}", label, delivered, e);
                }
                diagnostics.abort();
                return;
            }
        }
    }

    if delivered > 0 {
        debug!("[{}] stream ended after {} bytes", label, delivered);
        diagnostics.abort();
        return;
    }

    // Nothing was delivered: the exit status decides whether this is an error.
    let outcome = exit_rx.wait_for(Option::is_some).await.ok().and_then(|o| *o);
    let diagnostics = diagnostics.await.unwrap_or_default();

    match outcome {
        Some(outcome) if !outcome.success && !outcome.killed => {
            let fallback = if diagnostics.is_empty() {
                "extractor produced no output"
            } else {
                ""
            };
            let _ = tx
                .send_async(Err(unavailable(outcome.code, diagnostics, fallback)))
                .await;
        }
        _ => debug!("[{}] stream ended without data", label),
    }
}

/// Handle to one running extractor.
pub struct ExtractorProcess {
    pid: Option<u32>,
    label: String,
    kill_tx: Mutex<Option<oneshot::Sender<()>>>,
    exit_rx: watch::Receiver<Option<ExitOutcome>>,
    terminated: AtomicBool,
    grace: Duration,
}

#[async_trait]
impl SourceProcess for ExtractorProcess {
    fn id(&self) -> Option<u32> {
        self.pid
    }

    fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    async fn terminate(&self) {
        if self.terminated.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Some(kill_tx) = self.kill_tx.lock().take() {
            // Err means the reaper already saw the exit.
            let _ = kill_tx.send(());
        }

        let mut exit_rx = self.exit_rx.clone();
        match tokio::time::timeout(self.grace, exit_rx.wait_for(Option::is_some)).await {
            Ok(Ok(_)) => debug!("[{}] terminated", self.label),
            Ok(Err(_)) => debug!("[{}] reaper already gone", self.label),
            Err(_) => warn!(
                "[{}] did not exit within {}ms of kill",
                self.label,
                self.grace.as_millis()
            ),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Extractor {
        Extractor::new(ExtractorConfig {
            program: "sh".into(),
            args: vec!["-c".into(), script.into(), "extractor".into()],
            ..ExtractorConfig::default()
        })
    }

    fn descriptor() -> SourceDescriptor {
        SourceDescriptor::parse("https://youtu.be/dQw4w9WgXcQ", true).unwrap()
    }

    async fn drain(stream: &mut SourceStream) -> (Vec<u8>, Option<PlaybackError>) {
        let mut data = Vec::new();
        while let Some(chunk) = stream.next_chunk().await {
            match chunk {
                Ok(bytes) => data.extend_from_slice(&bytes),
                Err(e) => return (data, Some(e)),
            }
        }
        (data, None)
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let extractor = Extractor::new(ExtractorConfig {
            program: "/nonexistent/definitely-not-yt-dlp".into(),
            ..ExtractorConfig::default()
        });
        let err = extractor.acquire(&descriptor()).await.err().unwrap();
        assert!(matches!(err, PlaybackError::ProcessSpawn { .. }));
    }

    #[tokio::test]
    async fn stdout_becomes_the_stream() {
        let extractor = sh("printf 'OggS-payload'");
        let mut source = extractor.acquire(&descriptor()).await.unwrap();
        let (data, err) = drain(&mut source.stream).await;
        assert_eq!(data, b"OggS-payload");
        assert!(err.is_none());
        source.process.terminate().await;
    }

    #[tokio::test]
    async fn failure_before_output_is_source_unavailable() {
        let extractor = sh("echo 'ERROR: Video unavailable' >&2; exit 3");
        let mut source = extractor.acquire(&descriptor()).await.unwrap();
        let (data, err) = drain(&mut source.stream).await;
        assert!(data.is_empty());
        match err {
            Some(PlaybackError::SourceUnavailable { code, diagnostics }) => {
                assert_eq!(code, Some(3));
                assert!(diagnostics.contains("Video unavailable"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn long_error_line_is_truncated_not_dropped() {
        let extractor = sh("printf 'ERROR: Video unavailable %05000d\\n' 0 >&2; exit 1");
        let mut source = extractor.acquire(&descriptor()).await.unwrap();
        let (_, err) = drain(&mut source.stream).await;
        match err {
            Some(PlaybackError::SourceUnavailable { code, diagnostics }) => {
                assert_eq!(code, Some(1));
                assert!(diagnostics.starts_with("ERROR: Video unavailable"));
                assert_eq!(diagnostics.len(), ExtractorConfig::default().max_diagnostic_bytes);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn noisy_stderr_keeps_the_final_error() {
        let extractor = Extractor::new(ExtractorConfig {
            program: "sh".into(),
            args: vec![
                "-c".into(),
                "i=0; while [ $i -lt 200 ]; do echo \"[youtube] step $i\" >&2; i=$((i+1)); done; \
                 echo 'ERROR: Private video' >&2; exit 1"
                    .into(),
                "extractor".into(),
            ],
            max_diagnostic_bytes: 256,
            ..ExtractorConfig::default()
        });
        let mut source = extractor.acquire(&descriptor()).await.unwrap();
        let (_, err) = drain(&mut source.stream).await;
        match err {
            Some(PlaybackError::SourceUnavailable { diagnostics, .. }) => {
                assert!(diagnostics.ends_with("ERROR: Private video"));
                assert!(!diagnostics.contains("step 0\n"));
                assert!(diagnostics.len() <= 256 + 256 / 4);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn diagnostic_tail_keeps_recent_lines_within_budget() {
        let mut tail = DiagnosticTail::new(10);
        tail.push("aaaa".into());
        tail.push("bbbb".into());
        tail.push("cccc".into());
        assert_eq!(tail.into_text(), "bbbb\ncccc");

        let mut tail = DiagnosticTail::new(4);
        tail.push("héllo".into());
        assert_eq!(tail.into_text(), "hé");

        let mut tail = DiagnosticTail::new(0);
        tail.push("anything".into());
        assert_eq!(tail.into_text(), "");
    }

    #[test]
    fn read_failure_keeps_captured_text() {
        let err = unavailable(None, "ERROR: Sign in".into(), "stdout read failed: broken pipe");
        match err {
            PlaybackError::SourceUnavailable { code, diagnostics } => {
                assert_eq!(code, None);
                assert_eq!(diagnostics, "ERROR: Sign in\nstdout read failed: broken pipe");
            }
            other => panic!("unexpected: {other:?}"),
        }
        let err = unavailable(Some(2), String::new(), "extractor produced no output");
        assert!(err.to_string().contains("extractor produced no output"));
    }

    #[tokio::test]
    async fn failure_after_output_is_a_normal_end() {
        let extractor = sh("printf 'abc'; exit 1");
        let mut source = extractor.acquire(&descriptor()).await.unwrap();
        let (data, err) = drain(&mut source.stream).await;
        assert_eq!(data, b"abc");
        assert!(err.is_none());
    }

    #[tokio::test]
    async fn the_source_reference_is_the_last_argument() {
        let extractor = sh("printf '%s' \"$1\"");
        let mut source = extractor.acquire(&descriptor()).await.unwrap();
        let (data, _) = drain(&mut source.stream).await;
        assert_eq!(data, b"https://youtu.be/dQw4w9WgXcQ");
    }

    #[tokio::test]
    async fn terminate_is_idempotent_and_stops_the_stream() {
        let extractor = sh("printf 'x'; exec sleep 30");
        let mut source = extractor.acquire(&descriptor()).await.unwrap();
        assert!(source.stream.next_chunk().await.unwrap().is_ok());

        source.process.terminate().await;
        assert!(source.process.is_terminated());
        source.process.terminate().await;
        source.process.terminate().await;

        // stdout closes once the child is gone.
        let rest = tokio::time::timeout(Duration::from_secs(5), drain(&mut source.stream))
            .await
            .unwrap();
        assert!(rest.1.is_none());
    }

    #[test]
    fn metadata_json_is_parsed() {
        let meta = parse_metadata(br#"{"title":"Song","duration":212.0,"uploader":"Band"}"#).unwrap();
        assert_eq!(meta.title, "Song");
        assert_eq!(meta.duration_secs, Some(212.0));
        assert_eq!(meta.uploader.as_deref(), Some("Band"));
        assert!(parse_metadata(b"not json").is_none());
    }
}
