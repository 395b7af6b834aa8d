// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Hands a completed trace over to the out-of-process uploader.
//!
//! After a session stops, [`PostStopHandoff`] writes the metadata sidecar,
//! binds a fresh Unix socket, launches the uploader with an
//! [`UploadContext`] naming that socket, and drives the exchange described in
//! [`protocol`]. Every step is bounded by a timeout and by the agent's
//! cancellation token. Whatever happens, the trace file is removed afterwards
//! unless the configuration asks for it to be preserved.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use std::{fmt, io};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::net::UnixListener;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::{LiveConfig, ProfilerConfig, UploadMode};
use crate::listener::SampleActivity;
use crate::metadata::{
    AgentMetadata, IndexRecord, MetadataSidecar, SampleTelemetry, UploadMetadata,
};
use crate::policy::TriggerType;

pub mod context;
pub mod protocol;
pub mod uploader;

pub use context::{ContextError, UploadContext};
pub use protocol::{AccessTokenRecord, HandoffChannel, ProtocolError, UploaderEndpoint};
pub use uploader::{
    AccessToken, AccessTokenProvider, ProcessUploaderLauncher, UploaderExit, UploaderLauncher,
};

/// Shortest wait for the uploader to validate samples against the trace.
pub const MIN_VALIDATION_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// A step of the handoff, reported in timeouts and cancellations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Connect,
    SendSamples,
    ReceiveValidSamples,
    SendAccessToken,
    ReceiveAppId,
    SendMetadata,
    UploaderExit,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::Connect => "connect",
            Step::SendSamples => "send samples",
            Step::ReceiveValidSamples => "receive valid samples",
            Step::SendAccessToken => "send access token",
            Step::ReceiveAppId => "receive app id",
            Step::SendMetadata => "send metadata",
            Step::UploaderExit => "uploader exit",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum HandoffError {
    #[error(transparent)]
    Context(#[from] ContextError),
    #[error("handoff channel: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("handoff i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("timed out during {0}")]
    Timeout(Step),
    #[error("cancelled during {0}")]
    Cancelled(Step),
    #[error("unable to acquire access token: {0}")]
    Auth(Box<dyn std::error::Error + Send + Sync>),
    #[error("uploader returned no application identity")]
    NoAppIdentity,
    #[error("uploader exited before connecting")]
    UploaderExited,
    #[error("uploader exited with a failure")]
    UploaderFailed,
}

/// A stopped session, ready to be handed over.
#[derive(Debug, Clone)]
pub struct CompletedSession {
    pub session_id: String,
    pub session_start: DateTime<Utc>,
    pub session_end: DateTime<Utc>,
    pub trace_path: PathBuf,
    pub samples: Vec<SampleActivity>,
    /// Identity of the policy that owned the session.
    pub source: String,
    pub trigger: TriggerType,
    pub average_cpu_usage: f32,
    pub average_memory_usage: f32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandoffOutcome {
    /// Nothing was sent to an uploader.
    Skipped,
    Uploaded { app_id: Uuid, valid_samples: usize },
    Failed,
}

/// Path of the metadata sidecar written next to `trace_path`.
pub fn sidecar_path(trace_path: &Path) -> PathBuf {
    let mut path = trace_path.as_os_str().to_owned();
    path.push(".metadata.json");
    PathBuf::from(path)
}

fn should_upload(mode: UploadMode, samples: usize) -> bool {
    match mode {
        UploadMode::Never => false,
        UploadMode::OnSuccess => samples > 0,
        UploadMode::Always => true,
    }
}

/// A listening socket whose file is removed on drop.
struct ChannelSocket {
    path: PathBuf,
    listener: UnixListener,
}

impl ChannelSocket {
    fn bind() -> io::Result<Self> {
        let path = std::env::temp_dir().join(format!("trace-upload-{}.sock", Uuid::new_v4().simple()));
        let listener = UnixListener::bind(&path)?;
        Ok(Self { path, listener })
    }

    fn name(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }
}

impl Drop for ChannelSocket {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            tracing::debug!(?err, path = ?self.path, "unable to remove channel socket");
        }
    }
}

/// Runs `fut` unless it takes longer than `limit` or `cancel` fires first.
async fn bounded<T, E>(
    step: Step,
    limit: Duration,
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T, E>>,
) -> Result<T, HandoffError>
where
    HandoffError: From<E>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(HandoffError::Cancelled(step)),
        result = tokio::time::timeout(limit, fut) => match result {
            Ok(result) => {
                tracing::debug!(%step, "handoff step done");
                result.map_err(HandoffError::from)
            }
            Err(_) => Err(HandoffError::Timeout(step)),
        },
    }
}

/// Drives the exchange with the uploader once a session has stopped.
pub struct PostStopHandoff {
    launcher: Arc<dyn UploaderLauncher>,
    token_provider: Option<Arc<dyn AccessTokenProvider>>,
    agent_metadata: AgentMetadata,
    live: LiveConfig,
}

impl PostStopHandoff {
    pub fn new(
        launcher: Arc<dyn UploaderLauncher>,
        token_provider: Option<Arc<dyn AccessTokenProvider>>,
        agent_metadata: AgentMetadata,
        live: LiveConfig,
    ) -> Self {
        Self {
            launcher,
            token_provider,
            agent_metadata,
            live,
        }
    }

    /// Hands `session` over and cleans up its files.
    ///
    /// Never fails: a failed handoff is logged and reported as
    /// [`HandoffOutcome::Failed`].
    pub async fn run(&self, session: CompletedSession, cancel: &CancellationToken) -> HandoffOutcome {
        let config = self.live.borrow().clone();
        let outcome = if should_upload(config.upload_mode, session.samples.len()) {
            match self.upload(&session, &config, cancel).await {
                Ok((app_id, valid_samples)) => {
                    tracing::info!(session_id = %session.session_id, %app_id, valid_samples, "trace handed over to uploader");
                    HandoffOutcome::Uploaded {
                        app_id,
                        valid_samples,
                    }
                }
                Err(err) => {
                    tracing::error!(?err, session_id = %session.session_id, "trace handoff failed");
                    HandoffOutcome::Failed
                }
            }
        } else {
            tracing::info!(
                session_id = %session.session_id,
                samples = session.samples.len(),
                mode = ?config.upload_mode,
                "skipping upload"
            );
            HandoffOutcome::Skipped
        };
        cleanup(&session.trace_path, config.preserve_trace_file).await;
        outcome
    }

    async fn upload(
        &self,
        session: &CompletedSession,
        config: &ProfilerConfig,
        cancel: &CancellationToken,
    ) -> Result<(Uuid, usize), HandoffError> {
        let timeouts = &config.handoff;
        let metadata_path = sidecar_path(&session.trace_path);
        write_sidecar(&metadata_path, session).await?;

        let socket = ChannelSocket::bind()?;
        let context = UploadContext {
            instrumentation_key: config.upload.instrumentation_key.clone(),
            host_url: config.upload.endpoint.clone(),
            session_id: session.session_id.clone(),
            stamp_id: config.upload.stamp_id.clone(),
            trace_file_path: session.trace_path.clone(),
            metadata_file_path: Some(metadata_path),
            serialized_sample_file_path: None,
            channel_name: Some(socket.name()),
            role_name: config.upload.role_name.clone(),
            trigger_type: session.trigger,
            preserve_trace_file: config.preserve_trace_file,
            upload_mode: config.upload_mode,
        };
        context.validate()?;

        let mut exit = self.launcher.launch(&context).await?;
        let stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(HandoffError::Cancelled(Step::Connect)),
            accepted = tokio::time::timeout(timeouts.connect_timeout, socket.listener.accept()) => match accepted {
                Ok(accepted) => accepted?.0,
                Err(_) => return Err(HandoffError::Timeout(Step::Connect)),
            },
            _ = &mut exit => return Err(HandoffError::UploaderExited),
        };
        let mut channel = HandoffChannel::new(stream);
        tracing::debug!(channel = %socket.name(), "uploader connected");

        bounded(
            Step::SendSamples,
            timeouts.metadata_timeout,
            cancel,
            channel.send(&session.samples),
        )
        .await?;

        // the uploader decides which samples are backed by the trace
        let samples: Vec<SampleActivity> = bounded(
            Step::ReceiveValidSamples,
            timeouts.validation_timeout.max(MIN_VALIDATION_TIMEOUT),
            cancel,
            channel.recv(),
        )
        .await?;

        let token = self.access_token().await?;
        bounded(
            Step::SendAccessToken,
            timeouts.metadata_timeout,
            cancel,
            channel.send(&token),
        )
        .await?;

        let app_id: Uuid = bounded(
            Step::ReceiveAppId,
            timeouts.metadata_timeout,
            cancel,
            channel.recv(),
        )
        .await?;
        if app_id.is_nil() {
            return Err(HandoffError::NoAppIdentity);
        }

        let metadata = UploadMetadata {
            index: self.index_record(session, config),
            samples: samples
                .iter()
                .map(|s| SampleTelemetry::new(&session.session_id, s))
                .collect(),
        };
        bounded(
            Step::SendMetadata,
            timeouts.metadata_timeout,
            cancel,
            channel.send(&metadata),
        )
        .await?;

        if !bounded(Step::UploaderExit, timeouts.exit_timeout, cancel, exit).await? {
            return Err(HandoffError::UploaderFailed);
        }
        Ok((app_id, samples.len()))
    }

    async fn access_token(&self) -> Result<AccessTokenRecord, HandoffError> {
        let Some(provider) = &self.token_provider else {
            return Ok(AccessTokenRecord::default());
        };
        let token = provider.access_token().await.map_err(HandoffError::Auth)?;
        if token.expires_on <= Utc::now() {
            return Err(HandoffError::Auth(
                format!("access token expired at {}", token.expires_on).into(),
            ));
        }
        Ok(AccessTokenRecord {
            token: Some(token.token),
            expires_on: Some(token.expires_on),
        })
    }

    fn index_record(&self, session: &CompletedSession, config: &ProfilerConfig) -> IndexRecord {
        IndexRecord {
            session_id: session.session_id.clone(),
            machine_name: self.agent_metadata.machine_name.clone(),
            process_name: self.agent_metadata.process_name.clone(),
            process_id: self.agent_metadata.process_id,
            source: session.source.clone(),
            average_cpu_usage: session.average_cpu_usage,
            average_memory_usage: session.average_memory_usage,
            os: self.agent_metadata.os.clone(),
            role_name: config.upload.role_name.clone(),
            session_start: session.session_start,
            session_end: session.session_end,
        }
    }
}

async fn write_sidecar(path: &Path, session: &CompletedSession) -> Result<(), HandoffError> {
    let sidecar = MetadataSidecar {
        trace_file: session.trace_path.clone(),
        samples: session
            .samples
            .iter()
            .map(|s| SampleTelemetry::new(&session.session_id, s))
            .collect(),
    };
    let json = serde_json::to_vec(&sidecar).map_err(ProtocolError::from)?;
    tokio::fs::write(path, json).await?;
    Ok(())
}

async fn cleanup(trace_path: &Path, preserve: bool) {
    if preserve {
        tracing::info!(trace_path = ?trace_path, "trace file preserved");
        return;
    }
    for path in [trace_path.to_owned(), sidecar_path(trace_path)] {
        match tokio::fs::remove_file(&path).await {
            Ok(()) => tracing::debug!(?path, "removed"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => tracing::warn!(?err, ?path, "unable to remove trace artifact"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use futures::FutureExt;
    use parking_lot::Mutex;
    use test_case::test_case;

    use super::*;
    use crate::policy::test_util::live_config;

    #[derive(Debug)]
    struct Seen {
        samples: usize,
        token: AccessTokenRecord,
        metadata: UploadMetadata,
        context: UploadContext,
    }

    /// Speaks the uploader side of the protocol from a tokio task.
    #[derive(Debug, Clone)]
    struct FakeUploader {
        app_id: Uuid,
        keep: usize,
        connect: bool,
        stall: bool,
        launches: Arc<AtomicUsize>,
        seen: Arc<Mutex<Option<Seen>>>,
    }

    impl FakeUploader {
        fn new(app_id: Uuid) -> Self {
            Self {
                app_id,
                keep: usize::MAX,
                connect: true,
                stall: false,
                launches: Arc::new(AtomicUsize::new(0)),
                seen: Arc::new(Mutex::new(None)),
            }
        }

        async fn serve(self, context: UploadContext) -> Result<bool, ProtocolError> {
            if !self.connect {
                std::future::pending::<()>().await;
            }
            let mut endpoint =
                UploaderEndpoint::connect(context.channel_name.as_deref().unwrap()).await?;
            let samples = endpoint.receive_samples().await?;
            if self.stall {
                std::future::pending::<()>().await;
            }
            let valid = &samples[..self.keep.min(samples.len())];
            endpoint.send_valid_samples(valid).await?;
            let token = endpoint.receive_access_token().await?;
            endpoint.send_app_id(self.app_id).await?;
            if self.app_id.is_nil() {
                return Ok(false);
            }
            let metadata = endpoint.receive_metadata().await?;
            *self.seen.lock() = Some(Seen {
                samples: samples.len(),
                token,
                metadata,
                context,
            });
            Ok(true)
        }
    }

    #[async_trait]
    impl UploaderLauncher for FakeUploader {
        async fn launch(&self, context: &UploadContext) -> io::Result<UploaderExit> {
            self.launches.fetch_add(1, Ordering::SeqCst);
            let task = tokio::spawn(self.clone().serve(context.clone()));
            Ok(async move {
                match task.await.map_err(io::Error::other)? {
                    Ok(success) => Ok(success),
                    Err(err) => Err(io::Error::other(err)),
                }
            }
            .boxed())
        }
    }

    #[derive(Debug)]
    struct FixedToken(DateTime<Utc>);

    #[async_trait]
    impl AccessTokenProvider for FixedToken {
        async fn access_token(
            &self,
        ) -> Result<AccessToken, Box<dyn std::error::Error + Send + Sync>> {
            Ok(AccessToken {
                token: "bearer".into(),
                expires_on: self.0,
            })
        }
    }

    fn sample(id: &str) -> SampleActivity {
        let start = Utc::now();
        SampleActivity {
            request_id: id.into(),
            operation_id: format!("op-{id}"),
            start_activity_path: format!("/{id}/"),
            stop_activity_path: format!("/{id}/"),
            start_time_utc: start,
            stop_time_utc: start + chrono::Duration::milliseconds(20),
            duration: Duration::from_millis(20),
            operation_name: "GET /".into(),
            role_instance: "web-0".into(),
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        session: CompletedSession,
    }

    fn fixture(samples: usize) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let trace_path = dir.path().join("trace.jfr");
        std::fs::write(&trace_path, b"JFR").unwrap();
        let now = Utc::now();
        let session = CompletedSession {
            session_id: crate::session::session_id(now),
            session_start: now,
            session_end: now,
            trace_path,
            samples: (0..samples).map(|i| sample(&i.to_string())).collect(),
            source: "cpu-threshold".into(),
            trigger: TriggerType::Cpu,
            average_cpu_usage: 91.0,
            average_memory_usage: 40.0,
        };
        Fixture { _dir: dir, session }
    }

    fn config(mode: UploadMode, preserve: bool) -> ProfilerConfig {
        let mut config = ProfilerConfig::default();
        config.upload_mode = mode;
        config.preserve_trace_file = preserve;
        config.upload.instrumentation_key = "key".into();
        config.upload.role_name = "web".into();
        config
    }

    fn handoff(
        uploader: &FakeUploader,
        config: ProfilerConfig,
        token: Option<Arc<dyn AccessTokenProvider>>,
    ) -> PostStopHandoff {
        let (_tx, live) = live_config(config);
        PostStopHandoff::new(
            Arc::new(uploader.clone()),
            token,
            AgentMetadata::from_host(),
            live,
        )
    }

    #[tokio::test]
    async fn test_full_exchange_deletes_trace() {
        let Fixture { _dir, session } = fixture(2);
        let trace_path = session.trace_path.clone();
        let app_id = Uuid::new_v4();
        let uploader = FakeUploader::new(app_id);
        let expires_on = Utc::now() + chrono::Duration::hours(1);
        let handoff = handoff(
            &uploader,
            config(UploadMode::OnSuccess, false),
            Some(Arc::new(FixedToken(expires_on))),
        );

        let outcome = handoff.run(session, &CancellationToken::new()).await;
        assert_eq!(
            outcome,
            HandoffOutcome::Uploaded {
                app_id,
                valid_samples: 2
            }
        );

        let seen = uploader.seen.lock().take().unwrap();
        assert_eq!(seen.samples, 2);
        assert_eq!(seen.token.token.as_deref(), Some("bearer"));
        assert_eq!(seen.token.expires_on, Some(expires_on));
        assert_eq!(seen.metadata.samples.len(), 2);
        assert_eq!(seen.metadata.index.source, "cpu-threshold");
        assert_eq!(seen.metadata.index.average_cpu_usage, 91.0);
        assert_eq!(seen.metadata.index.role_name, "web");
        assert_eq!(seen.context.trigger_type, TriggerType::Cpu);
        assert!(seen.context.validate().is_ok());
        assert_eq!(
            seen.context.metadata_file_path.as_deref(),
            Some(sidecar_path(&trace_path).as_path())
        );

        assert!(!trace_path.exists());
        assert!(!sidecar_path(&trace_path).exists());
        // the socket is gone too
        assert!(!Path::new(seen.context.channel_name.as_deref().unwrap()).exists());
    }

    #[tokio::test]
    async fn test_uploader_filters_samples() {
        let Fixture { _dir, session } = fixture(3);
        let app_id = Uuid::new_v4();
        let mut uploader = FakeUploader::new(app_id);
        uploader.keep = 1;
        let handoff = handoff(&uploader, config(UploadMode::OnSuccess, false), None);

        let outcome = handoff.run(session, &CancellationToken::new()).await;
        assert_eq!(
            outcome,
            HandoffOutcome::Uploaded {
                app_id,
                valid_samples: 1
            }
        );
        let seen = uploader.seen.lock().take().unwrap();
        assert_eq!(seen.samples, 3);
        assert_eq!(seen.metadata.samples.len(), 1);
        assert_eq!(seen.metadata.samples[0].request_id, "0");
        assert_eq!(seen.token, AccessTokenRecord::default());
    }

    #[tokio::test]
    #[test_case(0, UploadMode::OnSuccess, false; "no samples")]
    #[test_case(2, UploadMode::Never, false; "never")]
    #[test_case(0, UploadMode::OnSuccess, true; "no samples preserved")]
    async fn test_skipped(samples: usize, mode: UploadMode, preserve: bool) {
        let Fixture { _dir, session } = fixture(samples);
        let trace_path = session.trace_path.clone();
        let uploader = FakeUploader::new(Uuid::new_v4());
        let handoff = handoff(&uploader, config(mode, preserve), None);

        let outcome = handoff.run(session, &CancellationToken::new()).await;
        assert_eq!(outcome, HandoffOutcome::Skipped);
        assert_eq!(uploader.launches.load(Ordering::SeqCst), 0);
        assert_eq!(trace_path.exists(), preserve);
    }

    #[tokio::test]
    async fn test_always_uploads_without_samples() {
        let Fixture { _dir, session } = fixture(0);
        let app_id = Uuid::new_v4();
        let uploader = FakeUploader::new(app_id);
        let handoff = handoff(&uploader, config(UploadMode::Always, false), None);

        let outcome = handoff.run(session, &CancellationToken::new()).await;
        assert_eq!(
            outcome,
            HandoffOutcome::Uploaded {
                app_id,
                valid_samples: 0
            }
        );
    }

    #[tokio::test]
    #[test_case(false; "deleted")]
    #[test_case(true; "preserved")]
    async fn test_nil_app_id_fails(preserve: bool) {
        let Fixture { _dir, session } = fixture(2);
        let trace_path = session.trace_path.clone();
        let uploader = FakeUploader::new(Uuid::nil());
        let handoff = handoff(&uploader, config(UploadMode::OnSuccess, preserve), None);

        let outcome = handoff.run(session, &CancellationToken::new()).await;
        assert_eq!(outcome, HandoffOutcome::Failed);
        assert!(uploader.seen.lock().is_none());
        assert_eq!(trace_path.exists(), preserve);
        assert_eq!(sidecar_path(&trace_path).exists(), preserve);
    }

    #[tokio::test]
    async fn test_expired_token_fails() {
        let Fixture { _dir, session } = fixture(1);
        let uploader = FakeUploader::new(Uuid::new_v4());
        let expired = Utc::now() - chrono::Duration::minutes(1);
        let handoff = handoff(
            &uploader,
            config(UploadMode::OnSuccess, false),
            Some(Arc::new(FixedToken(expired))),
        );
        assert_eq!(
            handoff.run(session, &CancellationToken::new()).await,
            HandoffOutcome::Failed
        );
        assert!(uploader.seen.lock().is_none());
    }

    #[tokio::test]
    async fn test_missing_instrumentation_key_fails_before_launch() {
        let Fixture { _dir, session } = fixture(1);
        let uploader = FakeUploader::new(Uuid::new_v4());
        let mut config = config(UploadMode::OnSuccess, false);
        config.upload.instrumentation_key.clear();
        let handoff = handoff(&uploader, config, None);
        assert_eq!(
            handoff.run(session, &CancellationToken::new()).await,
            HandoffOutcome::Failed
        );
        assert_eq!(uploader.launches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_connect_timeout() {
        let Fixture { _dir, session } = fixture(1);
        let trace_path = session.trace_path.clone();
        let mut uploader = FakeUploader::new(Uuid::new_v4());
        uploader.connect = false;
        let mut config = config(UploadMode::OnSuccess, false);
        config.handoff.connect_timeout = Duration::from_millis(50);
        let handoff = handoff(&uploader, config.clone(), None);

        let err = handoff
            .upload(&session, &config, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, HandoffError::Timeout(Step::Connect)));
        assert!(trace_path.exists());
    }

    #[tokio::test]
    async fn test_cancelled_mid_exchange() {
        let Fixture { _dir, session } = fixture(1);
        let trace_path = session.trace_path.clone();
        let mut uploader = FakeUploader::new(Uuid::new_v4());
        uploader.stall = true;
        let config = config(UploadMode::OnSuccess, false);
        let handoff = handoff(&uploader, config.clone(), None);

        let cancel = CancellationToken::new();
        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                cancel.cancel();
            })
        };
        let err = handoff
            .upload(&session, &config, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            HandoffError::Cancelled(Step::ReceiveValidSamples)
        ));
        canceller.await.unwrap();

        // run() still cleans up after a cancelled exchange
        assert_eq!(handoff.run(session, &cancel).await, HandoffOutcome::Failed);
        assert!(!trace_path.exists());
    }

    #[test]
    fn test_sidecar_path() {
        assert_eq!(
            sidecar_path(Path::new("/tmp/trace_1.jfr")),
            Path::new("/tmp/trace_1.jfr.metadata.json")
        );
    }

    #[tokio::test]
    async fn test_sidecar_contents() {
        let Fixture { _dir, session } = fixture(2);
        let path = sidecar_path(&session.trace_path);
        write_sidecar(&path, &session).await.unwrap();
        let sidecar: MetadataSidecar =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(sidecar.trace_file, session.trace_path);
        assert_eq!(sidecar.samples.len(), 2);
        assert_eq!(sidecar.samples[1].request_id, "1");
    }
}
