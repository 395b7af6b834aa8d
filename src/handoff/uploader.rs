// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Collaborators of the handoff: the uploader process and the credential
//! forwarded to it.

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;

use super::context::UploadContext;

/// Resolves to whether the uploader exited successfully.
pub type UploaderExit = BoxFuture<'static, std::io::Result<bool>>;

/// Starts the out-of-process uploader for one trace.
#[async_trait]
pub trait UploaderLauncher: fmt::Debug + Send + Sync {
    /// Launches the uploader, which is expected to connect to the channel
    /// named in `context`. Dropping the returned future gives up on the
    /// uploader.
    async fn launch(&self, context: &UploadContext) -> std::io::Result<UploaderExit>;
}

/// Runs the uploader executable with the context as its command line.
#[derive(Debug, Clone)]
pub struct ProcessUploaderLauncher {
    program: PathBuf,
}

impl ProcessUploaderLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl UploaderLauncher for ProcessUploaderLauncher {
    async fn launch(&self, context: &UploadContext) -> std::io::Result<UploaderExit> {
        let mut child = tokio::process::Command::new(&self.program)
            .args(context.to_args())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        tracing::debug!(program = ?self.program, pid = ?child.id(), "uploader launched");
        Ok(async move {
            let status = child.wait().await?;
            tracing::debug!(%status, "uploader exited");
            Ok(status.success())
        }
        .boxed())
    }
}

/// A bearer credential for the upload service.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token: String,
    pub expires_on: DateTime<Utc>,
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("expires_on", &self.expires_on)
            .finish_non_exhaustive()
    }
}

/// Acquires credentials when the upload service requires authentication.
#[async_trait]
pub trait AccessTokenProvider: fmt::Debug + Send + Sync {
    async fn access_token(&self) -> Result<AccessToken, Box<dyn std::error::Error + Send + Sync>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UploadMode;
    use crate::policy::TriggerType;

    #[test]
    fn test_access_token_debug_hides_secret() {
        let token = AccessToken {
            token: "secret".into(),
            expires_on: Utc::now(),
        };
        assert!(!format!("{token:?}").contains("secret"));
    }

    #[tokio::test]
    async fn test_process_launcher_reports_exit() {
        let context = UploadContext {
            instrumentation_key: "key".into(),
            host_url: String::new(),
            session_id: "session".into(),
            stamp_id: String::new(),
            trace_file_path: "/tmp/none.trace".into(),
            metadata_file_path: None,
            serialized_sample_file_path: None,
            channel_name: Some("/tmp/none.sock".into()),
            role_name: String::new(),
            trigger_type: TriggerType::Random,
            preserve_trace_file: false,
            upload_mode: UploadMode::Always,
        };
        // `true` and `false` ignore their arguments
        let ok = ProcessUploaderLauncher::new("true").launch(&context).await.unwrap();
        assert!(ok.await.unwrap());
        let failed = ProcessUploaderLauncher::new("false").launch(&context).await.unwrap();
        assert!(!failed.await.unwrap());

        assert!(ProcessUploaderLauncher::new("/nonexistent/uploader")
            .launch(&context)
            .await
            .is_err());
    }
}
