// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::ffi::OsString;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::UploadMode;
use crate::policy::TriggerType;

#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ContextError {
    #[error("upload context is missing {0}")]
    Missing(&'static str),
    #[error("exactly one of the sample file path and the channel name must be set")]
    SampleTransport,
}

/// Everything the uploader process needs to know about one trace.
///
/// Samples travel either through a serialized file or through the handoff
/// channel, never both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadContext {
    pub instrumentation_key: String,
    pub host_url: String,
    pub session_id: String,
    pub stamp_id: String,
    pub trace_file_path: PathBuf,
    pub metadata_file_path: Option<PathBuf>,
    pub serialized_sample_file_path: Option<PathBuf>,
    pub channel_name: Option<String>,
    pub role_name: String,
    pub trigger_type: TriggerType,
    pub preserve_trace_file: bool,
    pub upload_mode: UploadMode,
}

impl UploadContext {
    pub fn validate(&self) -> Result<(), ContextError> {
        if self.instrumentation_key.is_empty() {
            return Err(ContextError::Missing("instrumentation key"));
        }
        if self.session_id.is_empty() {
            return Err(ContextError::Missing("session id"));
        }
        if self.trace_file_path.as_os_str().is_empty() {
            return Err(ContextError::Missing("trace file path"));
        }
        let by_file = self
            .serialized_sample_file_path
            .as_ref()
            .is_some_and(|p| !p.as_os_str().is_empty());
        let by_channel = self.channel_name.as_ref().is_some_and(|c| !c.is_empty());
        if by_file == by_channel {
            return Err(ContextError::SampleTransport);
        }
        Ok(())
    }

    /// Command line handed to the uploader process.
    pub fn to_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "--trace-path".into(),
            self.trace_file_path.clone().into(),
            "--instrumentation-key".into(),
            self.instrumentation_key.clone().into(),
            "--session-id".into(),
            self.session_id.clone().into(),
            "--trigger".into(),
            self.trigger_type.as_str().into(),
            "--upload-mode".into(),
            upload_mode_arg(self.upload_mode).into(),
        ];
        let optional = [
            ("--host", Some(&self.host_url).filter(|s| !s.is_empty()).map(OsString::from)),
            ("--stamp-id", Some(&self.stamp_id).filter(|s| !s.is_empty()).map(OsString::from)),
            ("--role-name", Some(&self.role_name).filter(|s| !s.is_empty()).map(OsString::from)),
            ("--metadata", self.metadata_file_path.clone().map(OsString::from)),
            ("--sample-file", self.serialized_sample_file_path.clone().map(OsString::from)),
            ("--channel", self.channel_name.clone().map(OsString::from)),
        ];
        for (flag, value) in optional {
            if let Some(value) = value {
                args.push(flag.into());
                args.push(value);
            }
        }
        if self.preserve_trace_file {
            args.push("--preserve".into());
        }
        args
    }
}

fn upload_mode_arg(mode: UploadMode) -> &'static str {
    match mode {
        UploadMode::Never => "never",
        UploadMode::OnSuccess => "on-success",
        UploadMode::Always => "always",
    }
}
