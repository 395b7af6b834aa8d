// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Wire format of the handoff channel.
//!
//! Every message is a JSON document in a frame prefixed by its length as a
//! 4-byte big-endian integer. The exchange is positional, there is no message
//! tag:
//!
//! ```text
//! agent                                uploader
//!   | -- samples: [SampleActivity] -------> |
//!   | <------ valid samples: [SampleActivity] |
//!   | -- AccessTokenRecord ---------------> |
//!   | <------------------ app id: Uuid ---- |
//!   | -- UploadMetadata ------------------> |
//! ```

use std::path::Path;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::UnixStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use uuid::Uuid;

use crate::listener::SampleActivity;
use crate::metadata::UploadMetadata;

/// Largest accepted frame, 64 MiB.
pub const MAX_FRAME_LENGTH: usize = 64 * 1024 * 1024;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProtocolError {
    #[error("channel i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),
    #[error("channel closed by peer")]
    Closed,
}

/// Credential forwarded to the uploader. Empty when no authentication is
/// configured.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessTokenRecord {
    pub token: Option<String>,
    pub expires_on: Option<DateTime<Utc>>,
}

/// One end of a framed JSON duplex channel.
pub struct HandoffChannel<S> {
    framed: Framed<S, LengthDelimitedCodec>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> HandoffChannel<S> {
    pub fn new(stream: S) -> Self {
        let codec = LengthDelimitedCodec::builder()
            .max_frame_length(MAX_FRAME_LENGTH)
            .new_codec();
        Self {
            framed: Framed::new(stream, codec),
        }
    }

    pub async fn send<T: Serialize + ?Sized>(&mut self, message: &T) -> Result<(), ProtocolError> {
        let payload = serde_json::to_vec(message)?;
        self.framed.send(Bytes::from(payload)).await?;
        Ok(())
    }

    pub async fn recv<T: DeserializeOwned>(&mut self) -> Result<T, ProtocolError> {
        let frame = self.framed.next().await.ok_or(ProtocolError::Closed)??;
        Ok(serde_json::from_slice(&frame)?)
    }
}

/// Uploader side of the handoff, for uploaders written against this crate.
pub struct UploaderEndpoint<S> {
    channel: HandoffChannel<S>,
}

impl UploaderEndpoint<UnixStream> {
    /// Connects to the channel named in the upload context.
    pub async fn connect(channel_name: impl AsRef<Path>) -> Result<Self, ProtocolError> {
        let stream = UnixStream::connect(channel_name).await?;
        Ok(Self::new(stream))
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> UploaderEndpoint<S> {
    pub fn new(stream: S) -> Self {
        Self {
            channel: HandoffChannel::new(stream),
        }
    }

    pub async fn receive_samples(&mut self) -> Result<Vec<SampleActivity>, ProtocolError> {
        self.channel.recv().await
    }

    pub async fn send_valid_samples(
        &mut self,
        samples: &[SampleActivity],
    ) -> Result<(), ProtocolError> {
        self.channel.send(samples).await
    }

    pub async fn receive_access_token(&mut self) -> Result<AccessTokenRecord, ProtocolError> {
        self.channel.recv().await
    }

    /// Sends the verified application id, or [`Uuid::nil`] on failure.
    pub async fn send_app_id(&mut self, app_id: Uuid) -> Result<(), ProtocolError> {
        self.channel.send(&app_id).await
    }

    pub async fn receive_metadata(&mut self) -> Result<UploadMetadata, ProtocolError> {
        self.channel.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_framing() {
        let (a, mut b) = tokio::io::duplex(1024);
        let mut channel = HandoffChannel::new(a);
        channel
            .send(&AccessTokenRecord {
                token: Some("abc".into()),
                expires_on: None,
            })
            .await
            .unwrap();

        use tokio::io::AsyncReadExt;
        let len = b.read_u32().await.unwrap();
        let mut payload = vec![0; len as usize];
        b.read_exact(&mut payload).await.unwrap();
        assert_eq!(payload, br#"{"token":"abc","expiresOn":null}"#);
    }

    #[tokio::test]
    async fn test_round_trip_and_close() {
        let (a, b) = tokio::io::duplex(1024);
        let mut agent = HandoffChannel::new(a);
        let mut uploader = UploaderEndpoint::new(b);

        let app_id = Uuid::new_v4();
        uploader.send_app_id(app_id).await.unwrap();
        assert_eq!(agent.recv::<Uuid>().await.unwrap(), app_id);

        drop(uploader);
        assert!(matches!(
            agent.recv::<Uuid>().await,
            Err(ProtocolError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_malformed_message() {
        let (a, b) = tokio::io::duplex(1024);
        let mut agent = HandoffChannel::new(a);
        let mut uploader = HandoffChannel::new(b);
        uploader.send("not a uuid").await.unwrap();
        assert!(matches!(
            agent.recv::<Uuid>().await,
            Err(ProtocolError::Json(_))
        ));
    }
}
