// Delivery channel: one TCP connection per run, samples streamed in order, closed on every path.

use std::future::Future;
use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, instrument};

use crate::config::SinkConfig;
use crate::error::DeliveryError;
use crate::models::MetricSample;

/// Destination for a run's samples. Returns how many samples were written.
pub trait SampleSink {
    fn deliver(
        &self,
        samples: &[MetricSample],
    ) -> impl Future<Output = Result<usize, DeliveryError>> + Send;
}

/// Line-protocol sink reached over TCP.
///
/// A write failure ends the run's delivery: lines are not retried and the
/// connection is not reopened. Connect, writes and close share one deadline.
#[derive(Debug, Clone)]
pub struct DeliveryChannel {
    address: String,
    deadline: Duration,
}

impl DeliveryChannel {
    pub fn new(address: impl Into<String>, deadline: Duration) -> Self {
        Self {
            address: address.into(),
            deadline,
        }
    }

    pub fn from_config(config: &SinkConfig) -> Self {
        Self::new(
            config.address.clone(),
            Duration::from_secs(config.deadline_secs),
        )
    }

    // The stream is owned here: dropped (closed) on error or cancellation, shut down on success.
    async fn send_all(
        &self,
        samples: &[MetricSample],
        written: &mut usize,
    ) -> Result<(), DeliveryError> {
        let mut stream =
            TcpStream::connect(&self.address)
                .await
                .map_err(|source| DeliveryError::Connect {
                    address: self.address.clone(),
                    source,
                })?;
        stream_batch(&mut stream, &self.address, samples, written).await
    }
}

impl SampleSink for DeliveryChannel {
    #[instrument(skip(self, samples), fields(sink = %self.address, samples = samples.len()))]
    async fn deliver(&self, samples: &[MetricSample]) -> Result<usize, DeliveryError> {
        let mut written = 0;
        let outcome = tokio::time::timeout(self.deadline, self.send_all(samples, &mut written)).await;
        match outcome {
            Ok(Ok(())) => {
                debug!(written, "samples delivered");
                Ok(written)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(DeliveryError::Timeout {
                address: self.address.clone(),
                deadline: self.deadline,
                written,
                total: samples.len(),
            }),
        }
    }
}

/// Writes the batch to an open connection, then shuts its write side down.
pub async fn stream_batch<W>(
    w: &mut W,
    address: &str,
    samples: &[MetricSample],
    written: &mut usize,
) -> Result<(), DeliveryError>
where
    W: AsyncWrite + Unpin,
{
    let result = write_samples(w, samples, written).await;
    result.map_err(|source| DeliveryError::Write {
        address: address.to_string(),
        written: *written,
        total: samples.len(),
        source,
    })?;
    w.shutdown().await.map_err(|source| DeliveryError::Shutdown {
        address: address.to_string(),
        written: *written,
        total: samples.len(),
        source,
    })
}

/// Writes each sample's line in order, counting fully written lines in `written`.
pub async fn write_samples<W>(
    w: &mut W,
    samples: &[MetricSample],
    written: &mut usize,
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    for sample in samples {
        w.write_all(sample.to_line().as_bytes()).await?;
        *written += 1;
    }
    w.flush().await
}

/// Writes samples to stdout instead of a socket (`print` command).
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutSink;

impl SampleSink for StdoutSink {
    async fn deliver(&self, samples: &[MetricSample]) -> Result<usize, DeliveryError> {
        let mut out = tokio::io::stdout();
        let mut written = 0;
        let result = write_samples(&mut out, samples, &mut written).await;
        result.map_err(|source| DeliveryError::Write {
            address: "stdout".into(),
            written,
            total: samples.len(),
            source,
        })?;
        Ok(written)
    }
}
