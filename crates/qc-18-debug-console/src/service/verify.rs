//! # Transfer Verification
//!
//! Transfers a file from a remote peer and compares it, chunk by chunk,
//! against the copy in the local warehouse.
//!
//! The run stops at the first differing byte. A size disagreement in the
//! transfer header fails the run before any data is read.

use crate::domain::{
    throughput_kbps, Hash256, OutputSink, PeerInfo, TransferConfig, TransferFailure,
    TransferHeader, TransferOutcome,
};
use crate::ports::{NetworkBackend, TransferStream};
use crate::service::connect::until_cancelled;
use crate::service::render::{format_duration, hex_dump};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct TransferVerifier {
    backend: Arc<dyn NetworkBackend>,
    config: TransferConfig,
}

impl TransferVerifier {
    pub fn new(backend: Arc<dyn NetworkBackend>, config: TransferConfig) -> Self {
        Self { backend, config }
    }

    /// Verifies `hash` against `peer`, writing progress to `output`.
    ///
    /// The transfer stream is closed on every path out of the run,
    /// cancellation included.
    pub async fn run(
        &self,
        peer: &PeerInfo,
        hash: Hash256,
        output: &OutputSink,
        cancel: &CancellationToken,
    ) -> TransferOutcome {
        let Some(local_size) = self.backend.local_file_size(&hash) else {
            return report_early(output, hash, TransferFailure::NotStoredLocally(hash));
        };
        if !peer.is_connection_active() {
            return report_early(output, hash, TransferFailure::PeerNotConnected(peer.node_id()));
        }
        output.line(format!("1. Peer connected: {}", peer.node_id()));

        let opened = match until_cancelled(cancel, self.backend.request_file_transfer(peer, &hash)).await {
            None => return report_early(output, hash, TransferFailure::Cancelled),
            Some(opened) => opened,
        };
        let mut stream = match opened {
            Ok(stream) => stream,
            Err(e) => return report_early(output, hash, TransferFailure::Open(e.to_string())),
        };
        output.line(format!("2. Opened transfer for file: {hash}"));

        info!(peer = %peer.node_id(), hash = %hash, size = local_size, "Verifying file transfer");
        let started = Instant::now();
        let (bytes_compared, result) =
            self.compare(stream.as_mut(), &hash, local_size, output, cancel).await;
        let elapsed = started.elapsed();

        stream.close().await;
        let terminate_reason = stream.terminate_reason();

        let outcome = TransferOutcome {
            hash,
            bytes_compared,
            elapsed,
            terminate_reason: Some(terminate_reason),
            result,
        };
        report(output, &outcome, local_size);
        outcome
    }

    /// Returns the number of bytes found equal and the result.
    async fn compare(
        &self,
        stream: &mut dyn TransferStream,
        hash: &Hash256,
        local_size: u64,
        output: &OutputSink,
        cancel: &CancellationToken,
    ) -> (u64, Result<(), TransferFailure>) {
        let header = match until_cancelled(cancel, stream.read_header()).await {
            None => return (0, Err(TransferFailure::Cancelled)),
            Some(Err(e)) => {
                let failure = match stream.terminate_reason() {
                    reason if reason.is_terminated() => TransferFailure::RemoteTerminated {
                        reason,
                        received: 0,
                    },
                    _ => TransferFailure::Header(e.to_string()),
                };
                return (0, Err(failure));
            }
            Some(Ok(header)) => header,
        };
        if let Err(failure) = check_header(&header, local_size) {
            return (0, Err(failure));
        }
        output.line(format!(
            "3. Matching transfer size {} and file size {}",
            header.transfer_size, local_size
        ));

        let chunk_size = self.config.chunk_size.max(1);
        let mut remote = vec![0u8; chunk_size];
        let mut local = vec![0u8; chunk_size];
        let started = Instant::now();
        let mut last_progress = started;
        let mut offset = 0u64;

        while offset < local_size {
            let remaining = usize::try_from(local_size - offset).unwrap_or(usize::MAX);
            let want = remaining.min(chunk_size);

            let read = match until_cancelled(cancel, stream.read(&mut remote[..want])).await {
                None => return (offset, Err(TransferFailure::Cancelled)),
                Some(Err(e)) => {
                    return (
                        offset,
                        Err(TransferFailure::RemoteRead {
                            offset,
                            message: e.to_string(),
                        }),
                    )
                }
                Some(Ok(0)) => {
                    let failure = match stream.terminate_reason() {
                        reason if reason.is_terminated() => TransferFailure::RemoteTerminated {
                            reason,
                            received: offset,
                        },
                        _ => TransferFailure::Incomplete {
                            received: offset,
                            expected: local_size,
                        },
                    };
                    return (offset, Err(failure));
                }
                Some(Ok(read)) => read,
            };

            match self.backend.read_local_file(hash, offset, &mut local[..read]).await {
                Ok(n) if n == read => {}
                Ok(n) => {
                    return (
                        offset,
                        Err(TransferFailure::LocalRead {
                            offset,
                            length: read,
                            message: format!("short read of {n} bytes"),
                        }),
                    )
                }
                Err(e) => {
                    return (
                        offset,
                        Err(TransferFailure::LocalRead {
                            offset,
                            length: read,
                            message: e.to_string(),
                        }),
                    )
                }
            }

            if let Some(index) = first_difference(&remote[..read], &local[..read]) {
                let mismatch = offset + index as u64;
                warn!(hash = %hash, offset = mismatch, "Transferred data differs from local copy");
                return (
                    mismatch,
                    Err(TransferFailure::DataMismatch {
                        offset: mismatch,
                        remote: remote[..read].to_vec(),
                        local: local[..read].to_vec(),
                    }),
                );
            }
            offset += read as u64;

            if last_progress.elapsed() >= self.config.progress_interval {
                last_progress = Instant::now();
                output.line(format!(
                    "Offset {:08X}   progress {:.2} %   MATCHING. Speed: {:.2} KB/s",
                    offset,
                    offset as f64 * 100.0 / local_size as f64,
                    throughput_kbps(offset, started.elapsed())
                ));
            }
        }

        debug!(hash = %hash, bytes = offset, "All chunks matched");
        (offset, Ok(()))
    }
}

fn check_header(header: &TransferHeader, local_size: u64) -> Result<(), TransferFailure> {
    if header.file_size != local_size {
        return Err(TransferFailure::SizeMismatch {
            local: local_size,
            remote: header.file_size,
        });
    }
    if header.transfer_size != header.file_size {
        return Err(TransferFailure::PartialOffer {
            offered: header.transfer_size,
            total: header.file_size,
        });
    }
    Ok(())
}

fn first_difference(a: &[u8], b: &[u8]) -> Option<usize> {
    a.iter().zip(b).position(|(x, y)| x != y)
}

fn report_early(output: &OutputSink, hash: Hash256, failure: TransferFailure) -> TransferOutcome {
    output.line(format!("Error: {failure}"));
    TransferOutcome::failed_early(hash, failure)
}

fn report(output: &OutputSink, outcome: &TransferOutcome, expected: u64) {
    if let Err(failure) = &outcome.result {
        match failure {
            TransferFailure::DataMismatch {
                offset,
                remote,
                local,
            } => {
                let chunk_start = offset - first_difference(remote, local).unwrap_or(0) as u64;
                output.write(format!(
                    "Offset {offset:08X}   DATA MISMATCH in chunk at {chunk_start:08X}\n\
                     ---- DATA FROM REMOTE:\n{}---- DATA FROM LOCAL WAREHOUSE:\n{}",
                    hex_dump(remote),
                    hex_dump(local)
                ));
            }
            failure => output.line(format!("Error: {failure}")),
        }
    }

    if let Some(reason) = outcome.terminate_reason {
        output.line(format!(
            "Terminate reason {}: {}",
            reason.code(),
            reason.describe()
        ));
    }
    output.line(format!(
        "Transfer took {}. Speed is {:.2} KB/s",
        format_duration(outcome.elapsed),
        outcome.throughput_kbps()
    ));
    output.line(format!(
        "Finished reading total of {} bytes. Expected {} bytes.",
        outcome.bytes_compared, expected
    ));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryBackend;
    use crate::domain::{BufferWriter, KeyPair, TerminateReason};

    struct Fixture {
        backend: Arc<InMemoryBackend>,
        verifier: TransferVerifier,
        peer: PeerInfo,
        buffer: Arc<BufferWriter>,
        output: OutputSink,
    }

    fn fixture(chunk_size: usize) -> Fixture {
        let backend = Arc::new(InMemoryBackend::new(KeyPair::generate()));
        let config = TransferConfig {
            chunk_size,
            ..TransferConfig::default()
        };
        let verifier = TransferVerifier::new(backend.clone(), config);
        let peer = InMemoryBackend::connected_peer(KeyPair::generate().public_key());
        let buffer = BufferWriter::new();
        let output = OutputSink::from(buffer.clone());
        Fixture {
            backend,
            verifier,
            peer,
            buffer,
            output,
        }
    }

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[tokio::test]
    async fn test_matching_file_verifies() {
        let f = fixture(64);
        let data = sample(1000);
        let hash = f.backend.store_data_local(&data).unwrap();
        f.backend.add_remote_file(hash, data);

        let outcome = f
            .verifier
            .run(&f.peer, hash, &f.output, &CancellationToken::new())
            .await;

        assert!(outcome.is_success(), "{:?}", outcome.result);
        assert_eq!(outcome.bytes_compared, 1000);
        let text = f.buffer.drain();
        assert!(text.contains("1. Peer connected"));
        assert!(text.contains("2. Opened transfer for file"));
        assert!(text.contains("3. Matching transfer size 1000 and file size 1000"));
        assert!(text.contains("Finished reading total of 1000 bytes. Expected 1000 bytes."));
    }

    #[tokio::test]
    async fn test_size_mismatch_compares_nothing() {
        let f = fixture(64);
        let data = sample(500);
        let hash = f.backend.store_data_local(&data).unwrap();
        f.backend.add_remote_file_with_header(
            hash,
            data,
            TransferHeader {
                file_size: 501,
                transfer_size: 501,
            },
        );

        let outcome = f
            .verifier
            .run(&f.peer, hash, &f.output, &CancellationToken::new())
            .await;

        assert_eq!(outcome.bytes_compared, 0);
        assert_eq!(
            outcome.failure(),
            Some(&TransferFailure::SizeMismatch {
                local: 500,
                remote: 501
            })
        );
        assert!(f.backend.remote_bytes_served(&hash) == 0);
    }

    #[tokio::test]
    async fn test_partial_offer_rejected() {
        let f = fixture(64);
        let data = sample(500);
        let hash = f.backend.store_data_local(&data).unwrap();
        f.backend.add_remote_file_with_header(
            hash,
            data,
            TransferHeader {
                file_size: 500,
                transfer_size: 200,
            },
        );

        let outcome = f
            .verifier
            .run(&f.peer, hash, &f.output, &CancellationToken::new())
            .await;
        assert!(matches!(
            outcome.failure(),
            Some(TransferFailure::PartialOffer {
                offered: 200,
                total: 500
            })
        ));
    }

    #[tokio::test]
    async fn test_mismatch_reports_exact_offset() {
        let chunk = 64;
        let f = fixture(chunk);
        let local = sample(1000);
        let mut remote = local.clone();
        let diverge_at = 300;
        remote[diverge_at] ^= 0xFF;

        let hash = f.backend.store_data_local(&local).unwrap();
        f.backend.add_remote_file(hash, remote);

        let outcome = f
            .verifier
            .run(&f.peer, hash, &f.output, &CancellationToken::new())
            .await;

        match outcome.failure() {
            Some(TransferFailure::DataMismatch { offset, .. }) => {
                assert_eq!(*offset, diverge_at as u64)
            }
            other => panic!("expected data mismatch, got {other:?}"),
        }
        assert_eq!(outcome.bytes_compared, diverge_at as u64);
        assert!(f.backend.remote_bytes_served(&hash) <= (diverge_at + chunk) as u64);

        let text = f.buffer.drain();
        assert!(text.contains("DATA MISMATCH"));
        assert!(text.contains("---- DATA FROM REMOTE:"));
        assert!(text.contains("---- DATA FROM LOCAL WAREHOUSE:"));
    }

    #[tokio::test]
    async fn test_short_remote_stream_is_incomplete() {
        let f = fixture(64);
        let data = sample(400);
        let hash = f.backend.store_data_local(&data).unwrap();
        f.backend.add_remote_file_with_header(
            hash,
            data[..100].to_vec(),
            TransferHeader {
                file_size: 400,
                transfer_size: 400,
            },
        );

        let outcome = f
            .verifier
            .run(&f.peer, hash, &f.output, &CancellationToken::new())
            .await;
        assert_eq!(
            outcome.failure(),
            Some(&TransferFailure::Incomplete {
                received: 100,
                expected: 400
            })
        );
    }

    #[tokio::test]
    async fn test_remote_shutdown_mid_transfer_is_terminated() {
        let f = fixture(64);
        let data = sample(400);
        let hash = f.backend.store_data_local(&data).unwrap();
        f.backend.add_remote_file_with_header(
            hash,
            data[..100].to_vec(),
            TransferHeader {
                file_size: 400,
                transfer_size: 400,
            },
        );
        f.backend
            .set_remote_end_reason(&hash, TerminateReason::RemoteSentShutdown);

        let outcome = f
            .verifier
            .run(&f.peer, hash, &f.output, &CancellationToken::new())
            .await;
        assert_eq!(
            outcome.failure(),
            Some(&TransferFailure::RemoteTerminated {
                reason: TerminateReason::RemoteSentShutdown,
                received: 100,
            })
        );
        assert_eq!(outcome.bytes_compared, 100);
        assert!(f.buffer.drain().contains("Terminate reason 1003"));
    }

    #[tokio::test]
    async fn test_remote_not_storing_file_is_terminated() {
        let f = fixture(64);
        let hash = f.backend.store_data_local(&sample(50)).unwrap();

        let outcome = f
            .verifier
            .run(&f.peer, hash, &f.output, &CancellationToken::new())
            .await;
        assert_eq!(
            outcome.failure(),
            Some(&TransferFailure::RemoteTerminated {
                reason: TerminateReason::FileNotStored,
                received: 0,
            })
        );
    }

    #[tokio::test]
    async fn test_missing_local_file_fails_early() {
        let f = fixture(64);
        let hash = Hash256::digest(b"absent");
        let outcome = f
            .verifier
            .run(&f.peer, hash, &f.output, &CancellationToken::new())
            .await;
        assert_eq!(outcome.failure(), Some(&TransferFailure::NotStoredLocally(hash)));
        assert_eq!(outcome.terminate_reason, None);
    }

    #[tokio::test]
    async fn test_cancelled_run() {
        let f = fixture(64);
        let data = sample(100);
        let hash = f.backend.store_data_local(&data).unwrap();
        f.backend.add_remote_file(hash, data);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = f.verifier.run(&f.peer, hash, &f.output, &cancel).await;
        assert_eq!(outcome.failure(), Some(&TransferFailure::Cancelled));
    }
}
