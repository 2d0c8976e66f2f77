use tokio::{
    io::{AsyncRead, AsyncReadExt},
    sync::mpsc,
    task::JoinHandle,
    time::{timeout_at, Instant},
};
use tracing::warn;

const READ_CHUNK: usize = 8 * 1024;

/// Drains one output stream of a child process in the background.
pub struct StreamCollector {
    reader: JoinHandle<()>,
    chunks: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl StreamCollector {
    pub fn spawn<A>(stream: Option<A>) -> Self
    where
        A: AsyncRead + Unpin + Send + 'static,
    {
        let (chunk_tx, chunks) = mpsc::unbounded_channel();
        let reader = tokio::spawn(async move {
            if let Some(stream) = stream {
                read_to_end(stream, chunk_tx).await;
            }
        });
        Self { reader, chunks }
    }

    /// Waits for the stream to hit EOF, but not past `deadline`: a grandchild
    /// that inherited the pipe may keep it open long after the child is gone.
    /// Whatever arrived until then is returned.
    pub async fn finish(self, deadline: Instant) -> String {
        let Self {
            mut reader,
            mut chunks,
        } = self;
        if timeout_at(deadline, &mut reader).await.is_err() {
            warn!("output stream still open after grace period, truncating");
            reader.abort();
            let _ = reader.await;
        }
        let mut bytes = Vec::new();
        while let Ok(chunk) = chunks.try_recv() {
            bytes.extend_from_slice(&chunk);
        }
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

async fn read_to_end<A: AsyncRead + Unpin>(mut stream: A, chunk_tx: mpsc::UnboundedSender<Vec<u8>>) {
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if chunk_tx.send(buf[..n].to_vec()).is_err() {
                    break;
                }
            }
            Err(io_error) => {
                warn!("unexpected io error when reading from stream: {}", io_error);
                break;
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use lazy_static::lazy_static;
    use tokio::{io::AsyncWriteExt, runtime::Runtime, time::Instant};

    use super::StreamCollector;

    lazy_static! {
        static ref RUNTIME: Runtime = Runtime::new().unwrap();
    }

    #[test]
    fn test_collects_until_eof() {
        RUNTIME.block_on(async {
            let (mut writer, reader) = tokio::io::duplex(16);
            let collector = StreamCollector::spawn(Some(reader));
            writer.write_all(b"hello ").await.unwrap();
            writer.write_all(b"world").await.unwrap();
            drop(writer);
            let deadline = Instant::now() + Duration::from_secs(1);
            assert_eq!("hello world", collector.finish(deadline).await);
        });
    }

    #[test]
    fn test_open_stream_is_cut_at_deadline() {
        RUNTIME.block_on(async {
            let (mut writer, reader) = tokio::io::duplex(64);
            let collector = StreamCollector::spawn(Some(reader));
            writer.write_all(b"partial").await.unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
            let deadline = Instant::now() + Duration::from_millis(100);
            assert_eq!("partial", collector.finish(deadline).await);
            drop(writer);
        });
    }

    #[test]
    fn test_missing_stream_is_empty() {
        RUNTIME.block_on(async {
            let collector = StreamCollector::spawn(None::<tokio::io::DuplexStream>);
            let deadline = Instant::now() + Duration::from_millis(100);
            assert_eq!("", collector.finish(deadline).await);
        });
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        RUNTIME.block_on(async {
            let (mut writer, reader) = tokio::io::duplex(16);
            let collector = StreamCollector::spawn(Some(reader));
            writer.write_all(&[b'o', b'k', 0xff]).await.unwrap();
            drop(writer);
            let deadline = Instant::now() + Duration::from_secs(1);
            assert_eq!("ok\u{fffd}", collector.finish(deadline).await);
        });
    }
}
