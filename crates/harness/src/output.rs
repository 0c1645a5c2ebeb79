//! In-memory capture of service logs and subprocess output.

use std::fmt;
use std::io;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;
use tracing::Dispatch;
use tracing_subscriber::fmt::MakeWriter;

/// Shared, append-only byte buffer.
///
/// Clones share the same storage. Used both as a `tracing` writer for the
/// servers of one node and as the sink of the engine's stdout and stderr.
#[derive(Clone, Default)]
pub struct OutputBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, bytes: &[u8]) {
        self.inner.lock().extend_from_slice(bytes);
    }

    /// Everything captured so far, decoded lossily as UTF-8.
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.inner.lock()).into_owned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    /// A `tracing` dispatcher whose records are formatted into this buffer.
    ///
    /// Records at `DEBUG` and above are kept, without ANSI colors.
    pub fn dispatch(&self) -> Dispatch {
        let subscriber = tracing_subscriber::fmt()
            .with_writer(self.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        Dispatch::new(subscriber)
    }

    /// Copy `reader` into the buffer until end of stream.
    ///
    /// A read error ends the copy and is recorded in the buffer itself.
    pub fn capture<R>(&self, mut reader: R) -> JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let sink = self.clone();
        tokio::spawn(async move {
            let mut chunk = vec![0u8; 8 * 1024];
            loop {
                match reader.read(&mut chunk).await {
                    Ok(0) => break,
                    Ok(n) => sink.append(&chunk[..n]),
                    Err(e) => {
                        sink.append(format!("<output capture failed: {e}>\n").as_bytes());
                        break;
                    }
                }
            }
        })
    }
}

impl fmt::Debug for OutputBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputBuffer")
            .field("len", &self.len())
            .finish()
    }
}

impl io::Write for OutputBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.append(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for OutputBuffer {
    type Writer = OutputBuffer;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_storage() {
        let buffer = OutputBuffer::new();
        let clone = buffer.clone();
        clone.append(b"hello ");
        buffer.append(b"world");
        assert_eq!(buffer.contents(), "hello world");
        assert_eq!(clone.len(), 11);

        clone.clear();
        assert!(buffer.is_empty());
    }

    #[test]
    fn dispatch_writes_records_into_the_buffer() {
        let buffer = OutputBuffer::new();
        let dispatch = buffer.dispatch();
        tracing::dispatcher::with_default(&dispatch, || {
            tracing::info!(node = 4, "service started");
            tracing::trace!("dropped below debug");
        });

        let contents = buffer.contents();
        assert!(contents.contains("service started"), "{contents}");
        assert!(contents.contains("node=4"), "{contents}");
        assert!(!contents.contains("dropped below debug"), "{contents}");
        assert!(!contents.contains('\u{1b}'), "ansi escapes in {contents:?}");
    }

    #[tokio::test]
    async fn capture_copies_until_eof() {
        let buffer = OutputBuffer::new();
        let (mut writer, reader) = tokio::io::duplex(16);
        let task = buffer.capture(reader);

        tokio::io::AsyncWriteExt::write_all(&mut writer, b"line one\nline two\n")
            .await
            .unwrap();
        drop(writer);
        task.await.unwrap();

        assert_eq!(buffer.contents(), "line one\nline two\n");
    }
}
