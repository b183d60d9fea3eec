use bytes::Bytes;

use crate::common::PlaybackError;

pub type Chunk = Result<Bytes, PlaybackError>;

/// Byte stream produced by a source.
///
/// Chunks arrive over a bounded channel; an `Err` chunk is terminal and a
/// closed channel is end-of-stream. Dropping the stream tells the producer to
/// stop.
pub struct SourceStream {
    rx: flume::Receiver<Chunk>,
    finished: bool,
}

impl SourceStream {
    pub fn channel(capacity: usize) -> (flume::Sender<Chunk>, Self) {
        let (tx, rx) = flume::bounded(capacity);
        (
            tx,
            Self {
                rx,
                finished: false,
            },
        )
    }

    /// Next chunk, or `None` once the stream is exhausted.
    pub async fn next_chunk(&mut self) -> Option<Chunk> {
        if self.finished {
            return None;
        }
        match self.rx.recv_async().await {
            Ok(Ok(bytes)) => Some(Ok(bytes)),
            Ok(Err(e)) => {
                self.finished = true;
                Some(Err(e))
            }
            Err(_) => {
                self.finished = true;
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn error_chunk_is_terminal() {
        let (tx, mut stream) = SourceStream::channel(4);
        tx.send(Ok(Bytes::from_static(b"abc"))).unwrap();
        tx.send(Err(PlaybackError::InvalidSource("x".into()))).unwrap();
        tx.send(Ok(Bytes::from_static(b"never"))).unwrap();

        assert_eq!(&stream.next_chunk().await.unwrap().unwrap()[..], b"abc");
        assert!(stream.next_chunk().await.unwrap().is_err());
        assert!(stream.next_chunk().await.is_none());
    }

    #[tokio::test]
    async fn closed_channel_ends_stream() {
        let (tx, mut stream) = SourceStream::channel(1);
        drop(tx);
        assert!(stream.next_chunk().await.is_none());
    }
}
