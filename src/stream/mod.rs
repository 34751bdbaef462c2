use std::collections::HashMap;
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::RwLock;

use async_trait::async_trait;
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;

use crate::error::PlaybackError;
use crate::models::TrackRef;

/// Forward-only compressed audio byte stream
pub type ByteStream = Box<dyn AsyncRead + Send + Unpin>;

/// Source of compressed audio for a track.
///
/// Implementations must give up promptly once `cancel` fires; a cancelled
/// open may return any error, the orchestrator discards it.
#[async_trait]
pub trait StreamProvider: Send + Sync {
    async fn open(
        &self,
        track: &TrackRef,
        cancel: CancellationToken,
    ) -> Result<ByteStream, PlaybackError>;
}

/// Streams tracks from the local filesystem. Track ids are paths, either
/// absolute or relative to the library root.
pub struct FileStreamProvider {
    root: PathBuf,
}

impl FileStreamProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn resolve(&self, track: &TrackRef) -> PathBuf {
        let path = PathBuf::from(&track.track_id);
        if path.is_absolute() {
            path
        } else {
            self.root.join(path)
        }
    }
}

#[async_trait]
impl StreamProvider for FileStreamProvider {
    async fn open(
        &self,
        track: &TrackRef,
        cancel: CancellationToken,
    ) -> Result<ByteStream, PlaybackError> {
        let path = self.resolve(track);
        log::debug!("Opening {}", path.display());

        let file = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(PlaybackError::StreamOpenFailure {
                    track: track.track_id.clone(),
                    reason: "cancelled".to_string(),
                });
            }
            result = tokio::fs::File::open(&path) => result,
        };

        let file = file.map_err(|e| PlaybackError::StreamOpenFailure {
            track: track.track_id.clone(),
            reason: format!("{}: {}", path.display(), e),
        })?;

        Ok(Box::new(file))
    }
}

/// Serves tracks from memory. Useful for tests and for pre-fetched content.
#[derive(Default)]
pub struct MemoryStreamProvider {
    tracks: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStreamProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, track_id: impl Into<String>, data: Vec<u8>) {
        let mut tracks = self.tracks.write().unwrap_or_else(|e| e.into_inner());
        tracks.insert(track_id.into(), data);
    }

    pub fn contains(&self, track_id: &str) -> bool {
        let tracks = self.tracks.read().unwrap_or_else(|e| e.into_inner());
        tracks.contains_key(track_id)
    }
}

#[async_trait]
impl StreamProvider for MemoryStreamProvider {
    async fn open(
        &self,
        track: &TrackRef,
        _cancel: CancellationToken,
    ) -> Result<ByteStream, PlaybackError> {
        let tracks = self.tracks.read().unwrap_or_else(|e| e.into_inner());
        match tracks.get(&track.track_id) {
            Some(data) => Ok(Box::new(Cursor::new(data.clone()))),
            None => Err(PlaybackError::StreamOpenFailure {
                track: track.track_id.clone(),
                reason: "track not found".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_file_provider_reads_relative_track() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("song.mp3"), b"abcdef").unwrap();

        let provider = FileStreamProvider::new(temp_dir.path());
        let mut stream = provider
            .open(&TrackRef::new("song.mp3"), CancellationToken::new())
            .await
            .unwrap();

        let mut data = Vec::new();
        stream.read_to_end(&mut data).await.unwrap();
        assert_eq!(data, b"abcdef");
    }

    #[tokio::test]
    async fn test_file_provider_missing_track() {
        let temp_dir = TempDir::new().unwrap();
        let provider = FileStreamProvider::new(temp_dir.path());

        match provider.open(&TrackRef::new("missing.mp3"), CancellationToken::new()).await {
            Err(PlaybackError::StreamOpenFailure { track, .. }) => assert_eq!(track, "missing.mp3"),
            other => panic!("Expected StreamOpenFailure, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_file_provider_absolute_path() {
        let provider = FileStreamProvider::new("/music");
        let absolute = std::env::temp_dir().join("x.mp3");
        let track = TrackRef::new(absolute.to_string_lossy());
        assert_eq!(provider.resolve(&track), absolute);
        assert_eq!(
            provider.resolve(&TrackRef::new("a/b.mp3")),
            PathBuf::from("/music/a/b.mp3")
        );
    }

    #[tokio::test]
    async fn test_memory_provider() {
        let provider = MemoryStreamProvider::new();
        provider.insert("t1", vec![1, 2, 3]);
        assert!(provider.contains("t1"));

        let mut stream = provider.open(&TrackRef::new("t1"), CancellationToken::new()).await.unwrap();
        let mut data = Vec::new();
        stream.read_to_end(&mut data).await.unwrap();
        assert_eq!(data, vec![1, 2, 3]);

        assert!(provider.open(&TrackRef::new("t2"), CancellationToken::new()).await.is_err());
    }
}
