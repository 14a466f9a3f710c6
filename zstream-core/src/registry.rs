//! Stream registry
//!
//! In-process source of truth for tracked streams. Every mutation writes the
//! full list back to a JSON snapshot before returning, with ids renumbered
//! densely so the snapshot always reads "1".."n".

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::matching::{eq_fold, Ladder, MatchTier};
use crate::models::{NewStream, TrackedStream};
use crate::Result;

pub struct StreamRegistry {
    path: PathBuf,
    /// Held across the snapshot write so snapshots land in mutation order
    streams: Mutex<Vec<TrackedStream>>,
}

impl StreamRegistry {
    /// Load the snapshot at `path`. A missing or unreadable snapshot starts
    /// an empty registry; a legacy hardware-decoding map, when present, is
    /// folded into the loaded records and then removed.
    pub async fn open(path: impl Into<PathBuf>, legacy_hw_decoding: Option<&Path>) -> Self {
        let path = path.into();
        let streams = load_snapshot(&path).await;
        info!(path = %path.display(), count = streams.len(), "Stream registry loaded");

        let registry = Self {
            path,
            streams: Mutex::new(streams),
        };

        if let Some(legacy) = legacy_hw_decoding {
            if let Err(e) = registry.migrate_legacy_hw_decoding(legacy).await {
                warn!(path = %legacy.display(), error = %e, "Legacy hardware decoding migration failed");
            }
        }

        registry
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn list(&self) -> Vec<TrackedStream> {
        self.streams.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.streams.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.streams.lock().await.is_empty()
    }

    pub async fn get(&self, id: &str) -> Option<TrackedStream> {
        self.streams.lock().await.iter().find(|s| s.id == id).cloned()
    }

    /// Look a stream up by display name, then case-insensitively, then by
    /// the Twitch login in its channel URL
    pub async fn find_by_name(&self, name: &str) -> Option<TrackedStream> {
        let streams = self.streams.lock().await;
        name_ladder(name).find(&streams).cloned()
    }

    pub async fn add(&self, new: NewStream) -> Result<TrackedStream> {
        let mut streams = self.streams.lock().await;
        let stream = TrackedStream {
            id: (streams.len() + 1).to_string(),
            name: new.name,
            twitch_url: new.twitch_url,
            quality: new.quality,
            m3u8_url: new.m3u8_url,
            is_z_event_streamer: new.is_z_event_streamer,
            hardware_decoding: Some(new.hardware_decoding),
        };
        let mut next = streams.clone();
        next.push(stream.clone());
        self.commit(&mut streams, next).await?;
        info!(stream = %stream.name, id = %stream.id, "Stream added");
        Ok(stream)
    }

    /// Remove by id, returning the removed record
    pub async fn remove(&self, id: &str) -> Result<Option<TrackedStream>> {
        let mut streams = self.streams.lock().await;
        let Some(index) = streams.iter().position(|s| s.id == id) else {
            return Ok(None);
        };
        let mut next = streams.clone();
        let removed = next.remove(index);
        self.commit(&mut streams, next).await?;
        info!(stream = %removed.name, "Stream removed");
        Ok(Some(removed))
    }

    pub async fn update_quality(
        &self,
        id: &str,
        quality: &str,
        m3u8_url: &str,
    ) -> Result<Option<TrackedStream>> {
        let mut streams = self.streams.lock().await;
        let mut next = streams.clone();
        let Some(stream) = next.iter_mut().find(|s| s.id == id) else {
            return Ok(None);
        };
        stream.quality = quality.to_string();
        stream.m3u8_url = m3u8_url.to_string();
        let updated = stream.clone();
        self.commit(&mut streams, next).await?;
        Ok(Some(updated))
    }

    /// Store the hardware decoding preference. `Ok(false)` when no stream
    /// matches `name`.
    pub async fn set_hardware_decoding(&self, name: &str, enabled: bool) -> Result<bool> {
        let mut streams = self.streams.lock().await;
        let Some(index) = name_ladder(name)
            .find(&streams)
            .and_then(|hit| streams.iter().position(|s| s.id == hit.id))
        else {
            return Ok(false);
        };
        if streams[index].hardware_decoding == Some(enabled) {
            return Ok(true);
        }
        let mut next = streams.clone();
        next[index].hardware_decoding = Some(enabled);
        self.commit(&mut streams, next).await?;
        debug!(stream = %name, enabled, "Hardware decoding preference stored");
        Ok(true)
    }

    /// Explicitly stored preference; `None` when the stream is unknown or
    /// never had one recorded
    pub async fn hardware_decoding(&self, name: &str) -> Option<bool> {
        self.find_by_name(name).await.and_then(|s| s.hardware_decoding)
    }

    /// Recompute the advisory participant flag. Returns how many records
    /// changed; the snapshot is only rewritten when something did.
    pub async fn apply_zevent_participants(&self, participants: &HashSet<String>) -> Result<usize> {
        let mut streams = self.streams.lock().await;
        let mut next = streams.clone();
        let mut changed = 0;
        for stream in &mut next {
            let is_participant = stream
                .channel_login()
                .is_some_and(|login| participants.contains(&login.to_lowercase()));
            if stream.is_z_event_streamer != is_participant {
                stream.is_z_event_streamer = is_participant;
                changed += 1;
            }
        }
        if changed > 0 {
            self.commit(&mut streams, next).await?;
        }
        Ok(changed)
    }

    async fn migrate_legacy_hw_decoding(&self, legacy: &Path) -> Result<()> {
        let raw = match tokio::fs::read_to_string(legacy).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let preferences: HashMap<String, bool> = serde_json::from_str(&raw)?;

        let mut streams = self.streams.lock().await;
        let mut next = streams.clone();
        let mut migrated = 0;
        for stream in next.iter_mut().filter(|s| s.hardware_decoding.is_none()) {
            if let Some(enabled) = preferences.get(&stream.name) {
                stream.hardware_decoding = Some(*enabled);
                migrated += 1;
            }
        }
        self.commit(&mut streams, next).await?;
        tokio::fs::remove_file(legacy).await?;
        info!(migrated, path = %legacy.display(), "Migrated legacy hardware decoding preferences");
        Ok(())
    }

    /// Write `next` and only then make it the in-memory list, so a failed
    /// write leaves both untouched
    async fn commit(&self, streams: &mut Vec<TrackedStream>, mut next: Vec<TrackedStream>) -> Result<()> {
        self.persist(&mut next).await?;
        *streams = next;
        Ok(())
    }

    async fn persist(&self, streams: &mut [TrackedStream]) -> Result<()> {
        for (index, stream) in streams.iter_mut().enumerate() {
            stream.id = (index + 1).to_string();
        }
        let json = serde_json::to_vec_pretty(&*streams)?;

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), count = streams.len(), "Registry snapshot written");
        Ok(())
    }
}

fn name_ladder(name: &str) -> Ladder<'_, TrackedStream> {
    Ladder::new()
        .tier(MatchTier::Exact, move |s: &TrackedStream| s.name == name)
        .tier(MatchTier::CaseInsensitive, move |s: &TrackedStream| eq_fold(&s.name, name))
        .tier(MatchTier::Heuristic, move |s: &TrackedStream| {
            !name.is_empty() && s.channel_login().is_some_and(|login| eq_fold(&login, name))
        })
}

async fn load_snapshot(path: &Path) -> Vec<TrackedStream> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read registry snapshot");
            return Vec::new();
        }
    };
    serde_json::from_str(&raw).unwrap_or_else(|e| {
        warn!(path = %path.display(), error = %e, "Registry snapshot is corrupt, starting empty");
        Vec::new()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::new_stream;

    #[tokio::test]
    async fn test_ids_are_renumbered_densely() {
        let dir = tempfile::tempdir().unwrap();
        let registry = StreamRegistry::open(dir.path().join("streams.json"), None).await;

        registry.add(new_stream("a")).await.unwrap();
        registry.add(new_stream("b")).await.unwrap();
        registry.add(new_stream("c")).await.unwrap();

        let removed = registry.remove("1").await.unwrap().unwrap();
        assert_eq!(removed.name, "a");

        let streams = registry.list().await;
        let ids: Vec<_> = streams.iter().map(|s| (s.id.as_str(), s.name.as_str())).collect();
        assert_eq!(ids, vec![("1", "b"), ("2", "c")]);

        assert!(registry.remove("9").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_snapshot_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("streams.json");

        let registry = StreamRegistry::open(&path, None).await;
        registry.add(new_stream("alice")).await.unwrap();
        registry.update_quality("1", "1080p", "https://cdn/new.m3u8").await.unwrap();
        registry.set_hardware_decoding("ALICE", true).await.unwrap();
        drop(registry);

        let reopened = StreamRegistry::open(&path, None).await;
        let stream = reopened.get("1").await.unwrap();
        assert_eq!(stream.quality, "1080p");
        assert_eq!(stream.m3u8_url, "https://cdn/new.m3u8");
        assert_eq!(stream.hardware_decoding, Some(true));
        assert!(!dir.path().join("streams.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_failed_write_keeps_memory_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let missing = StreamRegistry::open(dir.path().join("missing_dir").join("streams.json"), None).await;
        assert!(missing.add(new_stream("alice")).await.is_err());
        assert!(missing.is_empty().await);

        let data_dir = dir.path().join("data");
        std::fs::create_dir(&data_dir).unwrap();
        let registry = StreamRegistry::open(data_dir.join("streams.json"), None).await;
        registry.add(new_stream("alice")).await.unwrap();
        std::fs::remove_dir_all(&data_dir).unwrap();

        assert!(registry.add(new_stream("bob")).await.is_err());
        assert!(registry.update_quality("1", "1080p", "https://cdn/new.m3u8").await.is_err());
        assert!(registry.set_hardware_decoding("alice", true).await.is_err());
        assert!(registry.remove("1").await.is_err());

        let streams = registry.list().await;
        assert_eq!(streams.len(), 1);
        assert_eq!(streams[0].name, "alice");
        assert_eq!(streams[0].m3u8_url, new_stream("alice").m3u8_url);
        assert_eq!(streams[0].hardware_decoding, Some(false));
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("streams.json");
        std::fs::write(&path, "{not json").unwrap();

        let registry = StreamRegistry::open(&path, None).await;
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_find_by_name_ladder() {
        let dir = tempfile::tempdir().unwrap();
        let registry = StreamRegistry::open(dir.path().join("streams.json"), None).await;
        let mut stream = new_stream("Pretty Name");
        stream.twitch_url = "https://www.twitch.tv/login_42".to_string();
        registry.add(stream).await.unwrap();

        assert!(registry.find_by_name("Pretty Name").await.is_some());
        assert!(registry.find_by_name("pretty name").await.is_some());
        assert!(registry.find_by_name("LOGIN_42").await.is_some());
        assert!(registry.find_by_name("nobody").await.is_none());
        assert_eq!(registry.hardware_decoding("nobody").await, None);
        assert!(!registry.set_hardware_decoding("nobody", true).await.unwrap());
    }

    #[tokio::test]
    async fn test_legacy_hw_decoding_migration() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("streams.json");
        let legacy = dir.path().join("hardware-decoding.json");
        std::fs::write(
            &path,
            r#"[{"id":"1","name":"alice","twitchUrl":"https://twitch.tv/alice","quality":"best","m3u8Url":"u"},
                {"id":"2","name":"bob","twitchUrl":"https://twitch.tv/bob","quality":"best","m3u8Url":"u","hardwareDecoding":false}]"#,
        )
        .unwrap();
        std::fs::write(&legacy, r#"{"alice":true,"bob":true}"#).unwrap();

        let registry = StreamRegistry::open(&path, Some(&legacy)).await;

        assert_eq!(registry.hardware_decoding("alice").await, Some(true));
        // explicit preferences win over the legacy map
        assert_eq!(registry.hardware_decoding("bob").await, Some(false));
        assert!(!legacy.exists());
    }

    #[tokio::test]
    async fn test_apply_zevent_participants() {
        let dir = tempfile::tempdir().unwrap();
        let registry = StreamRegistry::open(dir.path().join("streams.json"), None).await;
        let mut stream = new_stream("Zerator");
        stream.twitch_url = "https://twitch.tv/ZeratoR".to_string();
        registry.add(stream).await.unwrap();
        registry.add(new_stream("other")).await.unwrap();

        let participants: HashSet<String> = ["zerator".to_string()].into_iter().collect();
        assert_eq!(registry.apply_zevent_participants(&participants).await.unwrap(), 1);
        assert_eq!(registry.apply_zevent_participants(&participants).await.unwrap(), 0);
        assert!(registry.get("1").await.unwrap().is_z_event_streamer);
        assert!(!registry.get("2").await.unwrap().is_z_event_streamer);
    }
}
