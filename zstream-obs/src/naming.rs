//! Streamer name to OBS object resolution
//!
//! Managed objects are created under canonical names (`Stream_<name>`,
//! `Media_<name>`, `Chat_<name>`), but operators rename things by hand, so
//! lookups go through a ladder: exact canonical name, the same name ignoring
//! case, then a substring heuristic. Not finding anything is a normal answer.

use zstream_core::matching::{eq_fold, Ladder, MatchTier};

use crate::protocol::{Scene, SceneItem};

pub const MEDIA_INPUT_KIND: &str = "ffmpeg_source";
pub const CHAT_INPUT_KIND: &str = "browser_source";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Media,
    Chat,
}

impl SourceKind {
    const fn prefix(self) -> &'static str {
        match self {
            Self::Media => "Media",
            Self::Chat => "Chat",
        }
    }

    const fn token(self) -> &'static str {
        match self {
            Self::Media => "media",
            Self::Chat => "chat",
        }
    }

    const fn input_kind(self) -> &'static str {
        match self {
            Self::Media => MEDIA_INPUT_KIND,
            Self::Chat => CHAT_INPUT_KIND,
        }
    }

    const fn other(self) -> Self {
        match self {
            Self::Media => Self::Chat,
            Self::Chat => Self::Media,
        }
    }
}

#[must_use]
pub fn scene_name(streamer: &str) -> String {
    format!("Stream_{streamer}")
}

#[must_use]
pub fn source_name(streamer: &str, kind: SourceKind) -> String {
    format!("{}_{streamer}", kind.prefix())
}

/// Scene belonging to `streamer`, if any
#[must_use]
pub fn resolve_scene<'a>(scenes: &'a [Scene], streamer: &str) -> Option<&'a Scene> {
    let canonical = scene_name(streamer);
    let needle = streamer.to_lowercase();

    let mut ladder = Ladder::new()
        .tier(MatchTier::Exact, |s: &Scene| s.scene_name == canonical)
        .tier(MatchTier::CaseInsensitive, |s: &Scene| eq_fold(&s.scene_name, &canonical));
    if !needle.is_empty() {
        ladder = ladder.tier(MatchTier::Heuristic, |s: &Scene| {
            let name = s.scene_name.to_lowercase();
            name.contains(&needle) && name.contains("stream")
        });
    }

    let (scene, tier) = ladder.resolve(scenes)?;
    if tier != MatchTier::Exact {
        tracing::debug!(streamer, scene = %scene.scene_name, %tier, "Scene matched loosely");
    }
    Some(scene)
}

/// Media or chat scene item belonging to `streamer`, if any
#[must_use]
pub fn resolve_source<'a>(items: &'a [SceneItem], streamer: &str, kind: SourceKind) -> Option<&'a SceneItem> {
    let canonical = source_name(streamer, kind);
    let needle = streamer.to_lowercase();

    let mut ladder = Ladder::new()
        .tier(MatchTier::Exact, |i: &SceneItem| i.source_name == canonical)
        .tier(MatchTier::CaseInsensitive, |i: &SceneItem| eq_fold(&i.source_name, &canonical));
    if !needle.is_empty() {
        ladder = ladder.tier(MatchTier::Heuristic, |i: &SceneItem| {
            let name = i.source_name.to_lowercase();
            if !name.contains(&needle) || i.input_kind.as_deref() == Some(kind.other().input_kind()) {
                return false;
            }
            // the kind token must come from outside the streamer name itself
            let rest = name.replacen(&needle, "", 1);
            rest.contains(kind.token())
                || (kind == SourceKind::Media && i.input_kind.as_deref() == Some(MEDIA_INPUT_KIND))
        });
    }

    let (item, tier) = ladder.resolve(items)?;
    if tier != MatchTier::Exact {
        tracing::debug!(streamer, source = %item.source_name, %tier, "Source matched loosely");
    }
    Some(item)
}
