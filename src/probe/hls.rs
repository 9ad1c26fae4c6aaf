//! Classification of downloaded `.m3u` / `.m3u8` bodies

const PLAYLIST_HEADER: &str = "#EXTM3U";
const STREAM_INF: &str = "#EXT-X-STREAM-INF";
const SEGMENT_INF: &str = "#EXTINF";
const MEDIA_SEQUENCE: &str = "EXT-X-MEDIA-SEQUENCE";
const TS_EXTENSION: &str = ".ts";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaylistBody {
    /// Missing the `#EXTM3U` header
    NotPlaylist,
    /// Master playlist, holding the first variant URI exactly as written
    Master { variant: String },
    /// Media playlist listing segments
    Media,
    /// A playlist with nothing playable in it
    Unplayable,
}

/// Decides what a playlist body is.
///
/// A master playlist without any usable variant is judged on its segments
/// like any other playlist.
#[must_use]
pub fn inspect(body: &str) -> PlaylistBody {
    if !body.contains(PLAYLIST_HEADER) {
        return PlaylistBody::NotPlaylist;
    }

    if body.contains(STREAM_INF) {
        if let Some(variant) = first_variant(body) {
            return PlaylistBody::Master { variant };
        }
    }

    if body.contains(SEGMENT_INF) && (body.contains(TS_EXTENSION) || body.contains(MEDIA_SEQUENCE))
    {
        PlaylistBody::Media
    } else {
        PlaylistBody::Unplayable
    }
}

fn first_variant(body: &str) -> Option<String> {
    match m3u8_rs::parse_master_playlist_res(body.as_bytes()) {
        Ok(master) => master
            .variants
            .into_iter()
            .map(|v| (v.is_i_frame, v.uri.trim().to_string()))
            .find(|(is_i_frame, uri)| !is_i_frame && !uri.is_empty() && !uri.starts_with('#'))
            .map(|(_, uri)| uri)
            .or_else(|| first_variant_line(body)),
        Err(_) => first_variant_line(body),
    }
}

/// Fallback for masters `m3u8-rs` refuses: the first URI line after an
/// `#EXT-X-STREAM-INF` tag.
fn first_variant_line(body: &str) -> Option<String> {
    let mut lines = body.lines().map(str::trim);
    while let Some(line) = lines.next() {
        if !line.starts_with(STREAM_INF) {
            continue;
        }
        if let Some(uri) = lines.by_ref().find(|l| !l.is_empty()) {
            if !uri.starts_with('#') {
                return Some(uri.to_string());
            }
        }
    }
    None
}
