use std::collections::{HashMap, HashSet};

use crate::{playlist::Entry, scheduler::ValidatedStream};

pub const DEFAULT_EPG_URL: &str =
    "https://epgshare01.online/epgshare01/epg_ripper_DUMMY_CHANNELS.xml.gz";
pub const DEFAULT_TVG_ID: &str = "Blank.Dummy.us";
pub const DEFAULT_LOGO_URL: &str =
    "https://github.com/BuddyChewChew/gen-playlist/blob/main/docs/chb.png?raw=true";

/// Fixed metadata stamped onto the generated playlist
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistStyle {
    pub epg_url: String,
    pub tvg_id: String,
    pub logo_url: String,
    /// Emit headers of groups that end up with no stream at all
    pub keep_empty_groups: bool,
}

impl Default for PlaylistStyle {
    fn default() -> Self {
        Self {
            epg_url: DEFAULT_EPG_URL.to_string(),
            tvg_id: DEFAULT_TVG_ID.to_string(),
            logo_url: DEFAULT_LOGO_URL.to_string(),
            keep_empty_groups: false,
        }
    }
}

impl PlaylistStyle {
    fn header(&self) -> [String; 2] {
        [
            format!("#EXTM3U x-tvg-url=\"{}\"", self.epg_url),
            format!("#EXT-X-TVG-URL: {}", self.epg_url),
        ]
    }

    fn group_header(&self, group: &str) -> [String; 2] {
        [
            format!(
                "#EXTINF:-1 tvg-id=\"{}\" group-title=\"{group}\",{group}",
                self.tvg_id
            ),
            format!("#{group}"),
        ]
    }

    fn stream_info(&self, group: &str, display_name: &str) -> String {
        format!(
            "#EXTINF:-1 tvg-id=\"{}\" tvg-logo=\"{}\" group-title=\"{group}\",{}",
            self.tvg_id,
            self.logo_url,
            short_name(display_name)
        )
    }
}

/// Players show little room for names, only the part before the first space is kept
fn short_name(display_name: &str) -> &str {
    display_name
        .split_once(' ')
        .map_or(display_name, |(first, _)| first)
}

/// Renders the playlist lines in source order.
///
/// Only entries with a matching validated stream are kept, and each resolved
/// URL is written once, by the first entry that reaches it. A group header is
/// written right before the first stream kept in that group, unless
/// [`PlaylistStyle::keep_empty_groups`] asks for every header.
#[must_use]
pub fn render(entries: &[Entry], validated: &[ValidatedStream], style: &PlaylistStyle) -> Vec<String> {
    let mut confirmed: HashMap<(&str, &str, &str), &str> = HashMap::with_capacity(validated.len());
    for v in validated {
        confirmed
            .entry((
                v.display_name.as_str(),
                v.group.as_str(),
                v.source_url.as_str(),
            ))
            .or_insert(v.resolved_url.as_str());
    }

    let mut lines = Vec::from(style.header());
    let mut emitted = HashSet::new();
    let mut pending_group: Option<&str> = None;

    for entry in entries {
        match entry {
            Entry::Group { name } => {
                if style.keep_empty_groups {
                    lines.extend(style.group_header(name));
                    pending_group = None;
                } else {
                    pending_group = Some(name.as_str());
                }
            }
            Entry::Stream(stream) => {
                let key = (
                    stream.display_name.as_str(),
                    stream.group.as_str(),
                    stream.url.as_str(),
                );
                let Some(&resolved_url) = confirmed.get(&key) else {
                    continue;
                };
                if !emitted.insert(resolved_url) {
                    continue;
                }

                if let Some(group) = pending_group.take() {
                    lines.extend(style.group_header(group));
                }
                lines.push(style.stream_info(&stream.group, &stream.display_name));
                lines.push(resolved_url.to_string());
            }
        }
    }

    lines
}

/// Joins rendered lines into the file content
#[must_use]
pub fn to_document(lines: &[String]) -> String {
    lines.join("\n")
}
