use crate::util::is_valid_url;

/// Suffix that marks a line as the start of a channel group
pub const GROUP_MARKER: &str = ",#genre#";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub display_name: String,
    pub url: String,
    /// Name of the closest group above this stream, empty if there is none
    pub group: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    Group { name: String },
    Stream(StreamEntry),
}

impl Entry {
    #[must_use]
    pub const fn as_stream(&self) -> Option<&StreamEntry> {
        match self {
            Self::Stream(stream) => Some(stream),
            Self::Group { .. } => None,
        }
    }
}

/// Parses a loose `name,url` channel list into ordered entries.
///
/// Lines look like either `<Group>,#genre#` or `<Name>,<URL>`. Anything else
/// (including a name whose trailing field is not a URL) is skipped.
#[must_use]
pub fn parse_playlist(content: &str) -> Vec<Entry> {
    let mut entries = Vec::new();
    let mut current_group = String::new();

    for line in content.split(['\r', '\n']) {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(name) = line.strip_suffix(GROUP_MARKER) {
            current_group = name.trim().to_string();
            entries.push(Entry::Group {
                name: current_group.clone(),
            });
            continue;
        }

        // Channel names may contain commas, URLs practically never do
        let Some((name, url)) = line.rsplit_once(',') else {
            continue;
        };
        let url = url.trim();
        if !is_valid_url(url) {
            continue;
        }

        entries.push(Entry::Stream(StreamEntry {
            display_name: name.trim().to_string(),
            url: url.to_string(),
            group: current_group.clone(),
        }));
    }

    entries
}

/// Streams of `entries`, in source order
pub fn streams(entries: &[Entry]) -> impl Iterator<Item = &StreamEntry> {
    entries.iter().filter_map(Entry::as_stream)
}
