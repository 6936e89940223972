use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PlaylistSegment {
    pub uri: String,
    pub duration: f64,
}

/// Rolling media playlist. Completed segments are appended; once the window
/// is full the oldest entry is dropped and the media sequence advances so
/// players notice the slide.
#[derive(Debug)]
pub(crate) struct Playlist {
    target_duration: f64,
    media_sequence: u64,
    segments: VecDeque<PlaylistSegment>,
    max_segments: usize,
}

impl Playlist {
    pub fn new(target_duration: f64, max_segments: usize) -> Self {
        Self {
            target_duration,
            media_sequence: 0,
            segments: VecDeque::with_capacity(max_segments),
            max_segments,
        }
    }

    /// Append a completed segment, returning the evicted one if the window
    /// slid (the caller deletes its file).
    pub fn push(&mut self, segment: PlaylistSegment) -> Option<PlaylistSegment> {
        let evicted = if self.segments.len() == self.max_segments {
            self.media_sequence += 1;
            self.segments.pop_front()
        } else {
            None
        };
        self.segments.push_back(segment);
        evicted
    }

    pub fn segments(&self) -> impl Iterator<Item = &PlaylistSegment> {
        self.segments.iter()
    }

    pub fn render(&self, ended: bool) -> String {
        let target = self
            .segments
            .iter()
            .map(|segment| segment.duration)
            .fold(self.target_duration, f64::max)
            .ceil() as u64;

        let mut playlist = String::new();
        playlist.push_str("#EXTM3U\n");
        playlist.push_str("#EXT-X-VERSION:7\n");
        playlist.push_str(&format!("#EXT-X-TARGETDURATION:{target}\n"));
        playlist.push_str(&format!("#EXT-X-MEDIA-SEQUENCE:{}\n", self.media_sequence));
        for segment in &self.segments {
            playlist.push_str(&format!("#EXTINF:{:.3},\n", segment.duration));
            playlist.push_str(&format!("{}\n", segment.uri));
        }
        if ended {
            playlist.push_str("#EXT-X-ENDLIST\n");
        }
        playlist
    }

    /// Parse a rendered playlist back into its segment list. Used by readers
    /// that inspect the on-disk state (and by the tests).
    pub fn parse(contents: &str) -> Result<Vec<PlaylistSegment>, String> {
        if !contents.trim_start().starts_with("#EXTM3U") {
            return Err("missing #EXTM3U header".into());
        }
        let mut segments = Vec::new();
        let mut pending_duration: Option<f64> = None;
        for line in contents.lines().map(|line| line.trim()) {
            if let Some(value) = line.strip_prefix("#EXTINF:") {
                let duration = value
                    .trim_end_matches(',')
                    .parse()
                    .map_err(|_| "invalid EXTINF duration".to_string())?;
                pending_duration = Some(duration);
            } else if line.starts_with('#') || line.is_empty() {
                continue;
            } else if let Some(duration) = pending_duration.take() {
                segments.push(PlaylistSegment {
                    uri: line.to_string(),
                    duration,
                });
            }
        }
        Ok(segments)
    }
}
