//! Subtitle line grouping and SRT / WebVTT / ASS encoding.

use reframe_models::{SubtitleFormat, TranscriptSpan};
use serde::{Deserialize, Serialize};

use crate::error::{MediaError, MediaResult};

/// One displayed subtitle line made of timed words.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtitleLine {
    pub start: f64,
    pub end: f64,
    pub words: Vec<TranscriptSpan>,
}

impl SubtitleLine {
    /// A line holding one block of text.
    pub fn from_text(text: impl Into<String>, start: f64, end: f64) -> Self {
        Self {
            start,
            end,
            words: vec![TranscriptSpan::new(text, start, end)],
        }
    }

    pub fn text(&self) -> String {
        self.words
            .iter()
            .map(|w| w.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
            .trim()
            .to_string()
    }

    pub fn duration(&self) -> f64 {
        (self.end - self.start).max(0.0)
    }

    /// Split the text into words whose timing is spread over the line in
    /// proportion to their length. Used for karaoke output when only
    /// line-level timing is known.
    pub fn spread_words(&self) -> Self {
        let text = self.text();
        let tokens: Vec<&str> = text.split_whitespace().collect();
        let total_chars: usize = tokens.iter().map(|t| t.chars().count()).sum();
        if tokens.len() <= 1 || total_chars == 0 {
            return self.clone();
        }

        let duration = self.duration();
        let mut cursor = self.start;
        let words = tokens
            .iter()
            .enumerate()
            .map(|(i, token)| {
                let end = if i + 1 == tokens.len() {
                    self.end
                } else {
                    cursor + duration * token.chars().count() as f64 / total_chars as f64
                };
                let word = TranscriptSpan::new(*token, cursor, end);
                cursor = end;
                word
            })
            .collect();

        Self {
            start: self.start,
            end: self.end,
            words,
        }
    }
}

/// Limits applied when packing words into lines.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupingConfig {
    pub max_chars_per_line: usize,
    pub max_words_per_line: usize,
    /// Seconds from the first word's start to the last word's end
    pub max_duration: f64,
    /// Silence in seconds that forces a new line
    pub max_gap: f64,
}

impl Default for GroupingConfig {
    fn default() -> Self {
        Self {
            max_chars_per_line: 40,
            max_words_per_line: 12,
            max_duration: 6.0,
            max_gap: 0.6,
        }
    }
}

/// Pack timed words into subtitle lines.
///
/// A word starts a new line when adding it would exceed any limit. The first
/// word of a line is always accepted, so a single over-long word still gets
/// its own line.
pub fn group_words(words: &[TranscriptSpan], config: &GroupingConfig) -> Vec<SubtitleLine> {
    let mut lines = Vec::new();
    let mut current: Vec<TranscriptSpan> = Vec::new();
    let mut line_start = 0.0;
    let mut last_end = 0.0;

    for word in words {
        if !current.is_empty() {
            let chars = current.iter().map(|w| w.text.chars().count() + 1).sum::<usize>()
                + word.text.chars().count();
            let breaks = chars > config.max_chars_per_line
                || current.len() + 1 > config.max_words_per_line
                || word.end - line_start > config.max_duration
                || word.start - last_end > config.max_gap;

            if breaks {
                lines.push(SubtitleLine {
                    start: line_start,
                    end: last_end,
                    words: std::mem::take(&mut current),
                });
            }
        }

        if current.is_empty() {
            line_start = word.start;
        }
        last_end = word.end;
        current.push(word.clone());
    }

    if !current.is_empty() {
        lines.push(SubtitleLine {
            start: line_start,
            end: last_end,
            words: current,
        });
    }
    lines
}

/// Lines overlapping `[start, end)`, cut to that range and retimed so the
/// range begins at zero. Words entirely outside the range are dropped.
pub fn slice_lines(lines: &[SubtitleLine], start: f64, end: f64) -> Vec<SubtitleLine> {
    let shift = |t: f64| (t.clamp(start, end) - start).max(0.0);
    lines
        .iter()
        .filter(|line| line.end > start && line.start < end)
        .filter_map(|line| {
            let words: Vec<TranscriptSpan> = line
                .words
                .iter()
                .filter(|w| w.end > start && w.start < end)
                .map(|w| {
                    let mut word = w.clone();
                    word.start = shift(w.start);
                    word.end = shift(w.end);
                    word
                })
                .collect();
            if words.is_empty() {
                return None;
            }
            Some(SubtitleLine {
                start: shift(line.start),
                end: shift(line.end),
                words,
            })
        })
        .collect()
}

fn split_millis(seconds: f64) -> (u64, u64, u64, u64) {
    let millis = (seconds.max(0.0) * 1000.0).round() as u64;
    (
        millis / 3_600_000,
        (millis % 3_600_000) / 60_000,
        (millis % 60_000) / 1000,
        millis % 1000,
    )
}

/// `HH:MM:SS,mmm`
pub fn format_srt_timestamp(seconds: f64) -> String {
    let (h, m, s, ms) = split_millis(seconds);
    format!("{h:02}:{m:02}:{s:02},{ms:03}")
}

/// `HH:MM:SS.mmm`
pub fn format_vtt_timestamp(seconds: f64) -> String {
    let (h, m, s, ms) = split_millis(seconds);
    format!("{h:02}:{m:02}:{s:02}.{ms:03}")
}

/// `H:MM:SS.cc`
pub fn format_ass_timestamp(seconds: f64) -> String {
    let centis = (seconds.max(0.0) * 100.0).round() as u64;
    format!(
        "{}:{:02}:{:02}.{:02}",
        centis / 360_000,
        (centis % 360_000) / 6000,
        (centis % 6000) / 100,
        centis % 100
    )
}

pub fn to_srt(lines: &[SubtitleLine]) -> String {
    let mut out = String::new();
    for (idx, line) in lines.iter().enumerate() {
        out.push_str(&format!(
            "{}\n{} --> {}\n{}\n\n",
            idx + 1,
            format_srt_timestamp(line.start),
            format_srt_timestamp(line.end),
            line.text()
        ));
    }
    out
}

pub fn to_vtt(lines: &[SubtitleLine]) -> String {
    let mut out = String::from("WEBVTT\n\n");
    for line in lines {
        out.push_str(&format!(
            "{} --> {}\n{}\n\n",
            format_vtt_timestamp(line.start),
            format_vtt_timestamp(line.end),
            line.text()
        ));
    }
    out
}

const ASS_HEADER: &str = "[Script Info]
ScriptType: v4.00+
WrapStyle: 0
ScaledBorderAndShadow: yes
PlayResX: 1920
PlayResY: 1080

[V4+ Styles]
Format: Name, Fontname, Fontsize, PrimaryColour, SecondaryColour, OutlineColour, BackColour, Bold, Italic, Underline, StrikeOut, ScaleX, ScaleY, Spacing, Angle, BorderStyle, Outline, Shadow, Alignment, MarginL, MarginR, MarginV, Encoding
Style: Default,Arial,48,&H00FFFFFF,&H0000FFFF,&H00000000,&H80000000,0,0,0,0,100,100,0,0,1,2,0,2,40,40,60,1

[Events]
Format: Layer, Start, End, Style, Name, MarginL, MarginR, MarginV, Effect, Text
";

/// Braces open override blocks in ASS, so literal ones are swapped out.
fn escape_ass(text: &str) -> String {
    text.replace('{', "(").replace('}', ")").replace('\n', "\\N")
}

fn dialogue(start: f64, end: f64, text: &str) -> String {
    format!(
        "Dialogue: 0,{},{},Default,,0,0,0,,{}\n",
        format_ass_timestamp(start),
        format_ass_timestamp(end.max(start)),
        text
    )
}

pub fn to_ass(lines: &[SubtitleLine]) -> String {
    let mut out = String::from(ASS_HEADER);
    for line in lines {
        out.push_str(&dialogue(line.start, line.end, &escape_ass(&line.text())));
    }
    out
}

/// ASS with a `{\kNN}` tag before each word so the renderer sweeps the
/// secondary color across the line as words are spoken.
pub fn to_ass_karaoke(lines: &[SubtitleLine]) -> String {
    let mut out = String::from(ASS_HEADER);
    for line in lines {
        let text = line
            .words
            .iter()
            .filter(|w| !w.text.trim().is_empty())
            .map(|w| {
                let centis = ((w.end - w.start) * 100.0).round().max(1.0) as u64;
                format!("{{\\k{}}}{}", centis, escape_ass(w.text.trim()))
            })
            .collect::<Vec<_>>()
            .join(" ");
        if !text.is_empty() {
            out.push_str(&dialogue(line.start, line.end, &text));
        }
    }
    out
}

/// Encode lines in the given format.
pub fn render(lines: &[SubtitleLine], format: SubtitleFormat) -> String {
    match format {
        SubtitleFormat::Srt => to_srt(lines),
        SubtitleFormat::Vtt => to_vtt(lines),
        SubtitleFormat::Ass => to_ass(lines),
    }
}

fn parse_clock(raw: &str) -> Option<f64> {
    let raw = raw.trim().replace(',', ".");
    let (clock, frac) = raw.split_once('.')?;
    if frac.len() != 3 || !frac.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let parts = clock
        .split(':')
        .map(|p| (p.len() == 2).then(|| p.parse::<u64>().ok()).flatten())
        .collect::<Option<Vec<_>>>()?;
    let (h, m, s) = match parts.as_slice() {
        [h, m, s] => (*h, *m, *s),
        [m, s] => (0, *m, *s),
        _ => return None,
    };
    let ms: u64 = frac.parse().ok()?;
    Some((h * 3600 + m * 60 + s) as f64 + ms as f64 / 1000.0)
}

/// Parse `start --> end [settings]` into seconds.
fn parse_timing(line: &str) -> MediaResult<(f64, f64)> {
    let invalid = || MediaError::invalid_subtitle(format!("invalid timing line: {line}"));
    let (start, end) = line.split_once("-->").ok_or_else(invalid)?;
    let start = start.split_whitespace().next().and_then(parse_clock).ok_or_else(invalid)?;
    let end = end.split_whitespace().next().and_then(parse_clock).ok_or_else(invalid)?;
    Ok((start, end))
}

/// Parse SubRip text. Each cue becomes one line with its text joined by spaces.
pub fn parse_srt(text: &str) -> MediaResult<Vec<SubtitleLine>> {
    let normalized = text.trim_start_matches('\u{feff}').replace("\r\n", "\n");
    let mut lines = Vec::new();

    for block in normalized.split("\n\n") {
        let mut rows = block.lines().map(str::trim).filter(|l| !l.is_empty()).peekable();
        if rows
            .peek()
            .is_some_and(|first| first.chars().all(|c| c.is_ascii_digit()))
        {
            rows.next();
        }
        let Some(timing) = rows.next() else {
            continue;
        };
        let (start, end) = parse_timing(timing)?;
        let content = rows.collect::<Vec<_>>().join(" ");
        if !content.is_empty() {
            lines.push(SubtitleLine::from_text(content, start, end));
        }
    }
    Ok(lines)
}

/// Parse WebVTT text, skipping the header, NOTE blocks, cue identifiers and
/// cue settings.
pub fn parse_vtt(text: &str) -> MediaResult<Vec<SubtitleLine>> {
    let normalized = text.trim_start_matches('\u{feff}').replace("\r\n", "\n");
    let mut lines = Vec::new();
    let mut timing: Option<(f64, f64)> = None;
    let mut cue: Vec<&str> = Vec::new();
    let mut in_note = false;

    let mut flush = |timing: &mut Option<(f64, f64)>, cue: &mut Vec<&str>| {
        if let Some((start, end)) = timing.take() {
            let content = cue.join(" ");
            if !content.is_empty() {
                lines.push(SubtitleLine::from_text(content, start, end));
            }
        }
        cue.clear();
    };

    for raw in normalized.lines() {
        let line = raw.trim();
        if line.is_empty() {
            flush(&mut timing, &mut cue);
            in_note = false;
            continue;
        }
        if line.starts_with("WEBVTT") {
            continue;
        }
        if line.starts_with("NOTE") {
            in_note = true;
            continue;
        }
        if in_note {
            continue;
        }
        if line.contains("-->") {
            flush(&mut timing, &mut cue);
            timing = Some(parse_timing(line)?);
            continue;
        }
        if timing.is_some() {
            cue.push(line);
        }
    }
    flush(&mut timing, &mut cue);
    Ok(lines)
}

/// Parse subtitle text in the given format. ASS input is not read back.
pub fn parse(text: &str, format: SubtitleFormat) -> MediaResult<Vec<SubtitleLine>> {
    match format {
        SubtitleFormat::Srt => parse_srt(text),
        SubtitleFormat::Vtt => parse_vtt(text),
        SubtitleFormat::Ass => Err(MediaError::UnsupportedFormat(
            "ASS subtitles cannot be used as input".to_string(),
        )),
    }
}
