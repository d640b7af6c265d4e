//! Streaming XMLTV parser
//!
//! Token-stream parser built on quick-xml. Channels and programmes are pushed
//! into callbacks as their closing tags are seen, so a multi-hundred-megabyte
//! guide never has to fit in memory as a DOM. Timestamps are parsed as
//! `YYYYMMDDHHMMSS [±HHMM]` with the offset retained on the value; the first
//! programme carrying a non-empty offset fixes the observed timezone for the
//! whole run. Per-programme anomalies are reported through the advisory
//! error callback and skipped.

use std::collections::HashMap;
use std::io::BufRead;

use chrono::{DateTime, Duration, FixedOffset, NaiveDateTime, TimeZone, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::errors::{AppError, AppResult, SourceError};
use crate::utils::decompression::DecompressionService;

/// `<channel>` element from the guide header.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct XmltvChannel {
    pub id: String,
    pub display_name: Option<String>,
    pub icon: Option<String>,
}

/// Credits block of a programme, serialized opaquely onto the program model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct XmltvCredits {
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub directors: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub actors: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub writers: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub producers: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub presenters: Vec<String>,
}

impl XmltvCredits {
    pub fn is_empty(&self) -> bool {
        self.directors.is_empty()
            && self.actors.is_empty()
            && self.writers.is_empty()
            && self.producers.is_empty()
            && self.presenters.is_empty()
    }
}

/// `<programme>` element with parsed, offset-carrying timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct XmltvProgramme {
    pub channel: String,
    pub start: DateTime<FixedOffset>,
    pub stop: DateTime<FixedOffset>,
    pub title: Option<String>,
    pub sub_title: Option<String>,
    pub desc: Option<String>,
    pub category: Option<String>,
    pub icon: Option<String>,
    pub episode_num: Option<String>,
    pub rating: Option<String>,
    pub language: Option<String>,
    pub credits: XmltvCredits,
    pub is_new: bool,
    pub is_premiere: bool,
    /// Raw offset string from the start attribute (`"+0100"`), empty when the
    /// timestamp carried none.
    pub timezone_offset: String,
}

/// Counters and detection results for one parse run.
#[derive(Debug, Clone, Default)]
pub struct XmltvParseSummary {
    pub channels: usize,
    pub programmes: usize,
    pub skipped: usize,
    /// First non-empty offset observed on a programme timestamp.
    pub detected_offset: Option<String>,
}

pub type ChannelSink<'a> = dyn FnMut(XmltvChannel) -> AppResult<()> + Send + 'a;
pub type ProgrammeSink<'a> = dyn FnMut(XmltvProgramme) -> AppResult<()> + Send + 'a;
pub type XmltvErrorSink<'a> = dyn FnMut(&str) + Send + 'a;

/// Streaming XMLTV parser.
pub struct XmltvParser;

impl XmltvParser {
    /// Sniff magic bytes, decompress if needed, then parse.
    pub fn parse_compressed(
        data: bytes::Bytes,
        token: &CancellationToken,
        on_channel: &mut ChannelSink<'_>,
        on_programme: &mut ProgrammeSink<'_>,
        on_error: &mut XmltvErrorSink<'_>,
    ) -> AppResult<XmltvParseSummary> {
        let decompressed = DecompressionService::decompress(data)
            .map_err(|e| SourceError::parse_failure("xmltv", format!("decompression: {e}")))?;
        Self::parse(
            decompressed.as_slice(),
            token,
            on_channel,
            on_programme,
            on_error,
        )
    }

    /// Parse an XMLTV document from `reader`.
    pub fn parse<R: BufRead>(
        reader: R,
        token: &CancellationToken,
        on_channel: &mut ChannelSink<'_>,
        on_programme: &mut ProgrammeSink<'_>,
        on_error: &mut XmltvErrorSink<'_>,
    ) -> AppResult<XmltvParseSummary> {
        let mut xml = Reader::from_reader(reader);
        xml.config_mut().trim_text(true);

        let mut summary = XmltvParseSummary::default();
        let mut buf = Vec::with_capacity(8192);
        let mut stack: Vec<String> = Vec::new();
        let mut text = String::new();

        let mut current_channel: Option<XmltvChannel> = None;
        let mut current: Option<PendingProgramme> = None;

        loop {
            match xml.read_event_into(&mut buf) {
                Ok(Event::Start(ref e)) => {
                    let name = element_name(e.name().as_ref())?;
                    match name.as_str() {
                        "channel" => {
                            let attrs = parse_xml_attributes(e);
                            current_channel = Some(XmltvChannel {
                                id: attrs.get("id").cloned().unwrap_or_default(),
                                ..Default::default()
                            });
                        }
                        "programme" => {
                            let attrs = parse_xml_attributes(e);
                            current = Some(PendingProgramme::from_attrs(&attrs));
                        }
                        "icon" => apply_icon(e, &mut current_channel, &mut current),
                        _ => {}
                    }
                    stack.push(name);
                    text.clear();
                }

                Ok(Event::End(ref e)) => {
                    let name = element_name(e.name().as_ref())?;
                    stack.pop();
                    let value = text.trim().to_string();

                    match name.as_str() {
                        "display-name" => {
                            if let Some(channel) = current_channel.as_mut() {
                                set_once(&mut channel.display_name, &value);
                            }
                        }
                        "channel" => {
                            if let Some(channel) = current_channel.take() {
                                if token.is_cancelled() {
                                    return Err(AppError::Cancelled);
                                }
                                on_channel(channel)?;
                                summary.channels += 1;
                            }
                        }
                        "programme" => {
                            if let Some(pending) = current.take() {
                                match pending.finish() {
                                    Ok(programme) => {
                                        if summary.detected_offset.is_none()
                                            && !programme.timezone_offset.is_empty()
                                        {
                                            summary.detected_offset =
                                                Some(programme.timezone_offset.clone());
                                        }
                                        if token.is_cancelled() {
                                            return Err(AppError::Cancelled);
                                        }
                                        on_programme(programme)?;
                                        summary.programmes += 1;
                                    }
                                    Err(reason) => {
                                        summary.skipped += 1;
                                        on_error(&reason);
                                    }
                                }
                            }
                        }
                        _ => {
                            if let Some(pending) = current.as_mut() {
                                match name.as_str() {
                                    "title" => set_once(&mut pending.title, &value),
                                    "sub-title" => set_once(&mut pending.sub_title, &value),
                                    "desc" => set_once(&mut pending.desc, &value),
                                    "category" => set_once(&mut pending.category, &value),
                                    "episode-num" => set_once(&mut pending.episode_num, &value),
                                    "language" => set_once(&mut pending.language, &value),
                                    "value"
                                        if stack.last().map(String::as_str) == Some("rating") =>
                                    {
                                        set_once(&mut pending.rating, &value)
                                    }
                                    "director" => pending.credits.directors.push_non_empty(&value),
                                    "actor" => pending.credits.actors.push_non_empty(&value),
                                    "writer" => pending.credits.writers.push_non_empty(&value),
                                    "producer" => pending.credits.producers.push_non_empty(&value),
                                    "presenter" => {
                                        pending.credits.presenters.push_non_empty(&value)
                                    }
                                    "new" => pending.is_new = true,
                                    "premiere" => pending.is_premiere = true,
                                    _ => {}
                                }
                            }
                        }
                    }
                    text.clear();
                }

                Ok(Event::Empty(ref e)) => {
                    let name = element_name(e.name().as_ref())?;
                    match name.as_str() {
                        "icon" => apply_icon(e, &mut current_channel, &mut current),
                        "new" => {
                            if let Some(pending) = current.as_mut() {
                                pending.is_new = true;
                            }
                        }
                        "premiere" => {
                            if let Some(pending) = current.as_mut() {
                                pending.is_premiere = true;
                            }
                        }
                        _ => {}
                    }
                }

                Ok(Event::Text(e)) => {
                    let decoded = e.decode().map_err(|e| {
                        SourceError::parse_failure("xmltv", format!("text decode: {e}"))
                    })?;
                    let fragment = quick_xml::escape::unescape(&decoded).map_err(|e| {
                        SourceError::parse_failure("xmltv", format!("text decode: {e}"))
                    })?;
                    text.push_str(&fragment);
                }

                Ok(Event::CData(e)) => {
                    let fragment = std::str::from_utf8(&e).map_err(|e| {
                        SourceError::parse_failure("xmltv", format!("CDATA decode: {e}"))
                    })?;
                    text.push_str(fragment);
                }

                Ok(Event::Eof) => break,

                Err(e) => {
                    return Err(
                        SourceError::parse_failure("xmltv", format!("XML error: {e}")).into(),
                    );
                }

                _ => {}
            }
            buf.clear();
        }

        Ok(summary)
    }
}

/// Parse an XMLTV timestamp, keeping its offset. Timestamps without an
/// offset are interpreted as UTC and flagged with an empty offset string.
pub fn parse_xmltv_timestamp(raw: &str) -> Result<(DateTime<FixedOffset>, String), String> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_str(raw, "%Y%m%d%H%M%S %z") {
        let offset = raw
            .split_whitespace()
            .nth(1)
            .unwrap_or_default()
            .to_string();
        return Ok((parsed, offset));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y%m%d%H%M%S") {
        let utc = Utc
            .from_utc_datetime(&naive)
            .with_timezone(&FixedOffset::east_opt(0).expect("zero offset"));
        return Ok((utc, String::new()));
    }
    Err(format!("unparseable timestamp '{raw}'"))
}

struct PendingProgramme {
    channel: String,
    start_raw: String,
    stop_raw: String,
    title: Option<String>,
    sub_title: Option<String>,
    desc: Option<String>,
    category: Option<String>,
    icon: Option<String>,
    episode_num: Option<String>,
    rating: Option<String>,
    language: Option<String>,
    credits: XmltvCredits,
    is_new: bool,
    is_premiere: bool,
}

impl PendingProgramme {
    fn from_attrs(attrs: &HashMap<String, String>) -> Self {
        Self {
            channel: attrs.get("channel").cloned().unwrap_or_default(),
            start_raw: attrs.get("start").cloned().unwrap_or_default(),
            stop_raw: attrs.get("stop").cloned().unwrap_or_default(),
            title: None,
            sub_title: None,
            desc: None,
            category: None,
            icon: None,
            episode_num: None,
            rating: None,
            language: None,
            credits: XmltvCredits::default(),
            is_new: false,
            is_premiere: false,
        }
    }

    fn finish(self) -> Result<XmltvProgramme, String> {
        if self.channel.is_empty() {
            return Err("programme without channel attribute".to_string());
        }
        let (start, offset) = parse_xmltv_timestamp(&self.start_raw)
            .map_err(|e| format!("channel '{}': start: {e}", self.channel))?;
        let stop = if self.stop_raw.is_empty() {
            // Providers occasionally omit stop; a half-hour slot is the
            // conventional fallback.
            start + Duration::minutes(30)
        } else {
            parse_xmltv_timestamp(&self.stop_raw)
                .map_err(|e| format!("channel '{}': stop: {e}", self.channel))?
                .0
        };

        Ok(XmltvProgramme {
            channel: self.channel,
            start,
            stop,
            title: self.title,
            sub_title: self.sub_title,
            desc: self.desc,
            category: self.category,
            icon: self.icon,
            episode_num: self.episode_num,
            rating: self.rating,
            language: self.language,
            credits: self.credits,
            is_new: self.is_new,
            is_premiere: self.is_premiere,
            timezone_offset: offset,
        })
    }
}

fn set_once(slot: &mut Option<String>, value: &str) {
    if slot.is_none() && !value.is_empty() {
        *slot = Some(value.to_string());
    }
}

/// Route an `<icon src="..."/>` to whichever element is currently open.
fn apply_icon(
    e: &BytesStart<'_>,
    current_channel: &mut Option<XmltvChannel>,
    current: &mut Option<PendingProgramme>,
) {
    let Some(src) = parse_xml_attributes(e).remove("src") else {
        return;
    };
    if let Some(pending) = current.as_mut() {
        set_once(&mut pending.icon, &src);
    } else if let Some(channel) = current_channel.as_mut() {
        set_once(&mut channel.icon, &src);
    }
}

trait PushNonEmpty {
    fn push_non_empty(&mut self, value: &str);
}

impl PushNonEmpty for Vec<String> {
    fn push_non_empty(&mut self, value: &str) {
        if !value.is_empty() {
            self.push(value.to_string());
        }
    }
}

fn element_name(name: &[u8]) -> AppResult<String> {
    std::str::from_utf8(name).map(str::to_string).map_err(|e| {
        SourceError::parse_failure("xmltv", format!("invalid UTF-8 in element name: {e}")).into()
    })
}

fn parse_xml_attributes(element: &BytesStart<'_>) -> HashMap<String, String> {
    let mut attrs = HashMap::new();
    for attr in element.attributes().flatten() {
        if let (Ok(key), Ok(value)) = (
            std::str::from_utf8(attr.key.as_ref()),
            std::str::from_utf8(&attr.value),
        ) {
            attrs.insert(key.to_string(), value.to_string());
        }
    }
    attrs
}

#[cfg(test)]
mod tests {
    use super::*;

    const GUIDE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<tv generator-info-name="test">
  <channel id="ch1">
    <display-name>Channel One</display-name>
    <icon src="http://logo/1.png"/>
  </channel>
  <programme channel="ch1" start="20240115100000 +0100" stop="20240115110000 +0100">
    <title>Morning News</title>
    <sub-title>Early edition</sub-title>
    <desc>Headlines</desc>
    <category>News</category>
    <episode-num system="onscreen">S01E02</episode-num>
    <rating system="MPAA"><value>PG</value></rating>
    <credits>
      <director>D One</director>
      <actor>A One</actor>
      <actor>A Two</actor>
    </credits>
    <new/>
  </programme>
  <programme channel="ch1" start="20240115110000 +0100" stop="20240115100000 +0100">
    <title>Goes Backwards</title>
  </programme>
</tv>"#;

    fn parse_guide(
        content: &str,
    ) -> (Vec<XmltvChannel>, Vec<XmltvProgramme>, XmltvParseSummary) {
        let mut channels = Vec::new();
        let mut programmes = Vec::new();
        let mut on_channel = |c: XmltvChannel| {
            channels.push(c);
            Ok(())
        };
        let mut on_programme = |p: XmltvProgramme| {
            programmes.push(p);
            Ok(())
        };
        let mut on_error = |_msg: &str| {};
        let summary = XmltvParser::parse(
            content.as_bytes(),
            &CancellationToken::new(),
            &mut on_channel,
            &mut on_programme,
            &mut on_error,
        )
        .unwrap();
        drop(on_channel);
        drop(on_programme);
        (channels, programmes, summary)
    }

    #[test]
    fn parses_channels_and_programmes() {
        let (channels, programmes, summary) = parse_guide(GUIDE);
        assert_eq!(summary.channels, 1);
        assert_eq!(summary.programmes, 2);
        assert_eq!(channels[0].id, "ch1");
        assert_eq!(channels[0].display_name.as_deref(), Some("Channel One"));
        assert_eq!(channels[0].icon.as_deref(), Some("http://logo/1.png"));

        let p = &programmes[0];
        assert_eq!(p.title.as_deref(), Some("Morning News"));
        assert_eq!(p.sub_title.as_deref(), Some("Early edition"));
        assert_eq!(p.category.as_deref(), Some("News"));
        assert_eq!(p.episode_num.as_deref(), Some("S01E02"));
        assert_eq!(p.rating.as_deref(), Some("PG"));
        assert_eq!(p.credits.directors, vec!["D One"]);
        assert_eq!(p.credits.actors, vec!["A One", "A Two"]);
        assert!(p.is_new);
        assert!(!p.is_premiere);
    }

    #[test]
    fn retains_timestamp_offset() {
        let (_, programmes, summary) = parse_guide(GUIDE);
        assert_eq!(programmes[0].timezone_offset, "+0100");
        assert_eq!(summary.detected_offset.as_deref(), Some("+0100"));
        assert_eq!(
            programmes[0].start.with_timezone(&Utc).to_rfc3339(),
            "2024-01-15T09:00:00+00:00"
        );
    }

    #[test]
    fn offsetless_timestamps_read_as_utc() {
        let (time, offset) = parse_xmltv_timestamp("20240115100000").unwrap();
        assert_eq!(offset, "");
        assert_eq!(
            time.with_timezone(&Utc).to_rfc3339(),
            "2024-01-15T10:00:00+00:00"
        );
    }

    #[test]
    fn bad_timestamp_is_skipped_with_advisory() {
        let guide = r#"<tv>
  <programme channel="ch1" start="not-a-time" stop="20240115110000">
    <title>Broken</title>
  </programme>
  <programme channel="ch1" start="20240115100000" stop="20240115110000">
    <title>Fine</title>
  </programme>
</tv>"#;
        let mut errors = Vec::new();
        let mut programmes = Vec::new();
        let mut on_channel = |_c: XmltvChannel| -> AppResult<()> { Ok(()) };
        let mut on_programme = |p: XmltvProgramme| {
            programmes.push(p);
            Ok(())
        };
        let mut on_error = |msg: &str| errors.push(msg.to_string());
        let summary = XmltvParser::parse(
            guide.as_bytes(),
            &CancellationToken::new(),
            &mut on_channel,
            &mut on_programme,
            &mut on_error,
        )
        .unwrap();
        drop(on_programme);
        drop(on_error);
        assert_eq!(summary.programmes, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(errors.len(), 1);
        assert_eq!(programmes[0].title.as_deref(), Some("Fine"));
    }

    #[test]
    fn missing_stop_gets_half_hour_slot() {
        let guide = r#"<tv>
  <programme channel="ch1" start="20240115100000 +0000">
    <title>Open Ended</title>
  </programme>
</tv>"#;
        let (_, programmes, _) = parse_guide(guide);
        assert_eq!((programmes[0].stop - programmes[0].start).num_minutes(), 30);
    }

    #[cfg(feature = "compression-gzip")]
    #[test]
    fn parse_compressed_handles_gzip() {
        use flate2::{write::GzEncoder, Compression};
        use std::io::Write;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(GUIDE.as_bytes()).unwrap();
        let compressed = encoder.finish().unwrap();

        let mut channels = 0usize;
        let mut programmes = 0usize;
        let mut on_channel = |_c: XmltvChannel| {
            channels += 1;
            Ok(())
        };
        let mut on_programme = |_p: XmltvProgramme| {
            programmes += 1;
            Ok(())
        };
        let mut on_error = |_msg: &str| {};
        XmltvParser::parse_compressed(
            bytes::Bytes::from(compressed),
            &CancellationToken::new(),
            &mut on_channel,
            &mut on_programme,
            &mut on_error,
        )
        .unwrap();
        drop(on_channel);
        drop(on_programme);
        assert_eq!(channels, 1);
        assert_eq!(programmes, 2);
    }

    #[test]
    fn callback_error_aborts_parse() {
        let mut on_channel = |_c: XmltvChannel| -> AppResult<()> { Ok(()) };
        let mut on_programme = |_p: XmltvProgramme| Err(AppError::callback_aborted("enough"));
        let mut on_error = |_msg: &str| {};
        let result = XmltvParser::parse(
            GUIDE.as_bytes(),
            &CancellationToken::new(),
            &mut on_channel,
            &mut on_programme,
            &mut on_error,
        );
        assert!(matches!(result, Err(AppError::CallbackAborted { .. })));
    }
}
