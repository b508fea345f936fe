//! Line decoration applied before a line reaches its destination

use chrono::{DateTime, FixedOffset, Local};
use funnel_core::{Error, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::io::Write;

/// `{{.Field}}` placeholders, Go-template style
static ACTION_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*\.(\w+)\s*\}\}").expect("Invalid template action regex"));

/// Renders one line against a destination
pub trait LineProcessor: Send + Sync {
    fn write(&self, out: &mut dyn Write, line: &[u8]) -> Result<()>;
}

/// Pick the processor for a prepend value.
///
/// Empty -> [`Passthrough`], no template actions -> [`Prefix`], otherwise
/// [`TemplatePrefix`].
pub fn processor_for(prepend: &str) -> Result<Box<dyn LineProcessor>> {
    if prepend.is_empty() {
        return Ok(Box::new(Passthrough));
    }

    let template = Template::parse(prepend)?;
    if template.has_actions() {
        Ok(Box::new(TemplatePrefix { template }))
    } else {
        Ok(Box::new(Prefix::new(prepend)))
    }
}

/// Emits the line unchanged
#[derive(Debug, Default)]
pub struct Passthrough;

impl LineProcessor for Passthrough {
    fn write(&self, out: &mut dyn Write, line: &[u8]) -> Result<()> {
        out.write_all(line)?;
        Ok(())
    }
}

/// Emits a fixed string before the line
#[derive(Debug)]
pub struct Prefix {
    prefix: Vec<u8>,
}

impl Prefix {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.as_bytes().to_vec(),
        }
    }
}

impl LineProcessor for Prefix {
    fn write(&self, out: &mut dyn Write, line: &[u8]) -> Result<()> {
        // Single write so sinks that treat each write as one record see prefix + line together
        let mut buf = Vec::with_capacity(self.prefix.len() + line.len());
        buf.extend_from_slice(&self.prefix);
        buf.extend_from_slice(line);
        out.write_all(&buf)?;
        Ok(())
    }
}

/// Renders a timestamp template before the line
#[derive(Debug)]
pub struct TemplatePrefix {
    template: Template,
}

impl LineProcessor for TemplatePrefix {
    fn write(&self, out: &mut dyn Write, line: &[u8]) -> Result<()> {
        let mut buf = self.template.render(Local::now().into()).into_bytes();
        buf.extend_from_slice(line);
        out.write_all(&buf)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    /// `02 Jan 06 15:04 UTC`, or `02 Jan 06 15:04 -07:00` outside UTC
    Rfc822Timestamp,
    /// `2006-01-02T15:04:05Z`, or `2006-01-02T15:04:05-0700` outside UTC
    Iso8601Timestamp,
    /// Nanoseconds since the Unix epoch
    UnixTimestamp,
}

impl Field {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "RFC822Timestamp" => Some(Field::Rfc822Timestamp),
            "ISO8601Timestamp" => Some(Field::Iso8601Timestamp),
            "UnixTimestamp" => Some(Field::UnixTimestamp),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Action(Field),
}

#[derive(Debug, Clone)]
struct Template {
    segments: Vec<Segment>,
}

impl Template {
    fn parse(source: &str) -> Result<Self> {
        let mut segments = Vec::new();
        let mut last = 0;

        for caps in ACTION_REGEX.captures_iter(source) {
            let whole = caps.get(0).expect("capture group 0 always exists");
            let name = &caps[1];
            let field = Field::from_name(name)
                .ok_or_else(|| Error::template(format!("unknown field .{}", name)))?;

            push_literal(&mut segments, &source[last..whole.start()])?;
            segments.push(Segment::Action(field));
            last = whole.end();
        }
        push_literal(&mut segments, &source[last..])?;

        Ok(Self { segments })
    }

    fn has_actions(&self) -> bool {
        self.segments.iter().any(|s| matches!(s, Segment::Action(_)))
    }

    fn render(&self, now: DateTime<FixedOffset>) -> String {
        let utc = now.offset().local_minus_utc() == 0;
        let mut rendered = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => rendered.push_str(text),
                Segment::Action(Field::Rfc822Timestamp) => {
                    rendered.push_str(&now.format("%d %b %y %H:%M ").to_string());
                    // A fixed offset has no zone name, only UTC gets one
                    if utc {
                        rendered.push_str("UTC");
                    } else {
                        rendered.push_str(&now.format("%Z").to_string());
                    }
                }
                Segment::Action(Field::Iso8601Timestamp) => {
                    rendered.push_str(&now.format("%Y-%m-%dT%H:%M:%S").to_string());
                    if utc {
                        rendered.push('Z');
                    } else {
                        rendered.push_str(&now.format("%z").to_string());
                    }
                }
                Segment::Action(Field::UnixTimestamp) => rendered
                    .push_str(&now.timestamp_nanos_opt().unwrap_or_default().to_string()),
            }
        }
        rendered
    }
}

/// Literal text between actions; a stray `{{` means a malformed action
fn push_literal(segments: &mut Vec<Segment>, text: &str) -> Result<()> {
    if text.contains("{{") {
        return Err(Error::template(format!("malformed action in {:?}", text)));
    }
    if !text.is_empty() {
        segments.push(Segment::Literal(text.to_string()));
    }
    Ok(())
}
