//! TaskPaper-style outline library.
//!
//! Text such as
//!
//! ```text
//! Project:
//! 	- Task @due(2024-10-31)
//! 		A note about the task.
//! ```
//!
//! is read line by line into flat [`core::Node`] values (indentation level, kind, tags),
//! folded into a forest by indentation, and rendered back to tab-indented text.
//! Tag payloads such as `2024-11-30 11:30-23:30` convert into validated [`dates::DateRange`]s.
//!
//! Everything here is synchronous and free of shared state.

pub mod core {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Serialize};
    use std::fmt;

    use crate::dates::{DATE_TIME_FORMAT, DateRange, DateShape};

    /* ---------------------------- Value Objects ---------------------------- */

    /// Tag names with a reserved meaning; both carry date payloads by convention.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum KnownTag {
        Due,
        Done,
    }

    impl KnownTag {
        pub fn as_str(&self) -> &'static str {
            match self {
                KnownTag::Due => "due",
                KnownTag::Done => "done",
            }
        }
    }

    /// An `@name` or `@name(payload)` annotation.
    ///
    /// The type puts no constraint on the payload; converting it to a date is a separate,
    /// fallible step ([`Tag::date_range`]).
    #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct Tag {
        pub name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub payload: Option<String>,
    }

    impl Tag {
        pub fn bare(name: impl Into<String>) -> Self {
            Self {
                name: name.into(),
                payload: None,
            }
        }

        /// An empty payload collapses to a bare tag.
        pub fn with_payload(name: impl Into<String>, payload: impl Into<String>) -> Self {
            let payload = payload.into();
            Self {
                name: name.into(),
                payload: (!payload.is_empty()).then_some(payload),
            }
        }

        pub fn known(tag: KnownTag, payload: Option<&str>) -> Self {
            match payload {
                Some(p) => Self::with_payload(tag.as_str(), p),
                None => Self::bare(tag.as_str()),
            }
        }

        pub fn name(&self) -> &str {
            &self.name
        }

        pub fn payload(&self) -> Option<&str> {
            self.payload.as_deref()
        }

        pub fn is(&self, tag: KnownTag) -> bool {
            self.name == tag.as_str()
        }

        /// Parse the payload as a date range. `None` for bare tags.
        pub fn date_range(&self) -> Option<Result<DateRange, DateError>> {
            self.payload().map(crate::dates::parse_payload)
        }
    }

    impl fmt::Display for Tag {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match &self.payload {
                Some(payload) => write!(f, "@{}({})", self.name, payload),
                None => write!(f, "@{}", self.name),
            }
        }
    }

    /* ------------------------------ Entities ------------------------------ */

    /// The three shapes an outline entry can take.
    #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum NodeKind {
        /// `name:`
        Project(String),
        /// `- name`
        Task(String),
        /// Free text, including the empty blank-line placeholder.
        Text(String),
    }

    impl NodeKind {
        /// The name or content without its display markers.
        pub fn text(&self) -> &str {
            match self {
                NodeKind::Project(s) | NodeKind::Task(s) | NodeKind::Text(s) => s,
            }
        }
    }

    impl fmt::Display for NodeKind {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                NodeKind::Project(name) => write!(f, "{}:", name),
                NodeKind::Task(name) => write!(f, "- {}", name),
                NodeKind::Text(content) => f.write_str(content),
            }
        }
    }

    /// One outline entry and its subtree.
    ///
    /// Equality is deep and structural: indentation, kind, tags and children all take part.
    /// `indent` is the depth the line had in the source text, not its depth in the tree.
    #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct Node {
        pub indent: usize,
        pub kind: NodeKind,
        #[serde(default)]
        pub tags: Vec<Tag>,
        #[serde(default)]
        pub children: Vec<Node>,
    }

    impl Node {
        pub fn new(indent: usize, kind: NodeKind) -> Self {
            Self {
                indent,
                kind,
                tags: vec![],
                children: vec![],
            }
        }

        pub fn project(name: impl Into<String>) -> Self {
            Self::new(0, NodeKind::Project(name.into()))
        }

        pub fn task(name: impl Into<String>) -> Self {
            Self::new(0, NodeKind::Task(name.into()))
        }

        pub fn text(content: impl Into<String>) -> Self {
            Self::new(0, NodeKind::Text(content.into()))
        }

        pub fn with_indent(mut self, indent: usize) -> Self {
            self.indent = indent;
            self
        }

        pub fn with_tags(mut self, tags: Vec<Tag>) -> Self {
            self.tags = tags;
            self
        }

        pub fn with_children(mut self, children: Vec<Node>) -> Self {
            self.children = children;
            self
        }

        /* ----------------------------- Mutation ----------------------------- */

        pub fn set_indent(&mut self, indent: usize) {
            self.indent = indent;
        }

        pub fn append_tag(&mut self, tag: Tag) {
            self.tags.push(tag);
        }

        pub fn append_child(&mut self, child: Node) {
            self.children.push(child);
        }

        /// Replace the first direct child structurally equal to `old`.
        pub fn replace_child(&mut self, old: &Node, new: Node) -> bool {
            match self.children.iter().position(|c| c == old) {
                Some(idx) => {
                    self.children[idx] = new;
                    true
                }
                None => false,
            }
        }

        /* ------------------------------ Lookup ------------------------------ */

        /// Walk the right spine (always the last child).
        ///
        /// Without a level, returns the bottom of the spine. With a level, returns the
        /// first spine node below `self` whose indent equals it.
        pub fn deepest_last_child(&self, level: Option<usize>) -> Option<&Node> {
            let last = self.children.last()?;
            match level {
                None => last.deepest_last_child(None).or(Some(last)),
                Some(level) if last.indent == level => Some(last),
                Some(level) => last.deepest_last_child(Some(level)),
            }
        }

        /// The node holding `target` as a direct child, searching `self` and then the
        /// right spine only.
        pub fn find_parent(&self, target: &Node) -> Option<&Node> {
            if self.children.contains(target) {
                return Some(self);
            }
            self.children.last()?.find_parent(target)
        }

        pub fn eq_ignoring_children(&self, other: &Node) -> bool {
            self.indent == other.indent && self.kind == other.kind && self.tags == other.tags
        }

        /// `self` followed by every node on its right spine, top to bottom.
        pub fn right_spine(&self) -> Vec<&Node> {
            let mut spine = vec![self];
            let mut current = self;
            while let Some(last) = current.children.last() {
                spine.push(last);
                current = last;
            }
            spine
        }

        /// The right-spine node `depth` steps below `self` (0 is `self`).
        pub fn spine_node_mut(&mut self, depth: usize) -> Option<&mut Node> {
            let mut current = self;
            for _ in 0..depth {
                current = current.children.last_mut()?;
            }
            Some(current)
        }

        pub fn find_tag(&self, tag: KnownTag) -> Option<&Tag> {
            self.tags.iter().find(|t| t.is(tag))
        }

        /// Indented text of this node and its subtree.
        pub fn serialize(&self) -> String {
            crate::format::render_node(self)
        }
    }

    impl fmt::Display for Node {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(&self.serialize())
        }
    }

    /* ---------------------------- Errors (domain) ---------------------------- */

    #[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
    pub enum DateError {
        #[error("invalid formatted string: {0}")]
        InvalidFormattedString(String),
        #[error(
            "end date {} must be after start date {}",
            .end.format(DATE_TIME_FORMAT),
            .start.format(DATE_TIME_FORMAT)
        )]
        EndDateNotAfterStartDate {
            start: NaiveDateTime,
            end: NaiveDateTime,
        },
        #[error("date range cannot be formatted as {shape:?}")]
        UnsupportedShape { shape: DateShape },
    }

}

pub mod tags {
    //! Tag grammar.
    //!
    //! `@word` is a bare tag, `@word(payload)` a payload tag where the payload is the
    //! shortest non-empty run of characters up to the first `)`.

    use crate::core::Tag;
    use nom::{
        IResult,
        bytes::complete::{take_till, take_while1},
        character::complete::{anychar, char, none_of},
        combinator::recognize,
        error::VerboseError,
        sequence::{delimited, pair, preceded},
    };

    type PResult<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

    enum Occurrence<'a> {
        Bare(&'a str),
        WithPayload(&'a str, &'a str),
    }

    pub fn is_word_char(c: char) -> bool {
        c.is_alphanumeric() || c == '_'
    }

    fn tag_name(i: &str) -> PResult<'_, &str> {
        preceded(char('@'), take_while1(is_word_char))(i)
    }

    fn payload(i: &str) -> PResult<'_, &str> {
        delimited(
            char('('),
            recognize(pair(none_of("\n"), take_till(|c| c == ')' || c == '\n'))),
            char(')'),
        )(i)
    }

    fn occurrence(i: &str) -> PResult<'_, Occurrence<'_>> {
        let (i, name) = tag_name(i)?;
        match payload(i) {
            Ok((rest, p)) => Ok((rest, Occurrence::WithPayload(name, p))),
            Err(_) => Ok((i, Occurrence::Bare(name))),
        }
    }

    /// Every tag occurrence with its byte offset. Text inside a payload is never
    /// scanned for further tags.
    fn scan(text: &str) -> Vec<(usize, Occurrence<'_>)> {
        let mut out = Vec::new();
        let mut i = text;
        while !i.is_empty() {
            if let Ok((rest, occ)) = occurrence(i) {
                out.push((text.len() - i.len(), occ));
                i = rest;
                continue;
            }
            match anychar::<&str, VerboseError<&str>>(i) {
                Ok((rest, _)) => i = rest,
                Err(_) => break,
            }
        }
        out
    }

    /// Extract tags in display order.
    ///
    /// Bare tags come first in the order seen. Each payload tag then replaces, in place,
    /// the first bare tag of the same name, or is appended when there is none.
    pub fn extract_tags(text: &str) -> Vec<Tag> {
        if !text.contains('@') {
            return vec![];
        }
        let found = scan(text);

        let mut tags: Vec<Tag> = found
            .iter()
            .filter_map(|(_, occ)| match occ {
                Occurrence::Bare(name) => Some(Tag::bare(*name)),
                Occurrence::WithPayload(..) => None,
            })
            .collect();

        for (_, occ) in &found {
            if let Occurrence::WithPayload(name, payload) = occ {
                let tag = Tag::with_payload(*name, *payload);
                match tags
                    .iter()
                    .position(|t| t.name == *name && t.payload.is_none())
                {
                    Some(idx) => tags[idx] = tag,
                    None => tags.push(tag),
                }
            }
        }
        tags
    }

    /// Text in front of the first tag, without the whitespace separating the two.
    /// Text with no tag in it is returned unchanged.
    pub fn strip_tags(text: &str) -> &str {
        match scan(text).first() {
            Some((offset, _)) => text[..*offset].trim_end(),
            None => text,
        }
    }

}

pub mod dates {
    //! Date/time payload grammar.
    //!
    //! Four payload shapes, chosen by character count before any matching:
    //!
    //! | length   | shape                | example                              |
    //! |----------|----------------------|--------------------------------------|
    //! | 10       | `date`               | `2024-10-31`                         |
    //! | 16       | `dateTime`           | `2024-10-31 10:31`                   |
    //! | 22..=32  | `dateTimeEndTime`    | `2024-10-31 10:31 thru 13:00`        |
    //! | 33..=41  | `dateTimeDateTime`   | `2024-10-31 10:31 - 2024-11-02 13:00`|
    //!
    //! Fields are matched structurally first and checked against the calendar second, so
    //! `2024-13-31` has the right shape but is still rejected.

    pub use crate::core::DateError;
    use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
    use nom::{
        IResult,
        branch::alt,
        bytes::complete::{tag, take_while},
        character::complete::{char, space0},
        combinator::{all_consuming, map, map_res},
        error::{VerboseError, VerboseErrorKind},
        sequence::tuple,
    };
    use serde::{Deserialize, Serialize};
    use std::{fmt, str::FromStr};

    pub const DATE_FORMAT: &str = "%Y-%m-%d";
    pub const DATE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M";

    /* ------------------------------ Range value ------------------------------ */

    /// A single instant, or a span whose start is strictly before its end.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub enum DateRange {
        Instant(NaiveDateTime),
        Span {
            start: NaiveDateTime,
            end: NaiveDateTime,
        },
    }

    impl DateRange {
        pub fn span(start: NaiveDateTime, end: NaiveDateTime) -> Result<Self, DateError> {
            if start < end {
                Ok(DateRange::Span { start, end })
            } else {
                Err(DateError::EndDateNotAfterStartDate { start, end })
            }
        }

        pub fn start(&self) -> NaiveDateTime {
            match self {
                DateRange::Instant(at) => *at,
                DateRange::Span { start, .. } => *start,
            }
        }

        pub fn end(&self) -> Option<NaiveDateTime> {
            match self {
                DateRange::Instant(_) => None,
                DateRange::Span { end, .. } => Some(*end),
            }
        }
    }

    impl FromStr for DateRange {
        type Err = DateError;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            parse_payload(s)
        }
    }

    /* ------------------------------ Shapes & styles ------------------------------ */

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum DateShape {
        Date,
        DateTime,
        DateTimeEndTime,
        DateTimeDateTime,
    }

    impl DateShape {
        /// Pick the shape from the payload length alone.
        pub fn detect(text: &str) -> Option<Self> {
            match text.chars().count() {
                10 => Some(DateShape::Date),
                16 => Some(DateShape::DateTime),
                22..=32 => Some(DateShape::DateTimeEndTime),
                33..=41 => Some(DateShape::DateTimeDateTime),
                _ => None,
            }
        }
    }

    /// Word placed between the two halves of a range.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum DateSeparator {
        /// `-`
        #[default]
        Compact,
        /// `thru`
        Extended,
        /// `through`
        GrammarExtended,
    }

    impl DateSeparator {
        pub fn as_str(&self) -> &'static str {
            match self {
                DateSeparator::Compact => "-",
                DateSeparator::Extended => "thru",
                DateSeparator::GrammarExtended => "through",
            }
        }

        pub fn render(&self, with_spaces: bool) -> String {
            if with_spaces {
                format!(" {} ", self.as_str())
            } else {
                self.as_str().to_string()
            }
        }
    }

    /// How a range is written back out.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FormatOptions {
        pub separator: DateSeparator,
        pub with_spaces: bool,
    }

    impl Default for FormatOptions {
        fn default() -> Self {
            Self {
                separator: DateSeparator::Compact,
                with_spaces: true,
            }
        }
    }

    /// Precision of a stored date: whole day or minute.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum DateFormat {
        Date,
        #[default]
        DateTime,
    }

    impl DateFormat {
        pub fn pattern(&self) -> &'static str {
            match self {
                DateFormat::Date => DATE_FORMAT,
                DateFormat::DateTime => DATE_TIME_FORMAT,
            }
        }

        pub fn render(&self, at: NaiveDateTime) -> String {
            at.format(self.pattern()).to_string()
        }

        /// Parse text in this format; date-only text lands on midnight.
        pub fn parse(&self, text: &str) -> Result<NaiveDateTime, DateError> {
            let parsed = match self {
                DateFormat::Date => NaiveDate::parse_from_str(text, DATE_FORMAT)
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0)),
                DateFormat::DateTime => NaiveDateTime::parse_from_str(text, DATE_TIME_FORMAT).ok(),
            };
            parsed.ok_or_else(|| DateError::InvalidFormattedString(text.to_string()))
        }
    }

    /* ------------------------------ Parameter models ------------------------------ */

    /// Conversion of validated parameters into a range.
    pub trait ToDateRange {
        fn to_date_range(&self) -> Result<DateRange, DateError>;
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DateParameters {
        pub year: i32,
        pub month: u32,
        pub day: u32,
    }

    impl DateParameters {
        pub fn from_date(date: NaiveDate) -> Self {
            use chrono::Datelike;
            Self {
                year: date.year(),
                month: date.month(),
                day: date.day(),
            }
        }

        pub fn to_date(&self) -> Result<NaiveDate, DateError> {
            NaiveDate::from_ymd_opt(self.year, self.month, self.day)
                .ok_or_else(|| DateError::InvalidFormattedString(self.to_string()))
        }
    }

    impl fmt::Display for DateParameters {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)
        }
    }

    impl ToDateRange for DateParameters {
        fn to_date_range(&self) -> Result<DateRange, DateError> {
            let midnight = self
                .to_date()?
                .and_hms_opt(0, 0, 0)
                .ok_or_else(|| DateError::InvalidFormattedString(self.to_string()))?;
            Ok(DateRange::Instant(midnight))
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TimeParameters {
        pub hour: u32,
        pub minute: u32,
    }

    impl TimeParameters {
        pub fn to_time(&self) -> Option<NaiveTime> {
            NaiveTime::from_hms_opt(self.hour, self.minute, 0)
        }
    }

    impl fmt::Display for TimeParameters {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{:02}:{:02}", self.hour, self.minute)
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DateTimeParameters {
        pub date: DateParameters,
        pub time: TimeParameters,
    }

    impl DateTimeParameters {
        pub fn from_datetime(at: NaiveDateTime) -> Self {
            use chrono::Timelike;
            Self {
                date: DateParameters::from_date(at.date()),
                time: TimeParameters {
                    hour: at.hour(),
                    minute: at.minute(),
                },
            }
        }

        pub fn to_datetime(&self) -> Result<NaiveDateTime, DateError> {
            let date = self
                .date
                .to_date()
                .map_err(|_| DateError::InvalidFormattedString(self.to_string()))?;
            let time = self
                .time
                .to_time()
                .ok_or_else(|| DateError::InvalidFormattedString(self.to_string()))?;
            Ok(NaiveDateTime::new(date, time))
        }
    }

    impl fmt::Display for DateTimeParameters {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{} {}", self.date, self.time)
        }
    }

    impl ToDateRange for DateTimeParameters {
        fn to_date_range(&self) -> Result<DateRange, DateError> {
            Ok(DateRange::Instant(self.to_datetime()?))
        }
    }

    /// One day, two times.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DateTimeEndTimeParameters {
        pub date: DateParameters,
        pub time: TimeParameters,
        pub end_time: TimeParameters,
    }

    impl fmt::Display for DateTimeEndTimeParameters {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{} {}-{}", self.date, self.time, self.end_time)
        }
    }

    impl ToDateRange for DateTimeEndTimeParameters {
        fn to_date_range(&self) -> Result<DateRange, DateError> {
            let invalid = |_| DateError::InvalidFormattedString(self.to_string());
            let start = DateTimeParameters {
                date: self.date,
                time: self.time,
            }
            .to_datetime()
            .map_err(invalid)?;
            let end = DateTimeParameters {
                date: self.date,
                time: self.end_time,
            }
            .to_datetime()
            .map_err(invalid)?;
            DateRange::span(start, end)
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DateTimeDateTimeParameters {
        pub start: DateTimeParameters,
        pub end: DateTimeParameters,
    }

    impl fmt::Display for DateTimeDateTimeParameters {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{} thru {}", self.start, self.end)
        }
    }

    impl ToDateRange for DateTimeDateTimeParameters {
        fn to_date_range(&self) -> Result<DateRange, DateError> {
            let invalid = |_| DateError::InvalidFormattedString(self.to_string());
            let start = self.start.to_datetime().map_err(invalid)?;
            let end = self.end.to_datetime().map_err(invalid)?;
            DateRange::span(start, end)
        }
    }

    /* ------------------------------ Parsing ------------------------------ */

    type PResult<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

    /// Parse a tag payload into a range.
    pub fn parse_payload(text: &str) -> Result<DateRange, DateError> {
        let invalid = || DateError::InvalidFormattedString(text.to_string());
        let shape = DateShape::detect(text).ok_or_else(invalid)?;

        match shape {
            DateShape::Date => {
                let (_, params) = all_consuming(date_fields)(text).map_err(|_| invalid())?;
                params.to_date_range()
            }
            DateShape::DateTime => {
                let (_, params) = all_consuming(date_time_fields)(text).map_err(|_| invalid())?;
                params.to_date_range()
            }
            DateShape::DateTimeEndTime => {
                let (_, (start, _, end_time)) =
                    all_consuming(tuple((date_time_fields, separator, time_fields)))(text)
                        .map_err(|_| invalid())?;
                DateTimeEndTimeParameters {
                    date: start.date,
                    time: start.time,
                    end_time,
                }
                .to_date_range()
            }
            DateShape::DateTimeDateTime => {
                let (_, (start, _, end)) =
                    all_consuming(tuple((date_time_fields, separator, date_time_fields)))(text)
                        .map_err(|_| invalid())?;
                DateTimeDateTimeParameters { start, end }.to_date_range()
            }
        }
    }

    fn date_fields(i: &str) -> PResult<'_, DateParameters> {
        map(
            tuple((
                map_res(take_while_m_n(4, 4, char_is_digit), |s: &str| s.parse::<i32>()),
                char('-'),
                map_res(take_while_m_n(2, 2, char_is_digit), |s: &str| s.parse::<u32>()),
                char('-'),
                map_res(take_while_m_n(2, 2, char_is_digit), |s: &str| s.parse::<u32>()),
            )),
            |(year, _, month, _, day)| DateParameters { year, month, day },
        )(i)
    }

    fn time_fields(i: &str) -> PResult<'_, TimeParameters> {
        map(
            tuple((
                map_res(take_while_m_n(2, 2, char_is_digit), |s: &str| s.parse::<u32>()),
                char(':'),
                map_res(take_while_m_n(2, 2, char_is_digit), |s: &str| s.parse::<u32>()),
            )),
            |(hour, _, minute)| TimeParameters { hour, minute },
        )(i)
    }

    fn date_time_fields(i: &str) -> PResult<'_, DateTimeParameters> {
        map(
            tuple((date_fields, char(' '), time_fields)),
            |(date, _, time)| DateTimeParameters { date, time },
        )(i)
    }

    fn separator(i: &str) -> PResult<'_, &str> {
        map(
            tuple((space0, alt((tag("through"), tag("thru"), tag("-"))), space0)),
            |(_, word, _)| word,
        )(i)
    }

    // Takes every digit, then checks the count, so `123:00` is not read as `12`.
    fn take_while_m_n<F>(m: usize, n: usize, cond: F) -> impl Fn(&str) -> PResult<'_, &str>
    where
        F: Fn(char) -> bool + Copy,
    {
        move |i: &str| {
            let (rest, out) = take_while(cond)(i)?;
            if out.len() < m || out.len() > n {
                Err(nom::Err::Error(VerboseError {
                    errors: vec![(i, VerboseErrorKind::Context("digit count"))],
                }))
            } else {
                Ok((rest, out))
            }
        }
    }

    fn char_is_digit(c: char) -> bool {
        c.is_ascii_digit()
    }

    /* ------------------------------ Formatting ------------------------------ */

    /// Render a range in the requested shape.
    ///
    /// `DateTimeEndTime` needs a span inside one calendar day; callers wanting any span
    /// should fall back to `DateTimeDateTime`.
    pub fn format_range(
        range: &DateRange,
        shape: DateShape,
        separator: DateSeparator,
        with_spaces: bool,
    ) -> Result<String, DateError> {
        let unsupported = || DateError::UnsupportedShape { shape };
        match (range, shape) {
            (DateRange::Instant(at), DateShape::Date) => Ok(DateFormat::Date.render(*at)),
            (DateRange::Instant(at), DateShape::DateTime) => Ok(DateFormat::DateTime.render(*at)),
            (DateRange::Span { start, end }, DateShape::DateTimeDateTime) => Ok(format!(
                "{}{}{}",
                DateFormat::DateTime.render(*start),
                separator.render(with_spaces),
                DateFormat::DateTime.render(*end)
            )),
            (DateRange::Span { start, end }, DateShape::DateTimeEndTime) => {
                if start.date() != end.date() {
                    return Err(unsupported());
                }
                Ok(format!(
                    "{}{}{}",
                    DateFormat::DateTime.render(*start),
                    separator.render(with_spaces),
                    end.format("%H:%M")
                ))
            }
            _ => Err(unsupported()),
        }
    }

    pub fn format_range_with(
        range: &DateRange,
        shape: DateShape,
        opts: FormatOptions,
    ) -> Result<String, DateError> {
        format_range(range, shape, opts.separator, opts.with_spaces)
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
            NaiveDate::from_ymd_opt(y, m, d)
                .and_then(|date| date.and_hms_opt(h, min, 0))
                .expect("valid datetime")
        }

        #[test]
        fn date_only_is_midnight_instant() {
            let range = parse_payload("2024-10-31").expect("parse");
            assert_eq!(range, DateRange::Instant(at(2024, 10, 31, 0, 0)));
            assert_eq!(range.end(), None);
        }

        #[test]
        fn date_time_instant() {
            assert_eq!(
                parse_payload("2024-10-31 10:31"),
                Ok(DateRange::Instant(at(2024, 10, 31, 10, 31)))
            );
        }

        #[test]
        fn end_time_with_every_separator() {
            let expected = DateRange::Span {
                start: at(2024, 11, 30, 11, 30),
                end: at(2024, 11, 30, 23, 30),
            };
            for text in [
                "2024-11-30 11:30-23:30",
                "2024-11-30 11:30 - 23:30",
                "2024-11-30 11:30thru23:30",
                "2024-11-30 11:30 thru 23:30",
                "2024-11-30 11:30 through 23:30",
            ] {
                assert_eq!(parse_payload(text), Ok(expected), "{text}");
            }
        }

        #[test]
        fn date_time_through_date_time() {
            assert_eq!(
                parse_payload("2024-11-30 11:30 - 2024-12-02 23:30"),
                Ok(DateRange::Span {
                    start: at(2024, 11, 30, 11, 30),
                    end: at(2024, 12, 2, 23, 30),
                })
            );
            assert!(parse_payload("2024-11-23 11:00 thru 2024-11-24 10:00").is_ok());
        }

        #[test]
        fn calendar_illegal_fields_are_invalid() {
            assert_eq!(
                parse_payload("2024-13-31"),
                Err(DateError::InvalidFormattedString("2024-13-31".into()))
            );
            assert_eq!(
                parse_payload("2024-02-30 10:00"),
                Err(DateError::InvalidFormattedString("2024-02-30 10:00".into()))
            );
            assert_eq!(
                parse_payload("2024-11-30 24:00-25:00"),
                Err(DateError::InvalidFormattedString("2024-11-30 24:00-25:00".into()))
            );
        }

        #[test]
        fn wrong_shape_for_length_is_invalid() {
            assert!(matches!(
                parse_payload("tomorrow!!"),
                Err(DateError::InvalidFormattedString(_))
            ));
            assert!(matches!(
                parse_payload("2024-1-1"),
                Err(DateError::InvalidFormattedString(_))
            ));
            assert!(matches!(
                parse_payload("2024-11-30 11:30 until 23:30"),
                Err(DateError::InvalidFormattedString(_))
            ));
        }

        #[test]
        fn end_not_after_start_is_its_own_error() {
            assert_eq!(
                parse_payload("2024-11-30 11:30-11:30"),
                Err(DateError::EndDateNotAfterStartDate {
                    start: at(2024, 11, 30, 11, 30),
                    end: at(2024, 11, 30, 11, 30),
                })
            );
            assert!(matches!(
                parse_payload("2024-12-02 23:30 - 2024-11-30 11:30"),
                Err(DateError::EndDateNotAfterStartDate { .. })
            ));
        }

        #[test]
        fn format_end_time_extended_with_spaces() {
            let range = parse_payload("2024-11-30 11:30-23:30").expect("parse");
            assert_eq!(
                format_range(&range, DateShape::DateTimeEndTime, DateSeparator::Extended, true),
                Ok("2024-11-30 11:30 thru 23:30".to_string())
            );
            assert_eq!(
                format_range(&range, DateShape::DateTimeEndTime, DateSeparator::Compact, false),
                Ok("2024-11-30 11:30-23:30".to_string())
            );
        }

        #[test]
        fn format_end_time_needs_same_day() {
            let range = parse_payload("2024-11-30 11:30 - 2024-12-02 23:30").expect("parse");
            assert_eq!(
                format_range(&range, DateShape::DateTimeEndTime, DateSeparator::Compact, true),
                Err(DateError::UnsupportedShape {
                    shape: DateShape::DateTimeEndTime
                })
            );
            assert_eq!(
                format_range_with(
                    &range,
                    DateShape::DateTimeDateTime,
                    FormatOptions {
                        separator: DateSeparator::GrammarExtended,
                        with_spaces: true,
                    }
                ),
                Ok("2024-11-30 11:30 through 2024-12-02 23:30".to_string())
            );
        }

        #[test]
        fn format_rejects_arity_mismatch() {
            let instant = DateRange::Instant(at(2024, 10, 31, 0, 0));
            assert_eq!(
                format_range(&instant, DateShape::Date, DateSeparator::Compact, true),
                Ok("2024-10-31".to_string())
            );
            assert_eq!(
                format_range(&instant, DateShape::DateTime, DateSeparator::Compact, true),
                Ok("2024-10-31 00:00".to_string())
            );
            assert!(
                format_range(&instant, DateShape::DateTimeDateTime, DateSeparator::Compact, true)
                    .is_err()
            );
            let span = DateRange::span(at(2024, 1, 1, 9, 0), at(2024, 1, 1, 10, 0)).expect("span");
            assert!(format_range(&span, DateShape::Date, DateSeparator::Compact, true).is_err());
        }

        #[test]
        fn parameter_round_trips() {
            let when = at(2025, 6, 1, 6, 1);
            let params = DateTimeParameters::from_datetime(when);
            assert_eq!(params.to_string(), "2025-06-01 06:01");
            assert_eq!(params.to_datetime(), Ok(when));
            assert_eq!(
                DateFormat::Date.parse("2025-06-01"),
                Ok(at(2025, 6, 1, 0, 0))
            );
            assert!(DateFormat::DateTime.parse("2025-06-01").is_err());
        }
    }
}

pub mod parser {
    //! Line grammar.
    //!
    //! A line is `indent "-"? ws* body ":"?`. Every leading whitespace character is one
    //! level of indentation, a leading `-` marks a task and a trailing `:` a project.
    //! Parsing never fails on real text: anything unexpected degrades to a text node.

    use crate::core::{Node, NodeKind};
    use crate::tags::{extract_tags, strip_tags};
    use log::{trace, warn};
    use nom::{
        IResult,
        bytes::complete::take_while,
        character::complete::char,
        combinator::opt,
        error::VerboseError,
        sequence::pair,
    };

    type PResult<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

    struct LineParts<'a> {
        indent: usize,
        task: bool,
        body: &'a str,
        project: bool,
    }

    fn whitespace(i: &str) -> PResult<'_, &str> {
        take_while(|c: char| c.is_whitespace())(i)
    }

    fn dash_and_spacing(i: &str) -> PResult<'_, (Option<char>, &str)> {
        pair(opt(char('-')), whitespace)(i)
    }

    /// Last character of a non-empty string, as a slice.
    fn last_char(s: &str) -> Option<&str> {
        let c = s.chars().next_back()?;
        Some(&s[s.len() - c.len_utf8()..])
    }

    fn line_parts(raw: &str) -> Option<LineParts<'_>> {
        let (rest, lead) = whitespace(raw).ok()?;

        if rest.is_empty() {
            // Whitespace only: the body must keep at least one character.
            let body = last_char(lead)?;
            return Some(LineParts {
                indent: lead.chars().count() - 1,
                task: false,
                body,
                project: false,
            });
        }

        let indent = lead.chars().count();
        let (after, (dash, spacing)) = dash_and_spacing(rest).ok()?;
        let (candidate, task) = match (dash, after.is_empty()) {
            (None, _) => (rest, false),
            (Some(_), false) => (after, true),
            // A lone `-` is the body itself.
            (Some(_), true) if spacing.is_empty() => (rest, false),
            (Some(_), true) => (last_char(spacing)?, true),
        };

        let (body, project) = match candidate.strip_suffix(':') {
            Some(name) if !name.is_empty() => (name, true),
            _ => (candidate, false),
        };

        Some(LineParts {
            indent,
            task,
            body,
            project,
        })
    }

    /// Parse one line into a childless node. `None` only for the empty string.
    pub fn parse_line(raw: &str) -> Option<Node> {
        let parts = line_parts(raw)?;

        let mut text = parts.body;
        let mut tags = Vec::new();
        if text.contains('@') {
            tags = extract_tags(text);
            text = strip_tags(text);
        }

        let node = if parts.project {
            Node::new(parts.indent, NodeKind::Project(text.to_string()))
        } else if parts.task {
            Node::new(parts.indent, NodeKind::Task(text.to_string()))
        } else if text.trim().is_empty() {
            // Pure indentation: whatever whitespace the body held counts as depth too.
            Node::new(parts.indent + text.chars().count(), NodeKind::Text(String::new()))
        } else {
            Node::new(parts.indent, NodeKind::Text(text.to_string()))
        };
        let node = node.with_tags(tags);

        trace!("parsed line {:?} as {:?}", raw, node);
        Some(node)
    }

    /// Parse every line, blank ones included, into a flat sequence.
    pub fn parse_all(text: &str) -> Vec<Node> {
        text.split('\n')
            .map(|line| {
                let line = line.strip_suffix('\r').unwrap_or(line);
                parse_line(line).unwrap_or_else(|| {
                    if !line.is_empty() {
                        warn!("falling back to plain text for line {:?}", line);
                    }
                    Node::text(line)
                })
            })
            .collect()
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::core::Tag;

        fn parse(raw: &str) -> Node {
            parse_line(raw).expect("line parses")
        }

        #[test]
        fn projects() {
            assert_eq!(parse("  Project:"), Node::project("Project").with_indent(2));
            assert_eq!(parse("Project For Work:"), Node::project("Project For Work"));
            assert_eq!(parse("Project::"), Node::project("Project:"));
        }

        #[test]
        fn tasks_with_tags() {
            assert_eq!(parse("- Task"), Node::task("Task"));
            assert_eq!(
                parse("- Task @tag"),
                Node::task("Task").with_tags(vec![Tag::bare("tag")])
            );
            assert_eq!(
                parse("- Task @tag(payload)"),
                Node::task("Task").with_tags(vec![Tag::with_payload("tag", "payload")])
            );
            assert_eq!(
                parse("- Task with space @tag @test(pay load)"),
                Node::task("Task with space")
                    .with_tags(vec![Tag::bare("tag"), Tag::with_payload("test", "pay load")])
            );
        }

        #[test]
        fn indentation_counts_each_whitespace_character() {
            assert_eq!(
                parse("\t - Task @due(2024-10-31)"),
                Node::task("Task")
                    .with_indent(2)
                    .with_tags(vec![Tag::with_payload("due", "2024-10-31")])
            );
            assert_eq!(
                parse("   - Task @due(2024-10-31 10:31thru13:00)"),
                Node::task("Task")
                    .with_indent(3)
                    .with_tags(vec![Tag::with_payload("due", "2024-10-31 10:31thru13:00")])
            );
            assert_eq!(parse("     Text"), Node::text("Text").with_indent(5));
        }

        #[test]
        fn same_name_regardless_of_tags() {
            for raw in ["- task", "- task @tag", "- task @tag(payload)"] {
                assert_eq!(parse(raw).kind, NodeKind::Task("task".into()), "{raw}");
            }
        }

        #[test]
        fn whitespace_only_lines_become_indented_blank_text() {
            assert_eq!(parse("\t\t\t"), Node::text("").with_indent(3));
            assert_eq!(parse(" "), Node::text("").with_indent(1));
            assert_eq!(parse("@lead"), Node::text("").with_tags(vec![Tag::bare("lead")]));
        }

        #[test]
        fn degenerate_dashes() {
            assert_eq!(parse("-"), Node::text("-"));
            assert_eq!(parse("  -"), Node::text("-").with_indent(2));
            assert_eq!(parse("- "), Node::task(" "));
            assert_eq!(parse("- :"), Node::task(":"));
            assert_eq!(parse(":"), Node::text(":"));
        }

        #[test]
        fn colon_in_the_middle_is_text() {
            assert_eq!(parse("Note: something"), Node::text("Note: something"));
            assert_eq!(
                parse("Project: @tag"),
                Node::text("Project:").with_tags(vec![Tag::bare("tag")])
            );
        }

        #[test]
        fn empty_line_has_no_parse_but_parse_all_keeps_it() {
            assert!(parse_line("").is_none());
            assert_eq!(
                parse_all("Project:\n\n- Task\r\n"),
                vec![
                    Node::project("Project"),
                    Node::text(""),
                    Node::task("Task"),
                    Node::text(""),
                ]
            );
        }

        #[test]
        fn parse_all_sample() {
            let text = "Project:\nTest of TaskManager\n\n- Task @tag\nNot happy with this.\n  - Task with space @due(2024-10-31) @done(2024-10-31 10:31)";
            assert_eq!(
                parse_all(text),
                vec![
                    Node::project("Project"),
                    Node::text("Test of TaskManager"),
                    Node::text(""),
                    Node::task("Task").with_tags(vec![Tag::bare("tag")]),
                    Node::text("Not happy with this."),
                    Node::task("Task with space").with_indent(2).with_tags(vec![
                        Tag::with_payload("due", "2024-10-31"),
                        Tag::with_payload("done", "2024-10-31 10:31"),
                    ]),
                ]
            );
        }
    }
}

pub mod normalize {
    //! Fold a flat, indent-annotated node sequence into a forest.
    //!
    //! Nodes arrive in source order. Each one either starts a new root or hangs somewhere
    //! on the right spine of the most recent root:
    //!
    //! 1. no roots yet, or indent not deeper than the last root: new root;
    //! 2. a spine node below the root already sits at the incoming indent: the incoming
    //!    node becomes its next sibling;
    //! 3. otherwise it goes under the bottom of the spine (the root itself when the root
    //!    has no children).
    //!
    //! Only the right spine is ever touched, so nodes are addressed by their depth on it
    //! rather than searched for by value.

    use crate::core::Node;
    use log::debug;

    /// Where an incoming node lands relative to the forest built so far.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Placement {
        NewRoot,
        /// Append as the last child of the spine node `depth` steps below the last root.
        Attach { depth: usize },
    }

    pub fn decide_placement(node: &Node, forest: &[Node]) -> Placement {
        let Some(last) = forest.last() else {
            return Placement::NewRoot;
        };
        if node.indent <= last.indent {
            return Placement::NewRoot;
        }

        let spine = last.right_spine();
        if let Some(pos) = spine
            .iter()
            .skip(1)
            .position(|n| n.indent == node.indent)
        {
            // `pos` is the depth of the matching node's parent.
            return Placement::Attach { depth: pos };
        }
        Placement::Attach {
            depth: spine.len() - 1,
        }
    }

    /// Build the forest. Roots keep source order and never get deeper than the root
    /// before them, so feeding the result back in returns it unchanged.
    pub fn normalize(nodes: impl IntoIterator<Item = Node>) -> Vec<Node> {
        let mut forest: Vec<Node> = Vec::new();
        for node in nodes {
            let placement = decide_placement(&node, &forest);
            debug!("placing {:?} at indent {}: {:?}", node.kind, node.indent, placement);
            match placement {
                Placement::NewRoot => forest.push(node),
                Placement::Attach { depth } => {
                    if let Some(parent) = forest
                        .last_mut()
                        .and_then(|root| root.spine_node_mut(depth))
                    {
                        parent.append_child(node);
                    } else {
                        forest.push(node);
                    }
                }
            }
        }
        forest
    }

}

pub mod format {
    //! Render nodes back to tab-indented text.

    use crate::core::Node;

    /// One line per node: tabs for the indent, the kind's display form, then the tags
    /// separated by single spaces. Children follow on their own lines.
    pub fn render_node(node: &Node) -> String {
        let mut buf = "\t".repeat(node.indent);
        buf.push_str(&node.kind.to_string());

        for tag in &node.tags {
            // No separator after bare indentation, so the tag does not add depth on re-read.
            if !buf.trim().is_empty() {
                buf.push(' ');
            }
            buf.push_str(&tag.to_string());
        }

        for child in &node.children {
            if !buf.is_empty() {
                buf.push('\n');
            }
            buf.push_str(&render_node(child));
        }
        buf
    }

    pub fn serialize_forest(forest: &[Node]) -> String {
        forest
            .iter()
            .map(render_node)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Parse, normalize and render in one step.
    pub fn reformat(text: &str) -> String {
        serialize_forest(&crate::convert(text))
    }

}

pub mod events {
    //! Calendar/reminder collaborator interface.
    //!
    //! The outline only produces and consumes dates and titles; storage lives behind
    //! [`EventStore`]. [`MemoryEventStore`] keeps everything in process.

    use crate::dates::DateFormat;
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Serialize};
    use std::fmt;
    use uuid::Uuid;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum EntityKind {
        Event,
        Reminder,
    }

    impl fmt::Display for EntityKind {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                EntityKind::Event => f.write_str("event"),
                EntityKind::Reminder => f.write_str("reminder"),
            }
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct EventParameters {
        pub title: String,
        pub start: NaiveDateTime,
        pub end: Option<NaiveDateTime>,
        pub notes: Option<String>,
        pub date_format: DateFormat,
    }

    impl EventParameters {
        pub fn new(title: impl Into<String>, start: NaiveDateTime) -> Self {
            Self {
                title: title.into(),
                start,
                end: None,
                notes: None,
                date_format: DateFormat::DateTime,
            }
        }

        pub fn with_end(mut self, end: NaiveDateTime) -> Self {
            self.end = Some(end);
            self
        }

        pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
            self.notes = Some(notes.into());
            self
        }

        pub fn with_date_format(mut self, date_format: DateFormat) -> Self {
            self.date_format = date_format;
            self
        }

        /// A search that matches these exact values.
        pub fn search_values(&self) -> EventSearch {
            EventSearch {
                title: Some(self.title.clone()),
                start: Some(self.start),
                end: self.end,
                notes: self.notes.clone(),
            }
        }

        pub fn matches(&self, search: &EventSearch) -> bool {
            let title_only = search.title.is_some()
                && search.start.is_none()
                && search.end.is_none()
                && search.notes.is_none();
            let notes_only = search.notes.is_some()
                && search.title.is_none()
                && search.start.is_none()
                && search.end.is_none();

            if title_only {
                return search
                    .title
                    .as_deref()
                    .is_some_and(|t| self.title.contains(t));
            }
            if notes_only {
                return match (&self.notes, &search.notes) {
                    (Some(notes), Some(wanted)) => notes.contains(wanted.as_str()),
                    _ => false,
                };
            }
            if search.is_empty() {
                return false;
            }

            search.title.as_ref().is_none_or(|t| *t == self.title)
                && search.start.is_none_or(|s| s == self.start)
                && search.end.is_none_or(|e| Some(e) == self.end)
                && search.notes.as_ref().is_none_or(|n| Some(n) == self.notes.as_ref())
        }
    }

    /// Partial field values to look records up by. Absent fields are ignored.
    #[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct EventSearch {
        pub title: Option<String>,
        pub start: Option<NaiveDateTime>,
        pub end: Option<NaiveDateTime>,
        pub notes: Option<String>,
    }

    impl EventSearch {
        pub fn is_empty(&self) -> bool {
            self.title.is_none() && self.start.is_none() && self.end.is_none() && self.notes.is_none()
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub enum SearchType {
        ById(String),
        BySearchValues(EventSearch),
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct EventRecord {
        pub id: String,
        pub params: EventParameters,
    }

    impl EventRecord {
        pub fn matches(&self, search: &SearchType) -> bool {
            match search {
                SearchType::ById(id) => self.id == *id,
                SearchType::BySearchValues(values) => self.params.matches(values),
            }
        }
    }

    #[derive(Debug, thiserror::Error)]
    pub enum StoreError {
        #[error("unable to create {kind} from {params:?}")]
        UnableToCreate {
            kind: EntityKind,
            params: EventParameters,
        },
        #[error("unable to update {kind} {id} from {params:?}")]
        UnableToUpdate {
            kind: EntityKind,
            id: String,
            params: EventParameters,
        },
        #[error("{kind} not found for search {search:?}")]
        EntityNotFound { kind: EntityKind, search: SearchType },
    }

    /// External store of calendar events and reminders, keyed by opaque string ids.
    pub trait EventStore {
        fn create(
            &mut self,
            kind: EntityKind,
            params: EventParameters,
        ) -> Result<EventRecord, StoreError>;

        fn search(
            &self,
            kind: EntityKind,
            search: &SearchType,
        ) -> Result<Vec<EventRecord>, StoreError>;

        /// Overwrite every matching record; returns the updated records.
        fn update(
            &mut self,
            kind: EntityKind,
            search: &SearchType,
            params: EventParameters,
        ) -> Result<Vec<EventRecord>, StoreError>;

        /// Remove every matching record; returns how many were removed.
        fn delete(&mut self, kind: EntityKind, search: &SearchType) -> Result<usize, StoreError>;
    }

    #[derive(Debug, Default)]
    pub struct MemoryEventStore {
        events: Vec<EventRecord>,
        reminders: Vec<EventRecord>,
    }

    impl MemoryEventStore {
        pub fn new() -> Self {
            Self::default()
        }

        fn records(&self, kind: EntityKind) -> &Vec<EventRecord> {
            match kind {
                EntityKind::Event => &self.events,
                EntityKind::Reminder => &self.reminders,
            }
        }

        fn records_mut(&mut self, kind: EntityKind) -> &mut Vec<EventRecord> {
            match kind {
                EntityKind::Event => &mut self.events,
                EntityKind::Reminder => &mut self.reminders,
            }
        }

        fn is_valid(params: &EventParameters) -> bool {
            !params.title.is_empty() && params.end.is_none_or(|end| end >= params.start)
        }
    }

    impl EventStore for MemoryEventStore {
        fn create(
            &mut self,
            kind: EntityKind,
            params: EventParameters,
        ) -> Result<EventRecord, StoreError> {
            if !Self::is_valid(&params) {
                return Err(StoreError::UnableToCreate { kind, params });
            }
            let record = EventRecord {
                id: Uuid::new_v4().to_string(),
                params,
            };
            self.records_mut(kind).push(record.clone());
            Ok(record)
        }

        fn search(
            &self,
            kind: EntityKind,
            search: &SearchType,
        ) -> Result<Vec<EventRecord>, StoreError> {
            Ok(self
                .records(kind)
                .iter()
                .filter(|r| r.matches(search))
                .cloned()
                .collect())
        }

        fn update(
            &mut self,
            kind: EntityKind,
            search: &SearchType,
            params: EventParameters,
        ) -> Result<Vec<EventRecord>, StoreError> {
            let mut updated = Vec::new();
            for record in self.records_mut(kind).iter_mut() {
                if !record.matches(search) {
                    continue;
                }
                if !Self::is_valid(&params) {
                    return Err(StoreError::UnableToUpdate {
                        kind,
                        id: record.id.clone(),
                        params,
                    });
                }
                record.params = params.clone();
                updated.push(record.clone());
            }
            if updated.is_empty() {
                return Err(StoreError::EntityNotFound {
                    kind,
                    search: search.clone(),
                });
            }
            Ok(updated)
        }

        fn delete(&mut self, kind: EntityKind, search: &SearchType) -> Result<usize, StoreError> {
            let records = self.records_mut(kind);
            let before = records.len();
            records.retain(|r| !r.matches(search));
            let removed = before - records.len();
            if removed == 0 {
                return Err(StoreError::EntityNotFound {
                    kind,
                    search: search.clone(),
                });
            }
            Ok(removed)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use chrono::NaiveDate;

        fn at(d: u32, h: u32) -> NaiveDateTime {
            NaiveDate::from_ymd_opt(2025, 6, d)
                .and_then(|date| date.and_hms_opt(h, 0, 0))
                .expect("valid datetime")
        }

        fn meeting() -> EventParameters {
            EventParameters::new("Team meeting", at(1, 9))
                .with_end(at(1, 10))
                .with_notes("agenda: roadmap")
        }

        #[test]
        fn title_only_search_matches_substring() {
            let search = EventSearch {
                title: Some("meeting".into()),
                ..Default::default()
            };
            assert!(meeting().matches(&search));
        }

        #[test]
        fn notes_only_search_needs_notes() {
            let search = EventSearch {
                notes: Some("roadmap".into()),
                ..Default::default()
            };
            assert!(meeting().matches(&search));
            assert!(!EventParameters::new("x", at(1, 9)).matches(&search));
        }

        #[test]
        fn combined_search_uses_equality() {
            let search = EventSearch {
                title: Some("meeting".into()),
                start: Some(at(1, 9)),
                ..Default::default()
            };
            assert!(!meeting().matches(&search));
            assert!(meeting().matches(&meeting().search_values()));
            let by_dates = EventSearch {
                start: Some(at(1, 9)),
                end: Some(at(1, 10)),
                ..Default::default()
            };
            assert!(meeting().matches(&by_dates));
        }

        #[test]
        fn empty_search_matches_nothing() {
            assert!(!meeting().matches(&EventSearch::default()));
        }

        #[test]
        fn store_crud() {
            let mut store = MemoryEventStore::new();
            let created = store
                .create(EntityKind::Event, meeting())
                .expect("create");
            let by_id = SearchType::ById(created.id.clone());

            assert_eq!(
                store.search(EntityKind::Event, &by_id).expect("search"),
                vec![created.clone()]
            );
            assert!(
                store
                    .search(EntityKind::Reminder, &by_id)
                    .expect("search")
                    .is_empty()
            );

            let moved = meeting().with_end(at(1, 11));
            let updated = store
                .update(EntityKind::Event, &by_id, moved.clone())
                .expect("update");
            assert_eq!(updated[0].params, moved);

            assert_eq!(store.delete(EntityKind::Event, &by_id).expect("delete"), 1);
            assert!(matches!(
                store.delete(EntityKind::Event, &by_id),
                Err(StoreError::EntityNotFound { .. })
            ));
        }

        #[test]
        fn store_rejects_end_before_start() {
            let mut store = MemoryEventStore::new();
            let bad = EventParameters::new("x", at(2, 9)).with_end(at(1, 9));
            assert!(matches!(
                store.create(EntityKind::Reminder, bad.clone()),
                Err(StoreError::UnableToCreate { .. })
            ));

            let record = store
                .create(EntityKind::Reminder, EventParameters::new("x", at(2, 9)))
                .expect("create");
            assert!(matches!(
                store.update(EntityKind::Reminder, &SearchType::ById(record.id), bad),
                Err(StoreError::UnableToUpdate { .. })
            ));
        }
    }
}

pub mod projectors {
    pub mod event_projector {
        //! Project dated outline entries into calendar events.

        use crate::core::{KnownTag, Node, NodeKind};
        use crate::dates::{DateError, DateFormat, DateShape, parse_payload};
        use crate::events::{EntityKind, EventParameters, EventStore, SearchType, StoreError};
        use log::warn;
        use serde::{Deserialize, Serialize};

        #[derive(Debug, Clone, Copy, Default)]
        pub struct ProjectOptions {
            pub include_done: bool,
        }

        /// An event together with the names of the entries leading to it.
        #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
        pub struct ProjectedEvent {
            pub params: EventParameters,
            pub context_path: Vec<String>,
        }

        pub fn project_forest(forest: &[Node]) -> Vec<ProjectedEvent> {
            project_forest_with_options(forest, ProjectOptions::default())
        }

        pub fn project_forest_with_options(
            forest: &[Node],
            opts: ProjectOptions,
        ) -> Vec<ProjectedEvent> {
            let mut out = Vec::new();
            let mut path = Vec::<String>::new();
            for node in forest {
                walk_node(node, &mut path, &mut out, opts);
            }
            out
        }

        fn walk_node(
            node: &Node,
            path: &mut Vec<String>,
            out: &mut Vec<ProjectedEvent>,
            opts: ProjectOptions,
        ) {
            path.push(node.kind.text().to_string());

            let done = node.find_tag(KnownTag::Done).is_some();
            if let Some(payload) = node.find_tag(KnownTag::Due).and_then(|t| t.payload()) {
                if node.kind.text().trim().is_empty() {
                    warn!("skipping untitled entry due {:?}", payload);
                } else if !done || opts.include_done {
                    match make_event(node, payload) {
                        Ok(params) => out.push(ProjectedEvent {
                            params,
                            context_path: path.clone(),
                        }),
                        Err(err) => warn!("skipping {:?}: {}", node.kind.text(), err),
                    }
                }
            }

            for child in &node.children {
                walk_node(child, path, out, opts);
            }
            path.pop();
        }

        fn make_event(node: &Node, payload: &str) -> Result<EventParameters, DateError> {
            let range = parse_payload(payload)?;
            let date_format = match DateShape::detect(payload) {
                Some(DateShape::Date) => DateFormat::Date,
                _ => DateFormat::DateTime,
            };

            let mut params = EventParameters::new(node.kind.text(), range.start())
                .with_date_format(date_format);
            params.end = range.end();

            let notes: Vec<&str> = node
                .children
                .iter()
                .filter_map(|child| match &child.kind {
                    NodeKind::Text(content) if !content.is_empty() => Some(content.as_str()),
                    _ => None,
                })
                .collect();
            if !notes.is_empty() {
                params.notes = Some(notes.join("\n"));
            }
            Ok(params)
        }

        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
        pub struct MirrorReport {
            pub created: usize,
            pub existing: usize,
        }

        /// Create every projected event the store does not hold yet.
        pub fn mirror_into(
            store: &mut impl EventStore,
            kind: EntityKind,
            events: &[ProjectedEvent],
        ) -> Result<MirrorReport, StoreError> {
            let mut report = MirrorReport::default();
            for event in events {
                let search = SearchType::BySearchValues(event.params.search_values());
                if store.search(kind, &search)?.is_empty() {
                    store.create(kind, event.params.clone())?;
                    report.created += 1;
                } else {
                    report.existing += 1;
                }
            }
            Ok(report)
        }

        #[cfg(test)]
        mod tests {
            use super::*;
            use crate::convert;
            use crate::events::MemoryEventStore;
            use chrono::NaiveDate;

            const TEXT: &str = "Project:\n\t- Ship @due(2025-06-01)\n\t\tRelease notes\n\t\tTag the build\n\t- Meet @due(2025-06-01 06:01-13:00)\n\t- Old @due(2025-05-01) @done(2025-05-02)\n\t- Broken @due(someday)";

            #[test]
            fn projects_due_entries_with_context() {
                let events = project_forest(&convert(TEXT));
                assert_eq!(events.len(), 2);

                let ship = &events[0];
                assert_eq!(ship.context_path, vec!["Project", "Ship"]);
                assert_eq!(ship.params.title, "Ship");
                assert_eq!(ship.params.date_format, DateFormat::Date);
                assert_eq!(
                    ship.params.notes.as_deref(),
                    Some("Release notes\nTag the build")
                );

                let meet = &events[1];
                assert_eq!(meet.params.date_format, DateFormat::DateTime);
                assert_eq!(
                    meet.params.end,
                    NaiveDate::from_ymd_opt(2025, 6, 1).and_then(|d| d.and_hms_opt(13, 0, 0))
                );
            }

            #[test]
            fn done_entries_are_opt_in() {
                let events = project_forest_with_options(
                    &convert(TEXT),
                    ProjectOptions { include_done: true },
                );
                assert_eq!(events.len(), 3);
                assert_eq!(events[2].params.title, "Old");
            }

            #[test]
            fn mirroring_is_idempotent() {
                let events = project_forest(&convert(TEXT));
                let mut store = MemoryEventStore::new();
                let first = mirror_into(&mut store, EntityKind::Reminder, &events).expect("mirror");
                assert_eq!(first, MirrorReport { created: 2, existing: 0 });
                let second = mirror_into(&mut store, EntityKind::Reminder, &events).expect("mirror");
                assert_eq!(second, MirrorReport { created: 0, existing: 2 });
            }

            #[test]
            fn untitled_due_entries_are_skipped() {
                let forest = convert(
                    "P:\n\t- Ship @due(2025-06-01)\n\t- @due(2025-06-02)\n\t- Later @due(2025-06-03)",
                );
                let events = project_forest(&forest);
                let titles: Vec<&str> = events.iter().map(|e| e.params.title.as_str()).collect();
                assert_eq!(titles, vec!["Ship", "Later"]);

                let mut store = MemoryEventStore::new();
                let report = mirror_into(&mut store, EntityKind::Event, &events).expect("mirror");
                assert_eq!(report, MirrorReport { created: 2, existing: 0 });
            }
        }
    }
}

/// Parse text and fold it into a forest: what an editor calls after every change.
pub fn convert(text: &str) -> Vec<Node> {
    normalize::normalize(parser::parse_all(text))
}

pub use crate::core::{Node, NodeKind, Tag};
pub use dates::{DateRange, parse_payload};
pub use format::serialize_forest;
pub use normalize::normalize;
pub use parser::{parse_all, parse_line};
