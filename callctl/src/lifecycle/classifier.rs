//! Outcome classification for terminal calls.
//!
//! A pure function from the provider's end-of-call analysis (plus the ended
//! reason, duration, and transcript text) to a business outcome and a
//! pass/fail result. Ambiguity is resolved by a fixed precedence, never by
//! an error: every terminal call gets *some* outcome.
//!
//! Precedence, highest first:
//!   (a) explicit structured-data outcome field;
//!   (b) the success evaluation flag;
//!   (c) ended-reason keywords, overriding a non-success default;
//!   (d) detected voicemail (reason or transcript phrases);
//!   (e) very short completed calls without success.
//! Of (c)-(e) only the first matching heuristic applies: a short call that
//! ended in an error stays a technical failure, the floor never downgrades
//! it. A successfully resolved appointment overrides all of the above.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc, Weekday};
use serde::Deserialize;

use crate::store::models::{CallOutcome, CallResult};

/// Structured analysis fields the provider extracts from the conversation.
///
/// Deserialized leniently from the raw `structuredData` payload; absent or
/// mistyped fields simply stay `None`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StructuredAnalysis {
    pub outcome: Option<String>,
    pub sentiment: Option<String>,
    pub interest_level: Option<String>,
    pub appointment_booked: Option<bool>,
    pub appointment_date: Option<String>,
    pub appointment_time: Option<String>,
    pub follow_up_needed: Option<bool>,
    pub confirmed_name: Option<String>,
    pub confirmed_phone: Option<String>,
    pub confirmed_email: Option<String>,
}

impl StructuredAnalysis {
    /// Parse from the raw provider payload. Anything unparseable becomes the
    /// empty analysis rather than an error.
    pub fn from_raw(raw: Option<&serde_json::Value>) -> Self {
        raw.and_then(|value| serde_json::from_value(value.clone()).ok())
            .unwrap_or_default()
    }
}

/// Everything the classifier looks at for one call.
#[derive(Debug)]
pub struct ClassifierInput<'a> {
    pub structured: StructuredAnalysis,
    pub success: Option<bool>,
    pub ended_reason: Option<&'a str>,
    pub duration_secs: Option<i32>,
    pub transcript: Option<&'a str>,
    /// Reference instant for appointment resolution; the call's end time.
    pub ended_at: DateTime<Utc>,
}

impl<'a> ClassifierInput<'a> {
    pub fn new(ended_at: DateTime<Utc>) -> Self {
        Self {
            structured: StructuredAnalysis::default(),
            success: None,
            ended_reason: None,
            duration_secs: None,
            transcript: None,
            ended_at,
        }
    }
}

/// Classification verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub outcome: CallOutcome,
    pub result: CallResult,
    /// Resolved appointment timestamp, when one was booked and its
    /// date/time strings could be interpreted.
    pub appointment_at: Option<DateTime<Utc>>,
}

/// Completed calls shorter than this carry no reliable signal.
const SHORT_CALL_FLOOR_SECS: i32 = 15;

/// Phrases that identify an answering machine in the transcript.
const VOICEMAIL_PHRASES: &[&str] = &[
    "leave a message",
    "leave your message",
    "after the tone",
    "after the beep",
    "at the tone",
    "voicemail",
    "not available right now",
    "unable to take your call",
];

pub fn classify(input: &ClassifierInput<'_>) -> Classification {
    let explicit = input
        .structured
        .outcome
        .as_deref()
        .and_then(parse_structured_outcome);

    let (mut outcome, mut result) = match (explicit, input.success) {
        (Some(outcome), _) => (outcome, default_result_for(outcome)),
        (None, Some(true)) => (CallOutcome::Success, CallResult::Pass),
        (None, Some(false)) => (CallOutcome::Partial, CallResult::Inconclusive),
        (None, None) => (CallOutcome::NoResponse, CallResult::Inconclusive),
    };

    // The lower-precedence heuristics only adjust a non-success verdict that
    // didn't come from an explicit structured outcome, and only the first
    // matching heuristic applies.
    if explicit.is_none() && outcome != CallOutcome::Success {
        if let Some(adjusted) = heuristic_override(input) {
            (outcome, result) = adjusted;
        }
    }

    // A booked appointment with a resolvable date wins over everything.
    let appointment_at = if input.structured.appointment_booked == Some(true) {
        resolve_appointment(
            input.structured.appointment_date.as_deref(),
            input.structured.appointment_time.as_deref(),
            input.ended_at,
        )
    } else {
        None
    };
    if appointment_at.is_some() {
        (outcome, result) = (CallOutcome::Success, CallResult::Pass);
    }

    Classification {
        outcome,
        result,
        appointment_at,
    }
}

/// First matching low-precedence heuristic, in order: ended-reason keywords,
/// voicemail detection, the short-call floor. The floor only reaches calls
/// whose reason matched no keyword, so an error-ended short call keeps its
/// failure verdict.
fn heuristic_override(input: &ClassifierInput<'_>) -> Option<(CallOutcome, CallResult)> {
    if let Some(reason) = input.ended_reason.map(str::to_ascii_lowercase) {
        if reason.contains("no-answer")
            || reason.contains("did-not-answer")
            || reason.contains("busy")
            || reason.contains("voicemail")
        {
            return Some((CallOutcome::NoResponse, CallResult::Inconclusive));
        }
        if reason.contains("error") || reason.contains("failed") {
            return Some((CallOutcome::TechnicalFailure, CallResult::Fail));
        }
    }

    if detect_voicemail(input.ended_reason, input.transcript) {
        return Some((CallOutcome::NoResponse, CallResult::Inconclusive));
    }

    if input.duration_secs.is_some_and(|d| d < SHORT_CALL_FLOOR_SECS) {
        return Some((CallOutcome::NoResponse, CallResult::Inconclusive));
    }

    None
}

/// Whether the call reached an answering machine, judged by the ended reason
/// or by known voicemail phrases in the transcript.
pub fn detect_voicemail(ended_reason: Option<&str>, transcript: Option<&str>) -> bool {
    if ended_reason
        .map(|r| r.to_ascii_lowercase().contains("voicemail"))
        .unwrap_or(false)
    {
        return true;
    }
    let Some(transcript) = transcript else {
        return false;
    };
    let transcript = transcript.to_ascii_lowercase();
    VOICEMAIL_PHRASES.iter().any(|phrase| transcript.contains(phrase))
}

fn parse_structured_outcome(raw: &str) -> Option<CallOutcome> {
    let normalized: String = raw
        .trim()
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c == '-' || c == ' ' { '_' } else { c })
        .collect();
    match normalized.as_str() {
        "success" | "successful" => Some(CallOutcome::Success),
        "partial" => Some(CallOutcome::Partial),
        "no_response" | "noresponse" => Some(CallOutcome::NoResponse),
        "callback_requested" | "callback" => Some(CallOutcome::CallbackRequested),
        "wrong_number" => Some(CallOutcome::WrongNumber),
        "declined" | "not_interested" => Some(CallOutcome::Declined),
        "technical_failure" | "technical" => Some(CallOutcome::TechnicalFailure),
        _ => None,
    }
}

fn default_result_for(outcome: CallOutcome) -> CallResult {
    match outcome {
        CallOutcome::Success => CallResult::Pass,
        CallOutcome::Partial | CallOutcome::NoResponse | CallOutcome::CallbackRequested => CallResult::Inconclusive,
        CallOutcome::WrongNumber | CallOutcome::Declined | CallOutcome::TechnicalFailure => CallResult::Fail,
    }
}

// --- Appointment date/time resolution ---

/// Resolve natural-language appointment date/time strings to an absolute
/// timestamp relative to `reference` (the call's end time). Returns `None`
/// when the date can't be interpreted; the raw strings are persisted either
/// way.
pub fn resolve_appointment(
    date_raw: Option<&str>,
    time_raw: Option<&str>,
    reference: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let date = parse_relative_date(date_raw?, reference)?;
    let time = time_raw
        .and_then(parse_time_of_day)
        .unwrap_or_else(|| NaiveTime::from_hms_opt(9, 0, 0).unwrap());
    Some(date.and_time(time).and_utc())
}

fn parse_relative_date(raw: &str, reference: DateTime<Utc>) -> Option<NaiveDate> {
    let today = reference.date_naive();
    let cleaned = raw.trim().to_ascii_lowercase();

    match cleaned.as_str() {
        "today" => return Some(today),
        "tomorrow" => return Some(today + Duration::days(1)),
        "day after tomorrow" => return Some(today + Duration::days(2)),
        _ => {}
    }

    // ISO dates first; they're unambiguous.
    if let Ok(date) = NaiveDate::parse_from_str(&cleaned, "%Y-%m-%d") {
        return Some(date);
    }

    // Weekday names, optionally prefixed with "this"/"next". Always the next
    // occurrence strictly after today; "next Monday" said on a Monday means a
    // week out either way.
    if let Some(weekday) = find_weekday(&cleaned) {
        let days_ahead = (weekday.num_days_from_monday() as i64
            - today.weekday().num_days_from_monday() as i64)
            .rem_euclid(7);
        let days_ahead = if days_ahead == 0 { 7 } else { days_ahead };
        return Some(today + Duration::days(days_ahead));
    }

    // "6/5" or "6/5/2026"
    if let Some(date) = parse_slash_date(&cleaned, today) {
        return Some(date);
    }

    // "June 5", "June 5th", "5 June"
    parse_month_name_date(&cleaned, today)
}

fn find_weekday(text: &str) -> Option<Weekday> {
    const NAMES: [(&str, Weekday); 7] = [
        ("monday", Weekday::Mon),
        ("tuesday", Weekday::Tue),
        ("wednesday", Weekday::Wed),
        ("thursday", Weekday::Thu),
        ("friday", Weekday::Fri),
        ("saturday", Weekday::Sat),
        ("sunday", Weekday::Sun),
    ];
    NAMES
        .iter()
        .find(|(name, _)| text.contains(name))
        .map(|(_, weekday)| *weekday)
}

fn parse_slash_date(text: &str, today: NaiveDate) -> Option<NaiveDate> {
    let parts: Vec<&str> = text.split('/').collect();
    if parts.len() != 2 && parts.len() != 3 {
        return None;
    }
    let month: u32 = parts[0].trim().parse().ok()?;
    let day: u32 = parts[1].trim().parse().ok()?;
    let year: i32 = match parts.get(2) {
        Some(y) => y.trim().parse().ok()?,
        None => today.year(),
    };
    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    // A month/day with no year that already passed means next year.
    if parts.len() == 2 && date < today {
        return NaiveDate::from_ymd_opt(year + 1, month, day);
    }
    Some(date)
}

fn parse_month_name_date(text: &str, today: NaiveDate) -> Option<NaiveDate> {
    const MONTHS: [&str; 12] = [
        "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
    ];
    let month = MONTHS
        .iter()
        .position(|prefix| text.contains(prefix))
        .map(|i| i as u32 + 1)?;

    // First standalone number in the string is the day of month.
    let day: u32 = text
        .split(|c: char| !c.is_ascii_digit())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse().ok())
        .find(|d| (1..=31).contains(d))?;

    let date = NaiveDate::from_ymd_opt(today.year(), month, day)?;
    if date < today {
        return NaiveDate::from_ymd_opt(today.year() + 1, month, day);
    }
    Some(date)
}

fn parse_time_of_day(raw: &str) -> Option<NaiveTime> {
    let cleaned = raw.trim().to_ascii_lowercase();

    match cleaned.as_str() {
        "noon" | "midday" => return NaiveTime::from_hms_opt(12, 0, 0),
        "midnight" => return NaiveTime::from_hms_opt(0, 0, 0),
        "morning" => return NaiveTime::from_hms_opt(9, 0, 0),
        "afternoon" => return NaiveTime::from_hms_opt(14, 0, 0),
        "evening" => return NaiveTime::from_hms_opt(18, 0, 0),
        _ => {}
    }

    let is_pm = cleaned.contains("pm") || cleaned.contains("p.m");
    let is_am = cleaned.contains("am") || cleaned.contains("a.m");

    let digits: Vec<u32> = cleaned
        .split(|c: char| !c.is_ascii_digit())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse().ok())
        .collect();

    let (hour, minute) = match digits.as_slice() {
        [hour] => (*hour, 0),
        [hour, minute, ..] => (*hour, *minute),
        [] => return None,
    };

    let hour = if is_pm && hour < 12 {
        hour + 12
    } else if is_am && hour == 12 {
        0
    } else {
        hour
    };

    NaiveTime::from_hms_opt(hour, minute, 0)
}
