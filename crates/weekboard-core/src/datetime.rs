use std::fs;
use std::path::{
  Path,
  PathBuf
};

use chrono::{
  DateTime,
  Duration,
  LocalResult,
  NaiveDate,
  NaiveDateTime,
  TimeZone,
  Utc
};
use chrono_tz::Tz;
use serde::Deserialize;

const TIMEZONE_CONFIG_FILE: &str =
  "weekboard-time.toml";
const TIMEZONE_ENV_VAR: &str =
  "WEEKBOARD_TIMEZONE";
const TIMEZONE_CONFIG_ENV_VAR: &str =
  "WEEKBOARD_TIME_CONFIG";

/// Width of each side of the window
/// around the reference instant.
pub const WINDOW_DAYS: i64 = 7;

#[derive(
  Debug,
  Clone,
  PartialEq,
  Eq,
  thiserror::Error
)]
pub enum DateParseError {
  #[error(
    "unrecognized deadline text: \
     {0:?}"
  )]
  Unrecognized(String),
  #[error(
    "local time {text:?} does not \
     exist in {zone}"
  )]
  NonexistentLocalTime {
    text: String,
    zone: String
  }
}

/// Boundaries of the categorization
/// window. Pure value; recompute
/// whenever `now` should advance.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash,
)]
pub struct DateRange {
  pub now:        DateTime<Utc>,
  pub week_start: DateTime<Utc>,
  pub week_end:   DateTime<Utc>
}

#[must_use]
pub fn compute_date_range(
  reference: DateTime<Utc>
) -> DateRange {
  let window =
    Duration::days(WINDOW_DAYS);
  DateRange {
    now:        reference,
    week_start: reference - window,
    week_end:   reference + window
  }
}

impl DateRange {
  #[must_use]
  pub fn current() -> Self {
    compute_date_range(Utc::now())
  }
}

#[derive(Debug, Deserialize)]
struct TimezoneConfig {
  timezone: Option<String>,
  time:     Option<TimezoneSection>
}

#[derive(Debug, Deserialize)]
struct TimezoneSection {
  timezone: Option<String>
}

/// Zone used for deadline texts that
/// carry no offset. Resolution order:
/// env var, TOML time config, rc
/// value, UTC.
pub fn resolve_timezone(
  configured: Option<&str>
) -> Tz {
  if let Ok(raw) =
    std::env::var(TIMEZONE_ENV_VAR)
    && let Some(tz) =
      parse_timezone(&raw, TIMEZONE_ENV_VAR)
  {
    return tz;
  }

  if let Some(path) =
    timezone_config_path()
    && let Some(tz) =
      load_timezone_from_file(&path)
  {
    return tz;
  }

  if let Some(raw) = configured
    && let Some(tz) =
      parse_timezone(raw, "rc:time.zone")
  {
    return tz;
  }

  tracing::debug!(
    "no timezone configured; \
     interpreting deadlines as UTC"
  );
  chrono_tz::UTC
}

fn timezone_config_path()
-> Option<PathBuf> {
  if let Ok(raw) = std::env::var(
    TIMEZONE_CONFIG_ENV_VAR
  ) {
    let trimmed = raw.trim();
    if !trimmed.is_empty() {
      return Some(PathBuf::from(
        trimmed
      ));
    }
  }

  std::env::current_dir().ok().map(
    |dir| {
      dir.join(TIMEZONE_CONFIG_FILE)
    }
  )
}

fn load_timezone_from_file(
  path: &Path
) -> Option<Tz> {
  if !path.exists() {
    tracing::trace!(
      file = %path.display(),
      "timezone config file not found"
    );
    return None;
  }

  let raw = match fs::read_to_string(
    path
  ) {
    | Ok(raw) => raw,
    | Err(err) => {
      tracing::error!(
        file = %path.display(),
        error = %err,
        "failed reading timezone config file"
      );
      return None;
    }
  };

  let parsed = match toml::from_str::<
    TimezoneConfig
  >(&raw)
  {
    | Ok(parsed) => parsed,
    | Err(err) => {
      tracing::error!(
        file = %path.display(),
        error = %err,
        "failed parsing timezone config file"
      );
      return None;
    }
  };

  let timezone =
    parsed.timezone.or_else(|| {
      parsed.time.and_then(|section| {
        section.timezone
      })
    });
  let Some(timezone) = timezone else {
    tracing::warn!(
      file = %path.display(),
      "timezone config had no timezone field"
    );
    return None;
  };

  parse_timezone(
    timezone.as_str(),
    &format!("file:{}", path.display())
  )
}

fn parse_timezone(
  raw: &str,
  source: &str
) -> Option<Tz> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    tracing::warn!(
      source,
      "timezone source was empty"
    );
    return None;
  }

  match trimmed.parse::<Tz>() {
    | Ok(tz) => {
      tracing::info!(
        source,
        timezone = %trimmed,
        "configured deadline timezone"
      );
      Some(tz)
    }
    | Err(err) => {
      tracing::error!(
        source,
        timezone = %trimmed,
        error = %err,
        "failed to parse timezone id"
      );
      None
    }
  }
}

fn to_utc_from_local(
  local_naive: NaiveDateTime,
  zone: &Tz,
  text: &str
) -> Result<DateTime<Utc>, DateParseError>
{
  match zone
    .from_local_datetime(&local_naive)
  {
    | LocalResult::Single(local_dt) => {
      Ok(local_dt.with_timezone(&Utc))
    }
    | LocalResult::Ambiguous(
      first,
      second
    ) => {
      tracing::warn!(
        text,
        first = %first,
        second = %second,
        "ambiguous local datetime; using earliest"
      );
      let chosen = if first <= second {
        first
      } else {
        second
      };
      Ok(chosen.with_timezone(&Utc))
    }
    | LocalResult::None => {
      Err(
        DateParseError::NonexistentLocalTime {
          text: text.to_string(),
          zone: zone.name().to_string()
        }
      )
    }
  }
}

/// Parses the text of a deadline
/// column into an absolute instant.
/// Offset-less forms are read as wall
/// clock time in `zone`.
#[tracing::instrument(level = "trace", skip(zone))]
pub fn parse_deadline(
  text: &str,
  zone: &Tz
) -> Result<DateTime<Utc>, DateParseError>
{
  let token = text.trim();

  if let Ok(ndt) =
    NaiveDateTime::parse_from_str(
      token,
      "%Y%m%dT%H%M%SZ"
    )
  {
    return Ok(DateTime::<Utc>::from_naive_utc_and_offset(ndt, Utc));
  }

  if let Ok(dt) =
    DateTime::parse_from_rfc3339(token)
  {
    return Ok(dt.with_timezone(&Utc));
  }

  if let Ok(date) =
    NaiveDate::parse_from_str(
      token, "%Y-%m-%d"
    )
  {
    let Some(midnight) =
      date.and_hms_opt(0, 0, 0)
    else {
      return Err(
        DateParseError::Unrecognized(
          text.to_string()
        )
      );
    };
    return to_utc_from_local(
      midnight, zone, token
    );
  }

  for fmt in [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M"
  ] {
    if let Ok(ndt) =
      NaiveDateTime::parse_from_str(
        token, fmt
      )
    {
      return to_utc_from_local(
        ndt, zone, token
      );
    }
  }

  Err(DateParseError::Unrecognized(
    text.to_string()
  ))
}

/// Parses a reference instant given on
/// the command line.
pub fn parse_reference_instant(
  input: &str,
  zone: &Tz
) -> anyhow::Result<DateTime<Utc>> {
  let token = input.trim();
  if token.eq_ignore_ascii_case("now") {
    return Ok(Utc::now());
  }
  parse_deadline(token, zone).map_err(
    |err| {
      anyhow::anyhow!(
        "invalid reference instant: \
         {err}"
      )
    }
  )
}

#[must_use]
pub fn format_local(
  dt: DateTime<Utc>,
  zone: &Tz
) -> String {
  dt.with_timezone(zone)
    .format("%Y-%m-%d %H:%M %Z")
    .to_string()
}

#[cfg(test)]
mod tests {
  use chrono::{
    TimeZone,
    Utc
  };

  use super::{
    DateParseError,
    DateRange,
    compute_date_range,
    parse_deadline
  };

  #[test]
  fn current_range_brackets_the_clock()
  {
    let before = Utc::now();
    let range = DateRange::current();
    let after = Utc::now();
    assert!(
      before <= range.now
        && range.now <= after
    );
    assert_eq!(
      range.week_end - range.week_start,
      chrono::Duration::days(14)
    );
  }

  #[test]
  fn range_spans_seven_days_each_side()
  {
    let now = Utc
      .with_ymd_and_hms(
        2024, 6, 15, 0, 0, 0
      )
      .single()
      .expect("valid now");
    let range = compute_date_range(now);
    assert_eq!(range.now, now);
    assert_eq!(
      range.week_start,
      Utc
        .with_ymd_and_hms(
          2024, 6, 8, 0, 0, 0
        )
        .single()
        .expect("valid start")
    );
    assert_eq!(
      range.week_end,
      Utc
        .with_ymd_and_hms(
          2024, 6, 22, 0, 0, 0
        )
        .single()
        .expect("valid end")
    );
  }

  #[test]
  fn range_is_exact_hours_across_dst()
  {
    let now = Utc
      .with_ymd_and_hms(
        2024, 3, 12, 12, 0, 0
      )
      .single()
      .expect("valid now");
    let range = compute_date_range(now);
    assert_eq!(
      (range.now - range.week_start)
        .num_hours(),
      168
    );
    assert_eq!(
      (range.week_end - range.now)
        .num_hours(),
      168
    );
  }

  #[test]
  fn plain_date_is_midnight_in_zone() {
    let parsed = parse_deadline(
      "2024-06-10",
      &chrono_tz::America::New_York
    )
    .expect("parse date");
    assert_eq!(
      parsed,
      Utc
        .with_ymd_and_hms(
          2024, 6, 10, 4, 0, 0
        )
        .single()
        .expect("valid instant")
    );
  }

  #[test]
  fn date_with_time_and_offset_forms() {
    let utc = chrono_tz::UTC;
    let expected = Utc
      .with_ymd_and_hms(
        2024, 6, 10, 14, 30, 0
      )
      .single()
      .expect("valid instant");
    for text in [
      "2024-06-10 14:30",
      "2024-06-10T14:30",
      "2024-06-10 14:30:00",
      "2024-06-10T16:30:00+02:00",
      "20240610T143000Z"
    ] {
      assert_eq!(
        parse_deadline(text, &utc)
          .expect("parse"),
        expected,
        "{text}"
      );
    }
  }

  #[test]
  fn rejects_garbage() {
    let err = parse_deadline(
      "next tuesday-ish",
      &chrono_tz::UTC
    )
    .expect_err("should fail");
    assert!(matches!(
      err,
      DateParseError::Unrecognized(_)
    ));
  }

  #[test]
  fn nonexistent_local_time_is_an_error()
  {
    let err = parse_deadline(
      "2024-03-10 02:30",
      &chrono_tz::America::New_York
    )
    .expect_err("dst gap");
    assert!(matches!(
      err,
      DateParseError::NonexistentLocalTime { .. }
    ));
  }
}
