use anyhow::{
  Context,
  anyhow
};
use chrono::{
  DateTime,
  Duration,
  LocalResult,
  NaiveDate,
  NaiveDateTime,
  SecondsFormat,
  TimeZone,
  Utc
};
use chrono_tz::Tz;

const DISPLAY_FORMAT: &str =
  "%Y-%m-%d %H:%M";

const NAIVE_DATETIME_FORMATS: &[&str] = &[
  "%Y-%m-%d %H:%M:%S",
  "%Y-%m-%d %H:%M",
  "%Y-%m-%dT%H:%M:%S",
  "%Y-%m-%dT%H:%M:%S%.f",
  "%Y-%m-%dT%H:%M"
];

// ISO dates first; `%m/%d/%Y` is what
// the creation datepicker emits.
const NAIVE_DATE_FORMATS: &[&str] =
  &["%Y-%m-%d", "%m/%d/%Y"];

pub fn parse_timezone(
  raw: &str
) -> anyhow::Result<Tz> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    return Ok(chrono_tz::UTC);
  }

  trimmed.parse::<Tz>().map_err(|err| {
    anyhow!(
      "invalid timezone `{trimmed}`: \
       {err}"
    )
  })
}

fn to_utc_from_local(
  local_naive: NaiveDateTime,
  tz: Tz,
  context: &str
) -> anyhow::Result<DateTime<Utc>> {
  match tz.from_local_datetime(&local_naive)
  {
    | LocalResult::Single(local_dt) => {
      Ok(local_dt.with_timezone(&Utc))
    }
    | LocalResult::Ambiguous(
      first,
      second
    ) => {
      tracing::warn!(
        context,
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
      Err(anyhow!(
        "local datetime does not \
         exist in timezone {tz}: \
         {context}"
      ))
    }
  }
}

fn start_of_day(
  date: NaiveDate,
  tz: Tz,
  context: &str
) -> anyhow::Result<DateTime<Utc>> {
  let midnight = date
    .and_hms_opt(0, 0, 0)
    .ok_or_else(|| {
      anyhow!(
        "failed to construct \
         midnight for {context}"
      )
    })?;
  to_utc_from_local(
    midnight, tz, context
  )
}

/// Parses a due date typed by a user.
///
/// Accepts the keywords `now`, `today`,
/// `tomorrow` and `yesterday`, RFC 3339
/// timestamps, and naive dates or
/// datetimes read in `tz`. Blank input is
/// an error; callers decide what an
/// omitted date means.
#[tracing::instrument(skip(now, tz), fields(input = input))]
pub fn parse_due(
  input: &str,
  now: DateTime<Utc>,
  tz: Tz
) -> anyhow::Result<DateTime<Utc>> {
  let token = input.trim();
  if token.is_empty() {
    return Err(anyhow!(
      "due date is empty"
    ));
  }

  let lower =
    token.to_ascii_lowercase();
  match lower.as_str() {
    | "now" => return Ok(now),
    | "today" => {
      let date = now
        .with_timezone(&tz)
        .date_naive();
      return start_of_day(
        date, tz, "today"
      );
    }
    | "tomorrow" => {
      let today =
        parse_due("today", now, tz)?;
      return Ok(
        today + Duration::days(1)
      );
    }
    | "yesterday" => {
      let today =
        parse_due("today", now, tz)?;
      return Ok(
        today - Duration::days(1)
      );
    }
    | _ => {}
  }

  if let Ok(parsed) =
    DateTime::parse_from_rfc3339(token)
  {
    return Ok(
      parsed.with_timezone(&Utc)
    );
  }

  for format in NAIVE_DATETIME_FORMATS {
    if let Ok(naive) =
      NaiveDateTime::parse_from_str(
        token, format
      )
    {
      return to_utc_from_local(
        naive, tz, token
      );
    }
  }

  for format in NAIVE_DATE_FORMATS {
    if let Ok(date) =
      NaiveDate::parse_from_str(
        token, format
      )
    {
      return start_of_day(
        date, tz, token
      );
    }
  }

  Err(anyhow!(
    "unrecognized date: {token}"
  ))
}

/// Serialized form of a date on the
/// persistence boundary.
#[must_use]
pub fn to_wire(
  dt: DateTime<Utc>
) -> String {
  dt.to_rfc3339_opts(
    SecondsFormat::Millis,
    true
  )
}

/// Reads a date coming back from the
/// persistence boundary. Naive values
/// are taken as UTC.
pub fn parse_wire(
  raw: &str
) -> anyhow::Result<DateTime<Utc>> {
  let trimmed = raw.trim();
  if let Ok(parsed) =
    DateTime::parse_from_rfc3339(
      trimmed
    )
  {
    return Ok(
      parsed.with_timezone(&Utc)
    );
  }

  let naive = NAIVE_DATETIME_FORMATS
    .iter()
    .find_map(|format| {
      NaiveDateTime::parse_from_str(
        trimmed, format
      )
      .ok()
    })
    .with_context(|| {
      format!(
        "invalid stored date: \
         {trimmed}"
      )
    })?;
  Ok(naive.and_utc())
}

#[must_use]
pub fn format_due(
  dt: DateTime<Utc>,
  tz: Tz
) -> String {
  dt.with_timezone(&tz)
    .format(DISPLAY_FORMAT)
    .to_string()
}

#[cfg(test)]
mod tests {
  use chrono::{
    TimeZone,
    Utc
  };

  use super::{
    format_due,
    parse_due,
    parse_timezone,
    parse_wire,
    to_wire
  };

  #[test]
  fn parses_datepicker_format() {
    let now = Utc
      .with_ymd_and_hms(
        2026, 2, 17, 12, 0, 0
      )
      .single()
      .expect("valid now");
    let parsed = parse_due(
      "03/14/2026",
      now,
      chrono_tz::UTC
    )
    .expect("parse datepicker date");
    assert_eq!(
      format_due(
        parsed,
        chrono_tz::UTC
      ),
      "2026-03-14 00:00"
    );
  }

  #[test]
  fn parses_tomorrow_in_timezone() {
    let tz = parse_timezone(
      "America/Mexico_City"
    )
    .expect("valid tz");
    let now = Utc
      .with_ymd_and_hms(
        2026, 2, 17, 23, 0, 0
      )
      .single()
      .expect("valid now");
    let parsed =
      parse_due("tomorrow", now, tz)
        .expect("parse tomorrow");
    assert_eq!(
      format_due(parsed, tz),
      "2026-02-18 00:00"
    );
  }

  #[test]
  fn rejects_malformed_and_blank_input() {
    let now = Utc::now();
    assert!(
      parse_due(
        "next blue moon",
        now,
        chrono_tz::UTC
      )
      .is_err()
    );
    assert!(
      parse_due(
        "   ",
        now,
        chrono_tz::UTC
      )
      .is_err()
    );
  }

  #[test]
  fn wire_dates_survive_the_parse_step()
  {
    let due = Utc
      .with_ymd_and_hms(
        2026, 5, 1, 8, 30, 0
      )
      .single()
      .expect("valid due");
    assert_eq!(
      parse_wire(&to_wire(due))
        .expect("parse wire"),
      due
    );
    assert_eq!(
      parse_wire("2026-05-01T08:30:00")
        .expect("parse naive wire"),
      due
    );
  }
}
