use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono_tz::Tz;
use tracing::{
  debug,
  warn
};

use crate::datetime::{
  DateParseError,
  DateRange,
  parse_deadline
};
use crate::task::Task;

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  PartialOrd,
  Ord
)]
pub enum Bucket {
  Past,
  Current,
  Upcoming,
  Undated
}

impl Bucket {
  pub const ALL: [Bucket; 4] = [
    Bucket::Past,
    Bucket::Current,
    Bucket::Upcoming,
    Bucket::Undated
  ];

  #[must_use]
  pub fn title(
    self
  ) -> &'static str {
    match self {
      | Self::Past => "Past Weeks",
      | Self::Current => "This Week",
      | Self::Upcoming => {
        "Upcoming Weeks"
      }
      | Self::Undated => {
        "Without a Date"
      }
    }
  }

  #[must_use]
  pub fn key(self) -> &'static str {
    match self {
      | Self::Past => "past",
      | Self::Current => "current",
      | Self::Upcoming => "upcoming",
      | Self::Undated => "undated"
    }
  }
}

impl fmt::Display for Bucket {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    f.write_str(self.key())
  }
}

impl FromStr for Bucket {
  type Err = anyhow::Error;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    match s
      .trim()
      .to_ascii_lowercase()
      .as_str()
    {
      | "past" => Ok(Self::Past),
      | "current" | "this-week"
      | "week" => Ok(Self::Current),
      | "upcoming" | "next" => {
        Ok(Self::Upcoming)
      }
      | "undated" | "none" => {
        Ok(Self::Undated)
      }
      | other => {
        Err(anyhow!(
          "unknown bucket: {other}"
        ))
      }
    }
  }
}

/// Four disjoint, order-preserving
/// groups. Every input task lands in
/// exactly one of them.
#[derive(
  Debug, Clone, Default, PartialEq, Eq,
)]
pub struct CategorizedResult {
  pub past:     Vec<Task>,
  pub current:  Vec<Task>,
  pub upcoming: Vec<Task>,
  pub undated:  Vec<Task>
}

impl CategorizedResult {
  #[must_use]
  pub fn bucket(
    &self,
    bucket: Bucket
  ) -> &[Task] {
    match bucket {
      | Bucket::Past => &self.past,
      | Bucket::Current => {
        &self.current
      }
      | Bucket::Upcoming => {
        &self.upcoming
      }
      | Bucket::Undated => {
        &self.undated
      }
    }
  }

  fn bucket_mut(
    &mut self,
    bucket: Bucket
  ) -> &mut Vec<Task> {
    match bucket {
      | Bucket::Past => &mut self.past,
      | Bucket::Current => {
        &mut self.current
      }
      | Bucket::Upcoming => {
        &mut self.upcoming
      }
      | Bucket::Undated => {
        &mut self.undated
      }
    }
  }

  /// Buckets in display order.
  pub fn iter(
    &self
  ) -> impl Iterator<Item = (Bucket, &[Task])>
  {
    Bucket::ALL
      .into_iter()
      .map(|b| (b, self.bucket(b)))
  }

  #[must_use]
  pub fn total(&self) -> usize {
    self.past.len()
      + self.current.len()
      + self.upcoming.len()
      + self.undated.len()
  }
}

/// Bucket for a single task. A missing
/// or blank deadline is `Undated`;
/// unparseable text is an error the
/// caller decides how to place.
pub fn classify_task(
  task: &Task,
  range: &DateRange,
  zone: &Tz
) -> Result<Bucket, DateParseError> {
  let Some(text) = task.deadline_text()
  else {
    return Ok(Bucket::Undated);
  };

  let deadline =
    parse_deadline(text, zone)?;

  let bucket = if deadline
    < range.week_start
  {
    Bucket::Past
  } else if deadline <= range.now {
    Bucket::Current
  } else {
    // Past `week_end` still counts as
    // upcoming so no dated task is lost.
    Bucket::Upcoming
  };
  Ok(bucket)
}

#[tracing::instrument(skip_all, fields(count = tasks.len(), now = %range.now))]
pub fn categorize(
  tasks: &[Task],
  range: &DateRange,
  zone: &Tz
) -> CategorizedResult {
  let mut out =
    CategorizedResult::default();

  for task in tasks {
    let bucket = match classify_task(
      task, range, zone
    ) {
      | Ok(bucket) => bucket,
      | Err(err) => {
        warn!(
          task_id = %task.id,
          task = %task.name,
          error = %err,
          "unparseable deadline; treating as undated"
        );
        Bucket::Undated
      }
    };
    out
      .bucket_mut(bucket)
      .push(task.clone());
  }

  debug!(
    past = out.past.len(),
    current = out.current.len(),
    upcoming = out.upcoming.len(),
    undated = out.undated.len(),
    "categorized tasks"
  );
  out
}

/// Holds one categorization, reused
/// until the task revision or the
/// range changes.
#[derive(Debug, Default)]
pub struct CategorizeMemo {
  key:    Option<(u64, DateRange)>,
  result: CategorizedResult,
  misses: u64
}

impl CategorizeMemo {
  pub fn get(
    &mut self,
    revision: u64,
    tasks: &[Task],
    range: &DateRange,
    zone: &Tz
  ) -> &CategorizedResult {
    let key = (revision, *range);
    if self.key != Some(key) {
      self.result =
        categorize(tasks, range, zone);
      self.key = Some(key);
      self.misses += 1;
    }
    &self.result
  }

  /// Number of recomputations so far.
  #[must_use]
  pub fn misses(&self) -> u64 {
    self.misses
  }
}
