//! Working-day calendars and date arithmetic.

use chrono::{Datelike, Days, NaiveDate};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::models::{CalendarSpec, ProjectSnapshot};

/// Monday through Friday.
pub const DEFAULT_WORK_DAYS_MASK: u8 = 0b001_1111;
pub const DEFAULT_HOURS_PER_DAY: f64 = 8.0;
pub const DEFAULT_CALENDAR_ID: &str = "default";

/// Upper bound on how far any single date walk may scan (about 20 years).
const MAX_SCAN_DAYS: u32 = 7305;

/// A single working calendar.
///
/// Exception dates are never working. Overtime dates are always working and
/// carry their own hours. Every other date is decided by the weekday mask.
#[derive(Clone, Debug, PartialEq)]
pub struct WorkCalendar {
    pub id: String,
    work_days_mask: u8,
    hours_per_day: f64,
    exceptions: FxHashSet<NaiveDate>,
    overtime: FxHashMap<NaiveDate, f64>,
}

impl Default for WorkCalendar {
    fn default() -> Self {
        Self::standard(DEFAULT_HOURS_PER_DAY)
    }
}

impl WorkCalendar {
    pub fn new(id: impl Into<String>, work_days_mask: u8, hours_per_day: f64) -> Self {
        Self {
            id: id.into(),
            work_days_mask,
            hours_per_day,
            exceptions: FxHashSet::default(),
            overtime: FxHashMap::default(),
        }
    }

    /// Monday to Friday with no holidays.
    pub fn standard(hours_per_day: f64) -> Self {
        Self::new(DEFAULT_CALENDAR_ID, DEFAULT_WORK_DAYS_MASK, hours_per_day)
    }

    pub fn from_spec(spec: &CalendarSpec, fallback_hours: f64) -> Self {
        let mut calendar = Self::new(
            spec.id.clone(),
            spec.work_days_mask,
            spec.hours_per_day.unwrap_or(fallback_hours),
        );
        calendar.exceptions.extend(spec.exceptions.iter().copied());
        for day in &spec.overtime {
            calendar.overtime.insert(day.date, day.hours);
        }
        calendar
    }

    pub fn with_exception(mut self, date: NaiveDate) -> Self {
        self.exceptions.insert(date);
        self
    }

    pub fn with_overtime(mut self, date: NaiveDate, hours: f64) -> Self {
        self.overtime.insert(date, hours);
        self
    }

    pub fn hours_per_day(&self) -> f64 {
        self.hours_per_day
    }

    pub fn is_working_day(&self, date: NaiveDate) -> bool {
        if self.exceptions.contains(&date) {
            return false;
        }
        if self.overtime.contains_key(&date) {
            return true;
        }
        self.work_days_mask & (1 << date.weekday().num_days_from_monday()) != 0
    }

    pub fn working_hours(&self, date: NaiveDate) -> f64 {
        if self.exceptions.contains(&date) {
            return 0.0;
        }
        if let Some(&hours) = self.overtime.get(&date) {
            return hours;
        }
        if self.is_working_day(date) {
            self.hours_per_day
        } else {
            0.0
        }
    }

    /// First working day on or after `date`.
    pub fn next_work_day_on_or_after(&self, date: NaiveDate) -> NaiveDate {
        let mut current = date;
        for _ in 0..MAX_SCAN_DAYS {
            if self.is_working_day(current) {
                return current;
            }
            current = succ(current);
        }
        date
    }

    /// Step forward `days` working days. Negative counts step backward.
    pub fn add_work_days(&self, start: NaiveDate, days: i64) -> NaiveDate {
        if days < 0 {
            return self.subtract_work_days(start, -days);
        }
        let mut current = start;
        let mut remaining = days;
        let mut scanned = 0;
        while remaining > 0 && scanned < MAX_SCAN_DAYS {
            current = succ(current);
            scanned += 1;
            if self.is_working_day(current) {
                remaining -= 1;
            }
        }
        current
    }

    /// Step backward `days` working days. Negative counts step forward.
    pub fn subtract_work_days(&self, end: NaiveDate, days: i64) -> NaiveDate {
        if days < 0 {
            return self.add_work_days(end, -days);
        }
        let mut current = end;
        let mut remaining = days;
        let mut scanned = 0;
        while remaining > 0 && scanned < MAX_SCAN_DAYS {
            current = pred(current);
            scanned += 1;
            if self.is_working_day(current) {
                remaining -= 1;
            }
        }
        current
    }

    /// Working days in `(start, end]`, negated when `end` precedes `start`.
    pub fn work_days_between(&self, start: NaiveDate, end: NaiveDate) -> i64 {
        if end < start {
            return -self.work_days_between(end, start);
        }
        let mut count = 0;
        let mut current = start;
        while current < end {
            current = succ(current);
            if self.is_working_day(current) {
                count += 1;
            }
        }
        count
    }

    /// Working dates in `[start, end)`.
    pub fn work_dates(&self, start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
        let mut dates = Vec::new();
        let mut current = start;
        while current < end {
            if self.is_working_day(current) {
                dates.push(current);
            }
            current = succ(current);
        }
        dates
    }
}

fn succ(date: NaiveDate) -> NaiveDate {
    date.checked_add_days(Days::new(1)).unwrap_or(date)
}

fn pred(date: NaiveDate) -> NaiveDate {
    date.checked_sub_days(Days::new(1)).unwrap_or(date)
}

/// Named calendars of one project plus the project default.
///
/// Unknown calendar ids resolve to the default. The ids that needed that
/// fallback are collected once at construction and reported as warnings.
#[derive(Clone, Debug)]
pub struct CalendarSet {
    default: WorkCalendar,
    calendars: FxHashMap<String, WorkCalendar>,
    unknown_ids: Vec<String>,
}

impl CalendarSet {
    pub fn new(default: WorkCalendar) -> Self {
        Self {
            default,
            calendars: FxHashMap::default(),
            unknown_ids: Vec::new(),
        }
    }

    pub fn insert(&mut self, calendar: WorkCalendar) {
        self.calendars.insert(calendar.id.clone(), calendar);
    }

    pub fn from_snapshot(snapshot: &ProjectSnapshot) -> Self {
        let project_hours = snapshot.project.hours_per_day;
        let calendars: FxHashMap<String, WorkCalendar> = snapshot
            .calendars
            .iter()
            .map(|spec| (spec.id.clone(), WorkCalendar::from_spec(spec, project_hours)))
            .collect();

        let mut unknown_ids: Vec<String> = Vec::new();
        let mut note_unknown = |id: &str| {
            if !calendars.contains_key(id) && !unknown_ids.iter().any(|u| u == id) {
                tracing::warn!(calendar_id = id, "unknown calendar, using project default");
                unknown_ids.push(id.to_string());
            }
        };

        let default = match snapshot.project.default_calendar_id.as_deref() {
            Some(id) => {
                note_unknown(id);
                calendars.get(id).cloned()
            }
            None => None,
        }
        .unwrap_or_else(|| WorkCalendar::standard(project_hours));

        let referenced = snapshot
            .tasks
            .iter()
            .filter_map(|t| t.calendar_id.as_deref())
            .chain(snapshot.resources.iter().filter_map(|r| r.calendar_id.as_deref()));
        for id in referenced {
            note_unknown(id);
        }

        Self {
            default,
            calendars,
            unknown_ids,
        }
    }

    pub fn default_calendar(&self) -> &WorkCalendar {
        &self.default
    }

    pub fn resolve(&self, id: Option<&str>) -> &WorkCalendar {
        id.and_then(|id| self.calendars.get(id))
            .unwrap_or(&self.default)
    }

    pub fn working_hours(&self, calendar_id: Option<&str>, date: NaiveDate) -> f64 {
        self.resolve(calendar_id).working_hours(date)
    }

    pub fn is_working_day(&self, calendar_id: Option<&str>, date: NaiveDate) -> bool {
        self.resolve(calendar_id).is_working_day(date)
    }

    pub fn warnings(&self) -> Vec<String> {
        self.unknown_ids
            .iter()
            .map(|id| format!("Calendar {} not found; using project default calendar", id))
            .collect()
    }
}
