//! Daily race slots and the wall-clock window math.
//!
//! Six fixed slots per day; each is pending until simulated, then settled.
//! The atomic claim itself lives in storage (unique key on the result row);
//! this module only answers which slots are live, next, or elapsed.

use anyhow::{bail, Context, Result};
use chrono::{Days, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};

use crate::config::ScheduleConfig;

/// One scheduled race instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaceSlot {
    pub date: NaiveDate,
    pub index: u8,
    pub name: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

/// The fixed daily schedule.
#[derive(Debug, Clone)]
pub struct Schedule {
    start_times: Vec<NaiveTime>,
    names: Vec<String>,
    duration: TimeDelta,
}

impl Schedule {
    pub fn from_config(cfg: &ScheduleConfig) -> Result<Self> {
        if cfg.start_times.is_empty() {
            bail!("schedule has no slots");
        }
        if cfg.slot_names.len() != cfg.start_times.len() {
            bail!(
                "schedule has {} slot names for {} start times",
                cfg.slot_names.len(),
                cfg.start_times.len()
            );
        }

        let mut start_times = Vec::with_capacity(cfg.start_times.len());
        for raw in &cfg.start_times {
            let t = NaiveTime::parse_from_str(raw, "%H:%M")
                .with_context(|| format!("bad slot start time: {}", raw))?;
            start_times.push(t);
        }

        let mut sorted = start_times.clone();
        sorted.sort();
        if sorted != start_times {
            bail!("slot start times must be ascending");
        }

        Ok(Self {
            start_times,
            names: cfg.slot_names.clone(),
            duration: TimeDelta::seconds(cfg.duration_secs as i64),
        })
    }

    pub fn slots_per_day(&self) -> u8 {
        self.start_times.len() as u8
    }

    /// The slot at (date, index), if the index is on the schedule.
    pub fn slot(&self, date: NaiveDate, index: u8) -> Option<RaceSlot> {
        let start_time = self.start_times.get(index as usize)?;
        let start = date.and_time(*start_time);
        Some(RaceSlot {
            date,
            index,
            name: self.names[index as usize].clone(),
            start,
            end: start + self.duration,
        })
    }

    /// All slots on a date, in index order.
    pub fn slots_on(&self, date: NaiveDate) -> Vec<RaceSlot> {
        (0..self.slots_per_day())
            .filter_map(|i| self.slot(date, i))
            .collect()
    }

    /// The slot currently running, if any.
    pub fn live_at(&self, now: NaiveDateTime) -> Option<RaceSlot> {
        self.slots_on(now.date())
            .into_iter()
            .find(|s| s.start <= now && now < s.end)
    }

    /// The next slot at or after `now` (possibly tomorrow's first).
    pub fn next_after(&self, now: NaiveDateTime) -> RaceSlot {
        if let Some(slot) = self
            .slots_on(now.date())
            .into_iter()
            .find(|s| s.start > now)
        {
            return slot;
        }
        let tomorrow = now.date() + Days::new(1);
        self.slot(tomorrow, 0)
            .expect("schedule has at least one slot")
    }

    /// Slots whose end time has elapsed, scanning the last `lookback_days`
    /// days up to `now`. The caller filters out slots that already have a
    /// result.
    pub fn elapsed_slots(&self, now: NaiveDateTime, lookback_days: u32) -> Vec<RaceSlot> {
        let mut slots = Vec::new();
        for back in (0..=lookback_days as u64).rev() {
            let Some(date) = now.date().checked_sub_days(Days::new(back)) else {
                continue;
            };
            for slot in self.slots_on(date) {
                if slot.end <= now {
                    slots.push(slot);
                }
            }
        }
        slots
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule() -> Schedule {
        Schedule::from_config(&ScheduleConfig::default()).unwrap()
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()
    }

    fn at(h: u32, m: u32) -> NaiveDateTime {
        date().and_time(NaiveTime::from_hms_opt(h, m, 0).unwrap())
    }

    #[test]
    fn test_six_slots_per_day() {
        let s = schedule();
        assert_eq!(s.slots_per_day(), 6);
        let slots = s.slots_on(date());
        assert_eq!(slots.len(), 6);
        for (i, slot) in slots.iter().enumerate() {
            assert_eq!(slot.index as usize, i);
            assert_eq!(slot.end - slot.start, TimeDelta::seconds(60));
        }
    }

    #[test]
    fn test_slot_index_out_of_range() {
        assert!(schedule().slot(date(), 6).is_none());
    }

    #[test]
    fn test_live_slot_window() {
        let s = schedule();
        // Default first slot starts at 10:00 and runs one minute.
        assert_eq!(s.live_at(at(10, 0)).unwrap().index, 0);
        assert!(s.live_at(at(10, 1)).is_none());
        assert!(s.live_at(at(9, 59)).is_none());
    }

    #[test]
    fn test_next_slot_rolls_to_tomorrow() {
        let s = schedule();
        let next = s.next_after(at(10, 30));
        assert_eq!(next.index, 1);
        assert_eq!(next.date, date());

        let next = s.next_after(at(23, 0));
        assert_eq!(next.index, 0);
        assert_eq!(next.date, date() + Days::new(1));
    }

    #[test]
    fn test_elapsed_slots() {
        let s = schedule();
        // At 14:30 the 10:00, 12:00 and 14:00 slots have ended today.
        let elapsed = s.elapsed_slots(at(14, 30), 0);
        assert_eq!(
            elapsed.iter().map(|x| x.index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );

        // With one day of lookback, all six of yesterday's come first.
        let elapsed = s.elapsed_slots(at(14, 30), 1);
        assert_eq!(elapsed.len(), 9);
        assert_eq!(elapsed[0].date, date() - Days::new(1));
        assert!(elapsed.windows(2).all(|p| p[0].end <= p[1].end));
    }

    #[test]
    fn test_slot_not_elapsed_while_running() {
        let s = schedule();
        let elapsed = s.elapsed_slots(at(10, 0), 0);
        assert!(elapsed.is_empty());
        let elapsed = s.elapsed_slots(at(10, 1), 0);
        assert_eq!(elapsed.len(), 1);
    }

    #[test]
    fn test_bad_config_rejected() {
        let mut cfg = ScheduleConfig::default();
        cfg.start_times[0] = "25:99".to_string();
        assert!(Schedule::from_config(&cfg).is_err());

        let mut cfg = ScheduleConfig::default();
        cfg.slot_names.pop();
        assert!(Schedule::from_config(&cfg).is_err());

        let mut cfg = ScheduleConfig::default();
        cfg.start_times.swap(0, 1);
        assert!(Schedule::from_config(&cfg).is_err());
    }
}
