use std::time::{SystemTime, UNIX_EPOCH};

const SECS_PER_DAY: u64 = 86_400;

/// A broken-down UTC timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UtcTime {
	pub year: u64,
	pub month: u8,
	pub day: u8,
	pub hour: u8,
	pub minute: u8,
	pub second: u8,
}

fn is_leap_year(year: u64) -> bool {
	(year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

fn days_in_month(year: u64, month: u8) -> u64 {
	match month {
		2 if is_leap_year(year) => 29,
		2 => 28,
		4 | 6 | 9 | 11 => 30,
		_ => 31,
	}
}

impl UtcTime {
	/// Splits seconds since the Unix epoch into calendar fields.
	pub fn from_unix(secs: u64) -> Self {
		let mut remaining_days = secs / SECS_PER_DAY;
		let clock = secs % SECS_PER_DAY;

		let mut year = 1970;
		loop {
			let year_len = if is_leap_year(year) { 366 } else { 365 };
			if remaining_days < year_len {
				break;
			}
			remaining_days -= year_len;
			year += 1;
		}

		let mut month = 1;
		while remaining_days >= days_in_month(year, month) {
			remaining_days -= days_in_month(year, month);
			month += 1;
		}

		UtcTime {
			year,
			month,
			day: remaining_days as u8 + 1,
			hour: (clock / 3600) as u8,
			minute: (clock % 3600 / 60) as u8,
			second: (clock % 60) as u8,
		}
	}
}

/// `2026-02-14 09:47:05 +0000 UTC`
pub fn format_utc(secs: u64) -> String {
	let t = UtcTime::from_unix(secs);
	format!(
		"{:04}-{:02}-{:02} {:02}:{:02}:{:02} +0000 UTC",
		t.year, t.month, t.day, t.hour, t.minute, t.second
	)
}

pub fn now_utc() -> String {
	let secs = SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map(|d| d.as_secs())
		.unwrap_or(0);
	format_utc(secs)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn ymd(secs: u64) -> (u64, u8, u8) {
		let t = UtcTime::from_unix(secs);
		(t.year, t.month, t.day)
	}

	#[test]
	fn splits_epoch_seconds() {
		assert_eq!(
			UtcTime::from_unix(1771027200),
			UtcTime {
				year: 2026,
				month: 2,
				day: 14,
				hour: 0,
				minute: 0,
				second: 0
			}
		);
		assert_eq!(ymd(0), (1970, 1, 1));
	}

	#[test]
	fn leap_days() {
		// 2024-02-29 and 2000-02-29
		assert_eq!(ymd(1709164800), (2024, 2, 29));
		assert_eq!(ymd(951782400), (2000, 2, 29));
		// 2100 is not a leap year
		assert_eq!(ymd(4107542400), (2100, 3, 1));
	}

	#[test]
	fn formats_as_utc() {
		assert_eq!(format_utc(1771062425), "2026-02-14 09:47:05 +0000 UTC");
		assert_eq!(format_utc(1704067199), "2023-12-31 23:59:59 +0000 UTC");
	}
}
