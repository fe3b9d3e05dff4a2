use std::fmt;
use std::str::FromStr;

/// How often a coprocess is relaunched after it exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartPolicy {
	Unlimited,
	Never,
	/// Set once the coprocess is being stopped. Never parsed from config.
	Terminating,
	/// Relaunch up to this many times after the first run.
	Limited(u64),
}

impl RestartPolicy {
	pub fn max_restarts(self) -> Option<u64> {
		match self {
			RestartPolicy::Unlimited => None,
			RestartPolicy::Never | RestartPolicy::Terminating => Some(0),
			RestartPolicy::Limited(n) => Some(n),
		}
	}

	/// Whether a process that has already been restarted `restarts` times
	/// should be launched again.
	pub fn allows_restart(self, restarts: u64) -> bool {
		self.max_restarts().map_or(true, |max| restarts < max)
	}
}

impl FromStr for RestartPolicy {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"unlimited" => Ok(RestartPolicy::Unlimited),
			"never" => Ok(RestartPolicy::Never),
			digits if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) => {
				digits.parse().map(RestartPolicy::Limited).map_err(|_| s.to_string())
			}
			_ => Err(s.to_string()),
		}
	}
}

impl fmt::Display for RestartPolicy {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			RestartPolicy::Unlimited => f.write_str("unlimited"),
			RestartPolicy::Never => f.write_str("never"),
			RestartPolicy::Terminating => f.write_str("terminating"),
			RestartPolicy::Limited(n) => write!(f, "{}", n),
		}
	}
}
