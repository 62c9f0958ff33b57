//! CLI surface: the flags this process accepts.

use std::time::Duration;

use structopt::StructOpt;

use crate::error::Error;

#[derive(StructOpt, Debug)]
#[structopt(
	name = "rpc-registrar",
	about = "Projects labeled pods' RPC service declarations into a ZooKeeper-backed registry"
)]
pub struct Opt {
	/// Which namespace to watch; all namespaces if unset.
	#[structopt(long = "namespace", default_value = "")]
	pub namespace: String,

	/// Use the mock registry façade, skipping the store connection entirely.
	#[structopt(long = "mockregistry")]
	pub mockregistry: bool,

	/// Comma-separated ZooKeeper servers, e.g. "zk1:2181,zk2:2181".
	#[structopt(long = "zkservers", default_value = "127.0.0.1:2181")]
	pub zkservers: String,

	/// Base path of the RPC service tree in ZooKeeper.
	#[structopt(long = "zkpath", default_value = "/rpc_v2")]
	pub zkpath: String,

	/// Period of the full reconcile sweep, e.g. "1h", "30m", "45s".
	#[structopt(long = "syncperiod", default_value = "1h", parse(try_from_str = parse_duration))]
	pub syncperiod: Duration,
}

impl Opt {
	/// Namespace to watch, or `None` for all namespaces.
	pub fn namespace(&self) -> Option<&str> {
		if self.namespace.is_empty() {
			None
		} else {
			Some(&self.namespace)
		}
	}

	pub fn zk_servers(&self) -> Vec<String> {
		self.zkservers
			.split(',')
			.map(|s| s.trim().to_string())
			.filter(|s| !s.is_empty())
			.collect()
	}

	/// Validates the flags that are only meaningful when not using the mock
	/// registry.
	pub fn validate(&self) -> Result<(), Error> {
		if !self.mockregistry {
			if self.zkservers.trim().is_empty() {
				return Err(Error::Config("invalid zookeeper address".into()));
			}
			if self.zkpath.trim().is_empty() {
				return Err(Error::Config("invalid zookeeper base path".into()));
			}
		}
		Ok(())
	}
}

/// Parses a small duration grammar of the form `<number><unit>` with units
/// `s`, `m`, `h` (e.g. `"1h"`, `"30m"`, `"45s"`), or a bare integer number of
/// seconds. This is the entire duration surface this flag needs, so no
/// general-purpose duration-parsing crate is pulled in for it.
fn parse_duration(s: &str) -> Result<Duration, String> {
	let s = s.trim();
	if s.is_empty() {
		return Err("duration can not be empty".to_string());
	}

	let (digits, unit) = match s.find(|c: char| !c.is_ascii_digit()) {
		Some(idx) => (&s[..idx], &s[idx..]),
		None => (s, "s"),
	};

	let value: u64 = digits
		.parse()
		.map_err(|_| format!("invalid duration: {}", s))?;

	let secs = match unit {
		"s" => value,
		"m" => value.checked_mul(60).ok_or("duration overflow")?,
		"h" => value.checked_mul(3600).ok_or("duration overflow")?,
		other => return Err(format!("unknown duration unit: {}", other)),
	};

	Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_hours_minutes_seconds() {
		assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
		assert_eq!(parse_duration("30m").unwrap(), Duration::from_secs(1800));
		assert_eq!(parse_duration("45s").unwrap(), Duration::from_secs(45));
		assert_eq!(parse_duration("10").unwrap(), Duration::from_secs(10));
	}

	#[test]
	fn rejects_garbage() {
		assert!(parse_duration("").is_err());
		assert!(parse_duration("1x").is_err());
		assert!(parse_duration("h").is_err());
	}

	#[test]
	fn validate_requires_zk_fields_unless_mock() {
		let mut opt = Opt {
			namespace: String::new(),
			mockregistry: false,
			zkservers: String::new(),
			zkpath: "/rpc_v2".into(),
			syncperiod: Duration::from_secs(3600),
		};
		assert!(opt.validate().is_err());
		opt.mockregistry = true;
		assert!(opt.validate().is_ok());
	}
}
