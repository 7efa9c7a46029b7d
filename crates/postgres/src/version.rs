/// Parsed server version, kept alongside the raw version string for reports.
///
/// Catalog queries are gated on the major version only; the minor is carried
/// for display and for the backup report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerVersion {
	pub version_string: String,
	pub major: u32,
	pub minor: u32,
}

impl ServerVersion {
	/// Parse the output of `SELECT pg_catalog.version()`.
	///
	/// On an MPP cluster the banner reads like
	/// `PostgreSQL 9.4.26 (MPP Database 6.14.0 build commit:...) on x86_64`,
	/// and the distribution version inside the parentheses is the one that
	/// decides catalog dialects, so it wins over the base PostgreSQL version.
	/// Bare versions (`9.4.26`, `6.14.0devel`) parse too.
	pub fn parse(version_string: &str) -> Self {
		let candidate = version_string
			.split_once("Database ")
			.map_or(version_string, |(_, rest)| rest);

		let mut numbers = candidate
			.split_whitespace()
			.find(|word| word.chars().next().is_some_and(|c| c.is_ascii_digit()))
			.unwrap_or("0")
			.split('.')
			.map(|part| {
				part.chars()
					.take_while(|c| c.is_ascii_digit())
					.collect::<String>()
					.parse()
					.unwrap_or(0)
			});

		Self {
			version_string: version_string.into(),
			major: numbers.next().unwrap_or(0),
			minor: numbers.next().unwrap_or(0),
		}
	}

	pub fn at_least(&self, major: u32) -> bool {
		self.major >= major
	}

	pub fn before(&self, major: u32) -> bool {
		self.major < major
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_bare_version() {
		let v = ServerVersion::parse("9.4.26");
		assert_eq!((v.major, v.minor), (9, 4));
	}

	#[test]
	fn prefers_distribution_version_in_banner() {
		let v = ServerVersion::parse(
			"PostgreSQL 9.4.26 (MPP Database 6.14.0 build commit:abcdef) on x86_64-unknown-linux-gnu",
		);
		assert_eq!((v.major, v.minor), (6, 14));
		assert!(v.at_least(5));
		assert!(v.at_least(6));
		assert!(v.before(7));
	}

	#[test]
	fn parses_plain_postgres_banner() {
		let v = ServerVersion::parse("PostgreSQL 12.3 on x86_64-pc-linux-gnu");
		assert_eq!((v.major, v.minor), (12, 3));
	}

	#[test]
	fn parses_devel_suffix() {
		let v = ServerVersion::parse("4.3devel");
		assert_eq!((v.major, v.minor), (4, 3));
	}

	#[test]
	fn zero_on_garbage() {
		let v = ServerVersion::parse("who knows");
		assert_eq!((v.major, v.minor), (0, 0));
	}
}
