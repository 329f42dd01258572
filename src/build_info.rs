/// Compile-time facts recorded by `build.rs`, shown by `--version` and
/// written at the top of panic reports.
pub struct BuildInfo;

impl BuildInfo {
    pub fn version() -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    /// YYYYMMDD.HHMMSS, UTC
    pub fn build_timestamp() -> &'static str {
        env!("BUILD_TIMESTAMP")
    }

    /// Seven hex digits, with `-dirty` when the tree had uncommitted changes.
    pub fn commit() -> &'static str {
        env!("GIT_HASH_SHORT")
    }

    pub fn full_commit() -> &'static str {
        env!("GIT_HASH")
    }

    pub fn platform() -> &'static str {
        env!("TARGET_PLATFORM")
    }

    pub fn profile() -> &'static str {
        env!("BUILD_PROFILE")
    }

    pub fn display_version() -> String {
        format!("{} ({} {})", Self::version(), Self::commit(), Self::build_timestamp())
    }

    pub fn detailed_info() -> String {
        [
            ("Version", Self::version()),
            ("Built", Self::build_timestamp()),
            ("Commit", Self::full_commit()),
            ("Platform", Self::platform()),
            ("Profile", Self::profile()),
        ]
        .iter()
        .map(|(label, value)| format!("{label}: {value}"))
        .collect::<Vec<_>>()
        .join("\n")
    }
}
