/// Default configuration file name, looked up in the project directory.
pub const CONFIG_FILENAME: &str = "pinbuild.toml";

/// Marker written inside the staged source tree once extraction completes.
pub const STAGE_MARKER: &str = ".pinbuild-stage.json";

/// Marker written into the project directory after a successful compile.
pub const BUILD_MARKER: &str = ".pinbuild-build.json";

/// Marker written into the project directory after the suite passes.
pub const TEST_MARKER: &str = ".pinbuild-test.json";

pub const LOCK_FILENAME: &str = ".pinbuild.lock";

/// Version of the on-disk marker format.
pub const MARKER_VERSION: u32 = 1;

/// Prefix of the sibling directory an archive is extracted into before it is
/// renamed over the staged source tree.
pub const PARTIAL_PREFIX: &str = ".pinbuild-partial-";

/// Prefix for environment variable overrides (`PINBUILD_URL`, ...).
pub const ENV_PREFIX: &str = "PINBUILD_";
