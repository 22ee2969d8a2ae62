/// Column name constants for the rental panel ("CampusFile" extracts).
/// These are the defaults; every one of them can be overridden in the config.

// Identifier and repeat-observation marker
pub const OBID_COL: &str = "obid";
pub const SPELL_COL: &str = "spell";

// Listing duration in days, reconciled by averaging during dedup
pub const DURATION_COL: &str = "laufzeittage";

// Default target
pub const RENT_SQM_COL: &str = "rent_sqm";

/// Upper bound for plausible listing durations
pub const MAX_DURATION_DAYS: f64 = 365.0;

/// Cell tokens the panel uses in place of an empty value
pub const DEFAULT_MISSING_TOKENS: &[&str] = &["Other missing"];

/// Separator used when disambiguating repeated identifiers (`<obid>_2`)
pub const ID_SUFFIX_SEPARATOR: char = '_';

/// Separator inside grid cell identifiers (`<east>_<north>`)
pub const GRID_SEPARATOR: char = '_';

// Derived grid feature names
pub const GRID_EAST_COL: &str = "east";
pub const GRID_NORTH_COL: &str = "north";

/// Suffix for year features derived from temporal columns
pub const YEAR_SUFFIX: &str = "_year";

// Output file names
pub const CLEANED_CSV_FILE: &str = "cleaned.csv";
pub const RUN_REPORT_FILE: &str = "run_report.json";
