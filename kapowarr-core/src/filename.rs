//! Extraction of structured data out of file and folder names.
//!
//! Comic files in the wild carry their metadata in the filename:
//! `Batman - Detective Comics Vol. 3 (2016) #006 (Digital).cbz`. This
//! module turns such names into [`FilenameData`]. Extraction is
//! deterministic and side-effect free; the matching engine and the
//! renamer both build on it.

use kapowarr_model::{FilenameData, IssueRange, SpecialVersion, VolumeRange};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;

/// Name prefix of the folder an archive gets extracted into. Stripped
/// before extraction so the series name isn't polluted by it.
pub const ARCHIVE_EXTRACT_FOLDER: &str = "KapowarrExtract";

static YEAR_PAREN_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\(((?:19|20)\d{2})(?:\s*[-–]\s*(?:19|20)?\d{2})?\)").unwrap()
});
static YEAR_BARE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b((?:19|20)\d{2})\b").unwrap());
static VOLUME_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:volume|vol\.?|v)[\s._]*(\d{1,3})(?:\s*[-–]\s*(\d{1,3}))?\b")
        .unwrap()
});
static ISSUE_HASH_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"#\s*(\d+(?:\.\d+)?\s?[a-c½]?)(?:\s*[-–]\s*#?\s*(\d+(?:\.\d+)?\s?[a-c½]?))?")
        .unwrap()
});
static ISSUE_WORD_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:issues?|iss|chapter|ch)[\s.]*#?\s*(\d{1,4}(?:\.\d+)?[a-c½]?)(?:\s*[-–]\s*(\d{1,4}(?:\.\d+)?[a-c½]?))?")
        .unwrap()
});
static ISSUE_BARE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|[\s(])(\d{1,4}(?:\.\d+)?[a-c½]?)(?:\s*[-–]\s*(\d{1,4}(?:\.\d+)?[a-c½]?))?(?:[\s).,]|$)")
        .unwrap()
});
static ANNUAL_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bannual\b").unwrap());
static COVER_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bcover\b").unwrap());

/// Special-version keywords, in detection order. Multi-word variants come
/// before the short forms so the longest token wins.
static SPECIAL_VERSION_PATTERNS: Lazy<Vec<(SpecialVersion, Regex)>> =
    Lazy::new(|| {
        vec![
            (
                SpecialVersion::OneShot,
                Regex::new(r"(?i)\bone[\s-]?shot\b").unwrap(),
            ),
            (
                SpecialVersion::HardCover,
                Regex::new(r"(?i)\b(?:hard[\s-]?cover|hc)\b").unwrap(),
            ),
            (
                SpecialVersion::TradePaperBack,
                Regex::new(r"(?i)\b(?:trade[\s-]?paper[\s-]?back|tpb)\b")
                    .unwrap(),
            ),
            (
                SpecialVersion::Omnibus,
                Regex::new(r"(?i)\bomnibus\b").unwrap(),
            ),
        ]
    });

/// Options for [`extract_filename_data`].
#[derive(Debug, Clone, Copy)]
pub struct ExtractOptions {
    /// Prefer the year found in the folder name over the one in the
    /// filename.
    pub prefer_folder_year: bool,
    /// When a special-version file carries a small standalone number,
    /// read it as the volume number instead of an issue number.
    pub assume_volume_number: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            prefer_folder_year: false,
            assume_volume_number: true,
        }
    }
}

/// Fix some common stuff in strings coming from online sources: percent
/// escapes, encoding mishaps and fancy unicode punctuation.
pub fn normalize_string(s: &str) -> String {
    let mut result = s.to_string();
    // Percent-decode the common cases without pulling in a full decoder.
    for (from, to) in [
        ("%20", " "),
        ("%28", "("),
        ("%29", ")"),
        ("_28", "("),
        ("_29", ")"),
        ("–", "-"),
        ("’", "'"),
        ("‘", "'"),
        ("“", "\""),
        ("”", "\""),
    ] {
        result = result.replace(from, to);
    }
    result.trim().to_string()
}

/// Turn user-entered numbers into a parseable form. Handles locale commas,
/// unknown digits and trailing separators.
pub fn normalize_number(s: &str) -> String {
    s.replace(',', ".")
        .replace('?', "0")
        .trim()
        .trim_end_matches('.')
        .to_lowercase()
}

/// Turn a user-entered year string into an int if possible.
pub fn normalize_year(s: &str) -> Option<i32> {
    if s.is_empty() {
        return None;
    }

    let cleaned: String = s
        .trim()
        .chars()
        .map(|c| if c == '-' { '0' } else { c })
        .filter(|c| !"?><+.".contains(*c))
        .map(|c| if c == ',' { '/' } else { c })
        .collect();

    let candidate = if cleaned.contains('/') {
        cleaned.split('/').find(|e| e.len() == 4)?.to_string()
    } else {
        cleaned
    };

    if !candidate.is_empty() && candidate.chars().all(|c| c.is_ascii_digit())
    {
        candidate.parse().ok()
    } else {
        None
    }
}

/// Repair year numbers that are probably a typo by swapping the middle
/// digits: `2204` -> `2024`, `1890` -> `1980`.
pub fn fix_year(year: i32) -> i32 {
    if (1900..2100).contains(&year) {
        return year;
    }

    let digits: Vec<char> = year.to_string().chars().collect();
    if digits.len() != 4 {
        return year;
    }

    let swapped: String =
        [digits[0], digits[2], digits[1], digits[3]].iter().collect();
    swapped.parse().unwrap_or(year)
}

/// Get the year out of a date in the format YYYY-MM-DD.
pub fn extract_year_from_date(date: Option<&str>) -> Option<i32> {
    date.and_then(|d| d.split('-').next())
        .and_then(|y| y.parse().ok())
}

/// Parse an issue number string into its float normal form:
/// `"3b"` -> `3.2`, `"4½"` -> `4.5`, `"006"` -> `6.0`.
pub fn process_issue_number(input: &str) -> Option<f64> {
    let normalized = normalize_number(input);
    let trimmed = normalized.replace(' ', "");
    if trimmed.is_empty() {
        return None;
    }

    let (digits, fraction) = match trimmed.chars().last()? {
        'a' => (&trimmed[..trimmed.len() - 1], 0.1),
        'b' => (&trimmed[..trimmed.len() - 1], 0.2),
        'c' => (&trimmed[..trimmed.len() - 1], 0.3),
        '½' => (&trimmed[..trimmed.len() - '½'.len_utf8()], 0.5),
        _ => (trimmed.as_str(), 0.0),
    };

    if digits.is_empty() {
        // A lone `½`
        return if fraction > 0.0 { Some(fraction) } else { None };
    }

    digits.parse::<f64>().ok().map(|n| n + fraction)
}

/// Parse an issue number or range string (`"5"`, `"1-5"`, `"3b"`).
pub fn extract_issue_number(input: &str) -> Option<IssueRange> {
    let normalized = normalize_number(input);
    if let Some((start, end)) = normalized.split_once('-') {
        let start = process_issue_number(start)?;
        let end = process_issue_number(end)?;
        if start <= end {
            return Some(IssueRange::Range(start, end));
        }
        return Some(IssueRange::Single(start));
    }
    process_issue_number(&normalized).map(IssueRange::Single)
}

/// Parse a volume number or range string.
pub fn extract_volume_number(input: &str) -> Option<VolumeRange> {
    let normalized = normalize_number(input);
    if let Some((start, end)) = normalized.split_once('-') {
        let start: i32 = start.trim().parse().ok()?;
        let end: i32 = end.trim().parse().ok()?;
        if start <= end {
            return Some(VolumeRange::Range(start, end));
        }
        return Some(VolumeRange::Single(start));
    }
    normalized.trim().parse().ok().map(VolumeRange::Single)
}

/// Search a volume description for a `volume N` mention. Used by the
/// catalog adapter to recover volume numbers from summaries.
pub fn volume_number_in_text(text: &str) -> Option<VolumeRange> {
    let captures = VOLUME_REGEX.captures(text)?;
    let start: i32 = captures.get(1)?.as_str().parse().ok()?;
    match captures.get(2).and_then(|m| m.as_str().parse::<i32>().ok()) {
        Some(end) if start <= end => Some(VolumeRange::Range(start, end)),
        _ => Some(VolumeRange::Single(start)),
    }
}

/// Replace filename separators with spaces. Dots between digits stay so
/// decimal issue numbers survive.
fn normalize_separators(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut result = String::with_capacity(input.len());
    for (i, &c) in chars.iter().enumerate() {
        match c {
            '_' | '+' => result.push(' '),
            '–' => result.push('-'),
            '.' => {
                // Keep decimals like "4.5"; dot-separated years ("2016.004")
                // have longer digit runs and become spaces.
                let prev_run = chars[..i]
                    .iter()
                    .rev()
                    .take_while(|c| c.is_ascii_digit())
                    .count();
                let next_digit = chars
                    .get(i + 1)
                    .is_some_and(|n| n.is_ascii_digit());
                if (1..=2).contains(&prev_run) && next_digit {
                    result.push('.');
                } else {
                    result.push(' ');
                }
            }
            _ => result.push(c),
        }
    }
    result
}

/// Blank out a byte span with spaces, one per byte, keeping every later
/// match index stable.
fn blank_span(text: &mut String, start: usize, end: usize) {
    text.replace_range(start..end, &" ".repeat(end - start));
}

#[derive(Debug, Default)]
struct ParsedName {
    series: String,
    year: Option<i32>,
    volume_number: Option<VolumeRange>,
    issue_number: Option<IssueRange>,
    annual: bool,
    special_version: Option<SpecialVersion>,
}

/// Parse one name (a file stem or a folder name).
fn parse_name(name: &str, allow_issue: bool) -> ParsedName {
    let stem = normalize_string(&normalize_separators(name));
    let mut working = stem.clone();
    let mut parsed = ParsedName {
        annual: ANNUAL_REGEX.is_match(&stem),
        ..Default::default()
    };
    // Structural token starts; the series is everything left of the
    // earliest one.
    let mut cuts: Vec<usize> = Vec::new();

    if let Some(captures) = VOLUME_REGEX.captures(&working) {
        let full = captures.get(0).unwrap();
        let start: Option<i32> =
            captures.get(1).and_then(|m| m.as_str().parse().ok());
        let end: Option<i32> =
            captures.get(2).and_then(|m| m.as_str().parse().ok());
        parsed.volume_number = match (start, end) {
            (Some(s), Some(e)) if s <= e => Some(VolumeRange::Range(s, e)),
            (Some(s), _) => Some(VolumeRange::Single(s)),
            _ => None,
        };
        let (span_start, span_end) = (full.start(), full.end());
        cuts.push(span_start);
        blank_span(&mut working, span_start, span_end);
    }

    let year_match = YEAR_PAREN_REGEX
        .captures(&working)
        .or_else(|| YEAR_BARE_REGEX.captures(&working));
    if let Some(captures) = year_match {
        let full = captures.get(0).unwrap();
        parsed.year = captures
            .get(1)
            .and_then(|m| m.as_str().parse().ok())
            .map(fix_year);
        let (span_start, span_end) = (full.start(), full.end());
        // A year at the very start is series text ("2000 AD"), not a cut.
        if span_start > 0 {
            cuts.push(span_start);
        }
        blank_span(&mut working, span_start, span_end);
    }

    for (version, pattern) in SPECIAL_VERSION_PATTERNS.iter() {
        if let Some(found) = pattern.find(&working) {
            let (found_start, found_end) = (found.start(), found.end());
            parsed.special_version = Some(*version);
            cuts.push(found_start);
            blank_span(&mut working, found_start, found_end);
            break;
        }
    }

    // Issue tokens always cut the series; whether the number is kept
    // depends on `allow_issue` (folder names don't carry issue numbers).
    {
        let to_range = |captures: &regex::Captures<'_>| {
            let start = captures
                .get(1)
                .and_then(|m| process_issue_number(m.as_str()));
            let end = captures
                .get(2)
                .and_then(|m| process_issue_number(m.as_str()));
            match (start, end) {
                (Some(s), Some(e)) if s <= e => {
                    Some(IssueRange::Range(s, e))
                }
                (Some(s), _) => Some(IssueRange::Single(s)),
                _ => None,
            }
        };

        if let Some(captures) = ISSUE_HASH_REGEX.captures(&working) {
            if allow_issue {
                parsed.issue_number = to_range(&captures);
            }
            cuts.push(captures.get(0).unwrap().start());
        } else if let Some(captures) = ISSUE_WORD_REGEX.captures(&working) {
            if allow_issue {
                parsed.issue_number = to_range(&captures);
            }
            cuts.push(captures.get(0).unwrap().start());
        } else if let Some(captures) = ISSUE_BARE_REGEX.captures(&working) {
            let number_start = captures.get(1).unwrap().start();
            if number_start > 0 {
                if allow_issue {
                    parsed.issue_number = to_range(&captures);
                }
                cuts.push(number_start);
            }
        }
    }

    let cut = cuts.into_iter().min().unwrap_or(stem.len());
    parsed.series = stem[..cut]
        .trim_end_matches(|c: char| {
            c.is_whitespace() || "-–#(,".contains(c)
        })
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

    parsed
}

/// Extract all data from a file or folder path that can be recovered from
/// its name, using the parent folder name as fallback context.
pub fn extract_filename_data(
    filepath: &str,
    options: ExtractOptions,
) -> FilenameData {
    let cleaned_path = filepath
        .replace(&format!("{ARCHIVE_EXTRACT_FOLDER}_"), "");
    let path = Path::new(&cleaned_path);

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(cleaned_path.as_str());
    let folder_name = path
        .parent()
        .and_then(|p| p.file_name())
        .and_then(|f| f.to_str());

    let mut file = parse_name(stem, true);
    let folder = folder_name.map(|name| parse_name(name, false));

    // Sidecar classification wins over keyword detection. Their series
    // text is just the marker word, so drop it and let the folder fill in.
    if extension == "xml" || stem.eq_ignore_ascii_case("cvinfo") {
        file.special_version = Some(SpecialVersion::Metadata);
        file.series.clear();
    } else if kapowarr_model::ScannableExt::IMAGE.contains(&extension.as_str())
        && COVER_REGEX.is_match(stem)
    {
        file.special_version = Some(SpecialVersion::Cover);
        file.series = COVER_REGEX
            .replace_all(&file.series, "")
            .trim()
            .to_string();
    }

    if let Some(folder) = &folder {
        if file.series.is_empty() {
            file.series = folder.series.clone();
        }
        if file.volume_number.is_none() {
            file.volume_number = folder.volume_number;
        }
        file.year = if options.prefer_folder_year {
            folder.year.or(file.year)
        } else {
            file.year.or(folder.year)
        };
        file.annual = file.annual || folder.annual;
        if file.special_version.is_none() {
            file.special_version = folder.special_version;
        }
    }

    // Special-version releases are one book; a small standalone number in
    // their name is the volume, not an issue.
    if options.assume_volume_number
        && file.volume_number.is_none()
        && matches!(
            file.special_version,
            Some(
                SpecialVersion::TradePaperBack
                    | SpecialVersion::HardCover
                    | SpecialVersion::Omnibus
                    | SpecialVersion::OneShot
            )
        )
    {
        if let Some(IssueRange::Single(n)) = file.issue_number {
            if n > 0.0 && n < 100.0 && n.fract() == 0.0 {
                file.volume_number = Some(VolumeRange::Single(n as i32));
                file.issue_number = None;
            }
        }
    }

    FilenameData {
        series: file.series,
        year: file.year,
        volume_number: file.volume_number,
        issue_number: file.issue_number,
        annual: file.annual,
        special_version: file.special_version,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(path: &str) -> FilenameData {
        extract_filename_data(path, ExtractOptions::default())
    }

    #[test]
    fn test_standard_issue_file() {
        let data = extract(
            "Batman - Detective Comics Vol. 3 (2016) #006 (Digital).cbz",
        );
        assert_eq!(data.series, "Batman - Detective Comics");
        assert_eq!(data.volume_number, Some(VolumeRange::Single(3)));
        assert_eq!(data.year, Some(2016));
        assert_eq!(data.issue_number, Some(IssueRange::Single(6.0)));
        assert!(!data.annual);
        assert_eq!(data.special_version, None);
    }

    #[test]
    fn test_bare_issue_range() {
        let data = extract("Invincible 001-005 (2003).cbz");
        assert_eq!(data.series, "Invincible");
        assert_eq!(data.volume_number, None);
        assert_eq!(data.year, Some(2003));
        assert_eq!(data.issue_number, Some(IssueRange::Range(1.0, 5.0)));
    }

    #[test]
    fn test_issue_letter_suffix() {
        assert_eq!(process_issue_number("3b"), Some(3.2));
        assert_eq!(process_issue_number("4½"), Some(4.5));
        assert_eq!(process_issue_number("½"), Some(0.5));
        assert_eq!(process_issue_number("006"), Some(6.0));
        assert_eq!(process_issue_number("12.5"), Some(12.5));
    }

    #[test]
    fn test_hash_issue_range() {
        let data = extract("Saga #1-#3 (2012).cbz");
        assert_eq!(data.series, "Saga");
        assert_eq!(data.issue_number, Some(IssueRange::Range(1.0, 3.0)));
    }

    #[test]
    fn test_annual() {
        let data = extract("Batman Annual #2 (2017).cbz");
        assert!(data.annual);
        assert_eq!(data.series, "Batman Annual");
        assert_eq!(data.issue_number, Some(IssueRange::Single(2.0)));
    }

    #[test]
    fn test_tpb_volume_assumption() {
        let data = extract("Invincible Compendium 2 (2011) TPB.cbz");
        assert_eq!(
            data.special_version,
            Some(SpecialVersion::TradePaperBack)
        );
        assert_eq!(data.volume_number, Some(VolumeRange::Single(2)));
        assert_eq!(data.issue_number, None);
    }

    #[test]
    fn test_one_shot() {
        let data = extract("Nimona One-Shot (2015).cbz");
        assert_eq!(data.series, "Nimona");
        assert_eq!(data.special_version, Some(SpecialVersion::OneShot));
    }

    #[test]
    fn test_cover_file() {
        let data = extract("/library/Batman (2016)/cover.jpg");
        assert_eq!(data.special_version, Some(SpecialVersion::Cover));
        assert_eq!(data.series, "Batman");
        assert_eq!(data.year, Some(2016));
    }

    #[test]
    fn test_metadata_file() {
        let data = extract("/library/Batman (2016)/cvinfo.xml");
        assert_eq!(data.special_version, Some(SpecialVersion::Metadata));
    }

    #[test]
    fn test_folder_inheritance() {
        let data = extract("/library/Invincible Vol. 1 (2003)/Issue 05.cbz");
        assert_eq!(data.series, "Invincible");
        assert_eq!(data.volume_number, Some(VolumeRange::Single(1)));
        assert_eq!(data.year, Some(2003));
        assert_eq!(data.issue_number, Some(IssueRange::Single(5.0)));
    }

    #[test]
    fn test_prefer_folder_year() {
        let options = ExtractOptions {
            prefer_folder_year: true,
            ..Default::default()
        };
        let data = extract_filename_data(
            "/library/Batman (2016)/Batman 001 (2017).cbz",
            options,
        );
        assert_eq!(data.year, Some(2016));
    }

    #[test]
    fn test_series_starting_with_digits() {
        let data = extract("2000 AD #50.cbz");
        assert_eq!(data.series, "2000 AD");
        assert_eq!(data.issue_number, Some(IssueRange::Single(50.0)));
    }

    #[test]
    fn test_archive_extract_sentinel_stripped() {
        let data = extract(
            "/library/Batman (2016)/KapowarrExtract_Batman 001-005/Batman 003.cbz",
        );
        assert_eq!(data.series, "Batman");
        assert_eq!(data.issue_number, Some(IssueRange::Single(3.0)));
    }

    #[test]
    fn test_dotted_separators() {
        let data = extract("Batman.2016.004.cbz");
        assert_eq!(data.series, "Batman");
        assert_eq!(data.year, Some(2016));
        assert_eq!(data.issue_number, Some(IssueRange::Single(4.0)));
    }

    #[test]
    fn test_fix_year() {
        assert_eq!(fix_year(2204), 2024);
        assert_eq!(fix_year(1890), 1980);
        assert_eq!(fix_year(2010), 2010);
        assert_eq!(fix_year(123), 123);
    }

    #[test]
    fn test_normalize_year() {
        assert_eq!(normalize_year("2016"), Some(2016));
        assert_eq!(normalize_year("2016?"), Some(2016));
        assert_eq!(normalize_year("201-"), Some(2010));
        assert_eq!(normalize_year("2016,2017"), Some(2016));
        assert_eq!(normalize_year(""), None);
        assert_eq!(normalize_year("abcd"), None);
    }

    #[test]
    fn test_determinism() {
        let a = extract("Invincible 001-005 (2003).cbz");
        let b = extract("Invincible 001-005 (2003).cbz");
        assert_eq!(a, b);
    }
}
