//! Matching of files, search results and catalog volumes to each other.
//!
//! Five predicates compose into the filters used by the scanner, the
//! folder extractor and the search aggregator, plus the ranker that
//! orders search candidates.

use std::collections::HashMap;

use kapowarr_model::{
    FilenameData, IssueData, IssueRange, MatchRejection, MatchedSearchResult,
    SearchResultData, SpecialVersion, VolumeData, VolumeMetadata, VolumeRange,
};
use once_cell::sync::Lazy;
use ordered_float::OrderedFloat;
use regex::Regex;

/// Calculated issue numbers of a volume mapped to their release year.
pub type NumberToYear = HashMap<OrderedFloat<f64>, Option<i32>>;

/// Noise tokens that are dropped before comparing titles. The multi-word
/// special-version tokens come before the single characters they contain.
static CLEAN_TITLE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"\bone[-\s]?shot\b|\bhard[-\s]?cover\b|\bomnibus\b|\btpb\b|\bthe\s|\band\b|/|-|–|\+|,|\.|!|:|&|’|'|""#,
    )
    .unwrap()
});

fn clean_title(title: &str) -> String {
    let lowered = title.to_lowercase().replace("annuals", "annual");
    CLEAN_TITLE_REGEX
        .replace_all(&lowered, "")
        .replace(' ', "")
}

/// Determine if two titles refer to the same thing.
pub fn match_title(title1: &str, title2: &str) -> bool {
    clean_title(title1) == clean_title(title2)
}

/// Like [`match_title`], but also matches when one cleaned title is found
/// somewhere inside the other.
pub fn match_title_allow_contains(title1: &str, title2: &str) -> bool {
    let clean1 = clean_title(title1);
    let clean2 = clean_title(title2);
    clean1.contains(&clean2) || clean2.contains(&clean1)
}

/// Check if two years match, with one year of wiggle room on each border.
///
/// `end_year` replaces the reference year as the upper border when given.
/// If either side is absent the result is `conservative`.
pub fn match_year(
    reference_year: Option<i32>,
    check_year: Option<i32>,
    end_year: Option<i32>,
    conservative: bool,
) -> bool {
    let (Some(reference), Some(check)) = (reference_year, check_year) else {
        return conservative;
    };

    let end_border = end_year.unwrap_or(reference);
    reference - 1 <= check && check <= end_border + 1
}

/// Check whether a volume number matches the volume's own number or its
/// year (users enter years as volume numbers). If the volume is
/// volume-as-issue, the number is actually an issue number, so every
/// covered value must exist as an issue.
pub fn match_volume_number(
    volume: &VolumeData,
    volume_issues: &[IssueData],
    check_number: Option<VolumeRange>,
    conservative: bool,
) -> bool {
    let Some(check) = check_number else {
        return conservative;
    };

    if let VolumeRange::Single(number) = check {
        if number == volume.volume_number {
            return true;
        }

        if match_year(volume.year, Some(number), None, false) {
            return true;
        }
    }

    // The numbers don't match, but for volume-as-issue volumes the
    // volume number is actually the issue number.
    if volume.special_version != SpecialVersion::VolumeAsIssue {
        return false;
    }

    check.numbers().all(|number| {
        volume_issues
            .iter()
            .any(|issue| issue.calculated_issue_number == number as f64)
    })
}

/// Check if special versions match, taking into account that filenames
/// often lack state specificity.
pub fn match_special_version(
    reference_version: SpecialVersion,
    check_version: Option<SpecialVersion>,
    volume_title: &str,
    issue_number: Option<IssueRange>,
) -> bool {
    match check_version {
        Some(version) if version == reference_version => return true,
        Some(SpecialVersion::Cover) | Some(SpecialVersion::Metadata) => {
            return true;
        }
        None if reference_version == SpecialVersion::Normal => return true,
        _ => {}
    }

    if issue_number == Some(IssueRange::Single(1.0))
        && matches!(
            reference_version,
            SpecialVersion::HardCover
                | SpecialVersion::OneShot
                | SpecialVersion::Omnibus
        )
    {
        return true;
    }

    if reference_version == SpecialVersion::VolumeAsIssue
        && matches!(check_version, None | Some(SpecialVersion::Normal))
    {
        return true;
    }

    if volume_title.to_lowercase().contains("omnibus")
        && check_version == Some(SpecialVersion::Omnibus)
    {
        return true;
    }

    // The volume's special version often isn't mentioned in, or can't be
    // determined from, the filename; extraction then settles on TPB.
    check_version == Some(SpecialVersion::TradePaperBack)
        && matches!(
            reference_version,
            SpecialVersion::HardCover
                | SpecialVersion::OneShot
                | SpecialVersion::Omnibus
                | SpecialVersion::VolumeAsIssue
        )
}

/// The filter applied to files extracted out of an archive folder, which
/// decides whether a file is relevant for the volume.
pub fn folder_extraction_filter(
    file_data: &FilenameData,
    volume: &VolumeData,
    volume_issues: &[IssueData],
    end_year: Option<i32>,
) -> bool {
    let matching_annual = file_data.annual == volume.is_annual();

    let matching_title = match_title(&file_data.series, &volume.title);

    let matching_year =
        match_year(volume.year, file_data.year, end_year, false);

    let matching_volume_number = match_volume_number(
        volume,
        volume_issues,
        file_data.volume_number,
        false,
    );

    let matching_special_version = match_special_version(
        volume.special_version,
        file_data.special_version,
        &volume.title,
        file_data.issue_number,
    );

    // Neither year nor volume number found: play it safe and keep it.
    let neither_found =
        file_data.year.is_none() && file_data.volume_number.is_none();

    matching_title
        && matching_annual
        && matching_special_version
        && (matching_year || matching_volume_number || neither_found)
}

/// The issue number a candidate covers, falling back to the volume number
/// for volume-as-issue volumes.
fn effective_issue_number(
    issue_number: Option<IssueRange>,
    volume_number: Option<VolumeRange>,
    volume: &VolumeData,
) -> Option<IssueRange> {
    issue_number.or_else(|| {
        if volume.special_version == SpecialVersion::VolumeAsIssue {
            volume_number.map(|v| v.as_issue_range())
        } else {
            None
        }
    })
}

fn year_of_last_covered(
    issue_number: Option<IssueRange>,
    number_to_year: &NumberToYear,
) -> Option<i32> {
    issue_number
        .and_then(|n| number_to_year.get(&OrderedFloat(n.last())))
        .copied()
        .flatten()
}

/// Filter for matching files to a volume during a scan.
pub fn file_importing_filter(
    file_data: &FilenameData,
    volume: &VolumeData,
    volume_issues: &[IssueData],
    number_to_year: &NumberToYear,
) -> bool {
    let issue_number = effective_issue_number(
        file_data.issue_number,
        file_data.volume_number,
        volume,
    );

    let matching_special_version = match_special_version(
        volume.special_version,
        file_data.special_version,
        &volume.title,
        file_data.issue_number,
    );

    let matching_volume_number = match_volume_number(
        volume,
        volume_issues,
        file_data.volume_number,
        false,
    );

    let matching_year = match_year(
        volume.year,
        file_data.year,
        year_of_last_covered(issue_number, number_to_year),
        false,
    );

    matching_special_version && (matching_volume_number || matching_year)
}

/// Filter for whether a search result matches what is searched for,
/// producing the labelled rejections.
#[allow(clippy::too_many_arguments)]
pub fn check_search_result_match(
    result: &SearchResultData,
    volume: &VolumeData,
    volume_issues: &[IssueData],
    number_to_year: &NumberToYear,
    calculated_issue_number: Option<f64>,
    blocklisted: bool,
) -> Vec<MatchRejection> {
    let mut rejections = Vec::new();

    if blocklisted {
        rejections.push(MatchRejection::Blocklisted);
    }

    if result.annual != volume.is_annual() {
        rejections.push(MatchRejection::Annual);
    }

    let title_matches = match_title(&volume.title, &result.series)
        || volume
            .alt_title
            .as_deref()
            .is_some_and(|alt| match_title(alt, &result.series));
    if !title_matches {
        rejections.push(MatchRejection::Title);
    }

    if !match_volume_number(volume, volume_issues, result.volume_number, true)
    {
        rejections.push(MatchRejection::VolumeNumber);
    }

    if !match_special_version(
        volume.special_version,
        result.special_version,
        &volume.title,
        result.issue_number,
    ) {
        rejections.push(MatchRejection::SpecialVersion);
    }

    let issue_number = effective_issue_number(
        result.issue_number,
        result.volume_number,
        volume,
    );

    if !match_year(
        volume.year,
        result.year,
        year_of_last_covered(issue_number, number_to_year),
        true,
    ) {
        rejections.push(MatchRejection::Year);
    }

    if matches!(
        volume.special_version,
        SpecialVersion::Normal | SpecialVersion::VolumeAsIssue
    ) {
        match calculated_issue_number {
            None => {
                // Volume search: both borders of the covered range must be
                // known issues of the volume.
                let borders_known = issue_number.is_some_and(|n| {
                    let (start, end) = n.as_range();
                    number_to_year.contains_key(&OrderedFloat(start))
                        && number_to_year.contains_key(&OrderedFloat(end))
                });
                if !borders_known {
                    rejections.push(MatchRejection::IssueNumber);
                }
            }
            Some(calculated) => {
                // Issue search: the extracted number must be exactly the
                // searched issue.
                if issue_number != Some(IssueRange::Single(calculated)) {
                    rejections.push(MatchRejection::IssueNumber);
                }
            }
        }
    }

    rejections
}

/// Annotate a search result with the outcome of the match filter.
pub fn annotate_search_result(
    result: SearchResultData,
    volume: &VolumeData,
    volume_issues: &[IssueData],
    number_to_year: &NumberToYear,
    calculated_issue_number: Option<f64>,
    blocklisted: bool,
) -> MatchedSearchResult {
    let rejections = check_search_result_match(
        &result,
        volume,
        volume_issues,
        number_to_year,
        calculated_issue_number,
        blocklisted,
    );
    MatchedSearchResult {
        result,
        is_match: rejections.is_empty(),
        match_rejections: rejections,
        covered_issues: None,
    }
}

/// Give a search result a rank to sort on; the lowest key wins.
///
/// The key is lexicographic: matches first, then fewest unknown title
/// words, then volume/year agreement, then how well the issue numbers fit.
pub fn rank_search_result(
    result: &MatchedSearchResult,
    title: &str,
    volume_number: i32,
    year: (Option<i32>, Option<i32>),
    calculated_issue_number: Option<f64>,
) -> Vec<f64> {
    let mut rating: Vec<f64> = Vec::with_capacity(4);

    // Prefer matches.
    rating.push(if result.is_match { 0.0 } else { 1.0 });

    // The more words of the result's title appear in the search term, the
    // higher it ranks.
    let title_words: Vec<&str> = title.split(' ').collect();
    let unknown_words = result
        .result
        .series
        .split(' ')
        .filter(|word| !title_words.contains(word))
        .count();
    rating.push(unknown_words as f64);

    // Prefer volume number or year matches, even better if both match.
    let mut vy_score = 3.0;
    if result.result.volume_number == Some(VolumeRange::Single(volume_number))
    {
        vy_score -= 1.0;
    }

    if let (Some(issue_year), Some(result_year)) = (year.1, result.result.year)
    {
        if issue_year == result_year {
            // Issue year direct match.
            vy_score -= 2.0;
        } else if let Some(start_year) = year.0 {
            if start_year - 1 <= result_year && result_year <= issue_year + 1
            {
                // Fuzzy match between start year and issue year.
                vy_score -= 1.0;
            }
        }
    }
    rating.push(vy_score);

    // Sort on issue number fitting.
    match calculated_issue_number {
        Some(calculated) => match result.result.issue_number {
            Some(IssueRange::Single(number)) if number == calculated => {
                rating.push(0.0);
            }
            Some(IssueRange::Range(start, end)) => {
                if start <= calculated && calculated <= end {
                    // Narrower ranges fit better.
                    rating.push(1.0 - 1.0 / (end - start + 1.0));
                } else {
                    // Falls outside the range, so the release is useless.
                    rating.push(3.0);
                }
            }
            _ if result.result.special_version.is_some() => rating.push(2.0),
            _ => rating.push(3.0),
        },
        None => match result.result.issue_number {
            Some(IssueRange::Range(start, end)) => {
                rating.push(1.0 / (end - start + 1.0));
            }
            Some(IssueRange::Single(_)) => rating.push(1.0),
            None => rating.push(0.0),
        },
    }

    rating
}

/// Lexicographic comparison of rank keys.
pub fn cmp_rank(a: &[f64], b: &[f64]) -> std::cmp::Ordering {
    for (left, right) in a.iter().zip(b.iter()) {
        let ordering = left.total_cmp(right);
        if ordering != std::cmp::Ordering::Equal {
            return ordering;
        }
    }
    a.len().cmp(&b.len())
}

/// Volumes of these types can only match search results with one issue.
pub const ONE_ISSUE_MATCH: [SpecialVersion; 4] = [
    SpecialVersion::TradePaperBack,
    SpecialVersion::OneShot,
    SpecialVersion::HardCover,
    SpecialVersion::Omnibus,
];

/// Out of the catalog search results for a file, choose the volume that
/// matches best, if any. The input list should already be filtered on
/// title match and translation allowance.
pub fn select_best_volume_result_for_file<'a>(
    file: &FilenameData,
    search_results: &'a [VolumeMetadata],
) -> Option<&'a VolumeMetadata> {
    let single_issue_only = file
        .special_version
        .is_some_and(|sv| ONE_ISSUE_MATCH.contains(&sv));

    search_results
        .iter()
        .filter(|result| !single_issue_only || result.issue_count == 1)
        .max_by_key(|result| {
            // Two unknown years count as an exact match, so an
            // unknown-year candidate outranks a wrong-year one.
            let exact_year = (result.year == file.year) as i32;
            let fuzzy_year =
                match_year(result.year, file.year, None, false) as i32;
            let volume_match = (file.volume_number.is_some()
                && file.volume_number
                    == Some(VolumeRange::Single(result.volume_number)))
                as i32;
            exact_year + fuzzy_year + 2 * volume_match
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use kapowarr_model::{ComicvineId, IssueId, RootFolderId, VolumeId};

    fn volume(special_version: SpecialVersion) -> VolumeData {
        VolumeData {
            id: VolumeId(1),
            comicvine_id: ComicvineId(100),
            title: "Invincible".to_string(),
            alt_title: None,
            year: Some(2003),
            publisher: Some("Image".to_string()),
            volume_number: 1,
            description: None,
            site_url: String::new(),
            monitored: true,
            monitor_new_issues: true,
            root_folder: RootFolderId(1),
            folder: "/comics/Invincible (2003)".to_string(),
            custom_folder: false,
            special_version,
            special_version_locked: false,
            last_cv_fetch: 0,
        }
    }

    fn issue(number: f64) -> IssueData {
        IssueData {
            id: IssueId(number as i64),
            volume_id: VolumeId(1),
            comicvine_id: ComicvineId(number as i64),
            issue_number: number.to_string(),
            calculated_issue_number: number,
            title: None,
            date: None,
            monitored: true,
        }
    }

    #[test]
    fn test_match_title() {
        assert!(match_title(
            "The Amazing Spider-Man",
            "Amazing Spiderman"
        ));
        assert!(!match_title("X-Men", "X Men Unlimited"));
        assert!(match_title_allow_contains("X-Men", "X Men Unlimited"));
        assert!(match_title("Batman Annuals", "Batman Annual"));
    }

    #[test]
    fn test_match_year() {
        assert!(match_year(Some(2015), Some(2016), None, false));
        assert!(!match_year(Some(2015), Some(2018), None, false));
        assert!(match_year(Some(2015), Some(2018), Some(2017), false));
        assert!(match_year(None, Some(2016), None, true));
        assert!(!match_year(None, Some(2016), None, false));
    }

    #[test]
    fn test_match_volume_number_plain() {
        let vol = volume(SpecialVersion::Normal);
        let issues = vec![issue(1.0), issue(2.0)];
        assert!(match_volume_number(
            &vol,
            &issues,
            Some(VolumeRange::Single(1)),
            false
        ));
        // Users enter years as volume numbers.
        assert!(match_volume_number(
            &vol,
            &issues,
            Some(VolumeRange::Single(2003)),
            false
        ));
        assert!(!match_volume_number(
            &vol,
            &issues,
            Some(VolumeRange::Single(7)),
            false
        ));
        assert!(match_volume_number(&vol, &issues, None, true));
    }

    #[test]
    fn test_match_volume_number_volume_as_issue() {
        let vol = volume(SpecialVersion::VolumeAsIssue);
        let issues = vec![issue(1.0), issue(2.0), issue(3.0)];
        assert!(match_volume_number(
            &vol,
            &issues,
            Some(VolumeRange::Range(2, 3)),
            false
        ));
        assert!(!match_volume_number(
            &vol,
            &issues,
            Some(VolumeRange::Range(3, 4)),
            false
        ));
    }

    #[test]
    fn test_match_special_version() {
        assert!(match_special_version(
            SpecialVersion::Normal,
            None,
            "Invincible",
            None
        ));
        // Cover and metadata files always match.
        assert!(match_special_version(
            SpecialVersion::TradePaperBack,
            Some(SpecialVersion::Cover),
            "Invincible",
            None
        ));
        // Issue 1 of a one-of-one volume.
        assert!(match_special_version(
            SpecialVersion::OneShot,
            None,
            "Nimona",
            Some(IssueRange::Single(1.0))
        ));
        // Volume-as-issue accepts normal children.
        assert!(match_special_version(
            SpecialVersion::VolumeAsIssue,
            None,
            "Monster",
            None
        ));
        // Unlabeled TPB against hard cover.
        assert!(match_special_version(
            SpecialVersion::HardCover,
            Some(SpecialVersion::TradePaperBack),
            "Invincible",
            None
        ));
        assert!(!match_special_version(
            SpecialVersion::Normal,
            Some(SpecialVersion::TradePaperBack),
            "Invincible",
            None
        ));
    }

    fn search_result(series: &str) -> SearchResultData {
        SearchResultData {
            series: series.to_string(),
            year: Some(2003),
            volume_number: None,
            special_version: None,
            issue_number: Some(IssueRange::Single(2.0)),
            annual: false,
            link: "https://example.com/dl/1".to_string(),
            display_title: series.to_string(),
            source: "GetComics".to_string(),
            filesize: 0,
            pages: 0,
            releaser: None,
            scan_type: None,
            resolution: None,
            dpi: None,
        }
    }

    #[test]
    fn test_search_result_filter() {
        let vol = volume(SpecialVersion::Normal);
        let issues = vec![issue(1.0), issue(2.0), issue(3.0)];
        let number_to_year: NumberToYear = issues
            .iter()
            .map(|i| (OrderedFloat(i.calculated_issue_number), Some(2003)))
            .collect();

        let rejections = check_search_result_match(
            &search_result("Invincible"),
            &vol,
            &issues,
            &number_to_year,
            Some(2.0),
            false,
        );
        assert!(rejections.is_empty());

        let rejections = check_search_result_match(
            &search_result("Spawn"),
            &vol,
            &issues,
            &number_to_year,
            Some(2.0),
            false,
        );
        assert!(rejections.contains(&MatchRejection::Title));

        let rejections = check_search_result_match(
            &search_result("Invincible"),
            &vol,
            &issues,
            &number_to_year,
            Some(3.0),
            false,
        );
        assert!(rejections.contains(&MatchRejection::IssueNumber));

        let rejections = check_search_result_match(
            &search_result("Invincible"),
            &vol,
            &issues,
            &number_to_year,
            Some(2.0),
            true,
        );
        assert!(rejections.contains(&MatchRejection::Blocklisted));
    }

    #[test]
    fn test_ranker_prefers_matches() {
        let matched = MatchedSearchResult {
            result: search_result("Invincible"),
            is_match: true,
            match_rejections: vec![],
            covered_issues: None,
        };
        let mut unmatched = matched.clone();
        unmatched.is_match = false;

        let rank_match = rank_search_result(
            &matched,
            "Invincible",
            1,
            (Some(2003), Some(2003)),
            Some(2.0),
        );
        let rank_no_match = rank_search_result(
            &unmatched,
            "Invincible",
            1,
            (Some(2003), Some(2003)),
            Some(2.0),
        );
        assert_eq!(cmp_rank(&rank_match, &rank_no_match), std::cmp::Ordering::Less);
    }

    #[test]
    fn test_ranker_narrower_range_wins() {
        let mut narrow = MatchedSearchResult {
            result: search_result("Invincible"),
            is_match: true,
            match_rejections: vec![],
            covered_issues: None,
        };
        narrow.result.issue_number = Some(IssueRange::Range(1.0, 3.0));
        let mut wide = narrow.clone();
        wide.result.issue_number = Some(IssueRange::Range(1.0, 10.0));

        let rank_narrow = rank_search_result(
            &narrow,
            "Invincible",
            1,
            (Some(2003), Some(2003)),
            Some(2.0),
        );
        let rank_wide = rank_search_result(
            &wide,
            "Invincible",
            1,
            (Some(2003), Some(2003)),
            Some(2.0),
        );
        assert_eq!(cmp_rank(&rank_narrow, &rank_wide), std::cmp::Ordering::Less);
    }

    #[test]
    fn test_select_best_volume_result() {
        let file = FilenameData {
            series: "Invincible".to_string(),
            year: Some(2003),
            volume_number: Some(VolumeRange::Single(2)),
            issue_number: None,
            annual: false,
            special_version: None,
        };

        let make = |year: Option<i32>, volume_number: i32| VolumeMetadata {
            comicvine_id: ComicvineId(volume_number as i64),
            title: "Invincible".to_string(),
            year,
            volume_number,
            cover_link: String::new(),
            description: None,
            site_url: String::new(),
            aliases: vec![],
            publisher: None,
            issue_count: 10,
            translated: false,
            already_added: None,
            issues: None,
            folder_name: String::new(),
        };

        let results = vec![make(Some(1990), 1), make(Some(2003), 2)];
        let best = select_best_volume_result_for_file(&file, &results);
        assert_eq!(best.unwrap().volume_number, 2);

        // With the file year unknown, an unknown-year candidate beats a
        // wrong-year one.
        let mut file = file;
        file.year = None;
        let results = vec![make(Some(2099), 2), make(None, 2)];
        let best = select_best_volume_result_for_file(&file, &results);
        assert_eq!(best.unwrap().year, None);
    }
}
